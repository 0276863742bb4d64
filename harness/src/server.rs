/// Running `bank` process, killed when dropped.
pub struct Server(std::process::Child);

impl Server {
    pub fn new(
        path: &std::path::Path,
        id: usize,
        count: usize,
        base: u16,
        verbose: u8,
    ) -> std::io::Result<Self> {
        let id = id.to_string();
        let count = count.to_string();
        let base = base.to_string();
        let mut command = std::process::Command::new(path);
        if verbose > 0 {
            let verbosity = "-".to_string() + &"v".repeat(verbose as usize);
            command.arg(&verbosity);
        }
        command.args(&["-i", &id])
            .args(&["-c", &count])
            .args(&["-b", &base])
            .spawn()
            .map(Server)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}
