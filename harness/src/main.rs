use std::collections::HashMap as Map;

use structopt::StructOpt;

mod command;
mod server;

use crate::command::{Command, Execution};
use crate::server::Server;

#[derive(StructOpt)]
#[structopt(name = "harness")]
struct Opt {
    /// Path to the `bank` binary
    #[structopt(short = "s", long = "server", parse(from_os_str))]
    server: std::path::PathBuf,

    /// JSON script to execute
    #[structopt(short = "f", long = "file", parse(from_os_str))]
    file: std::path::PathBuf,

    /// Verbosity passed on to every process
    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,
}

fn main() {

    let opt = Opt::from_args();

    // Test execution
    let execution: Execution = std::fs::File::open(&opt.file)
        .map(std::io::BufReader::new)
        .map(serde_json::from_reader)
        .expect("[INTERNAL ERROR]: could not find file")
        .expect("[INTERNAL ERROR]: could not parse test");

    // Running processes
    let mut servers: Map<usize, Server> = Map::default();

    for command in execution.0 {
        println!("Executing command {:?}", command);
        match command {
        | Command::Start { id, count, base } => {
            let server = Server::new(&opt.server, id, count, base, opt.verbose)
                .expect("[INTERNAL ERROR]: could not spawn server");
            if servers.insert(id, server).is_some() {
                println!("Replaced running process {}", id);
            }
        }
        | Command::Crash { id } => {
            if servers.remove(&id).is_none() {
                println!("Process {} is not running", id);
            }
        }
        | Command::Sleep { ms } => {
            std::thread::sleep(std::time::Duration::from_millis(ms))
        }
        }
    }
}
