use serde_derive::{Serialize, Deserialize};

#[derive(Serialize, Deserialize)]
pub struct Execution(pub Vec<Command>);

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start a bank process with the given parameters
    Start {
        id: usize,
        count: usize,
        #[serde(default = "default_base")]
        base: u16,
    },

    /// Crash the specified process
    Crash {
        id: usize,
    },

    /// Sleep the test harness for `ms` milliseconds
    Sleep {
        ms: u64,
    }
}

fn default_base() -> u16 {
    20000
}
