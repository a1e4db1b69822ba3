use std::path::PathBuf;

use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "CHAINSCAN_LOG_LEVEL", default = "info")]
    pub log_level: String,
    /// Default number of segments per call. 0 means one per available core.
    #[envconfig(from = "CHAINSCAN_WORKER_COUNT", default = "0")]
    pub worker_count: usize,
    /// Explicit path to the worker executable.
    #[envconfig(from = "CHAINSCAN_WORKER")]
    pub worker: Option<PathBuf>,
    /// Forward worker stderr to our own stderr instead of discarding it.
    #[envconfig(from = "CHAINSCAN_WORKER_LOG", default = "false")]
    pub worker_log: bool,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }

    /// The worker count to use when none was given explicitly.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
}
