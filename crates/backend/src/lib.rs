mod domain;
pub use domain::{config, scheme};

pub mod dirs;
pub mod engine;
pub mod pool;
pub mod sync;

mod daemon;
pub use daemon::{Daemon, DaemonContext, DaemonError, DaemonOptions, RuntimeConfig};
