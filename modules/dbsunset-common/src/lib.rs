pub mod config;
pub mod error;
pub mod log;
pub mod types;

pub use config::Config;
pub use error::DecommError;
pub use log::{LogEntry, LogEntryKind, LogLevel, LogRegistry, SunburstData, TableData};
pub use types::*;
