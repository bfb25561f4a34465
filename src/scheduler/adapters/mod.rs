//! Adapter implementations for scheduler ports.

pub mod memory;
pub mod postgres;

mod file_log;
mod process;

pub use file_log::FileJobLogSink;
pub use process::{CollectorCommand, ProcessCollector};
