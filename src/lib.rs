pub mod cli;
pub mod config;
pub mod ebpf;
pub mod error;
pub mod runtime;
pub mod tc;

pub use error::{ExtackError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
