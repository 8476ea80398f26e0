use crate::cli::Cli;
use crate::ebpf::ProbeStrategy;
use crate::{ExtackError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Validated run configuration, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub strategy: ProbeStrategy,
    pub ifindex: u32,
    pub reconcile_interval: Duration,
    pub pin_dir: PathBuf,
    pub verbose: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        if cli.ifindex == 0 {
            return Err(ExtackError::Config(
                "ifindex must be a valid interface index (> 0)".to_string(),
            ));
        }
        if cli.reconcile_interval_ms == 0 {
            return Err(ExtackError::Config(
                "reconcile interval must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            strategy: ProbeStrategy::from_flags(cli.without_tracing, cli.tp_btf),
            ifindex: cli.ifindex,
            reconcile_interval: Duration::from_millis(cli.reconcile_interval_ms),
            pin_dir: cli.pin_dir.clone(),
            verbose: cli.verbose,
        })
    }

    /// Maximum level for the log subscriber
    pub fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}
