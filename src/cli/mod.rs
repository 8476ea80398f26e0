#[cfg(target_os = "linux")]
pub mod commands;

use crate::error::ExtackError;
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_PIN_DIR: &str = "/sys/fs/bpf/nlextack";

#[derive(Parser, Debug)]
#[command(name = "nlextack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trace netlink extended-ack messages with eBPF", long_about = None)]
pub struct Cli {
    #[arg(
        short = 'T',
        long = "without-tracing",
        help = "Attach only the tracepoint, without fentry/fexit"
    )]
    pub without_tracing: bool,

    #[arg(
        long = "tp-btf",
        alias = "tp_btf",
        help = "Use a single BTF tracepoint (overrides -T)"
    )]
    pub tp_btf: bool,

    #[arg(
        long,
        env = "NLEXTACK_IFINDEX",
        default_value_t = 1,
        help = "Interface index the tc filter is installed on"
    )]
    pub ifindex: u32,

    #[arg(
        long = "reconcile-interval-ms",
        env = "NLEXTACK_RECONCILE_INTERVAL_MS",
        default_value_t = 1000,
        help = "Period between tc filter re-installations"
    )]
    pub reconcile_interval_ms: u64,

    #[arg(
        long,
        env = "NLEXTACK_PIN_DIR",
        default_value = DEFAULT_PIN_DIR,
        help = "bpffs directory used to share the event map between probe images"
    )]
    pub pin_dir: PathBuf,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}

/// Lines logged when the probes fail to come up.
///
/// A verifier rejection carries the kernel's verifier log as a second line.
pub fn startup_error_report(err: &ExtackError) -> Vec<String> {
    match err {
        ExtackError::Load(load) => {
            let mut lines = vec![format!("Failed to load {}: {}", load.program(), load)];
            if let Some(log) = load.verifier_log() {
                lines.push(format!("Verifier log:\n{}", log));
            }
            lines
        }
        other => vec![format!("Failed to attach probes: {}", other)],
    }
}
