use std::process;

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("Error: nlextack requires Linux to load eBPF programs");
    process::exit(1);
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() {
    use clap::Parser;
    use nlextack::cli::{commands, Cli};
    use nlextack::config::Config;
    use tracing::{error, info};
    use tracing_subscriber::FmtSubscriber;

    let cli = Cli::parse();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    // try_init also routes `log` records (aya-log) into tracing
    if let Err(e) = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .try_init()
    {
        eprintln!("Failed to set tracing subscriber: {}", e);
        process::exit(1);
    }

    info!("Starting nlextack v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = commands::run(config).await {
        error!("{}", e);
        process::exit(1);
    }
}
