use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Arg, ArgAction, Command, CommandFactory, FromArgMatches, Parser};
use devroute::config::Config;
use devroute::logging::{LogFormat, init_logging};
use devroute::proxy::{Proxy, build_router};
use devroute::upstream::DohConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "devroute")]
#[command(version)]
#[command(about = "Device aware DNS proxy that races upstream resolvers", long_about = None)]
struct Args {
    /// Path to the configuration file, created from a template if missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Port to listen on (UDP and TCP)
    #[arg(short, long, default_value_t = 53)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// `Args` with `-v`/`--version` in place of clap's `-V`.
fn command() -> Command {
    Args::command().disable_version_flag(true).arg(
        Arg::new("version")
            .short('v')
            .long("version")
            .help("Print version")
            .action(ArgAction::Version),
    )
}

fn parse_args() -> Args {
    let matches = command().get_matches();
    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(path = %args.config.display(), "Configuration loaded");

    let router = build_router(&config, DohConfig::default())?;
    let bind_addr = SocketAddr::new(args.bind, args.port);
    let proxy = Proxy::bind(bind_addr, router).await?;
    info!(%bind_addr, "DNS proxy listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    proxy.run(shutdown).await;
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutting down...");
    shutdown.cancel();
}

fn main() -> anyhow::Result<()> {
    let args = parse_args();
    init_logging(&args.log_level, args.log_format);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(args))
}
