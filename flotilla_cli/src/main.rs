mod logging;
mod server;
mod stats;

use flotilla_core::bootstrap::{BootstrapGenerator, Platform, TemplateBootstrapGenerator};
use flotilla_core::config::FlotillaConfig;
use flotilla_core::orchestrator::Orchestrator;
use flotilla_core::session::SessionStatus;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control node, reading requests from stdin or from TCP clients.
    Serve {
        /// Listen on TCP instead of stdin. Without an address the configured
        /// `[server] listen` is used.
        #[clap(long, value_name = "ADDR")]
        tcp: Option<Option<String>>,
    },
    /// Generate an agent package for one machine.
    Bootstrap {
        #[clap(long)]
        platform: Platform,
        #[clap(long)]
        name: String,
        #[clap(long)]
        out_dir: PathBuf,
        /// Address the agent reports to. Defaults to `[server] listen`.
        #[clap(long)]
        control_addr: Option<String>,
        /// Defaults to the liveness sweep interval.
        #[clap(long)]
        heartbeat_secs: Option<u64>,
    },
    /// Print an `update_session_status` request built from a fuzzer's stats file.
    Stats {
        #[clap(long)]
        output_dir: PathBuf,
        #[clap(long)]
        session: String,
        #[clap(long, default_value = "running")]
        status: SessionStatus,
    },
}

fn load_config(config_file: Option<PathBuf>) -> Result<(FlotillaConfig, String), anyhow::Error> {
    match config_file {
        Some(config_path) => {
            let config = FlotillaConfig::load_from_file(&config_path)?;
            Ok((config, format!("Loaded configuration from {config_path:?}")))
        }
        None => {
            let default_config_path = PathBuf::from("flotilla.toml");
            if default_config_path.exists() {
                let config = FlotillaConfig::load_from_file(&default_config_path)?;
                Ok((
                    config,
                    format!("No config file specified, loaded default {default_config_path:?}"),
                ))
            } else {
                Ok((
                    FlotillaConfig::default(),
                    "No config file specified and 'flotilla.toml' not found, using built-in defaults"
                        .to_string(),
                ))
            }
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let (config, config_source) = load_config(cli.config_file)?;
    logging::init(&config.logging)?;
    info!("{config_source}");

    match cli.command {
        Command::Serve { tcp } => {
            let orchestrator = Arc::new(Orchestrator::from_config(&config));
            if let Some(sweep) = config.liveness.sweep() {
                server::spawn_liveness(
                    Arc::clone(&orchestrator),
                    sweep,
                    config.liveness.interval(),
                );
            }
            match tcp {
                Some(addr) => {
                    let listen = addr.unwrap_or_else(|| config.server.listen.clone());
                    server::serve_tcp(orchestrator, &listen)?;
                }
                None => server::serve_stdio(&orchestrator)?,
            }
        }
        Command::Bootstrap {
            platform,
            name,
            out_dir,
            control_addr,
            heartbeat_secs,
        } => {
            let control_addr = control_addr.unwrap_or_else(|| config.server.listen.clone());
            let generator = TemplateBootstrapGenerator::new(control_addr).with_heartbeat_secs(
                heartbeat_secs.unwrap_or(config.liveness.interval_secs),
            );
            let bundle = generator.generate(platform, &name)?;
            for path in bundle.write_to_dir(&out_dir)? {
                println!("{}", path.display());
            }
            info!(agent = %name, %platform, out_dir = ?out_dir, "agent package written");
        }
        Command::Stats {
            output_dir,
            session,
            status,
        } => {
            let delta = stats::read_fuzzer_stats(&output_dir)?;
            let request = stats::update_request(&session, status, delta);
            println!("{}", serde_json::to_string(&request)?);
        }
    }

    Ok(())
}
