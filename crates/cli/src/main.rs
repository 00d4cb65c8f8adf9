mod config_commands;
mod console;
mod peers_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "valet", about = "valet: chat automation agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery of ./valet.toml and the user config dir).
    #[arg(long, short, global = true, env = "VALET_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to `logging.level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent against the console transport (default).
    Run,
    /// Configuration checks.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Inspect the durable identity store.
    Peers {
        #[command(subcommand)]
        action: peers_commands::PeersAction,
    },
}

fn init_telemetry(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Config validation reports its own parse errors.
    if let Some(Commands::Config {
        action: config_commands::ConfigAction::Check { verbose },
    }) = cli.command
    {
        init_telemetry(cli.log_level.as_deref().unwrap_or("warn"), cli.json_logs);
        return config_commands::check(cli.config.as_deref(), verbose);
    }

    let config = valet_config::load_or_discover(cli.config.as_deref())?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_telemetry(level, cli.json_logs || config.logging.json);

    match cli.command {
        None | Some(Commands::Run) => {
            config_commands::ensure_valid(cli.config.as_deref())?;
            info!(version = env!("CARGO_PKG_VERSION"), "valet starting");
            console::run(config).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config),
        Some(Commands::Peers { action }) => peers_commands::handle_peers(action, &config).await,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_is_the_default() {
        let cli = Cli::try_parse_from(["valet", "--log-level", "debug"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["valet", "peers", "forget", "42", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Peers {
                action: peers_commands::PeersAction::Forget { id: 42 }
            })
        ));
    }
}
