mod session_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    wagate_config::GatewayConfig,
    wagate_sessions::SessionStore,
};

#[derive(Parser)]
#[command(name = "wagate", about = "Wagate: multi-tenant messaging gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Only look for wagate.{toml,yaml,yml,json} in this directory.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Session store file (overrides the config file).
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long, env = "PORT")]
        port: Option<u16>,
        /// Restore stored sessions immediately instead of on `GET /`.
        #[arg(long, default_value_t = false)]
        restore_on_boot: bool,
    },
    /// Stored session management.
    Sessions {
        #[command(subcommand)]
        action: session_commands::SessionAction,
    },
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file in use.
    Path,
    /// Print the effective configuration as TOML.
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> GatewayConfig {
    if let Some(dir) = &cli.config_dir {
        wagate_config::set_config_dir(dir.clone());
    }
    let mut config = wagate_config::discover_and_load();
    if let Some(store) = &cli.store {
        config.store.path = store.clone();
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "wagate starting");
    let mut config = load_config(&cli);

    match cli.command {
        Commands::Gateway {
            bind,
            port,
            restore_on_boot,
        } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.server.restore_on_boot |= restore_on_boot;
            wagate_gateway::start_gateway(config).await
        },
        Commands::Sessions { action } => {
            session_commands::handle_sessions(action, SessionStore::new(config.store.path)).await
        },
        Commands::Config { action } => {
            match action {
                ConfigAction::Path => {
                    println!("{}", wagate_config::find_or_default_config_path().display());
                },
                ConfigAction::Show => print!("{}", wagate_config::to_toml(&config)?),
            }
            Ok(())
        },
    }
}
