use clap::{Parser, Subcommand};
use hostguard::store::{ConfigStore, HistoryStore};

#[derive(Parser)]
#[command(name = "hostguard")]
#[command(about = "hostguard CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, default config, config store, and a random API key.
    Init {
        /// Config file path (default: HOSTGUARD_CONFIG_PATH or ~/.hostguard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the local HTTP control API until Ctrl+C.
    Serve {
        /// Config file path (default: HOSTGUARD_CONFIG_PATH or ~/.hostguard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 50761)
        #[arg(long, short)]
        port: Option<u16>,

        /// Bind to all interfaces instead of 127.0.0.1.
        #[arg(long)]
        all_interfaces: bool,
    },

    /// Handle one hosts-apply event: run the configured post-apply command once.
    ApplyHook {
        /// Config file path (default: HOSTGUARD_CONFIG_PATH or ~/.hostguard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Check a command against the post-apply whitelist.
    Validate {
        /// Command string, quoted as one argument.
        command: String,
    },

    /// Print the post-apply command history, oldest first.
    History {
        /// Config file path (default: HOSTGUARD_CONFIG_PATH or ~/.hostguard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Read or write a config store setting (e.g. cmd_after_hosts_apply, http_api_on).
    Config {
        /// Config file path (default: HOSTGUARD_CONFIG_PATH or ~/.hostguard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a value as JSON.
    Get { key: String },
    /// Set a value. Parsed as JSON when possible (true, 3, "x"), else stored as a string.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Some(Commands::Version) => {
            println!("hostguard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config).await,
        Some(Commands::Serve {
            config,
            port,
            all_interfaces,
        }) => run_serve(config, port, all_interfaces).await,
        Some(Commands::ApplyHook { config }) => run_apply_hook(config).await,
        Some(Commands::Validate { command }) => {
            let verdict = hostguard::command::validate(&command);
            match verdict.reason {
                None => println!("ok"),
                Some(reason) => {
                    println!("rejected: {}", reason);
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Some(Commands::History { config }) => run_history(config).await,
        Some(Commands::Config { config, action }) => run_config(config, action).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(hostguard::config::default_config_path);
    let dir = hostguard::init::init_config_dir(&path).await?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    all_interfaces: bool,
) -> anyhow::Result<()> {
    let (mut config, path) = hostguard::config::load_config(config_path)?;
    if let Some(p) = port {
        config.api.port = p;
    }
    let override_local = if all_interfaces { Some(false) } else { None };
    hostguard::gateway::run_http_api(config, path, override_local).await
}

async fn open_agent(
    config_path: Option<std::path::PathBuf>,
) -> anyhow::Result<hostguard::agent::Agent> {
    let (config, path) = hostguard::config::load_config(config_path)?;
    Ok(hostguard::agent::Agent::open(&config, &path).await)
}

async fn run_apply_hook(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let agent = open_agent(config_path).await?;
    match agent.runner.run_after_apply().await {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => println!("no post-apply command configured"),
    }
    Ok(())
}

async fn run_history(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let agent = open_agent(config_path).await?;
    let all = agent.store.all().await?;
    println!("{}", serde_json::to_string_pretty(&all)?);
    Ok(())
}

async fn run_config(
    config_path: Option<std::path::PathBuf>,
    action: ConfigAction,
) -> anyhow::Result<()> {
    let agent = open_agent(config_path).await?;
    match action {
        ConfigAction::Get { key } => {
            let value = agent.store.get(&key).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&value.unwrap_or(serde_json::Value::Null))?
            );
        }
        ConfigAction::Set { key, value } => {
            let parsed = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            agent.store.set(&key, parsed).await?;
            println!("{} updated", key);
        }
    }
    Ok(())
}
