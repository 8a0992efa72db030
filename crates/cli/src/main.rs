use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wxbot")]
#[command(about = "WeChat official account bridge: OCR for pictures, random animals on request", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a template config file (fill in the wechat and tencent credentials before serving).
    Init {
        /// Config file path (default: WXBOT_CONFIG_PATH or ./config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Serve the WeChat callback endpoint. Exits immediately if the config is missing or invalid.
    Serve {
        /// Config file path (default: WXBOT_CONFIG_PATH or ./config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Listen address, overriding `addr` from the config (e.g. ":8080" or "127.0.0.1:8080")
        #[arg(long, short, value_name = "ADDR")]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("wxbot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, addr }) => {
            if let Err(e) = run_serve(config, addr).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(wxbot::config::default_config_path);
    if wxbot::config::write_template(&path)? {
        println!("wrote template config to {}", path.display());
    } else {
        println!("config already exists at {}, left unchanged", path.display());
    }
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    addr: Option<String>,
) -> anyhow::Result<()> {
    let (mut config, path) = wxbot::config::load_config(config_path)?;
    if let Some(a) = addr {
        config.addr = a;
    }
    log::info!("starting wxbot on {} (config {})", config.bind_addr(), path.display());
    wxbot::gateway::run_gateway(config).await
}
