mod bridge;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Args, Parser, Subcommand},
    secrecy::SecretString,
    tessera_config::{TesseraConfig, schema::split_host_port},
    tessera_gateway::{GatewayState, ServerConfig, auth, start_gateway},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::bridge::{EditorSocket, SocketBridge};

#[derive(Parser)]
#[command(name = "tessera", about = "Tessera: polyglot gateway for a browser-hosted editor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of discovering one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve(ServeArgs),
    /// Print the hash to use as `auth.hashed_password`.
    HashPassword {
        #[arg(env = "TESSERA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Print the effective configuration.
    PrintConfig,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// `host:port` to listen on.
    #[arg(long)]
    bind_addr: Option<String>,
    /// Unix socket to listen on instead of a TCP address.
    #[arg(long)]
    socket: Option<PathBuf>,
    #[arg(long, requires = "cert_key")]
    cert: Option<PathBuf>,
    #[arg(long, requires = "cert")]
    cert_key: Option<PathBuf>,
    /// Directory resources may be served from. Repeatable.
    #[arg(long = "root")]
    roots: Vec<PathBuf>,
    #[arg(long)]
    editor_root: Option<PathBuf>,
    /// Editor process socket: a path or `host:port`.
    #[arg(long)]
    editor_socket: Option<String>,
    #[arg(long, env = "TESSERA_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl ServeArgs {
    fn apply(self, config: &mut TesseraConfig) {
        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if self.socket.is_some() {
            config.socket = self.socket;
        }
        if self.cert.is_some() {
            config.cert = self.cert;
            config.cert_key = self.cert_key;
        }
        if !self.roots.is_empty() {
            config.roots = self.roots;
        }
        if let Some(root) = self.editor_root {
            config.editor.root = root;
        }
        if self.editor_socket.is_some() {
            config.editor.socket = self.editor_socket;
        }
        if let Some(password) = self.password {
            config.auth.password = Some(SecretString::new(password));
        }
    }
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

fn load_config(cli: &Cli) -> anyhow::Result<TesseraConfig> {
    match &cli.config {
        Some(path) => tessera_config::load_config(path),
        None => Ok(tessera_config::discover_and_load()),
    }
}

/// The socket wins over `bind_addr` when both are set.
fn server_config(config: &TesseraConfig) -> anyhow::Result<ServerConfig> {
    let server = match &config.socket {
        Some(path) => ServerConfig::unix(path),
        None => {
            let (host, port) = split_host_port(&config.bind_addr)?;
            ServerConfig::tcp(host, port)
        },
    };
    Ok(match (&config.cert, &config.cert_key) {
        (Some(cert), Some(key)) => server.with_tls(cert, key),
        _ => server,
    })
}

async fn serve(mut config: TesseraConfig, args: ServeArgs) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let authenticator = auth::resolve_auth(
        config.auth.mode,
        config.auth.password.as_ref(),
        config.auth.hashed_password.as_deref(),
    )?;
    let editor_socket = config.editor.socket.as_deref().map(EditorSocket::parse);
    if editor_socket.is_none() {
        info!("no editor socket configured, upgraded connections will be closed");
    }
    let workbench = Arc::new(SocketBridge::new(config.editor.root.clone(), editor_socket));
    let state = GatewayState::new(authenticator, workbench, config.roots.clone());

    start_gateway(&server_config(&config)?, state).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "tessera starting");

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Serve(args) => serve(config, args).await,
        Commands::HashPassword { password } => {
            println!("{}", auth::hash_password(&password));
            Ok(())
        },
        Commands::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}
