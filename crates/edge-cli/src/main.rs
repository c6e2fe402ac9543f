//! edgecli: publish a game server behind an edge proxy and connect to it.
//!
//! # Usage
//!
//! ```text
//! edgecli server create mc1 --domain play.example.com --backend 127.0.0.1:25565
//! edgecli server share mc1
//! edgecli client add home --domain play.example.com
//! edgecli client start home
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::App;

#[derive(Parser)]
#[command(
    name = "edgecli",
    about = "Expose and reach game servers through a supervised proxy engine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: <data-dir>/edgecli.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the profile store and engine run files.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage server profiles (the machine hosting the game server).
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Manage client profiles (players connecting to a server).
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
    /// Decode an edge:// link or a TXT value and print the connection details.
    Decode {
        /// Link or TXT record value.
        input: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// Create a server profile with a fresh credential and certificate.
    Create {
        name: String,
        /// Public domain players connect to.
        #[arg(long)]
        domain: String,
        /// Game server address the proxy forwards to (host:port).
        #[arg(long)]
        backend: String,
        /// Public proxy port (default 443).
        #[arg(long)]
        port: Option<u16>,
        /// Transport path (default /mcproxy).
        #[arg(long)]
        path: Option<String>,
    },
    List,
    Show {
        name: String,
    },
    /// Print the DNS record and link to hand out.
    Share {
        name: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Replace credential and certificate. Previously shared details stop working.
    Regenerate {
        name: String,
    },
    Delete {
        name: String,
    },
    /// Run the proxy engine in the foreground until Ctrl-C.
    Start {
        name: String,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Add a client profile from a domain or a shared link.
    Add {
        name: String,
        /// Server domain; details are resolved from its TXT record.
        #[arg(long, conflicts_with = "link", required_unless_present = "link")]
        domain: Option<String>,
        /// Shared edge:// link.
        #[arg(long)]
        link: Option<String>,
        /// Local port the game connects to.
        #[arg(long, default_value_t = edge_core::profile::DEFAULT_LOCAL_PORT)]
        local_port: u16,
    },
    /// Look up the server's TXT record again and store the result.
    Resolve {
        name: String,
    },
    List,
    Show {
        name: String,
    },
    Delete {
        name: String,
    },
    /// Run the local proxy in the foreground until Ctrl-C.
    Start {
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug"
    } else {
        "info,edgecli=debug,edge=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let open_app = || -> anyhow::Result<App> {
        let config = commands::load_config(cli.config.as_deref(), cli.data_dir.as_deref())?;
        App::open(config)
    };

    match cli.command {
        Commands::Decode { input, format } => commands::decode::decode(&input, &format),
        Commands::Server { action } => {
            let app = open_app()?;
            match action {
                ServerAction::Create {
                    name,
                    domain,
                    backend,
                    port,
                    path,
                } => commands::server::create(&app, name, domain, backend, port, path),
                ServerAction::List => commands::server::list(&app),
                ServerAction::Show { name } => commands::server::show(&app, &name),
                ServerAction::Share { name, format } => {
                    commands::server::share(&app, &name, &format)
                }
                ServerAction::Regenerate { name } => commands::server::regenerate(&app, &name),
                ServerAction::Delete { name } => commands::server::delete(&app, &name),
                ServerAction::Start { name } => commands::server::start(&app, &name).await,
            }
        }
        Commands::Client { action } => {
            let app = open_app()?;
            match action {
                ClientAction::Add {
                    name,
                    domain,
                    link,
                    local_port,
                } => {
                    commands::client::add(&app, &name, domain.as_deref(), link.as_deref(), local_port)
                        .await
                }
                ClientAction::Resolve { name } => commands::client::resolve(&app, &name).await,
                ClientAction::List => commands::client::list(&app),
                ClientAction::Show { name } => commands::client::show(&app, &name),
                ClientAction::Delete { name } => commands::client::delete(&app, &name),
                ClientAction::Start { name } => commands::client::start(&app, &name).await,
            }
        }
    }
}
