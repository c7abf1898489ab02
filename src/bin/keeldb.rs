//! Binary entry point for the KeelDB server and shell.
#![forbid(unsafe_code)]

use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use keeldb::{
    config::Config,
    server::{run_shell, Client, Server},
    Database,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "keeldb",
    version,
    about = "Transactional storage engine with a line-oriented SQL front end",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file (defaults to <config dir>/keeldb/config.toml)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DbArgs {
    #[arg(value_name = "PATH", help = "Base path of the database files")]
    path: Option<PathBuf>,

    #[arg(long, value_name = "SIZE", help = "Page cache size, e.g. 64MB")]
    mem: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new empty database.
    Create(DbArgs),
    /// Open a database and serve clients over TCP.
    Serve {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long, value_name = "ADDR", help = "Listen address")]
        addr: Option<String>,
    },
    /// Interactive shell against a running server.
    Shell {
        #[arg(long, value_name = "ADDR", help = "Server address")]
        addr: Option<String>,
    },
    /// Delete every file of a database that is not open.
    Drop {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.log.filter);

    match cli.command {
        Command::Create(args) => {
            let path = db_path(args.path, &config)?;
            let options = config.engine_options(args.mem.as_deref())?;
            Database::create(&path, &options)?.close()?;
            println!("created {}", path.display());
        }
        Command::Serve { db, addr } => {
            let path = db_path(db.path, &config)?;
            let options = config.engine_options(db.mem.as_deref())?;
            let addr = config.server_addr(addr.as_deref())?;
            let database = Database::open(&path, &options)?;
            let server = Server::new(
                std::sync::Arc::clone(database.catalog()),
                config.server.max_connections,
            );
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let served = runtime.block_on(server.run(addr, async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("server.interrupt");
                }
            }));
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            let closed = database.close();
            served?;
            closed?;
        }
        Command::Shell { addr } => {
            let addr = config.server_addr(addr.as_deref())?;
            let client = Client::connect(addr)?;
            run_shell(client, io::stdin().lock(), io::stdout().lock())?;
        }
        Command::Drop { path } => {
            let path = db_path(path, &config)?;
            Database::remove(&path)?;
            println!("dropped {}", path.display());
        }
    }

    Ok(())
}

fn db_path(arg: Option<PathBuf>, config: &Config) -> Result<PathBuf, Box<dyn Error>> {
    arg.or_else(|| config.database.path.clone())
        .ok_or_else(|| "no database path given and none configured".into())
}

fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
