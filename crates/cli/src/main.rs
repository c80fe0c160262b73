use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "lectern",
    about = "LTI 1.3 platform for launching external learning tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the platform HTTP server
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Generate a platform signing key and print the export lines
    Keygen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // LOG_LEVEL drives the default filter; RUST_LOG wins when set.
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            commands::serve::run(port).await?;
        }
        Commands::Keygen => {
            commands::keygen::run()?;
        }
    }

    Ok(())
}
