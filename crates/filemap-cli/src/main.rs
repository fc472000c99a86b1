use clap::{Parser, Subcommand};

mod commands;
mod transforms;

#[derive(Parser)]
#[command(
    name = "filemap",
    about = "filemap: run content transforms over a tree of files",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured pipeline over files and directories.
    ///
    /// Directories are walked recursively. Each file is written to the
    /// output directory under its path relative to the input it came from.
    Run {
        /// Input files or directories
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Path to filemap.toml
        #[arg(short, long, default_value = "filemap.toml")]
        config: String,
        /// Output directory
        #[arg(short, long, default_value = "out")]
        out: String,
        /// Load bodies as live streams (overrides [pipeline].stream_input)
        #[arg(long)]
        stream: bool,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Validate a config and list its stages
    Check {
        #[arg(short, long, default_value = "filemap.toml")]
        config: String,
    },
    /// Generate a filemap.toml scaffold
    Init {
        #[arg(short, long, default_value = ".")]
        path: String,
        /// Pipeline name (default: directory name)
        #[arg(short, long)]
        name: Option<String>,
        /// Overwrite an existing filemap.toml
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("filemap=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { inputs, config, out, stream, format } => {
            commands::run::run(&config, &inputs, &out, stream, &format).await
        }
        Commands::Check { config } => commands::check::check(&config),
        Commands::Init { path, name, force } => {
            commands::init::init(&path, name.as_deref(), force)
        }
    }
}
