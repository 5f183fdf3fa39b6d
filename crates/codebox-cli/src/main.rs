#![deny(unsafe_code)]

//! codebox CLI: runs the sandbox server and talks to a running one.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use codebox_config::AppConfig;
use codebox_core::api::ApiClient;

/// codebox: ephemeral, locked-down sandboxes for running untrusted Python.
#[derive(Parser, Debug)]
#[command(name = "codebox", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "codebox.toml")]
    config: PathBuf,

    /// Server URL for client commands (defaults to the configured listen address).
    #[arg(short, long)]
    server: Option<String>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the API server until Ctrl-C.
    Serve,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Remove every container carrying the configured prefix.
    ///
    /// Do not run while a server using the same prefix is up.
    Reap,

    /// Check that the server is up.
    Health,

    /// List active sandboxes.
    Sandboxes,

    /// Create a sandbox and print its id.
    Create,

    /// Destroy a sandbox.
    Destroy { id: String },

    /// List files in a sandbox.
    Ls {
        id: String,
        /// Subdirectory to list.
        #[arg(long)]
        dir: Option<String>,
    },

    /// Upload a local file into a sandbox.
    Put {
        id: String,
        /// Destination path inside the sandbox.
        path: String,
        /// Local file to upload.
        local: PathBuf,
    },

    /// Print a file from a sandbox.
    Cat { id: String, path: String },

    /// Delete a file from a sandbox.
    Rm { id: String, path: String },

    /// Run a .py file in a sandbox; exits with the program's exit code.
    Run {
        id: String,
        /// Script to run.
        #[arg(default_value = "main.py")]
        path: String,
        /// Arguments passed to the script (after `--`).
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve => cmd_serve(config).await,
        Commands::Config { show } => cmd_config(&cli.config, &config, show),
        Commands::Reap => cmd_reap(config).await,
        command => {
            let url = server_url(cli.server.as_deref(), &config);
            let client = ApiClient::new(&url)?;
            run_client(&client, command).await
        }
    }
}

async fn cmd_serve(config: AppConfig) -> Result<ExitCode> {
    info!(
        version = %codebox_core::build_info::version_string(),
        "starting codebox"
    );
    let daemon = codebox_core::Daemon::new(config);
    daemon.run().await?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<ExitCode> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to render config")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_reap(config: AppConfig) -> Result<ExitCode> {
    let daemon = codebox_core::Daemon::new(config);
    let reaped = daemon.registry().reap_orphans().await?;
    for name in &reaped {
        println!("{name}");
    }
    info!(count = reaped.len(), "reap finished");
    Ok(ExitCode::SUCCESS)
}

async fn run_client(client: &ApiClient, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Health => {
            let health = client.health().await?;
            println!(
                "{} {} ({}, {})",
                health.status, health.version, health.git_hash, health.build_profile
            );
        }
        Commands::Sandboxes => {
            for id in client.list_sandboxes().await? {
                println!("{id}");
            }
        }
        Commands::Create => println!("{}", client.create_sandbox().await?),
        Commands::Destroy { id } => client.delete_sandbox(&id).await?,
        Commands::Ls { id, dir } => {
            for file in client.list_files(&id, dir.as_deref()).await? {
                println!("{file}");
            }
        }
        Commands::Put { id, path, local } => {
            let content = tokio::fs::read_to_string(&local)
                .await
                .with_context(|| format!("failed to read {}", local.display()))?;
            client.write_file(&id, &path, &content).await?;
        }
        Commands::Cat { id, path } => print!("{}", client.read_file(&id, &path).await?),
        Commands::Rm { id, path } => client.delete_file(&id, &path).await?,
        Commands::Run { id, path, args } => {
            let result = client.execute(&id, &path, &args).await?;
            std::io::stdout().write_all(result.stdout.as_bytes())?;
            std::io::stderr().write_all(result.stderr.as_bytes())?;
            return Ok(exit_code(result.exit_code));
        }
        Commands::Serve | Commands::Config { .. } | Commands::Reap => {
            anyhow::bail!("not a client command")
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Map a program exit code onto this process's exit status.
fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

fn server_url(flag: Option<&str>, config: &AppConfig) -> String {
    match flag {
        Some(url) => url.to_string(),
        None => format!(
            "http://{}:{}",
            config.server.listen_addr, config.server.listen_port
        ),
    }
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        AppConfig::default()
    };
    config.apply_env(|var| std::env::var(var).ok())?;
    Ok(config)
}
