//! CLI client: one-shot subcommands or an interactive shell

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use minidfs::common::{format_bytes, Config};
use minidfs::DfsClient;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs client")]
#[command(version)]
struct Cli {
    /// Coordinator address (host:port)
    #[arg(long)]
    coordinator: Option<String>,

    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Without a subcommand the interactive shell starts
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Put {
        /// Local file
        path: PathBuf,

        /// Remote name (defaults to the local file name)
        name: Option<String>,
    },

    /// Download a file
    Get {
        /// Remote name
        name: String,

        /// Output file (defaults to the remote name)
        output: Option<PathBuf>,
    },

    /// Show the primary node of each block
    Info {
        name: String,
    },

    /// List stored files
    Ls,

    /// Delete a file and its blocks
    Rm {
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let mut client_config = config.client;
    if let Some(addr) = cli.coordinator {
        client_config.coordinator_addr = addr;
    }

    let mut client = DfsClient::connect(client_config.clone())
        .await
        .with_context(|| format!("connecting to coordinator {}", client_config.coordinator_addr))?;

    match cli.command {
        Some(command) => run_command(&mut client, command).await,
        None => run_shell(&mut client).await,
    }
}

async fn run_command(client: &mut DfsClient, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Put { path, name } => {
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("cannot derive a name from {}", path.display()))?,
            };
            let report = client.upload(&path, &name).await?;
            println!(
                "Uploaded {} as {}: {} blocks, {}",
                path.display(),
                name,
                report.blocks,
                format_bytes(report.bytes)
            );
        }

        Commands::Get { name, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&name));
            let report = client.download(&name, &output).await?;
            println!(
                "Downloaded {} to {}: {} blocks, {}",
                name,
                output.display(),
                report.blocks,
                format_bytes(report.bytes)
            );
            if !report.recovered.is_empty() {
                println!("  Served from backup: blocks {:?}", report.recovered);
            }
        }

        Commands::Info { name } => {
            let nodes = client.info(&name).await?;
            println!("{}: {} blocks", name, nodes.len());
            for (i, node) in nodes.iter().enumerate() {
                println!("  block {:>4} -> {}", i, node);
            }
        }

        Commands::Ls => {
            let files = client.ls().await?;
            if files.is_empty() {
                println!("(no files)");
            }
            for file in files {
                println!("{}", file);
            }
        }

        Commands::Rm { name } => {
            let report = client.remove(&name).await?;
            println!("Removed {}: {} block copies deleted", name, report.deleted);
            for failure in &report.failures {
                println!("  failed: {}", failure);
            }
        }
    }

    Ok(())
}

async fn run_shell(client: &mut DfsClient) -> anyhow::Result<()> {
    println!("minidfs shell (coordinator {})", client.config().coordinator_addr);
    println!("Type 'help' for available commands, 'exit' or Ctrl+D to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("dfs> ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => {
                println!("exit");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if line == "help" {
            print_help();
            continue;
        }

        let command = match parse_shell_command(line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };
        if let Err(e) = run_command(client, command).await {
            eprintln!("Error: {:#}", e);
        }
    }

    Ok(())
}

fn parse_shell_command(line: &str) -> anyhow::Result<Commands> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let command = match tokens.as_slice() {
        ["put", path] => Commands::Put {
            path: PathBuf::from(path),
            name: None,
        },
        ["put", path, name] => Commands::Put {
            path: PathBuf::from(path),
            name: Some(name.to_string()),
        },
        ["get", name] => Commands::Get {
            name: name.to_string(),
            output: None,
        },
        ["get", name, output] => Commands::Get {
            name: name.to_string(),
            output: Some(PathBuf::from(output)),
        },
        ["info", name] => Commands::Info {
            name: name.to_string(),
        },
        ["ls"] => Commands::Ls,
        ["rm", name] => Commands::Rm {
            name: name.to_string(),
        },
        [cmd, ..] if ["put", "get", "info", "ls", "rm"].contains(cmd) => {
            bail!("wrong arguments for '{}', type 'help' for usage", cmd)
        }
        [cmd, ..] => bail!("unknown command '{}', type 'help' for usage", cmd),
        [] => bail!("empty command"),
    };
    Ok(command)
}

fn print_help() {
    println!("Commands:");
    println!("  put <path> [name]     upload a local file");
    println!("  get <name> [output]   download a file");
    println!("  info <name>           show the primary node of each block");
    println!("  ls                    list stored files");
    println!("  rm <name>             delete a file and its blocks");
    println!("  exit                  leave the shell");
}
