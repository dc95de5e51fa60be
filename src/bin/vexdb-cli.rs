//! VexDB Command Line Interface

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use vexdb_client::{Client, ClientConfig, CollectionSchema, DataType, FieldSchema, TlsConfig};

#[derive(Parser)]
#[command(name = "vexdb-cli")]
#[command(author, version, about = "VexDB Command Line Interface", long_about = None)]
struct Cli {
    /// Server address (host:port or https://host:port)
    #[arg(short, long, env = "VEXDB_ADDR", default_value = "127.0.0.1:19530")]
    server: String,

    /// Request one-way TLS even for a plain address
    #[arg(long)]
    ssl: bool,

    /// Username for authentication
    #[arg(short, long, env = "VEXDB_USERNAME", default_value = "")]
    username: String,

    /// Password for authentication
    #[arg(short, long, env = "VEXDB_PASSWORD", default_value = "")]
    password: String,

    /// Path to a root certificate file (selects mutual TLS)
    #[arg(long)]
    root_cert: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the server
    Ping,

    /// Server information and statistics
    Info,

    /// Server version (newer servers only)
    Version,

    /// Collection management
    #[command(subcommand)]
    Collections(CollectionCommand),
}

#[derive(Subcommand)]
enum CollectionCommand {
    /// List collections
    List,

    /// Describe a collection
    Describe { name: String },

    /// Create a collection with an id field and one vector field
    Create {
        name: String,

        /// Vector dimension of the embedding field
        #[arg(long, default_value_t = 768)]
        dimension: u32,
    },

    /// Drop a collection
    Drop { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    #[cfg(feature = "tracing-subscriber")]
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    let mut config = ClientConfig::new(cli.server.clone())
        .with_ssl(cli.ssl)
        .with_credentials(cli.username, cli.password);
    if let Some(root_cert) = cli.root_cert {
        config = config.with_tls(TlsConfig::new().with_root_cert(root_cert));
    }
    let client = Client::build(config).context("failed to configure client")?;

    match cli.command {
        Commands::Ping => {
            client.ping().await?;
            println!("{}", "PONG".green());
        }
        Commands::Info => {
            let info = client.server_info().await?;
            println!("{}   {}", "version:".bold(), info.version);
            println!(
                "{} {}",
                "started at:".bold(),
                info.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("{}    {}s", "uptime:".bold(), info.uptime_seconds);
            println!("{} {}", "collections:".bold(), info.collection_count);
        }
        Commands::Version => {
            println!("{}", client.server_version().await?);
        }
        Commands::Collections(command) => match command {
            CollectionCommand::List => {
                let collections = client.list_collections().await?;
                if collections.is_empty() {
                    println!("{}", "(no collections)".dimmed());
                }
                for name in collections {
                    println!("{name}");
                }
            }
            CollectionCommand::Describe { name } => {
                let schema = client.describe_collection(&name).await?;
                println!("{} {}", "collection:".bold(), schema.name);
                if !schema.description.is_empty() {
                    println!("{}", schema.description.dimmed());
                }
                for field in schema.fields {
                    let marker = if field.is_primary { " (primary)" } else { "" };
                    match field.dimension {
                        Some(dim) => println!("  {} {:?}[{dim}]{marker}", field.name, field.data_type),
                        None => println!("  {} {:?}{marker}", field.name, field.data_type),
                    }
                }
            }
            CollectionCommand::Create { name, dimension } => {
                let schema = CollectionSchema {
                    name: name.clone(),
                    description: String::new(),
                    fields: vec![
                        FieldSchema {
                            name: "id".to_string(),
                            data_type: DataType::Int64,
                            dimension: None,
                            is_primary: true,
                            description: String::new(),
                        },
                        FieldSchema {
                            name: "embedding".to_string(),
                            data_type: DataType::FloatVector,
                            dimension: Some(dimension),
                            is_primary: false,
                            description: String::new(),
                        },
                    ],
                };
                client.create_collection(&schema).await?;
                println!("{} {name}", "created".green());
            }
            CollectionCommand::Drop { name } => {
                client.drop_collection(&name).await?;
                println!("{} {name}", "dropped".yellow());
            }
        },
    }

    Ok(())
}
