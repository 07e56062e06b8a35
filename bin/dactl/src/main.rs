//! Command-line client for the Celestia DA path.
//!
//! Publishes batch payloads, resolves blob pointers back into payloads and
//! square rows, and drives the local stub store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use blob_pointer::BlobPointer;
use clap::{Parser, Subcommand};
use da_client::{
    record_square_preimages, recover_rows, CelestiaDa, CelestiaRpcClient, DaConfig, DataAvailabilityReader,
    DataAvailabilityWriter, SquareData, StubDa,
};
use preimage_store::{FileStore, PreimageStore, SledStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dactl")]
#[command(about = "Publish and fetch rollup batches on Celestia DA")]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Celestia node RPC URL
    #[arg(long)]
    celestia_rpc: Option<String>,

    /// celestia-core RPC URL
    #[arg(long)]
    tendermint_rpc: Option<String>,

    /// Hex namespace ID (at most 10 bytes)
    #[arg(long)]
    namespace: Option<String>,

    /// Celestia node auth token
    #[arg(long, env = "CELESTIA_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if Celestia node is ready
    Status,
    /// Get current head height
    Head,
    /// Submit a payload and print the framed pointer (hex)
    Store {
        /// Payload as a UTF-8 string
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        /// Read the payload from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Resolve a framed pointer (hex) into its payload
    Read {
        pointer: String,
        /// Record the square's NMT preimages as files in this directory and
        /// recover the rows from them
        #[arg(long, conflicts_with = "record_db")]
        record_dir: Option<PathBuf>,
        /// Same as --record-dir, into a sled database at this path
        #[arg(long)]
        record_db: Option<PathBuf>,
        /// Write the payload to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Wait until the local head reaches a height
    WaitHeight { height: u64 },
    /// Decode a framed pointer (hex) and print its fields
    Decode { pointer: String },
    /// Store a payload in the local stub and print its reference (hex)
    StubStore {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Resolve a stub reference (hex)
    StubRead {
        #[arg(long)]
        dir: PathBuf,
        reference: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&cli)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });

    match cli.command {
        Commands::Status => {
            let client = CelestiaRpcClient::from_config(&config);
            if client.node().is_ready().await? {
                println!("Celestia node is ready");
            } else {
                anyhow::bail!("Celestia node is not ready");
            }
        }
        Commands::Head => {
            let client = CelestiaRpcClient::from_config(&config);
            println!("{}", client.node().get_head_height().await?);
        }
        Commands::Store { data, file } => {
            let payload = read_payload(data, file)?;
            let da = CelestiaDa::from_config(&config)?;
            let pointer = da.store(&cancel, &payload).await?;
            info!("Stored {} bytes at height {}", payload.len(), pointer.block_height);
            println!("{}", hex::encode(da.serialize(&pointer)));
        }
        Commands::Read {
            pointer,
            record_dir,
            record_db,
            out,
        } => {
            let pointer = parse_pointer(&pointer)?;
            let da = CelestiaDa::from_config(&config)?;
            let (payload, square) = da.read(&cancel, &pointer).await?;
            info!(
                "Blob covers rows {}..={} of a {}-wide square",
                square.start_row, square.end_row, square.square_size
            );

            if let Some(dir) = record_dir {
                record_and_recover(&square, &FileStore::open(&dir)?, &dir)?;
            }
            if let Some(db) = record_db {
                record_and_recover(&square, &SledStore::open(&db)?, &db)?;
            }

            match out {
                Some(path) => std::fs::write(&path, &payload)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{}", String::from_utf8_lossy(&payload)),
            }
        }
        Commands::WaitHeight { height } => {
            let da = CelestiaDa::from_config(&config)?;
            let head = da.wait_for_height(&cancel, height).await?;
            println!("{}", head);
        }
        Commands::Decode { pointer } => {
            let pointer = parse_pointer(&pointer)?;
            println!("{}", serde_json::to_string_pretty(&pointer)?);
        }
        Commands::StubStore { dir, data, file } => {
            let payload = read_payload(data, file)?;
            let stub = StubDa::new(Arc::new(FileStore::open(dir)?));
            println!("{}", hex::encode(stub.store(&payload)?));
        }
        Commands::StubRead { dir, reference } => {
            let reference = hex::decode(reference.trim_start_matches("0x")).context("reference is not hex")?;
            let stub = StubDa::new(Arc::new(FileStore::open(dir)?));
            println!("{}", String::from_utf8_lossy(&stub.read(&reference)?));
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<DaConfig> {
    let mut config = match &cli.config {
        Some(path) => DaConfig::from_json_file(path)?,
        // Flags alone describe an enabled client.
        None => DaConfig {
            enable: true,
            ..Default::default()
        },
    };
    if let Some(rpc) = &cli.celestia_rpc {
        config.rpc = rpc.clone();
    }
    if let Some(rpc) = &cli.tendermint_rpc {
        config.tendermint_rpc = rpc.clone();
    }
    if let Some(namespace) = &cli.namespace {
        config.namespace_id = namespace.clone();
    }
    if let Some(token) = &cli.auth_token {
        config.auth_token = token.clone();
    }
    Ok(config)
}

fn read_payload(data: Option<String>, file: Option<PathBuf>) -> Result<Vec<u8>> {
    match (data, file) {
        (Some(data), None) => Ok(data.into_bytes()),
        (None, Some(path)) => std::fs::read(&path).with_context(|| format!("reading {}", path.display())),
        _ => anyhow::bail!("exactly one of --data or --file is required"),
    }
}

fn parse_pointer(hex_pointer: &str) -> Result<BlobPointer> {
    let bytes = hex::decode(hex_pointer.trim_start_matches("0x")).context("pointer is not hex")?;
    Ok(blob_pointer::deserialize(&bytes)?)
}

fn record_and_recover(square: &SquareData, store: &dyn PreimageStore, location: &Path) -> Result<()> {
    let written = record_square_preimages(square, store)?;
    let recovered = recover_rows(square, store)?;
    if recovered != square.rows {
        anyhow::bail!("rows recovered from {} differ from the square", location.display());
    }
    info!("Recorded {} preimages into {}", written, location.display());
    Ok(())
}
