use clap::{Parser, Subcommand};
use eyre::Result;
use std::{path::PathBuf, sync::Arc};
use ton_watcher::{
    chain::ShardDecoder, config, filter::AddressFilter,
    tracking::TrackingService, utils::AccountAddress,
};

#[derive(Parser)]
#[command(
    name = "dev-tools",
    about = "Dev utilities: migrate, manage tracked addresses, decode shards"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate {},
    /// Start tracking an address (raw or user-friendly form)
    Add { address: String },
    /// Stop tracking an address
    Disable { address: String },
    /// Decode a saved getAllShardsInfo payload and print its shards
    DecodeShards {
        /// File with the raw bag-of-cells bytes
        file: PathBuf,
        /// Dictionary key width in bits
        #[arg(long, default_value_t = 32)]
        key_bits: usize,
        #[arg(long, default_value_t = 0)]
        workchain: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    ton_watcher::logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {} => migrate().await,
        Commands::Add { address } => add(&address).await,
        Commands::Disable { address } => disable(&address).await,
        Commands::DecodeShards {
            file,
            key_bits,
            workchain,
        } => decode_shards(file, key_bits, workchain),
    }
}

async fn migrate() -> Result<()> {
    let cfg = config::init_from_env()?;
    // connecting applies the embedded migrations
    ton_watcher::tools::connect_store(cfg).await?;
    tracing::info!("migrations applied");
    Ok(())
}

async fn tracking() -> Result<TrackingService> {
    let cfg = config::init_from_env()?;
    let store = ton_watcher::tools::connect_store(cfg).await?;
    // the running service keeps its own filter; this one is never read
    let filter = Arc::new(AddressFilter::new(1, 0.5));
    Ok(TrackingService::new(store, filter))
}

async fn add(address: &str) -> Result<()> {
    let address: AccountAddress = address.parse()?;
    let record = tracking().await?.add(&address).await?;
    println!("tracking {} (id {})", record.address(), record.id);
    Ok(())
}

async fn disable(address: &str) -> Result<()> {
    let address: AccountAddress = address.parse()?;
    if tracking().await?.disable(&address).await? {
        println!("disabled {address}");
    } else {
        println!("{address} was not actively tracked");
    }
    Ok(())
}

fn decode_shards(file: PathBuf, key_bits: usize, workchain: i32) -> Result<()> {
    let bytes = std::fs::read(&file)?;
    let shards = ShardDecoder::new(key_bits, workchain).decode(&bytes)?;
    for d in &shards {
        println!(
            "{}:{:016x} seqno={} root_hash={} file_hash={}",
            d.workchain,
            d.shard as u64,
            d.seqno,
            hex::encode(d.root_hash),
            hex::encode(d.file_hash)
        );
    }
    println!("{} shard(s)", shards.len());
    Ok(())
}
