//! Ledger context operator CLI
//!
//! Small inspection tool over the engine: fetch and describe an account,
//! print the latest blockhash or epoch, and decode a landed transaction.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_context_engine::{
    config::EngineConfig,
    context::{AccountContext, MetadataContext, RawCodec},
    executor::TransactionExecutor,
    graph::{render_tree, GraphNode, RenderOptions},
    runtime::RuntimeAccess,
    structured_logging::init_tracing,
    tx_builder::BlueprintConfig,
};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Override the RPC endpoint
    #[arg(long)]
    rpc_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch an account and print its context tree
    Account {
        address: String,
        /// Skip every cache
        #[arg(long)]
        fresh: bool,
    },
    /// Fetch off-chain metadata for an address
    Metadata { address: String },
    /// Print the latest blockhash and its expiry height
    Blockhash,
    /// Print the current epoch
    Epoch,
    /// Fetch a landed transaction and decode it
    Parse {
        signature: String,
        /// Program whose events are decoded
        #[arg(long)]
        program: Option<String>,
    },
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file_with_env(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => {
            dotenvy::dotenv().ok();
            let mut config = EngineConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(url) = &args.rpc_url {
        config.rpc.url = url.clone();
    }
    if args.verbose {
        config.logging.level = "ledger_context_engine=debug,info".to_string();
    }
    config.validate()?;
    Ok(config)
}

fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("Invalid address: {value}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging)?;

    info!(rpc = %config.rpc.url, "Starting ledger context CLI");
    let runtime = RuntimeAccess::from_config(&config).context("Failed to build runtime")?;

    match &args.command {
        Command::Account { address, fresh } => {
            let address = parse_pubkey(address)?;
            let ctx = AccountContext::new(runtime.clone(), "account", address, RawCodec);
            match ctx.resolve_account(*fresh).await? {
                Some(account) => debug!(bytes = account.data.len(), "account fetched"),
                None => info!(%address, "No account at this address"),
            }
            let root: Arc<dyn GraphNode> = ctx;
            print!("{}", render_tree(&root, &RenderOptions::default()));
        }
        Command::Metadata { address } => {
            let address = parse_pubkey(address)?;
            let ctx = MetadataContext::new(runtime.clone(), "metadata", address);
            match ctx.resolve(false).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no metadata for {address}"),
            }
        }
        Command::Blockhash => {
            let latest = runtime.fetch_latest_blockhash().await?;
            println!(
                "{} (valid until block height {})",
                latest.blockhash, latest.last_valid_block_height
            );
        }
        Command::Epoch => {
            let epoch = runtime.fetch_epoch_info().await?;
            println!(
                "epoch {} slot {} ({}/{})",
                epoch.epoch, epoch.absolute_slot, epoch.slot_index, epoch.slots_in_epoch
            );
        }
        Command::Parse { signature, program } => {
            let signature = Signature::from_str(signature)
                .with_context(|| format!("Invalid signature: {signature}"))?;
            let mut executor = TransactionExecutor::<()>::new(runtime.clone(), BlueprintConfig {
                label: "parse".to_string(),
                ..Default::default()
            });
            if let Some(program) = program {
                executor = executor.program(parse_pubkey(program)?);
            }
            let result = executor.parse(&signature).await?;
            println!(
                "slot {} succeeded={} fee={} compute={:?}",
                result.slot,
                result.succeeded,
                result.fee(),
                result.compute_units_consumed()
            );
            for line in result.logs() {
                println!("  {line}");
            }
            for (name, events) in &result.events.named {
                println!("event {name}: {}", serde_json::to_string(events)?);
            }
            if !result.unknown_events().is_empty() {
                println!("{} unknown event payload(s)", result.unknown_events().len());
            }
        }
    }

    Ok(())
}
