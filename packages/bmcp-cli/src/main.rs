use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bitcoin::{BlockHash, Txid};
use bmcp_core::{
    codec::{self, function, json::JsonMessage, EncodeOptions},
    fee,
    node::BitcoinRpcClient,
    relayer::Relayer,
    scanner::{BlockRef, Scanner},
    script, BmcpMessage, ChainRegistry, Config, DetectedMessage, ScanCursor, StopHandle,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and summarize a configuration file
    ValidateConfig {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Run the relayer service
    Start {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Scan one block for BMCP messages
    ScanBlock {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(long, conflicts_with = "hash", required_unless_present = "hash")]
        height: Option<u64>,
        #[arg(long)]
        hash: Option<BlockHash>,
    },
    /// Scan every block in an inclusive height range
    ScanRange {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
    },
    /// Show the newest BMCP messages from the last few blocks
    Latest {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(long, default_value_t = 5)]
        blocks: u64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Scan one transaction for BMCP messages
    ScanTx {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        txid: Txid,
    },
    /// Look for BMCP messages in the mempool
    Mempool {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Follow new blocks and print BMCP messages until Ctrl-C
    Monitor {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// First height to scan; defaults to the next block
        #[arg(long)]
        from: Option<u64>,
    },
    /// Decode a hex (or, with --json, JSON) payload
    Decode {
        payload: String,
        #[arg(long)]
        json: bool,
    },
    /// Build a BMCP payload and its OP_RETURN script
    Encode {
        /// Destination chain name, e.g. SEPOLIA
        #[arg(long)]
        chain: String,
        #[arg(long)]
        contract: String,
        /// Raw calldata as hex
        #[arg(long, conflicts_with = "message", required_unless_present = "message")]
        calldata: Option<String>,
        /// Build onReport(string) calldata from this text
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        nonce: Option<u32>,
        /// Unix seconds
        #[arg(long)]
        deadline: Option<u32>,
        /// Emit the JSON form instead of binary
        #[arg(long)]
        json: bool,
        /// Chains added to the built-in table
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Estimate size and fee of a funding transaction carrying a payload
    Estimate {
        #[arg(long)]
        payload_len: u64,
        #[arg(long, default_value_t = 1)]
        inputs: u64,
        #[arg(long, default_value_t = 1)]
        outputs: u64,
        /// sat/vB
        #[arg(long, default_value_t = 1.0)]
        fee_rate: f64,
        /// Total of the funding UTXOs in sats, to check the change
        #[arg(long)]
        utxo_total: Option<u64>,
    },
    /// List known destination chains
    Chains {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectedView {
    txid: String,
    output_index: u32,
    is_protocol_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<JsonMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DetectedView {
    fn new(found: &DetectedMessage, registry: &ChainRegistry) -> Self {
        let decoded = found.message();
        Self {
            txid: found.txid.to_string(),
            output_index: found.output_index,
            is_protocol_match: found.is_protocol_match,
            block_height: found.block.map(|b| b.height),
            block_hash: found.block.map(|b| b.hash.to_string()),
            block_time: found.block.and_then(|b| b.time),
            chain: decoded.map(|m| chain_name(registry, m)),
            function: decoded.map(|m| function::identify(&m.calldata).signature()),
            message: decoded.map(JsonMessage::from),
            error: found.decode_error.as_ref().map(|e| e.to_string()),
        }
    }
}

fn chain_name(registry: &ChainRegistry, message: &BmcpMessage) -> String {
    registry
        .resolve_by_selector(message.chain_selector)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| format!("unknown (0x{:016x})", message.chain_selector))
}

fn print_detected(found: &[DetectedMessage], registry: &ChainRegistry, protocol_only: bool) -> Result<()> {
    let views: Vec<DetectedView> = found
        .iter()
        .filter(|m| !protocol_only || m.is_protocol_match)
        .map(|m| DetectedView::new(m, registry))
        .collect();
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}

fn load_registry(config: Option<PathBuf>) -> Result<ChainRegistry> {
    match config {
        Some(path) => Ok(Config::load(path)?.registry()?),
        None => Ok(ChainRegistry::builtin()),
    }
}

fn scanner_for(config: &Config) -> Scanner {
    let node = Arc::new(BitcoinRpcClient::from_config(&config.bitcoin));
    Scanner::new(node, config.scanner.clone())
}

fn stop_on_ctrl_c(stop: StopHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                stop.stop();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating config file: {:?}", config);
            let config = Config::load(config)?;
            let registry = config.registry()?;
            println!("Config file is valid");
            println!("- Bitcoin RPC: {}", config.bitcoin.rpc_url);
            println!("- Chains ({} known, {} configured):", registry.len(), config.chains.len());
            for chain in &config.chains {
                println!("  - {} (0x{:016x}): {}", chain.name, chain.chain_selector, chain.rpc_url);
            }
            println!("- Relayer:");
            println!("  - Poll interval: {}s", config.relayer.poll_interval);
            println!("  - Confirmations: {}", config.relayer.confirmation_blocks);
            println!("  - Max retries: {}", config.relayer.max_retries);
            println!("  - Retry delay: {}s", config.relayer.retry_delay);
            println!("- Destination: {}", config.destination.adapter_type);
            Ok(())
        }
        Commands::Start { config } => {
            info!("Starting relayer with config file: {:?}", config);
            let config = Config::load(config)?;

            let mut relayer = Relayer::from_config(&config)?;
            stop_on_ctrl_c(relayer.stop_handle());
            info!("Relayer initialized, running...");

            if let Err(e) = relayer.start().await {
                error!("Relayer exited with error: {}", e);
                return Err(e.into());
            }
            Ok(())
        }
        Commands::ScanBlock { config, height, hash } => {
            let config = Config::load(config)?;
            let block = match (height, hash) {
                (Some(height), _) => BlockRef::Height(height),
                (None, Some(hash)) => BlockRef::Hash(hash),
                (None, None) => bail!("Either --height or --hash is required"),
            };
            let found = scanner_for(&config).scan_block(block).await?;
            print_detected(&found, &config.registry()?, false)
        }
        Commands::ScanRange { config, start, end } => {
            let config = Config::load(config)?;
            let registry = config.registry()?;
            let batches = scanner_for(&config).scan_block_range(start, end).await?;
            let found: Vec<DetectedMessage> = batches.into_iter().flat_map(|b| b.messages).collect();
            info!(
                "Scanned {} block(s), {} BMCP message(s)",
                end - start + 1,
                found.iter().filter(|m| m.is_protocol_match).count()
            );
            print_detected(&found, &registry, true)
        }
        Commands::Latest { config, blocks, limit } => {
            let config = Config::load(config)?;
            let found = scanner_for(&config).latest_messages(blocks, limit).await?;
            print_detected(&found, &config.registry()?, true)
        }
        Commands::ScanTx { config, txid } => {
            let config = Config::load(config)?;
            let found = scanner_for(&config).scan_txid(&txid).await?;
            print_detected(&found, &config.registry()?, false)
        }
        Commands::Mempool { config, limit } => {
            let config = Config::load(config)?;
            let found = scanner_for(&config).scan_mempool(limit).await?;
            info!("Found {} BMCP message(s) in the mempool", found.len());
            print_detected(&found, &config.registry()?, true)
        }
        Commands::Monitor { config, from } => {
            let config = Config::load(config)?;
            let registry = config.registry()?;
            let scanner = scanner_for(&config);

            let cursor = match from {
                Some(height) => ScanCursor::starting_at(height),
                None => ScanCursor::new(scanner.node().get_block_count().await?),
            };
            let stop = StopHandle::new();
            stop_on_ctrl_c(stop.clone());

            info!("Monitoring from height {}", cursor.next_height());
            let mut monitor = scanner.monitor(cursor, Duration::from_secs(config.relayer.poll_interval), stop);
            while let Some(batch) = monitor.next_batch().await {
                let matches: Vec<DetectedMessage> =
                    batch.messages.into_iter().filter(|m| m.is_protocol_match).collect();
                info!("Block {}: {} BMCP message(s)", batch.height, matches.len());
                if !matches.is_empty() {
                    print_detected(&matches, &registry, true)?;
                }
            }
            info!("Stopped after height {}", monitor.cursor().last_processed_height);
            Ok(())
        }
        Commands::Decode { payload, json } => {
            let message = if json {
                codec::decode_json(&payload)?
            } else {
                codec::decode_hex(&payload)?
            };
            let registry = ChainRegistry::builtin();
            println!("Chain: {}", chain_name(&registry, &message));
            println!("Function: {}", function::identify(&message.calldata).signature());
            if let Some(text) = function::decode_on_report(&message.calldata) {
                println!("Report: {}", text);
            }
            println!("{}", serde_json::to_string_pretty(&JsonMessage::from(&message))?);
            Ok(())
        }
        Commands::Encode {
            chain,
            contract,
            calldata,
            message,
            nonce,
            deadline,
            json,
            config,
        } => {
            let registry = load_registry(config)?;
            let descriptor = registry
                .resolve_by_name(&chain)
                .with_context(|| format!("Unknown chain: {}", chain))?;
            let target = codec::parse_address(&contract)?;
            let calldata = match (calldata, message) {
                (Some(raw), _) => hex::decode(raw.trim_start_matches("0x")).context("Invalid calldata hex")?,
                (None, Some(text)) => function::on_report(&text),
                (None, None) => bail!("Either --calldata or --message is required"),
            };
            let opts = EncodeOptions { nonce, deadline };

            if json {
                println!("{}", codec::encode_json(descriptor.chain_selector, &target, &calldata, &opts)?);
                return Ok(());
            }

            let payload = codec::encode_for_chain(&registry, &chain, &target, &calldata, &opts)?;
            let script = script::build_op_return_script(&payload)?;
            let vsize = fee::estimate_virtual_size(1, 1, payload.len() as u64)?;
            println!("Chain: {} (0x{:016x})", descriptor.name, descriptor.chain_selector);
            println!("Payload ({} bytes): {}", payload.len(), hex::encode(&payload));
            println!("OP_RETURN script: {}", hex::encode(script.as_bytes()));
            println!("Estimated vsize (1 in, 1 out): {} vB", vsize);
            Ok(())
        }
        Commands::Estimate {
            payload_len,
            inputs,
            outputs,
            fee_rate,
            utxo_total,
        } => {
            let vsize = fee::estimate_virtual_size(inputs, outputs, payload_len)?;
            println!("Virtual size: {} vB", vsize);
            println!("Fee at {} sat/vB: {} sat", fee_rate, fee::estimate_fee(vsize, fee_rate));
            if let Some(total) = utxo_total {
                let plan = fee::plan_funding(total, fee_rate, vsize)?;
                println!("Change: {} sat", plan.change_amount);
            }
            Ok(())
        }
        Commands::Chains { config } => {
            let registry = load_registry(config)?;
            for chain in registry.iter() {
                println!(
                    "{:<14} selector {:>20} (0x{:016x})  chain id {:<10} {}",
                    chain.name, chain.chain_selector, chain.chain_selector, chain.numeric_chain_id, chain.rpc_url
                );
            }
            Ok(())
        }
    }
}
