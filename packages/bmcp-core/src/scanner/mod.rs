//! Finds and decodes BMCP messages in blocks and the mempool.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use bitcoin::{BlockHash, Txid};
use futures::future::join_all;
use futures::Stream;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::{
    codec::{decode, is_protocol_message},
    config::ScannerConfig,
    node::{BitcoinNode, RpcOutput, RpcTransaction},
    script::parse_op_return_script,
    types::{BlockPlacement, DetectedMessage, ScanCursor, StopHandle},
    Error,
};

use cache::RecentCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Height(u64),
    Hash(BlockHash),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Scanning(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBatch {
    pub height: u64,
    pub messages: Vec<DetectedMessage>,
}

/// Every OP_RETURN output of `tx`, in output order. Never fails.
pub fn scan_transaction(tx: &RpcTransaction) -> Vec<DetectedMessage> {
    tx.vout
        .iter()
        .filter(|output| output.is_data_carrier())
        .map(|output| detect_output(tx.txid, output))
        .collect()
}

fn detect_output(txid: Txid, output: &RpcOutput) -> DetectedMessage {
    let script = &output.script_pub_key.hex;
    let Some(payload) = parse_op_return_script(script) else {
        return DetectedMessage {
            txid,
            output_index: output.n,
            raw_bytes: script.clone(),
            is_protocol_match: false,
            decoded: None,
            decode_error: Some(Error::MalformedScript),
            block: None,
        };
    };

    let is_protocol_match = is_protocol_message(payload);
    let (decoded, decode_error) = if is_protocol_match {
        match decode(payload) {
            Ok(message) => (Some(message), None),
            Err(e) => {
                debug!("Undecodable BMCP payload in {}:{}: {}", txid, output.n, e);
                (None, Some(e))
            }
        }
    } else {
        (None, None)
    };

    DetectedMessage {
        txid,
        output_index: output.n,
        raw_bytes: payload.to_vec(),
        is_protocol_match,
        decoded,
        decode_error,
        block: None,
    }
}

pub struct Scanner {
    node: Arc<dyn BitcoinNode>,
    config: ScannerConfig,
    cache: Mutex<RecentCache>,
    state: Mutex<ScannerState>,
}

impl Scanner {
    pub fn new(node: Arc<dyn BitcoinNode>, config: ScannerConfig) -> Self {
        Self {
            node,
            cache: Mutex::new(RecentCache::new(config.cache_size)),
            config,
            state: Mutex::new(ScannerState::Idle),
        }
    }

    pub fn node(&self) -> &Arc<dyn BitcoinNode> {
        &self.node
    }

    pub fn state(&self) -> ScannerState {
        *self.state.lock()
    }

    pub async fn scan_block(&self, block: BlockRef) -> Result<Vec<DetectedMessage>, Error> {
        let result = self.scan_block_inner(block).await;
        *self.state.lock() = ScannerState::Idle;
        result
    }

    async fn scan_block_inner(&self, block: BlockRef) -> Result<Vec<DetectedMessage>, Error> {
        let hash = match block {
            BlockRef::Height(height) => {
                *self.state.lock() = ScannerState::Scanning(height);
                self.node.get_block_hash(height).await?
            }
            BlockRef::Hash(hash) => hash,
        };

        let block = self.node.get_block(&hash).await?;
        *self.state.lock() = ScannerState::Scanning(block.height);

        let placement = BlockPlacement {
            height: block.height,
            hash: block.hash,
            time: block.time,
        };
        let mut messages = Vec::new();
        for tx in &block.tx {
            let mut found = scan_transaction(tx);
            for message in &mut found {
                message.block = Some(placement);
            }
            if !found.is_empty() {
                self.remember(tx.txid, &found);
            }
            messages.extend(found);
        }

        let matches = messages.iter().filter(|m| m.is_protocol_match).count();
        if matches > 0 {
            info!("Found {} BMCP message(s) in block {}", matches, block.height);
        }
        Ok(messages)
    }

    /// Scans one transaction, served from the recent cache when possible.
    pub async fn scan_txid(&self, txid: &Txid) -> Result<Vec<DetectedMessage>, Error> {
        let cached = self.cache.lock().get(txid);
        if let Some(messages) = cached {
            return Ok(messages.as_ref().clone());
        }

        let tx = self.node.get_raw_transaction(txid).await?;
        let mut messages = scan_transaction(&tx);
        if let (Some(hash), false) = (tx.blockhash, messages.is_empty()) {
            match self.node.get_block_header(&hash).await {
                Ok(header) => {
                    let placement = BlockPlacement {
                        height: header.height,
                        hash,
                        time: tx.blocktime.or(header.time),
                    };
                    for message in &mut messages {
                        message.block = Some(placement);
                    }
                }
                Err(e) => warn!("Could not place {} in block {}: {}", txid, hash, e),
            }
        }
        self.remember(*txid, &messages);
        Ok(messages)
    }

    /// Every height from `start` to `end` inclusive, in order, one batch per height.
    pub async fn scan_block_range(&self, start: u64, end: u64) -> Result<Vec<BlockBatch>, Error> {
        if start > end {
            return Err(Error::Config(format!("Invalid block range: {} > {}", start, end)));
        }

        let mut batches = Vec::new();
        for height in start..=end {
            let messages = self.scan_block(BlockRef::Height(height)).await?;
            debug!("Scanned block {} ({}/{})", height, height - start + 1, end - start + 1);
            batches.push(BlockBatch { height, messages });
        }
        Ok(batches)
    }

    /// Decoded messages from the newest `blocks` blocks, newest first, at most `limit` of them.
    ///
    /// Blocks that fail to load are skipped.
    pub async fn latest_messages(&self, blocks: u64, limit: usize) -> Result<Vec<DetectedMessage>, Error> {
        if blocks == 0 || limit == 0 {
            return Ok(Vec::new());
        }

        let tip = self.node.get_block_count().await?;
        let start = tip.saturating_sub(blocks - 1).max(1);
        info!("Scanning latest blocks {}..={}", start, tip);

        let mut found = Vec::new();
        for height in (start..=tip).rev() {
            match self.scan_block(BlockRef::Height(height)).await {
                Ok(messages) => found.extend(messages.into_iter().filter(|m| m.message().is_some())),
                Err(e) => warn!("Skipping block {}: {}", height, e),
            }
            if found.len() >= limit {
                found.truncate(limit);
                break;
            }
        }
        Ok(found)
    }

    /// Protocol matches in the mempool, at most `limit` of them.
    pub async fn scan_mempool(&self, limit: usize) -> Result<Vec<DetectedMessage>, Error> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let txids = self.node.get_raw_mempool().await?;
        let scanned = txids.len().min(self.config.mempool_scan_limit);
        debug!("Scanning {} of {} mempool transactions", scanned, txids.len());

        let batch_delay = Duration::from_millis(self.config.batch_delay_ms);
        let mut found = Vec::new();
        for (i, batch) in txids[..scanned].chunks(self.config.batch_size.max(1)).enumerate() {
            if i > 0 && !batch_delay.is_zero() {
                sleep(batch_delay).await;
            }

            let results = join_all(batch.iter().map(|txid| self.scan_txid(txid))).await;
            for (txid, result) in batch.iter().zip(results) {
                match result {
                    Ok(messages) => found.extend(messages.into_iter().filter(|m| m.is_protocol_match)),
                    Err(e) => warn!("Skipping mempool transaction {}: {}", txid, e),
                }
            }

            if found.len() >= limit {
                found.truncate(limit);
                break;
            }
        }

        Ok(found)
    }

    /// Follows the chain from `cursor`, one block at a time.
    pub fn monitor(&self, cursor: ScanCursor, poll_interval: Duration, stop: StopHandle) -> BlockMonitor<'_> {
        BlockMonitor {
            scanner: self,
            cursor,
            pending: None,
            known_tip: None,
            poll_interval,
            stop,
        }
    }

    fn remember(&self, txid: Txid, messages: &[DetectedMessage]) {
        self.cache.lock().insert(txid, Arc::new(messages.to_vec()));
    }
}

/// Pull-based block follower.
///
/// A height handed out by [`BlockMonitor::next_batch`] is only committed to the cursor when the
/// next batch is requested, so a consumer that stops mid-batch resumes at that same height.
pub struct BlockMonitor<'a> {
    scanner: &'a Scanner,
    cursor: ScanCursor,
    pending: Option<u64>,
    known_tip: Option<u64>,
    poll_interval: Duration,
    stop: StopHandle,
}

impl<'a> BlockMonitor<'a> {
    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    /// Next scanned height. Waits for new blocks and rides out node errors; `None` only once
    /// stopped.
    pub async fn next_batch(&mut self) -> Option<BlockBatch> {
        if let Some(height) = self.pending.take() {
            self.cursor.advance(height);
        }

        loop {
            if self.stop.is_stopped() {
                info!("Block monitor stopped at height {}", self.cursor.last_processed_height);
                return None;
            }

            let height = self.cursor.next_height();
            if self.known_tip.map_or(true, |tip| height > tip) {
                match self.scanner.node.get_block_count().await {
                    Ok(tip) => self.known_tip = Some(tip),
                    Err(e) => {
                        warn!("Failed to fetch chain tip: {}, retrying in {:?}", e, self.poll_interval);
                        sleep(self.poll_interval).await;
                        continue;
                    }
                }
            }

            if self.known_tip.map_or(true, |tip| height > tip) {
                sleep(self.poll_interval).await;
                continue;
            }

            match self.scanner.scan_block(BlockRef::Height(height)).await {
                Ok(messages) => {
                    self.pending = Some(height);
                    return Some(BlockBatch { height, messages });
                }
                Err(e) => {
                    warn!("Failed to scan block {}: {}, retrying in {:?}", height, e, self.poll_interval);
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = BlockBatch> + 'a {
        futures::stream::unfold(self, |mut monitor| async move {
            monitor.next_batch().await.map(|batch| (batch, monitor))
        })
    }
}
