use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitcoin::{BlockHash, Txid};
use serde::Serialize;

use crate::{codec::BmcpMessage, Error};

/// One OP_RETURN output examined by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedMessage {
    pub txid: Txid,
    pub output_index: u32,
    pub raw_bytes: Vec<u8>,
    pub is_protocol_match: bool,
    pub decoded: Option<BmcpMessage>,
    pub decode_error: Option<Error>,
    /// Where the transaction was mined; `None` for mempool transactions.
    pub block: Option<BlockPlacement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockPlacement {
    pub height: u64,
    pub hash: BlockHash,
    pub time: Option<u64>,
}

impl DetectedMessage {
    /// A protocol match that decoded cleanly.
    pub fn message(&self) -> Option<&BmcpMessage> {
        if self.is_protocol_match {
            self.decoded.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanCursor {
    pub last_processed_height: u64,
}

impl ScanCursor {
    /// Cursor that will scan `start_height` next.
    pub fn starting_at(start_height: u64) -> Self {
        Self {
            last_processed_height: start_height.saturating_sub(1),
        }
    }

    pub fn new(last_processed_height: u64) -> Self {
        Self { last_processed_height }
    }

    pub fn next_height(&self) -> u64 {
        self.last_processed_height + 1
    }

    /// Never moves backwards.
    pub fn advance(&mut self, height: u64) {
        if height > self.last_processed_height {
            self.last_processed_height = height;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub source_txid: Txid,
    pub output_index: u32,
    pub chain_selector: u64,
    pub forwarded: bool,
    pub destination_ref: Option<String>,
    pub error: Option<Error>,
}

/// Cooperative cancellation flag shared between a signal handler and the loops.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
