use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};
use parking_lot::Mutex;

use crate::codec::{encode_binary, EncodeOptions};
use crate::node::{BitcoinNode, RpcBlock, RpcBlockHeader, RpcOutput, RpcScriptPubKey, RpcTransaction, ScriptType};
use crate::script::build_op_return_script;
use crate::Error;

pub const SEPOLIA: u64 = 16015286601757825753;
pub const TARGET: [u8; 20] = [0x2b; 20];

pub fn block_time(height: u64) -> u64 {
    1_700_000_000 + height * 600
}

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub fn block_hash(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

pub fn data_output(n: u32, payload: &[u8]) -> RpcOutput {
    RpcOutput {
        value: 0.0,
        n,
        script_pub_key: RpcScriptPubKey {
            hex: build_op_return_script(payload).unwrap().into_bytes(),
            kind: ScriptType::Nulldata,
        },
    }
}

pub fn payment_output(n: u32) -> RpcOutput {
    let mut hex = vec![0x00, 0x14];
    hex.extend_from_slice(&[0xab; 20]);
    RpcOutput {
        value: 0.0001,
        n,
        script_pub_key: RpcScriptPubKey {
            hex,
            kind: ScriptType::Other,
        },
    }
}

pub fn transaction(id: u8, vout: Vec<RpcOutput>) -> RpcTransaction {
    RpcTransaction {
        txid: txid(id),
        vout,
        blockhash: None,
        blocktime: None,
        confirmations: None,
    }
}

pub fn payload(calldata: &[u8], opts: EncodeOptions) -> Vec<u8> {
    encode_binary(SEPOLIA, &TARGET, calldata, &opts).unwrap()
}

#[derive(Default)]
struct FakeState {
    tip: u64,
    blocks: HashMap<u64, Vec<RpcTransaction>>,
    mempool: Vec<Txid>,
    transactions: HashMap<Txid, RpcTransaction>,
    failing_heights: HashSet<u64>,
    failing_txids: HashSet<Txid>,
    fail_tip: bool,
    block_requests: Vec<u64>,
    tx_requests: usize,
}

/// In-memory node. Heights without a configured block are empty.
#[derive(Default)]
pub struct FakeNode {
    state: Mutex<FakeState>,
}

impl FakeNode {
    pub fn new(tip: u64) -> Self {
        let node = Self::default();
        node.state.lock().tip = tip;
        node
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().tip = tip;
    }

    pub fn add_block(&self, height: u64, txs: Vec<RpcTransaction>) {
        let mut state = self.state.lock();
        for tx in &txs {
            let confirmed = RpcTransaction {
                blockhash: Some(block_hash(height)),
                blocktime: Some(block_time(height)),
                ..tx.clone()
            };
            state.transactions.insert(tx.txid, confirmed);
        }
        state.blocks.insert(height, txs);
    }

    pub fn add_mempool_tx(&self, tx: RpcTransaction) {
        let mut state = self.state.lock();
        state.mempool.push(tx.txid);
        state.transactions.insert(tx.txid, tx);
    }

    /// Listed in the mempool but not fetchable.
    pub fn add_missing_mempool_tx(&self, txid: Txid) {
        let mut state = self.state.lock();
        state.mempool.push(txid);
        state.failing_txids.insert(txid);
    }

    pub fn fail_height(&self, height: u64, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_heights.insert(height);
        } else {
            state.failing_heights.remove(&height);
        }
    }

    pub fn fail_tip(&self, fail: bool) {
        self.state.lock().fail_tip = fail;
    }

    /// Heights whose blocks were fetched, in request order.
    pub fn block_requests(&self) -> Vec<u64> {
        self.state.lock().block_requests.clone()
    }

    pub fn tx_requests(&self) -> usize {
        self.state.lock().tx_requests
    }

    fn height_of(hash: &BlockHash) -> u64 {
        let bytes = hash.to_byte_array();
        let mut height = [0u8; 8];
        height.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(height)
    }
}

#[async_trait]
impl BitcoinNode for FakeNode {
    async fn get_block_count(&self) -> Result<u64, Error> {
        let state = self.state.lock();
        if state.fail_tip {
            return Err(Error::Transport("getblockcount unavailable".to_string()));
        }
        Ok(state.tip)
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error> {
        let state = self.state.lock();
        if height > state.tip {
            return Err(Error::Transport(format!("Block height out of range: {}", height)));
        }
        Ok(block_hash(height))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, Error> {
        let height = Self::height_of(hash);
        let mut state = self.state.lock();
        state.block_requests.push(height);
        if state.failing_heights.contains(&height) {
            return Err(Error::Transport(format!("getblock {} failed", height)));
        }
        Ok(RpcBlock {
            hash: *hash,
            height,
            time: Some(block_time(height)),
            tx: state.blocks.get(&height).cloned().unwrap_or_default(),
        })
    }

    async fn get_block_header(&self, hash: &BlockHash) -> Result<RpcBlockHeader, Error> {
        let height = Self::height_of(hash);
        if self.state.lock().failing_heights.contains(&height) {
            return Err(Error::Transport(format!("getblockheader {} failed", height)));
        }
        Ok(RpcBlockHeader {
            hash: *hash,
            height,
            time: Some(block_time(height)),
        })
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RpcTransaction, Error> {
        let mut state = self.state.lock();
        state.tx_requests += 1;
        if state.failing_txids.contains(txid) {
            return Err(Error::Transport(format!("No such mempool transaction: {}", txid)));
        }
        state
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("No such transaction: {}", txid)))
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>, Error> {
        Ok(self.state.lock().mempool.clone())
    }
}
