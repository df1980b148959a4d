//! Bitcoin node collaborator.
//!
//! The scanner only talks to a node through [`BitcoinNode`]. RPC results are decoded into the
//! typed structs below at the boundary, so a missing field or a wrong type surfaces as a
//! transport error instead of propagating deeper.

pub mod rpc;

use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, Txid};
use serde::{Deserialize, Serialize};

use crate::{script::OP_RETURN, Error};

pub use rpc::{BitcoinRpcClient, RetryPolicy};

#[async_trait]
pub trait BitcoinNode: Send + Sync {
    async fn get_block_count(&self) -> Result<u64, Error>;

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error>;

    /// Block with full transaction objects (`getblock` verbosity 2).
    async fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, Error>;

    async fn get_block_header(&self, hash: &BlockHash) -> Result<RpcBlockHeader, Error>;

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RpcTransaction, Error>;

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>, Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcBlock {
    pub hash: BlockHash,
    pub height: u64,
    #[serde(default)]
    pub time: Option<u64>,
    pub tx: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcBlockHeader {
    pub hash: BlockHash,
    pub height: u64,
    #[serde(default)]
    pub time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcTransaction {
    pub txid: Txid,
    pub vout: Vec<RpcOutput>,
    /// Set once confirmed.
    #[serde(default)]
    pub blockhash: Option<BlockHash>,
    #[serde(default)]
    pub blocktime: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcOutput {
    /// BTC, as the node reports it.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

impl RpcOutput {
    pub fn amount(&self) -> Option<Amount> {
        Amount::from_btc(self.value).ok()
    }

    /// OP_RETURN outputs, by node type tag or by leading opcode.
    pub fn is_data_carrier(&self) -> bool {
        self.script_pub_key.kind == ScriptType::Nulldata
            || self.script_pub_key.hex.first() == Some(&OP_RETURN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcScriptPubKey {
    #[serde(with = "hex::serde")]
    pub hex: Vec<u8>,
    #[serde(rename = "type", default)]
    pub kind: ScriptType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Nulldata,
    #[default]
    #[serde(other)]
    Other,
}
