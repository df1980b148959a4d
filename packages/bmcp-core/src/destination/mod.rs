//! Destination-chain collaborators that execute relayed messages.

pub mod dry_run;
pub mod evm;

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;

use crate::{
    codec::BmcpMessage,
    config::{DestinationConfig, ADAPTER_DRY_RUN, ADAPTER_EVM_RPC},
    registry::ChainDescriptor,
    Error,
};

pub use dry_run::DryRunDestination;
pub use evm::EvmRpcDestination;

/// What a destination needs to execute one message, plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub chain_selector: u64,
    pub target_contract: [u8; 20],
    pub calldata: Vec<u8>,
    pub nonce: Option<u32>,
    pub deadline: Option<u32>,
    pub source_txid: Txid,
    pub output_index: u32,
}

impl ForwardRequest {
    pub fn new(message: &BmcpMessage, source_txid: Txid, output_index: u32) -> Self {
        Self {
            chain_selector: message.chain_selector,
            target_contract: message.target_contract,
            calldata: message.calldata.clone(),
            nonce: message.nonce,
            deadline: message.deadline,
            source_txid,
            output_index,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Destination: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Submits the call and returns a destination-side reference, such as a transaction hash.
    async fn forward(&self, chain: &ChainDescriptor, request: &ForwardRequest) -> Result<String, Error>;
}

pub trait DestinationFactory {
    fn create_destination(&self, config: &DestinationConfig) -> Result<Arc<dyn Destination>, Error>;
}

/// Picks a destination by `adapter_type`.
pub struct DefaultDestinationFactory;

impl DestinationFactory for DefaultDestinationFactory {
    fn create_destination(&self, config: &DestinationConfig) -> Result<Arc<dyn Destination>, Error> {
        match config.adapter_type.as_str() {
            ADAPTER_EVM_RPC => {
                let from = config
                    .from_address
                    .as_deref()
                    .ok_or_else(|| Error::Config("evm_rpc destination requires from_address".to_string()))?;
                Ok(Arc::new(EvmRpcDestination::new(from, config.gas_limit)?))
            }
            ADAPTER_DRY_RUN => Ok(Arc::new(DryRunDestination)),
            other => Err(Error::Config(format!("Unsupported adapter type: {}", other))),
        }
    }
}
