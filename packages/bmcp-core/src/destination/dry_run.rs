use async_trait::async_trait;
use log::info;

use super::{Destination, ForwardRequest};
use crate::{codec::function, registry::ChainDescriptor, Error};

/// Logs what would be executed and forwards nothing.
pub struct DryRunDestination;

#[async_trait]
impl Destination for DryRunDestination {
    fn kind(&self) -> &'static str {
        "dry_run"
    }

    async fn forward(&self, chain: &ChainDescriptor, request: &ForwardRequest) -> Result<String, Error> {
        info!(
            "[dry-run] {}:{} -> {} 0x{} {} ({} bytes, nonce {:?}, deadline {:?})",
            request.source_txid,
            request.output_index,
            chain.name,
            hex::encode(request.target_contract),
            function::identify(&request.calldata).signature(),
            request.calldata.len(),
            request.nonce,
            request.deadline,
        );
        Ok(format!("dry-run:{}:{}", request.source_txid, request.output_index))
    }
}
