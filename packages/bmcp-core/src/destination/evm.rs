use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{Destination, ForwardRequest};
use crate::{codec::parse_address, registry::ChainDescriptor, Error};

/// Sends `eth_sendTransaction` from an account unlocked on the destination node.
///
/// Each `forward` makes exactly one request. Retrying is left to the caller.
pub struct EvmRpcDestination {
    client: reqwest::Client,
    from: String,
    gas_limit: Option<u64>,
}

impl EvmRpcDestination {
    pub fn new(from: &str, gas_limit: Option<u64>) -> Result<Self, Error> {
        let from = parse_address(from).map_err(|_| Error::Config(format!("Invalid sender address: {}", from)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            from: format!("0x{}", hex::encode(from)),
            gas_limit,
        })
    }

    fn transaction(&self, request: &ForwardRequest) -> Value {
        let mut tx = json!({
            "from": self.from,
            "to": format!("0x{}", hex::encode(request.target_contract)),
            "data": format!("0x{}", hex::encode(&request.calldata)),
        });
        if let Some(gas) = self.gas_limit {
            tx["gas"] = json!(format!("0x{:x}", gas));
        }
        tx
    }

    async fn send_transaction(&self, rpc_url: &str, tx: &Value) -> Result<String, Error> {
        let response = self
            .client
            .post(rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": "eth_sendTransaction",
                "params": [tx],
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(rpc_url.to_string()));
        }

        let result: Value = response.json().await.map_err(|e| Error::Transport(e.to_string()))?;

        if let Some(error) = result.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Rejected(error.to_string()));
        }

        result
            .get("result")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Transport(format!("Missing transaction hash in response: {}", result)))
    }
}

#[async_trait]
impl Destination for EvmRpcDestination {
    fn kind(&self) -> &'static str {
        "evm_rpc"
    }

    async fn forward(&self, chain: &ChainDescriptor, request: &ForwardRequest) -> Result<String, Error> {
        let tx = self.transaction(request);
        debug!("eth_sendTransaction on {} ({}): {}", chain.name, chain.rpc_url, tx);
        self.send_transaction(&chain.rpc_url, &tx).await
    }
}
