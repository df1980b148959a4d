use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time::sleep;

use super::{BitcoinNode, RpcBlock, RpcBlockHeader, RpcTransaction};
use crate::{config::BitcoinConfig, Error};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// JSON-RPC client for bitcoind and compatible hosted gateways.
pub struct BitcoinRpcClient {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, Option<String>)>,
    api_key: Option<String>,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl BitcoinRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            auth: None,
            api_key: None,
            retry: RetryPolicy::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &BitcoinConfig) -> Self {
        let mut client = Self::new(config.rpc_url.clone()).with_retry_policy(RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
        });
        if let Some(user) = &config.rpc_user {
            client = client.with_auth(user.clone(), config.rpc_password.clone());
        }
        if let Some(key) = &config.api_key {
            client = client.with_api_key(key.clone());
        }
        client
    }

    pub fn with_auth(mut self, user: String, password: Option<String>) -> Self {
        self.auth = Some((user, password));
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Calls `method`, backing off exponentially while the endpoint rate limits us.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let mut retries = 0;
        loop {
            match self.call_once(method, &params).await {
                Err(Error::RateLimited(reason)) if retries < self.retry.max_retries => {
                    retries += 1;
                    let delay = self.retry.base_delay.saturating_mul(1 << (retries - 1).min(16));
                    warn!(
                        "Rate limited on {} ({}), retry {}/{} in {:?}",
                        method, reason, retries, self.retry.max_retries, delay
                    );
                    sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn call_once<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("RPC {} #{}", method, id);

        let mut request = self.client.post(&self.url).json(&json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        }));
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, password.as_deref());
        }
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", method, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("{} returned {}", method, status)));
        }

        // bitcoind reports RPC errors with a 500 status and a JSON body
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("{} returned {}: {}", method, status, e)))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(Error::Transport(format!("{} failed: {}", method, error)));
        }

        let result = body
            .get("result")
            .filter(|r| !r.is_null())
            .cloned()
            .ok_or_else(|| Error::Transport(format!("{} returned no result", method)))?;

        serde_json::from_value(result)
            .map_err(|e| Error::Transport(format!("{} returned malformed result: {}", method, e)))
    }
}

#[async_trait]
impl BitcoinNode for BitcoinRpcClient {
    async fn get_block_count(&self) -> Result<u64, Error> {
        self.call("getblockcount", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, Error> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<RpcBlock, Error> {
        self.call("getblock", json!([hash.to_string(), 2])).await
    }

    async fn get_block_header(&self, hash: &BlockHash) -> Result<RpcBlockHeader, Error> {
        self.call("getblockheader", json!([hash.to_string(), true])).await
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RpcTransaction, Error> {
        self.call("getrawtransaction", json!([txid.to_string(), true])).await
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>, Error> {
        self.call("getrawmempool", json!([false])).await
    }
}
