use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration, Instant};

use crate::{
    config::{Config, RelayerConfig},
    destination::{DefaultDestinationFactory, Destination, DestinationFactory, ForwardRequest},
    node::BitcoinRpcClient,
    registry::ChainRegistry,
    scanner::{BlockRef, Scanner},
    types::{DetectedMessage, RelayOutcome, ScanCursor, StopHandle},
    validation::{now_unix, MessageValidator, NonceTracker},
    BmcpMessage, Error,
};

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub struct Relayer {
    scanner: Arc<Scanner>,
    destination: Arc<dyn Destination>,
    registry: Arc<ChainRegistry>,
    validator: MessageValidator,
    nonces: NonceTracker,
    config: RelayerConfig,
    cursor: Option<ScanCursor>,
    stop: StopHandle,
}

impl Relayer {
    pub fn new(
        scanner: Arc<Scanner>,
        destination: Arc<dyn Destination>,
        registry: Arc<ChainRegistry>,
        config: RelayerConfig,
    ) -> Self {
        Self {
            scanner,
            destination,
            validator: MessageValidator::new(registry.clone()),
            registry,
            nonces: NonceTracker::new(),
            cursor: config.start_height.map(ScanCursor::starting_at),
            config,
            stop: StopHandle::new(),
        }
    }

    /// Wires the node client, scanner and destination described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let registry = Arc::new(config.registry()?);
        let node = Arc::new(BitcoinRpcClient::from_config(&config.bitcoin));
        let scanner = Arc::new(Scanner::new(node, config.scanner.clone()));
        let destination = DefaultDestinationFactory.create_destination(&config.destination)?;
        info!("Relaying through {} destination", destination.kind());

        Ok(Self::new(scanner, destination, registry, config.relayer.clone()))
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn cursor(&self) -> Option<ScanCursor> {
        self.cursor
    }

    /// Runs passes until stopped. Node errors back off and retry forever.
    pub async fn start(&mut self) -> Result<(), Error> {
        info!("Starting relayer...");

        while !self.stop.is_stopped() {
            match self.run_once().await {
                Ok(outcomes) => {
                    let forwarded = outcomes.iter().filter(|o| o.forwarded).count();
                    if !outcomes.is_empty() {
                        info!("Relayed {}/{} messages", forwarded, outcomes.len());
                    }
                    self.pause(Duration::from_secs(self.config.poll_interval)).await;
                }
                Err(e) => {
                    error!("Relayer pass failed: {}, backing off {}s", e, self.config.error_backoff);
                    self.pause(Duration::from_secs(self.config.error_backoff)).await;
                }
            }
        }

        info!("Relayer stopped at {:?}", self.cursor);
        Ok(())
    }

    /// One pass over every newly confirmed height.
    ///
    /// A node error ends the pass early; the cursor stays on the last fully handled height so the
    /// next pass resumes there.
    pub async fn run_once(&mut self) -> Result<Vec<RelayOutcome>, Error> {
        let tip = self.scanner.node().get_block_count().await?;
        let Some(confirmed) = tip.checked_sub(self.config.confirmation_blocks) else {
            debug!("Tip {} has fewer than {} confirmations", tip, self.config.confirmation_blocks);
            return Ok(Vec::new());
        };

        let mut cursor = *self.cursor.get_or_insert_with(|| {
            info!("No start height configured, starting after confirmed height {}", confirmed);
            ScanCursor::new(confirmed)
        });

        let mut outcomes = Vec::new();
        while cursor.next_height() <= confirmed && !self.stop.is_stopped() {
            let height = cursor.next_height();
            outcomes.extend(self.process_height(height).await?);
            cursor.advance(height);
            self.cursor = Some(cursor);
        }

        self.nonces.prune_expired(now_unix());
        Ok(outcomes)
    }

    async fn process_height(&mut self, height: u64) -> Result<Vec<RelayOutcome>, Error> {
        debug!("Processing block {}", height);
        let detected = self.scanner.scan_block(BlockRef::Height(height)).await?;

        let mut outcomes = Vec::new();
        for found in &detected {
            match (found.message(), &found.decode_error) {
                (Some(message), _) => outcomes.push(self.relay_message(found, message).await),
                (None, Some(e)) if found.is_protocol_match => {
                    warn!("Skipping undecodable message {}:{}: {}", found.txid, found.output_index, e)
                }
                _ => {}
            }
        }
        Ok(outcomes)
    }

    async fn relay_message(&mut self, found: &DetectedMessage, message: &BmcpMessage) -> RelayOutcome {
        let mut outcome = RelayOutcome {
            source_txid: found.txid,
            output_index: found.output_index,
            chain_selector: message.chain_selector,
            forwarded: false,
            destination_ref: None,
            error: None,
        };

        let report = self.validator.validate(message, now_unix());
        if let Some(first) = report.errors.first() {
            warn!("Skipping message {}:{}: {:?}", found.txid, found.output_index, report.errors);
            outcome.error = Some(first.clone());
            return outcome;
        }

        if let Err(e) = self.nonces.check(message) {
            warn!("Skipping message {}:{}: {}", found.txid, found.output_index, e);
            outcome.error = Some(e);
            return outcome;
        }

        let Some(chain) = self.registry.resolve_by_selector(message.chain_selector) else {
            outcome.error = Some(Error::UnknownChain(message.chain_selector));
            return outcome;
        };

        let request = ForwardRequest::new(message, found.txid, found.output_index);
        let max_retries = self.config.max_retries.max(1);
        let mut retry_count = 0;

        loop {
            match self.destination.forward(chain, &request).await {
                Ok(reference) => {
                    info!(
                        "Relayed {}:{} to {} ({})",
                        found.txid, found.output_index, chain.name, reference
                    );
                    self.nonces.record(message);
                    outcome.forwarded = true;
                    outcome.destination_ref = Some(reference);
                    return outcome;
                }
                Err(e) if !e.is_transport() => {
                    error!(
                        "Destination rejected {}:{}, not retrying: {}",
                        found.txid, found.output_index, e
                    );
                    outcome.error = Some(e);
                    return outcome;
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count >= max_retries || self.stop.is_stopped() {
                        error!(
                            "Max retries ({}) reached relaying {}:{}. Last error: {}",
                            max_retries, found.txid, found.output_index, e
                        );
                        outcome.error = Some(e);
                        return outcome;
                    }

                    let delay = self.config.retry_delay * retry_count as u64;
                    warn!(
                        "Retry {}/{} for {}:{} after {} seconds. Error: {}",
                        retry_count, max_retries, found.txid, found.output_index, delay, e
                    );
                    self.pause(Duration::from_secs(delay)).await;
                }
            }
        }
    }

    /// Sleeps for `duration`, waking early once stopped.
    async fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stop.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep((deadline - now).min(STOP_CHECK_INTERVAL)).await;
        }
    }
}
