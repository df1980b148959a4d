use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::{codec::BmcpMessage, registry::ChainRegistry, Error};

/// Every reason a message is not eligible for relay. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<Error>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), Vec<Error>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Stateless relay eligibility checks against the chain registry.
#[derive(Clone)]
pub struct MessageValidator {
    registry: Arc<ChainRegistry>,
}

impl MessageValidator {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }

    pub fn validate(&self, message: &BmcpMessage, now: u64) -> ValidationReport {
        let mut errors = Vec::new();

        if self.registry.resolve_by_selector(message.chain_selector).is_none() {
            errors.push(Error::UnknownChain(message.chain_selector));
        }
        if message.target_contract == [0u8; 20] {
            errors.push(Error::InvalidTargetAddress(message.target_hex()));
        }
        if message.calldata.is_empty() {
            errors.push(Error::MissingCalldata);
        }
        if let Some(deadline) = message.deadline {
            if u64::from(deadline) <= now {
                errors.push(Error::DeadlineExpired { deadline, now });
            }
        }

        if !errors.is_empty() {
            debug!("Message for chain 0x{:016x} failed validation: {:?}", message.chain_selector, errors);
        }
        ValidationReport { errors }
    }
}

/// Remembers `(selector, target, nonce)` triples already relayed.
///
/// Entries carrying a deadline are dropped by [`NonceTracker::prune_expired`] once it passes,
/// since validation rejects those messages anyway. Entries without a deadline are kept for the
/// life of the tracker.
#[derive(Debug, Default)]
pub struct NonceTracker {
    seen: HashMap<(u64, [u8; 20], u32), Option<u32>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the nonce was seen before. Messages without a nonce always pass.
    pub fn check(&self, message: &BmcpMessage) -> Result<(), Error> {
        match message.nonce {
            Some(nonce) if self.seen.contains_key(&(message.chain_selector, message.target_contract, nonce)) => {
                warn!("Replayed nonce {} for {}", nonce, message.target_hex());
                Err(Error::NonceReplayed(nonce))
            }
            _ => Ok(()),
        }
    }

    pub fn record(&mut self, message: &BmcpMessage) {
        if let Some(nonce) = message.nonce {
            self.seen
                .insert((message.chain_selector, message.target_contract, nonce), message.deadline);
        }
    }

    /// Forgets nonces whose deadline is at or before `now`. Returns how many were dropped.
    pub fn prune_expired(&mut self, now: u64) -> usize {
        let before = self.seen.len();
        self.seen
            .retain(|_, deadline| deadline.map_or(true, |d| u64::from(d) > now));
        let pruned = before - self.seen.len();
        if pruned > 0 {
            debug!("Pruned {} expired nonces", pruned);
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEPOLIA: u64 = 16015286601757825753;
    const NOW: u64 = 1_700_000_000;

    fn validator() -> MessageValidator {
        MessageValidator::new(Arc::new(ChainRegistry::builtin()))
    }

    fn message() -> BmcpMessage {
        BmcpMessage::new(SEPOLIA, [0x2b; 20], vec![0xf2, 0x13, 0x55, 0xf4])
    }

    #[test]
    fn test_valid_message() {
        let report = validator().validate(&message().with_nonce(1).with_deadline(NOW as u32 + 3600), NOW);
        assert!(report.is_valid());
        assert_eq!(report.into_result(), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let message = BmcpMessage::new(42, [0u8; 20], vec![]).with_deadline(NOW as u32 - 1);
        let report = validator().validate(&message, NOW);

        assert!(!report.is_valid());
        assert_eq!(
            report.errors,
            vec![
                Error::UnknownChain(42),
                Error::InvalidTargetAddress(format!("0x{}", "00".repeat(20))),
                Error::MissingCalldata,
                Error::DeadlineExpired { deadline: NOW as u32 - 1, now: NOW },
            ]
        );
    }

    #[test]
    fn test_deadline_boundary() {
        let validator = validator();
        let at_now = message().with_deadline(NOW as u32);
        assert_eq!(
            validator.validate(&at_now, NOW).errors,
            vec![Error::DeadlineExpired { deadline: NOW as u32, now: NOW }]
        );
        assert!(validator.validate(&message().with_deadline(NOW as u32 + 1), NOW).is_valid());
        assert!(validator.validate(&message(), NOW).is_valid());
    }

    #[test]
    fn test_nonce_tracker() {
        let mut tracker = NonceTracker::new();
        let first = message().with_nonce(7);

        assert_eq!(tracker.check(&first), Ok(()));
        tracker.record(&first);
        assert_eq!(tracker.check(&first), Err(Error::NonceReplayed(7)));

        // same nonce for another target is independent
        let other_target = BmcpMessage { target_contract: [0x11; 20], ..first.clone() };
        assert_eq!(tracker.check(&other_target), Ok(()));

        // no nonce means no replay protection
        tracker.record(&message());
        assert_eq!(tracker.check(&message()), Ok(()));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_nonce_tracker_prunes_expired() {
        let mut tracker = NonceTracker::new();
        let expiring = message().with_nonce(1).with_deadline(NOW as u32);
        let later = message().with_nonce(2).with_deadline(NOW as u32 + 60);
        let forever = message().with_nonce(3);
        for m in [&expiring, &later, &forever] {
            tracker.record(m);
        }

        assert_eq!(tracker.prune_expired(NOW - 1), 0);
        assert_eq!(tracker.prune_expired(NOW), 1);
        assert_eq!(tracker.check(&expiring), Ok(()));
        assert_eq!(tracker.check(&later), Err(Error::NonceReplayed(2)));

        assert_eq!(tracker.prune_expired(NOW + 3600), 1);
        assert_eq!(tracker.check(&forever), Err(Error::NonceReplayed(3)));
        assert_eq!(tracker.len(), 1);
    }
}
