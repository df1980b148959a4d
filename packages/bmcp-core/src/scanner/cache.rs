use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bitcoin::Txid;

use crate::types::DetectedMessage;

/// Scan results for recently seen transactions, evicted oldest first.
pub struct RecentCache {
    capacity: usize,
    order: VecDeque<Txid>,
    entries: HashMap<Txid, Arc<Vec<DetectedMessage>>>,
}

impl RecentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, txid: &Txid) -> Option<Arc<Vec<DetectedMessage>>> {
        self.entries.get(txid).cloned()
    }

    pub fn insert(&mut self, txid: Txid, messages: Arc<Vec<DetectedMessage>>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(txid, messages).is_none() {
            self.order.push_back(txid);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
