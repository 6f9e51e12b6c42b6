//! Piggyback dissemination queue.
//!
//! Rumours (membership deltas, record deltas) wait here until they have been
//! attached to enough outgoing messages. Newer rumours about the same key replace
//! older ones and restart their transmission count.

use std::collections::HashMap;
use std::hash::Hash;

/// Number of peers to gossip to per round: `ceil(log2(n + 1))`, at least 1.
pub fn gossip_fanout(peers: usize) -> usize {
    let mut fanout = 0usize;
    let mut reach = 1usize;
    while reach <= peers {
        reach = reach.saturating_mul(2);
        fanout += 1;
    }
    fanout.max(1)
}

/// How many times each rumour is piggybacked in a cluster of `members` nodes.
pub fn retransmit_limit(multiplier: u32, members: usize) -> u32 {
    multiplier.max(1) * gossip_fanout(members) as u32
}

#[derive(Debug)]
struct Queued<V> {
    value: V,
    transmissions: u32,
    enqueued_at: u64,
}

#[derive(Debug)]
pub struct GossipQueue<K, V> {
    items: HashMap<K, Queued<V>>,
    next_seq: u64,
}

impl<K, V> Default for GossipQueue<K, V> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K, V> GossipQueue<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: K, value: V) {
        self.next_seq += 1;
        self.items.insert(
            key,
            Queued {
                value,
                transmissions: 0,
                enqueued_at: self.next_seq,
            },
        );
    }

    /// Selects rumours for one outgoing message.
    ///
    /// Least-transmitted first, newest first among equals. `fits` is asked about
    /// each candidate and tracks the caller's byte budget; rejected candidates stay
    /// queued for a later slot. Rumours reaching `limit` transmissions are retired.
    pub fn take(&mut self, limit: u32, mut fits: impl FnMut(&V) -> bool) -> Vec<V> {
        let mut order: Vec<(u32, std::cmp::Reverse<u64>, K)> = self
            .items
            .iter()
            .map(|(key, item)| (item.transmissions, std::cmp::Reverse(item.enqueued_at), key.clone()))
            .collect();
        order.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut selected = Vec::new();
        for (_, _, key) in order {
            let Some(item) = self.items.get_mut(&key) else {
                continue;
            };
            if !fits(&item.value) {
                continue;
            }
            selected.push(item.value.clone());
            item.transmissions += 1;
            if item.transmissions >= limit {
                self.items.remove(&key);
            }
        }
        selected
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
