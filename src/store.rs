// store.rs - Channel Store (spec §4.2)
//
// Process-wide, in-memory mapping of channels keyed by partner address, plus
// the append-only per-channel off-chain log. A single coarse lock protects
// both maps; spec §5 explicitly allows this given the expected channel
// count, and it keeps a channel's on-chain view and off-chain log
// consistent with each other without a second lock-ordering problem to get
// wrong.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::NodeError;
use crate::model::{OffChainState, OnChainChannel, Role};

#[derive(Default)]
struct Inner {
    channels: HashMap<String, OnChainChannel>,
    logs: HashMap<String, BTreeMap<u64, OffChainState>>,
}

/// Shared, cloneable handle onto the process-wide channel store.
#[derive(Clone, Default)]
pub struct Store(Arc<RwLock<Inner>>);

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub async fn get_channel(&self, peer: &str) -> Option<OnChainChannel> {
        self.0.read().await.channels.get(peer).cloned()
    }

    pub async fn put_channel(&self, peer: &str, channel: OnChainChannel) {
        self.0.write().await.channels.insert(peer.to_string(), channel);
    }

    /// Removes the channel and its off-chain log. Idempotent: returns `true`
    /// only the first time, so callers can reject a second `FinalizeClose`
    /// for the same peer (spec §8 property 6).
    pub async fn delete_channel(&self, peer: &str) -> bool {
        let mut inner = self.0.write().await;
        inner.logs.remove(peer);
        inner.channels.remove(peer).is_some()
    }

    /// Appends a new log entry. The timestamp must be strictly larger than
    /// every timestamp already recorded for this peer (spec §4.2
    /// monotonicity invariant); callers mint timestamps via
    /// `next_timestamp` below rather than trusting a bare wall clock read
    /// (spec §9 open question on timestamp collisions).
    pub async fn append_state(&self, peer: &str, state: OffChainState) -> Result<(), NodeError> {
        let mut inner = self.0.write().await;
        let log = inner.logs.entry(peer.to_string()).or_default();
        if let Some((&max_ts, _)) = log.iter().next_back() {
            if state.timestamp <= max_ts {
                return Err(NodeError::InvalidArgument(format!(
                    "timestamp {} is not strictly greater than latest {max_ts}",
                    state.timestamp
                )));
            }
        }
        log.insert(state.timestamp, state);
        Ok(())
    }

    /// The timestamp the next appended state for this peer must use:
    /// `max(candidate, latest + 1)`, never a bare clock read alone.
    pub async fn next_timestamp(&self, peer: &str, candidate: u64) -> u64 {
        let inner = self.0.read().await;
        match inner.logs.get(peer).and_then(|log| log.iter().next_back()) {
            Some((&max_ts, _)) => candidate.max(max_ts + 1),
            None => candidate,
        }
    }

    pub async fn latest(&self, peer: &str) -> Result<OffChainState, NodeError> {
        let inner = self.0.read().await;
        inner
            .logs
            .get(peer)
            .and_then(|log| log.iter().next_back())
            .map(|(_, state)| state.clone())
            .ok_or_else(|| NodeError::NoOffChainState(peer.to_string()))
    }

    /// The off-chain state maximising the local party's balance — not
    /// necessarily the latest. Exposed only for the deliberately dishonest
    /// `TryToCheat` facade operation (spec §4.2/§4.7).
    pub async fn highest_balance(&self, peer: &str, local_role: Role) -> Option<OffChainState> {
        let inner = self.0.read().await;
        inner
            .logs
            .get(peer)?
            .values()
            .max_by_key(|state| state.balance_for(local_role))
            .cloned()
    }

    /// All peer addresses with an open channel, for the watchtower sweep.
    pub async fn peers(&self) -> Vec<String> {
        self.0.read().await.channels.keys().cloned().collect()
    }

    pub async fn has_channel(&self, peer: &str) -> bool {
        self.0.read().await.channels.contains_key(peer)
    }

    /// Clears all channels and logs (backing the `Reset` facade operation).
    pub async fn clear(&self) {
        let mut inner = self.0.write().await;
        inner.channels.clear();
        inner.logs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(timestamp: u64, alice: u64, bob: u64) -> OffChainState {
        OffChainState {
            timestamp,
            alice_balance: alice,
            bob_balance: bob,
            alice_signature: vec![],
            bob_signature: vec![],
            port_tag: 4161,
            app_id: 1,
        }
    }

    #[tokio::test]
    async fn append_rejects_non_monotonic_timestamps() {
        let store = Store::new();
        store.append_state("bob", state(10, 100, 0)).await.unwrap();
        let err = store.append_state("bob", state(10, 90, 10)).await;
        assert!(err.is_err());
        let err = store.append_state("bob", state(5, 90, 10)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn latest_is_the_max_timestamp_entry() {
        let store = Store::new();
        store.append_state("bob", state(10, 100, 0)).await.unwrap();
        store.append_state("bob", state(20, 90, 10)).await.unwrap();
        let latest = store.latest("bob").await.unwrap();
        assert_eq!(latest.timestamp, 20);
    }

    #[tokio::test]
    async fn latest_fails_when_log_is_empty() {
        let store = Store::new();
        assert!(store.latest("nobody").await.is_err());
    }

    #[tokio::test]
    async fn highest_balance_picks_the_best_historical_state() {
        let store = Store::new();
        store.append_state("bob", state(10, 100, 0)).await.unwrap();
        store.append_state("bob", state(20, 90, 10)).await.unwrap();
        let best = store.highest_balance("bob", Role::Alice).await.unwrap();
        assert_eq!(best.timestamp, 10);
        assert_eq!(best.alice_balance, 100);
    }

    #[tokio::test]
    async fn delete_channel_is_idempotent() {
        let store = Store::new();
        store
            .put_channel(
                "bob",
                OnChainChannel {
                    app_id: 1,
                    partner_host: "127.0.0.1:28547".into(),
                    alice_address: "alice".into(),
                    bob_address: "bob".into(),
                    alice_onchain_balance: 100,
                    bob_onchain_balance: 0,
                    total_deposit: 100,
                    penalty_reserve: 10,
                    dispute_window: 5,
                },
            )
            .await;
        assert!(store.delete_channel("bob").await);
        assert!(!store.delete_channel("bob").await);
    }

    #[tokio::test]
    async fn next_timestamp_never_goes_backwards() {
        let store = Store::new();
        store.append_state("bob", state(100, 1, 1)).await.unwrap();
        assert_eq!(store.next_timestamp("bob", 50).await, 101);
        assert_eq!(store.next_timestamp("bob", 200).await, 200);
    }
}
