//! FMDM broadcaster (C10, §4.7).
//!
//! Every connected WebSocket client gets the full snapshot on connect
//! (`subscribe`) and a fresh full snapshot each time the FMDM's revision
//! advances. Full snapshots rather than structural deltas keep one invariant
//! trivial to uphold: a client can never observe a stale or re-ordered
//! folder state, because each broadcast is a complete, self-consistent copy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use crate::fmdm::{Fmdm, FmdmStore};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Fans FMDM snapshots to every subscriber.
pub struct Broadcaster {
  tx: broadcast::Sender<Arc<Fmdm>>,
}

impl Broadcaster {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(64);
    Self { tx }
  }

  /// A new client's first message on connect (§6: "On connect the server
  /// sends the full FMDM snapshot").
  pub fn subscribe(&self, store: &FmdmStore) -> (Arc<Fmdm>, broadcast::Receiver<Arc<Fmdm>>) {
    (store.snapshot(), self.tx.subscribe())
  }

  /// Background routine (§5 "one broadcaster routine"): polls the FMDM
  /// revision counter and fans a fresh snapshot to all subscribers whenever
  /// it advances. Polling (rather than a push from every mutation site)
  /// keeps every lifecycle/scheduler call site free of broadcaster
  /// knowledge, matching §9's "no component holds a back-pointer to its owner".
  pub fn spawn_poll_loop(self: Arc<Self>, store: Arc<FmdmStore>, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
      let mut last_revision = store.revision();
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => return,
          _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let revision = store.revision();
        if revision != last_revision {
          last_revision = revision;
          let snapshot = store.snapshot();
          debug!(revision, subscribers = self.tx.receiver_count(), "broadcasting FMDM snapshot");
          let _ = self.tx.send(snapshot);
        }
      }
    });
  }
}

impl Default for Broadcaster {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribe_then_mutation_is_delivered() {
    let store = Arc::new(FmdmStore::new("0.1.0"));
    let broadcaster = Arc::new(Broadcaster::new());
    let shutdown = tokio_util::sync::CancellationToken::new();
    let (_initial, mut rx) = broadcaster.subscribe(&store);

    broadcaster.clone().spawn_poll_loop(store.clone(), shutdown.clone());
    store.set_models(vec![]);

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    shutdown.cancel();
    assert!(received.is_ok(), "broadcaster must deliver a snapshot after a mutation");
  }
}
