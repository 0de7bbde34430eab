//! Per-store "last modified" marker observed by derived views.

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// One advance of a change signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeStamp {
  /// Monotonic counter, distinguishes mutations within the same clock tick
  pub version: u64,
  pub at: DateTime<Utc>,
}

/// Advanced on every committed mutation of one entity store.
pub struct ChangeSignal {
  source: &'static str,
  tx: watch::Sender<Option<ChangeStamp>>,
}

impl ChangeSignal {
  pub fn new(source: &'static str) -> Self {
    let (tx, _rx) = watch::channel(None);
    Self { source, tx }
  }

  /// Name of the entity type this signal belongs to.
  pub fn source(&self) -> &'static str {
    self.source
  }

  /// Advance the signal and return the new stamp.
  pub fn mark(&self) -> ChangeStamp {
    let mut stamp = ChangeStamp {
      version: 0,
      at: Utc::now(),
    };
    self.tx.send_modify(|current| {
      stamp.version = current.map(|c| c.version + 1).unwrap_or(1);
      *current = Some(stamp);
    });
    stamp
  }

  /// Most recent stamp, `None` until the first committed mutation.
  pub fn last(&self) -> Option<ChangeStamp> {
    *self.tx.borrow()
  }

  pub fn last_mutated_at(&self) -> Option<DateTime<Utc>> {
    self.last().map(|stamp| stamp.at)
  }

  /// Subscribe to future advances. The current value counts as already seen.
  pub fn subscribe(&self) -> ChangeSubscription {
    ChangeSubscription {
      source: self.source,
      rx: self.tx.subscribe(),
    }
  }
}

/// Receiving side of a [`ChangeSignal`]. Dropping it unsubscribes.
pub struct ChangeSubscription {
  source: &'static str,
  rx: watch::Receiver<Option<ChangeStamp>>,
}

impl ChangeSubscription {
  pub fn source(&self) -> &'static str {
    self.source
  }

  /// Wait for the next advance. Returns `None` once the signal is gone.
  ///
  /// Several advances between two calls are observed as one.
  pub async fn changed(&mut self) -> Option<ChangeStamp> {
    self.rx.changed().await.ok()?;
    *self.rx.borrow_and_update()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mark_increments_version() {
    let signal = ChangeSignal::new("expense");
    assert!(signal.last().is_none());
    assert_eq!(signal.mark().version, 1);
    assert_eq!(signal.mark().version, 2);
    assert_eq!(signal.last().map(|s| s.version), Some(2));
    assert!(signal.last_mutated_at().is_some());
  }

  #[tokio::test]
  async fn test_subscriber_sees_only_new_marks() {
    let signal = ChangeSignal::new("income");
    signal.mark();
    let mut sub = signal.subscribe();

    signal.mark();
    signal.mark();
    let seen = sub.changed().await.expect("signal alive");
    assert_eq!(seen.version, 3);
    assert_eq!(sub.source(), "income");
  }

  #[tokio::test]
  async fn test_subscription_ends_with_signal() {
    let signal = ChangeSignal::new("account");
    let mut sub = signal.subscribe();
    drop(signal);
    assert!(sub.changed().await.is_none());
  }
}
