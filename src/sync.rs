//! Propagation of store changes to derived views.
//!
//! A [`SyncBinding`] watches the change signals of a set of leaf stores and
//! refreshes one target a fixed delay after the first change it sees. Changes
//! arriving while a refresh is scheduled are folded into it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::signal::ChangeSubscription;

pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_millis(100);

/// A derived view that can re-read its data.
#[async_trait]
pub trait Refresh: Send + Sync {
  fn name(&self) -> &str;

  async fn refresh(&self);
}

/// Builds bindings with a shared refresh delay.
#[derive(Debug, Clone)]
pub struct SynchronizationGraph {
  delay: Duration,
}

impl Default for SynchronizationGraph {
  fn default() -> Self {
    Self::new(DEFAULT_REFRESH_DELAY)
  }
}

impl SynchronizationGraph {
  pub fn new(delay: Duration) -> Self {
    Self { delay }
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  /// Refresh `target` whenever one of `sources` advances.
  ///
  /// The binding holds the target weakly; it stops once the target is dropped.
  /// Requires a tokio runtime.
  pub fn bind(
    &self,
    target: Weak<dyn Refresh>,
    sources: Vec<ChangeSubscription>,
    auto_refresh: bool,
  ) -> SyncBinding {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(BindingShared {
      enabled: AtomicBool::new(auto_refresh),
      missed: AtomicBool::new(false),
      refreshes: AtomicU64::new(0),
      trigger: tx,
    });

    let mut tasks = Vec::with_capacity(sources.len() + 1);
    for subscription in sources {
      tasks.push(tokio::spawn(watch_source(subscription, Arc::clone(&shared))));
    }
    tasks.push(tokio::spawn(schedule(
      target,
      rx,
      self.delay,
      Arc::clone(&shared),
    )));

    SyncBinding { shared, tasks }
  }
}

struct BindingShared {
  enabled: AtomicBool,
  /// A change was ignored while auto-refresh was off
  missed: AtomicBool,
  refreshes: AtomicU64,
  trigger: mpsc::UnboundedSender<&'static str>,
}

async fn watch_source(mut subscription: ChangeSubscription, shared: Arc<BindingShared>) {
  while let Some(stamp) = subscription.changed().await {
    if !shared.enabled.load(Ordering::SeqCst) {
      shared.missed.store(true, Ordering::SeqCst);
      debug!(source = subscription.source(), version = stamp.version, "auto refresh off, change held");
      continue;
    }
    if shared.trigger.send(subscription.source()).is_err() {
      break;
    }
  }
}

async fn schedule(
  target: Weak<dyn Refresh>,
  mut rx: mpsc::UnboundedReceiver<&'static str>,
  delay: Duration,
  shared: Arc<BindingShared>,
) {
  while let Some(first) = rx.recv().await {
    // Let the backend finish recomputing derived values before re-reading them.
    tokio::time::sleep(delay).await;
    let mut folded = 0usize;
    while rx.try_recv().is_ok() {
      folded += 1;
    }

    if !shared.enabled.load(Ordering::SeqCst) {
      shared.missed.store(true, Ordering::SeqCst);
      continue;
    }
    let Some(target) = target.upgrade() else {
      break;
    };
    debug!(target = target.name(), source = first, folded, "refreshing derived view");
    target.refresh().await;
    shared.refreshes.fetch_add(1, Ordering::SeqCst);
  }
}

/// Live subscription of one derived view. Dropping it unsubscribes.
pub struct SyncBinding {
  shared: Arc<BindingShared>,
  tasks: Vec<JoinHandle<()>>,
}

impl SyncBinding {
  /// Gate refreshes without unsubscribing.
  ///
  /// Re-enabling schedules one refresh if changes were held while disabled.
  pub fn set_auto_refresh(&self, enabled: bool) {
    self.shared.enabled.store(enabled, Ordering::SeqCst);
    if enabled && self.shared.missed.swap(false, Ordering::SeqCst) {
      self.trigger();
    }
  }

  pub fn auto_refresh(&self) -> bool {
    self.shared.enabled.load(Ordering::SeqCst)
  }

  /// Schedule a refresh as if a source had changed.
  pub fn trigger(&self) {
    let _ = self.shared.trigger.send("manual");
  }

  /// Refreshes completed so far.
  pub fn refresh_count(&self) -> u64 {
    self.shared.refreshes.load(Ordering::SeqCst)
  }
}

impl Drop for SyncBinding {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::signal::ChangeSignal;
  use std::sync::atomic::AtomicUsize;

  #[derive(Default)]
  struct Counter {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Refresh for Counter {
    fn name(&self) -> &str {
      "counter"
    }

    async fn refresh(&self) {
      self.calls.fetch_add(1, Ordering::SeqCst);
    }
  }

  impl Counter {
    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  fn bind(counter: &Arc<Counter>, signals: &[&ChangeSignal]) -> SyncBinding {
    let target: Arc<dyn Refresh> = counter.clone();
    SynchronizationGraph::default().bind(
      Arc::downgrade(&target),
      signals.iter().map(|s| s.subscribe()).collect(),
      true,
    )
  }

  #[tokio::test(start_paused = true)]
  async fn test_refresh_waits_for_delay() {
    let expenses = ChangeSignal::new("expense");
    let counter = Arc::new(Counter::default());
    let binding = bind(&counter, &[&expenses]);

    expenses.mark();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.calls(), 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(counter.calls(), 1);
    assert_eq!(binding.refresh_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_burst_across_sources_coalesces() {
    let expenses = ChangeSignal::new("expense");
    let incomes = ChangeSignal::new("income");
    let counter = Arc::new(Counter::default());
    let _binding = bind(&counter, &[&expenses, &incomes]);

    expenses.mark();
    tokio::time::sleep(Duration::from_millis(10)).await;
    incomes.mark();
    tokio::time::sleep(Duration::from_millis(10)).await;
    expenses.mark();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(counter.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_change_after_refresh_schedules_another() {
    let accounts = ChangeSignal::new("account");
    let counter = Arc::new(Counter::default());
    let _binding = bind(&counter, &[&accounts]);

    accounts.mark();
    tokio::time::sleep(Duration::from_millis(150)).await;
    accounts.mark();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(counter.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_disabled_binding_holds_changes_until_enabled() {
    let transfers = ChangeSignal::new("transfer");
    let counter = Arc::new(Counter::default());
    let binding = bind(&counter, &[&transfers]);

    binding.set_auto_refresh(false);
    transfers.mark();
    transfers.mark();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(counter.calls(), 0);
    assert!(!binding.auto_refresh());

    binding.set_auto_refresh(true);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(counter.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropped_binding_stops_refreshing() {
    let expenses = ChangeSignal::new("expense");
    let counter = Arc::new(Counter::default());
    let binding = bind(&counter, &[&expenses]);

    drop(binding);
    expenses.mark();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(counter.calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_manual_trigger_refreshes() {
    let counter = Arc::new(Counter::default());
    let binding = bind(&counter, &[]);

    binding.trigger();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(counter.calls(), 1);
  }
}
