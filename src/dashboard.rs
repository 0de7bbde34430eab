//! Dashboard aggregation kept in step with the ledger stores.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::remote::SummaryEndpoint;
use crate::session::AuthSentinel;
use crate::store::run_detached;
use crate::signal::ChangeSubscription;
use crate::sync::{Refresh, SyncBinding, SynchronizationGraph};

/// Totals computed by the server, in cents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
  pub total_balance: i64,
  pub income_total: i64,
  pub expense_total: i64,
  pub net: i64,
  pub account_count: usize,
  pub active_schedules: usize,
  /// Signed sum of active scheduled transactions, incomes positive
  pub scheduled_net: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
  pub summary: Option<DashboardSummary>,
  pub loading: bool,
  pub error: Option<String>,
  pub refreshed_at: Option<DateTime<Utc>>,
}

/// Summary state shared with the detached summary calls.
struct DashboardCore {
  endpoint: Arc<dyn SummaryEndpoint>,
  state: watch::Sender<DashboardState>,
  generation: AtomicU64,
  sentinel: Option<Arc<dyn AuthSentinel>>,
}

impl DashboardCore {
  async fn load(&self) -> Result<DashboardSummary, StoreError> {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    self.state.send_modify(|state| state.loading = true);

    let result = self.endpoint.summary().await;
    let latest = self.generation.load(Ordering::SeqCst) == generation;

    match result {
      Ok(summary) => {
        if latest {
          self.state.send_modify(|state| {
            state.summary = Some(summary.clone());
            state.loading = false;
            state.error = None;
            state.refreshed_at = Some(Utc::now());
          });
        } else {
          debug!(generation, "discarding stale dashboard summary");
        }
        Ok(summary)
      }
      Err(err) => {
        if latest {
          self.state.send_modify(|state| {
            state.loading = false;
            state.error = Some(err.message.clone());
          });
        }
        warn!(status = err.status, "dashboard refresh failed: {}", err);
        if err.is_unauthorized() {
          if let Some(sentinel) = &self.sentinel {
            sentinel.unauthorized("dashboard", &err);
          }
        }
        Err(err.into())
      }
    }
  }
}

/// Derived view over the summary endpoint.
///
/// Held in an `Arc` so it can be attached to a [`SynchronizationGraph`].
pub struct Dashboard {
  core: Arc<DashboardCore>,
  auto_refresh: AtomicBool,
  binding: Mutex<Option<SyncBinding>>,
}

impl Dashboard {
  pub fn new(endpoint: Arc<dyn SummaryEndpoint>) -> Self {
    Self::build(endpoint, None)
  }

  pub fn with_auth_sentinel(
    endpoint: Arc<dyn SummaryEndpoint>,
    sentinel: Arc<dyn AuthSentinel>,
  ) -> Self {
    Self::build(endpoint, Some(sentinel))
  }

  fn build(endpoint: Arc<dyn SummaryEndpoint>, sentinel: Option<Arc<dyn AuthSentinel>>) -> Self {
    let (state, _rx) = watch::channel(DashboardState::default());
    Self {
      core: Arc::new(DashboardCore {
        endpoint,
        state,
        generation: AtomicU64::new(0),
        sentinel,
      }),
      auto_refresh: AtomicBool::new(true),
      binding: Mutex::new(None),
    }
  }

  pub fn snapshot(&self) -> DashboardState {
    self.core.state.borrow().clone()
  }

  pub fn summary(&self) -> Option<DashboardSummary> {
    self.core.state.borrow().summary.clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
    self.core.state.subscribe()
  }

  /// Fetch the summary. A failure keeps the previous summary.
  ///
  /// The call settles `loading` even if the caller, such as a refresh aborted by
  /// [`Dashboard::detach`], stops waiting for it.
  pub async fn load(&self) -> Result<DashboardSummary, StoreError> {
    let core = Arc::clone(&self.core);
    run_detached(async move { core.load().await }).await
  }

  /// Refresh whenever one of `sources` changes. Replaces any earlier attachment.
  pub fn attach(self: &Arc<Self>, graph: &SynchronizationGraph, sources: Vec<ChangeSubscription>) {
    let target: Arc<dyn Refresh> = self.clone();
    let binding = graph.bind(
      Arc::downgrade(&target),
      sources,
      self.auto_refresh.load(Ordering::SeqCst),
    );
    *self.binding() = Some(binding);
  }

  /// Stop observing the sources.
  pub fn detach(&self) {
    self.binding().take();
  }

  pub fn is_attached(&self) -> bool {
    self.binding().is_some()
  }

  /// Suspend or resume automatic refreshes without detaching.
  pub fn set_auto_refresh(&self, enabled: bool) {
    self.auto_refresh.store(enabled, Ordering::SeqCst);
    if let Some(binding) = self.binding().as_ref() {
      binding.set_auto_refresh(enabled);
    }
  }

  pub fn auto_refresh(&self) -> bool {
    self.auto_refresh.load(Ordering::SeqCst)
  }

  /// Automatic refreshes completed by the current attachment.
  pub fn refresh_count(&self) -> u64 {
    self.binding().as_ref().map_or(0, SyncBinding::refresh_count)
  }

  /// Forget the summary, keeping the attachment.
  pub fn reset(&self) {
    self.core.generation.fetch_add(1, Ordering::SeqCst);
    self.core.state.send_modify(|state| *state = DashboardState::default());
  }

  fn binding(&self) -> MutexGuard<'_, Option<SyncBinding>> {
    self.binding.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl Refresh for Dashboard {
  fn name(&self) -> &str {
    "dashboard"
  }

  async fn refresh(&self) {
    // Failures are already recorded in the state.
    let _ = self.load().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::PageQuery;
  use crate::error::RemoteError;
  use crate::finance::{Account, AccountKind, Expense, ExpenseDraft, Income, ScheduledTransaction};
  use crate::remote::{InMemoryEndpoint, InMemorySummary, Op};
  use crate::store::EntityStore;
  use chrono::NaiveDate;
  use std::time::Duration;

  struct Fixture {
    accounts: Arc<InMemoryEndpoint<Account>>,
    expenses: Arc<InMemoryEndpoint<Expense>>,
    summary: Arc<InMemorySummary>,
    dashboard: Arc<Dashboard>,
  }

  fn fixture() -> Fixture {
    let accounts = Arc::new(InMemoryEndpoint::new("acc"));
    accounts.seed(Account {
      id: "acc-1".to_string(),
      name: "Checking".to_string(),
      kind: AccountKind::Checking,
      balance: 100_00,
    });
    let expenses = Arc::new(InMemoryEndpoint::new("exp"));
    let incomes = Arc::new(InMemoryEndpoint::<Income>::new("inc"));
    let scheduled = Arc::new(InMemoryEndpoint::<ScheduledTransaction>::new("sch"));
    let summary = Arc::new(InMemorySummary::new(
      accounts.clone(),
      expenses.clone(),
      incomes,
      scheduled,
    ));
    let dashboard = Arc::new(Dashboard::new(summary.clone()));
    Fixture {
      accounts,
      expenses,
      summary,
      dashboard,
    }
  }

  fn lunch() -> ExpenseDraft {
    ExpenseDraft {
      description: "Lunch".to_string(),
      amount: 12_50,
      date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      category_id: "cat-1".to_string(),
      account_id: "acc-1".to_string(),
    }
  }

  #[tokio::test]
  async fn test_load_reads_summary() {
    let f = fixture();
    let summary = f.dashboard.load().await.expect("load");

    assert_eq!(summary.total_balance, 100_00);
    assert_eq!(summary.account_count, 1);
    let state = f.dashboard.snapshot();
    assert!(!state.loading);
    assert!(state.refreshed_at.is_some());
  }

  #[tokio::test]
  async fn test_failed_load_keeps_previous_summary() {
    let f = fixture();
    f.dashboard.load().await.expect("load");
    f.summary.control().fail_next(RemoteError::server("aggregation failed"));

    assert!(f.dashboard.load().await.is_err());
    let state = f.dashboard.snapshot();
    assert_eq!(state.error.as_deref(), Some("aggregation failed"));
    assert_eq!(state.summary.map(|s| s.total_balance), Some(100_00));
  }

  #[tokio::test(start_paused = true)]
  async fn test_expense_commit_refreshes_attached_dashboard() {
    let f = fixture();
    let store: EntityStore<Expense> = EntityStore::new(f.expenses.clone());
    f.dashboard
      .attach(&SynchronizationGraph::default(), vec![store.subscribe()]);

    store.create(lunch()).await.expect("create");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.summary.control().calls(Op::Summary), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.dashboard.refresh_count(), 1);
    let summary = f.dashboard.summary().expect("summary");
    assert_eq!(summary.expense_total, 12_50);
    assert_eq!(summary.total_balance, 100_00 - 12_50);
  }

  #[tokio::test(start_paused = true)]
  async fn test_detach_during_refresh_still_settles_loading() {
    let f = fixture();
    let store: EntityStore<Expense> = EntityStore::new(f.expenses.clone());
    f.dashboard
      .attach(&SynchronizationGraph::default(), vec![store.subscribe()]);

    f.summary.control().hold();
    store.create(lunch()).await.expect("create");
    tokio::time::sleep(Duration::from_millis(150)).await;
    f.summary.control().wait_for_waiting(1).await;
    assert!(f.dashboard.snapshot().loading);

    f.dashboard.detach();
    f.summary.control().release(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = f.dashboard.snapshot();
    assert!(!state.loading);
    assert_eq!(state.summary.map(|s| s.expense_total), Some(12_50));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_mutation_does_not_refresh() {
    let f = fixture();
    let store: EntityStore<Expense> = EntityStore::new(f.expenses.clone());
    f.dashboard
      .attach(&SynchronizationGraph::default(), vec![store.subscribe()]);

    f.expenses.fail_next(RemoteError::server("rejected"));
    assert!(store.create(lunch()).await.is_err());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(f.summary.control().calls(Op::Summary), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_auto_refresh_toggle_and_detach() {
    let f = fixture();
    let store: EntityStore<Account> = EntityStore::new(f.accounts.clone());
    f.dashboard
      .attach(&SynchronizationGraph::default(), vec![store.subscribe()]);

    store.load_page(PageQuery::default()).await;
    f.dashboard.set_auto_refresh(false);
    store.delete("acc-1").await.expect("delete");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(f.summary.control().calls(Op::Summary), 0);

    f.dashboard.set_auto_refresh(true);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(f.summary.control().calls(Op::Summary), 1);
    assert_eq!(f.dashboard.summary().map(|s| s.account_count), Some(0));

    f.dashboard.detach();
    assert!(!f.dashboard.is_attached());
    f.accounts.seed(Account {
      id: "acc-2".to_string(),
      name: "Savings".to_string(),
      kind: AccountKind::Savings,
      balance: 0,
    });
    store.reload().await;
    store.delete("acc-2").await.expect("delete");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(f.summary.control().calls(Op::Summary), 1);
  }
}
