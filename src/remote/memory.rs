//! In-process backend implementing the endpoint contracts.
//!
//! Used by the demo binary and the tests. Every call goes through a
//! [`CallControl`] that can delay it, hold it behind a gate, or fail it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{AuthEndpoint, ListPage, RemoteEndpoint, SummaryEndpoint};
use crate::cache::{PageQuery, SortOrder};
use crate::dashboard::DashboardSummary;
use crate::entity::{Entity, NameLookup, NoNames, RelatedNames};
use crate::error::RemoteError;
use crate::finance::{
  Account, Category, Direction, Expense, Income, ScheduledTransaction, Transfer,
};
use crate::session::{AuthGrant, Credentials, UserProfile};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remote operation, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  List,
  Create,
  Update,
  Delete,
  Search,
  Summary,
  Login,
  Profile,
  Logout,
}

/// Latency, gating and failure injection shared by the in-memory endpoints.
#[derive(Default)]
pub struct CallControl {
  failures: Mutex<VecDeque<RemoteError>>,
  latencies: Mutex<VecDeque<Duration>>,
  latency: Mutex<Duration>,
  gate: Mutex<Option<Arc<Semaphore>>>,
  waiting: AtomicUsize,
  calls: Mutex<HashMap<Op, usize>>,
}

impl CallControl {
  /// Fail the next call that gets past the gate and latency.
  pub fn fail_next(&self, err: RemoteError) {
    lock(&self.failures).push_back(err);
  }

  /// Delay applied to every call without a queued latency.
  pub fn set_latency(&self, latency: Duration) {
    *lock(&self.latency) = latency;
  }

  /// Delay for the next call only; queued delays are consumed in call order.
  pub fn push_latency(&self, latency: Duration) {
    lock(&self.latencies).push_back(latency);
  }

  /// Make calls wait until [`CallControl::release`].
  pub fn hold(&self) {
    *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
  }

  /// Let `count` held calls through, in arrival order.
  pub fn release(&self, count: usize) {
    if let Some(gate) = lock(&self.gate).as_ref() {
      gate.add_permits(count);
    }
  }

  /// Stop holding calls. Calls already waiting stay held until released.
  pub fn open(&self) {
    lock(&self.gate).take();
  }

  /// Calls currently waiting at the gate.
  pub fn waiting(&self) -> usize {
    self.waiting.load(Ordering::SeqCst)
  }

  pub fn calls(&self, op: Op) -> usize {
    lock(&self.calls).get(&op).copied().unwrap_or(0)
  }

  /// Yield until at least `count` calls are waiting at the gate.
  pub async fn wait_for_waiting(&self, count: usize) {
    while self.waiting() < count {
      tokio::task::yield_now().await;
    }
  }

  /// Yield until at least `count` calls of `op` have started.
  pub async fn wait_for_calls(&self, op: Op, count: usize) {
    while self.calls(op) < count {
      tokio::task::yield_now().await;
    }
  }

  /// Count the call, hold it at the gate, then delay and maybe fail it.
  async fn admit(&self, op: Op) -> Result<(), RemoteError> {
    self.enter(op).await;
    self.deliver().await
  }

  async fn enter(&self, op: Op) {
    *lock(&self.calls).entry(op).or_default() += 1;

    let gate = lock(&self.gate).clone();
    if let Some(gate) = gate {
      self.waiting.fetch_add(1, Ordering::SeqCst);
      let permit = gate.acquire_owned().await;
      self.waiting.fetch_sub(1, Ordering::SeqCst);
      if let Ok(permit) = permit {
        permit.forget();
      }
    }
  }

  /// Latency and failure injection applied to an answer on its way back.
  async fn deliver(&self) -> Result<(), RemoteError> {
    let latency = lock(&self.latencies)
      .pop_front()
      .unwrap_or_else(|| *lock(&self.latency));
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }

    match lock(&self.failures).pop_front() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

// ============================================================================
// Entity endpoint
// ============================================================================

/// CRUD endpoint over a vector of records, newest first.
pub struct InMemoryEndpoint<T: Entity> {
  prefix: String,
  records: Mutex<Vec<T>>,
  next_id: AtomicU64,
  /// Names the server resolves when it builds a record
  names: Arc<dyn NameLookup>,
  update_returns_record: bool,
  control: CallControl,
}

impl<T: Entity> InMemoryEndpoint<T> {
  /// Create an empty endpoint assigning ids like `{prefix}-1`.
  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      records: Mutex::new(Vec::new()),
      next_id: AtomicU64::new(0),
      names: Arc::new(NoNames),
      update_returns_record: true,
      control: CallControl::default(),
    }
  }

  pub fn with_names(mut self, names: Arc<dyn NameLookup>) -> Self {
    self.names = names;
    self
  }

  /// Answer updates with no body, like endpoints that only report success.
  pub fn without_update_body(mut self) -> Self {
    self.update_returns_record = false;
    self
  }

  /// Add an existing record without going through `create`.
  pub fn seed(&self, record: T) {
    let suffix = record
      .id()
      .strip_prefix(&self.prefix)
      .and_then(|rest| rest.strip_prefix('-'))
      .and_then(|n| n.parse::<u64>().ok());
    if let Some(n) = suffix {
      self.next_id.fetch_max(n, Ordering::SeqCst);
    }
    lock(&self.records).push(record);
  }

  pub fn records(&self) -> Vec<T> {
    lock(&self.records).clone()
  }

  pub fn control(&self) -> &CallControl {
    &self.control
  }

  pub fn fail_next(&self, err: RemoteError) {
    self.control.fail_next(err);
  }

  pub fn push_latency(&self, latency: Duration) {
    self.control.push_latency(latency);
  }

  pub fn hold(&self) {
    self.control.hold();
  }

  pub fn release(&self, count: usize) {
    self.control.release(count);
  }

  pub fn calls(&self, op: Op) -> usize {
    self.control.calls(op)
  }

  pub async fn wait_for_waiting(&self, count: usize) {
    self.control.wait_for_waiting(count).await;
  }

  pub async fn wait_for_calls(&self, op: Op, count: usize) {
    self.control.wait_for_calls(op, count).await;
  }

  fn not_found(&self, id: &str) -> RemoteError {
    RemoteError::not_found(format!("{} {} not found", T::entity_type(), id))
  }
}

#[async_trait]
impl<T: Entity> RemoteEndpoint<T> for InMemoryEndpoint<T> {
  /// The page is read when the call gets through the gate and delivered after
  /// the latency, so a slow page can predate writes made meanwhile.
  async fn list(&self, query: &PageQuery) -> Result<ListPage<T>, RemoteError> {
    self.control.enter(Op::List).await;

    let mut matching: Vec<T> = match query.effective_search() {
      Some(term) => self
        .records()
        .into_iter()
        .filter(|record| record.matches_search(term))
        .collect(),
      None => self.records(),
    };
    if let Some(column) = &query.sort_column {
      matching.sort_by_key(|record| record.sort_key(column));
      if query.sort_order == Some(SortOrder::Desc) {
        matching.reverse();
      }
    }

    let total_count = matching.len() as u64;
    let items = matching
      .into_iter()
      .skip(query.offset())
      .take(query.page_size as usize)
      .collect();
    self.control.deliver().await?;
    Ok(ListPage { items, total_count })
  }

  async fn create(&self, draft: &T::Draft) -> Result<String, RemoteError> {
    self.control.admit(Op::Create).await?;

    let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("{}-{}", self.prefix, n);
    let record = T::provisional(id.clone(), draft, self.names.as_ref());
    lock(&self.records).insert(0, record);
    Ok(id)
  }

  async fn update(&self, id: &str, patch: &T::Patch) -> Result<Option<T>, RemoteError> {
    self.control.admit(Op::Update).await?;

    let mut records = lock(&self.records);
    let record = records
      .iter_mut()
      .find(|record| record.id() == id)
      .ok_or_else(|| self.not_found(id))?;
    record.apply_patch(patch, self.names.as_ref());
    Ok(self.update_returns_record.then(|| record.clone()))
  }

  async fn delete(&self, id: &str) -> Result<(), RemoteError> {
    self.control.admit(Op::Delete).await?;

    let mut records = lock(&self.records);
    let index = records
      .iter()
      .position(|record| record.id() == id)
      .ok_or_else(|| self.not_found(id))?;
    records.remove(index);
    Ok(())
  }

  async fn search(&self, term: &str, limit: usize) -> Result<Vec<T>, RemoteError> {
    self.control.admit(Op::Search).await?;

    Ok(
      self
        .records()
        .into_iter()
        .filter(|record| record.matches_search(term))
        .take(limit)
        .collect(),
    )
  }
}

impl<T: Entity> NameLookup for InMemoryEndpoint<T> {
  fn display_name(&self, entity_type: &str, id: &str) -> Option<String> {
    if entity_type != T::entity_type() {
      return None;
    }
    lock(&self.records)
      .iter()
      .find(|record| record.id() == id)
      .map(|record| record.display_name().to_string())
  }
}

// ============================================================================
// Summary endpoint
// ============================================================================

/// Computes the dashboard summary from the in-memory ledgers on every read.
pub struct InMemorySummary {
  accounts: Arc<InMemoryEndpoint<Account>>,
  expenses: Arc<InMemoryEndpoint<Expense>>,
  incomes: Arc<InMemoryEndpoint<Income>>,
  scheduled: Arc<InMemoryEndpoint<ScheduledTransaction>>,
  control: CallControl,
}

impl InMemorySummary {
  pub fn new(
    accounts: Arc<InMemoryEndpoint<Account>>,
    expenses: Arc<InMemoryEndpoint<Expense>>,
    incomes: Arc<InMemoryEndpoint<Income>>,
    scheduled: Arc<InMemoryEndpoint<ScheduledTransaction>>,
  ) -> Self {
    Self {
      accounts,
      expenses,
      incomes,
      scheduled,
      control: CallControl::default(),
    }
  }

  pub fn control(&self) -> &CallControl {
    &self.control
  }
}

#[async_trait]
impl SummaryEndpoint for InMemorySummary {
  async fn summary(&self) -> Result<DashboardSummary, RemoteError> {
    self.control.admit(Op::Summary).await?;

    let accounts = self.accounts.records();
    let expense_total: i64 = self.expenses.records().iter().map(|e| e.amount).sum();
    let income_total: i64 = self.incomes.records().iter().map(|i| i.amount).sum();
    let opening: i64 = accounts.iter().map(|a| a.balance).sum();
    let scheduled = self.scheduled.records();
    let scheduled_net: i64 = scheduled
      .iter()
      .filter(|s| s.active)
      .map(|s| match s.direction {
        Direction::Income => s.amount,
        Direction::Expense => -s.amount,
      })
      .sum();

    Ok(DashboardSummary {
      total_balance: opening + income_total - expense_total,
      income_total,
      expense_total,
      net: income_total - expense_total,
      account_count: accounts.len(),
      active_schedules: scheduled.iter().filter(|s| s.active).count(),
      scheduled_net,
    })
  }
}

// ============================================================================
// Auth endpoint
// ============================================================================

struct UserRecord {
  password: String,
  profile: UserProfile,
}

/// Username/password authentication with opaque tokens.
#[derive(Default)]
pub struct InMemoryAuth {
  users: Mutex<HashMap<String, UserRecord>>,
  /// token -> username
  tokens: Mutex<HashMap<String, String>>,
  next_token: AtomicU64,
  control: CallControl,
}

impl InMemoryAuth {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_user(&self, username: &str, password: &str, display_name: &str) {
    lock(&self.users).insert(
      username.to_string(),
      UserRecord {
        password: password.to_string(),
        profile: UserProfile {
          username: username.to_string(),
          display_name: display_name.to_string(),
        },
      },
    );
  }

  /// Invalidate every issued token, as a server-side session expiry would.
  pub fn revoke_all(&self) {
    lock(&self.tokens).clear();
  }

  pub fn active_tokens(&self) -> usize {
    lock(&self.tokens).len()
  }

  pub fn control(&self) -> &CallControl {
    &self.control
  }
}

#[async_trait]
impl AuthEndpoint for InMemoryAuth {
  async fn login(&self, credentials: &Credentials) -> Result<AuthGrant, RemoteError> {
    self.control.admit(Op::Login).await?;

    let profile = {
      let users = lock(&self.users);
      match users.get(&credentials.username) {
        Some(user) if user.password == credentials.password => user.profile.clone(),
        _ => return Err(RemoteError::unauthorized("invalid username or password")),
      }
    };
    let n = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("token-{}", n);
    lock(&self.tokens).insert(token.clone(), profile.username.clone());
    Ok(AuthGrant { token, profile })
  }

  async fn profile(&self, token: &str) -> Result<UserProfile, RemoteError> {
    self.control.admit(Op::Profile).await?;

    let username = lock(&self.tokens)
      .get(token)
      .cloned()
      .ok_or_else(|| RemoteError::unauthorized("session expired"))?;
    lock(&self.users)
      .get(&username)
      .map(|user| user.profile.clone())
      .ok_or_else(|| RemoteError::unauthorized("user no longer exists"))
  }

  async fn logout(&self, token: &str) -> Result<(), RemoteError> {
    self.control.admit(Op::Logout).await?;
    lock(&self.tokens).remove(token);
    Ok(())
  }
}

// ============================================================================
// Complete backend
// ============================================================================

/// Every endpoint of the finance backend, with ledger records resolving their
/// account and category names the way a server-side join would.
pub struct InMemoryBackend {
  pub accounts: Arc<InMemoryEndpoint<Account>>,
  pub categories: Arc<InMemoryEndpoint<Category>>,
  pub expenses: Arc<InMemoryEndpoint<Expense>>,
  pub incomes: Arc<InMemoryEndpoint<Income>>,
  pub transfers: Arc<InMemoryEndpoint<Transfer>>,
  pub scheduled: Arc<InMemoryEndpoint<ScheduledTransaction>>,
  pub summary: Arc<InMemorySummary>,
  pub auth: Arc<InMemoryAuth>,
}

impl Default for InMemoryBackend {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryBackend {
  pub fn new() -> Self {
    let accounts: Arc<InMemoryEndpoint<Account>> = Arc::new(InMemoryEndpoint::new("acc"));
    let categories: Arc<InMemoryEndpoint<Category>> = Arc::new(InMemoryEndpoint::new("cat"));
    let names: Arc<dyn NameLookup> = Arc::new(
      RelatedNames::new()
        .with(accounts.clone())
        .with(categories.clone()),
    );

    let expenses = Arc::new(InMemoryEndpoint::new("exp").with_names(names.clone()));
    let incomes = Arc::new(InMemoryEndpoint::new("inc").with_names(names.clone()));
    let transfers = Arc::new(InMemoryEndpoint::new("trf").with_names(names.clone()));
    let scheduled = Arc::new(InMemoryEndpoint::new("sch").with_names(names));
    let summary = Arc::new(InMemorySummary::new(
      accounts.clone(),
      expenses.clone(),
      incomes.clone(),
      scheduled.clone(),
    ));

    Self {
      accounts,
      categories,
      expenses,
      incomes,
      transfers,
      scheduled,
      summary,
      auth: Arc::new(InMemoryAuth::new()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::finance::{AccountDraft, AccountKind, AccountPatch};

  fn account(id: &str, name: &str) -> Account {
    Account {
      id: id.to_string(),
      name: name.to_string(),
      kind: AccountKind::Checking,
      balance: 0,
    }
  }

  #[tokio::test]
  async fn test_list_pages_filters_and_sorts() {
    let endpoint = InMemoryEndpoint::new("acc");
    for (id, name) in [("acc-1", "Cash"), ("acc-2", "Brokerage"), ("acc-3", "Card")] {
      endpoint.seed(account(id, name));
    }

    let page = endpoint
      .list(&PageQuery::new(1, 2).with_sort("name", SortOrder::Asc))
      .await
      .expect("list");
    let names: Vec<_> = page.items.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Brokerage", "Card"]);
    assert_eq!(page.total_count, 3);

    let page = endpoint
      .list(&PageQuery::new(1, 10).with_search("ca"))
      .await
      .expect("search");
    assert_eq!(page.total_count, 2);
  }

  #[tokio::test]
  async fn test_create_continues_after_seeded_ids() {
    let endpoint = InMemoryEndpoint::new("acc");
    endpoint.seed(account("acc-7", "Old"));
    let id = endpoint
      .create(&AccountDraft {
        name: "New".to_string(),
        kind: AccountKind::Cash,
        balance: 0,
      })
      .await
      .expect("create");
    assert_eq!(id, "acc-8");
    assert_eq!(endpoint.records()[0].id, "acc-8");
  }

  #[tokio::test]
  async fn test_update_without_body_and_missing_record() {
    let endpoint = InMemoryEndpoint::new("acc").without_update_body();
    endpoint.seed(account("acc-1", "Cash"));
    let patch = AccountPatch {
      balance: Some(5),
      ..Default::default()
    };

    assert_eq!(endpoint.update("acc-1", &patch).await, Ok(None));
    assert_eq!(endpoint.records()[0].balance, 5);
    let err = endpoint.update("acc-9", &patch).await.expect_err("missing");
    assert_eq!(err.status, 404);
  }

  #[tokio::test]
  async fn test_injected_failure_is_consumed_once() {
    let endpoint: InMemoryEndpoint<Account> = InMemoryEndpoint::new("acc");
    endpoint.fail_next(RemoteError::server("boom"));
    assert!(endpoint.list(&PageQuery::default()).await.is_err());
    assert!(endpoint.list(&PageQuery::default()).await.is_ok());
    assert_eq!(endpoint.calls(Op::List), 2);
  }

  #[tokio::test]
  async fn test_auth_tokens_and_revocation() {
    let auth = InMemoryAuth::new();
    auth.add_user("ana", "secret", "Ana");

    let bad = Credentials::new("ana", "wrong");
    assert!(auth.login(&bad).await.is_err());

    let grant = auth
      .login(&Credentials::new("ana", "secret"))
      .await
      .expect("login");
    assert_eq!(auth.profile(&grant.token).await.map(|p| p.display_name), Ok("Ana".to_string()));

    auth.revoke_all();
    let err = auth.profile(&grant.token).await.expect_err("revoked");
    assert!(err.is_unauthorized());
  }
}
