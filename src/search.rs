//! Search-as-you-type bound to one entity store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::PageQuery;
use crate::config::SearchConfig;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::store::{EntityStore, StoreState};

/// Debounced list search. Each input restarts the quiet period; only the last
/// term is sent, with the page reset to 1.
pub struct DebouncedSearch<T: Entity> {
  store: Arc<EntityStore<T>>,
  delay: Duration,
  autocomplete_limit: usize,
  term: Mutex<String>,
  pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Entity> DebouncedSearch<T> {
  pub fn new(store: Arc<EntityStore<T>>, delay: Duration) -> Self {
    Self {
      store,
      delay,
      autocomplete_limit: SearchConfig::default().autocomplete_limit,
      term: Mutex::new(String::new()),
      pending: Mutex::new(None),
    }
  }

  /// Search box above a table.
  pub fn table(store: Arc<EntityStore<T>>, config: &SearchConfig) -> Self {
    Self::new(store, config.table_debounce()).with_autocomplete_limit(config.autocomplete_limit)
  }

  /// Inline lookup inside a form.
  pub fn inline(store: Arc<EntityStore<T>>, config: &SearchConfig) -> Self {
    Self::new(store, config.inline_debounce()).with_autocomplete_limit(config.autocomplete_limit)
  }

  pub fn with_autocomplete_limit(mut self, limit: usize) -> Self {
    self.autocomplete_limit = limit;
    self
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  /// Latest input.
  pub fn term(&self) -> String {
    lock(&self.term).clone()
  }

  /// Record a keystroke. Requires a tokio runtime.
  pub fn input(&self, term: impl Into<String>) {
    let term = term.into();
    *lock(&self.term) = term.clone();

    let store = Arc::clone(&self.store);
    let delay = self.delay;
    let mut pending = lock(&self.pending);
    if let Some(previous) = pending.take() {
      previous.abort();
    }
    *pending = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let query = search_query(&store, &term);
      debug!(entity = T::entity_type(), term = %term, "debounced search");
      store.load_page(query).await;
    }));
  }

  /// Run the pending search now instead of waiting.
  pub async fn flush(&self) -> StoreState<T> {
    self.cancel();
    let query = search_query(&self.store, &self.term());
    self.store.load_page(query).await
  }

  /// Drop the pending search without running it.
  pub fn cancel(&self) {
    if let Some(pending) = lock(&self.pending).take() {
      pending.abort();
    }
  }

  pub fn is_pending(&self) -> bool {
    lock(&self.pending)
      .as_ref()
      .is_some_and(|handle| !handle.is_finished())
  }

  /// Unpaginated lookup for a selection dropdown.
  pub async fn autocomplete(&self, term: &str) -> Result<Vec<T>, StoreError> {
    self.store.search(term, self.autocomplete_limit).await
  }
}

impl<T: Entity> Drop for DebouncedSearch<T> {
  fn drop(&mut self) {
    self.cancel();
  }
}

/// Last query of the store with the new term and the page reset.
fn search_query<T: Entity>(store: &EntityStore<T>, term: &str) -> PageQuery {
  let mut query = store.last_query().unwrap_or_default();
  query.page = 1;
  query.search_term = Some(term.trim().to_string()).filter(|t| !t.is_empty());
  query
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SortOrder;
  use crate::finance::{Account, AccountKind};
  use crate::remote::{InMemoryEndpoint, Op};

  fn setup() -> (Arc<InMemoryEndpoint<Account>>, Arc<EntityStore<Account>>) {
    let endpoint = Arc::new(InMemoryEndpoint::new("acc"));
    for (i, name) in ["Checking", "Savings", "Credit card", "Cash"].iter().enumerate() {
      endpoint.seed(Account {
        id: format!("acc-{}", i + 1),
        name: name.to_string(),
        kind: AccountKind::Checking,
        balance: 0,
      });
    }
    let store = Arc::new(EntityStore::new(endpoint.clone()));
    (endpoint, store)
  }

  #[tokio::test(start_paused = true)]
  async fn test_typing_burst_sends_one_query() {
    let (endpoint, store) = setup();
    let search = DebouncedSearch::table(store.clone(), &SearchConfig::default());

    for term in ["c", "ca", "cas"] {
      search.input(term);
      tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(endpoint.calls(Op::List), 0);
    assert!(search.is_pending());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(endpoint.calls(Op::List), 1);
    let names: Vec<_> = store.items().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["Cash"]);
    assert_eq!(search.term(), "cas");
  }

  #[tokio::test(start_paused = true)]
  async fn test_inline_search_uses_shorter_delay() {
    let (endpoint, store) = setup();
    let search = DebouncedSearch::inline(store, &SearchConfig::default());

    search.input("sav");
    tokio::time::sleep(Duration::from_millis(310)).await;
    assert_eq!(endpoint.calls(Op::List), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_search_resets_page_and_keeps_sort() {
    let (_endpoint, store) = setup();
    store
      .load_page(PageQuery::new(2, 2).with_sort("name", SortOrder::Desc))
      .await;
    let search = DebouncedSearch::table(store.clone(), &SearchConfig::default());

    search.input("  c ");
    let state = search.flush().await;

    let query = store.last_query().expect("query");
    assert_eq!(query.page, 1);
    assert_eq!(query.page_size, 2);
    assert_eq!(query.search_term.as_deref(), Some("c"));
    assert_eq!(query.sort_order, Some(SortOrder::Desc));
    assert_eq!(state.total_count, 3);
    assert!(!search.is_pending());
  }

  #[tokio::test(start_paused = true)]
  async fn test_clearing_input_lists_everything() {
    let (_endpoint, store) = setup();
    let search = DebouncedSearch::table(store.clone(), &SearchConfig::default());

    search.input("cash");
    search.flush().await;
    assert_eq!(store.total_count(), 1);

    search.input("   ");
    search.flush().await;
    assert_eq!(store.total_count(), 4);
    assert_eq!(store.last_query().and_then(|q| q.search_term), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_search_cancels_pending_query() {
    let (endpoint, store) = setup();
    let search = DebouncedSearch::table(store, &SearchConfig::default());

    search.input("cash");
    drop(search);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(endpoint.calls(Op::List), 0);
  }

  #[tokio::test]
  async fn test_autocomplete_respects_limit() {
    let (_endpoint, store) = setup();
    let search = DebouncedSearch::table(store, &SearchConfig::default()).with_autocomplete_limit(1);

    let found = search.autocomplete("c").await.expect("autocomplete");
    assert_eq!(found.len(), 1);
  }
}
