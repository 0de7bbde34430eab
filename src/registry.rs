//! One store per entity type, built once and wired together.

use std::sync::Arc;

use crate::cache::{PageQuery, QueryCache};
use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::entity::{Entity, NameLookup, RelatedNames};
use crate::finance::{Account, Category, Expense, Income, ScheduledTransaction, Transfer};
use crate::remote::{AuthEndpoint, InMemoryBackend, RemoteEndpoint, SummaryEndpoint};
use crate::search::DebouncedSearch;
use crate::session::SessionLifecycle;
use crate::store::EntityStore;
use crate::sync::SynchronizationGraph;

/// Remote collaborators for every store.
#[derive(Clone)]
pub struct Endpoints {
  pub accounts: Arc<dyn RemoteEndpoint<Account>>,
  pub categories: Arc<dyn RemoteEndpoint<Category>>,
  pub expenses: Arc<dyn RemoteEndpoint<Expense>>,
  pub incomes: Arc<dyn RemoteEndpoint<Income>>,
  pub transfers: Arc<dyn RemoteEndpoint<Transfer>>,
  pub scheduled: Arc<dyn RemoteEndpoint<ScheduledTransaction>>,
  pub summary: Arc<dyn SummaryEndpoint>,
  pub auth: Arc<dyn AuthEndpoint>,
}

impl From<&InMemoryBackend> for Endpoints {
  fn from(backend: &InMemoryBackend) -> Self {
    Self {
      accounts: backend.accounts.clone(),
      categories: backend.categories.clone(),
      expenses: backend.expenses.clone(),
      incomes: backend.incomes.clone(),
      transfers: backend.transfers.clone(),
      scheduled: backend.scheduled.clone(),
      summary: backend.summary.clone(),
      auth: backend.auth.clone(),
    }
  }
}

/// Owns the session, every entity store and the dashboard for one process.
///
/// Ledger stores fill account and category names from the account and category
/// stores. The dashboard follows every ledger store, and logout or expiry resets
/// all of them.
pub struct StoreRegistry {
  config: Config,
  session: SessionLifecycle,
  graph: SynchronizationGraph,
  accounts: Arc<EntityStore<Account>>,
  categories: Arc<EntityStore<Category>>,
  expenses: Arc<EntityStore<Expense>>,
  incomes: Arc<EntityStore<Income>>,
  transfers: Arc<EntityStore<Transfer>>,
  scheduled: Arc<EntityStore<ScheduledTransaction>>,
  dashboard: Arc<Dashboard>,
}

impl StoreRegistry {
  /// Build and wire everything. Requires a tokio runtime.
  pub fn new(config: &Config, endpoints: Endpoints) -> Self {
    let session = SessionLifecycle::new(endpoints.auth, config.session.heartbeat());
    let sentinel = session.sentinel();

    let accounts = Arc::new(
      EntityStore::builder(endpoints.accounts)
        .cache(query_cache(config))
        .auth_sentinel(sentinel.clone())
        .build(),
    );
    let categories = Arc::new(
      EntityStore::builder(endpoints.categories)
        .cache(query_cache(config))
        .auth_sentinel(sentinel.clone())
        .build(),
    );
    let ledger_names: Arc<dyn NameLookup> = Arc::new(
      RelatedNames::new()
        .with(accounts.clone())
        .with(categories.clone()),
    );
    let account_names: Arc<dyn NameLookup> = accounts.clone();

    let expenses = Arc::new(
      EntityStore::builder(endpoints.expenses)
        .cache(query_cache(config))
        .names(ledger_names.clone())
        .auth_sentinel(sentinel.clone())
        .build(),
    );
    let incomes = Arc::new(
      EntityStore::builder(endpoints.incomes)
        .cache(query_cache(config))
        .names(ledger_names.clone())
        .auth_sentinel(sentinel.clone())
        .build(),
    );
    let transfers = Arc::new(
      EntityStore::builder(endpoints.transfers)
        .cache(query_cache(config))
        .names(account_names)
        .auth_sentinel(sentinel.clone())
        .build(),
    );
    let scheduled = Arc::new(
      EntityStore::builder(endpoints.scheduled)
        .cache(query_cache(config))
        .names(ledger_names)
        .auth_sentinel(sentinel.clone())
        .build(),
    );

    let graph = SynchronizationGraph::new(config.sync.refresh_delay());
    let dashboard = Arc::new(Dashboard::with_auth_sentinel(endpoints.summary, sentinel));
    dashboard.set_auto_refresh(config.sync.auto_refresh);
    dashboard.attach(
      &graph,
      vec![
        accounts.subscribe(),
        expenses.subscribe(),
        incomes.subscribe(),
        transfers.subscribe(),
        scheduled.subscribe(),
      ],
    );

    let registry = Self {
      config: config.clone(),
      session,
      graph,
      accounts,
      categories,
      expenses,
      incomes,
      transfers,
      scheduled,
      dashboard,
    };
    registry.register_cleanup();
    registry
  }

  /// Registry over a fresh in-memory backend.
  pub fn in_memory(config: &Config, backend: &InMemoryBackend) -> Self {
    Self::new(config, Endpoints::from(backend))
  }

  fn register_cleanup(&self) {
    let accounts = self.accounts.clone();
    let categories = self.categories.clone();
    let expenses = self.expenses.clone();
    let incomes = self.incomes.clone();
    let transfers = self.transfers.clone();
    let scheduled = self.scheduled.clone();
    let dashboard = self.dashboard.clone();
    self.session.add_cleanup(move || {
      accounts.reset();
      categories.reset();
      expenses.reset();
      incomes.reset();
      transfers.reset();
      scheduled.reset();
      dashboard.reset();
    });
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn session(&self) -> &SessionLifecycle {
    &self.session
  }

  pub fn graph(&self) -> &SynchronizationGraph {
    &self.graph
  }

  pub fn accounts(&self) -> &Arc<EntityStore<Account>> {
    &self.accounts
  }

  pub fn categories(&self) -> &Arc<EntityStore<Category>> {
    &self.categories
  }

  pub fn expenses(&self) -> &Arc<EntityStore<Expense>> {
    &self.expenses
  }

  pub fn incomes(&self) -> &Arc<EntityStore<Income>> {
    &self.incomes
  }

  pub fn transfers(&self) -> &Arc<EntityStore<Transfer>> {
    &self.transfers
  }

  pub fn scheduled(&self) -> &Arc<EntityStore<ScheduledTransaction>> {
    &self.scheduled
  }

  pub fn dashboard(&self) -> &Arc<Dashboard> {
    &self.dashboard
  }

  /// Debounced search for a table view over `store`.
  pub fn table_search<T: Entity>(&self, store: &Arc<EntityStore<T>>) -> DebouncedSearch<T> {
    DebouncedSearch::table(store.clone(), &self.config.search)
  }

  /// Debounced search for an inline form lookup over `store`.
  pub fn inline_search<T: Entity>(&self, store: &Arc<EntityStore<T>>) -> DebouncedSearch<T> {
    DebouncedSearch::inline(store.clone(), &self.config.search)
  }

  /// Load the reference stores first so ledger rows can resolve names, then the
  /// ledgers and the dashboard concurrently.
  pub async fn load_all(&self, query: PageQuery) {
    let _ = futures::join!(
      self.accounts.load_page(query.clone()),
      self.categories.load_page(query.clone()),
    );
    let _ = futures::join!(
      self.expenses.load_page(query.clone()),
      self.incomes.load_page(query.clone()),
      self.transfers.load_page(query.clone()),
      self.scheduled.load_page(query),
      self.dashboard.load(),
    );
  }

  /// Clear every store and the dashboard.
  pub fn reset_all(&self) {
    self.accounts.reset();
    self.categories.reset();
    self.expenses.reset();
    self.incomes.reset();
    self.transfers.reset();
    self.scheduled.reset();
    self.dashboard.reset();
  }
}

fn query_cache<T>(config: &Config) -> QueryCache<T>
where
  T: Entity,
{
  if config.cache.enabled {
    QueryCache::new(config.cache.ttl())
  } else {
    QueryCache::disabled()
  }
}
