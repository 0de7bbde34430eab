//! The per-entity-type store: load, search, create, update, delete.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::mutation::{Confirmation, MutationCoordinator, PendingMutation};
use super::run_detached;
use super::state::{StoreCore, StoreState};
use crate::cache::{CacheSource, PageQuery, QueryCache, QueryKey, DEFAULT_TTL};
use crate::entity::{is_temporary_id, Entity, NameLookup, NoNames};
use crate::error::{RemoteError, StoreError, ValidationError};
use crate::remote::{ListPage, RemoteEndpoint};
use crate::session::AuthSentinel;
use crate::signal::{ChangeSignal, ChangeSubscription};

/// List requests per load when local mutations keep outdating the answer.
const MAX_PAGE_ATTEMPTS: usize = 3;

/// Single source of truth for one entity type's visible data.
///
/// State is only changed through the operations below. Failures never escape as
/// panics: they are recorded in [`StoreState::error`], and mutations also return
/// them so a caller can keep a form open.
pub struct EntityStore<T: Entity> {
  core: Arc<StoreCore<T>>,
  coordinator: MutationCoordinator<T>,
  endpoint: Arc<dyn RemoteEndpoint<T>>,
  /// Names of related records for provisional rows
  names: Arc<dyn NameLookup>,
  last_query: Mutex<Option<PageQuery>>,
}

/// Builder for [`EntityStore`].
pub struct EntityStoreBuilder<T: Entity> {
  endpoint: Arc<dyn RemoteEndpoint<T>>,
  cache: Option<QueryCache<T>>,
  names: Option<Arc<dyn NameLookup>>,
  sentinel: Option<Arc<dyn AuthSentinel>>,
}

impl<T: Entity> EntityStoreBuilder<T> {
  pub fn cache(mut self, cache: QueryCache<T>) -> Self {
    self.cache = Some(cache);
    self
  }

  /// Lookup used to fill denormalized names. Must not resolve through this store.
  pub fn names(mut self, names: Arc<dyn NameLookup>) -> Self {
    self.names = Some(names);
    self
  }

  /// Receiver of 401 failures raised by this store's calls.
  pub fn auth_sentinel(mut self, sentinel: Arc<dyn AuthSentinel>) -> Self {
    self.sentinel = Some(sentinel);
    self
  }

  pub fn build(self) -> EntityStore<T> {
    let cache = self.cache.unwrap_or_else(|| QueryCache::new(DEFAULT_TTL));
    EntityStore {
      core: Arc::new(StoreCore::new(cache, self.sentinel)),
      coordinator: MutationCoordinator::new(),
      endpoint: self.endpoint,
      names: self.names.unwrap_or_else(|| Arc::new(NoNames)),
      last_query: Mutex::new(None),
    }
  }
}

impl<T: Entity> EntityStore<T> {
  pub fn new(endpoint: Arc<dyn RemoteEndpoint<T>>) -> Self {
    Self::builder(endpoint).build()
  }

  pub fn builder(endpoint: Arc<dyn RemoteEndpoint<T>>) -> EntityStoreBuilder<T> {
    EntityStoreBuilder {
      endpoint,
      cache: None,
      names: None,
      sentinel: None,
    }
  }

  // Accessors

  /// Copy of the current state.
  pub fn snapshot(&self) -> StoreState<T> {
    self.core.state().clone()
  }

  pub fn items(&self) -> Vec<T> {
    self.core.state().items.clone()
  }

  pub fn get(&self, id: &str) -> Option<T> {
    self.core.state().get(id).cloned()
  }

  pub fn total_count(&self) -> u64 {
    self.core.state().total_count
  }

  pub fn is_loading(&self) -> bool {
    self.core.state().loading
  }

  pub fn error(&self) -> Option<String> {
    self.core.state().error.clone()
  }

  pub fn last_mutated_at(&self) -> Option<DateTime<Utc>> {
    self.core.state().last_mutated_at
  }

  pub fn last_query(&self) -> Option<PageQuery> {
    self.query_slot().clone()
  }

  pub fn cache(&self) -> &QueryCache<T> {
    &self.core.cache
  }

  pub fn change_signal(&self) -> &ChangeSignal {
    &self.core.signal
  }

  pub fn subscribe(&self) -> ChangeSubscription {
    self.core.signal.subscribe()
  }

  pub fn coordinator(&self) -> &MutationCoordinator<T> {
    &self.coordinator
  }

  fn query_slot(&self) -> MutexGuard<'_, Option<PageQuery>> {
    self
      .last_query
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  // Reads

  /// Load one page, from the cache when a fresh entry exists.
  ///
  /// On failure the previous items stay in place and `error` is set. If a newer
  /// load is issued before this one resolves, this one's result is discarded.
  pub async fn load_page(&self, query: PageQuery) -> StoreState<T> {
    if let Err(err) = query.validate() {
      self.core.state().error = Some(StoreError::from(err).user_message());
      return self.snapshot();
    }
    *self.query_slot() = Some(query.clone());
    let generation = self.core.next_generation();

    if let Some(entry) = self.core.cache.get(&query) {
      debug!(entity = T::entity_type(), query = %entry.key, "cache hit");
      let mut state = self.core.state();
      state.replace_page(entry.items, entry.total_count);
      state.loading = false;
      state.error = None;
      state.source = Some(CacheSource::Cache);
      return state.clone();
    }

    self.fetch(generation, query).await
  }

  /// Re-issue the last query, bypassing the cache.
  pub async fn reload(&self) -> StoreState<T> {
    let Some(query) = self.last_query() else {
      return self.snapshot();
    };
    let generation = self.core.next_generation();
    self.fetch(generation, query).await
  }

  async fn fetch(&self, generation: u64, query: PageQuery) -> StoreState<T> {
    let epoch = self.core.cache.epoch();
    self.core.state().loading = true;
    debug!(
      entity = T::entity_type(),
      query = %query.description(),
      generation,
      "fetching page"
    );

    let core = Arc::clone(&self.core);
    let endpoint = Arc::clone(&self.endpoint);
    let outcome = run_detached(async move {
      let mut epoch = epoch;
      let mut attempt = 1;
      loop {
        let result = endpoint.list(&query).await;
        // A mutation applied or committed meanwhile is missing from this page
        let outdated = result.is_ok() && core.cache.epoch() != epoch;
        if outdated && core.is_latest(generation) && attempt < MAX_PAGE_ATTEMPTS {
          debug!(
            entity = T::entity_type(),
            query = %query.description(),
            attempt,
            "page predates a local mutation, fetching again"
          );
          epoch = core.cache.epoch();
          attempt += 1;
          continue;
        }
        apply_page(&core, generation, epoch, &query, result);
        return Ok::<_, StoreError>(());
      }
    })
    .await;

    if outcome.is_err() && self.core.is_latest(generation) {
      self.core.state().loading = false;
    }
    self.snapshot()
  }

  /// Unpaginated lookup for autocomplete. Does not touch the store state.
  pub async fn search(&self, term: &str, limit: usize) -> Result<Vec<T>, StoreError> {
    let term = term.trim();
    if term.is_empty() || limit == 0 {
      return Ok(Vec::new());
    }
    match self.endpoint.search(term, limit).await {
      Ok(mut items) => {
        items.truncate(limit);
        Ok(items)
      }
      Err(err) => {
        self.core.escalate(&err);
        Err(err.into())
      }
    }
  }

  // Mutations

  /// Create a record. A provisional row with a temporary id is visible until the
  /// server answers; on success it carries the server id, which is returned.
  pub async fn create(&self, draft: T::Draft) -> Result<String, StoreError> {
    T::validate_draft(&draft).map_err(|err| self.reject(err))?;

    let temp_id = self.coordinator.next_temp_id();
    let record = T::provisional(temp_id, &draft, self.names.as_ref());
    let endpoint = Arc::clone(&self.endpoint);

    let confirmation = self
      .coordinator
      .run(&self.core, PendingMutation::create(record), async move {
        endpoint.create(&draft).await.map(Confirmation::Created)
      })
      .await?;

    match confirmation {
      Confirmation::Created(id) => Ok(id),
      _ => Err(StoreError::Remote(RemoteError::server(
        "create was not confirmed with an id",
      ))),
    }
  }

  /// Merge a patch into a record.
  pub async fn update(&self, id: &str, patch: T::Patch) -> Result<(), StoreError> {
    self.check_confirmed(id)?;
    T::validate_patch(&patch).map_err(|err| self.reject(err))?;

    let names = Arc::clone(&self.names);
    let local = patch.clone();
    let pending = PendingMutation::update(id, move |record: &mut T| {
      record.apply_patch(&local, names.as_ref())
    });
    let endpoint = Arc::clone(&self.endpoint);
    let remote_id = id.to_string();

    self
      .coordinator
      .run(&self.core, pending, async move {
        endpoint
          .update(&remote_id, &patch)
          .await
          .map(Confirmation::Updated)
      })
      .await
      .map(|_| ())
  }

  /// Remove a record. It disappears immediately and comes back if the server refuses.
  pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
    self.check_confirmed(id)?;

    let endpoint = Arc::clone(&self.endpoint);
    let remote_id = id.to_string();

    self
      .coordinator
      .run(&self.core, PendingMutation::delete(id), async move {
        endpoint
          .delete(&remote_id)
          .await
          .map(|_| Confirmation::Deleted)
      })
      .await
      .map(|_| ())
  }

  pub fn clear_error(&self) {
    self.core.state().error = None;
  }

  /// Forget everything: items, metadata, cache and in-flight loads.
  pub fn reset(&self) {
    self.core.next_generation();
    self.core.cache.invalidate_all();
    *self.query_slot() = None;
    *self.core.state() = StoreState::default();
  }

  /// The server cannot edit a record it has not confirmed yet.
  fn check_confirmed(&self, id: &str) -> Result<(), StoreError> {
    if is_temporary_id(id) {
      return Err(self.reject(ValidationError::new(
        "id",
        "record is still being saved",
      )));
    }
    Ok(())
  }

  fn reject(&self, err: ValidationError) -> StoreError {
    let err = StoreError::from(err);
    self.core.state().error = Some(err.user_message());
    err
  }
}

fn apply_page<T: Entity>(
  core: &StoreCore<T>,
  generation: u64,
  epoch: u64,
  query: &PageQuery,
  result: Result<ListPage<T>, RemoteError>,
) {
  match result {
    Ok(page) => {
      core
        .cache
        .put_if_current(epoch, query, page.items.clone(), page.total_count);
      if !core.is_latest(generation) {
        debug!(
          entity = T::entity_type(),
          query = %query.description(),
          generation,
          "discarding stale response"
        );
        return;
      }
      let mut state = core.state();
      state.replace_page(page.items, page.total_count);
      state.loading = false;
      state.error = None;
      state.source = Some(CacheSource::Network);
    }
    Err(err) => {
      warn!(
        entity = T::entity_type(),
        query = %query.description(),
        error = %err,
        "page load failed"
      );
      if core.is_latest(generation) {
        let mut state = core.state();
        state.loading = false;
        state.error = Some(err.message.clone());
      }
      core.escalate(&err);
    }
  }
}

impl<T: Entity> NameLookup for EntityStore<T> {
  fn display_name(&self, entity_type: &str, id: &str) -> Option<String> {
    if entity_type != T::entity_type() {
      return None;
    }
    self
      .core
      .state()
      .get(id)
      .map(|record| record.display_name().to_string())
  }
}
