//! Optimistic apply, confirm and rollback protocol shared by every entity store.
//!
//! A mutation goes through these steps:
//! 1. Capture a snapshot of the record it touches (nothing for a create)
//! 2. Apply the edit to the store state and adjust `total_count`
//! 3. Issue the remote call on a detached task
//! 4. On success, reconcile (swap the temporary id, take the server's record)
//!    and advance the change signal
//! 5. On failure, restore the snapshot and set the error in one step
//!
//! Mutations of the same id are serialized by a per-id lock held from step 1 to
//! step 5, so a slow rollback can never clobber a newer optimistic edit.
//!
//! A load or reset that lands while the call is in flight replaces the page the
//! snapshot was taken from. Settling then never puts a snapshot back or adjusts
//! `total_count` for a record the newer page does not show.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::run_detached;
use super::state::{StoreCore, StoreState};
use crate::entity::{Entity, TEMP_ID_PREFIX};
use crate::error::{RemoteError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Create,
  Update,
  Delete,
}

impl MutationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }
}

/// What the server answered to a mutation.
#[derive(Debug, Clone)]
pub enum Confirmation<T> {
  /// Server-assigned id of a created record
  Created(String),
  /// Stored record, if the endpoint returns one
  Updated(Option<T>),
  Deleted,
}

type Edit<T> = Box<dyn FnOnce(&mut T) + Send>;

enum Change<T> {
  Insert(T),
  Merge(Edit<T>),
  Remove,
}

/// Record as it was before the optimistic edit, with its list position.
struct Snapshot<T> {
  index: usize,
  record: T,
}

/// One in-flight optimistic mutation.
pub struct PendingMutation<T> {
  kind: MutationKind,
  /// Record id, or the temporary id for a create
  target: String,
  change: Option<Change<T>>,
  snapshot_before: Option<Snapshot<T>>,
  /// Load generation the edit was applied on
  generation: u64,
}

impl<T: Entity> PendingMutation<T> {
  /// Insert a provisional record carrying a temporary id.
  pub fn create(record: T) -> Self {
    Self {
      kind: MutationKind::Create,
      target: record.id().to_string(),
      change: Some(Change::Insert(record)),
      snapshot_before: None,
      generation: 0,
    }
  }

  pub fn update(id: impl Into<String>, edit: impl FnOnce(&mut T) + Send + 'static) -> Self {
    Self {
      kind: MutationKind::Update,
      target: id.into(),
      change: Some(Change::Merge(Box::new(edit))),
      snapshot_before: None,
      generation: 0,
    }
  }

  pub fn delete(id: impl Into<String>) -> Self {
    Self {
      kind: MutationKind::Delete,
      target: id.into(),
      change: Some(Change::Remove),
      snapshot_before: None,
      generation: 0,
    }
  }

  pub fn kind(&self) -> MutationKind {
    self.kind
  }

  pub fn target(&self) -> &str {
    &self.target
  }

  /// Id whose lock must be held. Temporary ids are unique and need none.
  fn lock_key(&self) -> Option<&str> {
    match self.kind {
      MutationKind::Create => None,
      MutationKind::Update | MutationKind::Delete => Some(&self.target),
    }
  }

  fn not_found(&self) -> StoreError {
    StoreError::NotFound {
      entity_type: T::entity_type(),
      id: self.target.clone(),
    }
  }

  /// Capture the snapshot and apply the edit.
  fn apply(&mut self, state: &mut StoreState<T>, generation: u64) -> Result<(), StoreError> {
    self.generation = generation;
    match self.change.take() {
      Some(Change::Insert(record)) => {
        // Most recent first
        state.items.insert(0, record);
        state.total_count += 1;
      }
      Some(Change::Merge(edit)) => {
        let index = state.position(&self.target).ok_or_else(|| self.not_found())?;
        let record = &mut state.items[index];
        self.snapshot_before = Some(Snapshot {
          index,
          record: record.clone(),
        });
        edit(record);
      }
      Some(Change::Remove) => {
        let index = state.position(&self.target).ok_or_else(|| self.not_found())?;
        let record = state.items.remove(index);
        state.total_count = state.total_count.saturating_sub(1);
        self.snapshot_before = Some(Snapshot { index, record });
      }
      None => {}
    }
    Ok(())
  }

  /// Reconcile the optimistic edit with the server's answer.
  fn commit(self, state: &mut StoreState<T>, confirmation: &Confirmation<T>) {
    match (self.kind, confirmation) {
      (MutationKind::Create, Confirmation::Created(server_id)) => {
        let Some(index) = state.position(&self.target) else {
          return;
        };
        if state.contains(server_id) {
          // A reload already brought the confirmed record
          state.items.remove(index);
          state.total_count = state.total_count.saturating_sub(1);
        } else {
          state.items[index].set_id(server_id.clone());
        }
      }
      (MutationKind::Update, Confirmation::Updated(Some(record))) => {
        if let Some(index) = state.position(&self.target) {
          state.items[index] = record.clone();
        }
      }
      (MutationKind::Delete, _) => {
        // A reload may have re-inserted the record while the delete was in flight
        if let Some(index) = state.position(&self.target) {
          state.items.remove(index);
          state.total_count = state.total_count.saturating_sub(1);
        }
      }
      _ => {}
    }
  }

  /// Undo the optimistic edit. `replaced` is set when a load or reset has
  /// swapped the page since the edit was applied.
  fn rollback(self, state: &mut StoreState<T>, replaced: bool) {
    match self.kind {
      MutationKind::Create => {
        // Present only if still counted, possibly carried over by a newer page
        if let Some(index) = state.position(&self.target) {
          state.items.remove(index);
          state.total_count = state.total_count.saturating_sub(1);
        }
      }
      MutationKind::Update => {
        if replaced {
          return;
        }
        if let (Some(snapshot), Some(index)) = (self.snapshot_before, state.position(&self.target))
        {
          state.items[index] = snapshot.record;
        }
      }
      MutationKind::Delete => {
        if replaced {
          return;
        }
        let Some(snapshot) = self.snapshot_before else {
          return;
        };
        if state.contains(&self.target) {
          return;
        }
        // Original position, clamped if an earlier load shortened the list
        let index = snapshot.index.min(state.items.len());
        state.items.insert(index, snapshot.record);
        state.total_count += 1;
      }
    }
  }
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Holds the per-id lock; removes the map entry when nobody else wants it.
struct IdGuard {
  id: String,
  guard: Option<OwnedMutexGuard<()>>,
  locks: LockMap,
}

impl Drop for IdGuard {
  fn drop(&mut self) {
    self.guard.take();
    let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(lock) = locks.get(&self.id) {
      if Arc::strong_count(lock) == 1 {
        locks.remove(&self.id);
      }
    }
  }
}

/// Runs optimistic mutations for one entity store.
pub struct MutationCoordinator<T> {
  locks: LockMap,
  temp_seq: AtomicU64,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Default for MutationCoordinator<T> {
  fn default() -> Self {
    Self {
      locks: Arc::new(Mutex::new(HashMap::new())),
      temp_seq: AtomicU64::new(0),
      _marker: PhantomData,
    }
  }
}

impl<T: Entity> MutationCoordinator<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Allocate a temporary id for an optimistic insert.
  pub fn next_temp_id(&self) -> String {
    let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{}{}-{}", TEMP_ID_PREFIX, T::entity_type(), seq)
  }

  /// Number of ids with a mutation holding or waiting for their lock.
  pub fn locked_ids(&self) -> usize {
    self
      .locks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  async fn lock_id(&self, id: &str) -> IdGuard {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      Arc::clone(locks.entry(id.to_string()).or_default())
    };
    let guard = lock.lock_owned().await;
    IdGuard {
      id: id.to_string(),
      guard: Some(guard),
      locks: Arc::clone(&self.locks),
    }
  }

  /// Apply `pending` optimistically, then settle it with the result of `call`.
  ///
  /// The remote call and the commit or rollback run on a detached task: once the
  /// edit is applied, dropping the returned future does not leave it unsettled.
  pub(crate) async fn run<Fut>(
    &self,
    core: &Arc<StoreCore<T>>,
    mut pending: PendingMutation<T>,
    call: Fut,
  ) -> Result<Confirmation<T>, StoreError>
  where
    Fut: Future<Output = Result<Confirmation<T>, RemoteError>> + Send + 'static,
  {
    let guard = match pending.lock_key() {
      Some(id) => Some(self.lock_id(id).await),
      None => None,
    };

    {
      let mut state = core.state();
      if let Err(err) = pending.apply(&mut state, core.generation()) {
        state.error = Some(err.user_message());
        return Err(err);
      }
    }
    core.cache.invalidate_all();
    debug!(
      entity = T::entity_type(),
      kind = pending.kind().as_str(),
      id = %pending.target(),
      "applied optimistic mutation"
    );

    let core = Arc::clone(core);
    run_detached(async move {
      let _guard = guard;
      let result = call.await;
      settle(&core, pending, result)
    })
    .await
  }
}

fn settle<T: Entity>(
  core: &StoreCore<T>,
  pending: PendingMutation<T>,
  result: Result<Confirmation<T>, RemoteError>,
) -> Result<Confirmation<T>, StoreError> {
  let kind = pending.kind();
  let target = pending.target().to_string();

  match result {
    Ok(confirmation) => {
      {
        let mut state = core.state();
        pending.commit(&mut state, &confirmation);
        let stamp = core.signal.mark();
        state.last_mutated_at = Some(stamp.at);
      }
      // Pages fetched while the call was in flight predate the commit
      core.cache.invalidate_all();
      info!(
        entity = T::entity_type(),
        kind = kind.as_str(),
        id = %target,
        "mutation committed"
      );
      Ok(confirmation)
    }
    Err(err) => {
      let replaced = {
        let mut state = core.state();
        let replaced = !core.is_latest(pending.generation);
        pending.rollback(&mut state, replaced);
        state.error = Some(err.message.clone());
        replaced
      };
      warn!(
        entity = T::entity_type(),
        kind = kind.as_str(),
        id = %target,
        replaced,
        error = %err,
        "mutation rolled back"
      );
      core.escalate(&err);
      Err(StoreError::Remote(err))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{PageQuery, QueryCache, DEFAULT_TTL};
  use crate::finance::{Account, AccountKind};

  fn account(id: &str, name: &str, balance: i64) -> Account {
    Account {
      id: id.to_string(),
      name: name.to_string(),
      kind: AccountKind::Checking,
      balance,
    }
  }

  fn core_with(items: Vec<Account>) -> Arc<StoreCore<Account>> {
    let core = Arc::new(StoreCore::new(QueryCache::new(DEFAULT_TTL), None));
    {
      let mut state = core.state();
      state.total_count = items.len() as u64;
      state.items = items;
    }
    core
  }

  fn ids(core: &StoreCore<Account>) -> Vec<String> {
    core.state().items.iter().map(|a| a.id.clone()).collect()
  }

  #[test]
  fn test_temp_ids_are_unique_and_marked() {
    let coordinator: MutationCoordinator<Account> = MutationCoordinator::new();
    let a = coordinator.next_temp_id();
    let b = coordinator.next_temp_id();
    assert_ne!(a, b);
    assert!(crate::entity::is_temporary_id(&a));
  }

  #[tokio::test]
  async fn test_failed_delete_restores_original_position() {
    let core = core_with(vec![
      account("a", "A", 1),
      account("b", "B", 2),
      account("c", "C", 3),
    ]);
    let coordinator = MutationCoordinator::new();

    let result = coordinator
      .run(&core, PendingMutation::delete("b"), async {
        Err(RemoteError::server("locked"))
      })
      .await;

    assert!(matches!(result, Err(StoreError::Remote(_))));
    assert_eq!(ids(&core), vec!["a", "b", "c"]);
    assert_eq!(core.state().total_count, 3);
    assert_eq!(core.state().error.as_deref(), Some("locked"));
    assert!(core.signal.last().is_none());
  }

  #[tokio::test]
  async fn test_failed_update_restores_snapshot() {
    let core = core_with(vec![account("a", "Checking", 100)]);
    let coordinator = MutationCoordinator::new();

    let pending = PendingMutation::update("a", |a: &mut Account| a.name = "Renamed".to_string());
    let _ = coordinator
      .run(&core, pending, async { Err(RemoteError::network("offline")) })
      .await;

    assert_eq!(core.state().items[0].name, "Checking");
  }

  #[tokio::test]
  async fn test_committed_create_swaps_temp_id() {
    let core = core_with(vec![account("a", "A", 1)]);
    let coordinator = MutationCoordinator::new();
    let temp = coordinator.next_temp_id();

    coordinator
      .run(
        &core,
        PendingMutation::create(account(&temp, "New", 0)),
        async { Ok(Confirmation::Created("acc-9".to_string())) },
      )
      .await
      .expect("commit");

    assert_eq!(ids(&core), vec!["acc-9", "a"]);
    assert_eq!(core.state().total_count, 2);
    assert_eq!(core.signal.last().map(|s| s.version), Some(1));
    assert!(core.state().last_mutated_at.is_some());
  }

  #[tokio::test]
  async fn test_update_of_missing_record_is_rejected_without_remote_call() {
    let core = core_with(vec![]);
    let coordinator = MutationCoordinator::new();
    let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&called);

    let result = coordinator
      .run(
        &core,
        PendingMutation::update("ghost", |_: &mut Account| {}),
        async move {
          flag.store(true, Ordering::SeqCst);
          Ok(Confirmation::Updated(None))
        },
      )
      .await;

    assert!(matches!(result, Err(StoreError::NotFound { .. })));
    assert!(!called.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_commit_removes_record_reinserted_by_reload() {
    let core = core_with(vec![account("a", "A", 1), account("b", "B", 2)]);
    let coordinator = MutationCoordinator::new();
    let reload_core = Arc::clone(&core);

    coordinator
      .run(&core, PendingMutation::delete("a"), async move {
        // Server still listed the record when a reload raced the delete
        let mut state = reload_core.state();
        state.items = vec![account("a", "A", 1), account("b", "B", 2)];
        state.total_count = 2;
        drop(state);
        Ok(Confirmation::Deleted)
      })
      .await
      .expect("commit");

    assert_eq!(ids(&core), vec!["b"]);
    assert_eq!(core.state().total_count, 1);
  }

  #[tokio::test]
  async fn test_mutation_invalidates_cache() {
    let core = core_with(vec![account("a", "A", 1)]);
    core.cache.put(&PageQuery::new(1, 10), vec![account("a", "A", 1)], 1);
    let coordinator = MutationCoordinator::new();

    let _ = coordinator
      .run(&core, PendingMutation::delete("a"), async {
        Err(RemoteError::server("nope"))
      })
      .await;

    assert!(core.cache.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_same_id_mutations_serialize() {
    let core = core_with(vec![account("a", "Checking", 100)]);
    let coordinator = Arc::new(MutationCoordinator::new());

    // First update is slow and fails; second must apply on top of the rollback
    let first = {
      let (core, coordinator) = (Arc::clone(&core), Arc::clone(&coordinator));
      tokio::spawn(async move {
        let pending = PendingMutation::update("a", |a: &mut Account| a.name = "First".to_string());
        coordinator
          .run(&core, pending, async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Err(RemoteError::server("timeout"))
          })
          .await
      })
    };
    tokio::task::yield_now().await;
    assert_eq!(core.state().items[0].name, "First");

    let second = {
      let (core, coordinator) = (Arc::clone(&core), Arc::clone(&coordinator));
      tokio::spawn(async move {
        let pending =
          PendingMutation::update("a", |a: &mut Account| a.name = "Second".to_string());
        coordinator
          .run(&core, pending, async { Ok(Confirmation::Updated(None)) })
          .await
      })
    };
    tokio::task::yield_now().await;
    // Still waiting for the first mutation's lock
    assert_eq!(core.state().items[0].name, "First");

    assert!(first.await.expect("join").is_err());
    assert!(second.await.expect("join").is_ok());
    assert_eq!(core.state().items[0].name, "Second");
    assert_eq!(coordinator.locked_ids(), 0);
  }
}
