//! Generic entity store engine.
//!
//! One [`EntityStore`] per entity type holds the visible slice of records, a TTL
//! query cache, and a change signal. Mutations go through the
//! [`MutationCoordinator`] so every entity type gets the same optimistic-update
//! and rollback guarantees.

mod entity_store;
mod mutation;
mod state;

pub use entity_store::{EntityStore, EntityStoreBuilder};
pub use mutation::{Confirmation, MutationCoordinator, MutationKind, PendingMutation};
pub use state::StoreState;

use std::future::Future;

use crate::error::RemoteError;

/// Run a future on its own task and wait for it.
///
/// Remote calls and their bookkeeping run to completion even if the caller stops
/// polling, so `loading` and optimistic edits are always settled.
pub(crate) async fn run_detached<F, R, E>(future: F) -> Result<R, E>
where
  F: Future<Output = Result<R, E>> + Send + 'static,
  R: Send + 'static,
  E: From<RemoteError> + Send + 'static,
{
  match tokio::spawn(future).await {
    Ok(result) => result,
    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
    Err(_) => Err(E::from(RemoteError::network(
      "request cancelled by runtime shutdown",
    ))),
  }
}
