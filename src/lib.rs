//! Client-side state and synchronization for a personal-finance tracker.
//!
//! Each entity type gets an [`EntityStore`] holding the visible page of records,
//! a TTL query cache, and a change signal. Mutations are applied optimistically
//! and rolled back if the server rejects them. The [`Dashboard`] follows the
//! change signals of the ledger stores through a [`SynchronizationGraph`], and
//! the [`SessionLifecycle`] expires everything when the server stops accepting
//! the session token.

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod entity;
pub mod error;
pub mod finance;
pub mod logging;
pub mod registry;
pub mod remote;
pub mod search;
pub mod session;
pub mod signal;
pub mod store;
pub mod sync;

pub use cache::{PageQuery, QueryCache, SortOrder};
pub use config::Config;
pub use dashboard::{Dashboard, DashboardState, DashboardSummary};
pub use entity::{Entity, NameLookup, RelatedNames};
pub use error::{RemoteError, SessionError, StoreError, ValidationError};
pub use registry::{Endpoints, StoreRegistry};
pub use search::DebouncedSearch;
pub use session::{Credentials, SessionLifecycle, SessionPhase, SessionSnapshot};
pub use signal::{ChangeSignal, ChangeStamp, ChangeSubscription};
pub use store::{EntityStore, StoreState};
pub use sync::{Refresh, SyncBinding, SynchronizationGraph};
