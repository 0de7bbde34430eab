//! Contracts for the remote backend.
//!
//! Transport, authentication headers and serialization live behind these traits;
//! the stores only see request/response pairs and [`RemoteError`].

mod memory;

pub use memory::{
  CallControl, InMemoryAuth, InMemoryBackend, InMemoryEndpoint, InMemorySummary, Op,
};

use async_trait::async_trait;

use crate::cache::PageQuery;
use crate::dashboard::DashboardSummary;
use crate::entity::Entity;
use crate::error::RemoteError;
use crate::session::{AuthGrant, Credentials, UserProfile};

/// One page of a list query as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<T> {
  pub items: Vec<T>,
  pub total_count: u64,
}

/// Remote CRUD endpoint for one entity type.
#[async_trait]
pub trait RemoteEndpoint<T: Entity>: Send + Sync {
  async fn list(&self, query: &PageQuery) -> Result<ListPage<T>, RemoteError>;

  /// Create a record and return its server-assigned id.
  async fn create(&self, draft: &T::Draft) -> Result<String, RemoteError>;

  /// Update a record. Some backends answer with the stored record, others with no body.
  async fn update(&self, id: &str, patch: &T::Patch) -> Result<Option<T>, RemoteError>;

  async fn delete(&self, id: &str) -> Result<(), RemoteError>;

  /// Unpaginated lookup used for autocomplete-style selection.
  async fn search(&self, term: &str, limit: usize) -> Result<Vec<T>, RemoteError>;
}

/// Server-side aggregation read by the dashboard.
#[async_trait]
pub trait SummaryEndpoint: Send + Sync {
  async fn summary(&self) -> Result<DashboardSummary, RemoteError>;
}

/// Authentication endpoint driven by the session lifecycle.
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
  async fn login(&self, credentials: &Credentials) -> Result<AuthGrant, RemoteError>;

  /// Re-validate a token and return the current profile.
  async fn profile(&self, token: &str) -> Result<UserProfile, RemoteError>;

  async fn logout(&self, token: &str) -> Result<(), RemoteError>;
}
