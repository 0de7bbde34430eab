//! Error types shared by the store, session and endpoint layers.

use thiserror::Error;

/// HTTP-equivalent status that ends the session.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Failure reported by a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code}, status {status})")]
pub struct RemoteError {
  pub message: String,
  pub code: String,
  /// HTTP-equivalent status code
  pub status: u16,
}

impl RemoteError {
  pub fn new(message: impl Into<String>, code: impl Into<String>, status: u16) -> Self {
    Self {
      message: message.into(),
      code: code.into(),
      status,
    }
  }

  pub fn unauthorized(message: impl Into<String>) -> Self {
    Self::new(message, "unauthorized", STATUS_UNAUTHORIZED)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(message, "not_found", 404)
  }

  pub fn conflict(message: impl Into<String>) -> Self {
    Self::new(message, "conflict", 409)
  }

  pub fn server(message: impl Into<String>) -> Self {
    Self::new(message, "server_error", 500)
  }

  /// Transport-level failure with no HTTP response.
  pub fn network(message: impl Into<String>) -> Self {
    Self::new(message, "network", 0)
  }

  /// Only an explicit 401 counts; network errors never do.
  pub fn is_unauthorized(&self) -> bool {
    self.status == STATUS_UNAUTHORIZED
  }
}

/// Client-side rejection raised before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
  pub field: &'static str,
  pub message: String,
}

impl ValidationError {
  pub fn new(field: &'static str, message: impl Into<String>) -> Self {
    Self {
      field,
      message: message.into(),
    }
  }
}

/// Error returned by entity store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("invalid input: {0}")]
  Validation(#[from] ValidationError),
  #[error("{entity_type} {id} not found")]
  NotFound {
    entity_type: &'static str,
    id: String,
  },
  #[error(transparent)]
  Remote(#[from] RemoteError),
}

impl StoreError {
  /// Message shown to the user through `StoreState::error`.
  pub fn user_message(&self) -> String {
    match self {
      Self::Validation(e) => e.to_string(),
      Self::NotFound { entity_type, id } => format!("{} {} no longer exists", entity_type, id),
      Self::Remote(e) => e.message.clone(),
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    matches!(self, Self::Remote(e) if e.is_unauthorized())
  }
}

/// Error returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
  #[error("invalid credentials: {0}")]
  Validation(#[from] ValidationError),
  #[error("not authenticated")]
  NotAuthenticated,
  #[error(transparent)]
  Remote(#[from] RemoteError),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_401_is_unauthorized() {
    assert!(RemoteError::unauthorized("expired").is_unauthorized());
    assert!(!RemoteError::network("offline").is_unauthorized());
    assert!(!RemoteError::new("forbidden", "forbidden", 403).is_unauthorized());
  }

  #[test]
  fn test_user_message_uses_remote_text() {
    let err = StoreError::from(RemoteError::server("Balance service down"));
    assert_eq!(err.user_message(), "Balance service down");
    assert!(!err.is_unauthorized());
  }

  #[test]
  fn test_validation_message_names_field() {
    let err = StoreError::from(ValidationError::new("amount", "must be positive"));
    assert_eq!(err.user_message(), "amount: must be positive");
  }
}
