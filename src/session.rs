//! Authentication lifecycle: login, heartbeat re-validation, expiry and logout.
//!
//! The session publishes a [`SessionSnapshot`] through a watch channel, the same
//! way entity stores publish their change signal. Stores report authorization
//! failures through an [`AuthSentinel`], and only those expire the session.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{RemoteError, SessionError, ValidationError};
use crate::remote::AuthEndpoint;
use crate::store::run_detached;

pub const USER_ENV: &str = "FINTRACK_USER";
pub const PASSWORD_ENV: &str = "FINTRACK_PASSWORD";

const EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

impl Credentials {
  pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      password: password.into(),
    }
  }

  /// Read credentials from `FINTRACK_USER` and `FINTRACK_PASSWORD`.
  pub fn from_env() -> Option<Self> {
    let username = std::env::var(USER_ENV).ok()?;
    let password = std::env::var(PASSWORD_ENV).ok()?;
    Some(Self::new(username, password))
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.username.trim().is_empty() {
      return Err(ValidationError::new("username", "is required"));
    }
    if self.password.is_empty() {
      return Err(ValidationError::new("password", "is required"));
    }
    Ok(())
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .field("password", &"<redacted>")
      .finish()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
  pub username: String,
  pub display_name: String,
}

/// Successful login response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
  pub token: String,
  pub profile: UserProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
  Anonymous,
  Authenticating,
  Authenticated,
  /// Authorization was rejected; cleanup is running
  Expiring,
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
  pub phase: SessionPhase,
  pub profile: Option<UserProfile>,
  pub error: Option<String>,
  /// Set when an expiry should send the user back to the login screen
  pub redirect_to_login: bool,
}

impl Default for SessionSnapshot {
  fn default() -> Self {
    Self {
      phase: SessionPhase::Anonymous,
      profile: None,
      error: None,
      redirect_to_login: false,
    }
  }
}

/// Receives authorization failures detected outside the session.
pub trait AuthSentinel: Send + Sync {
  /// `source` names the component that saw the failure.
  fn unauthorized(&self, source: &str, err: &RemoteError);
}

type CleanupHook = Arc<dyn Fn() + Send + Sync>;

struct SessionInner {
  endpoint: Arc<dyn AuthEndpoint>,
  heartbeat_interval: Duration,
  state: watch::Sender<SessionSnapshot>,
  token: Mutex<Option<String>>,
  heartbeat: Mutex<Option<JoinHandle<()>>>,
  cleanups: Mutex<Vec<CleanupHook>>,
}

impl Drop for SessionInner {
  fn drop(&mut self) {
    if let Some(handle) = lock(&self.heartbeat).take() {
      handle.abort();
    }
  }
}

/// Authentication state machine with an owned heartbeat timer.
///
/// Cloning shares the same session.
#[derive(Clone)]
pub struct SessionLifecycle {
  inner: Arc<SessionInner>,
}

impl SessionLifecycle {
  pub fn new(endpoint: Arc<dyn AuthEndpoint>, heartbeat_interval: Duration) -> Self {
    let (state, _rx) = watch::channel(SessionSnapshot::default());
    Self {
      inner: Arc::new(SessionInner {
        endpoint,
        heartbeat_interval,
        state,
        token: Mutex::new(None),
        heartbeat: Mutex::new(None),
        cleanups: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    self.inner.state.borrow().clone()
  }

  pub fn phase(&self) -> SessionPhase {
    self.inner.state.borrow().phase
  }

  pub fn profile(&self) -> Option<UserProfile> {
    self.inner.state.borrow().profile.clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self.phase() == SessionPhase::Authenticated
  }

  /// Bearer token of the current session.
  pub fn token(&self) -> Option<String> {
    lock(&self.inner.token).clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
    self.inner.state.subscribe()
  }

  /// Register a hook run on logout and on expiry, in registration order.
  pub fn add_cleanup(&self, hook: impl Fn() + Send + Sync + 'static) {
    lock(&self.inner.cleanups).push(Arc::new(hook));
  }

  /// Sentinel handed to stores. Holds the session weakly.
  pub fn sentinel(&self) -> Arc<dyn AuthSentinel> {
    Arc::new(SessionSentinel {
      inner: Arc::downgrade(&self.inner),
    })
  }

  /// Log in and start the heartbeat.
  pub async fn login(&self, credentials: Credentials) -> Result<UserProfile, SessionError> {
    if let Err(err) = credentials.validate() {
      self.publish(|state| state.error = Some(err.to_string()));
      return Err(err.into());
    }

    self.publish(|state| {
      state.phase = SessionPhase::Authenticating;
      state.error = None;
    });

    let session = self.clone();
    run_detached(async move { session.finish_login(credentials).await }).await
  }

  async fn finish_login(&self, credentials: Credentials) -> Result<UserProfile, SessionError> {
    match self.inner.endpoint.login(&credentials).await {
      Ok(grant) => {
        *lock(&self.inner.token) = Some(grant.token);
        self.authenticated(grant.profile.clone());
        info!(user = %grant.profile.username, "logged in");
        Ok(grant.profile)
      }
      Err(err) => {
        // A rejected login also ends any session it was meant to replace
        let previous = lock(&self.inner.token).take();
        self.stop();
        if previous.is_some() {
          self.run_cleanups();
        }
        self.publish(|state| {
          state.phase = SessionPhase::Anonymous;
          state.profile = None;
          state.error = Some(err.message.clone());
        });
        warn!(user = %credentials.username, status = err.status, "login failed: {}", err);
        Err(err.into())
      }
    }
  }

  /// Resume a session from a stored token at startup.
  ///
  /// An authorization failure expires the session. Other failures keep the token
  /// and leave re-validation to the heartbeat.
  pub async fn on_init(&self, token: impl Into<String>) -> Result<UserProfile, SessionError> {
    *lock(&self.inner.token) = Some(token.into());
    self.publish(|state| {
      state.phase = SessionPhase::Authenticating;
      state.error = None;
    });

    let session = self.clone();
    run_detached(async move {
      let result = session.revalidate().await;
      match &result {
        Ok(_) => session.start(),
        Err(SessionError::Remote(err)) if !err.is_unauthorized() => {
          session.publish(|state| {
            state.phase = SessionPhase::Authenticated;
            state.error = Some(err.message.clone());
          });
          session.start();
        }
        Err(_) => {}
      }
      result
    })
    .await
  }

  /// Check the token against the server and refresh the cached profile.
  pub async fn revalidate(&self) -> Result<UserProfile, SessionError> {
    let token = self.token().ok_or(SessionError::NotAuthenticated)?;
    match self.inner.endpoint.profile(&token).await {
      Ok(profile) => {
        if self.token().as_deref() == Some(token.as_str()) {
          self.publish(|state| {
            state.phase = SessionPhase::Authenticated;
            state.profile = Some(profile.clone());
            state.error = None;
          });
        }
        debug!(user = %profile.username, "session valid");
        Ok(profile)
      }
      Err(err) if err.is_unauthorized() => {
        if self.token().as_deref() == Some(token.as_str()) {
          self.expire("heartbeat", &err);
        }
        Err(err.into())
      }
      Err(err) => {
        warn!(status = err.status, "session check failed, keeping session: {}", err);
        Err(err.into())
      }
    }
  }

  /// Local cleanup first, then a best-effort remote logout.
  pub async fn logout(&self) {
    let token = lock(&self.inner.token).take();
    self.stop();
    self.run_cleanups();
    self.publish(|state| *state = SessionSnapshot::default());
    info!("logged out");

    if let Some(token) = token {
      let endpoint = Arc::clone(&self.inner.endpoint);
      let result = run_detached(async move {
        endpoint.logout(&token).await.map_err(SessionError::from)
      })
      .await;
      if let Err(err) = result {
        warn!("remote logout failed: {}", err);
      }
    }
  }

  /// End the session after an authorization failure. No-op when not logged in.
  pub fn expire(&self, source: &str, err: &RemoteError) {
    if lock(&self.inner.token).take().is_none() {
      return;
    }
    warn!(source, status = err.status, "session expired: {}", err.message);

    self.publish(|state| state.phase = SessionPhase::Expiring);
    self.stop();
    self.run_cleanups();
    self.publish(|state| {
      *state = SessionSnapshot {
        error: Some(EXPIRED_MESSAGE.to_string()),
        redirect_to_login: true,
        ..SessionSnapshot::default()
      };
    });
  }

  /// Clear the redirect flag once the host has shown the login screen.
  pub fn acknowledge_redirect(&self) {
    self.publish(|state| state.redirect_to_login = false);
  }

  /// Start the heartbeat, replacing any running one. Requires a tokio runtime.
  pub fn start(&self) {
    let mut slot = lock(&self.inner.heartbeat);
    if let Some(previous) = slot.take() {
      previous.abort();
    }

    let period = self.inner.heartbeat_interval;
    let weak = Arc::downgrade(&self.inner);
    *slot = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        let session = SessionLifecycle { inner };
        match session.revalidate().await {
          Err(SessionError::NotAuthenticated) => break,
          Err(SessionError::Remote(err)) if err.is_unauthorized() => break,
          _ => {}
        }
      }
    }));
    debug!(interval_secs = period.as_secs(), "heartbeat started");
  }

  /// Stop the heartbeat. Safe to call when none is running.
  pub fn stop(&self) {
    if let Some(handle) = lock(&self.inner.heartbeat).take() {
      handle.abort();
      debug!("heartbeat stopped");
    }
  }

  pub fn heartbeat_active(&self) -> bool {
    lock(&self.inner.heartbeat)
      .as_ref()
      .is_some_and(|handle| !handle.is_finished())
  }

  fn authenticated(&self, profile: UserProfile) {
    self.publish(|state| {
      *state = SessionSnapshot {
        phase: SessionPhase::Authenticated,
        profile: Some(profile),
        ..SessionSnapshot::default()
      };
    });
    self.start();
  }

  fn run_cleanups(&self) {
    let hooks: Vec<CleanupHook> = lock(&self.inner.cleanups).clone();
    for hook in hooks {
      hook();
    }
  }

  fn publish(&self, update: impl FnOnce(&mut SessionSnapshot)) {
    self.inner.state.send_modify(update);
  }
}

struct SessionSentinel {
  inner: Weak<SessionInner>,
}

impl AuthSentinel for SessionSentinel {
  fn unauthorized(&self, source: &str, err: &RemoteError) {
    if let Some(inner) = self.inner.upgrade() {
      SessionLifecycle { inner }.expire(source, err);
    }
  }
}
