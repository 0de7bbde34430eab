use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use fintrack_sync::finance::{Account, AccountKind, Category, CategoryKind, ExpenseDraft};
use fintrack_sync::remote::InMemoryBackend;
use fintrack_sync::{logging, Config, Credentials, PageQuery, StoreRegistry};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fintrack-sync")]
#[command(about = "Runs the finance store layer against an in-memory backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fintrack/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log debug output from the store layer
  #[arg(short, long)]
  verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging, args.verbose)?;

  let credentials = Credentials::from_env().unwrap_or_else(|| Credentials::new("demo", "demo"));
  let backend = seed_backend(&credentials);
  let registry = StoreRegistry::in_memory(&config, &backend);

  let profile = registry
    .session()
    .login(credentials)
    .await
    .map_err(|e| eyre!("Login failed: {}", e))?;
  info!(user = %profile.display_name, "signed in");

  registry.load_all(PageQuery::default()).await;
  let accounts = registry.accounts().items();
  let account = accounts
    .first()
    .ok_or_else(|| eyre!("The backend has no accounts"))?;
  info!(count = accounts.len(), "accounts loaded");

  let id = registry
    .expenses()
    .create(ExpenseDraft {
      description: "Groceries".to_string(),
      amount: 42_37,
      date: Utc::now().date_naive(),
      category_id: "cat-1".to_string(),
      account_id: account.id.clone(),
    })
    .await
    .map_err(|e| eyre!("Could not record expense: {}", e.user_message()))?;
  info!(id = %id, "expense recorded");

  // Wait for the dashboard to pick up the change.
  let mut dashboard = registry.dashboard().subscribe();
  let refresh = async {
    while dashboard.changed().await.is_ok() {
      let state = dashboard.borrow_and_update().clone();
      if !state.loading && state.summary.is_some_and(|s| s.expense_total > 0) {
        break;
      }
    }
  };
  let wait = registry.graph().delay() + Duration::from_secs(2);
  tokio::time::timeout(wait, refresh)
    .await
    .map_err(|_| eyre!("Dashboard did not refresh within {:?}", wait))?;

  let summary = registry
    .dashboard()
    .summary()
    .ok_or_else(|| eyre!("Dashboard has no summary"))?;
  println!("{}", serde_json::to_string_pretty(&summary)?);

  registry.session().logout().await;
  Ok(())
}

fn seed_backend(credentials: &Credentials) -> InMemoryBackend {
  let backend = InMemoryBackend::new();
  backend
    .auth
    .add_user(&credentials.username, &credentials.password, &credentials.username);
  backend.accounts.seed(Account {
    id: "acc-1".to_string(),
    name: "Checking".to_string(),
    kind: AccountKind::Checking,
    balance: 1_250_00,
  });
  backend.accounts.seed(Account {
    id: "acc-2".to_string(),
    name: "Savings".to_string(),
    kind: AccountKind::Savings,
    balance: 5_000_00,
  });
  backend.categories.seed(Category {
    id: "cat-1".to_string(),
    name: "Food".to_string(),
    kind: CategoryKind::Expense,
  });
  backend
}
