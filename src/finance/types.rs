use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Amounts are integer minor units (cents).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
  Checking,
  Savings,
  Credit,
  Cash,
}

/// Money account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
  pub id: String,
  pub name: String,
  pub kind: AccountKind,
  pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDraft {
  pub name: String,
  pub kind: AccountKind,
  /// Opening balance
  pub balance: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountPatch {
  pub name: Option<String>,
  pub kind: Option<AccountKind>,
  pub balance: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
  Expense,
  Income,
}

/// Expense or income category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: String,
  pub name: String,
  pub kind: CategoryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDraft {
  pub name: String,
  pub kind: CategoryKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryPatch {
  pub name: Option<String>,
}

/// Money spent from an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
  pub id: String,
  pub description: String,
  pub amount: i64,
  pub date: NaiveDate,
  pub category_id: String,
  pub category_name: String,
  pub account_id: String,
  pub account_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseDraft {
  pub description: String,
  pub amount: i64,
  pub date: NaiveDate,
  pub category_id: String,
  pub account_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpensePatch {
  pub description: Option<String>,
  pub amount: Option<i64>,
  pub date: Option<NaiveDate>,
  pub category_id: Option<String>,
  pub account_id: Option<String>,
}

/// Money received into an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Income {
  pub id: String,
  pub description: String,
  pub amount: i64,
  pub date: NaiveDate,
  pub category_id: String,
  pub category_name: String,
  pub account_id: String,
  pub account_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeDraft {
  pub description: String,
  pub amount: i64,
  pub date: NaiveDate,
  pub category_id: String,
  pub account_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomePatch {
  pub description: Option<String>,
  pub amount: Option<i64>,
  pub date: Option<NaiveDate>,
  pub category_id: Option<String>,
  pub account_id: Option<String>,
}

/// Money moved between two accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
  pub id: String,
  pub from_account_id: String,
  pub from_account_name: String,
  pub to_account_id: String,
  pub to_account_name: String,
  pub amount: i64,
  pub date: NaiveDate,
  pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDraft {
  pub from_account_id: String,
  pub to_account_id: String,
  pub amount: i64,
  pub date: NaiveDate,
  pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferPatch {
  pub amount: Option<i64>,
  pub date: Option<NaiveDate>,
  pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  Expense,
  Income,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
  Daily,
  Weekly,
  Monthly,
  Yearly,
}

/// Recurring expense or income
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTransaction {
  pub id: String,
  pub description: String,
  pub amount: i64,
  pub direction: Direction,
  pub frequency: Frequency,
  pub next_date: NaiveDate,
  pub category_id: String,
  pub category_name: String,
  pub account_id: String,
  pub account_name: String,
  pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTransactionDraft {
  pub description: String,
  pub amount: i64,
  pub direction: Direction,
  pub frequency: Frequency,
  pub next_date: NaiveDate,
  pub category_id: String,
  pub account_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledTransactionPatch {
  pub description: Option<String>,
  pub amount: Option<i64>,
  pub frequency: Option<Frequency>,
  pub next_date: Option<NaiveDate>,
  pub active: Option<bool>,
}
