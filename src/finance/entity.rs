//! Entity implementations for finance types.

use crate::entity::{name_or_blank, Entity, NameLookup};
use crate::error::ValidationError;

use super::types::{
  Account, AccountDraft, AccountPatch, Category, CategoryDraft, CategoryPatch, Expense,
  ExpenseDraft, ExpensePatch, Income, IncomeDraft, IncomePatch, ScheduledTransaction,
  ScheduledTransactionDraft, ScheduledTransactionPatch, Transfer, TransferDraft, TransferPatch,
};

pub const ACCOUNT: &str = "account";
pub const CATEGORY: &str = "category";

// ============================================================================
// Validation helpers
// ============================================================================

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
  if value.trim().is_empty() {
    return Err(ValidationError::new(field, "must not be empty"));
  }
  Ok(())
}

fn require_positive(field: &'static str, amount: i64) -> Result<(), ValidationError> {
  if amount <= 0 {
    return Err(ValidationError::new(field, "must be greater than zero"));
  }
  Ok(())
}

fn check_optional_text(field: &'static str, value: &Option<String>) -> Result<(), ValidationError> {
  value.as_deref().map_or(Ok(()), |v| require_text(field, v))
}

fn check_optional_amount(field: &'static str, amount: Option<i64>) -> Result<(), ValidationError> {
  amount.map_or(Ok(()), |a| require_positive(field, a))
}

/// Sort key for amounts: shifted and zero-padded so lexical order matches numeric order.
fn amount_key(amount: i64) -> String {
  format!("{:020}", amount as i128 - i64::MIN as i128)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
  haystack.to_lowercase().contains(&needle.to_lowercase())
}

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for Account {
  type Draft = AccountDraft;
  type Patch = AccountPatch;

  fn entity_type() -> &'static str {
    ACCOUNT
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn display_name(&self) -> &str {
    &self.name
  }

  fn provisional(id: String, draft: &AccountDraft, _names: &dyn NameLookup) -> Self {
    Self {
      id,
      name: draft.name.trim().to_string(),
      kind: draft.kind,
      balance: draft.balance,
    }
  }

  fn apply_patch(&mut self, patch: &AccountPatch, _names: &dyn NameLookup) {
    if let Some(name) = &patch.name {
      self.name = name.trim().to_string();
    }
    if let Some(kind) = patch.kind {
      self.kind = kind;
    }
    if let Some(balance) = patch.balance {
      self.balance = balance;
    }
  }

  fn validate_draft(draft: &AccountDraft) -> Result<(), ValidationError> {
    require_text("name", &draft.name)
  }

  fn validate_patch(patch: &AccountPatch) -> Result<(), ValidationError> {
    check_optional_text("name", &patch.name)
  }

  fn sort_key(&self, column: &str) -> Option<String> {
    match column {
      "name" => Some(self.name.to_lowercase()),
      "balance" => Some(amount_key(self.balance)),
      _ => None,
    }
  }
}

impl Entity for Category {
  type Draft = CategoryDraft;
  type Patch = CategoryPatch;

  fn entity_type() -> &'static str {
    CATEGORY
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn display_name(&self) -> &str {
    &self.name
  }

  fn provisional(id: String, draft: &CategoryDraft, _names: &dyn NameLookup) -> Self {
    Self {
      id,
      name: draft.name.trim().to_string(),
      kind: draft.kind,
    }
  }

  fn apply_patch(&mut self, patch: &CategoryPatch, _names: &dyn NameLookup) {
    if let Some(name) = &patch.name {
      self.name = name.trim().to_string();
    }
  }

  fn validate_draft(draft: &CategoryDraft) -> Result<(), ValidationError> {
    require_text("name", &draft.name)
  }

  fn validate_patch(patch: &CategoryPatch) -> Result<(), ValidationError> {
    check_optional_text("name", &patch.name)
  }

  fn sort_key(&self, column: &str) -> Option<String> {
    (column == "name").then(|| self.name.to_lowercase())
  }
}

impl Entity for Expense {
  type Draft = ExpenseDraft;
  type Patch = ExpensePatch;

  fn entity_type() -> &'static str {
    "expense"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn display_name(&self) -> &str {
    &self.description
  }

  fn provisional(id: String, draft: &ExpenseDraft, names: &dyn NameLookup) -> Self {
    Self {
      id,
      description: draft.description.trim().to_string(),
      amount: draft.amount,
      date: draft.date,
      category_name: name_or_blank(names, CATEGORY, &draft.category_id),
      category_id: draft.category_id.clone(),
      account_name: name_or_blank(names, ACCOUNT, &draft.account_id),
      account_id: draft.account_id.clone(),
    }
  }

  fn apply_patch(&mut self, patch: &ExpensePatch, names: &dyn NameLookup) {
    if let Some(description) = &patch.description {
      self.description = description.trim().to_string();
    }
    if let Some(amount) = patch.amount {
      self.amount = amount;
    }
    if let Some(date) = patch.date {
      self.date = date;
    }
    if let Some(category_id) = &patch.category_id {
      self.category_name = name_or_blank(names, CATEGORY, category_id);
      self.category_id = category_id.clone();
    }
    if let Some(account_id) = &patch.account_id {
      self.account_name = name_or_blank(names, ACCOUNT, account_id);
      self.account_id = account_id.clone();
    }
  }

  fn validate_draft(draft: &ExpenseDraft) -> Result<(), ValidationError> {
    require_text("description", &draft.description)?;
    require_positive("amount", draft.amount)?;
    require_text("category_id", &draft.category_id)?;
    require_text("account_id", &draft.account_id)
  }

  fn validate_patch(patch: &ExpensePatch) -> Result<(), ValidationError> {
    check_optional_text("description", &patch.description)?;
    check_optional_amount("amount", patch.amount)?;
    check_optional_text("category_id", &patch.category_id)?;
    check_optional_text("account_id", &patch.account_id)
  }

  fn matches_search(&self, term: &str) -> bool {
    contains_ci(&self.description, term) || contains_ci(&self.category_name, term)
  }

  fn sort_key(&self, column: &str) -> Option<String> {
    match column {
      "date" => Some(self.date.to_string()),
      "amount" => Some(amount_key(self.amount)),
      "description" => Some(self.description.to_lowercase()),
      _ => None,
    }
  }
}

impl Entity for Income {
  type Draft = IncomeDraft;
  type Patch = IncomePatch;

  fn entity_type() -> &'static str {
    "income"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn display_name(&self) -> &str {
    &self.description
  }

  fn provisional(id: String, draft: &IncomeDraft, names: &dyn NameLookup) -> Self {
    Self {
      id,
      description: draft.description.trim().to_string(),
      amount: draft.amount,
      date: draft.date,
      category_name: name_or_blank(names, CATEGORY, &draft.category_id),
      category_id: draft.category_id.clone(),
      account_name: name_or_blank(names, ACCOUNT, &draft.account_id),
      account_id: draft.account_id.clone(),
    }
  }

  fn apply_patch(&mut self, patch: &IncomePatch, names: &dyn NameLookup) {
    if let Some(description) = &patch.description {
      self.description = description.trim().to_string();
    }
    if let Some(amount) = patch.amount {
      self.amount = amount;
    }
    if let Some(date) = patch.date {
      self.date = date;
    }
    if let Some(category_id) = &patch.category_id {
      self.category_name = name_or_blank(names, CATEGORY, category_id);
      self.category_id = category_id.clone();
    }
    if let Some(account_id) = &patch.account_id {
      self.account_name = name_or_blank(names, ACCOUNT, account_id);
      self.account_id = account_id.clone();
    }
  }

  fn validate_draft(draft: &IncomeDraft) -> Result<(), ValidationError> {
    require_text("description", &draft.description)?;
    require_positive("amount", draft.amount)?;
    require_text("category_id", &draft.category_id)?;
    require_text("account_id", &draft.account_id)
  }

  fn validate_patch(patch: &IncomePatch) -> Result<(), ValidationError> {
    check_optional_text("description", &patch.description)?;
    check_optional_amount("amount", patch.amount)?;
    check_optional_text("category_id", &patch.category_id)?;
    check_optional_text("account_id", &patch.account_id)
  }

  fn matches_search(&self, term: &str) -> bool {
    contains_ci(&self.description, term) || contains_ci(&self.category_name, term)
  }

  fn sort_key(&self, column: &str) -> Option<String> {
    match column {
      "date" => Some(self.date.to_string()),
      "amount" => Some(amount_key(self.amount)),
      "description" => Some(self.description.to_lowercase()),
      _ => None,
    }
  }
}

impl Entity for Transfer {
  type Draft = TransferDraft;
  type Patch = TransferPatch;

  fn entity_type() -> &'static str {
    "transfer"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn display_name(&self) -> &str {
    self.note.as_deref().unwrap_or(&self.to_account_name)
  }

  fn provisional(id: String, draft: &TransferDraft, names: &dyn NameLookup) -> Self {
    Self {
      id,
      from_account_name: name_or_blank(names, ACCOUNT, &draft.from_account_id),
      from_account_id: draft.from_account_id.clone(),
      to_account_name: name_or_blank(names, ACCOUNT, &draft.to_account_id),
      to_account_id: draft.to_account_id.clone(),
      amount: draft.amount,
      date: draft.date,
      note: draft.note.clone(),
    }
  }

  fn apply_patch(&mut self, patch: &TransferPatch, _names: &dyn NameLookup) {
    if let Some(amount) = patch.amount {
      self.amount = amount;
    }
    if let Some(date) = patch.date {
      self.date = date;
    }
    if let Some(note) = &patch.note {
      self.note = Some(note.clone()).filter(|n| !n.trim().is_empty());
    }
  }

  fn validate_draft(draft: &TransferDraft) -> Result<(), ValidationError> {
    require_text("from_account_id", &draft.from_account_id)?;
    require_text("to_account_id", &draft.to_account_id)?;
    if draft.from_account_id == draft.to_account_id {
      return Err(ValidationError::new(
        "to_account_id",
        "must differ from the source account",
      ));
    }
    require_positive("amount", draft.amount)
  }

  fn validate_patch(patch: &TransferPatch) -> Result<(), ValidationError> {
    check_optional_amount("amount", patch.amount)
  }

  fn matches_search(&self, term: &str) -> bool {
    contains_ci(&self.from_account_name, term)
      || contains_ci(&self.to_account_name, term)
      || self.note.as_deref().is_some_and(|n| contains_ci(n, term))
  }

  fn sort_key(&self, column: &str) -> Option<String> {
    match column {
      "date" => Some(self.date.to_string()),
      "amount" => Some(amount_key(self.amount)),
      _ => None,
    }
  }
}

impl Entity for ScheduledTransaction {
  type Draft = ScheduledTransactionDraft;
  type Patch = ScheduledTransactionPatch;

  fn entity_type() -> &'static str {
    "scheduled_transaction"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn display_name(&self) -> &str {
    &self.description
  }

  fn provisional(id: String, draft: &ScheduledTransactionDraft, names: &dyn NameLookup) -> Self {
    Self {
      id,
      description: draft.description.trim().to_string(),
      amount: draft.amount,
      direction: draft.direction,
      frequency: draft.frequency,
      next_date: draft.next_date,
      category_name: name_or_blank(names, CATEGORY, &draft.category_id),
      category_id: draft.category_id.clone(),
      account_name: name_or_blank(names, ACCOUNT, &draft.account_id),
      account_id: draft.account_id.clone(),
      active: true,
    }
  }

  fn apply_patch(&mut self, patch: &ScheduledTransactionPatch, _names: &dyn NameLookup) {
    if let Some(description) = &patch.description {
      self.description = description.trim().to_string();
    }
    if let Some(amount) = patch.amount {
      self.amount = amount;
    }
    if let Some(frequency) = patch.frequency {
      self.frequency = frequency;
    }
    if let Some(next_date) = patch.next_date {
      self.next_date = next_date;
    }
    if let Some(active) = patch.active {
      self.active = active;
    }
  }

  fn validate_draft(draft: &ScheduledTransactionDraft) -> Result<(), ValidationError> {
    require_text("description", &draft.description)?;
    require_positive("amount", draft.amount)?;
    require_text("account_id", &draft.account_id)
  }

  fn validate_patch(patch: &ScheduledTransactionPatch) -> Result<(), ValidationError> {
    check_optional_text("description", &patch.description)?;
    check_optional_amount("amount", patch.amount)
  }

  fn sort_key(&self, column: &str) -> Option<String> {
    match column {
      "next_date" => Some(self.next_date.to_string()),
      "amount" => Some(amount_key(self.amount)),
      "description" => Some(self.description.to_lowercase()),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::NoNames;
  use chrono::NaiveDate;
  use std::collections::HashMap;

  struct Names(HashMap<(&'static str, &'static str), &'static str>);

  impl NameLookup for Names {
    fn display_name(&self, entity_type: &str, id: &str) -> Option<String> {
      self
        .0
        .iter()
        .find(|((t, i), _)| *t == entity_type && *i == id)
        .map(|(_, name)| name.to_string())
    }
  }

  fn names() -> Names {
    Names(HashMap::from([
      ((ACCOUNT, "acc-1"), "Checking"),
      ((ACCOUNT, "acc-2"), "Savings"),
      ((CATEGORY, "cat-1"), "Groceries"),
      ((CATEGORY, "cat-2"), "Rent"),
    ]))
  }

  fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap_or_default()
  }

  fn expense_draft() -> ExpenseDraft {
    ExpenseDraft {
      description: " Weekly shop ".to_string(),
      amount: 4_250,
      date: date(),
      category_id: "cat-1".to_string(),
      account_id: "acc-1".to_string(),
    }
  }

  #[test]
  fn test_provisional_expense_uses_known_names() {
    let expense = Expense::provisional("tmp-expense-1".to_string(), &expense_draft(), &names());
    assert_eq!(expense.description, "Weekly shop");
    assert_eq!(expense.category_name, "Groceries");
    assert_eq!(expense.account_name, "Checking");
  }

  #[test]
  fn test_provisional_expense_with_unknown_names_is_blank() {
    let expense = Expense::provisional("tmp-expense-1".to_string(), &expense_draft(), &NoNames);
    assert_eq!(expense.category_name, "");
    assert_eq!(expense.category_id, "cat-1");
  }

  #[test]
  fn test_patch_refreshes_denormalized_name() {
    let mut expense = Expense::provisional("e-1".to_string(), &expense_draft(), &names());
    expense.apply_patch(
      &ExpensePatch {
        category_id: Some("cat-2".to_string()),
        amount: Some(10),
        ..Default::default()
      },
      &names(),
    );
    assert_eq!(expense.category_name, "Rent");
    assert_eq!(expense.amount, 10);
    assert_eq!(expense.description, "Weekly shop");
  }

  #[test]
  fn test_expense_validation() {
    let mut draft = expense_draft();
    assert!(Expense::validate_draft(&draft).is_ok());
    draft.amount = 0;
    assert_eq!(
      Expense::validate_draft(&draft).map_err(|e| e.field),
      Err("amount")
    );
    assert!(Expense::validate_patch(&ExpensePatch {
      description: Some("  ".to_string()),
      ..Default::default()
    })
    .is_err());
  }

  #[test]
  fn test_transfer_requires_distinct_accounts() {
    let draft = TransferDraft {
      from_account_id: "acc-1".to_string(),
      to_account_id: "acc-1".to_string(),
      amount: 100,
      date: date(),
      note: None,
    };
    assert!(Transfer::validate_draft(&draft).is_err());

    let draft = TransferDraft {
      to_account_id: "acc-2".to_string(),
      ..draft
    };
    assert!(Transfer::validate_draft(&draft).is_ok());
    let transfer = Transfer::provisional("t".to_string(), &draft, &names());
    assert_eq!(transfer.from_account_name, "Checking");
    assert_eq!(transfer.to_account_name, "Savings");
    assert_eq!(transfer.display_name(), "Savings");
  }

  #[test]
  fn test_expense_search_matches_category_name() {
    let expense = Expense::provisional("e".to_string(), &expense_draft(), &names());
    assert!(expense.matches_search("grocer"));
    assert!(expense.matches_search("WEEKLY"));
    assert!(!expense.matches_search("rent"));
  }

  #[test]
  fn test_amount_sort_key_orders_numerically() {
    assert!(amount_key(900) < amount_key(1_000));
    assert!(amount_key(-5) < amount_key(3));
  }
}
