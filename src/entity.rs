//! Traits every record type implements to live in an `EntityStore`.

use std::sync::Arc;

use crate::error::ValidationError;

/// Prefix of ids assigned to records the server has not confirmed yet.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Whether an id was synthesized locally for an optimistic insert.
pub fn is_temporary_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX)
}

/// A domain record held by an entity store.
///
/// The store only relies on the id being unique. Everything else is used for the
/// optimistic view: building a plausible row from a draft, merging a patch, and
/// filling denormalized names (e.g. `category_name` next to `category_id`).
pub trait Entity: Clone + Send + Sync + 'static {
  /// Payload sent to `create`
  type Draft: Clone + Send + Sync + 'static;
  /// Partial update sent to `update`
  type Patch: Clone + Send + Sync + 'static;

  /// Entity type name (e.g. "account", "expense")
  fn entity_type() -> &'static str;

  fn id(&self) -> &str;

  fn set_id(&mut self, id: String);

  /// Human-readable label used by other records' denormalized name fields.
  fn display_name(&self) -> &str;

  /// Build a display record for a draft before the server has answered.
  fn provisional(id: String, draft: &Self::Draft, names: &dyn NameLookup) -> Self;

  /// Merge a patch into this record.
  fn apply_patch(&mut self, patch: &Self::Patch, names: &dyn NameLookup);

  fn validate_draft(_draft: &Self::Draft) -> Result<(), ValidationError> {
    Ok(())
  }

  fn validate_patch(_patch: &Self::Patch) -> Result<(), ValidationError> {
    Ok(())
  }

  /// Case-insensitive match against the record's searchable text.
  fn matches_search(&self, term: &str) -> bool {
    self
      .display_name()
      .to_lowercase()
      .contains(&term.to_lowercase())
  }

  /// Sortable representation of a column, `None` for unknown columns.
  fn sort_key(&self, _column: &str) -> Option<String> {
    None
  }
}

/// Resolves the display name of a related record.
pub trait NameLookup: Send + Sync {
  fn display_name(&self, entity_type: &str, id: &str) -> Option<String>;
}

/// Lookup that knows no names.
pub struct NoNames;

impl NameLookup for NoNames {
  fn display_name(&self, _entity_type: &str, _id: &str) -> Option<String> {
    None
  }
}

/// Fan-out over several lookups, first hit wins.
#[derive(Clone, Default)]
pub struct RelatedNames {
  sources: Vec<Arc<dyn NameLookup>>,
}

impl RelatedNames {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, source: Arc<dyn NameLookup>) -> Self {
    self.sources.push(source);
    self
  }
}

impl NameLookup for RelatedNames {
  fn display_name(&self, entity_type: &str, id: &str) -> Option<String> {
    self
      .sources
      .iter()
      .find_map(|source| source.display_name(entity_type, id))
  }
}

/// Look up a related name, falling back to an empty label while it is unknown.
pub fn name_or_blank(names: &dyn NameLookup, entity_type: &str, id: &str) -> String {
  names.display_name(entity_type, id).unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  struct Fixed(&'static str, HashMap<&'static str, &'static str>);

  impl NameLookup for Fixed {
    fn display_name(&self, entity_type: &str, id: &str) -> Option<String> {
      if entity_type != self.0 {
        return None;
      }
      self.1.get(id).map(|s| s.to_string())
    }
  }

  #[test]
  fn test_temporary_id_prefix() {
    assert!(is_temporary_id("tmp-account-1"));
    assert!(!is_temporary_id("acc-1"));
  }

  #[test]
  fn test_related_names_first_hit_wins() {
    let accounts = Fixed("account", HashMap::from([("acc-1", "Checking")]));
    let categories = Fixed("category", HashMap::from([("cat-1", "Groceries")]));
    let names = RelatedNames::new()
      .with(Arc::new(accounts))
      .with(Arc::new(categories));

    assert_eq!(
      names.display_name("category", "cat-1").as_deref(),
      Some("Groceries")
    );
    assert_eq!(
      names.display_name("account", "acc-1").as_deref(),
      Some("Checking")
    );
    assert_eq!(name_or_blank(&names, "account", "acc-9"), "");
  }
}
