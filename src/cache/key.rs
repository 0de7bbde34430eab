//! List query parameters and their cache key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::traits::QueryKey;
use crate::error::ValidationError;

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  Desc,
}

impl SortOrder {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Asc => "asc",
      Self::Desc => "desc",
    }
  }
}

/// Parameters of one paginated list request. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageQuery {
  pub page: u32,
  pub page_size: u32,
  pub search_term: Option<String>,
  pub sort_column: Option<String>,
  pub sort_order: Option<SortOrder>,
}

impl Default for PageQuery {
  fn default() -> Self {
    Self::new(1, 10)
  }
}

impl PageQuery {
  pub fn new(page: u32, page_size: u32) -> Self {
    Self {
      page,
      page_size,
      search_term: None,
      sort_column: None,
      sort_order: None,
    }
  }

  pub fn with_search(mut self, term: impl Into<String>) -> Self {
    self.search_term = Some(term.into());
    self
  }

  pub fn with_sort(mut self, column: impl Into<String>, order: SortOrder) -> Self {
    self.sort_column = Some(column.into());
    self.sort_order = Some(order);
    self
  }

  /// Search term with blank input treated as no search.
  pub fn effective_search(&self) -> Option<&str> {
    self
      .search_term
      .as_deref()
      .map(str::trim)
      .filter(|term| !term.is_empty())
  }

  /// Zero-based offset of the first row of this page.
  pub fn offset(&self) -> usize {
    (self.page.saturating_sub(1) as usize) * self.page_size as usize
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.page == 0 {
      return Err(ValidationError::new("page", "pages start at 1"));
    }
    if self.page_size == 0 {
      return Err(ValidationError::new("page_size", "must be at least 1"));
    }
    Ok(())
  }
}

impl QueryKey for PageQuery {
  fn cache_hash(&self) -> String {
    // Length-prefixed so no search term can forge another query's key
    let input = format!(
      "page:{}|size:{}|search:{}|sort:{}|order:{}",
      self.page,
      self.page_size,
      framed(self.effective_search()),
      framed(self.sort_column.as_deref()),
      self.sort_order.map(|o| o.as_str()).unwrap_or("-"),
    );

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    let mut description = format!("page {} (size {})", self.page, self.page_size);
    if let Some(term) = self.effective_search() {
      description.push_str(&format!(" search '{}'", term));
    }
    if let Some(column) = &self.sort_column {
      description.push_str(&format!(
        " sort {} {}",
        column,
        self.sort_order.unwrap_or(SortOrder::Asc).as_str()
      ));
    }
    description
  }
}

fn framed(value: Option<&str>) -> String {
  match value {
    Some(v) => format!("{}:{}", v.len(), v),
    None => "-".to_string(),
  }
}
