//! Personal-finance record types held by the stores.

mod entity;
mod types;

pub use entity::{ACCOUNT, CATEGORY};
pub use types::*;
