//! Key and value types storable in the tree.

pub mod fixed;
pub mod inline_str;

pub use fixed::{DecodeError, Fixed};
pub use inline_str::{InlineStr, InlineStrTooLong};
