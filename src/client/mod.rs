//! Observer-side helpers.
//!
//! - [`RuleMirror`] - replica of the rule set rebuilt from pushed diffs

pub mod mirror;

pub use mirror::RuleMirror;
