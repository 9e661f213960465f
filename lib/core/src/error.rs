//! Shared result alias.
//!
//! Crates define their own error enums and return them wrapped in a
//! rootcause [`Report`]. Context is attached with `.context()` at each
//! layer boundary, so a storage failure surfacing from the scheduler still
//! carries the store's error underneath.

use rootcause::Report;

/// Result whose error is a [`Report`] over the layer's error type `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
