//! Statement policy applied before SQL reaches a backend.
//!
//! - [`guard`]: read-only classification by leading keyword
//! - [`row_cap`]: bounds the row count of SELECT statements
//!
//! The guard works lexically: semicolons inside string literals or quoted
//! identifiers split statements, which can only refuse more. The row cap
//! skips comments and quoted text when it looks for statement boundaries
//! and clauses, so it never writes into them.

pub mod guard;
pub mod row_cap;

pub use guard::{ReadOnlyViolation, allowed_keywords, check_read_only, split_statements, strip_comments};
pub use row_cap::{CapStyle, apply_row_cap};
