//! CSV import
//!
//! An import runs in two stages. [`validate`] reads and checks every row
//! without touching storage; [`reconcile`] then applies the rows inside one
//! transaction.

pub mod dotted;
pub mod reconcile;
pub mod rules;
pub mod validate;

pub use reconcile::{ImportSummary, reconcile};
pub use rules::{FieldRule, FieldRules};
pub use validate::{IMPORT_ID_COLUMN, ImportRow, ImportValidator, NULL_TOKENS};
