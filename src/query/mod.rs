//! Query-string grammar for listing, deleting and exporting records
//!
//! - [`filter`] parses `column:operator:value` clauses into filter groups
//! - [`descriptor`] assembles selection, filters, sorts and pagination
//! - [`eval`] evaluates a descriptor against in-memory rows

pub mod descriptor;
pub mod eval;
pub mod filter;

pub use descriptor::{DescriptorBuilder, QueryDescriptor, QueryParams, SortDirection, SortSpec};
pub use filter::{ColumnMap, Combinator, FilterClause, FilterGroup, FilterOperator, FilterValue};
