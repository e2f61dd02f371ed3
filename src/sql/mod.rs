//! SQL utilities for the table store
//!
//! Provides SQL generation, sanitization, and query building utilities.

pub mod condition;
pub mod ddl;
pub mod sanitize;

pub use condition::{
    SqlParams, build_condition_clause, build_order_by_clause, build_select_list,
    column_expression,
};
pub use ddl::DdlGenerator;
pub use sanitize::{
    POSTGRES_RESERVED_WORDS, json_path_literal, quote_identifier, validate_identifier,
    validate_spec,
};
