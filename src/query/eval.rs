//! In-memory evaluation of filters, sorts and projections
//!
//! Follows SQL semantics closely enough that the in-memory repository
//! answers queries like PostgreSQL would:
//! - comparisons against a NULL or missing value are unknown, so neither a
//!   clause nor its negation matches
//! - `LIKE` matching is case-sensitive with `%` and `_` wildcards
//! - a between with one bound never matches, negated or not
//! - `ASC` sorts NULLs last, `DESC` sorts them first

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::query::descriptor::{SortDirection, SortSpec};
use crate::query::filter::{FilterClause, FilterGroup, FilterOperator};
use crate::types::{is_numeric_literal, parse_timestamp, value_to_text};

/// Look up a possibly dotted column in a row
pub fn lookup<'a>(row: &'a Map<String, Value>, column: &str) -> Option<&'a Value> {
    if let Some(value) = row.get(column) {
        return Some(value);
    }
    let mut segments = column.split('.');
    let mut current = row.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Whether a row satisfies every group of the filter
pub fn matches(filters: &FilterGroup, row: &Map<String, Value>) -> bool {
    filters
        .groups()
        .iter()
        .all(|group| group.iter().any(|clause| clause_matches(clause, row)))
}

/// Whether a row satisfies one clause
pub fn clause_matches(clause: &FilterClause, row: &Map<String, Value>) -> bool {
    let value = lookup(row, &clause.column).filter(|v| !v.is_null());

    if clause.operator == FilterOperator::IsNull {
        return value.is_none() != clause.negate;
    }

    // Unknown stays unknown under negation.
    let Some(value) = value else {
        return false;
    };

    match evaluate(clause, value) {
        Some(result) => result != clause.negate,
        None => false,
    }
}

/// Three-valued result of a clause against a non-null value
fn evaluate(clause: &FilterClause, value: &Value) -> Option<bool> {
    let text = value_to_text(value)?;

    match clause.operator {
        FilterOperator::Eq => Some(compare(value, &text, clause.value.as_single()?) == Ordering::Equal),
        FilterOperator::Gt => Some(compare(value, &text, clause.value.as_single()?) == Ordering::Greater),
        FilterOperator::Gte => Some(compare(value, &text, clause.value.as_single()?) != Ordering::Less),
        FilterOperator::Lt => Some(compare(value, &text, clause.value.as_single()?) == Ordering::Less),
        FilterOperator::Lte => Some(compare(value, &text, clause.value.as_single()?) != Ordering::Greater),
        FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
            let pattern = clause.operator.like_pattern(clause.value.as_single()?)?;
            Some(like(&pattern, &text))
        }
        FilterOperator::Between => {
            let (low, high) = clause.value.bounds();
            let (low, high) = (low?, high?);
            Some(
                compare(value, &text, low) != Ordering::Less
                    && compare(value, &text, high) != Ordering::Greater,
            )
        }
        FilterOperator::In => Some(clause.value.as_list().iter().any(|v| *v == text)),
        FilterOperator::IsNull => None,
    }
}

/// Compare a stored value with a raw filter literal
///
/// Numbers compare numerically and timestamps chronologically when the
/// literal parses as the same kind; everything else compares as text.
fn compare(value: &Value, text: &str, literal: &str) -> Ordering {
    if let (Value::Number(n), true) = (value, is_numeric_literal(literal)) {
        if let (Some(left), Ok(right)) = (n.as_f64(), literal.trim().parse::<f64>()) {
            return left.partial_cmp(&right).unwrap_or(Ordering::Equal);
        }
    }
    if let (Some(left), Some(right)) = (parse_timestamp(text), parse_timestamp(literal)) {
        return left.cmp(&right);
    }
    text.cmp(literal)
}

/// SQL `LIKE` with `%` (any run) and `_` (any single character)
pub fn like(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}

/// Order two stored values the way PostgreSQL orders a column ascending
pub fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let left = left.filter(|v| !v.is_null());
    let right = right.filter(|v| !v.is_null());

    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(a), Some(b)) => value_to_text(a).cmp(&value_to_text(b)),
    }
}

/// Stable sort by the sort specs in order
pub fn sort_rows(rows: &mut [Map<String, Value>], sorts: &[SortSpec]) {
    if sorts.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for sort in sorts {
            let ordering = compare_values(lookup(a, &sort.column), lookup(b, &sort.column));
            let ordering = match sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Keep only the selected top-level columns; `*` keeps everything
pub fn project(mut row: Map<String, Value>, columns: &[String]) -> Map<String, Value> {
    if columns.is_empty() || columns.iter().any(|c| c == "*") {
        return row;
    }
    columns
        .iter()
        .filter_map(|c| row.remove(c).map(|v| (c.clone(), v)))
        .collect()
}
