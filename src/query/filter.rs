//! Filter grammar
//!
//! One clause is `column:operator:value`. A filter parameter value may hold
//! several comma separated clauses; the first joins the predicate with AND,
//! the rest join that same group with OR. Separate filter parameters are
//! always ANDed together, giving `(A) AND (B OR C) AND (D)`.
//!
//! Malformed clauses are dropped, never reported.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// Comparison primitive a clause maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `LIKE '%value%'`
    Contains,
    /// `LIKE 'value%'`
    StartsWith,
    /// `LIKE '%value'`
    EndsWith,
    Between,
    In,
    IsNull,
}

impl FilterOperator {
    /// Parse an operator token into the operator and its negation flag
    ///
    /// Accepts the short grammar tokens (`eq`, `nct`, `bt`, ...) and the long
    /// aliases (`contains`, `starts-with`, `between`, ...).
    pub fn from_token(token: &str) -> Option<(Self, bool)> {
        let parsed = match token {
            "eq" => (Self::Eq, false),
            "neq" => (Self::Eq, true),
            "gt" => (Self::Gt, false),
            "gte" => (Self::Gte, false),
            "lt" => (Self::Lt, false),
            "lte" => (Self::Lte, false),
            "ct" | "contains" => (Self::Contains, false),
            "nct" | "not-contains" => (Self::Contains, true),
            "sw" | "starts-with" => (Self::StartsWith, false),
            "nsw" | "not-starts-with" => (Self::StartsWith, true),
            "ew" | "ends-with" => (Self::EndsWith, false),
            "new" | "not-ends-with" => (Self::EndsWith, true),
            "bt" | "between" => (Self::Between, false),
            "nbt" | "not-between" => (Self::Between, true),
            "in" => (Self::In, false),
            "nin" | "not-in" => (Self::In, true),
            "nl" | "is-null" => (Self::IsNull, false),
            "nnl" | "not-null" => (Self::IsNull, true),
            _ => return None,
        };
        Some(parsed)
    }

    /// Whether the value is a `|` separated list
    pub fn takes_list(self) -> bool {
        matches!(self, Self::Between | Self::In)
    }

    /// Wrap a value in the SQL `LIKE` pattern for pattern operators
    ///
    /// `%` and `_` in the value are not escaped and act as wildcards.
    pub fn like_pattern(self, value: &str) -> Option<String> {
        match self {
            Self::Contains => Some(format!("%{}%", value)),
            Self::StartsWith => Some(format!("{}%", value)),
            Self::EndsWith => Some(format!("%{}", value)),
            _ => None,
        }
    }
}

/// How a clause joins the predicate built so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
}

/// Value operand of a clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    List(Vec<String>),
}

impl FilterValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(s) => Some(s),
            Self::List(_) => None,
        }
    }

    /// The values as a slice; a single value is a one-element list
    pub fn as_list(&self) -> &[String] {
        match self {
            Self::Single(s) => std::slice::from_ref(s),
            Self::List(values) => values,
        }
    }

    /// Lower and upper bound of a between clause
    ///
    /// A single bound leaves the upper bound `None`, which never matches.
    pub fn bounds(&self) -> (Option<&str>, Option<&str>) {
        let list = self.as_list();
        (
            list.first().map(String::as_str),
            list.get(1).map(String::as_str),
        )
    }
}

/// One parsed `column:operator:value` predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterClause {
    pub column: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
    pub negate: bool,
    pub combinator: Combinator,
}

/// Maps public column aliases to physical column names
///
/// Columns without an entry map to themselves.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    aliases: HashMap<String, String>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias
    pub fn with(mut self, alias: impl Into<String>, column: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), column.into());
        self
    }

    /// Resolve an alias; unknown names pass through unchanged
    pub fn resolve<'a>(&'a self, column: &'a str) -> &'a str {
        self.aliases.get(column).map(String::as_str).unwrap_or(column)
    }
}

impl<K, V> FromIterator<(K, V)> for ColumnMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            aliases: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Filter clauses grouped by filter parameter
///
/// Groups are ANDed; clauses inside a group are ORed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    groups: Vec<Vec<FilterClause>>,
}

impl FilterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one filter parameter value and append it as a group
    ///
    /// Clauses that fail to parse are dropped; the first surviving clause is
    /// tagged AND and the rest OR. A value with no surviving clause adds
    /// nothing.
    pub fn push_raw(&mut self, raw: &str, columns: &ColumnMap) {
        let mut group = Vec::new();
        for part in raw.split(',') {
            let combinator = if group.is_empty() {
                Combinator::And
            } else {
                Combinator::Or
            };
            if let Some(clause) = parse_clause(part, columns, combinator) {
                group.push(clause);
            }
        }
        if !group.is_empty() {
            self.groups.push(group);
        }
    }

    /// Append an already built group
    pub fn push_group(&mut self, clauses: Vec<FilterClause>) {
        if !clauses.is_empty() {
            self.groups.push(clauses);
        }
    }

    pub fn groups(&self) -> &[Vec<FilterClause>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All clauses in declaration order
    pub fn clauses(&self) -> impl Iterator<Item = &FilterClause> {
        self.groups.iter().flatten()
    }
}

/// Parse a single clause
///
/// Splits on `:` into at most three parts. The column is trimmed and mapped,
/// the operator lowercased, the value percent-decoded and trimmed. Returns
/// `None` for an empty column or an unknown operator.
pub fn parse_clause(raw: &str, columns: &ColumnMap, combinator: Combinator) -> Option<FilterClause> {
    let mut parts = raw.trim().splitn(3, ':');
    let column = parts.next().unwrap_or_default().trim();
    let operator = parts.next().unwrap_or_default().trim().to_lowercase();
    let value = parts.next().unwrap_or_default();

    let column = columns.resolve(column).trim();
    if column.is_empty() {
        return None;
    }

    let (operator, negate) = FilterOperator::from_token(&operator)?;
    let value = percent_decode_str(value).decode_utf8_lossy();
    let value = value.trim();

    let value = if operator.takes_list() {
        FilterValue::List(value.split('|').map(str::to_string).collect())
    } else {
        FilterValue::Single(value.to_string())
    };

    Some(FilterClause {
        column: column.to_string(),
        operator,
        value,
        negate,
        combinator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Option<FilterClause> {
        parse_clause(raw, &ColumnMap::new(), Combinator::And)
    }

    // =========================================================================
    // Operator Tests
    // =========================================================================

    #[test]
    fn test_comparison_operators() {
        let cases = [
            ("eq", FilterOperator::Eq, false),
            ("neq", FilterOperator::Eq, true),
            ("gt", FilterOperator::Gt, false),
            ("gte", FilterOperator::Gte, false),
            ("lt", FilterOperator::Lt, false),
            ("lte", FilterOperator::Lte, false),
        ];
        for (token, op, negate) in cases {
            let clause = parse(&format!("age:{}:18", token)).unwrap();
            assert_eq!(clause.operator, op, "token {}", token);
            assert_eq!(clause.negate, negate, "token {}", token);
            assert_eq!(clause.value, FilterValue::Single("18".to_string()));
        }
    }

    #[test]
    fn test_pattern_operators_and_aliases() {
        assert_eq!(
            parse("name:ct:bob").unwrap().operator,
            FilterOperator::Contains
        );
        assert_eq!(
            parse("name:contains:bob").unwrap().operator,
            FilterOperator::Contains
        );
        let nsw = parse("name:nsw:bob").unwrap();
        assert_eq!(nsw.operator, FilterOperator::StartsWith);
        assert!(nsw.negate);
        let new = parse("name:new:bob").unwrap();
        assert_eq!(new.operator, FilterOperator::EndsWith);
        assert!(new.negate);
    }

    #[test]
    fn test_like_patterns_do_not_escape_wildcards() {
        assert_eq!(
            FilterOperator::Contains.like_pattern("50%_off"),
            Some("%50%_off%".to_string())
        );
        assert_eq!(
            FilterOperator::StartsWith.like_pattern("ab"),
            Some("ab%".to_string())
        );
        assert_eq!(
            FilterOperator::EndsWith.like_pattern("ab"),
            Some("%ab".to_string())
        );
        assert_eq!(FilterOperator::Eq.like_pattern("ab"), None);
    }

    #[test]
    fn test_operator_is_case_insensitive() {
        let clause = parse("age: GTE :18").unwrap();
        assert_eq!(clause.operator, FilterOperator::Gte);
    }

    #[test]
    fn test_unknown_operator_dropped() {
        assert!(parse("age:like:18").is_none());
        assert!(parse("age").is_none());
    }

    // =========================================================================
    // Value Tests
    // =========================================================================

    #[test]
    fn test_list_operators_split_on_pipe() {
        let clause = parse("price:bt:10|20").unwrap();
        assert_eq!(
            clause.value,
            FilterValue::List(vec!["10".to_string(), "20".to_string()])
        );

        let clause = parse("status:nin:a|b|c").unwrap();
        assert!(clause.negate);
        assert_eq!(clause.value.as_list().len(), 3);
    }

    #[test]
    fn test_single_value_between_keeps_one_element() {
        let clause = parse("price:bt:10").unwrap();
        assert_eq!(clause.value, FilterValue::List(vec!["10".to_string()]));
        assert_eq!(clause.value.bounds(), (Some("10"), None));
    }

    #[test]
    fn test_value_is_percent_decoded_and_trimmed() {
        let clause = parse("city:eq:%20New%20York%20").unwrap();
        assert_eq!(clause.value, FilterValue::Single("New York".to_string()));
    }

    #[test]
    fn test_value_may_contain_colons() {
        let clause = parse("time:eq:10:30:00").unwrap();
        assert_eq!(clause.value.as_single(), Some("10:30:00"));
    }

    #[test]
    fn test_missing_value_is_empty_string() {
        let clause = parse("name:eq").unwrap();
        assert_eq!(clause.value.as_single(), Some(""));
    }

    #[test]
    fn test_null_operators_ignore_value() {
        let clause = parse("deleted_at:nl").unwrap();
        assert_eq!(clause.operator, FilterOperator::IsNull);
        assert!(!clause.negate);
        let clause = parse("deleted_at:nnl:whatever").unwrap();
        assert!(clause.negate);
    }

    // =========================================================================
    // Column Tests
    // =========================================================================

    #[test]
    fn test_empty_column_dropped() {
        assert!(parse(":eq:1").is_none());
        assert!(parse("   :eq:1").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn test_column_map_resolves_alias() {
        let columns = ColumnMap::new().with("name", "private.name");
        let clause = parse_clause(" name :eq:Tom", &columns, Combinator::And).unwrap();
        assert_eq!(clause.column, "private.name");

        let clause = parse_clause("other:eq:Tom", &columns, Combinator::And).unwrap();
        assert_eq!(clause.column, "other");
    }

    #[test]
    fn test_column_map_from_iter() {
        let columns: ColumnMap = [("a", "b")].into_iter().collect();
        assert_eq!(columns.resolve("a"), "b");
    }

    // =========================================================================
    // Group Tests
    // =========================================================================

    #[test]
    fn test_group_combinators() {
        let mut filters = FilterGroup::new();
        filters.push_raw("age:gte:18", &ColumnMap::new());
        filters.push_raw("city:eq:NY,city:eq:LA", &ColumnMap::new());

        let groups = filters.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][0].combinator, Combinator::And);
        assert_eq!(groups[1][0].combinator, Combinator::And);
        assert_eq!(groups[1][1].combinator, Combinator::Or);
    }

    #[test]
    fn test_group_drops_bad_clauses_and_retags() {
        let mut filters = FilterGroup::new();
        filters.push_raw(":eq:x,city:eq:LA,bad,city:eq:NY", &ColumnMap::new());

        let group = &filters.groups()[0];
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].combinator, Combinator::And);
        assert_eq!(group[1].combinator, Combinator::Or);
    }

    #[test]
    fn test_group_with_nothing_valid_is_skipped() {
        let mut filters = FilterGroup::new();
        filters.push_raw(",,:x", &ColumnMap::new());
        assert!(filters.is_empty());
    }
}
