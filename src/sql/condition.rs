//! Condition building for SQL WHERE and ORDER BY clauses
//!
//! Renders a [`FilterGroup`] against a [`TableSpec`]. Every value is bound as
//! a text parameter and cast in SQL, so placeholders are always `$n::type`.
//!
//! Clauses naming a column the table does not have are dropped, as are
//! groups left empty by that. Values nested in JSON columns compare
//! numerically when both the stored value and the literal are numbers.

use crate::query::descriptor::SortSpec;
use crate::query::filter::{FilterClause, FilterGroup, FilterOperator};
use crate::sql::sanitize::{json_path_literal, quote_identifier};
use crate::table::{ColumnRef, TableSpec};
use crate::types::{ColumnType, is_numeric_literal};

/// Bound text parameters of a rendered statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlParams {
    values: Vec<String>,
    offset: usize,
}

impl SqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering after `offset` placeholders already in the statement
    pub fn with_offset(offset: usize) -> Self {
        Self {
            values: Vec::new(),
            offset,
        }
    }

    /// Bind a value and return its placeholder (`$n`)
    pub fn push(&mut self, value: impl Into<String>) -> String {
        self.values.push(value.into());
        format!("${}", self.offset + self.values.len())
    }

    /// Number of the next placeholder
    pub fn next_index(&self) -> usize {
        self.offset + self.values.len() + 1
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// SQL expression for a column reference
///
/// Nested references render as `"data"#>>'{a,b}'`, which yields text.
pub fn column_expression(column: &ColumnRef<'_>) -> String {
    if column.is_nested() {
        format!(
            "({}#>>{})",
            quote_identifier(&column.column.name),
            json_path_literal(&column.path)
        )
    } else {
        quote_identifier(&column.column.name)
    }
}

/// Test that a nested reference holds a JSON number
fn json_number_test(column: &ColumnRef<'_>) -> String {
    format!(
        "jsonb_typeof({}#>{}) = 'number'",
        quote_identifier(&column.column.name),
        json_path_literal(&column.path)
    )
}

fn nested_numeric(column: &ColumnRef<'_>, literals: &[&str]) -> bool {
    column.is_nested() && literals.iter().all(|v| is_numeric_literal(v))
}

/// Build the WHERE condition for a filter group
///
/// Returns `None` when nothing survives. Groups are ANDed, clauses within a
/// group ORed: `(A) AND (B OR C)`.
pub fn build_condition_clause(
    filters: &FilterGroup,
    spec: &TableSpec,
    params: &mut SqlParams,
) -> Option<String> {
    let groups: Vec<String> = filters
        .groups()
        .iter()
        .filter_map(|group| {
            let clauses: Vec<String> = group
                .iter()
                .filter_map(|clause| build_clause(clause, spec, params))
                .collect();
            if clauses.is_empty() {
                None
            } else {
                Some(format!("({})", clauses.join(" OR ")))
            }
        })
        .collect();

    if groups.is_empty() {
        None
    } else {
        Some(groups.join(" AND "))
    }
}

/// Render one clause, or `None` when its column is unknown
pub fn build_clause(clause: &FilterClause, spec: &TableSpec, params: &mut SqlParams) -> Option<String> {
    let Some(column) = spec.column_ref(&clause.column) else {
        tracing::debug!(column = %clause.column, "dropping filter on unknown column");
        return None;
    };

    let expr = column_expression(&column);
    // JSON paths come out of `#>>` as text; numbers among them compare numerically.
    let column_type = if column.is_nested() {
        &ColumnType::String
    } else {
        &column.column.column_type
    };
    let not = if clause.negate { "NOT " } else { "" };

    let sql = match clause.operator {
        FilterOperator::IsNull => format!("{} IS {}NULL", expr, not),
        FilterOperator::Eq
        | FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => {
            let value = clause.value.as_single().unwrap_or_default();
            let operator = comparison_operator(clause.operator, clause.negate);
            if nested_numeric(&column, &[value]) {
                let placeholder = params.push(value);
                format!(
                    "CASE WHEN {} THEN {}::numeric {op} {p}::numeric ELSE {}::text {op} {p}::text END",
                    json_number_test(&column),
                    expr,
                    expr,
                    op = operator,
                    p = placeholder
                )
            } else {
                let (lhs, cast) = typed_operands(&expr, column_type, &[value]);
                let placeholder = params.push(value);
                format!("{} {} {}::{}", lhs, operator, placeholder, cast)
            }
        }
        FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
            let pattern = clause
                .operator
                .like_pattern(clause.value.as_single().unwrap_or_default())
                .unwrap_or_default();
            let placeholder = params.push(pattern);
            format!("{}::text {}LIKE {}::text", expr, not, placeholder)
        }
        FilterOperator::Between => {
            let (low, high) = clause.value.bounds();
            // A range needs both bounds; with one it matches nothing, negated or not.
            let (Some(low), Some(high)) = (low, high) else {
                return Some("FALSE".to_string());
            };
            if nested_numeric(&column, &[low, high]) {
                let (low, high) = (params.push(low), params.push(high));
                format!(
                    "CASE WHEN {} THEN {e}::numeric {n}BETWEEN {l}::numeric AND {h}::numeric \
                     ELSE {e}::text {n}BETWEEN {l}::text AND {h}::text END",
                    json_number_test(&column),
                    e = expr,
                    n = not,
                    l = low,
                    h = high
                )
            } else {
                let (lhs, cast) = typed_operands(&expr, column_type, &[low, high]);
                let (low, high) = (params.push(low), params.push(high));
                format!("{} {}BETWEEN {}::{} AND {}::{}", lhs, not, low, cast, high, cast)
            }
        }
        FilterOperator::In => {
            let list = serde_json::to_string(clause.value.as_list()).unwrap_or_else(|_| "[]".to_string());
            let placeholder = params.push(list);
            let any = format!(
                "{}::text = ANY(SELECT jsonb_array_elements_text({}::jsonb))",
                expr, placeholder
            );
            if clause.negate {
                format!("NOT ({})", any)
            } else {
                any
            }
        }
    };

    Some(sql)
}

fn comparison_operator(operator: FilterOperator, negate: bool) -> &'static str {
    match (operator, negate) {
        (FilterOperator::Eq, false) => "=",
        (FilterOperator::Eq, true) => "!=",
        (FilterOperator::Gt, _) => ">",
        (FilterOperator::Gte, _) => ">=",
        (FilterOperator::Lt, _) => "<",
        _ => "<=",
    }
}

/// Left-hand side and cast for a comparison
///
/// Compares in the column's own type when every literal parses as it,
/// otherwise both sides as text.
fn typed_operands(expr: &str, column_type: &ColumnType, literals: &[&str]) -> (String, &'static str) {
    match column_type.filter_cast() {
        Some(cast) if literals.iter().all(|v| column_type.accepts_filter_literal(v)) => {
            (expr.to_string(), cast)
        }
        _ => (format!("{}::text", expr), "text"),
    }
}

/// Build the ORDER BY list for sort specs
///
/// Returns `None` when no sort names a known column.
pub fn build_order_by_clause(sorts: &[SortSpec], spec: &TableSpec) -> Option<String> {
    let parts: Vec<String> = sorts
        .iter()
        .filter_map(|sort| {
            let column = spec.column_ref(&sort.column)?;
            Some(format!(
                "{} {}",
                column_expression(&column),
                sort.direction.as_sql()
            ))
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Build the SELECT list for selected columns
///
/// `*`, or the known top-level columns in request order; `*` when none of
/// the requested columns exist.
pub fn build_select_list(columns: &[String], spec: &TableSpec) -> String {
    if columns.iter().any(|c| c == "*") {
        return "*".to_string();
    }
    let known: Vec<String> = columns
        .iter()
        .filter(|c| spec.has_column(c))
        .map(|c| quote_identifier(c))
        .collect();
    if known.is_empty() {
        "*".to_string()
    } else {
        known.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::{QueryDescriptor, QueryParams, SortDirection};
    use crate::query::filter::{ColumnMap, Combinator, parse_clause};
    use crate::types::ColumnDefinition;

    fn spec() -> TableSpec {
        TableSpec::default()
            .with_column(ColumnDefinition::new("age", ColumnType::Integer))
            .with_column(ColumnDefinition::new("city", ColumnType::String))
            .with_column(ColumnDefinition::new("price", ColumnType::decimal(10, 2)))
    }

    fn render(raw: &str) -> (Option<String>, Vec<String>) {
        let clause = parse_clause(raw, &ColumnMap::new(), Combinator::And).unwrap();
        let mut params = SqlParams::new();
        let sql = build_clause(&clause, &spec(), &mut params);
        (sql, params.into_values())
    }

    // ==================== Comparison Operations ====================

    #[test]
    fn test_eq_text_column() {
        let (sql, params) = render("city:eq:NY");
        assert_eq!(sql.unwrap(), "\"city\"::text = $1::text");
        assert_eq!(params, vec!["NY"]);
    }

    #[test]
    fn test_neq() {
        let (sql, _) = render("city:neq:NY");
        assert_eq!(sql.unwrap(), "\"city\"::text != $1::text");
    }

    #[test]
    fn test_typed_numeric_comparison() {
        let (sql, params) = render("age:gte:18");
        assert_eq!(sql.unwrap(), "\"age\" >= $1::numeric");
        assert_eq!(params, vec!["18"]);
    }

    #[test]
    fn test_non_numeric_literal_falls_back_to_text() {
        let (sql, _) = render("age:gt:abc");
        assert_eq!(sql.unwrap(), "\"age\"::text > $1::text");
    }

    #[test]
    fn test_timestamp_comparison() {
        let (sql, _) = render("started_at:lt:2024-01-01");
        assert_eq!(sql.unwrap(), "\"started_at\" < $1::timestamptz");
    }

    // ==================== Pattern Operations ====================

    #[test]
    fn test_like_patterns() {
        let (sql, params) = render("city:ct:or");
        assert_eq!(sql.unwrap(), "\"city\"::text LIKE $1::text");
        assert_eq!(params, vec!["%or%"]);

        let (sql, params) = render("city:nsw:N");
        assert_eq!(sql.unwrap(), "\"city\"::text NOT LIKE $1::text");
        assert_eq!(params, vec!["N%"]);

        let (_, params) = render("city:ew:rk");
        assert_eq!(params, vec!["%rk"]);
    }

    // ==================== Between / In / Null ====================

    #[test]
    fn test_between() {
        let (sql, params) = render("price:bt:10|20");
        assert_eq!(sql.unwrap(), "\"price\" BETWEEN $1::numeric AND $2::numeric");
        assert_eq!(params, vec!["10", "20"]);

        let (sql, _) = render("price:nbt:10|20");
        assert_eq!(sql.unwrap(), "\"price\" NOT BETWEEN $1::numeric AND $2::numeric");
    }

    #[test]
    fn test_single_value_between_never_matches() {
        for raw in ["price:bt:10", "price:nbt:10", "data.qty:nbt:10"] {
            let (sql, params) = render(raw);
            assert_eq!(sql.unwrap(), "FALSE", "{}", raw);
            assert!(params.is_empty());
        }
    }

    #[test]
    fn test_in_uses_jsonb_array() {
        let (sql, params) = render("city:in:NY|LA");
        assert_eq!(
            sql.unwrap(),
            "\"city\"::text = ANY(SELECT jsonb_array_elements_text($1::jsonb))"
        );
        assert_eq!(params, vec![r#"["NY","LA"]"#]);

        let (sql, _) = render("city:nin:NY");
        assert!(sql.unwrap().starts_with("NOT (\"city\"::text = ANY("));
    }

    #[test]
    fn test_null_checks() {
        let (sql, params) = render("ended_at:nl");
        assert_eq!(sql.unwrap(), "\"ended_at\" IS NULL");
        assert!(params.is_empty());

        let (sql, _) = render("ended_at:nnl");
        assert_eq!(sql.unwrap(), "\"ended_at\" IS NOT NULL");
    }

    // ==================== Columns ====================

    #[test]
    fn test_json_path_column() {
        let (sql, _) = render("data.color.name:eq:red");
        assert_eq!(sql.unwrap(), "(\"data\"#>>'{color,name}')::text = $1::text");
    }

    #[test]
    fn test_json_path_numeric_literal_compares_json_numbers_numerically() {
        let (sql, params) = render("data.qty:gt:5");
        assert_eq!(
            sql.unwrap(),
            "CASE WHEN jsonb_typeof(\"data\"#>'{qty}') = 'number' \
             THEN (\"data\"#>>'{qty}')::numeric > $1::numeric \
             ELSE (\"data\"#>>'{qty}')::text > $1::text END"
        );
        assert_eq!(params, vec!["5"]);
    }

    #[test]
    fn test_json_path_numeric_between() {
        let (sql, params) = render("data.qty:nbt:2|8");
        let sql = sql.unwrap();
        assert!(sql.contains("(\"data\"#>>'{qty}')::numeric NOT BETWEEN $1::numeric AND $2::numeric"));
        assert!(sql.contains("ELSE (\"data\"#>>'{qty}')::text NOT BETWEEN $1::text AND $2::text END"));
        assert_eq!(params, vec!["2", "8"]);
    }

    #[test]
    fn test_json_path_text_literal_compares_as_text() {
        let (sql, _) = render("data.qty:gt:many");
        assert_eq!(sql.unwrap(), "(\"data\"#>>'{qty}')::text > $1::text");
    }

    #[test]
    fn test_unknown_column_dropped() {
        let (sql, params) = render("nope:eq:1");
        assert!(sql.is_none());
        assert!(params.is_empty());
    }

    // ==================== Grouping ====================

    #[test]
    fn test_groups_and_of_ors() {
        let params_in = QueryParams::parse("filter[]=age:gte:18&filter[]=city:eq:NY,city:eq:LA");
        let descriptor = QueryDescriptor::build(&params_in, "GET");
        let mut params = SqlParams::new();
        let sql = build_condition_clause(&descriptor.filters, &spec(), &mut params).unwrap();

        assert_eq!(
            sql,
            "(\"age\" >= $1::numeric) AND (\"city\"::text = $2::text OR \"city\"::text = $3::text)"
        );
        assert_eq!(params.values(), &["18", "NY", "LA"]);
    }

    #[test]
    fn test_group_emptied_by_unknown_columns_is_dropped() {
        let mut filters = FilterGroup::new();
        filters.push_raw("nope:eq:1,other:eq:2", &ColumnMap::new());
        let mut params = SqlParams::new();
        assert!(build_condition_clause(&filters, &spec(), &mut params).is_none());
    }

    #[test]
    fn test_param_offset() {
        let mut filters = FilterGroup::new();
        filters.push_raw("city:eq:a", &ColumnMap::new());
        let mut params = SqlParams::with_offset(2);
        let sql = build_condition_clause(&filters, &spec(), &mut params).unwrap();
        assert!(sql.contains("$3::text"));
        assert_eq!(params.next_index(), 4);
    }

    // ==================== ORDER BY / SELECT ====================

    #[test]
    fn test_order_by() {
        let sorts = vec![
            SortSpec {
                column: "age".to_string(),
                direction: SortDirection::Desc,
            },
            SortSpec {
                column: "nope".to_string(),
                direction: SortDirection::Asc,
            },
            SortSpec {
                column: "data.rank".to_string(),
                direction: SortDirection::Asc,
            },
        ];
        assert_eq!(
            build_order_by_clause(&sorts, &spec()).unwrap(),
            "\"age\" DESC, (\"data\"#>>'{rank}') ASC"
        );
        assert!(build_order_by_clause(&sorts[1..2], &spec()).is_none());
    }

    #[test]
    fn test_select_list() {
        assert_eq!(build_select_list(&["*".to_string()], &spec()), "*");
        assert_eq!(
            build_select_list(&["uid".to_string(), "nope".to_string(), "age".to_string()], &spec()),
            "\"uid\", \"age\""
        );
        assert_eq!(build_select_list(&["nope".to_string()], &spec()), "*");
    }
}
