//! Query descriptor built from request query parameters
//!
//! Grammar:
//! - `select=col1,col2`
//! - `filter[]=col:op:value` (repeatable, comma = OR inside one value)
//! - `sort[]=col:dir` or `sort[]=col|dir` (repeatable)
//! - `limit` / `per_page`, `page`
//!
//! Building never fails. Anything malformed is dropped or replaced by its
//! default.

use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::query::filter::{ColumnMap, FilterGroup};

/// Page size used when the request names none
pub const DEFAULT_PAGE_SIZE: u32 = 15;

static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("numeric pattern is valid")
});

/// Whether a trimmed string looks like a number
pub fn is_numeric(value: &str) -> bool {
    NUMERIC_RE.is_match(value.trim())
}

/// Raw query parameters in arrival order
///
/// Keys ending in `[]` are treated as their bare name, so `filter[]=a` and
/// `filter=a` both contribute to `filter`.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (`a=1&filter[]=x:eq:1`)
    ///
    /// Keys and values are percent-decoded once; `+` is kept literally.
    pub fn parse(query: &str) -> Self {
        let pairs = query
            .trim_start_matches('?')
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (
                    percent_decode_str(key).decode_utf8_lossy().into_owned(),
                    percent_decode_str(value).decode_utf8_lossy().into_owned(),
                )
            })
            .collect();
        Self { pairs }
    }

    /// Append a pair
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    /// Every value given for `name`, in order
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(key, _)| Self::base_key(key) == name)
            .map(|(_, value)| value.as_str())
    }

    /// The last value given for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(key, _)| Self::base_key(key) == name)
            .map(|(_, value)| value.as_str())
    }

    fn base_key(key: &str) -> &str {
        key.strip_suffix("[]").unwrap_or(key)
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One `ORDER BY` term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Parse `column:direction` or `column|direction`
    ///
    /// `:` is the separator when present, else `|`. An empty column or an
    /// unknown direction yields `None`.
    pub fn parse(raw: &str, columns: &ColumnMap) -> Option<Self> {
        let separator = if raw.contains(':') { ':' } else { '|' };
        let mut parts = raw.trim().splitn(2, separator);
        let column = parts.next().unwrap_or_default().trim();
        let direction = SortDirection::parse(parts.next().unwrap_or_default())?;

        let column = columns.resolve(column).trim();
        if column.is_empty() {
            return None;
        }

        Some(Self {
            column: column.to_string(),
            direction,
        })
    }
}

/// Everything needed to run one list or delete request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub selected_columns: Vec<String>,
    pub filters: FilterGroup,
    pub sorts: Vec<SortSpec>,
    pub page: u32,
    pub page_size: u32,
    /// Delete every row matching `filters` instead of reading a page
    pub is_delete: bool,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self {
            selected_columns: vec!["*".to_string()],
            filters: FilterGroup::default(),
            sorts: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            is_delete: false,
        }
    }
}

impl QueryDescriptor {
    /// Build with default settings
    pub fn build(params: &QueryParams, method: &str) -> Self {
        DescriptorBuilder::new().build(params, method)
    }

    /// Whether every column is selected
    pub fn selects_all(&self) -> bool {
        self.selected_columns.iter().any(|c| c == "*")
    }

    /// Row offset of the requested page
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// Builds [`QueryDescriptor`]s with a column map and a default page size
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    columns: ColumnMap,
    default_page_size: u32,
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self {
            columns: ColumnMap::new(),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the alias map used for filter and sort columns
    pub fn column_map(mut self, columns: ColumnMap) -> Self {
        self.columns = columns;
        self
    }

    /// Set the page size used when the request names none
    pub fn default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    /// Build a descriptor from query parameters and the HTTP method
    pub fn build(&self, params: &QueryParams, method: &str) -> QueryDescriptor {
        let selected_columns = Self::select(params.get("select"));

        let mut filters = FilterGroup::new();
        for raw in params.all("filter") {
            filters.push_raw(raw, &self.columns);
        }

        let sorts = params
            .all("sort")
            .filter_map(|raw| SortSpec::parse(raw, &self.columns))
            .collect();

        let page_size = Self::positive(params.get("limit"))
            .or_else(|| Self::positive(params.get("per_page")))
            .unwrap_or(self.default_page_size);
        let page = Self::positive(params.get("page")).unwrap_or(1);

        let descriptor = QueryDescriptor {
            selected_columns,
            filters,
            sorts,
            page,
            page_size,
            is_delete: method.trim().eq_ignore_ascii_case("delete"),
        };

        tracing::debug!(
            groups = descriptor.filters.groups().len(),
            sorts = descriptor.sorts.len(),
            page = descriptor.page,
            page_size = descriptor.page_size,
            is_delete = descriptor.is_delete,
            "built query descriptor"
        );

        descriptor
    }

    fn select(raw: Option<&str>) -> Vec<String> {
        let columns: Vec<String> = raw
            .map(|raw| {
                raw.to_lowercase()
                    .split(',')
                    .map(|col| {
                        col.chars()
                            .filter(|c| {
                                c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '*'
                            })
                            .collect::<String>()
                    })
                    .filter(|col| !col.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if columns.is_empty() {
            vec!["*".to_string()]
        } else {
            columns
        }
    }

    /// A numeric parameter truncated to an integer; absent, zero, negative
    /// or non-numeric values count as not given
    fn positive(raw: Option<&str>) -> Option<u32> {
        let raw = raw?.trim();
        if !is_numeric(raw) {
            return None;
        }
        let value = raw.parse::<f64>().ok()?.trunc();
        if value >= 1.0 && value <= f64::from(u32::MAX) {
            Some(value as u32)
        } else {
            None
        }
    }
}
