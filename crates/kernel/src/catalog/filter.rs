//! Filter expression parser.
//!
//! A filter string is a sequence of parenthesized groups joined by `&&` or
//! `||`. Each group holds one or more conditions of the shape
//! `attribute__operator=value`, separated by `&&` or `||`:
//!
//! ```text
//! (id__exact=5||name__like='%chair%')&&(is_hidden__isnull=true)
//! ```
//!
//! Parsing validates every condition against the [`AttributeRegistry`],
//! coerces its value to the attribute's type, and renders a SQL condition.
//! Exact-match conditions are collected so the join resolver can push them
//! into ON clauses.
//!
//! Within a group, `&&` and `||` are interchangeable as condition
//! delimiters; the connective written between two conditions is still the
//! one rendered into SQL. Nested parentheses are not supported.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::registry::{AttributeDescriptor, AttributeRegistry};
use super::types::ValueType;

/// `attribute__operator=value`; the attribute stops at the first `__`.
#[allow(clippy::expect_used)]
static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([A-Za-z0-9_]+?)__([A-Za-z]+)=(.*)$").expect("condition pattern compiles")
});

/// Filter grammar and coercion errors.
///
/// The `Display` text is returned verbatim to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter string")]
    Malformed,

    #[error("{0} filter does not exist.")]
    UnknownAttribute(String),

    #[error("__{0} is an invalid operation.")]
    UnknownOperator(String),

    #[error("{0} is not a valid integer.")]
    InvalidInteger(String),

    #[error("{0} is an invalid list string.")]
    InvalidList(String),

    #[error("{0} is not a valid boolean.")]
    InvalidBoolean(String),

    #[error("{0} is not a valid float.")]
    InvalidFloat(String),
}

/// Condition operators, addressed by their `__suffix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Exact,
    In,
    Not,
    IsNull,
    Is,
    NotExact,
    GreaterThanOrEquals,
    LessThanOrEquals,
    Like,
    Contains,
}

impl FilterOperator {
    /// Resolve an operator suffix (without the leading `__`).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let op = match suffix {
            "exact" => FilterOperator::Exact,
            "in" => FilterOperator::In,
            "not" => FilterOperator::Not,
            "isnull" => FilterOperator::IsNull,
            "is" => FilterOperator::Is,
            "notexact" => FilterOperator::NotExact,
            "greaterthanrequals" => FilterOperator::GreaterThanOrEquals,
            "lessthanrequals" => FilterOperator::LessThanOrEquals,
            "like" => FilterOperator::Like,
            "contains" => FilterOperator::Contains,
            _ => return None,
        };
        Some(op)
    }

    pub fn suffix(self) -> &'static str {
        match self {
            FilterOperator::Exact => "exact",
            FilterOperator::In => "in",
            FilterOperator::Not => "not",
            FilterOperator::IsNull => "isnull",
            FilterOperator::Is => "is",
            FilterOperator::NotExact => "notexact",
            FilterOperator::GreaterThanOrEquals => "greaterthanrequals",
            FilterOperator::LessThanOrEquals => "lessthanrequals",
            FilterOperator::Like => "like",
            FilterOperator::Contains => "contains",
        }
    }

    /// SQL fragment placed between column and value.
    pub fn as_sql(self) -> &'static str {
        match self {
            FilterOperator::Exact => "=",
            FilterOperator::In => " IN ",
            FilterOperator::Not => " IS NOT ",
            FilterOperator::IsNull | FilterOperator::Is => " IS ",
            FilterOperator::NotExact => " != ",
            FilterOperator::GreaterThanOrEquals => ">=",
            FilterOperator::LessThanOrEquals => "<=",
            FilterOperator::Like => " LIKE ",
            FilterOperator::Contains => " @> ",
        }
    }
}

/// A condition value after type coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    IntList(Vec<i64>),
    Text(String),
    Boolean(bool),
    Float(f64),
}

impl FilterValue {
    /// Coerce a raw literal to `value_type`.
    ///
    /// `attribute` names the field in error messages.
    pub fn coerce(attribute: &str, value_type: ValueType, raw: &str) -> Result<Self, FilterError> {
        match value_type {
            ValueType::String | ValueType::Json | ValueType::Date => {
                Ok(FilterValue::Text(raw.to_string()))
            }
            ValueType::Int => strip_quotes(raw)
                .trim()
                .parse()
                .map(FilterValue::Int)
                .map_err(|_| FilterError::InvalidInteger(attribute.to_string())),
            ValueType::IntArray => parse_int_list(&strip_quotes(raw))
                .map(FilterValue::IntList)
                .ok_or_else(|| FilterError::InvalidList(attribute.to_string())),
            ValueType::Boolean => parse_bool(&strip_quotes(raw))
                .map(FilterValue::Boolean)
                .ok_or_else(|| FilterError::InvalidBoolean(attribute.to_string())),
            ValueType::Float => strip_quotes(raw)
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(FilterValue::Float)
                .ok_or_else(|| FilterError::InvalidFloat(attribute.to_string())),
        }
    }

    /// Literal form that coerces back to the same value.
    pub fn literal(&self) -> String {
        match self {
            FilterValue::Int(v) => v.to_string(),
            FilterValue::IntList(items) => {
                let parts: Vec<String> = items.iter().map(i64::to_string).collect();
                format!("[{}]", parts.join(", "))
            }
            FilterValue::Text(s) => s.clone(),
            FilterValue::Boolean(b) => b.to_string(),
            FilterValue::Float(f) => f.to_string(),
        }
    }

    /// Value as rendered after `operator`.
    fn to_sql(&self, operator: FilterOperator) -> String {
        match (operator, self) {
            (FilterOperator::IsNull, FilterValue::Boolean(true)) => "NULL".to_string(),
            (FilterOperator::IsNull, FilterValue::Boolean(false)) => "NOT NULL".to_string(),
            (FilterOperator::In, value) => value.literal().replace('[', "(").replace(']', ")"),
            (FilterOperator::Contains, FilterValue::IntList(_)) => {
                format!("ARRAY{}", self.literal())
            }
            (_, value) => value.literal(),
        }
    }
}

/// Remove single and double quotes from a non-string literal.
fn strip_quotes(raw: &str) -> String {
    raw.chars().filter(|c| *c != '\'' && *c != '"').collect()
}

/// Parse a `[1, 2, 3]` list literal. Empty lists are rejected.
fn parse_int_list(raw: &str) -> Option<Vec<i64>> {
    let inner = raw.trim().strip_prefix('[')?.strip_suffix(']')?;
    let mut items = Vec::new();
    let mut parts = inner.split(',').map(str::trim).peekable();
    while let Some(part) = parts.next() {
        if part.is_empty() && parts.peek().is_none() && !items.is_empty() {
            // trailing comma
            break;
        }
        items.push(part.parse().ok()?);
    }
    if items.is_empty() { None } else { Some(items) }
}

/// Truthy/falsy words accepted for boolean attributes (case-insensitive).
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// One validated condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    /// External attribute name.
    pub attribute: String,
    pub operator: FilterOperator,
    pub raw_value: String,
    pub value: FilterValue,
    /// Rendered SQL, e.g. `product.id=5`.
    pub sql: String,
}

/// Map from external attribute to its `__exact` condition SQL.
pub type ExactMatches = HashMap<String, String>;

/// Result of parsing a filter string.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFilter {
    /// Boolean expression without the `where` keyword.
    pub expression: String,
    /// Conditions in source order.
    pub conditions: Vec<FilterCondition>,
    /// Last exact-match condition per attribute.
    pub exact_matches: ExactMatches,
}

impl ParsedFilter {
    /// `where <expression>`
    pub fn where_clause(&self) -> String {
        format!("where {}", self.expression)
    }

    /// Distinct attributes referenced by the filter, in source order.
    pub fn referenced_attributes(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for cond in &self.conditions {
            if !seen.contains(&cond.attribute.as_str()) {
                seen.push(cond.attribute.as_str());
            }
        }
        seen
    }

    /// Exact-match SQL for `attribute`, if the filter pinned it.
    pub fn exact_match(&self, attribute: &str) -> Option<&str> {
        self.exact_matches.get(attribute).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connective::And => f.write_str("and"),
            Connective::Or => f.write_str("or"),
        }
    }
}

/// Top-level piece of a filter string.
#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Group(&'a str),
    Between(&'a str),
}

/// Split into parenthesized groups and the text between them.
///
/// Unbalanced or nested parentheses are malformed.
fn split_groups(input: &str) -> Result<Vec<Segment<'_>>, FilterError> {
    let mut segments = Vec::new();
    let mut open: Option<usize> = None;
    let mut last_end = 0;

    for (idx, ch) in input.char_indices() {
        match ch {
            '(' => {
                if open.is_some() {
                    return Err(FilterError::Malformed);
                }
                segments.push(Segment::Between(&input[last_end..idx]));
                open = Some(idx);
            }
            ')' => {
                let start = open.take().ok_or(FilterError::Malformed)?;
                segments.push(Segment::Group(&input[start + 1..idx]));
                last_end = idx + 1;
            }
            _ => {}
        }
    }

    if open.is_some() {
        return Err(FilterError::Malformed);
    }
    segments.push(Segment::Between(&input[last_end..]));

    if !segments.iter().any(|s| matches!(s, Segment::Group(_))) {
        return Err(FilterError::Malformed);
    }
    Ok(segments)
}

/// Parse the text between groups: nothing at the ends, one connective inside.
fn parse_between(text: &str) -> Result<Option<Connective>, FilterError> {
    match text.trim() {
        "" => Ok(None),
        "&&" => Ok(Some(Connective::And)),
        "||" => Ok(Some(Connective::Or)),
        _ => Err(FilterError::Malformed),
    }
}

/// Split a group body on `&&` / `||`, keeping the connective that preceded
/// each condition after the first.
fn split_conditions(body: &str) -> Vec<(Option<Connective>, &str)> {
    let mut parts = Vec::new();
    let mut pending = None;
    let mut rest = body;

    loop {
        let and = rest.find("&&");
        let or = rest.find("||");
        let next = match (and, or) {
            (Some(a), Some(o)) if a < o => Some((a, Connective::And)),
            (Some(_), Some(o)) => Some((o, Connective::Or)),
            (Some(a), None) => Some((a, Connective::And)),
            (None, Some(o)) => Some((o, Connective::Or)),
            (None, None) => None,
        };
        match next {
            Some((idx, connective)) => {
                parts.push((pending, &rest[..idx]));
                pending = Some(connective);
                rest = &rest[idx + 2..];
            }
            None => {
                parts.push((pending, rest));
                return parts;
            }
        }
    }
}

/// Parses filter strings against a registry.
pub struct FilterExpressionParser<'r> {
    registry: &'r AttributeRegistry,
}

impl<'r> FilterExpressionParser<'r> {
    pub fn new(registry: &'r AttributeRegistry) -> Self {
        Self { registry }
    }

    /// Parse and validate a full filter string.
    pub fn parse(&self, input: &str) -> Result<ParsedFilter, FilterError> {
        let segments = split_groups(input)?;
        let group_count = segments
            .iter()
            .filter(|s| matches!(s, Segment::Group(_)))
            .count();

        let mut pieces: Vec<String> = Vec::new();
        let mut conditions = Vec::new();
        let mut exact_matches = ExactMatches::new();
        let mut groups_seen = 0;

        for segment in segments {
            match segment {
                Segment::Between(text) => {
                    let connective = parse_between(text)?;
                    let interior = groups_seen > 0 && groups_seen < group_count;
                    match (interior, connective) {
                        (true, Some(c)) => pieces.push(c.to_string()),
                        (false, None) => {}
                        _ => return Err(FilterError::Malformed),
                    }
                }
                Segment::Group(body) => {
                    groups_seen += 1;
                    let mut rendered = Vec::new();
                    for (connective, text) in split_conditions(body) {
                        let condition = self.parse_condition(text.trim())?;
                        if condition.operator == FilterOperator::Exact {
                            exact_matches.insert(condition.attribute.clone(), condition.sql.clone());
                        }
                        if let Some(c) = connective {
                            rendered.push(c.to_string());
                        }
                        rendered.push(condition.sql.clone());
                        conditions.push(condition);
                    }
                    if rendered.len() == 1 {
                        pieces.append(&mut rendered);
                    } else {
                        pieces.push(format!("({})", rendered.join(" ")));
                    }
                }
            }
        }

        Ok(ParsedFilter {
            expression: pieces.join(" "),
            conditions,
            exact_matches,
        })
    }

    /// Parse one `attribute__operator=value` condition.
    pub fn parse_condition(&self, text: &str) -> Result<FilterCondition, FilterError> {
        let caps = CONDITION_RE.captures(text).ok_or(FilterError::Malformed)?;
        let (attribute, suffix, raw_value) = (&caps[1], &caps[2], &caps[3]);

        let descriptor = self
            .registry
            .lookup(attribute)
            .ok_or_else(|| FilterError::UnknownAttribute(attribute.to_string()))?;
        let operator = FilterOperator::from_suffix(suffix)
            .ok_or_else(|| FilterError::UnknownOperator(suffix.to_string()))?;
        let value = coerce_for(descriptor, operator, raw_value)?;

        let sql = format!(
            "{}{}{}",
            descriptor.filter_expr(),
            operator.as_sql(),
            value.to_sql(operator)
        );

        Ok(FilterCondition {
            attribute: attribute.to_string(),
            operator,
            raw_value: raw_value.to_string(),
            value,
            sql,
        })
    }
}

/// `isnull` takes a boolean whatever the attribute type.
fn coerce_for(
    descriptor: &AttributeDescriptor,
    operator: FilterOperator,
    raw: &str,
) -> Result<FilterValue, FilterError> {
    let value_type = if operator == FilterOperator::IsNull {
        ValueType::Boolean
    } else {
        descriptor.value_type
    };
    FilterValue::coerce(&descriptor.external_name, value_type, raw)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::registry::product_catalog;

    fn parse(input: &str) -> Result<ParsedFilter, FilterError> {
        let registry = product_catalog("").unwrap();
        FilterExpressionParser::new(&registry).parse(input)
    }

    #[test]
    fn single_exact_condition() {
        let parsed = parse("(id__exact=5)").unwrap();
        assert_eq!(parsed.where_clause(), "where product.id=5");
        assert_eq!(parsed.exact_match("id"), Some("product.id=5"));
    }

    #[test]
    fn isnull_true_and_false() {
        let parsed = parse("(is_hidden__isnull=true)").unwrap();
        assert_eq!(parsed.expression, "product.is_hidden IS NULL");

        let parsed = parse("(is_hidden__isnull=False)").unwrap();
        assert_eq!(parsed.expression, "product.is_hidden IS NOT NULL");
    }

    #[test]
    fn isnull_on_integer_attribute_takes_boolean() {
        let parsed = parse("(variant_of__isnull=true)").unwrap();
        assert_eq!(parsed.expression, "product.variant_of IS NULL");

        let err = parse("(variant_of__isnull=7)").unwrap_err();
        assert_eq!(err.to_string(), "variant_of is not a valid boolean.");
    }

    #[test]
    fn in_operator_renders_tuple() {
        let parsed = parse("(product_ids__in=[1,2,3])").unwrap();
        assert_eq!(parsed.expression, "product.id IN (1, 2, 3)");

        let parsed = parse("(category__in=['sofa','chair'])").unwrap();
        assert_eq!(parsed.expression, "product.category IN ('sofa','chair')");
    }

    #[test]
    fn int_array_contains_uses_array_literal() {
        let parsed = parse("(model_status__contains=[2])").unwrap();
        assert_eq!(parsed.expression, "product.model_status @> ARRAY[2]");
    }

    #[test]
    fn operator_vocabulary() {
        let cases = [
            ("(name__notexact='x')", "product.name != 'x'"),
            ("(height__greaterthanrequals=10)", "product.height>=10"),
            ("(height__lessthanrequals=10)", "product.height<=10"),
            ("(name__like='%sofa%')", "product.name LIKE '%sofa%'"),
            ("(scans__is=true)", "product.scans IS true"),
            ("(scans__not=true)", "product.scans IS NOT true"),
        ];
        for (input, expected) in cases {
            assert_eq!(parse(input).unwrap().expression, expected, "input: {input}");
        }
    }

    #[test]
    fn filter_conversion_wraps_column() {
        let parsed = parse("(created_on__exact='01 January 2024')").unwrap();
        assert_eq!(
            parsed.expression,
            "TO_CHAR(product.created_on,'DD Month YYYY')='01 January 2024'"
        );
    }

    #[test]
    fn quotes_stripped_from_non_string_values() {
        let parsed = parse("(id__exact='5')").unwrap();
        assert_eq!(parsed.expression, "product.id=5");
    }

    #[test]
    fn groups_joined_by_connectives() {
        let parsed = parse("(id__exact=5)&&(is_hidden__isnull=true)||(name__exact='a')").unwrap();
        assert_eq!(
            parsed.expression,
            "product.id=5 and product.is_hidden IS NULL or product.name='a'"
        );
    }

    /// Inside one group `&&` and `||` both split conditions; each connective
    /// is still rendered as written.
    #[test]
    fn and_or_collapse_inside_group() {
        let parsed = parse("(id__exact=5&&name__exact='a'||height__exact=3)").unwrap();

        assert_eq!(parsed.conditions.len(), 3);
        assert_eq!(
            parsed.expression,
            "(product.id=5 and product.name='a' or product.height=3)"
        );
    }

    #[test]
    fn whitespace_around_conditions_is_ignored() {
        let parsed = parse("( id__exact=5 || id__exact=6 ) && (scans__exact=yes)").unwrap();
        assert_eq!(
            parsed.expression,
            "(product.id=5 or product.id=6) and product.scans=true"
        );
    }

    #[test]
    fn exact_matches_keep_last_and_skip_other_operators() {
        let parsed = parse("(sequence_id__exact=3||sequence_id__exact=4)&&(product_ids__in=[1])").unwrap();

        assert_eq!(
            parsed.exact_match("sequence_id"),
            Some("arrangement_data.sequence_id=4")
        );
        assert_eq!(parsed.exact_match("product_ids"), None);
        assert_eq!(
            parsed.referenced_attributes(),
            vec!["sequence_id", "product_ids"]
        );
    }

    #[test]
    fn malformed_filters() {
        for input in [
            "()",
            "",
            "id__exact=5",
            "((id__exact=5))",
            "(id__exact=5",
            "id__exact=5)",
            "(id__exact=5)(id__exact=6)",
            "&&(id__exact=5)",
            "(id__exact=5) drop table",
            "(id=5)",
            "(id__exact)",
            "(id__exact=5||)",
        ] {
            assert_eq!(parse(input), Err(FilterError::Malformed), "input: {input:?}");
        }
    }

    #[test]
    fn unknown_attribute_and_operator() {
        assert_eq!(
            parse("(nope__exact=1)").unwrap_err().to_string(),
            "nope filter does not exist."
        );
        assert_eq!(
            parse("(id__between=1)").unwrap_err().to_string(),
            "__between is an invalid operation."
        );
    }

    #[test]
    fn coercion_errors() {
        assert_eq!(
            parse("(id__in=[1,2])").unwrap_err().to_string(),
            "id is not a valid integer."
        );
        assert_eq!(
            parse("(id__exact=abc)").unwrap_err().to_string(),
            "id is not a valid integer."
        );
        assert_eq!(
            parse("(product_ids__in=[1,x])").unwrap_err().to_string(),
            "product_ids is an invalid list string."
        );
        assert_eq!(
            parse("(scans__exact=maybe)").unwrap_err().to_string(),
            "scans is not a valid boolean."
        );
        assert_eq!(
            parse("(price__greaterthanrequals=cheap)").unwrap_err().to_string(),
            "price is not a valid float."
        );
    }

    #[test]
    fn coercion_is_idempotent_on_valid_literals() {
        let cases = [
            (ValueType::Int, "42"),
            (ValueType::Int, "-7"),
            (ValueType::IntArray, "[1,2,3]"),
            (ValueType::IntArray, "[4]"),
            (ValueType::Boolean, "yes"),
            (ValueType::Boolean, "0"),
            (ValueType::String, "'chair'"),
            (ValueType::Float, "12.5"),
        ];
        for (value_type, raw) in cases {
            let once = FilterValue::coerce("attr", value_type, raw).unwrap();
            let twice = FilterValue::coerce("attr", value_type, &once.literal()).unwrap();
            assert_eq!(once, twice, "literal {raw:?}");
        }
    }

    #[test]
    fn int_list_parsing() {
        assert_eq!(parse_int_list("[1, 2,3]"), Some(vec![1, 2, 3]));
        assert_eq!(parse_int_list("[1,2,]"), Some(vec![1, 2]));
        assert_eq!(parse_int_list("[]"), None);
        assert_eq!(parse_int_list("5"), None);
        assert_eq!(parse_int_list("[1,,2]"), None);
    }
}
