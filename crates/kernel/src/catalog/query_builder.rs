//! Catalog query compiler.
//!
//! Generates the SQL text for a batch request:
//! - DISTINCT projection with per-attribute conversions
//! - joins resolved from the projection and filter
//! - WHERE clause from the parsed filter
//! - ORDER BY terms (descending unless `asc` is given)
//! - optional LIMIT/OFFSET window

use thiserror::Error;

use super::filter::ParsedFilter;
use super::joins::JoinResolver;
use super::registry::AttributeRegistry;
use super::types::Pagination;

/// Errors raised while compiling a request that bypassed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("{0} is not a valid attribute in required_fields.")]
    UnknownField(String),

    #[error("{0} is not a valid attribute in order_by.")]
    UnknownOrderAttribute(String),
}

/// Sort direction. Terms without a marker sort descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One `attr[ asc|desc]` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub attribute: String,
    pub direction: SortDirection,
}

/// Parse a comma-separated order spec, rejecting unknown attributes.
pub fn parse_order_by(
    registry: &AttributeRegistry,
    spec: &str,
) -> Result<Vec<OrderTerm>, CompileError> {
    spec.split(',')
        .map(|term| {
            let mut tokens = term.split_whitespace();
            let attribute = tokens.next().unwrap_or_default();
            let direction = match tokens.next().map(str::to_ascii_lowercase).as_deref() {
                None => SortDirection::Desc,
                Some("desc") => SortDirection::Desc,
                Some("asc") => SortDirection::Asc,
                Some(_) => return Err(CompileError::UnknownOrderAttribute(term.trim().to_string())),
            };
            if tokens.next().is_some() {
                return Err(CompileError::UnknownOrderAttribute(term.trim().to_string()));
            }
            if !registry.is_valid_attribute(attribute) {
                return Err(CompileError::UnknownOrderAttribute(attribute.to_string()));
            }
            Ok(OrderTerm {
                attribute: attribute.to_string(),
                direction,
            })
        })
        .collect()
}

/// Compiled SQL for one request. Never mutated after compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    /// Full statement, including any requested window.
    pub sql: String,
    /// Statement without LIMIT/OFFSET.
    pub unpaged_sql: String,
    /// Requested fields, in projection order.
    pub fields: Vec<String>,
    /// Joined tables, in join order.
    pub joined_tables: Vec<String>,
    pub pagination: Option<Pagination>,
}

impl CompiledQuery {
    /// Row count of the full statement.
    pub fn count_sql(&self) -> String {
        format!("select count(*) from ({}) as subquery", self.sql)
    }

    /// The unpaged statement restricted to one chunk.
    pub fn chunk_sql(&self, limit: u64, offset: u64) -> String {
        format!("{} limit {limit} offset {offset}", self.unpaged_sql)
    }
}

/// Assembles catalog SELECT statements.
pub struct QueryCompiler<'r> {
    registry: &'r AttributeRegistry,
}

impl<'r> QueryCompiler<'r> {
    pub fn new(registry: &'r AttributeRegistry) -> Self {
        Self { registry }
    }

    /// Compile a request whose fields and order terms are registry attributes.
    pub fn compile(
        &self,
        fields: &[String],
        filter: Option<&ParsedFilter>,
        order: &[OrderTerm],
        pagination: Option<Pagination>,
    ) -> Result<CompiledQuery, CompileError> {
        let projection = self.projection(fields)?;
        let joins = JoinResolver::new(self.registry).resolve(fields, filter);

        let mut parts = vec![
            "select DISTINCT".to_string(),
            projection,
            "from".to_string(),
            self.registry.base_table().to_string(),
        ];
        if !joins.is_empty() {
            parts.push(joins.to_sql());
        }
        if let Some(parsed) = filter {
            parts.push(parsed.where_clause());
        }
        if !order.is_empty() {
            parts.push(self.order_by(order)?);
        }

        let unpaged_sql = parts.join(" ");
        let sql = match pagination {
            Some(window) => format!(
                "{unpaged_sql} limit {} offset {}",
                window.limit, window.offset
            ),
            None => unpaged_sql.clone(),
        };

        tracing::debug!(sql = %sql, joins = joins.joins.len(), "compiled catalog query");

        Ok(CompiledQuery {
            sql,
            unpaged_sql,
            fields: fields.to_vec(),
            joined_tables: joins.tables(),
            pagination,
        })
    }

    fn projection(&self, fields: &[String]) -> Result<String, CompileError> {
        let columns = fields
            .iter()
            .map(|name| {
                self.registry
                    .lookup(name)
                    .map(|attr| attr.projection_expr())
                    .ok_or_else(|| CompileError::UnknownField(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns.join(", "))
    }

    fn order_by(&self, order: &[OrderTerm]) -> Result<String, CompileError> {
        let terms = order
            .iter()
            .map(|term| {
                self.registry
                    .lookup(&term.attribute)
                    .map(|attr| format!("{} {}", attr.qualified_column(), term.direction.as_sql()))
                    .ok_or_else(|| CompileError::UnknownOrderAttribute(term.attribute.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("order by {}", terms.join(", ")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::filter::FilterExpressionParser;
    use crate::catalog::registry::product_catalog;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn compile(
        registry: &AttributeRegistry,
        names: &[&str],
        filter: &str,
        order: &str,
        pagination: Option<Pagination>,
    ) -> CompiledQuery {
        let parsed = FilterExpressionParser::new(registry).parse(filter).unwrap();
        let order = parse_order_by(registry, order).unwrap();
        QueryCompiler::new(registry)
            .compile(&fields(names), Some(&parsed), &order, pagination)
            .unwrap()
    }

    #[test]
    fn simple_query_build() {
        let registry = product_catalog("").unwrap();
        let query = compile(&registry, &["id", "name"], "(id__exact=5)", "id desc", None);

        assert_eq!(
            query.sql,
            "select DISTINCT product.id, product.name from product where product.id=5 order by product.id desc"
        );
        assert!(query.joined_tables.is_empty());
        assert_eq!(query.sql, query.unpaged_sql);
    }

    #[test]
    fn pagination_window() {
        let registry = product_catalog("").unwrap();
        let query = compile(
            &registry,
            &["id"],
            "(id__exact=5)",
            "id",
            Some(Pagination {
                limit: 10,
                offset: 0,
            }),
        );

        assert!(query.sql.ends_with(" limit 10 offset 0"));
        assert!(!query.unpaged_sql.contains("limit"));
    }

    #[test]
    fn projection_follows_request_order_with_conversions() {
        let registry = product_catalog("").unwrap();
        let query = compile(
            &registry,
            &["tags", "created_on", "id"],
            "(is_hidden__exact=false)",
            "id",
            None,
        );

        assert!(query.sql.starts_with(
            "select DISTINCT product.tags::jsonb, TO_CHAR(product.created_on,'DD Month YYYY'), product.id from product"
        ));
    }

    #[test]
    fn order_by_defaults_to_desc() {
        let registry = product_catalog("").unwrap();
        let terms = parse_order_by(&registry, "name, id asc,height DESC").unwrap();

        assert_eq!(terms[0].direction, SortDirection::Desc);
        assert_eq!(terms[1].direction, SortDirection::Asc);
        assert_eq!(terms[2].direction, SortDirection::Desc);

        let query = QueryCompiler::new(&registry)
            .compile(&fields(&["id"]), None, &terms, None)
            .unwrap();
        assert!(query
            .sql
            .ends_with("order by product.name desc, product.id asc, product.height desc"));
    }

    #[test]
    fn order_by_rejects_unknown_attribute() {
        let registry = product_catalog("").unwrap();
        assert_eq!(
            parse_order_by(&registry, "id, bogus asc").unwrap_err().to_string(),
            "bogus is not a valid attribute in order_by."
        );
        assert!(parse_order_by(&registry, "id sideways").is_err());
    }

    #[test]
    fn joined_fields_emit_joins_before_where() {
        let registry = product_catalog("").unwrap();
        let query = compile(
            &registry,
            &["id", "company_name"],
            "(company_name__exact='Acme')",
            "id",
            None,
        );

        assert_eq!(query.joined_tables, vec!["user_profile"]);
        assert!(query.sql.contains(
            "from product left outer join user_profile on user_profile.username = product.customer_username where user_profile.company_name='Acme'"
        ));
    }

    #[test]
    fn count_and_chunk_statements() {
        let registry = product_catalog("").unwrap();
        let query = compile(
            &registry,
            &["id"],
            "(id__exact=5)",
            "id",
            Some(Pagination {
                limit: 10,
                offset: 20,
            }),
        );

        assert_eq!(
            query.count_sql(),
            format!("select count(*) from ({}) as subquery", query.sql)
        );
        assert_eq!(
            query.chunk_sql(1000, 2000),
            format!("{} limit 1000 offset 2000", query.unpaged_sql)
        );
    }

    #[test]
    fn unknown_field_rejected() {
        let registry = product_catalog("").unwrap();
        let err = QueryCompiler::new(&registry)
            .compile(&fields(&["nope"]), None, &[], None)
            .unwrap_err();
        assert_eq!(err.to_string(), "nope is not a valid attribute in required_fields.");
    }
}
