//! Join resolution.
//!
//! Computes the joins needed to reach every attribute referenced by the
//! projection or the filter. Attributes are visited in registry declaration
//! order so the emitted SQL does not depend on how the caller ordered its
//! fields, and each table is joined at most once.

use std::collections::HashSet;

use super::filter::ParsedFilter;
use super::registry::{AttributeRegistry, JoinSpec};

/// One rendered join clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJoin {
    pub table: String,
    /// `left outer join <ref> on <cond>[ and <exact>]`
    pub clause: String,
}

/// Ordered joins for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinPlan {
    pub joins: Vec<ResolvedJoin>,
}

impl JoinPlan {
    pub fn tables(&self) -> Vec<String> {
        self.joins.iter().map(|j| j.table.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// All clauses separated by single spaces.
    pub fn to_sql(&self) -> String {
        self.joins
            .iter()
            .map(|j| j.clause.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Resolves the minimal join set for a request.
pub struct JoinResolver<'r> {
    registry: &'r AttributeRegistry,
}

impl<'r> JoinResolver<'r> {
    pub fn new(registry: &'r AttributeRegistry) -> Self {
        Self { registry }
    }

    /// Resolve joins for the projected fields plus everything the filter touches.
    pub fn resolve(&self, projection: &[String], filter: Option<&ParsedFilter>) -> JoinPlan {
        let mut wanted: HashSet<&str> = projection.iter().map(String::as_str).collect();
        if let Some(parsed) = filter {
            wanted.extend(parsed.referenced_attributes());
        }

        let base = self.registry.base_table();
        let mut joined: HashSet<&str> = HashSet::new();
        let mut plan = JoinPlan::default();

        for attr in self.registry.attributes() {
            if !wanted.contains(attr.external_name.as_str())
                || attr.required_joins.is_empty()
                || attr.required_joins.iter().any(|t| t == base)
            {
                continue;
            }

            for table in &attr.required_joins {
                if !joined.insert(table.as_str()) {
                    continue;
                }
                let Some(spec) = self.registry.join_spec(table) else {
                    tracing::warn!(table = %table, "no join specification; skipping");
                    continue;
                };
                plan.joins.push(ResolvedJoin {
                    table: table.clone(),
                    clause: render_join(spec, filter),
                });
            }
        }

        plan
    }
}

fn render_join(spec: &JoinSpec, filter: Option<&ParsedFilter>) -> String {
    let mut clause = format!(
        "{} join {} on {}",
        spec.kind.as_sql(),
        spec.table_ref(),
        spec.on_condition()
    );

    if let Some(ref attribute) = spec.extra_filter_attribute
        && let Some(exact) = filter.and_then(|f| f.exact_match(attribute))
    {
        clause.push_str(" and ");
        clause.push_str(exact);
    }

    clause
}
