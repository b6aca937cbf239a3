//! Attribute registry.
//!
//! The registry is the static schema of every externally addressable field:
//! which column backs it, which table (or derived table) qualifies that
//! column, which joins are needed to reach it, and how its values are
//! converted in SELECT and WHERE clauses. It is built once at startup and
//! shared read-only behind an `Arc`.

use std::collections::HashMap;

use thiserror::Error;

use super::types::{JoinKind, ValueType};

/// Base table of the product catalog.
pub const PRODUCT_TABLE: &str = "product";

/// Errors raised while assembling a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate attribute '{0}'")]
    DuplicateAttribute(String),

    #[error("duplicate join specification for table '{0}'")]
    DuplicateJoin(String),

    #[error("attribute '{attribute}' requires table '{table}' which has no join specification")]
    MissingJoin { attribute: String, table: String },

    #[error("join on '{table}' is refined by unknown attribute '{attribute}'")]
    UnknownRefinement { table: String, attribute: String },
}

/// Named SQL transform wrapping a qualified column reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// `TO_CHAR(col,'DD Month YYYY')`
    DateFormat,
    /// `col::jsonb`
    JsonCast,
    /// `not col`
    Inverse,
}

impl Conversion {
    /// Wrap a qualified column reference.
    pub fn apply(self, column: &str) -> String {
        match self {
            Conversion::DateFormat => format!("TO_CHAR({column},'DD Month YYYY')"),
            Conversion::JsonCast => format!("{column}::jsonb"),
            Conversion::Inverse => format!("not {column}"),
        }
    }
}

/// Schema entry for one externally addressable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub physical_column: String,
    pub external_name: String,
    pub value_type: ValueType,
    /// Table or derived-table alias qualifying `physical_column`.
    pub owning_table: String,
    /// Tables to join, in order, before the column is reachable.
    pub required_joins: Vec<String>,
    /// Literal prefix for decoded string values.
    pub value_prefix: String,
    pub projection_conversion: Option<Conversion>,
    pub filter_conversion: Option<Conversion>,
}

impl AttributeDescriptor {
    /// Attribute backed by `column` on `table` with no joins or conversions.
    pub fn new(
        physical_column: &str,
        external_name: &str,
        value_type: ValueType,
        owning_table: &str,
    ) -> Self {
        Self {
            physical_column: physical_column.to_string(),
            external_name: external_name.to_string(),
            value_type,
            owning_table: owning_table.to_string(),
            required_joins: Vec::new(),
            value_prefix: String::new(),
            projection_conversion: None,
            filter_conversion: None,
        }
    }

    /// Attribute on the catalog base table.
    pub fn base(physical_column: &str, external_name: &str, value_type: ValueType) -> Self {
        Self::new(physical_column, external_name, value_type, PRODUCT_TABLE)
    }

    /// Attribute living on a joined table that only needs that one join.
    pub fn joined(
        physical_column: &str,
        external_name: &str,
        value_type: ValueType,
        table: &str,
    ) -> Self {
        Self::new(physical_column, external_name, value_type, table).with_joins(&[table])
    }

    pub fn with_joins(mut self, tables: &[&str]) -> Self {
        self.required_joins = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.value_prefix = prefix.to_string();
        self
    }

    pub fn with_projection(mut self, conversion: Conversion) -> Self {
        self.projection_conversion = Some(conversion);
        self
    }

    pub fn with_filter(mut self, conversion: Conversion) -> Self {
        self.filter_conversion = Some(conversion);
        self
    }

    /// `table.column` without conversions.
    pub fn qualified_column(&self) -> String {
        format!("{}.{}", self.owning_table, self.physical_column)
    }

    /// Column reference as emitted in the SELECT list.
    pub fn projection_expr(&self) -> String {
        let column = self.qualified_column();
        match self.projection_conversion {
            Some(conversion) => conversion.apply(&column),
            None => column,
        }
    }

    /// Column reference as emitted in WHERE conditions.
    pub fn filter_expr(&self) -> String {
        let column = self.qualified_column();
        match self.filter_conversion {
            Some(conversion) => conversion.apply(&column),
            None => column,
        }
    }
}

/// Where a joinable table's rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    /// A physical table joined by name.
    Physical,
    /// A named subquery substituted for the table, aliased to its name.
    Derived(String),
}

/// How to join one auxiliary table onto the base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub table: String,
    pub kind: JoinKind,
    /// Column of `table` used in the ON clause.
    pub local_column: String,
    /// Qualified expression the local column must equal.
    pub foreign_expression: String,
    /// Attribute whose exact-match filter is appended to the ON clause.
    pub extra_filter_attribute: Option<String>,
    pub source: TableSource,
}

impl JoinSpec {
    pub fn new(table: &str, kind: JoinKind, local_column: &str, foreign_expression: &str) -> Self {
        Self {
            table: table.to_string(),
            kind,
            local_column: local_column.to_string(),
            foreign_expression: foreign_expression.to_string(),
            extra_filter_attribute: None,
            source: TableSource::Physical,
        }
    }

    pub fn derived(mut self, subquery: &str) -> Self {
        self.source = TableSource::Derived(subquery.trim().to_string());
        self
    }

    pub fn refined_by(mut self, attribute: &str) -> Self {
        self.extra_filter_attribute = Some(attribute.to_string());
        self
    }

    /// Table reference placed after `join`.
    pub fn table_ref(&self) -> String {
        match &self.source {
            TableSource::Physical => self.table.clone(),
            TableSource::Derived(subquery) => format!("({subquery}) as {}", self.table),
        }
    }

    /// `table.local_column = foreign_expression`
    pub fn on_condition(&self) -> String {
        format!(
            "{}.{} = {}",
            self.table, self.local_column, self.foreign_expression
        )
    }
}

/// Read-only registry of attributes and join specifications.
#[derive(Debug, Clone)]
pub struct AttributeRegistry {
    base_table: String,
    attributes: Vec<AttributeDescriptor>,
    by_name: HashMap<String, usize>,
    joins: HashMap<String, JoinSpec>,
}

impl AttributeRegistry {
    /// Build a registry, rejecting duplicate names and dangling join references.
    pub fn new(
        base_table: &str,
        attributes: Vec<AttributeDescriptor>,
        joins: Vec<JoinSpec>,
    ) -> Result<Self, RegistryError> {
        let mut by_name = HashMap::with_capacity(attributes.len());
        for (idx, attr) in attributes.iter().enumerate() {
            if by_name.insert(attr.external_name.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateAttribute(attr.external_name.clone()));
            }
        }

        let mut join_map = HashMap::with_capacity(joins.len());
        for spec in joins {
            if join_map.contains_key(&spec.table) {
                return Err(RegistryError::DuplicateJoin(spec.table));
            }
            join_map.insert(spec.table.clone(), spec);
        }

        for attr in &attributes {
            for table in &attr.required_joins {
                if table != base_table && !join_map.contains_key(table) {
                    return Err(RegistryError::MissingJoin {
                        attribute: attr.external_name.clone(),
                        table: table.clone(),
                    });
                }
            }
        }

        for spec in join_map.values() {
            if let Some(ref attribute) = spec.extra_filter_attribute
                && !by_name.contains_key(attribute)
            {
                return Err(RegistryError::UnknownRefinement {
                    table: spec.table.clone(),
                    attribute: attribute.clone(),
                });
            }
        }

        Ok(Self {
            base_table: base_table.to_string(),
            attributes,
            by_name,
            joins: join_map,
        })
    }

    pub fn base_table(&self) -> &str {
        &self.base_table
    }

    pub fn lookup(&self, external_name: &str) -> Option<&AttributeDescriptor> {
        self.by_name
            .get(external_name)
            .map(|&idx| &self.attributes[idx])
    }

    pub fn is_valid_attribute(&self, external_name: &str) -> bool {
        self.by_name.contains_key(external_name)
    }

    /// Declaration position, used for deterministic ordering.
    pub fn position(&self, external_name: &str) -> Option<usize> {
        self.by_name.get(external_name).copied()
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter()
    }

    pub fn join_spec(&self, table: &str) -> Option<&JoinSpec> {
        self.joins.get(table)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Product catalog schema
// ---------------------------------------------------------------------------

const ARRANGEMENT_DATA: &str = r#"
select entity_arrangement_order.sequence_id,
    entity_arrangement_order.entity_id, folder_arrangement_order.folder_id,
    folder_arrangement_order.folder_name, entity_arrangement_order.parent_folder_id,
    entity_arrangement_order.ordering_number as entity_order,
    (CASE WHEN parent_folder_id is NULL
    THEN entity_arrangement_order.ordering_number
    ELSE folder_arrangement_order.ordering_number END) AS library_order
    from entity_arrangement_order left outer join folder_arrangement_order
    on folder_arrangement_order.folder_id = entity_arrangement_order.parent_folder_id
"#;

const COLLAB_PRODUCTS: &str = r#"
select collaboration_id, trim(both '"' from (scene_assets->'asset_name')::text)::int as asset_id
    from (select collaboration_id, json_array_elements(design->'data'->'assets') as scene_assets
    from collaboration_design) as collab_items
"#;

const SCENE_PRODUCTS: &str = r#"
select scene_id, trim(both '"' from (scene_assets->'asset_name')::text)::int as asset_id
    from (select scene.id as scene_id, json_array_elements(design->'design'->'assets') as scene_assets
    from scene) as scene_items
"#;

const HAS_ACCESS_TO: &str = r#"
SELECT product_id, string_agg('"'||customer_username||'"', ', ') AS has_access, true as is_shared
    FROM shared_products
    WHERE is_hidden is not True
    GROUP BY product_id
"#;

fn product_joins() -> Vec<JoinSpec> {
    use JoinKind::{Inner, LeftOuter};

    vec![
        JoinSpec::new("user_profile", LeftOuter, "username", "product.customer_username"),
        JoinSpec::new("product_information", LeftOuter, "product_id", "product.id"),
        JoinSpec::new("subscription_preset", Inner, "id", "user_profile.subscription_preset_id"),
        JoinSpec::new("shared_products", LeftOuter, "product_id", "product.id"),
        JoinSpec::new("arrangement_data", LeftOuter, "entity_id", "product.id")
            .derived(ARRANGEMENT_DATA)
            .refined_by("sequence_id"),
        JoinSpec::new("has_access_to", LeftOuter, "product_id", "product.id").derived(HAS_ACCESS_TO),
        JoinSpec::new("category", LeftOuter, "name", "product.category"),
        JoinSpec::new("collab_products", LeftOuter, "asset_id", "product.id")
            .derived(COLLAB_PRODUCTS),
        JoinSpec::new("scene_products", LeftOuter, "asset_id", "product.id").derived(SCENE_PRODUCTS),
        JoinSpec::new("product_user_assets", LeftOuter, "product_id", "product.id")
            .refined_by("asset_username"),
        JoinSpec::new("product_company_assets", LeftOuter, "product_id", "product.id")
            .refined_by("asset_company"),
        JoinSpec::new("project_products", LeftOuter, "product_id", "product.id"),
    ]
}

fn product_attributes(asset_prefix: &str) -> Vec<AttributeDescriptor> {
    use AttributeDescriptor as A;
    use Conversion::{DateFormat, Inverse, JsonCast};
    use ValueType::{Boolean, Float, Int, IntArray, Json, String as Str};

    vec![
        A::base("id", "id", Int),
        A::base("name", "name", Str),
        A::base("brand_id", "brand_id", Str),
        A::base("category", "category", Str),
        A::base("color_name", "color_name", Str),
        A::base("materials", "materials", Json).with_projection(JsonCast),
        A::base("style_category", "style_category", Str),
        A::base("gtin", "gtin", Str),
        A::base("tags", "tags", Json).with_projection(JsonCast),
        A::base("customer_username", "customer_username", Str),
        A::base("height", "height", Int),
        A::base("width", "width", Int),
        A::base("depth", "depth", Int),
        A::base("model_status", "model_status", IntArray),
        A::base("scans", "scans", Boolean),
        A::base("is_hidden", "is_hidden", Boolean),
        A::base("thumbnail", "thumbnail", Str).with_prefix(asset_prefix),
        A::base("assigned_artist", "assigned_artist", Str),
        A::base("last_modified", "last_modified", Str)
            .with_projection(DateFormat)
            .with_filter(DateFormat),
        A::base("created_on", "created_on", Str)
            .with_projection(DateFormat)
            .with_filter(DateFormat),
        A::base("last_modified", "last_modified_stamp", Str),
        A::base("model_info", "dimensions", Json).with_projection(JsonCast),
        A::base("variant_of", "variant_of", Int),
        A::base("immediate_parent_variant", "immediate_parent_variant", Int),
        A::base("company_id", "company_id", Int),
        A::base("additional_company_ids", "additional_company_ids", Str),
        A::base("variation_type", "variation_type", Str),
        A::base("product_model_type", "product_model_type", Str),
        A::base("uploaded_model", "uploaded_model", Boolean),
        A::base("need_to_model", "need_to_model", Str),
        A::base("model_type", "model_type", Str),
        A::base("segmented", "segmented", Boolean),
        A::base("price", "price", Float),
        A::base("is_store_item", "is_store_item", IntArray),
        A::base("group_id", "group_id", Str),
        A::base("artist_pickable", "hidden_from_artist", Boolean).with_projection(Inverse),
        A::base("customer_submitted_on", "customer_submitted_on", Str),
        A::new("display_name", "subscription_display_name", Str, "subscription_preset")
            .with_joins(&["user_profile", "subscription_preset"]),
        A::joined("shared_by", "shared_by", Str, "shared_products"),
        A::joined("is_hidden", "shared_hidden", Boolean, "shared_products"),
        A::joined("customer_username", "shared_username", Str, "shared_products"),
        A::joined("shared_product_type", "shared_product_type", Str, "shared_products"),
        A::joined("company_name", "company_name", Str, "user_profile"),
        A::joined("sequence_id", "sequence_id", Int, "arrangement_data"),
        A::joined("folder_id", "folder_id", Int, "arrangement_data"),
        A::joined("folder_name", "folder_name", Str, "arrangement_data"),
        A::joined("parent_folder_id", "parent_folder_id", Int, "arrangement_data"),
        A::joined("entity_order", "entity_order", Int, "arrangement_data"),
        A::joined("library_order", "library_order", Int, "arrangement_data"),
        A::joined("has_access", "has_access_to", Str, "has_access_to"),
        A::joined("is_shared", "is_shared", Boolean, "has_access_to"),
        A::base("platform", "platform", Str),
        A::base("created_on", "created_on_stamp", Str),
        A::joined("requested_for", "requested_for", Str, "product_information"),
        A::joined(
            "requested_for_company",
            "requested_for_company",
            Str,
            "product_information",
        ),
        A::joined("placement_type", "placement_type", Str, "category"),
        A::joined("material_type", "material_type", Str, "category"),
        A::joined("collaboration_id", "collaboration_id", Int, "collab_products"),
        A::joined("scene_id", "scene_id", Int, "scene_products"),
        A::joined("render_count", "user_render_count", Int, "product_user_assets"),
        A::joined("render_count", "company_render_count", Int, "product_company_assets"),
        A::joined(
            "lifestyle_render_count",
            "company_lifestyle_render_count",
            Int,
            "product_company_assets",
        ),
        A::joined("customer_username", "asset_username", Str, "product_user_assets"),
        A::joined("company_id", "asset_company", Int, "product_company_assets"),
        A::base("id", "product_ids", IntArray),
        A::joined("project_id", "project_id", Int, "project_products"),
        A::joined("project_id", "project_ids", IntArray, "project_products"),
        A::base("has_active_project", "has_active_project", Boolean),
        A::joined("is_ai_model", "is_ai_model", Boolean, "product_information"),
        A::joined("ai_render_count", "user_ai_render_count", Int, "product_user_assets"),
        A::joined(
            "ai_render_count",
            "company_ai_render_count",
            Int,
            "product_company_assets",
        ),
    ]
}

/// The product catalog schema, with `asset_prefix` applied to thumbnails.
pub fn product_catalog(asset_prefix: &str) -> Result<AttributeRegistry, RegistryError> {
    AttributeRegistry::new(
        PRODUCT_TABLE,
        product_attributes(asset_prefix),
        product_joins(),
    )
}
