//! Result decoding.
//!
//! Turns tagged column values into JSON records keyed by external attribute
//! name. Columns are matched to attributes positionally, following the
//! projection order. JSON attributes may register a custom decoder; all
//! others get the generic envelope unwrapping.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::registry::{AttributeDescriptor, AttributeRegistry};
use super::types::{Record, TaggedRow, TaggedValue, ValueType};

/// Decoder for the string payload of a JSON attribute.
pub type JsonDecoder = fn(&str) -> Value;

/// Custom JSON decoders keyed by external attribute name.
#[derive(Debug, Clone, Default)]
pub struct JsonDecoders {
    by_attribute: HashMap<String, JsonDecoder>,
}

impl JsonDecoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoders used by the product catalog.
    pub fn product_defaults() -> Self {
        Self::new().with("dimensions", decode_dimensions)
    }

    pub fn with(mut self, attribute: &str, decoder: JsonDecoder) -> Self {
        self.by_attribute.insert(attribute.to_string(), decoder);
        self
    }

    pub fn get(&self, attribute: &str) -> Option<JsonDecoder> {
        self.by_attribute.get(attribute).copied()
    }
}

/// Value used when a column comes back NULL.
pub fn null_default(value_type: ValueType) -> Value {
    match value_type {
        ValueType::Int | ValueType::Float | ValueType::String | ValueType::IntArray => {
            Value::String(String::new())
        }
        ValueType::Boolean => Value::Bool(false),
        ValueType::Json | ValueType::Date => Value::Array(Vec::new()),
    }
}

/// Render a float the way the catalog API always has: integral values keep
/// one decimal place (`10.0`).
pub fn float_repr(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Generic JSON unwrapping: a `data` envelope wins, then an envelope named
/// after the attribute, then the parsed document itself. Unparseable text is
/// returned as a string.
pub fn unwrap_json(attribute: &str, raw: &str) -> Value {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return Value::String(raw.to_string());
    };
    if let Value::Object(ref map) = parsed {
        if let Some(data) = map.get("data") {
            return data.clone();
        }
        if let Some(inner) = map.get(attribute) {
            return inner.clone();
        }
    }
    parsed
}

/// Extract width/depth/height from a model info document.
///
/// The `high` quality variant wins over `low`, which wins over the legacy
/// flat fields. The document may be wrapped in a `model_info` envelope.
pub fn decode_dimensions(raw: &str) -> Value {
    let parsed = serde_json::from_str::<Value>(raw).unwrap_or(Value::Null);
    let mut info = parsed.as_object();
    if let Some(inner) = info.and_then(|m| m.get("model_info")).and_then(Value::as_object) {
        info = Some(inner);
    }

    let mut dimensions = Map::new();
    let Some(info) = info else {
        return Value::Object(dimensions);
    };

    let source = ["high", "low"]
        .iter()
        .find_map(|variant| info.get(*variant).and_then(Value::as_object))
        .unwrap_or(info);

    for key in ["width", "depth", "height"] {
        if let Some(value) = source.get(key) {
            dimensions.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(dimensions)
}

/// Decodes tagged rows into records.
pub struct ResultDecoder<'r> {
    registry: &'r AttributeRegistry,
    decoders: &'r JsonDecoders,
}

impl<'r> ResultDecoder<'r> {
    pub fn new(registry: &'r AttributeRegistry, decoders: &'r JsonDecoders) -> Self {
        Self { registry, decoders }
    }

    /// Decode `rows`, whose columns follow `fields`, preserving row order.
    pub fn decode(&self, fields: &[String], rows: &[TaggedRow]) -> Vec<Record> {
        let attributes: Vec<Option<&AttributeDescriptor>> =
            fields.iter().map(|f| self.registry.lookup(f)).collect();

        rows.iter()
            .map(|row| {
                let mut record = Record::new();
                for (idx, (name, attr)) in fields.iter().zip(&attributes).enumerate() {
                    let value = match attr {
                        Some(attr) => {
                            let null = TaggedValue::null();
                            self.decode_value(attr, row.get(idx).unwrap_or(&null))
                        }
                        None => Value::Null,
                    };
                    record.insert(name.clone(), value);
                }
                record
            })
            .collect()
    }

    /// Decode one column value for `attr`.
    pub fn decode_value(&self, attr: &AttributeDescriptor, value: &TaggedValue) -> Value {
        match value {
            TaggedValue::Null(_) => null_default(attr.value_type),
            TaggedValue::Long(v) => Value::from(*v),
            TaggedValue::Double(v) => Value::String(float_repr(*v)),
            TaggedValue::Boolean(v) => Value::Bool(*v),
            TaggedValue::String(s) => self.decode_string(attr, s),
        }
    }

    fn decode_string(&self, attr: &AttributeDescriptor, raw: &str) -> Value {
        match attr.value_type {
            ValueType::String | ValueType::Date => {
                Value::String(format!("{}{raw}", attr.value_prefix))
            }
            ValueType::Json => match self.decoders.get(&attr.external_name) {
                Some(decoder) => decoder(raw),
                None => unwrap_json(&attr.external_name, raw),
            },
            ValueType::IntArray => match serde_json::from_str::<Value>(raw) {
                Ok(list @ Value::Array(_)) => list,
                _ => Value::String(raw.to_string()),
            },
            ValueType::Int | ValueType::Float | ValueType::Boolean => {
                Value::String(raw.to_string())
            }
        }
    }
}
