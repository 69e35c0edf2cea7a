//! The collectd-style configuration tree handed to a plugin's config
//! callback, built from the generic JSON mapping the host sends.

use log::{debug, error};
use serde_json::{Map, Value};

/// Marker key that expands a nested object into repeated sibling nodes
/// instead of one nested child.
const FLATTEN_KEY: &str = "#flatten";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl ConfigValue {
    fn from_scalar(value: &Value) -> Option<ConfigValue> {
        match value {
            Value::String(s) => Some(ConfigValue::String(s.clone())),
            Value::Number(n) => n.as_f64().map(ConfigValue::Number),
            Value::Bool(b) => Some(ConfigValue::Boolean(*b)),
            _ => None,
        }
    }
}

/// One node of the configuration tree. The root node has no key; every
/// other node carries at least one value or a non-empty list of children —
/// nodes that would come out empty are dropped during construction, never
/// materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub key: Option<String>,
    pub values: Vec<ConfigValue>,
    pub children: Vec<Config>,
}

impl Config {
    /// Builds the tree from the `pluginConfig` mapping of a configure
    /// request. Keys map to nodes in map order.
    pub fn from_mapping(mapping: &Map<String, Value>) -> Config {
        Config {
            key: None,
            values: Vec::new(),
            children: children_of(mapping),
        }
    }

    /// First child with the given key, if any.
    pub fn child(&self, key: &str) -> Option<&Config> {
        self.children
            .iter()
            .find(|c| c.key.as_deref() == Some(key))
    }
}

fn children_of(mapping: &Map<String, Value>) -> Vec<Config> {
    let mut children = Vec::new();
    for (key, value) in mapping {
        children.extend(nodes_for(key, value));
    }
    children
}

/// Converts one mapping entry into zero or more sibling nodes. Only the
/// `#flatten` expansion produces more than one.
fn nodes_for(key: &str, value: &Value) -> Vec<Config> {
    match value {
        Value::Null => {
            debug!("dropping config key {} with null value", key);
            Vec::new()
        }
        Value::String(s) if s.is_empty() => {
            debug!("dropping config key {} with empty value", key);
            Vec::new()
        }
        Value::Array(items) if items.is_empty() => {
            debug!("dropping config key {} with empty value", key);
            Vec::new()
        }
        Value::Object(fields) if fields.is_empty() => {
            debug!("dropping config key {} with empty value", key);
            Vec::new()
        }
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            // From the match above the scalar is known to be convertible.
            let single = ConfigValue::from_scalar(value).expect("scalar config value");
            vec![node(key, vec![single], Vec::new())]
        }
        Value::Array(items) => {
            let values: Vec<ConfigValue> = items
                .iter()
                .filter_map(|item| {
                    let converted = ConfigValue::from_scalar(item);
                    if converted.is_none() {
                        error!("config key {} has non-scalar list item: {}", key, item);
                    }
                    converted
                })
                .collect();
            if values.is_empty() {
                return Vec::new();
            }
            vec![node(key, values, Vec::new())]
        }
        Value::Object(fields) => {
            if is_truthy(fields.get(FLATTEN_KEY)) {
                if let Some(Value::Array(items)) = fields.get("values") {
                    return flattened_nodes(key, items);
                }
            }
            let children = children_of(fields);
            if children.is_empty() {
                debug!("dropping config key {} that produced no children", key);
                return Vec::new();
            }
            vec![node(key, Vec::new(), children)]
        }
    }
}

/// One sibling node per non-null item, each keyed by the mapping key. Items
/// that are themselves lists contribute their elements as the node's
/// values; anything else is wrapped in a single-element value list.
fn flattened_nodes(key: &str, items: &[Value]) -> Vec<Config> {
    let mut nodes = Vec::new();
    for item in items {
        let values: Vec<ConfigValue> = match item {
            Value::Null => continue,
            Value::Array(inner) => inner.iter().filter_map(ConfigValue::from_scalar).collect(),
            other => ConfigValue::from_scalar(other).into_iter().collect(),
        };
        if values.is_empty() {
            error!("config key {} has unusable flattened item: {}", key, item);
            continue;
        }
        nodes.push(node(key, values, Vec::new()));
    }
    nodes
}

fn node(key: &str, values: Vec<ConfigValue>, children: Vec<Config>) -> Config {
    Config {
        key: Some(key.to_string()),
        values,
        children,
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    }
}
