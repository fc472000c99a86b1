use std::collections::BTreeMap;

use serde::Serialize;

/// Named string attributes attached to a record.
///
/// Each name holds one value; setting it again replaces the value.
/// Serializes as a plain map in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, String>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, returning the value it replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
