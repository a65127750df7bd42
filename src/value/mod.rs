//! Data values flowing between host, engine and scripts
//!
//! `serde_json::Value` is the data currency; this module adds the merge
//! rules and the `TemplateData` wrapper used by the update pipeline.

use serde_json::{Map, Value};

/// Shallow-merge `patch` into `target`.
///
/// Object keys from `patch` overwrite keys in `target`. A non-object
/// `target` is replaced by an empty object first; a non-object `patch` is
/// ignored.
pub fn merge(target: &mut Value, patch: &Value) {
    let Some(patch) = patch.as_object() else {
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Merge a sequence of values in order into one object
pub fn merge_all<'a, I>(values: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut out = Value::Object(Map::new());
    for value in values {
        merge(&mut out, value);
    }
    out
}

/// True if the value carries no data
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Data handed to the engine by the host, with the name of the script-side
/// processor that should transform it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateData {
    value: Value,
    read_only: bool,
    preprocessor_name: String,
}

impl TemplateData {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            read_only: false,
            preprocessor_name: String::new(),
        }
    }

    pub fn with_processor(value: Value, processor: impl Into<String>) -> Self {
        Self {
            value,
            read_only: false,
            preprocessor_name: processor.into(),
        }
    }

    /// A read-only copy of `value`
    pub fn read_only(value: Value) -> Self {
        Self {
            value,
            read_only: true,
            preprocessor_name: String::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn preprocessor_name(&self) -> &str {
        &self.preprocessor_name
    }

    pub fn is_empty(&self) -> bool {
        is_empty(&self.value)
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn set_preprocessor_name(&mut self, name: impl Into<String>) {
        self.preprocessor_name = name.into();
    }
}
