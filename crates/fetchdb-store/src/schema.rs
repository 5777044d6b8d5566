//! A small in-memory schema: concrete fields, aliases onto shared stored
//! keys, and metadata-field marking.

use serde_json::Value;
use std::collections::BTreeMap;

use fetchdb_core::traits::SchemaResolver;

#[derive(Debug, Clone)]
pub struct MemField {
    pub name: String,
    pub stored_key: String,
    pub metadata: bool,
}

/// Builder-style schema; canonical fields store under their own name,
/// aliases point at another field's stored key.
#[derive(Debug, Clone, Default)]
pub struct MemSchema {
    fields: BTreeMap<String, MemField>,
}

impl MemSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str) -> Self {
        self.fields.insert(
            name.to_string(),
            MemField { name: name.to_string(), stored_key: name.to_string(), metadata: false },
        );
        self
    }

    pub fn alias(mut self, name: &str, stored_key: &str) -> Self {
        self.fields.insert(
            name.to_string(),
            MemField { name: name.to_string(), stored_key: stored_key.to_string(), metadata: false },
        );
        self
    }

    pub fn metadata_field(mut self, name: &str) -> Self {
        self.fields.insert(
            name.to_string(),
            MemField { name: name.to_string(), stored_key: name.to_string(), metadata: true },
        );
        self
    }

    /// Canonical fields, i.e. those whose stored key is their own name.
    pub(crate) fn canonical_fields(&self) -> impl Iterator<Item = &MemField> {
        self.fields.values().filter(|f| f.name == f.stored_key)
    }
}

impl SchemaResolver for MemSchema {
    fn matching_field_names(&self, pattern: &str) -> Vec<String> {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.fields
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect()
        } else if self.fields.contains_key(pattern) {
            vec![pattern.to_string()]
        } else {
            Vec::new()
        }
    }

    fn stored_key(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(|f| f.stored_key.clone())
    }

    fn is_metadata_field(&self, name: &str) -> bool {
        match self.fields.get(name) {
            Some(field) => field.metadata,
            None => name.starts_with('_'),
        }
    }

    fn value_for_display(&self, _field: &str, value: &Value) -> Value {
        value.clone()
    }
}
