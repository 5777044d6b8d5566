//! Resolution of a field-selection request into the concrete stored keys
//! to load and the display names fanned out from each key.

use std::collections::{BTreeMap, BTreeSet};

use fetchdb_core::traits::SchemaResolver;
use fetchdb_core::types::{FetchRequest, SourceSpec, SOURCE_FIELD_NAME};

/// Built once per request, read-only thereafter. One physical stored key
/// may back several display names; each key is loaded once and its decoded
/// value fanned out to every name in `requested_by_stored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelectionPlan {
    pub stored_fields: BTreeSet<String>,
    pub requested_by_stored: BTreeMap<String, BTreeSet<String>>,
    pub load_source: bool,
    /// False only when the request explicitly disabled field fetching.
    pub load_fields: bool,
    /// Effective source request after defaulting, filters included.
    pub source: Option<SourceSpec>,
    /// True when the request carried an explicit, non-empty field list.
    pub has_explicit_fields: bool,
}

impl FieldSelectionPlan {
    pub fn source_required(&self) -> bool {
        self.load_source
    }

    /// Defaulting policy, in order:
    /// 1. no stored-fields request, no script fields, no source request
    ///    => source is fetched by default;
    /// 2. `fetch_fields == false` => load nothing at all;
    /// 3. otherwise expand each name/pattern through the schema, mapping
    ///    stored key -> requested display names; a literal `_source`
    ///    toggles source loading instead;
    /// 4. when source is loaded, its required stored fields are loaded too
    ///    (with no display fan-out);
    /// 5. an expansion that ends up empty falls back to the same plan as
    ///    step 1.
    pub fn resolve(
        request: &FetchRequest,
        schema: &dyn SchemaResolver,
        source_required_fields: &BTreeSet<String>,
    ) -> FieldSelectionPlan {
        let mut source = request.source.clone();

        let Some(spec) = &request.stored_fields else {
            // No fields specified: default to returning source unless
            // script fields or an explicit source request say otherwise.
            if !request.script_fields && source.is_none() {
                source = Some(SourceSpec::fetch_source());
            }
            let load_source = source.as_ref().is_some_and(|s| s.fetch);
            return FieldSelectionPlan {
                stored_fields: source_required_fields.clone(),
                requested_by_stored: BTreeMap::new(),
                load_source,
                load_fields: true,
                source,
                has_explicit_fields: false,
            };
        };

        if !spec.fetch_fields {
            // Stored fields disabled entirely, source included.
            return FieldSelectionPlan {
                stored_fields: BTreeSet::new(),
                requested_by_stored: BTreeMap::new(),
                load_source: false,
                load_fields: false,
                source: None,
                has_explicit_fields: false,
            };
        }

        let mut requested_by_stored: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name_or_pattern in &spec.field_names {
            if name_or_pattern == SOURCE_FIELD_NAME {
                let filters = source.take().unwrap_or_else(SourceSpec::fetch_source);
                source = Some(SourceSpec {
                    fetch: true,
                    includes: filters.includes,
                    excludes: filters.excludes,
                });
                continue;
            }
            for field in schema.matching_field_names(name_or_pattern) {
                if let Some(stored_key) = schema.stored_key(&field) {
                    requested_by_stored.entry(stored_key).or_default().insert(field);
                }
            }
        }

        let load_source = source.as_ref().is_some_and(|s| s.fetch);
        if load_source {
            for field in source_required_fields {
                requested_by_stored.entry(field.clone()).or_default();
            }
        }

        let has_explicit_fields = !spec.field_names.is_empty();
        if requested_by_stored.is_empty() {
            // Empty expansion: same default plan as no request at all,
            // source defaulting included.
            if !request.script_fields && source.is_none() {
                source = Some(SourceSpec::fetch_source());
            }
            let load_source = source.as_ref().is_some_and(|s| s.fetch);
            return FieldSelectionPlan {
                stored_fields: source_required_fields.clone(),
                requested_by_stored,
                load_source,
                load_fields: true,
                source,
                has_explicit_fields,
            };
        }

        let stored_fields = requested_by_stored.keys().cloned().collect();
        FieldSelectionPlan {
            stored_fields,
            requested_by_stored,
            load_source,
            load_fields: true,
            source,
            has_explicit_fields,
        }
    }
}
