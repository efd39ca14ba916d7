//! Property Reflector
//!
//! Memoized per-type field metadata. Schemas are built by calling each
//! type's `schema()` function; the reflector caches the result so the hot
//! paths (validation, reconciliation, encryption) never rebuild them.
//!
//! # Concurrency
//!
//! Lookups go through a [`DashMap`]. Two tasks racing on the first access
//! to a type may both build its metadata; the first insert wins and the
//! other copy is dropped. Both copies are identical, so the race is benign.
//!
//! Compiled `Pattern` rules are cached the same way, keyed by pattern text.

use crate::models::{FieldSchema, RecordSchema, RecordType};
use dashmap::DashMap;
use regex::Regex;
use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock};

/// Ordered read+write fields of one record type
#[derive(Debug, Default)]
pub struct FieldMap {
    fields: Vec<FieldSchema>,
    positions: HashMap<String, usize>,
}

impl FieldMap {
    fn from_schema(schema: &RecordSchema) -> Self {
        let fields: Vec<FieldSchema> = schema
            .fields
            .iter()
            .filter(|f| f.is_read_write())
            .cloned()
            .collect();
        let positions = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self { fields, positions }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

struct TypeInfo {
    schema: Arc<RecordSchema>,
    fields: Arc<FieldMap>,
}

/// Cached field lookup per record type
#[derive(Default)]
pub struct Reflector {
    by_type: DashMap<TypeId, Arc<TypeInfo>>,
    by_name: DashMap<String, Arc<TypeInfo>>,
    patterns: DashMap<String, Arc<Regex>>,
}

impl Reflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance shared by the engine components
    pub fn global() -> &'static Reflector {
        static GLOBAL: OnceLock<Reflector> = OnceLock::new();
        GLOBAL.get_or_init(Reflector::new)
    }

    fn info(&self, ty: &RecordType) -> Arc<TypeInfo> {
        if let Some(info) = self.by_type.get(&ty.type_id()) {
            return Arc::clone(info.value());
        }

        let schema = ty.describe();
        let computed = Arc::new(TypeInfo {
            fields: Arc::new(FieldMap::from_schema(&schema)),
            schema: Arc::new(schema),
        });

        let info = Arc::clone(
            self.by_type
                .entry(ty.type_id())
                .or_insert(computed)
                .value(),
        );
        self.by_name
            .entry(info.schema.name.clone())
            .or_insert_with(|| Arc::clone(&info));
        info
    }

    /// Read+write fields of `ty`, in declaration order
    pub fn fields(&self, ty: &RecordType) -> Arc<FieldMap> {
        Arc::clone(&self.info(ty).fields)
    }

    /// Full schema of `ty`, including read-only fields
    pub fn schema_of(&self, ty: &RecordType) -> Arc<RecordSchema> {
        Arc::clone(&self.info(ty).schema)
    }

    /// Fields of a type by its declared schema name
    ///
    /// Only types already seen by this reflector are known; anything else
    /// yields an empty map.
    pub fn fields_by_name(&self, name: &str) -> Arc<FieldMap> {
        self.by_name
            .get(name)
            .map(|info| Arc::clone(&info.fields))
            .unwrap_or_default()
    }

    /// Compiled whole-value matcher for a `Pattern` rule
    pub fn pattern(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(regex) = self.patterns.get(pattern) {
            return Ok(Arc::clone(regex.value()));
        }
        let compiled = Arc::new(Regex::new(&format!("^(?:{})$", pattern))?);
        Ok(Arc::clone(
            self.patterns
                .entry(pattern.to_string())
                .or_insert(compiled)
                .value(),
        ))
    }

    /// Make a type (and everything it owns) known to name lookups
    pub fn register(&self, ty: &RecordType) {
        self.record_types(ty);
    }

    /// `root` followed by every record type it transitively owns
    pub fn record_types(&self, root: &RecordType) -> Vec<RecordType> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut queue = VecDeque::from([*root]);

        while let Some(ty) = queue.pop_front() {
            if !seen.insert(ty.type_id()) {
                continue;
            }
            let fields = self.fields(&ty);
            for field in fields.iter() {
                if let Some(child) = field
                    .kind
                    .child_record()
                    .or_else(|| field.kind.child_collection())
                {
                    queue.push_back(*child);
                }
            }
            ordered.push(ty);
        }

        ordered
    }
}
