//! Entity Reconciler
//!
//! Merges a freshly supplied record graph (the *source*) into the previously
//! persisted graph for the same root (the *target*), mutating the target in
//! place. Children are matched by identity: matched children are updated
//! recursively, unmatched target children are removed with everything they
//! own, and children present only in the source are appended.
//!
//! # Field rules
//!
//! Fields are paired by name over the target's read+write fields; the
//! identity is never reconciled.
//!
//! | source | target | effect |
//! |--------|--------|--------|
//! | null | null | nothing |
//! | value | null | converted source assigned |
//! | null | value | target cleared, old value removed |
//! | record | record, other id | replaced, old record removed |
//! | record | record, same id | reconciled in place |
//! | list | list | list reconciliation |
//! | scalar | scalar | assigned |
//!
//! Source and target may be different record types with compatible field
//! names (a relational shape versus a domain shape); conversion builds
//! target-typed records as it goes.
//!
//! # Removal
//!
//! [`Reconciler::remove`] walks a record's owned children before the record
//! itself and reports each removed record to [`ReconcileHooks`], which is
//! where store-specific repositories stage their deletes.

use crate::models::record::json_type_name;
use crate::models::{
    document_id, empty_document, ContainerKind, Document, ElementKind, FieldKind, RecordId,
    RecordType, ID_FIELD,
};
use crate::services::error::UsageFault;
use crate::services::reflector::Reflector;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Extension points invoked while records are removed
pub trait ReconcileHooks {
    /// Guard consulted before a record (and its subtree) is removed
    ///
    /// Declining only suppresses the removal walk and its
    /// `commit_deletion` calls. A declined child that is absent from the
    /// source still leaves the target graph, so a relational store keeps
    /// its row until something else deletes it. Decline only for records
    /// whose deletion is already staged or that live on independently.
    fn should_remove(&mut self, _record_type: &RecordType, _record: &Document) -> bool {
        true
    }

    /// Called once per removed record, after its children
    fn commit_deletion(
        &mut self,
        _record_type: &RecordType,
        _record: &Document,
    ) -> Result<(), UsageFault> {
        Ok(())
    }
}

/// Hooks that remove everything and stage nothing
#[derive(Debug, Default)]
pub struct NoopHooks;

impl ReconcileHooks for NoopHooks {}

/// Graph reconciler
pub struct Reconciler<'a> {
    reflector: &'a Reflector,
}

impl<'a> Reconciler<'a> {
    pub fn new(reflector: &'a Reflector) -> Self {
        Self { reflector }
    }

    /// Make `target` reflect `source`
    ///
    /// # Errors
    ///
    /// Returns a [`UsageFault`] when paired fields have incompatible kinds,
    /// a document does not have the shape its schema declares, or an owned
    /// child lacks a valid identity. The target may be partially updated
    /// when this happens and must be discarded.
    pub fn reconcile(
        &self,
        source_ty: &RecordType,
        source: &Document,
        target_ty: &RecordType,
        target: &mut Document,
        hooks: &mut dyn ReconcileHooks,
    ) -> Result<(), UsageFault> {
        let source_fields = self.reflector.fields(source_ty);
        let target_fields = self.reflector.fields(target_ty);
        let target_name = self.reflector.schema_of(target_ty).name.clone();

        for target_field in target_fields.iter() {
            let name = target_field.name.as_str();
            if name == ID_FIELD {
                continue;
            }
            let Some(source_field) = source_fields.get(name) else {
                continue;
            };

            let source_value = source.get(name).unwrap_or(&Value::Null);
            let target_is_null = target.get(name).map_or(true, Value::is_null);

            match (source_value.is_null(), target_is_null) {
                (true, true) => {}
                (false, true) => {
                    let converted = self.convert(
                        &target_name,
                        name,
                        &source_field.kind,
                        source_value,
                        &target_field.kind,
                        hooks,
                    )?;
                    target.insert(name.to_string(), converted);
                }
                (true, false) => {
                    let old = target
                        .insert(name.to_string(), cleared(&target_field.kind))
                        .unwrap_or(Value::Null);
                    self.remove_value(&target_field.kind, &old, hooks)?;
                }
                (false, false) => match (&source_field.kind, &target_field.kind) {
                    (FieldKind::Record(source_child), FieldKind::Record(target_child)) => {
                        let src = expect_object(&target_name, name, source_value)?;
                        let source_id = child_id(&target_name, name, src)?;
                        let existing_id = match target.get(name) {
                            Some(Value::Object(existing)) => {
                                child_id(&target_name, name, existing)?
                            }
                            other => {
                                return Err(UsageFault::shape_mismatch(
                                    &target_name,
                                    name,
                                    "object",
                                    json_type_name(other.unwrap_or(&Value::Null)),
                                ))
                            }
                        };

                        if source_id == existing_id {
                            if let Some(Value::Object(existing)) = target.get_mut(name) {
                                self.reconcile(source_child, src, target_child, existing, hooks)?;
                            }
                        } else {
                            debug!(
                                record_type = %target_name,
                                field = name,
                                old = %existing_id,
                                new = %source_id,
                                "replacing child record"
                            );
                            let replacement = self.convert(
                                &target_name,
                                name,
                                &source_field.kind,
                                source_value,
                                &target_field.kind,
                                hooks,
                            )?;
                            let old = target
                                .insert(name.to_string(), replacement)
                                .unwrap_or(Value::Null);
                            self.remove_value(&target_field.kind, &old, hooks)?;
                        }
                    }
                    (
                        FieldKind::Collection {
                            element: source_element,
                            ..
                        },
                        FieldKind::Collection {
                            element: target_element,
                            container,
                        },
                    ) => {
                        let (source_child, target_child) = match (source_element, target_element)
                        {
                            (ElementKind::Record(s), ElementKind::Record(t)) => (s, t),
                            _ => {
                                return Err(UsageFault::UnsupportedCollection {
                                    record_type: target_name.clone(),
                                    field: name.to_string(),
                                    reason: "element type is not a record".to_string(),
                                })
                            }
                        };
                        if *container != ContainerKind::List {
                            return Err(UsageFault::UnsupportedCollection {
                                record_type: target_name.clone(),
                                field: name.to_string(),
                                reason: "container does not support positional removal"
                                    .to_string(),
                            });
                        }
                        let source_items = match source_value {
                            Value::Array(items) => items,
                            other => {
                                return Err(UsageFault::shape_mismatch(
                                    &target_name,
                                    name,
                                    "array",
                                    json_type_name(other),
                                ))
                            }
                        };
                        match target.get_mut(name) {
                            Some(Value::Array(target_items)) => self.reconcile_list(
                                &target_name,
                                name,
                                source_child,
                                source_items,
                                target_child,
                                target_items,
                                hooks,
                            )?,
                            other => {
                                return Err(UsageFault::shape_mismatch(
                                    &target_name,
                                    name,
                                    "array",
                                    json_type_name(other.map_or(&Value::Null, |v| &*v)),
                                ))
                            }
                        }
                    }
                    (source_kind, target_kind)
                        if is_structural(source_kind) || is_structural(target_kind) =>
                    {
                        return Err(incompatible(name, source_kind, target_kind));
                    }
                    _ => {
                        target.insert(name.to_string(), source_value.clone());
                    }
                },
            }
        }

        Ok(())
    }

    /// Remove `record` and everything it owns
    ///
    /// Children are removed before their parent. Nothing happens when the
    /// hooks decline the removal.
    pub fn remove(
        &self,
        ty: &RecordType,
        record: &Document,
        hooks: &mut dyn ReconcileHooks,
    ) -> Result<(), UsageFault> {
        if !hooks.should_remove(ty, record) {
            return Ok(());
        }

        let fields = self.reflector.fields(ty);
        for field in fields.iter() {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            self.remove_value(&field.kind, value, hooks)?;
        }

        hooks.commit_deletion(ty, record)
    }

    fn remove_value(
        &self,
        kind: &FieldKind,
        value: &Value,
        hooks: &mut dyn ReconcileHooks,
    ) -> Result<(), UsageFault> {
        match (kind, value) {
            (FieldKind::Record(child_ty), Value::Object(child)) => {
                self.remove(child_ty, child, hooks)
            }
            (
                FieldKind::Collection {
                    element: ElementKind::Record(child_ty),
                    ..
                },
                Value::Array(items),
            ) => {
                for child in items.iter().filter_map(Value::as_object) {
                    self.remove(child_ty, child, hooks)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_list(
        &self,
        record_type: &str,
        field: &str,
        source_child: &RecordType,
        source_items: &[Value],
        target_child: &RecordType,
        target_items: &mut Vec<Value>,
        hooks: &mut dyn ReconcileHooks,
    ) -> Result<(), UsageFault> {
        // First occurrence of an id wins; later duplicates are dropped.
        let mut lookup: HashMap<RecordId, usize> = HashMap::new();
        let mut incoming: Vec<&Document> = Vec::new();
        for item in source_items {
            let doc = expect_object(record_type, field, item)?;
            let id = child_id(record_type, field, doc)?;
            if lookup.contains_key(&id) {
                debug!(record_type, field, %id, "ignoring duplicate child id in source");
                continue;
            }
            lookup.insert(id, incoming.len());
            incoming.push(doc);
        }
        let mut consumed = vec![false; incoming.len()];

        for item in std::mem::take(target_items) {
            let mut existing = match item {
                Value::Object(doc) => doc,
                other => {
                    return Err(UsageFault::shape_mismatch(
                        record_type,
                        field,
                        "object",
                        json_type_name(&other),
                    ))
                }
            };
            let id = child_id(record_type, field, &existing)?;

            match lookup.get(&id) {
                Some(&index) if !consumed[index] => {
                    consumed[index] = true;
                    self.reconcile(source_child, incoming[index], target_child, &mut existing, hooks)?;
                    target_items.push(Value::Object(existing));
                }
                _ => {
                    debug!(record_type, field, %id, "removing child record");
                    self.remove(target_child, &existing, hooks)?;
                }
            }
        }

        for (index, doc) in incoming.into_iter().enumerate() {
            if !consumed[index] {
                let converted = self.convert_record(source_child, doc, target_child, hooks)?;
                target_items.push(Value::Object(converted));
            }
        }

        Ok(())
    }

    /// Convert a source value into the target field's declared kind
    fn convert(
        &self,
        record_type: &str,
        field: &str,
        source_kind: &FieldKind,
        value: &Value,
        target_kind: &FieldKind,
        hooks: &mut dyn ReconcileHooks,
    ) -> Result<Value, UsageFault> {
        if value.is_null() || source_kind == target_kind {
            return Ok(value.clone());
        }

        match (source_kind, target_kind) {
            (FieldKind::Record(source_child), FieldKind::Record(target_child)) => {
                let src = expect_object(record_type, field, value)?;
                Ok(Value::Object(self.convert_record(
                    source_child,
                    src,
                    target_child,
                    hooks,
                )?))
            }
            (
                FieldKind::Collection {
                    element: ElementKind::Record(source_child),
                    ..
                },
                FieldKind::Collection {
                    element: ElementKind::Record(target_child),
                    ..
                },
            ) => {
                if source_child == target_child {
                    return Ok(value.clone());
                }
                let items = match value {
                    Value::Array(items) => items,
                    other => {
                        return Err(UsageFault::shape_mismatch(
                            record_type,
                            field,
                            "array",
                            json_type_name(other),
                        ))
                    }
                };
                let mut converted = Vec::with_capacity(items.len());
                for item in items {
                    let src = expect_object(record_type, field, item)?;
                    converted.push(Value::Object(self.convert_record(
                        source_child,
                        src,
                        target_child,
                        hooks,
                    )?));
                }
                Ok(Value::Array(converted))
            }
            (s, t) if !is_structural(s) && !is_structural(t) => Ok(value.clone()),
            (s, t) => Err(incompatible(field, s, t)),
        }
    }

    /// New target-typed record carrying the source's identity
    fn convert_record(
        &self,
        source_ty: &RecordType,
        source: &Document,
        target_ty: &RecordType,
        hooks: &mut dyn ReconcileHooks,
    ) -> Result<Document, UsageFault> {
        let name = self.reflector.schema_of(target_ty).name.clone();
        let id = child_id(&name, ID_FIELD, source)?;
        let mut converted = empty_document(id);
        self.reconcile(source_ty, source, target_ty, &mut converted, hooks)?;
        Ok(converted)
    }
}

fn cleared(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::Collection { .. } => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

fn is_structural(kind: &FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::Record(_) | FieldKind::Collection { .. } | FieldKind::Reference { .. }
    )
}

fn describe_kind(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Scalar(scalar) => format!("{:?}", scalar).to_lowercase(),
        FieldKind::Text => "text".to_string(),
        FieldKind::Bytes => "bytes".to_string(),
        FieldKind::Record(ty) => format!("record {}", ty.type_name()),
        FieldKind::Collection { element, container } => {
            format!("{:?} of {:?}", container, element).to_lowercase()
        }
        FieldKind::Reference { target, .. } => format!("reference to {}", target.type_name()),
    }
}

fn incompatible(field: &str, source: &FieldKind, target: &FieldKind) -> UsageFault {
    UsageFault::IncompatibleConversion {
        field: field.to_string(),
        source_kind: describe_kind(source),
        target_kind: describe_kind(target),
    }
}

fn expect_object<'v>(
    record_type: &str,
    field: &str,
    value: &'v Value,
) -> Result<&'v Document, UsageFault> {
    value.as_object().ok_or_else(|| {
        UsageFault::shape_mismatch(record_type, field, "object", json_type_name(value))
    })
}

fn child_id(record_type: &str, field: &str, doc: &Document) -> Result<RecordId, UsageFault> {
    document_id(doc).ok_or_else(|| UsageFault::missing_identity(record_type, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{from_document, to_document, FieldSchema, Record, RecordSchema};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Part {
        id: RecordId,
        serial: String,
    }

    impl Record for Part {
        fn schema() -> RecordSchema {
            RecordSchema::child("Part", "parts").field(FieldSchema::text("serial"))
        }

        fn id(&self) -> RecordId {
            self.id
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Component {
        id: RecordId,
        label: String,
        required_note: String,
        parts: Vec<Part>,
    }

    impl Record for Component {
        fn schema() -> RecordSchema {
            RecordSchema::child("Component", "components")
                .field(FieldSchema::text("label"))
                .field(FieldSchema::text("required_note").required())
                .field(FieldSchema::records::<Part>("parts"))
        }

        fn id(&self) -> RecordId {
            self.id
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Machine {
        id: RecordId,
        name: String,
        motor: Option<Part>,
        components: Vec<Component>,
    }

    impl Record for Machine {
        fn schema() -> RecordSchema {
            RecordSchema::child("Machine", "machines")
                .field(FieldSchema::text("name"))
                .field(FieldSchema::record::<Part>("motor"))
                .field(FieldSchema::records::<Component>("components"))
        }

        fn id(&self) -> RecordId {
            self.id
        }
    }

    // Relational-shaped twin of `Part`/`Machine` for cross-type conversion.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PartRow {
        id: RecordId,
        serial: Option<String>,
    }

    impl Record for PartRow {
        fn schema() -> RecordSchema {
            RecordSchema::child("PartRow", "part_rows").field(FieldSchema::text("serial"))
        }

        fn id(&self) -> RecordId {
            self.id
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct MachineRow {
        id: RecordId,
        name: Option<String>,
        motor: Option<PartRow>,
        #[serde(default)]
        spare_parts: Vec<PartRow>,
    }

    impl Record for MachineRow {
        fn schema() -> RecordSchema {
            RecordSchema::child("MachineRow", "machine_rows")
                .field(FieldSchema::text("name"))
                .field(FieldSchema::record::<PartRow>("motor"))
                .field(FieldSchema::records::<PartRow>("spare_parts"))
        }

        fn id(&self) -> RecordId {
            self.id
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct MotorAsText {
        id: RecordId,
        motor: Option<String>,
    }

    impl Record for MotorAsText {
        fn schema() -> RecordSchema {
            RecordSchema::child("MotorAsText", "motors").field(FieldSchema::text("motor"))
        }

        fn id(&self) -> RecordId {
            self.id
        }
    }

    /// Records every removal; optionally refuses some ids
    #[derive(Default)]
    struct RecordingHooks {
        removed: Vec<(String, RecordId)>,
        protected: Vec<RecordId>,
    }

    impl ReconcileHooks for RecordingHooks {
        fn should_remove(&mut self, _record_type: &RecordType, record: &Document) -> bool {
            document_id(record).map_or(true, |id| !self.protected.contains(&id))
        }

        fn commit_deletion(
            &mut self,
            record_type: &RecordType,
            record: &Document,
        ) -> Result<(), UsageFault> {
            let name = Reflector::global().schema_of(record_type).name.clone();
            self.removed.push((name, document_id(record).unwrap()));
            Ok(())
        }
    }

    fn part(serial: &str) -> Part {
        Part {
            id: Uuid::new_v4(),
            serial: serial.to_string(),
        }
    }

    fn component(label: &str, parts: Vec<Part>) -> Component {
        Component {
            id: Uuid::new_v4(),
            label: label.to_string(),
            required_note: format!("note for {}", label),
            parts,
        }
    }

    fn machine(components: Vec<Component>) -> Machine {
        Machine {
            id: Uuid::new_v4(),
            name: "press".to_string(),
            motor: Some(part("M-1")),
            components,
        }
    }

    fn run<S: Record, T: Record>(
        source: &S,
        target: &T,
        hooks: &mut RecordingHooks,
    ) -> Result<T, UsageFault> {
        let source_doc = to_document(source).unwrap();
        let mut target_doc = to_document(target).unwrap();
        Reconciler::new(Reflector::global()).reconcile(
            &RecordType::of::<S>(),
            &source_doc,
            &RecordType::of::<T>(),
            &mut target_doc,
            hooks,
        )?;
        Ok(from_document(target_doc).unwrap())
    }

    #[test]
    fn test_unchanged_graph_is_a_no_op() {
        let persisted = machine(vec![component("a", vec![part("P1")])]);
        let mut hooks = RecordingHooks::default();
        let result = run(&persisted, &persisted, &mut hooks).unwrap();
        assert_eq!(result, persisted);
        assert!(hooks.removed.is_empty());
    }

    #[test]
    fn test_removed_child_cascades_into_descendants() {
        let a = component("a", vec![]);
        let b = component("b", vec![part("B1"), part("B2")]);
        let c = component("c", vec![]);
        let persisted = machine(vec![a.clone(), b.clone(), c.clone()]);

        let mut incoming = persisted.clone();
        incoming.components = vec![a.clone(), c.clone()];

        let mut hooks = RecordingHooks::default();
        let result = run(&incoming, &persisted, &mut hooks).unwrap();

        let ids: Vec<_> = result.components.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert_eq!(
            hooks.removed,
            vec![
                ("Part".to_string(), b.parts[0].id),
                ("Part".to_string(), b.parts[1].id),
                ("Component".to_string(), b.id),
            ]
        );
    }

    #[test]
    fn test_new_children_are_appended_after_existing_order() {
        let a = component("a", vec![]);
        let b = component("b", vec![]);
        let d = component("d", vec![part("D1")]);
        let persisted = machine(vec![a.clone(), b.clone()]);

        let mut incoming = persisted.clone();
        incoming.components = vec![d.clone(), b.clone(), a.clone()];

        let mut hooks = RecordingHooks::default();
        let result = run(&incoming, &persisted, &mut hooks).unwrap();

        let ids: Vec<_> = result.components.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id, d.id]);
        assert_eq!(result.components[2], d);
        assert!(hooks.removed.is_empty());
    }

    #[test]
    fn test_matched_child_is_updated_in_place() {
        let a = component("a", vec![part("A1")]);
        let persisted = machine(vec![a.clone()]);

        let mut incoming = persisted.clone();
        incoming.components[0].required_note = "changed".to_string();
        incoming.components[0].parts[0].serial = "A1-rev2".to_string();

        let mut hooks = RecordingHooks::default();
        let result = run(&incoming, &persisted, &mut hooks).unwrap();

        assert_eq!(result.components[0].id, a.id);
        assert_eq!(result.components[0].required_note, "changed");
        assert_eq!(result.components[0].parts[0].id, a.parts[0].id);
        assert_eq!(result.components[0].parts[0].serial, "A1-rev2");
        assert!(hooks.removed.is_empty());
    }

    #[test]
    fn test_single_child_with_new_identity_replaces_old() {
        let persisted = machine(vec![]);
        let old_motor = persisted.motor.clone().unwrap();

        let mut incoming = persisted.clone();
        incoming.motor = Some(part("M-2"));

        let mut hooks = RecordingHooks::default();
        let result = run(&incoming, &persisted, &mut hooks).unwrap();

        assert_eq!(result.motor, incoming.motor);
        assert_eq!(hooks.removed, vec![("Part".to_string(), old_motor.id)]);
    }

    #[test]
    fn test_null_source_clears_and_removes() {
        let persisted = machine(vec![component("a", vec![part("A1")])]);
        let motor_id = persisted.motor.as_ref().unwrap().id;

        let mut incoming = persisted.clone();
        incoming.motor = None;

        let mut hooks = RecordingHooks::default();
        let result = run(&incoming, &persisted, &mut hooks).unwrap();

        assert!(result.motor.is_none());
        assert_eq!(hooks.removed, vec![("Part".to_string(), motor_id)]);
    }

    // Duplicate ids in one source collection keep only the first occurrence.
    #[test]
    fn test_duplicate_source_ids_first_wins() {
        let persisted = machine(vec![]);
        let first = component("first", vec![]);
        let mut second = first.clone();
        second.label = "second".to_string();

        let mut incoming = persisted.clone();
        incoming.components = vec![first.clone(), second];

        let mut hooks = RecordingHooks::default();
        let result = run(&incoming, &persisted, &mut hooks).unwrap();

        assert_eq!(result.components.len(), 1);
        assert_eq!(result.components[0].label, "first");
    }

    #[test]
    fn test_cross_type_conversion_builds_target_records() {
        let domain = Machine {
            id: Uuid::new_v4(),
            name: "lathe".to_string(),
            motor: Some(part("M-9")),
            components: vec![],
        };
        let row = MachineRow {
            id: domain.id,
            name: None,
            motor: None,
            spare_parts: vec![],
        };

        let mut hooks = RecordingHooks::default();
        let result = run(&domain, &row, &mut hooks).unwrap();

        assert_eq!(result.name.as_deref(), Some("lathe"));
        let motor = result.motor.unwrap();
        assert_eq!(motor.id, domain.motor.as_ref().unwrap().id);
        assert_eq!(motor.serial.as_deref(), Some("M-9"));
        // Fields without a counterpart in the source are left alone.
        assert!(result.spare_parts.is_empty());
    }

    #[test]
    fn test_record_versus_scalar_is_usage_fault() {
        let domain = machine(vec![]);
        let target = MotorAsText {
            id: domain.id,
            motor: Some("legacy".to_string()),
        };

        let mut hooks = RecordingHooks::default();
        let result = run(&domain, &target, &mut hooks);
        assert!(matches!(
            result,
            Err(UsageFault::IncompatibleConversion { ref field, .. }) if field == "motor"
        ));
    }

    #[test]
    fn test_declined_removal_drops_child_without_deleting_it() {
        let keep = component("keep", vec![part("K1")]);
        let persisted = machine(vec![keep.clone()]);

        let mut incoming = persisted.clone();
        incoming.components.clear();

        let mut hooks = RecordingHooks {
            protected: vec![keep.id],
            ..Default::default()
        };
        let result = run(&incoming, &persisted, &mut hooks).unwrap();

        // Gone from the graph, but neither it nor its parts were deleted
        assert!(result.components.is_empty());
        assert!(hooks.removed.is_empty());
    }

    #[test]
    fn test_remove_walks_children_before_parent() {
        let persisted = machine(vec![component("a", vec![part("A1")])]);
        let doc = to_document(&persisted).unwrap();

        let mut hooks = RecordingHooks::default();
        Reconciler::new(Reflector::global())
            .remove(&RecordType::of::<Machine>(), &doc, &mut hooks)
            .unwrap();

        let names: Vec<_> = hooks.removed.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Part", "Part", "Component", "Machine"]);
        assert_eq!(hooks.removed.last().unwrap().1, persisted.id);
    }

    #[test]
    fn test_child_without_identity_is_usage_fault() {
        let persisted = machine(vec![]);
        let mut source = to_document(&persisted).unwrap();
        source.insert(
            "components".to_string(),
            serde_json::json!([{"label": "anonymous", "required_note": "x", "parts": []}]),
        );
        let mut target = to_document(&persisted).unwrap();

        let result = Reconciler::new(Reflector::global()).reconcile(
            &RecordType::of::<Machine>(),
            &source,
            &RecordType::of::<Machine>(),
            &mut target,
            &mut NoopHooks,
        );
        assert!(matches!(result, Err(UsageFault::MissingIdentity { .. })));
    }
}
