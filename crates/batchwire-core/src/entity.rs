//! Entity-state seam: the contract the coordinator needs from client-side
//! entities, plus [`EntityRecord`], an owned implementation with explicit
//! dirty tracking.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

/// A navigation from one entity type to another, with the scalar foreign-key
/// field backing it (if any).
#[derive(Debug, Clone)]
pub struct Navigation {
    /// Property name used in content-id-relative URLs (`$<id>/<name>`).
    pub name: String,
    /// Entity type this navigation points at.
    pub target_type: String,
    /// Scalar field on the owning entity holding the target's key.
    pub foreign_key: Option<String>,
}

impl Navigation {
    pub fn new(
        name: impl Into<String>,
        target_type: impl Into<String>,
        foreign_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            foreign_key,
        }
    }
}

/// What the coordinator needs from an entity. Implementations track their
/// own dirtiness and persisted identity; the coordinator never inspects
/// fields directly.
pub trait EntityState: Send {
    /// Schema type name, e.g. `"Author"`.
    fn entity_type(&self) -> &str;

    /// Entity set this instance belongs to, e.g. `"Authors"`.
    fn entity_set(&self) -> &str;

    /// Whether the entity already carries a server-assigned identity.
    fn persisted(&self) -> bool;

    fn set_persisted(&mut self, persisted: bool);

    /// Canonical URL of this instance, if known.
    fn instance_url(&self) -> Option<String>;

    /// Declared navigations from this entity's type.
    fn navigations(&self) -> &[Navigation];

    /// Full payload for a create operation.
    fn data_for_insert(&self) -> Map<String, Value>;

    /// Changed fields only, for a patch operation. Annotation-prefixed keys
    /// may be included; the coordinator filters them when judging emptiness.
    fn data_for_update(&self) -> Map<String, Value>;

    /// Clear dirty tracking.
    fn reset(&mut self);

    /// Apply server-returned field values without marking them dirty.
    fn apply(&mut self, values: &Map<String, Value>);
}

/// Entities are shared so completions can mutate them after the response.
pub type SharedEntity = Arc<Mutex<dyn EntityState>>;

/// Wrap an entity for queuing.
pub fn shared<E: EntityState + 'static>(entity: E) -> SharedEntity {
    Arc::new(Mutex::new(entity))
}

/// An owned, schema-light entity record.
///
/// Field writes through [`EntityRecord::set`] mark the field dirty; a fresh
/// record is not persisted and has no instance URL until
/// [`EntityRecord::mark_persisted`] is called (typically by query machinery
/// outside this crate, or by the insert completion).
#[derive(Debug, Clone)]
pub struct EntityRecord {
    entity_type: String,
    entity_set: String,
    fields: Map<String, Value>,
    dirty: BTreeSet<String>,
    persisted: bool,
    instance_url: Option<String>,
    navigations: Vec<Navigation>,
}

impl EntityRecord {
    pub fn new(entity_type: impl Into<String>, entity_set: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_set: entity_set.into(),
            fields: Map::new(),
            dirty: BTreeSet::new(),
            persisted: false,
            instance_url: None,
            navigations: Vec::new(),
        }
    }

    /// Declare a navigation on this record's type (builder style).
    pub fn with_navigation(mut self, nav: Navigation) -> Self {
        self.navigations.push(nav);
        self
    }

    /// Set a field value and mark it dirty.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.dirty.insert(name.clone());
        self.fields.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Mark this record as having a server-side identity at `instance_url`.
    pub fn mark_persisted(&mut self, instance_url: impl Into<String>) {
        self.persisted = true;
        self.instance_url = Some(instance_url.into());
    }
}

impl EntityState for EntityRecord {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn entity_set(&self) -> &str {
        &self.entity_set
    }

    fn persisted(&self) -> bool {
        self.persisted
    }

    fn set_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    fn instance_url(&self) -> Option<String> {
        self.instance_url.clone()
    }

    fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    fn data_for_insert(&self) -> Map<String, Value> {
        self.fields.clone()
    }

    fn data_for_update(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| self.dirty.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn reset(&mut self) {
        self.dirty.clear();
    }

    fn apply(&mut self, values: &Map<String, Value>) {
        for (k, v) in values {
            self.fields.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_marks_dirty() {
        let mut rec = EntityRecord::new("Author", "Authors");
        rec.set("Name", json!("Ursula Le Guin"));
        rec.set("Born", json!(1929));
        let patch = rec.data_for_update();
        assert_eq!(patch.len(), 2);
        assert_eq!(patch["Name"], json!("Ursula Le Guin"));
    }

    #[test]
    fn reset_clears_dirty_but_keeps_values() {
        let mut rec = EntityRecord::new("Author", "Authors");
        rec.set("Name", json!("x"));
        rec.reset();
        assert!(rec.data_for_update().is_empty());
        assert_eq!(rec.get("Name"), Some(&json!("x")));
    }

    #[test]
    fn apply_does_not_dirty() {
        let mut rec = EntityRecord::new("Author", "Authors");
        let mut vals = Map::new();
        vals.insert("Id".into(), json!(42));
        rec.apply(&vals);
        assert!(rec.data_for_update().is_empty());
        assert_eq!(rec.get("Id"), Some(&json!(42)));
        // insert payload always carries all fields
        assert_eq!(rec.data_for_insert().len(), 1);
    }

    #[test]
    fn mark_persisted_sets_url() {
        let mut rec = EntityRecord::new("Author", "Authors");
        assert!(!rec.persisted());
        rec.mark_persisted("https://svc/odata/Authors(42)");
        assert!(rec.persisted());
        assert_eq!(
            rec.instance_url().as_deref(),
            Some("https://svc/odata/Authors(42)")
        );
    }
}
