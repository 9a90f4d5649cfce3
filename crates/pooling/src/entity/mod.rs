//! Entities - Row-backed records shared by reference within a result batch
//!
//! An [`Entity`] carries its scalar columns and a set of named slots. Slots
//! hold either a single related instance or an ordered list; schema-declared
//! relationships and ad-hoc destinations (mapping targets, buckets) use the
//! same storage. A slot that was never written is "unloaded".
//!
//! [`Instance`] is the shared handle handed out to callers. Two handles are
//! equal when they name the same row; [`Instance::ptr_eq`] tells whether they
//! are the very same object.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::{Map, Value};

use crate::error::{PoolingError, PoolingResult};
use crate::schema::EntitySchema;

pub mod key;

pub use key::KeyValue;

/// Contents of a relationship or attribute slot
#[derive(Debug, Clone)]
pub enum Slot {
    One(Option<Instance>),
    Many(Vec<Instance>),
}

impl Slot {
    /// Instances referenced by the slot, in order
    pub fn instances(&self) -> Vec<Instance> {
        match self {
            Slot::One(Some(instance)) => vec![instance.clone()],
            Slot::One(None) => Vec::new(),
            Slot::Many(items) => items.clone(),
        }
    }
}

/// A materialized row
#[derive(Debug)]
pub struct Entity {
    entity_type: String,
    key: KeyValue,
    fields: Map<String, Value>,
    slots: HashMap<String, Slot>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, key: KeyValue, fields: Map<String, Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            key,
            fields,
            slots: HashMap::new(),
        }
    }

    /// Build an entity from raw columns, reading the key from the schema's primary key column
    pub fn from_columns(schema: &EntitySchema, columns: Map<String, Value>) -> PoolingResult<Self> {
        let key = columns
            .get(&schema.primary_key)
            .and_then(KeyValue::from_json)
            .ok_or_else(|| PoolingError::MissingPrimaryKey(schema.name.clone()))?;
        Ok(Self::new(schema.name.clone(), key, columns))
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn key(&self) -> &KeyValue {
        &self.key
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }
}

/// Shared handle to an [`Entity`]
#[derive(Clone)]
pub struct Instance(Arc<RwLock<Entity>>);

impl Instance {
    pub fn new(entity: Entity) -> Self {
        Instance(Arc::new(RwLock::new(entity)))
    }

    /// True when both handles point at the same object
    pub fn ptr_eq(a: &Instance, b: &Instance) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Borrow the entity for several reads at once
    pub fn read(&self) -> RwLockReadGuard<'_, Entity> {
        self.0.read()
    }

    pub fn entity_type(&self) -> String {
        self.0.read().entity_type.clone()
    }

    pub fn key(&self) -> KeyValue {
        self.0.read().key.clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.0.read().fields.get(field).cloned()
    }

    /// Read a column as a key; null or missing columns yield `None`
    pub fn get_key(&self, field: &str) -> Option<KeyValue> {
        self.0.read().fields.get(field).and_then(KeyValue::from_json)
    }

    pub fn set(&self, field: &str, value: impl Into<Value>) {
        self.0.write().fields.insert(field.to_string(), value.into());
    }

    pub fn unset(&self, field: &str) -> Option<Value> {
        self.0.write().fields.remove(field)
    }

    pub fn slot(&self, name: &str) -> Option<Slot> {
        self.0.read().slots.get(name).cloned()
    }

    pub fn set_slot(&self, name: &str, slot: Slot) {
        self.0.write().slots.insert(name.to_string(), slot);
    }

    pub fn clear_slot(&self, name: &str) -> Option<Slot> {
        self.0.write().slots.remove(name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.0.read().slots.contains_key(name)
    }

    /// The instance held by a to-one slot
    pub fn related(&self, name: &str) -> Option<Instance> {
        match self.0.read().slots.get(name) {
            Some(Slot::One(related)) => related.clone(),
            _ => None,
        }
    }

    /// The list held by a to-many slot
    pub fn list(&self, name: &str) -> Option<Vec<Instance>> {
        match self.0.read().slots.get(name) {
            Some(Slot::Many(items)) => Some(items.clone()),
            _ => None,
        }
    }

    /// Append to a list slot, creating it when absent or replacing a to-one value
    pub fn push_to(&self, name: &str, item: Instance) {
        let mut entity = self.0.write();
        match entity.slots.get_mut(name) {
            Some(Slot::Many(items)) => items.push(item),
            _ => {
                entity.slots.insert(name.to_string(), Slot::Many(vec![item]));
            }
        }
    }

    /// Cut a list slot down to `limit` entries. Returns false when the slot is not a list.
    pub fn truncate(&self, name: &str, limit: usize) -> bool {
        match self.0.write().slots.get_mut(name) {
            Some(Slot::Many(items)) => {
                items.truncate(limit);
                true
            }
            _ => false,
        }
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        if Instance::ptr_eq(self, other) {
            return true;
        }
        let (a, b) = (self.0.read(), other.0.read());
        a.entity_type == b.entity_type && a.key == b.key
    }
}

impl Eq for Instance {}

impl Hash for Instance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let entity = self.0.read();
        entity.entity_type.hash(state);
        entity.key.hash(state);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = self.0.read();
        write!(f, "{}#{}", entity.entity_type, entity.key)
    }
}
