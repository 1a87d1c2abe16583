use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::datatype::{DataType, ScalarKind, Value};
use crate::error::{EavaultError, Result};
use crate::registry::{EntityType, EntityTypeId, Field, FieldId, FieldKind};

/// One object of a registered entity type and every value it holds.
///
/// Slots are keyed by field id and typed by the field's kind. Construction
/// fills every declared scalar field with its default, so a fresh instance
/// is always complete.
#[derive(Debug, Clone)]
pub struct EntityInstance {
    guid: String,
    entity_type: Arc<EntityType>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    scalars: BTreeMap<FieldId, Value>,
    arrays: BTreeMap<FieldId, Vec<Value>>,
    selections: BTreeMap<FieldId, Vec<String>>,
    child: BTreeMap<FieldId, Box<EntityInstance>>,
    children: BTreeMap<FieldId, Vec<EntityInstance>>,
}

impl EntityInstance {
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self::with_guid(entity_type, Uuid::new_v4().to_string())
    }

    pub fn with_guid(entity_type: Arc<EntityType>, guid: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut scalars = BTreeMap::new();
        let mut arrays = BTreeMap::new();
        let mut children = BTreeMap::new();
        for field in entity_type.fields() {
            match field.kind() {
                FieldKind::Scalar(kind) => {
                    scalars.insert(field.id(), Value::default_for(kind));
                }
                FieldKind::Array(_) => {
                    arrays.insert(field.id(), Vec::new());
                }
                FieldKind::Children => {
                    children.insert(field.id(), Vec::new());
                }
                FieldKind::Enum | FieldKind::Child => (),
            }
        }
        let selections = entity_type
            .enum_fields()
            .map(|e| (e.id(), Vec::new()))
            .collect();
        Self {
            guid: guid.into(),
            entity_type,
            created: now,
            modified: now,
            scalars,
            arrays,
            selections,
            child: BTreeMap::new(),
            children,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }
    pub fn type_id(&self) -> EntityTypeId {
        self.entity_type.id()
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }
    pub fn set_created(&mut self, created: DateTime<Utc>) {
        self.created = created;
    }
    pub fn set_modified(&mut self, modified: DateTime<Utc>) {
        self.modified = modified;
    }

    fn declared(&self, id: FieldId) -> Result<&Arc<Field>> {
        self.entity_type
            .field(id)
            .ok_or_else(|| EavaultError::UnknownField {
                field: id,
                entity_type: self.entity_type.name().to_owned(),
            })
    }

    fn expect_kind(&self, id: FieldId, expected: FieldKind, found: FieldKind) -> Result<()> {
        if expected == found {
            Ok(())
        } else {
            Err(EavaultError::KindMismatch {
                field: id,
                expected: expected.code(),
                found: found.code(),
            })
        }
    }

    // ------------- scalar slots -------------
    pub fn set_value(&mut self, id: FieldId, value: Value) -> Result<()> {
        let declared = self.declared(id)?.kind();
        self.expect_kind(id, declared, FieldKind::Scalar(value.kind()))?;
        self.scalars.insert(id, value);
        Ok(())
    }
    pub fn set<T: DataType>(&mut self, id: FieldId, value: T) -> Result<()> {
        self.set_value(id, value.into_value())
    }
    pub fn value(&self, id: FieldId) -> Option<&Value> {
        self.scalars.get(&id)
    }
    pub fn get<T: DataType>(&self, id: FieldId) -> Result<T> {
        let declared = self.declared(id)?.kind();
        self.expect_kind(id, declared, FieldKind::Scalar(T::KIND))?;
        self.scalars
            .get(&id)
            .and_then(T::from_value)
            .ok_or_else(|| EavaultError::corruption(format!("scalar slot {} is empty", id)))
    }
    /// Every scalar slot, for the save pipeline.
    pub fn scalars(&self) -> impl Iterator<Item = (FieldId, &Value)> {
        self.scalars.iter().map(|(id, value)| (*id, value))
    }

    // ------------- array slots -------------
    fn array_kind(&self, id: FieldId) -> Result<ScalarKind> {
        match self.declared(id)?.kind() {
            FieldKind::Array(kind) => Ok(kind),
            other => Err(EavaultError::KindMismatch {
                field: id,
                expected: other.code(),
                found: "array".to_string(),
            }),
        }
    }
    pub fn set_array_values(&mut self, id: FieldId, values: Vec<Value>) -> Result<()> {
        let kind = self.array_kind(id)?;
        if let Some(wrong) = values.iter().find(|v| v.kind() != kind) {
            return Err(EavaultError::KindMismatch {
                field: id,
                expected: FieldKind::Array(kind).code(),
                found: wrong.kind().name().to_string(),
            });
        }
        self.arrays.insert(id, values);
        Ok(())
    }
    pub fn set_array<T: DataType>(&mut self, id: FieldId, values: Vec<T>) -> Result<()> {
        self.set_array_values(id, values.into_iter().map(T::into_value).collect())
    }
    pub fn push<T: DataType>(&mut self, id: FieldId, value: T) -> Result<()> {
        let kind = self.array_kind(id)?;
        self.expect_kind(id, FieldKind::Array(kind), FieldKind::Array(T::KIND))?;
        self.arrays.entry(id).or_default().push(value.into_value());
        Ok(())
    }
    /// Overwrites one position; the position must already exist.
    pub fn set_at<T: DataType>(&mut self, id: FieldId, position: usize, value: T) -> Result<()> {
        let kind = self.array_kind(id)?;
        self.expect_kind(id, FieldKind::Array(kind), FieldKind::Array(T::KIND))?;
        let slot = self.arrays.entry(id).or_default();
        let len = slot.len();
        match slot.get_mut(position) {
            Some(current) => {
                *current = value.into_value();
                Ok(())
            }
            None => Err(EavaultError::InvalidDefinition(format!(
                "position {} is beyond the {} values of array field {}",
                position, len, id
            ))),
        }
    }
    pub fn array(&self, id: FieldId) -> &[Value] {
        self.arrays.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn array_of<T: DataType>(&self, id: FieldId) -> Result<Vec<T>> {
        let kind = self.array_kind(id)?;
        self.expect_kind(id, FieldKind::Array(kind), FieldKind::Array(T::KIND))?;
        Ok(self.array(id).iter().filter_map(T::from_value).collect())
    }
    pub fn arrays(&self) -> impl Iterator<Item = (FieldId, &[Value])> {
        self.arrays.iter().map(|(id, values)| (*id, values.as_slice()))
    }

    // ------------- enum selections -------------
    pub fn set_selection(&mut self, id: FieldId, literals: &[&str]) -> Result<()> {
        let enum_field = self
            .entity_type
            .enum_field(id)
            .ok_or_else(|| EavaultError::UnknownField {
                field: id,
                entity_type: self.entity_type.name().to_owned(),
            })?;
        if let Some(unknown) = literals.iter().find(|l| enum_field.index_of(l).is_none()) {
            return Err(EavaultError::UnknownLiteral {
                field: id,
                literal: unknown.to_string(),
            });
        }
        self.selections
            .insert(id, literals.iter().map(|l| l.to_string()).collect());
        Ok(())
    }
    pub fn select(&mut self, id: FieldId, literal: &str) -> Result<()> {
        let mut current: Vec<String> = self.selection(id).to_vec();
        current.push(literal.to_owned());
        let literals: Vec<&str> = current.iter().map(String::as_str).collect();
        self.set_selection(id, &literals)
    }
    pub fn selection(&self, id: FieldId) -> &[String] {
        self.selections.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn selections(&self) -> impl Iterator<Item = (FieldId, &[String])> {
        self.selections.iter().map(|(id, l)| (*id, l.as_slice()))
    }

    // ------------- nested instances -------------
    pub fn set_child(&mut self, id: FieldId, child: EntityInstance) -> Result<()> {
        let declared = self.declared(id)?.kind();
        self.expect_kind(id, declared, FieldKind::Child)?;
        self.child.insert(id, Box::new(child));
        Ok(())
    }
    pub fn clear_child(&mut self, id: FieldId) -> Option<EntityInstance> {
        self.child.remove(&id).map(|c| *c)
    }
    pub fn child(&self, id: FieldId) -> Option<&EntityInstance> {
        self.child.get(&id).map(Box::as_ref)
    }
    pub fn child_slots(&self) -> impl Iterator<Item = (FieldId, &EntityInstance)> {
        self.child.iter().map(|(id, c)| (*id, c.as_ref()))
    }
    pub fn add_child(&mut self, id: FieldId, child: EntityInstance) -> Result<()> {
        let declared = self.declared(id)?.kind();
        self.expect_kind(id, declared, FieldKind::Children)?;
        self.children.entry(id).or_default().push(child);
        Ok(())
    }
    pub fn children(&self, id: FieldId) -> &[EntityInstance] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn collection_slots(&self) -> impl Iterator<Item = (FieldId, &[EntityInstance])> {
        self.children.iter().map(|(id, c)| (*id, c.as_slice()))
    }
}
