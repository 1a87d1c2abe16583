//! Process-wide metadata: fields, enum fields and entity types.
//!
//! Registration is append-only. Registering the same id again with an
//! identical definition is a no-op; any difference is a
//! [`EavaultError::MetadataConflict`] and leaves the registry untouched.
//!
//! Writers are serialised by a single mutex and publish a fresh immutable
//! [`Catalog`] snapshot, so lookups only clone an `Arc` and never wait on a
//! registration in progress.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::{Arc, Mutex, RwLock};

// used to keep the one-to-one mapping between enum literals and their positions
use bimap::BiMap;
use lazy_static::lazy_static;
use regex::Regex;
use seahash::SeaHasher;

use crate::datatype::ScalarKind;
use crate::error::{EavaultError, Result};
use crate::instance::EntityInstance;

pub type FieldId = u32;
pub type EntityTypeId = u32;

pub type IdHasher = BuildHasherDefault<SeaHasher>;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Names end up as column names in rendered filters, so only plain
/// identifiers are accepted.
pub fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(EavaultError::InvalidIdentifier(name.to_owned()))
    }
}

// ------------- Field -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Array(ScalarKind),
    Enum,
    Child,
    Children,
}

impl FieldKind {
    pub fn code(&self) -> String {
        match self {
            FieldKind::Scalar(kind) => kind.name().to_string(),
            FieldKind::Array(kind) => format!("{}[]", kind.name()),
            FieldKind::Enum => "enum".to_string(),
            FieldKind::Child => "child".to_string(),
            FieldKind::Children => "children".to_string(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Field {
    id: FieldId,
    name: String,
    kind: FieldKind,
}

impl Field {
    pub fn new(id: FieldId, name: &str, kind: FieldKind) -> Result<Self> {
        check_identifier(name)?;
        Ok(Self {
            id,
            name: name.to_owned(),
            kind,
        })
    }
    pub fn id(&self) -> FieldId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}::<{}>", self.name, self.id, self.kind)
    }
}

// ------------- EnumField -------------
/// A field of enum kind together with its ordered legal literals.
#[derive(Debug, PartialEq, Eq)]
pub struct EnumField {
    field: Arc<Field>,
    literals: BiMap<String, usize>,
}

impl EnumField {
    pub fn new(id: FieldId, name: &str, literals: &[&str]) -> Result<Self> {
        let field = Arc::new(Field::new(id, name, FieldKind::Enum)?);
        let mut kept = BiMap::new();
        for (index, literal) in literals.iter().enumerate() {
            if kept.insert_no_overwrite(literal.to_string(), index).is_err() {
                return Err(EavaultError::InvalidDefinition(format!(
                    "enum field {} lists '{}' more than once",
                    id, literal
                )));
            }
        }
        Ok(Self {
            field,
            literals: kept,
        })
    }
    pub fn field(&self) -> &Arc<Field> {
        &self.field
    }
    pub fn id(&self) -> FieldId {
        self.field.id()
    }
    pub fn index_of(&self, literal: &str) -> Option<usize> {
        self.literals.get_by_left(literal).copied()
    }
    pub fn literal_at(&self, index: usize) -> Option<&str> {
        self.literals.get_by_right(&index).map(String::as_str)
    }
    pub fn literals(&self) -> Vec<&str> {
        (0..self.literals.len())
            .filter_map(|i| self.literal_at(i))
            .collect()
    }
    pub fn len(&self) -> usize {
        self.literals.len()
    }
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }
}

// ------------- EntityType -------------
/// Plain-data declaration of an entity type, as supplied by start-up code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeDef {
    pub id: EntityTypeId,
    pub name: String,
    pub fields: Vec<FieldId>,
    pub enum_fields: Vec<FieldId>,
    pub extends: Vec<EntityTypeId>,
}

impl EntityTypeDef {
    pub fn new(id: EntityTypeId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            fields: Vec::new(),
            enum_fields: Vec::new(),
            extends: Vec::new(),
        }
    }
    pub fn field(mut self, id: FieldId) -> Self {
        self.fields.push(id);
        self
    }
    pub fn enum_field(mut self, id: FieldId) -> Self {
        self.enum_fields.push(id);
        self
    }
    pub fn extends(mut self, id: EntityTypeId) -> Self {
        self.extends.push(id);
        self
    }
}

/// A registered entity type with the field tables of every type it
/// extends already unioned in.
#[derive(Debug, PartialEq, Eq)]
pub struct EntityType {
    id: EntityTypeId,
    name: String,
    extends: Vec<EntityTypeId>,
    fields: BTreeMap<FieldId, Arc<Field>>,
    enum_fields: BTreeMap<FieldId, Arc<EnumField>>,
}

impl EntityType {
    pub fn id(&self) -> EntityTypeId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn extends(&self) -> &[EntityTypeId] {
        &self.extends
    }
    /// Every non-enum field, own and inherited.
    pub fn fields(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields.values()
    }
    pub fn enum_fields(&self) -> impl Iterator<Item = &Arc<EnumField>> {
        self.enum_fields.values()
    }
    pub fn field(&self, id: FieldId) -> Option<&Arc<Field>> {
        self.fields
            .get(&id)
            .or_else(|| self.enum_fields.get(&id).map(|e| e.field()))
    }
    pub fn enum_field(&self, id: FieldId) -> Option<&Arc<EnumField>> {
        self.enum_fields.get(&id)
    }
    pub fn scalar_kinds(&self) -> BTreeSet<ScalarKind> {
        self.fields()
            .filter_map(|f| match f.kind() {
                FieldKind::Scalar(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }
    pub fn array_kinds(&self) -> BTreeSet<ScalarKind> {
        self.fields()
            .filter_map(|f| match f.kind() {
                FieldKind::Array(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }
    pub fn has_children(&self) -> bool {
        self.fields()
            .any(|f| matches!(f.kind(), FieldKind::Child | FieldKind::Children))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

// ------------- Catalog -------------
/// An immutable snapshot of everything registered so far.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    fields: HashMap<FieldId, Arc<Field>, IdHasher>,
    enum_fields: HashMap<FieldId, Arc<EnumField>, IdHasher>,
    entity_types: HashMap<EntityTypeId, Arc<EntityType>, IdHasher>,
}

impl Catalog {
    pub fn field(&self, id: FieldId) -> Option<&Arc<Field>> {
        self.fields.get(&id)
    }
    pub fn enum_field(&self, id: FieldId) -> Option<&Arc<EnumField>> {
        self.enum_fields.get(&id)
    }
    pub fn entity_type(&self, id: EntityTypeId) -> Option<&Arc<EntityType>> {
        self.entity_types.get(&id)
    }
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
    pub fn entity_type_count(&self) -> usize {
        self.entity_types.len()
    }

    fn keep_field(&mut self, field: Arc<Field>) -> Result<(Arc<Field>, bool)> {
        match self.fields.entry(field.id()) {
            Entry::Occupied(e) => {
                if **e.get() != *field {
                    return Err(EavaultError::MetadataConflict(format!(
                        "field id {} is bound to {}, not {}",
                        field.id(),
                        e.get(),
                        field
                    )));
                }
                Ok((Arc::clone(e.get()), true))
            }
            Entry::Vacant(e) => Ok((Arc::clone(e.insert(field)), false)),
        }
    }

    fn keep_enum_field(&mut self, enum_field: Arc<EnumField>) -> Result<(Arc<EnumField>, bool)> {
        self.keep_field(Arc::clone(enum_field.field()))?;
        match self.enum_fields.entry(enum_field.id()) {
            Entry::Occupied(e) => {
                if **e.get() != *enum_field {
                    return Err(EavaultError::MetadataConflict(format!(
                        "enum field id {} is bound to literals {:?}, not {:?}",
                        enum_field.id(),
                        e.get().literals(),
                        enum_field.literals()
                    )));
                }
                Ok((Arc::clone(e.get()), true))
            }
            Entry::Vacant(e) => Ok((Arc::clone(e.insert(enum_field)), false)),
        }
    }

    fn keep_entity_type(&mut self, entity_type: Arc<EntityType>) -> Result<(Arc<EntityType>, bool)> {
        for field in entity_type.fields.values() {
            self.keep_field(Arc::clone(field))?;
        }
        for enum_field in entity_type.enum_fields.values() {
            self.keep_enum_field(Arc::clone(enum_field))?;
        }
        match self.entity_types.entry(entity_type.id()) {
            Entry::Occupied(e) => {
                if **e.get() != *entity_type {
                    return Err(EavaultError::MetadataConflict(format!(
                        "entity type id {} is bound to a different definition than {}",
                        entity_type.id(),
                        entity_type
                    )));
                }
                Ok((Arc::clone(e.get()), true))
            }
            Entry::Vacant(e) => Ok((Arc::clone(e.insert(entity_type)), false)),
        }
    }

    fn compose(&self, def: &EntityTypeDef) -> Result<EntityType> {
        check_identifier(&def.name)?;
        let mut fields = BTreeMap::new();
        let mut enum_fields = BTreeMap::new();
        for parent_id in &def.extends {
            let parent = self.entity_type(*parent_id).ok_or_else(|| {
                EavaultError::UnknownMetadata(format!(
                    "entity type {} extends unregistered entity type {}",
                    def.id, parent_id
                ))
            })?;
            for (id, field) in &parent.fields {
                fields.insert(*id, Arc::clone(field));
            }
            for (id, enum_field) in &parent.enum_fields {
                enum_fields.insert(*id, Arc::clone(enum_field));
            }
        }
        for id in &def.fields {
            let field = self
                .field(*id)
                .ok_or_else(|| EavaultError::UnknownMetadata(format!("field {}", id)))?;
            if field.kind() == FieldKind::Enum {
                return Err(EavaultError::InvalidDefinition(format!(
                    "field {} is an enum field and must be listed as one",
                    id
                )));
            }
            fields.insert(*id, Arc::clone(field));
        }
        for id in &def.enum_fields {
            let enum_field = self
                .enum_field(*id)
                .ok_or_else(|| EavaultError::UnknownMetadata(format!("enum field {}", id)))?;
            enum_fields.insert(*id, Arc::clone(enum_field));
        }
        Ok(EntityType {
            id: def.id,
            name: def.name.clone(),
            extends: def.extends.clone(),
            fields,
            enum_fields,
        })
    }
}

// ------------- Registry -------------
/// The injectable metadata registry shared by save, load and filter.
#[derive(Debug, Default)]
pub struct Registry {
    writer: Mutex<()>,
    published: RwLock<Arc<Catalog>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot; later registrations are not visible in it.
    pub fn snapshot(&self) -> Result<Arc<Catalog>> {
        Ok(Arc::clone(&*self.published.read()?))
    }

    // Runs a registration against a private copy and only publishes it when
    // every step succeeded.
    fn write<T>(&self, change: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let _guard = self.writer.lock()?;
        let mut catalog = (*self.snapshot()?).clone();
        let result = change(&mut catalog)?;
        *self.published.write()? = Arc::new(catalog);
        Ok(result)
    }

    pub fn register_field(&self, id: FieldId, name: &str, kind: FieldKind) -> Result<Arc<Field>> {
        if kind == FieldKind::Enum {
            return Err(EavaultError::InvalidDefinition(format!(
                "enum field {} needs its literals, use register_enum_field",
                id
            )));
        }
        let field = Arc::new(Field::new(id, name, kind)?);
        self.write(|catalog| catalog.keep_field(field).map(|(kept, _)| kept))
    }

    pub fn register_enum_field(
        &self,
        id: FieldId,
        name: &str,
        literals: &[&str],
    ) -> Result<Arc<EnumField>> {
        let enum_field = Arc::new(EnumField::new(id, name, literals)?);
        self.write(|catalog| catalog.keep_enum_field(enum_field).map(|(kept, _)| kept))
    }

    pub fn register_entity_type(&self, def: EntityTypeDef) -> Result<Arc<EntityType>> {
        self.write(|catalog| {
            let entity_type = Arc::new(catalog.compose(&def)?);
            catalog
                .keep_entity_type(entity_type)
                .map(|(kept, _)| kept)
        })
    }

    /// Registers an already composed entity type, with all of its fields,
    /// unless it is known. Returns true when it was newly registered.
    pub fn ensure_entity_type(&self, entity_type: &Arc<EntityType>) -> Result<bool> {
        if let Some(known) = self.snapshot()?.entity_type(entity_type.id()) {
            if known == entity_type {
                return Ok(false);
            }
        }
        self.write(|catalog| {
            catalog
                .keep_entity_type(Arc::clone(entity_type))
                .map(|(_, previously_kept)| !previously_kept)
        })
    }

    pub fn lookup_field(&self, id: FieldId) -> Result<Arc<Field>> {
        self.snapshot()?
            .field(id)
            .cloned()
            .ok_or_else(|| EavaultError::UnknownMetadata(format!("field {}", id)))
    }

    pub fn lookup_enum_field(&self, id: FieldId) -> Result<Arc<EnumField>> {
        self.snapshot()?
            .enum_field(id)
            .cloned()
            .ok_or_else(|| EavaultError::UnknownMetadata(format!("enum field {}", id)))
    }

    pub fn lookup_entity_type(&self, id: EntityTypeId) -> Result<Arc<EntityType>> {
        self.snapshot()?
            .entity_type(id)
            .cloned()
            .ok_or_else(|| EavaultError::UnknownMetadata(format!("entity type {}", id)))
    }

    /// Constructs an empty instance of a registered entity type.
    pub fn instantiate(&self, id: EntityTypeId) -> Result<EntityInstance> {
        Ok(EntityInstance::new(self.lookup_entity_type(id)?))
    }
}
