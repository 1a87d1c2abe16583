//! The load pipeline.
//!
//! Guids are resolved (given, or every guid saved under the entity type),
//! split into chunks that fit the dialect's IN-list limit, and each chunk is
//! read with one query per table: overview, every declared scalar kind,
//! every declared array kind, enum selections and bindings. Children found
//! in the bindings are loaded by a recursive call per child entity type and
//! attached by the field id stored with the binding.
//!
//! A chunk holds its connection only while it reads its own rows, so the
//! recursive calls can acquire one again from a single-connection provider.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use lazy_static::lazy_static;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionProvider, Row};
use crate::datatype::{ScalarKind, SqlValue, Value, parse_timestamp};
use crate::error::{EavaultError, Phase, Result, StorageContext};
use crate::instance::EntityInstance;
use crate::interface::CancelToken;
use crate::named::NamedStatement;
use crate::registry::{EntityType, EntityTypeId, FieldId, FieldKind, IdHasher, Registry};
use crate::schema;

/// Nesting limit used when none is configured.
pub const DEFAULT_MAX_DEPTH: usize = 32;

lazy_static! {
    static ref RESOLVE: NamedStatement = NamedStatement::parse(&format!(
        "select guid from {} where type_id = :type_id order by created, guid",
        schema::OVERVIEW
    ));
}

fn markers(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn guid_params(guids: &[String]) -> Vec<SqlValue> {
    guids.iter().map(|g| SqlValue::from(g.as_str())).collect()
}

/// Keeps the first occurrence of every guid.
fn dedup(guids: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str, IdHasher> = HashSet::default();
    guids
        .iter()
        .filter(|g| seen.insert(g.as_str()))
        .cloned()
        .collect()
}

struct Binding {
    parent: usize,
    field_id: FieldId,
    child_guid: String,
    child_type_id: EntityTypeId,
}

/// One chunk of instances under construction.
struct Chunk<'g> {
    guids: &'g [String],
    instances: Vec<EntityInstance>,
    index: HashMap<&'g str, usize, IdHasher>,
}

impl<'g> Chunk<'g> {
    fn new(entity_type: &Arc<EntityType>, guids: &'g [String]) -> Self {
        let instances = guids
            .iter()
            .map(|g| EntityInstance::with_guid(Arc::clone(entity_type), g.as_str()))
            .collect();
        let index = guids
            .iter()
            .enumerate()
            .map(|(i, g)| (g.as_str(), i))
            .collect();
        Self {
            guids,
            instances,
            index,
        }
    }

    fn query(&self, conn: &mut dyn Connection, select: &str, table: &str, tail: &str) -> Result<Vec<Row>> {
        let sql = format!(
            "select {} from {} where {} in ({}){}",
            select,
            table,
            if table == schema::BINDING { "parent_guid" } else { "guid" },
            markers(self.guids.len()),
            tail
        );
        conn.query(&sql, &guid_params(self.guids))
    }

    fn key(&self) -> String {
        match self.guids.first() {
            Some(first) => format!("chunk of {} starting at {}", self.guids.len(), first),
            None => "empty chunk".to_string(),
        }
    }

    // Finds the instance a row belongs to; stray guids are logged and skipped.
    fn owner(&self, guid: &str, table: &str) -> Option<usize> {
        let found = self.index.get(guid).copied();
        if found.is_none() {
            warn!(guid, table, "row for a guid outside the chunk ignored");
        }
        found
    }

    fn read_overview(&mut self, conn: &mut dyn Connection) -> Result<()> {
        let rows = self
            .query(conn, "guid, created, modified", schema::OVERVIEW, "")
            .context(Phase::LoadOverview, self.key())?;
        for row in rows {
            let Some(at) = self.owner(row.text(0)?, schema::OVERVIEW) else {
                continue;
            };
            let instance = &mut self.instances[at];
            instance.set_created(parse_timestamp(row.text(1)?)?);
            instance.set_modified(parse_timestamp(row.text(2)?)?);
        }
        Ok(())
    }

    fn read_scalars(&mut self, conn: &mut dyn Connection, kind: ScalarKind) -> Result<()> {
        let table = schema::scalar_table(kind);
        let rows = self
            .query(conn, "guid, field_id, value", &table, "")
            .context(Phase::LoadScalar(kind), self.key())?;
        let mut set = 0;
        for row in rows {
            let Some(at) = self.owner(row.text(0)?, &table) else {
                continue;
            };
            let field_id = row.id(1)?;
            let instance = &mut self.instances[at];
            match instance.entity_type().field(field_id).map(|f| f.kind()) {
                Some(FieldKind::Scalar(declared)) if declared == kind => {
                    instance.set_value(field_id, Value::from_sql_value(kind, row.get(2)?)?)?;
                    set += 1;
                }
                _ => warn!(field_id, table = %table, "value for an undeclared field ignored"),
            }
        }
        debug!(%kind, rows = set, "scalars loaded");
        Ok(())
    }

    fn read_arrays(&mut self, conn: &mut dyn Connection, kind: ScalarKind) -> Result<()> {
        let table = schema::array_table(kind);
        let rows = self
            .query(conn, "guid, field_id, position, value", &table, "")
            .context(Phase::LoadArray(kind), self.key())?;
        let mut sequences: BTreeMap<(usize, FieldId), Vec<(usize, Value)>> = BTreeMap::new();
        for row in rows {
            let Some(at) = self.owner(row.text(0)?, &table) else {
                continue;
            };
            let field_id = row.id(1)?;
            match self.instances[at].entity_type().field(field_id).map(|f| f.kind()) {
                Some(FieldKind::Array(declared)) if declared == kind => {
                    let value = Value::from_sql_value(kind, row.get(3)?)?;
                    sequences
                        .entry((at, field_id))
                        .or_default()
                        .push((row.position(2)?, value));
                }
                _ => warn!(field_id, table = %table, "array value for an undeclared field ignored"),
            }
        }
        for ((at, field_id), mut values) in sequences {
            values.sort_by_key(|(position, _)| *position);
            self.instances[at]
                .set_array_values(field_id, values.into_iter().map(|(_, v)| v).collect())?;
        }
        Ok(())
    }

    fn read_selections(&mut self, conn: &mut dyn Connection) -> Result<()> {
        let rows = self
            .query(conn, "guid, field_id, position, value", schema::ENUM, "")
            .context(Phase::LoadEnum, self.key())?;
        let mut selections: BTreeMap<(usize, FieldId), Vec<(usize, String)>> = BTreeMap::new();
        for row in rows {
            let Some(at) = self.owner(row.text(0)?, schema::ENUM) else {
                continue;
            };
            let field_id = row.id(1)?;
            let Some(enum_field) = self.instances[at].entity_type().enum_field(field_id) else {
                warn!(field_id, "selection for an undeclared enum field ignored");
                continue;
            };
            let index = row.position(3)?;
            match enum_field.literal_at(index) {
                Some(literal) => selections
                    .entry((at, field_id))
                    .or_default()
                    .push((row.position(2)?, literal.to_owned())),
                None => warn!(field_id, index, "enum index out of range ignored"),
            }
        }
        for ((at, field_id), mut literals) in selections {
            literals.sort_by_key(|(position, _)| *position);
            let literals: Vec<&str> = literals.iter().map(|(_, l)| l.as_str()).collect();
            self.instances[at].set_selection(field_id, &literals)?;
        }
        Ok(())
    }

    fn read_bindings(&self, conn: &mut dyn Connection) -> Result<Vec<Binding>> {
        let rows = self
            .query(
                conn,
                "parent_guid, field_id, child_guid, child_type_id, position",
                schema::BINDING,
                " order by position",
            )
            .context(Phase::LoadBinding, self.key())?;
        let mut bindings = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(parent) = self.owner(row.text(0)?, schema::BINDING) else {
                continue;
            };
            let field_id = row.id(1)?;
            match self.instances[parent].entity_type().field(field_id).map(|f| f.kind()) {
                Some(FieldKind::Child | FieldKind::Children) => bindings.push(Binding {
                    parent,
                    field_id,
                    child_guid: row.text(2)?.to_owned(),
                    child_type_id: row.id(3)?,
                }),
                _ => warn!(field_id, "binding for an undeclared field ignored"),
            }
        }
        Ok(bindings)
    }
}

// ------------- engine -------------
/// Reconstructs entity instances from storage.
#[derive(Debug, Clone)]
pub struct LoadEngine {
    chunk_size: usize,
    workers: usize,
    max_depth: usize,
}

impl LoadEngine {
    pub fn new(chunk_size: usize, workers: usize, max_depth: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            workers: workers.max(1),
            max_depth,
        }
    }

    /// Loads instances of one entity type, either the given guids (in the
    /// given order, duplicates dropped) or every one saved under the type.
    pub fn load(
        &self,
        registry: &Registry,
        provider: &dyn ConnectionProvider,
        type_id: EntityTypeId,
        guids: Option<&[String]>,
        cancel: &CancelToken,
    ) -> Result<Vec<EntityInstance>> {
        let started = Instant::now();
        let entity_type = registry.lookup_entity_type(type_id)?;
        let loaded = self.load_at(registry, provider, &entity_type, guids, 0, cancel)?;
        info!(
            ms = started.elapsed().as_secs_f64() * 1000.0,
            entity_type = %entity_type,
            instances = loaded.len(),
            "load complete"
        );
        Ok(loaded)
    }

    /// Every guid saved under the entity type, oldest first.
    pub fn resolve(&self, provider: &dyn ConnectionProvider, type_id: EntityTypeId) -> Result<Vec<String>> {
        let mut conn = provider.acquire()?;
        let rows = RESOLVE
            .query(conn.as_mut(), &[("type_id", SqlValue::from(type_id))])
            .context(Phase::Resolve, type_id)?;
        rows.iter().map(|row| row.text(0).map(str::to_owned)).collect()
    }

    fn load_at(
        &self,
        registry: &Registry,
        provider: &dyn ConnectionProvider,
        entity_type: &Arc<EntityType>,
        guids: Option<&[String]>,
        depth: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<EntityInstance>> {
        if depth > self.max_depth {
            return Err(EavaultError::DepthExceeded(self.max_depth));
        }
        let guids = match guids {
            Some(given) => dedup(given),
            None => self.resolve(provider, entity_type.id())?,
        };
        let size = provider.dialect().clamp(self.chunk_size);
        let chunks: Vec<&[String]> = guids.chunks(size).collect();
        debug!(entity_type = %entity_type, guids = guids.len(), chunks = chunks.len(), depth, "loading");

        let mut loaded = Vec::with_capacity(guids.len());
        // children load on the calling worker
        if self.workers == 1 || chunks.len() == 1 || depth > 0 {
            for chunk in chunks {
                cancel.check()?;
                loaded.extend(self.load_chunk(registry, provider, entity_type, chunk, depth, cancel)?);
            }
            return Ok(loaded);
        }
        // a wave of chunks at a time, joined in order
        for wave in chunks.chunks(self.workers) {
            cancel.check()?;
            let results: Vec<Result<Vec<EntityInstance>>> = std::thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .iter()
                    .map(|chunk| {
                        scope.spawn(move || {
                            self.load_chunk(registry, provider, entity_type, chunk, depth, cancel)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| {
                            Err(EavaultError::Backend("load worker panicked".to_string()))
                        })
                    })
                    .collect()
            });
            for result in results {
                loaded.extend(result?);
            }
        }
        Ok(loaded)
    }

    fn load_chunk(
        &self,
        registry: &Registry,
        provider: &dyn ConnectionProvider,
        entity_type: &Arc<EntityType>,
        guids: &[String],
        depth: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<EntityInstance>> {
        let mut chunk = Chunk::new(entity_type, guids);
        let bindings = {
            let mut conn = provider.acquire()?;
            let conn = conn.as_mut();
            chunk.read_overview(conn)?;
            for kind in entity_type.scalar_kinds() {
                chunk.read_scalars(conn, kind)?;
            }
            for kind in entity_type.array_kinds() {
                chunk.read_arrays(conn, kind)?;
            }
            if entity_type.enum_fields().next().is_some() {
                chunk.read_selections(conn)?;
            }
            if entity_type.has_children() {
                chunk.read_bindings(conn)?
            } else {
                Vec::new()
            }
        };
        if !bindings.is_empty() {
            self.attach_children(registry, provider, &mut chunk.instances, bindings, depth, cancel)?;
        }
        debug!(entity_type = %entity_type, instances = chunk.instances.len(), "chunk loaded");
        Ok(chunk.instances)
    }

    fn attach_children(
        &self,
        registry: &Registry,
        provider: &dyn ConnectionProvider,
        instances: &mut [EntityInstance],
        bindings: Vec<Binding>,
        depth: usize,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut by_type: BTreeMap<EntityTypeId, Vec<String>> = BTreeMap::new();
        for binding in &bindings {
            by_type
                .entry(binding.child_type_id)
                .or_default()
                .push(binding.child_guid.clone());
        }
        let mut loaded: HashMap<String, EntityInstance, IdHasher> = HashMap::default();
        for (type_id, guids) in by_type {
            let child_type = registry.lookup_entity_type(type_id)?;
            let children =
                self.load_at(registry, provider, &child_type, Some(&guids), depth + 1, cancel)?;
            loaded.extend(children.into_iter().map(|c| (c.guid().to_owned(), c)));
        }
        for binding in bindings {
            let Some(child) = loaded.get(&binding.child_guid) else {
                continue;
            };
            let parent = &mut instances[binding.parent];
            match parent.entity_type().field(binding.field_id).map(|f| f.kind()) {
                Some(FieldKind::Child) => parent.set_child(binding.field_id, child.clone())?,
                _ => parent.add_child(binding.field_id, child.clone())?,
            }
        }
        Ok(())
    }
}

/// Loads instances in one call with a sequential engine.
pub fn load(
    provider: &dyn ConnectionProvider,
    registry: &Registry,
    type_id: EntityTypeId,
    explicit_guids: Option<&[String]>,
    chunk_size: usize,
) -> Result<Vec<EntityInstance>> {
    LoadEngine::new(chunk_size, 1, DEFAULT_MAX_DEPTH).load(registry, provider, type_id, explicit_guids, &CancelToken::new())
}
