//! The save pipeline.
//!
//! A call runs in two stages. First every entity type reachable from the
//! instances is made known to the registry; a conflict there aborts the call
//! before anything touches storage. Then the instances are written in
//! batches, and each batch goes through the phases in order:
//!
//! 1. overview rows (guid, type, created, modified)
//! 2. scalar values, grouped per kind, each followed by an audit row when
//!    auditing is on
//! 3. array values by position, with the tail beyond the current length
//!    trimmed
//! 4. enum selections, stored as literal indexes like an array
//! 5. single children: the child is saved first, then its binding
//! 6. child collections: bindings first, then all children as one batch
//!
//! Every write is an update followed by an insert when no row was affected.
//! Any failed statement aborts the call with the phase and key that broke.

use std::collections::{BTreeMap, HashSet};
use std::ops::AddAssign;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionProvider};
use crate::datatype::{ScalarKind, SqlValue, Value, format_timestamp};
use crate::error::{EavaultError, Phase, Result, SlotKey, StorageContext};
use crate::instance::EntityInstance;
use crate::interface::CancelToken;
use crate::named::NamedStatement;
use crate::registry::{EntityType, EntityTypeId, FieldId, FieldKind, IdHasher, Registry};
use crate::schema;

/// Row counts of one save call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub instances: usize,
    pub catalogue_rows: usize,
    pub overview_inserted: usize,
    pub overview_updated: usize,
    pub values_inserted: usize,
    pub values_updated: usize,
    pub values_trimmed: usize,
    pub audit_rows: usize,
    pub bindings_inserted: usize,
    pub bindings_updated: usize,
    pub bindings_removed: usize,
}

impl SaveReport {
    /// Rows that now exist and did not before.
    pub fn rows_added(&self) -> usize {
        self.overview_inserted + self.values_inserted + self.bindings_inserted
    }
}

impl AddAssign for SaveReport {
    fn add_assign(&mut self, other: Self) {
        self.instances += other.instances;
        self.catalogue_rows += other.catalogue_rows;
        self.overview_inserted += other.overview_inserted;
        self.overview_updated += other.overview_updated;
        self.values_inserted += other.values_inserted;
        self.values_updated += other.values_updated;
        self.values_trimmed += other.values_trimmed;
        self.audit_rows += other.audit_rows;
        self.bindings_inserted += other.bindings_inserted;
        self.bindings_updated += other.bindings_updated;
        self.bindings_removed += other.bindings_removed;
    }
}

// ------------- statements -------------
struct Upsert {
    update: NamedStatement,
    insert: NamedStatement,
}

impl Upsert {
    fn new(update: &str, insert: &str) -> Self {
        Self {
            update: NamedStatement::parse(update),
            insert: NamedStatement::parse(insert),
        }
    }

    /// Returns true when the row had to be inserted.
    fn run(&self, conn: &mut dyn Connection, pairs: &[(&str, SqlValue)]) -> Result<bool> {
        if self.update.execute(conn, pairs)? > 0 {
            return Ok(false);
        }
        self.insert.execute(conn, pairs)?;
        Ok(true)
    }
}

struct Sequence {
    upsert: Upsert,
    trim: NamedStatement,
}

impl Sequence {
    fn new(table: &str) -> Self {
        Self {
            upsert: Upsert::new(
                &format!(
                    "update {table} set value = :value \
                     where guid = :guid and field_id = :field_id and position = :position"
                ),
                &format!(
                    "insert into {table} (guid, field_id, position, value) \
                     values (:guid, :field_id, :position, :value)"
                ),
            ),
            trim: NamedStatement::parse(&format!(
                "delete from {table} where guid = :guid and field_id = :field_id and position >= :length"
            )),
        }
    }
}

struct Statements {
    entity_type: Upsert,
    field: Upsert,
    overview: Upsert,
    // indexed by `ScalarKind as usize`
    scalar: Vec<Upsert>,
    audit: Vec<NamedStatement>,
    array: Vec<Sequence>,
    selection: Sequence,
    single_binding: Upsert,
    collection_binding: Upsert,
    bound_children: NamedStatement,
    unbind: NamedStatement,
    unbind_all: NamedStatement,
}

impl Statements {
    fn new() -> Self {
        let scalar = ScalarKind::ALL
            .iter()
            .map(|kind| {
                let table = schema::scalar_table(*kind);
                Upsert::new(
                    &format!(
                        "update {table} set value = :value where guid = :guid and field_id = :field_id"
                    ),
                    &format!(
                        "insert into {table} (guid, field_id, value) values (:guid, :field_id, :value)"
                    ),
                )
            })
            .collect();
        let audit = ScalarKind::ALL
            .iter()
            .map(|kind| {
                NamedStatement::parse(&format!(
                    "insert into {} (guid, field_id, kind, {}, recorded) \
                     values (:guid, :field_id, :kind, :value, :recorded)",
                    schema::AUDIT,
                    schema::audit_column(*kind)
                ))
            })
            .collect();
        let array = ScalarKind::ALL
            .iter()
            .map(|kind| Sequence::new(&schema::array_table(*kind)))
            .collect();
        let binding_insert = format!(
            "insert into {} (parent_guid, field_id, child_guid, child_type_id, position) \
             values (:parent_guid, :field_id, :child_guid, :child_type_id, :position)",
            schema::BINDING
        );
        Self {
            entity_type: Upsert::new(
                &format!("update {} set name = :name where type_id = :type_id", schema::ENTITY_TYPE),
                &format!(
                    "insert into {} (type_id, name) values (:type_id, :name)",
                    schema::ENTITY_TYPE
                ),
            ),
            field: Upsert::new(
                &format!(
                    "update {} set name = :name, kind = :kind where field_id = :field_id",
                    schema::FIELD
                ),
                &format!(
                    "insert into {} (field_id, name, kind) values (:field_id, :name, :kind)",
                    schema::FIELD
                ),
            ),
            overview: Upsert::new(
                &format!(
                    "update {} set modified = :modified where guid = :guid and type_id = :type_id",
                    schema::OVERVIEW
                ),
                &format!(
                    "insert into {} (guid, type_id, created, modified) \
                     values (:guid, :type_id, :created, :modified)",
                    schema::OVERVIEW
                ),
            ),
            scalar,
            audit,
            array,
            selection: Sequence::new(schema::ENUM),
            single_binding: Upsert::new(
                &format!(
                    "update {} set child_guid = :child_guid, child_type_id = :child_type_id, \
                     position = :position where parent_guid = :parent_guid and field_id = :field_id",
                    schema::BINDING
                ),
                &binding_insert,
            ),
            collection_binding: Upsert::new(
                &format!(
                    "update {} set child_type_id = :child_type_id, position = :position \
                     where parent_guid = :parent_guid and field_id = :field_id \
                     and child_guid = :child_guid",
                    schema::BINDING
                ),
                &binding_insert,
            ),
            bound_children: NamedStatement::parse(&format!(
                "select child_guid from {} where parent_guid = :parent_guid and field_id = :field_id",
                schema::BINDING
            )),
            unbind: NamedStatement::parse(&format!(
                "delete from {} where parent_guid = :parent_guid and field_id = :field_id \
                 and child_guid = :child_guid",
                schema::BINDING
            )),
            unbind_all: NamedStatement::parse(&format!(
                "delete from {} where parent_guid = :parent_guid and field_id = :field_id",
                schema::BINDING
            )),
        }
    }
}

lazy_static! {
    static ref STATEMENTS: Statements = Statements::new();
}

fn guid_pairs(guid: &str, field_id: FieldId) -> [(&'static str, SqlValue); 2] {
    [("guid", SqlValue::from(guid)), ("field_id", SqlValue::from(field_id))]
}

// every entity type in the graph, nested ones included
fn collect_types(instances: &[EntityInstance], into: &mut BTreeMap<EntityTypeId, Arc<EntityType>>) {
    for instance in instances {
        into.entry(instance.type_id())
            .or_insert_with(|| Arc::clone(instance.entity_type()));
        for (_, child) in instance.child_slots() {
            collect_types(std::slice::from_ref(child), into);
        }
        for (_, children) in instance.collection_slots() {
            collect_types(children, into);
        }
    }
}

// ------------- engine -------------
/// Persists entity instances. One engine is meant to live as long as the
/// database it writes to, since it remembers which entity types already
/// have catalogue rows there.
pub struct SaveEngine {
    audit: bool,
    batch_size: usize,
    catalogued: Mutex<HashSet<EntityTypeId, IdHasher>>,
}

impl SaveEngine {
    pub fn new(audit: bool, batch_size: usize) -> Self {
        Self {
            audit,
            batch_size: batch_size.max(1),
            catalogued: Mutex::new(HashSet::default()),
        }
    }

    pub fn audit_enabled(&self) -> bool {
        self.audit
    }

    pub fn save(
        &self,
        registry: &Registry,
        provider: &dyn ConnectionProvider,
        instances: &[EntityInstance],
        cancel: &CancelToken,
    ) -> Result<SaveReport> {
        let started = Instant::now();
        let mut types = BTreeMap::new();
        collect_types(instances, &mut types);
        let mut registered = 0;
        for entity_type in types.values() {
            if registry.ensure_entity_type(entity_type)? {
                registered += 1;
            }
        }
        debug!(types = types.len(), registered, "entity types checked");
        cancel.check()?;

        let mut conn = provider.acquire()?;
        let mut report = SaveReport::default();
        self.write_catalogue(conn.as_mut(), types.values(), &mut report)?;
        let batch = provider.dialect().clamp(self.batch_size);
        let all: Vec<&EntityInstance> = instances.iter().collect();
        self.save_all(conn.as_mut(), &all, batch, &mut report, cancel)?;
        info!(
            ms = started.elapsed().as_secs_f64() * 1000.0,
            instances = report.instances,
            added = report.rows_added(),
            audit_rows = report.audit_rows,
            "save complete"
        );
        Ok(report)
    }

    fn write_catalogue<'t>(
        &self,
        conn: &mut dyn Connection,
        types: impl Iterator<Item = &'t Arc<EntityType>>,
        report: &mut SaveReport,
    ) -> Result<()> {
        let mut catalogued = self.catalogued.lock()?;
        for entity_type in types {
            if catalogued.contains(&entity_type.id()) {
                continue;
            }
            let fields = entity_type
                .fields()
                .chain(entity_type.enum_fields().map(|e| e.field()));
            for field in fields {
                STATEMENTS
                    .field
                    .run(
                        conn,
                        &[
                            ("field_id", SqlValue::from(field.id())),
                            ("name", SqlValue::from(field.name())),
                            ("kind", SqlValue::from(field.kind().code())),
                        ],
                    )
                    .context(Phase::Catalogue, format_args!("field {}", field.id()))?;
                report.catalogue_rows += 1;
            }
            STATEMENTS
                .entity_type
                .run(
                    conn,
                    &[
                        ("type_id", SqlValue::from(entity_type.id())),
                        ("name", SqlValue::from(entity_type.name())),
                    ],
                )
                .context(Phase::Catalogue, format_args!("entity type {}", entity_type.id()))?;
            report.catalogue_rows += 1;
            catalogued.insert(entity_type.id());
        }
        Ok(())
    }

    fn save_all(
        &self,
        conn: &mut dyn Connection,
        instances: &[&EntityInstance],
        batch: usize,
        report: &mut SaveReport,
        cancel: &CancelToken,
    ) -> Result<()> {
        for chunk in instances.chunks(batch) {
            cancel.check()?;
            self.save_batch(conn, chunk, batch, report, cancel)?;
        }
        Ok(())
    }

    fn save_batch(
        &self,
        conn: &mut dyn Connection,
        chunk: &[&EntityInstance],
        batch: usize,
        report: &mut SaveReport,
        cancel: &CancelToken,
    ) -> Result<()> {
        let now = Utc::now();
        self.write_overview(conn, chunk, now, report)?;
        self.write_scalars(conn, chunk, now, report)?;
        self.write_arrays(conn, chunk, report)?;
        self.write_selections(conn, chunk, report)?;
        self.write_single_children(conn, chunk, batch, report, cancel)?;
        self.write_collections(conn, chunk, batch, report, cancel)?;
        report.instances += chunk.len();
        Ok(())
    }

    fn write_overview(
        &self,
        conn: &mut dyn Connection,
        chunk: &[&EntityInstance],
        now: DateTime<Utc>,
        report: &mut SaveReport,
    ) -> Result<()> {
        let modified = format_timestamp(now);
        for instance in chunk {
            let pairs = [
                ("guid", SqlValue::from(instance.guid())),
                ("type_id", SqlValue::from(instance.type_id())),
                ("created", SqlValue::from(format_timestamp(instance.created()))),
                ("modified", SqlValue::from(modified.as_str())),
            ];
            let inserted = STATEMENTS
                .overview
                .run(conn, &pairs)
                .context(Phase::Overview, instance.guid())?;
            if inserted {
                report.overview_inserted += 1;
            } else {
                report.overview_updated += 1;
            }
        }
        debug!(rows = chunk.len(), "overview written");
        Ok(())
    }

    fn write_scalars(
        &self,
        conn: &mut dyn Connection,
        chunk: &[&EntityInstance],
        now: DateTime<Utc>,
        report: &mut SaveReport,
    ) -> Result<()> {
        let mut by_kind: BTreeMap<ScalarKind, Vec<(&str, FieldId, &Value)>> = BTreeMap::new();
        for instance in chunk {
            for (field_id, value) in instance.scalars() {
                by_kind
                    .entry(value.kind())
                    .or_default()
                    .push((instance.guid(), field_id, value));
            }
        }
        let recorded = format_timestamp(now);
        for (kind, triples) in by_kind {
            let upsert = &STATEMENTS.scalar[kind as usize];
            for (guid, field_id, value) in &triples {
                let [guid_pair, field_pair] = guid_pairs(guid, *field_id);
                let pairs = [
                    guid_pair,
                    field_pair,
                    ("value", SqlValue::from(*value)),
                    ("kind", SqlValue::from(kind.name())),
                    ("recorded", SqlValue::from(recorded.as_str())),
                ];
                let inserted = upsert
                    .run(conn, &pairs)
                    .context(Phase::Scalar(kind), SlotKey(guid, *field_id))?;
                if inserted {
                    report.values_inserted += 1;
                } else {
                    report.values_updated += 1;
                }
                if self.audit {
                    STATEMENTS.audit[kind as usize]
                        .execute(conn, &pairs)
                        .context(Phase::Audit, SlotKey(guid, *field_id))?;
                    report.audit_rows += 1;
                }
            }
            debug!(%kind, rows = triples.len(), "scalars written");
        }
        Ok(())
    }

    // Writes positions 0..n and removes whatever was stored past n.
    fn write_sequence(
        &self,
        conn: &mut dyn Connection,
        statements: &Sequence,
        phase: Phase,
        guid: &str,
        field_id: FieldId,
        values: &[SqlValue],
        report: &mut SaveReport,
    ) -> Result<()> {
        for (position, value) in values.iter().enumerate() {
            let [guid_pair, field_pair] = guid_pairs(guid, field_id);
            let pairs = [
                guid_pair,
                field_pair,
                ("position", SqlValue::from(position)),
                ("value", value.clone()),
            ];
            let inserted = statements
                .upsert
                .run(conn, &pairs)
                .context(phase, SlotKey(guid, field_id))?;
            if inserted {
                report.values_inserted += 1;
            } else {
                report.values_updated += 1;
            }
        }
        let [guid_pair, field_pair] = guid_pairs(guid, field_id);
        report.values_trimmed += statements
            .trim
            .execute(conn, &[guid_pair, field_pair, ("length", SqlValue::from(values.len()))])
            .context(phase, SlotKey(guid, field_id))?;
        Ok(())
    }

    fn write_arrays(
        &self,
        conn: &mut dyn Connection,
        chunk: &[&EntityInstance],
        report: &mut SaveReport,
    ) -> Result<()> {
        let mut by_kind: BTreeMap<ScalarKind, Vec<(&str, FieldId, &[Value])>> = BTreeMap::new();
        for instance in chunk {
            for (field_id, values) in instance.arrays() {
                if let Some(FieldKind::Array(kind)) =
                    instance.entity_type().field(field_id).map(|f| f.kind())
                {
                    by_kind
                        .entry(kind)
                        .or_default()
                        .push((instance.guid(), field_id, values));
                }
            }
        }
        for (kind, sequences) in by_kind {
            let statements = &STATEMENTS.array[kind as usize];
            for (guid, field_id, values) in &sequences {
                let values: Vec<SqlValue> = values.iter().map(SqlValue::from).collect();
                self.write_sequence(conn, statements, Phase::Array(kind), guid, *field_id, &values, report)?;
            }
            debug!(%kind, sequences = sequences.len(), "arrays written");
        }
        Ok(())
    }

    fn write_selections(
        &self,
        conn: &mut dyn Connection,
        chunk: &[&EntityInstance],
        report: &mut SaveReport,
    ) -> Result<()> {
        let mut written = 0;
        for instance in chunk {
            for (field_id, literals) in instance.selections() {
                let enum_field = instance.entity_type().enum_field(field_id).ok_or_else(|| {
                    EavaultError::UnknownField {
                        field: field_id,
                        entity_type: instance.entity_type().name().to_owned(),
                    }
                })?;
                let indexes = literals
                    .iter()
                    .map(|literal| {
                        enum_field
                            .index_of(literal)
                            .map(SqlValue::from)
                            .ok_or_else(|| EavaultError::UnknownLiteral {
                                field: field_id,
                                literal: literal.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.write_sequence(
                    conn,
                    &STATEMENTS.selection,
                    Phase::Enum,
                    instance.guid(),
                    field_id,
                    &indexes,
                    report,
                )?;
                written += 1;
            }
        }
        debug!(sequences = written, "enum selections written");
        Ok(())
    }

    fn write_single_children(
        &self,
        conn: &mut dyn Connection,
        chunk: &[&EntityInstance],
        batch: usize,
        report: &mut SaveReport,
        cancel: &CancelToken,
    ) -> Result<()> {
        for instance in chunk {
            let declared = instance
                .entity_type()
                .fields()
                .filter(|f| f.kind() == FieldKind::Child);
            for field in declared {
                let field_id = field.id();
                let Some(child) = instance.child(field_id) else {
                    report.bindings_removed += STATEMENTS
                        .unbind_all
                        .execute(
                            conn,
                            &[
                                ("parent_guid", SqlValue::from(instance.guid())),
                                ("field_id", SqlValue::from(field_id)),
                            ],
                        )
                        .context(Phase::SingleChild, SlotKey(instance.guid(), field_id))?;
                    continue;
                };
                self.save_all(conn, &[child], batch, report, cancel)?;
                let pairs = [
                    ("parent_guid", SqlValue::from(instance.guid())),
                    ("field_id", SqlValue::from(field_id)),
                    ("child_guid", SqlValue::from(child.guid())),
                    ("child_type_id", SqlValue::from(child.type_id())),
                    ("position", SqlValue::from(0usize)),
                ];
                let inserted = STATEMENTS
                    .single_binding
                    .run(conn, &pairs)
                    .context(Phase::SingleChild, SlotKey(instance.guid(), field_id))?;
                if inserted {
                    report.bindings_inserted += 1;
                } else {
                    report.bindings_updated += 1;
                }
            }
        }
        Ok(())
    }

    fn write_collections(
        &self,
        conn: &mut dyn Connection,
        chunk: &[&EntityInstance],
        batch: usize,
        report: &mut SaveReport,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut collected: Vec<&EntityInstance> = Vec::new();
        let mut seen: HashSet<&str, IdHasher> = HashSet::default();
        for instance in chunk {
            for (field_id, children) in instance.collection_slots() {
                let key = SlotKey(instance.guid(), field_id);
                let mut kept: HashSet<&str, IdHasher> = HashSet::default();
                for (position, child) in children.iter().enumerate() {
                    // a repeated child keeps its first position
                    if !kept.insert(child.guid()) {
                        continue;
                    }
                    let pairs = [
                        ("parent_guid", SqlValue::from(instance.guid())),
                        ("field_id", SqlValue::from(field_id)),
                        ("child_guid", SqlValue::from(child.guid())),
                        ("child_type_id", SqlValue::from(child.type_id())),
                        ("position", SqlValue::from(position)),
                    ];
                    let inserted = STATEMENTS
                        .collection_binding
                        .run(conn, &pairs)
                        .context(Phase::ChildCollection, &key)?;
                    if inserted {
                        report.bindings_inserted += 1;
                    } else {
                        report.bindings_updated += 1;
                    }
                    if seen.insert(child.guid()) {
                        collected.push(child);
                    }
                }
                let parent = [
                    ("parent_guid", SqlValue::from(instance.guid())),
                    ("field_id", SqlValue::from(field_id)),
                ];
                let bound = STATEMENTS
                    .bound_children
                    .query(conn, &parent)
                    .context(Phase::ChildCollection, &key)?;
                for row in bound {
                    let child_guid = row.text(0)?;
                    if kept.contains(child_guid) {
                        continue;
                    }
                    let [parent_pair, field_pair] = parent.clone();
                    report.bindings_removed += STATEMENTS
                        .unbind
                        .execute(
                            conn,
                            &[parent_pair, field_pair, ("child_guid", SqlValue::from(child_guid))],
                        )
                        .context(Phase::ChildCollection, &key)?;
                }
            }
        }
        if !collected.is_empty() {
            debug!(children = collected.len(), "saving child collections");
            self.save_all(conn, &collected, batch, report, cancel)?;
        }
        Ok(())
    }
}

/// Saves the instances in one call with a throwaway engine.
pub fn save(
    provider: &dyn ConnectionProvider,
    registry: &Registry,
    audit_enabled: bool,
    batch_size_hint: usize,
    instances: &[EntityInstance],
) -> Result<SaveReport> {
    SaveEngine::new(audit_enabled, batch_size_hint).save(
        registry,
        provider,
        instances,
        &CancelToken::new(),
    )
}
