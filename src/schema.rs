//! EAV table layout and its one-time creation.
//!
//! Tables:
//! - eav_entity_type(type_id, name)
//! - eav_field(field_id, name, kind)
//! - eav_overview(guid, type_id, created, modified)
//! - eav_<kind>(guid, field_id, value), one per scalar kind
//! - eav_<kind>_array(guid, field_id, position, value), one per scalar kind
//! - eav_enum(guid, field_id, position, value)
//! - eav_binding(parent_guid, field_id, child_guid, child_type_id, position)
//! - eav_audit(audit_id, guid, field_id, kind, text_value, integer_value, real_value, blob_value, recorded)

use tracing::debug;

use crate::connection::{Connection, Dialect};
use crate::datatype::{ScalarKind, StorageClass};
use crate::error::Result;

pub const ENTITY_TYPE: &str = "eav_entity_type";
pub const FIELD: &str = "eav_field";
pub const OVERVIEW: &str = "eav_overview";
pub const ENUM: &str = "eav_enum";
pub const BINDING: &str = "eav_binding";
pub const AUDIT: &str = "eav_audit";

pub fn scalar_table(kind: ScalarKind) -> String {
    format!("eav_{}", kind.name())
}

pub fn array_table(kind: ScalarKind) -> String {
    format!("eav_{}_array", kind.name())
}

/// The audit column a value of this kind is written to.
pub fn audit_column(kind: ScalarKind) -> &'static str {
    match kind.storage_class() {
        StorageClass::Text => "text_value",
        StorageClass::Integer => "integer_value",
        StorageClass::Real => "real_value",
        StorageClass::Blob => "blob_value",
    }
}

/// Every table the engine writes to, in creation order.
pub fn table_names() -> Vec<String> {
    let mut names = vec![
        ENTITY_TYPE.to_string(),
        FIELD.to_string(),
        OVERVIEW.to_string(),
    ];
    names.extend(ScalarKind::ALL.iter().map(|k| scalar_table(*k)));
    names.extend(ScalarKind::ALL.iter().map(|k| array_table(*k)));
    names.extend([ENUM.to_string(), BINDING.to_string(), AUDIT.to_string()]);
    names
}

fn column_type(dialect: Dialect, class: StorageClass) -> &'static str {
    match (dialect, class) {
        (Dialect::Sqlite, StorageClass::Text) => "text",
        (Dialect::Sqlite, StorageClass::Integer) => "integer",
        (Dialect::Sqlite, StorageClass::Real) => "real",
        (Dialect::Sqlite, StorageClass::Blob) => "blob",
        (Dialect::Mysql, StorageClass::Text) => "longtext",
        (Dialect::Mysql, StorageClass::Integer) => "bigint",
        (Dialect::Mysql, StorageClass::Real) => "double",
        (Dialect::Mysql, StorageClass::Blob) => "longblob",
        (Dialect::Postgres, StorageClass::Text) => "text",
        (Dialect::Postgres, StorageClass::Integer) => "bigint",
        (Dialect::Postgres, StorageClass::Real) => "double precision",
        (Dialect::Postgres, StorageClass::Blob) => "bytea",
        (Dialect::Tsql, StorageClass::Text) => "nvarchar(max)",
        (Dialect::Tsql, StorageClass::Integer) => "bigint",
        (Dialect::Tsql, StorageClass::Real) => "float(53)",
        (Dialect::Tsql, StorageClass::Blob) => "varbinary(max)",
        (Dialect::Oracle, StorageClass::Text) => "nclob",
        (Dialect::Oracle, StorageClass::Integer) => "number(19)",
        (Dialect::Oracle, StorageClass::Real) => "binary_double",
        (Dialect::Oracle, StorageClass::Blob) => "blob",
    }
}

fn key_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Oracle => "varchar2(64)",
        _ => "varchar(64)",
    }
}

// short text such as names and timestamps
fn label_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Oracle => "varchar2(255)",
        Dialect::Tsql => "nvarchar(255)",
        _ => "varchar(255)",
    }
}

fn identity_column(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "audit_id integer primary key autoincrement",
        Dialect::Mysql => "audit_id bigint auto_increment primary key",
        Dialect::Postgres => "audit_id bigserial primary key",
        Dialect::Tsql => "audit_id bigint identity(1,1) primary key",
        Dialect::Oracle => "audit_id number(19) generated always as identity primary key",
    }
}

fn create_table(dialect: Dialect, name: &str, body: &str) -> String {
    if dialect.supports_if_not_exists() {
        format!("create table if not exists {} ({})", name, body)
    } else {
        format!("create table {} ({})", name, body)
    }
}

/// The DDL for every EAV table in the given dialect.
pub fn statements(dialect: Dialect) -> Vec<String> {
    let key = key_type(dialect);
    let label = label_type(dialect);
    let id = column_type(dialect, StorageClass::Integer);
    let mut ddl = vec![
        create_table(
            dialect,
            ENTITY_TYPE,
            &format!(
                "type_id {id} not null, name {label} not null, \
                 constraint pk_{ENTITY_TYPE} primary key (type_id)"
            ),
        ),
        create_table(
            dialect,
            FIELD,
            &format!(
                "field_id {id} not null, name {label} not null, kind {label} not null, \
                 constraint pk_{FIELD} primary key (field_id)"
            ),
        ),
        create_table(
            dialect,
            OVERVIEW,
            &format!(
                "guid {key} not null, type_id {id} not null, \
                 created {label} not null, modified {label} not null, \
                 constraint pk_{OVERVIEW} primary key (guid)"
            ),
        ),
    ];
    for kind in ScalarKind::ALL {
        let value = column_type(dialect, kind.storage_class());
        let table = scalar_table(kind);
        ddl.push(create_table(
            dialect,
            &table,
            &format!(
                "guid {key} not null, field_id {id} not null, value {value} null, \
                 constraint pk_{table} primary key (guid, field_id)"
            ),
        ));
    }
    for kind in ScalarKind::ALL {
        let value = column_type(dialect, kind.storage_class());
        let table = array_table(kind);
        ddl.push(create_table(
            dialect,
            &table,
            &format!(
                "guid {key} not null, field_id {id} not null, position {id} not null, \
                 value {value} null, \
                 constraint pk_{table} primary key (guid, field_id, position)"
            ),
        ));
    }
    ddl.push(create_table(
        dialect,
        ENUM,
        &format!(
            "guid {key} not null, field_id {id} not null, position {id} not null, \
             value {id} not null, \
             constraint pk_{ENUM} primary key (guid, field_id, position)"
        ),
    ));
    ddl.push(create_table(
        dialect,
        BINDING,
        &format!(
            "parent_guid {key} not null, field_id {id} not null, child_guid {key} not null, \
             child_type_id {id} not null, position {id} not null, \
             constraint pk_{BINDING} primary key (parent_guid, field_id, child_guid)"
        ),
    ));
    ddl.push(create_table(
        dialect,
        AUDIT,
        &format!(
            "{identity}, guid {key} not null, field_id {id} not null, kind {label} not null, \
             text_value {text} null, integer_value {id} null, real_value {real} null, \
             blob_value {blob} null, recorded {label} not null",
            identity = identity_column(dialect),
            text = column_type(dialect, StorageClass::Text),
            real = column_type(dialect, StorageClass::Real),
            blob = column_type(dialect, StorageClass::Blob),
        ),
    ));
    if matches!(dialect, Dialect::Sqlite | Dialect::Postgres) {
        ddl.push(format!(
            "create index if not exists ix_{OVERVIEW}_type on {OVERVIEW} (type_id)"
        ));
        ddl.push(format!(
            "create index if not exists ix_{AUDIT}_key on {AUDIT} (guid, field_id)"
        ));
    } else {
        ddl.push(format!("create index ix_{OVERVIEW}_type on {OVERVIEW} (type_id)"));
        ddl.push(format!("create index ix_{AUDIT}_key on {AUDIT} (guid, field_id)"));
    }
    ddl
}

/// Creates the EAV tables. Meant to run once per database; dialects without
/// `if not exists` fail when the tables are already there.
pub fn bootstrap(conn: &mut dyn Connection, dialect: Dialect) -> Result<()> {
    let ddl = statements(dialect);
    for statement in &ddl {
        conn.execute_batch(statement)?;
    }
    debug!(statements = ddl.len(), ?dialect, "schema bootstrapped");
    Ok(())
}
