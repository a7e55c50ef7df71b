use super::BASE_DB_VERSION;
use anyhow::{bail, Result};
use rusqlite::{params, types::Type, Connection};

/// Current time in epoch milliseconds, as stored in every timestamp column.
pub const DEFAULT_TIMESTAMP_MS: &str = "(cast((julianday('now') - 2440587.5) * 86400000 as int))";

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = $crate::sqlite_persistence::Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                is_autoincrement: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Cascade,
}

impl ForeignKeyOnChange {
    fn sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    /// Only meaningful on an INTEGER primary key.
    pub is_autoincrement: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
    pub foreign_key: Option<&'a ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    /// (index name, comma-separated column list)
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut create_sql = format!("CREATE TABLE {} (", self.name);
        for (column_index, column) in self.columns.iter().enumerate() {
            if column_index > 0 {
                create_sql.push_str(", ");
            }
            create_sql.push_str(&format!("{} {}", column.name, column.sql_type.sql()));
            if column.is_primary_key {
                create_sql.push_str(" PRIMARY KEY");
                if column.is_autoincrement {
                    create_sql.push_str(" AUTOINCREMENT");
                }
            }
            if column.non_null {
                create_sql.push_str(" NOT NULL");
            }
            if let Some(default_value) = column.default_value {
                create_sql.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some(foreign_key) = column.foreign_key {
                create_sql.push_str(&format!(
                    " REFERENCES {}({}) ON DELETE {}",
                    foreign_key.foreign_table,
                    foreign_key.foreign_column,
                    foreign_key.on_delete.sql()
                ));
            }
        }
        create_sql.push_str(");");
        conn.execute(&create_sql, params![])?;

        for (index_name, columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, columns),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual_columns = stmt
            .query_map(params![], |row| {
                let sql_type = match row.get::<_, String>(2)?.as_str() {
                    "TEXT" => &SqlType::Text,
                    "INTEGER" => &SqlType::Integer,
                    _ => {
                        return Err(rusqlite::Error::InvalidColumnType(
                            2,
                            "".to_string(),
                            Type::Text,
                        ))
                    }
                };
                Ok(Column {
                    name: row.get::<_, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                    is_autoincrement: false,
                    foreign_key: None,
                })
            })?
            .collect::<Result<Vec<Column<'_, String>>, rusqlite::Error>>()?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}. Found: {}, expected: {}",
                self.name,
                actual_columns.len(),
                self.columns.len(),
                actual_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
            // SQLite may report the default with or without its parentheses
            if actual.default_value.as_deref().map(strip_parentheses)
                != expected.default_value.map(strip_parentheses)
            {
                bail!(
                    "Table {} column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} column {} primary key mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.is_primary_key,
                    actual.is_primary_key
                );
            }
        }
        Ok(())
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }

    fn validate_foreign_keys(&self, conn: &Connection) -> Result<()> {
        // id, seq, table, from, to, on_update, on_delete, match
        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", self.name))?;
        let actual: Vec<(String, String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(3)?, row.get(2)?, row.get(4)?, row.get(6)?)))?
            .filter_map(|r| r.ok())
            .collect();

        for column in self.columns {
            let Some(expected) = column.foreign_key else {
                continue;
            };
            let found = actual.iter().any(|(from, table, to, on_delete)| {
                from == column.name
                    && table == expected.foreign_table
                    && to == expected.foreign_column
                    && on_delete == expected.on_delete.sql()
            });
            if !found {
                bail!(
                    "Table {} column {} is missing foreign key REFERENCES {}({}) ON DELETE {}",
                    self.name,
                    column.name,
                    expected.foreign_table,
                    expected.foreign_column,
                    expected.on_delete.sql()
                );
            }
        }
        Ok(())
    }
}

fn strip_parentheses(s: &str) -> &str {
    s.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(s)
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    /// Upgrades a database from the previous version to this one.
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate_columns(conn)?;
            table.validate_indices(conn)?;
            table.validate_foreign_keys(conn)?;
        }
        Ok(())
    }
}

/// Reads the schema version stored in the database, without the base offset.
/// Returns `None` for a fresh database.
pub fn read_schema_version(conn: &Connection) -> Result<Option<usize>> {
    let raw: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if raw == 0 {
        return Ok(None);
    }
    let raw = raw as usize;
    if raw < BASE_DB_VERSION {
        bail!(
            "Database user_version {} was not written by this service (expected at least {})",
            raw,
            BASE_DB_VERSION
        );
    }
    Ok(Some(raw - BASE_DB_VERSION))
}

/// Creates the latest schema on a fresh database, or migrates an existing
/// one forward and validates it.
pub fn open_versioned(conn: &Connection, schemas: &[VersionedSchema]) -> Result<()> {
    let Some(latest) = schemas.last() else {
        bail!("No schema versions defined");
    };

    let Some(mut version) = read_schema_version(conn)? else {
        latest.create(conn)?;
        return Ok(());
    };

    if version > latest.version {
        bail!(
            "Database schema version {} is newer than supported version {}",
            version,
            latest.version
        );
    }

    let from = version;
    for schema in schemas.iter().filter(|s| s.version > from) {
        let Some(migration) = schema.migration else {
            bail!("No migration to schema version {}", schema.version);
        };
        tracing::info!("Migrating database schema {} -> {}", version, schema.version);
        migration(conn)?;
        version = schema.version;
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + version),
            [],
        )?;
    }

    conn.execute("PRAGMA foreign_keys = ON;", params![])?;
    latest.validate(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_column;

    const PARENT_FK: ForeignKey = ForeignKey {
        foreign_table: "parent",
        foreign_column: "id",
        on_delete: ForeignKeyOnChange::Cascade,
    };

    const PARENT: Table = Table {
        name: "parent",
        columns: &[
            sqlite_column!("id", &SqlType::Text, is_primary_key = true),
            sqlite_column!(
                "created_at",
                &SqlType::Integer,
                non_null = true,
                default_value = Some(DEFAULT_TIMESTAMP_MS)
            ),
        ],
        indices: &[("idx_parent_created", "created_at")],
    };

    const CHILD: Table = Table {
        name: "child",
        columns: &[
            sqlite_column!(
                "id",
                &SqlType::Integer,
                is_primary_key = true,
                is_autoincrement = true
            ),
            sqlite_column!(
                "parent_id",
                &SqlType::Text,
                non_null = true,
                foreign_key = Some(&PARENT_FK)
            ),
        ],
        indices: &[],
    };

    const V0: VersionedSchema = VersionedSchema {
        version: 0,
        tables: &[PARENT],
        migration: None,
    };

    fn add_child(conn: &Connection) -> Result<()> {
        CHILD.create(conn)
    }

    const V1: VersionedSchema = VersionedSchema {
        version: 1,
        tables: &[PARENT, CHILD],
        migration: Some(add_child),
    };

    #[test]
    fn created_schema_validates() {
        let conn = Connection::open_in_memory().unwrap();
        V1.create(&conn).unwrap();
        V1.validate(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(1));
    }

    #[test]
    fn timestamp_default_is_milliseconds() {
        let conn = Connection::open_in_memory().unwrap();
        V0.create(&conn).unwrap();
        conn.execute("INSERT INTO parent (id) VALUES ('a')", []).unwrap();
        let created: i64 = conn
            .query_row("SELECT created_at FROM parent", [], |r| r.get(0))
            .unwrap();
        assert!(created > 1_600_000_000_000);
    }

    #[test]
    fn autoincrement_ids_are_not_reused() {
        let conn = Connection::open_in_memory().unwrap();
        V1.create(&conn).unwrap();
        conn.execute("INSERT INTO parent (id) VALUES ('a')", []).unwrap();
        conn.execute("INSERT INTO child (parent_id) VALUES ('a')", [])
            .unwrap();
        conn.execute("INSERT INTO child (parent_id) VALUES ('a')", [])
            .unwrap();
        conn.execute("DELETE FROM child WHERE id = 2", []).unwrap();
        conn.execute("INSERT INTO child (parent_id) VALUES ('a')", [])
            .unwrap();
        let max: i64 = conn
            .query_row("SELECT MAX(id) FROM child", [], |r| r.get(0))
            .unwrap();
        assert_eq!(max, 3);
    }

    fn add_child_index(conn: &Connection) -> Result<()> {
        conn.execute("CREATE INDEX idx_child_parent ON child(parent_id);", [])?;
        Ok(())
    }

    const V2: VersionedSchema = VersionedSchema {
        version: 2,
        tables: &[
            PARENT,
            Table {
                name: "child",
                columns: CHILD.columns,
                indices: &[("idx_child_parent", "parent_id")],
            },
        ],
        migration: Some(add_child_index),
    };

    #[test]
    fn migrates_across_several_versions() {
        let conn = Connection::open_in_memory().unwrap();
        V0.create(&conn).unwrap();
        open_versioned(&conn, &[V0, V1, V2]).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(2));
        V2.validate(&conn).unwrap();

        // Reopening at the latest version runs no migration
        open_versioned(&conn, &[V0, V1, V2]).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(2));
    }

    #[test]
    fn migrates_forward() {
        let conn = Connection::open_in_memory().unwrap();
        V0.create(&conn).unwrap();
        open_versioned(&conn, &[V0, V1]).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(1));
        V1.validate(&conn).unwrap();
    }

    #[test]
    fn rejects_newer_and_foreign_databases() {
        let conn = Connection::open_in_memory().unwrap();
        V1.create(&conn).unwrap();
        assert!(open_versioned(&conn, &[V0]).is_err());

        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA user_version = 3", []).unwrap();
        assert!(read_schema_version(&conn).is_err());
    }

    #[test]
    fn validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE parent (id TEXT PRIMARY KEY, created_at INTEGER NOT NULL DEFAULT (cast((julianday('now') - 2440587.5) * 86400000 as int)))",
            [],
        )
        .unwrap();

        let err = V0.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
        assert!(err.contains("idx_parent_created"));
    }

    #[test]
    fn validate_detects_missing_foreign_key() {
        let conn = Connection::open_in_memory().unwrap();
        V0.create(&conn).unwrap();
        conn.execute(
            "CREATE TABLE child (id INTEGER PRIMARY KEY AUTOINCREMENT, parent_id TEXT NOT NULL)",
            [],
        )
        .unwrap();

        let err = V1.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing foreign key"));
        assert!(err.contains("parent_id"));
    }

    #[test]
    fn validate_detects_column_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE parent (id TEXT PRIMARY KEY)", [])
            .unwrap();
        assert!(V0.validate(&conn).is_err());
    }
}
