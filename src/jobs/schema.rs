//! Database schema for jobs.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP_MS,
};

// Defaults let an external submitter queue a job with a bare
// INSERT (id, input_paths, params).
const JOBS_TABLE_V0: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "job_type",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'enhance'")
        ),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'queued'")
        ),
        sqlite_column!("input_paths", &SqlType::Text, non_null = true),
        sqlite_column!(
            "params",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'{}'")
        ),
        sqlite_column!("result_url", &SqlType::Text),
        sqlite_column!(
            "outputs",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'[]'")
        ),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("claimed_by", &SqlType::Text),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP_MS)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP_MS)
        ),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_jobs_claim", "status, job_type, created_at"),
        ("idx_jobs_status_updated", "status, updated_at"),
    ],
};

const JOB_FK: ForeignKey = ForeignKey {
    foreign_table: "jobs",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const JOB_EVENTS_TABLE_V0: Table = Table {
    name: "job_events",
    columns: &[
        // AUTOINCREMENT keeps ids from ever being reused
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_autoincrement = true
        ),
        sqlite_column!(
            "job_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&JOB_FK)
        ),
        sqlite_column!(
            "ts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP_MS)
        ),
        sqlite_column!("level", &SqlType::Text, non_null = true),
        sqlite_column!("message", &SqlType::Text, non_null = true),
        sqlite_column!("data", &SqlType::Text),
    ],
    indices: &[("idx_job_events_job", "job_id, id")],
};

pub const JOBS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[JOBS_TABLE_V0, JOB_EVENTS_TABLE_V0],
    migration: None,
}];
