//! SQLite schema definitions for the task database.
//!
//! Holds crawls and their warcs (the record stream), plus the indexing
//! checkpoints and poison-record ledger added in version 2. Version 3 pins
//! the partition count the checkpoints were written under and indexes warc
//! filenames for the watch importer.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Crawls and warcs
// =============================================================================

const CRAWLS_TABLE_V1: Table = Table {
    name: "crawls",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_crawls_state", "state")],
};

const CRAWL_FK: ForeignKey = ForeignKey {
    foreign_table: "crawls",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// Warcs table - the ordered record stream; `id` is the scan order.
const WARCS_TABLE_V1: Table = Table {
    name: "warcs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "crawl_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&CRAWL_FK)
        ),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_warcs_crawl_id", "crawl_id")],
};

// =============================================================================
// Version 2 - Partition checkpoints and poison ledger
// =============================================================================

const INDEX_CHECKPOINTS_TABLE_V2: Table = Table {
    name: "index_checkpoints",
    columns: &[
        sqlite_column!("partition_key", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("last_processed_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

const INDEX_POISON_RECORDS_TABLE_V2: Table = Table {
    name: "index_poison_records",
    columns: &[
        sqlite_column!("record_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "retry_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_error_time", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// Migration from version 1 to version 2: add checkpoint and ledger tables
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    INDEX_CHECKPOINTS_TABLE_V2.create(conn)?;
    INDEX_POISON_RECORDS_TABLE_V2.create(conn)?;
    Ok(())
}

// =============================================================================
// Version 3 - Partition count and warc filename lookup
// =============================================================================

/// Single row holding the partition count of the stored checkpoints.
const INDEX_PARTITIONING_TABLE_V3: Table = Table {
    name: "index_partitioning",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("partition_count", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

const WARCS_TABLE_V3: Table = Table {
    name: "warcs",
    columns: WARCS_TABLE_V1.columns,
    indices: &[
        ("idx_warcs_crawl_id", "crawl_id"),
        ("idx_warcs_filename", "filename"),
    ],
};

/// Migration from version 2 to version 3: add the partitioning table and
/// the filename index
fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    INDEX_PARTITIONING_TABLE_V3.create(conn)?;
    conn.execute("CREATE INDEX idx_warcs_filename ON warcs(filename);", [])?;
    Ok(())
}

pub const TASK_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[CRAWLS_TABLE_V1, WARCS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            CRAWLS_TABLE_V1,
            WARCS_TABLE_V1,
            INDEX_CHECKPOINTS_TABLE_V2,
            INDEX_POISON_RECORDS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            CRAWLS_TABLE_V1,
            WARCS_TABLE_V3,
            INDEX_CHECKPOINTS_TABLE_V2,
            INDEX_POISON_RECORDS_TABLE_V2,
            INDEX_PARTITIONING_TABLE_V3,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];
