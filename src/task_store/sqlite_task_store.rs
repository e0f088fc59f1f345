use super::models::{Crawl, CrawlState, PoisonRecord, StagedWarcs};
use super::schema::TASK_VERSIONED_SCHEMAS;
use super::{CheckpointStore, CrawlStore, RecordSource, WarcStore};
use crate::indexer::Partition;
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite implementation of every task store trait, sharing one connection.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open task database at {:?}", path))?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        open_versioned(&mut conn, TASK_VERSIONED_SCHEMAS, is_new_db, "task")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Task database connection mutex poisoned"))
    }

    /// Adds a warc to the record stream and returns its id.
    pub fn add_warc(&self, crawl_id: i64, filename: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO warcs (crawl_id, filename) VALUES (?1, ?2)",
            params![crawl_id, filename],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
    }

    fn row_to_crawl(row: &rusqlite::Row) -> rusqlite::Result<Crawl> {
        let state_str: String = row.get("state")?;
        let state = CrawlState::parse(&state_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown crawl state '{}'", state_str).into(),
            )
        })?;
        let created_at: String = row.get("created_at")?;

        Ok(Crawl {
            id: row.get("id")?,
            name: row.get("name")?,
            state,
            created_at: Self::parse_datetime(&created_at)?,
        })
    }

    fn row_to_poison_record(row: &rusqlite::Row) -> rusqlite::Result<PoisonRecord> {
        let last_error_time: String = row.get("last_error_time")?;
        Ok(PoisonRecord {
            record_id: row.get("record_id")?,
            retry_count: row.get("retry_count")?,
            last_error_time: Self::parse_datetime(&last_error_time)?,
        })
    }
}

impl CrawlStore for SqliteTaskStore {
    fn create_crawl(&self, name: &str, state: CrawlState) -> Result<i64> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO crawls (name, state, created_at) VALUES (?1, ?2, ?3)",
            params![name, state.as_str(), now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_crawl(&self, id: i64) -> Result<Option<Crawl>> {
        let conn = self.conn()?;
        let crawl = conn
            .query_row(
                "SELECT id, name, state, created_at FROM crawls WHERE id = ?1",
                params![id],
                Self::row_to_crawl,
            )
            .optional()?;
        Ok(crawl)
    }

    fn find_crawls_by_state(&self, state: CrawlState) -> Result<Vec<Crawl>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, state, created_at FROM crawls WHERE state = ?1")?;
        let crawls = stmt
            .query_map(params![state.as_str()], Self::row_to_crawl)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(crawls)
    }

    fn set_crawl_state(&self, id: i64, state: CrawlState) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE crawls SET state = ?1 WHERE id = ?2",
            params![state.as_str(), id],
        )?;
        if updated == 0 {
            anyhow::bail!("Crawl {} not found", id);
        }
        Ok(())
    }
}

impl CheckpointStore for SqliteTaskStore {
    fn set_checkpoint(&self, partition_key: u32, last_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO index_checkpoints (partition_key, last_processed_id)
             VALUES (?1, ?2)
             ON CONFLICT(partition_key) DO UPDATE SET last_processed_id = ?2",
            params![partition_key, last_id],
        )?;
        Ok(())
    }

    fn get_checkpoint(&self, partition_key: u32) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let last_id = conn
            .query_row(
                "SELECT last_processed_id FROM index_checkpoints WHERE partition_key = ?1",
                params![partition_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last_id)
    }

    fn record_failure(&self, record_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO index_poison_records (record_id, retry_count, last_error_time)
             VALUES (?1, 1, ?2)
             ON CONFLICT(record_id) DO UPDATE SET
                retry_count = retry_count + 1,
                last_error_time = ?2",
            params![record_id, now],
        )?;
        Ok(())
    }

    fn clear_failure(&self, record_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM index_poison_records WHERE record_id = ?1",
            params![record_id],
        )?;
        Ok(())
    }

    fn get_failure(&self, record_id: i64) -> Result<Option<PoisonRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT record_id, retry_count, last_error_time
                 FROM index_poison_records WHERE record_id = ?1",
                params![record_id],
                Self::row_to_poison_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_failures(&self) -> Result<Vec<PoisonRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_id, retry_count, last_error_time
             FROM index_poison_records ORDER BY record_id DESC",
        )?;
        let records = stmt
            .query_map([], Self::row_to_poison_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn claim_partition_count(&self, count: u32) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO index_partitioning (id, partition_count) VALUES (1, ?1)",
            params![count],
        )?;
        let stored: u32 = conn.query_row(
            "SELECT partition_count FROM index_partitioning WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        if stored != count {
            anyhow::bail!(
                "Checkpoints were written for {} partitions, refusing to run with {}",
                stored,
                count
            );
        }
        Ok(())
    }
}

impl WarcStore for SqliteTaskStore {
    fn stage_warcs(&self, crawl_name: &str, filenames: &[String]) -> Result<Option<StagedWarcs>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, state FROM crawls WHERE name = ?1 ORDER BY id DESC LIMIT 1",
                params![crawl_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let new_files: Vec<&String> = match existing {
            Some((crawl_id, _)) => {
                let mut stmt = tx.prepare(
                    "SELECT 1 FROM warcs WHERE crawl_id = ?1 AND filename = ?2",
                )?;
                let mut new_files = Vec::new();
                for filename in filenames {
                    if !stmt.exists(params![crawl_id, filename])? {
                        new_files.push(filename);
                    }
                }
                new_files
            }
            None => filenames.iter().collect(),
        };
        if new_files.is_empty() {
            return Ok(None);
        }

        let crawl_id = match existing {
            Some((crawl_id, state)) => {
                if state != CrawlState::Importing.as_str() {
                    tx.execute(
                        "UPDATE crawls SET state = ?1 WHERE id = ?2",
                        params![CrawlState::Importing.as_str(), crawl_id],
                    )?;
                }
                crawl_id
            }
            None => {
                tx.execute(
                    "INSERT INTO crawls (name, state, created_at) VALUES (?1, ?2, ?3)",
                    params![
                        crawl_name,
                        CrawlState::Importing.as_str(),
                        Self::format_datetime(&Utc::now())
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        let mut added = Vec::with_capacity(new_files.len());
        for filename in new_files {
            tx.execute(
                "INSERT INTO warcs (crawl_id, filename) VALUES (?1, ?2)",
                params![crawl_id, filename],
            )?;
            added.push(tx.last_insert_rowid());
        }
        tx.commit()?;

        Ok(Some(StagedWarcs { crawl_id, added }))
    }
}

impl RecordSource for SqliteTaskStore {
    fn records_after(
        &self,
        partition: Partition,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM warcs
             WHERE id > ?1 AND ((id % ?2) + ?2) % ?2 = ?3
             ORDER BY id ASC LIMIT ?4",
        )?;
        let ids = stmt
            .query_map(
                params![
                    after_id.unwrap_or(i64::MIN),
                    partition.count(),
                    partition.key(),
                    limit as i64
                ],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}
