use crate::error::HistoryError;
use crate::models::detection::Detection;
use crate::models::scan_record::ScanRecord;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, RwLock};

const DB_SCHEMA_VERSION: i64 = 2;

const RECORD_COLUMNS: &str =
    "id, timestamp, image_reference, detections_json, health_score, improvement";

/// Append-only log of completed scans.
///
/// There is no update or delete: a later record's improvement is computed
/// from the earlier ones, so rewriting history would break that chain.
pub trait HistoryStore: Send + Sync {
    /// Durable once this returns `Ok`.
    fn append(&self, record: &ScanRecord) -> Result<(), HistoryError>;

    /// All records, most recent first.
    fn read_all(&self) -> Result<Vec<ScanRecord>, HistoryError>;

    fn read_latest(&self) -> Result<Option<ScanRecord>, HistoryError>;

    fn count(&self) -> Result<usize, HistoryError>;
}

pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        log::warn!("history database is at schema {version}, newer than {DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scan_records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            timestamp INTEGER NOT NULL,
            image_reference TEXT NOT NULL,
            detections_json TEXT NOT NULL DEFAULT '[]',
            health_score INTEGER NOT NULL CHECK(health_score BETWEEN 0 AND 100),
            improvement INTEGER
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_scan_records_timestamp ON scan_records(timestamp);

        CREATE TRIGGER IF NOT EXISTS scan_records_no_update
        BEFORE UPDATE ON scan_records
        BEGIN
            SELECT RAISE(ABORT, 'scan_records is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS scan_records_no_delete
        BEFORE DELETE ON scan_records
        BEGIN
            SELECT RAISE(ABORT, 'scan_records is append-only');
        END;
        ",
    )
}

pub fn history_db_path(data_dir: &str) -> std::path::PathBuf {
    Path::new(data_dir).join(".skinlens").join("history.db")
}

pub fn get_db_connection(data_dir: &str) -> Result<Connection, HistoryError> {
    let db_path = history_db_path(data_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    let detections_json: String = row.get(3)?;
    let detections = serde_json::from_str::<Vec<Detection>>(&detections_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(ScanRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        image_reference: row.get(2)?,
        detections,
        health_score: row.get(4)?,
        improvement: row.get(5)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// SQLite-backed history, one database per profile directory.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn new(conn: Connection) -> Result<Self, HistoryError> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(data_dir: &str) -> Result<Self, HistoryError> {
        let conn = get_db_connection(data_dir)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::new(Connection::open_in_memory()?)
    }

    pub fn last_scan_time(&self) -> Result<Option<i64>, HistoryError> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned)?;
        let last = conn.query_row("SELECT MAX(timestamp) FROM scan_records", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?;
        Ok(last)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, record: &ScanRecord) -> Result<(), HistoryError> {
        let detections_json = serde_json::to_string(&record.detections)?;

        let mut conn = self.conn.lock().map_err(|_| HistoryError::Poisoned)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO scan_records (id, timestamp, image_reference, detections_json, health_score, improvement) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.timestamp,
                record.image_reference,
                detections_json,
                record.health_score,
                record.improvement,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                HistoryError::DuplicateId(record.id.clone())
            } else {
                HistoryError::Sqlite(e)
            }
        })?;
        tx.commit()?;

        log::debug!("appended scan record {}", record.id);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<ScanRecord>, HistoryError> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM scan_records ORDER BY seq DESC"
        ))?;

        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn read_latest(&self) -> Result<Option<ScanRecord>, HistoryError> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned)?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM scan_records ORDER BY seq DESC LIMIT 1"),
                [],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn count(&self) -> Result<usize, HistoryError> {
        let conn = self.conn.lock().map_err(|_| HistoryError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM scan_records", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

/// Process-local history for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<ScanRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, record: &ScanRecord) -> Result<(), HistoryError> {
        let mut records = self.records.write().map_err(|_| HistoryError::Poisoned)?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(HistoryError::DuplicateId(record.id.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<ScanRecord>, HistoryError> {
        let records = self.records.read().map_err(|_| HistoryError::Poisoned)?;
        Ok(records.iter().rev().cloned().collect())
    }

    fn read_latest(&self) -> Result<Option<ScanRecord>, HistoryError> {
        let records = self.records.read().map_err(|_| HistoryError::Poisoned)?;
        Ok(records.last().cloned())
    }

    fn count(&self) -> Result<usize, HistoryError> {
        let records = self.records.read().map_err(|_| HistoryError::Poisoned)?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::detection::{BoundingBox, Category};

    fn sample_record(id: &str, timestamp: i64, score: u8, improvement: Option<i32>) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            timestamp,
            image_reference: format!("file:///photos/{id}.jpg"),
            detections: vec![Detection::new(
                Category::Pustule,
                BoundingBox::new(12.0, 8.0, 40.5, 33.0),
                0.87,
            )],
            health_score: score,
            improvement,
        }
    }

    #[test]
    fn schema_initializes_with_expected_version() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("schema init");
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("schema version");
        assert_eq!(version, DB_SCHEMA_VERSION);
    }

    #[test]
    fn record_round_trip_preserves_detections() {
        let store = SqliteHistoryStore::open_in_memory().expect("store");
        let record = sample_record("r1", 1_700_000_000, 91, None);

        store.append(&record).expect("append");
        let all = store.read_all().expect("read all");

        assert_eq!(all, vec![record]);
    }

    #[test]
    fn latest_is_last_appended_and_read_all_is_newest_first() {
        let store = SqliteHistoryStore::open_in_memory().expect("store");
        let r1 = sample_record("r1", 1_700_000_000, 70, None);
        let r2 = sample_record("r2", 1_700_000_000, 80, Some(10));

        store.append(&r1).expect("append r1");
        store.append(&r2).expect("append r2");

        assert_eq!(store.read_latest().expect("latest"), Some(r2.clone()));
        let ids: Vec<String> = store
            .read_all()
            .expect("read all")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["r2".to_string(), "r1".to_string()]);
        assert_eq!(store.count().expect("count"), 2);
        assert_eq!(store.last_scan_time().expect("last"), Some(1_700_000_000));
    }

    #[test]
    fn empty_store_has_no_latest() {
        let store = SqliteHistoryStore::open_in_memory().expect("store");
        assert_eq!(store.read_latest().expect("latest"), None);
        assert!(store.read_all().expect("read all").is_empty());
        assert_eq!(store.last_scan_time().expect("last"), None);
    }

    #[test]
    fn rows_cannot_be_rewritten_or_removed() {
        let store = SqliteHistoryStore::open_in_memory().expect("store");
        store
            .append(&sample_record("r1", 1_700_000_000, 70, None))
            .expect("append");

        let conn = store.conn.lock().expect("lock");
        assert!(conn
            .execute("UPDATE scan_records SET health_score = 100", [])
            .is_err());
        assert!(conn.execute("DELETE FROM scan_records", []).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = SqliteHistoryStore::open_in_memory().expect("store");
        let record = sample_record("r1", 1_700_000_000, 70, None);
        store.append(&record).expect("first append");
        assert!(matches!(
            store.append(&record),
            Err(HistoryError::DuplicateId(ref id)) if id == "r1"
        ));
        assert_eq!(store.count().expect("count"), 1);

        let memory = MemoryHistoryStore::new();
        memory.append(&record).expect("first append");
        assert!(matches!(
            memory.append(&record),
            Err(HistoryError::DuplicateId(_))
        ));
    }

    #[test]
    fn records_survive_reopening_the_profile() {
        let dir = tempfile::tempdir().expect("temp dir");
        let data_dir = dir.path().to_string_lossy().to_string();
        let record = sample_record("r1", 1_700_000_000, 64, None);

        {
            let store = SqliteHistoryStore::open(&data_dir).expect("open");
            store.append(&record).expect("append");
        }

        let reopened = SqliteHistoryStore::open(&data_dir).expect("reopen");
        assert_eq!(reopened.read_latest().expect("latest"), Some(record));
    }

    #[test]
    fn memory_store_matches_sqlite_ordering() {
        let memory = MemoryHistoryStore::new();
        memory.append(&sample_record("r1", 10, 50, None)).expect("append");
        memory.append(&sample_record("r2", 20, 60, Some(10))).expect("append");

        assert_eq!(memory.read_latest().expect("latest").map(|r| r.id), Some("r2".to_string()));
        assert_eq!(memory.read_all().expect("all")[1].id, "r1");
    }

    fn assert_reads_never_see_partial_appends(store: &dyn HistoryStore) {
        let records: Vec<ScanRecord> = (0..40i64)
            .map(|i| sample_record(&format!("r{i}"), 1_700_000_000 + i, 40 + i as u8, None))
            .collect();

        std::thread::scope(|scope| {
            let writer = scope.spawn(|| {
                for record in &records {
                    store.append(record).expect("append");
                }
            });

            loop {
                let finished = writer.is_finished();
                let mut snapshot = store.read_all().expect("read all");
                snapshot.reverse();
                assert_eq!(snapshot.as_slice(), &records[..snapshot.len()]);
                if finished {
                    assert_eq!(snapshot.len(), records.len());
                    break;
                }
            }

            writer.join().expect("writer thread");
        });
    }

    #[test]
    fn concurrent_reads_see_whole_prefixes_of_the_log() {
        let dir = tempfile::tempdir().expect("temp dir");
        let data_dir = dir.path().to_string_lossy().to_string();
        let sqlite = SqliteHistoryStore::open(&data_dir).expect("open");
        assert_reads_never_see_partial_appends(&sqlite);

        let memory = MemoryHistoryStore::new();
        assert_reads_never_see_partial_appends(&memory);
    }
}
