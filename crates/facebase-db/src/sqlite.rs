//! SQLite-backed [`FaceDb`].

use crate::{DbError, FaceDb};
use chrono::{DateTime, Utc};
use facebase_core::{Algorithm, Attributes, Identity, TrainingRecord};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS identity_attributes (
    identity INTEGER NOT NULL,
    position INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (identity, position)
);

CREATE TABLE IF NOT EXISTS training_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    algorithm TEXT NOT NULL,
    identity INTEGER NOT NULL,
    context TEXT NOT NULL,
    vector TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recognizers (
    algorithm TEXT PRIMARY KEY,
    records INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_training_algorithm ON training_records(algorithm);
CREATE INDEX IF NOT EXISTS idx_training_identity ON training_records(identity);
"#;

const TABLES: [&str; 4] = ["identities", "identity_attributes", "training_records", "recognizers"];

/// Identity and training storage in one SQLite database.
pub struct SqliteFaceDb {
    conn: Connection,
}

impl SqliteFaceDb {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::init(conn)?;
        tracing::info!(path = %path.display(), "face database opened");
        Ok(db)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn attributes(&self) -> Result<BTreeMap<i64, Attributes>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, key, value FROM identity_attributes ORDER BY identity, position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut by_identity: BTreeMap<i64, Attributes> = BTreeMap::new();
        for row in rows {
            let (identity, key, value) = row?;
            by_identity.entry(identity).or_default().push(key, value);
        }
        Ok(by_identity)
    }

    fn touch_recognizer(&self, algorithm: Algorithm) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO recognizers (algorithm, records, updated_at)
             VALUES (?1, (SELECT COUNT(*) FROM training_records WHERE algorithm = ?1), ?2)
             ON CONFLICT(algorithm) DO UPDATE SET records = excluded.records, updated_at = excluded.updated_at",
            params![algorithm.identifier(), now()],
        )?;
        Ok(())
    }
}

fn write_attributes(tx: &Transaction<'_>, id: i64, attributes: &Attributes) -> Result<(), DbError> {
    let mut insert = tx.prepare(
        "INSERT INTO identity_attributes (identity, position, key, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, (key, value)) in attributes.iter().enumerate() {
        insert.execute(params![id, position as i64, key, value])?;
    }
    Ok(())
}

impl FaceDb for SqliteFaceDb {
    fn check_ready(&self) -> bool {
        let probe = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
             AND name IN ('identities', 'identity_attributes', 'training_records', 'recognizers')",
            [],
            |row| row.get::<_, i64>(0),
        );
        match probe {
            Ok(n) if n as usize == TABLES.len() => true,
            Ok(n) => {
                tracing::warn!(found = n, expected = TABLES.len(), "face database schema incomplete");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "face database not readable");
                false
            }
        }
    }

    fn identities(&self) -> Result<Vec<Identity>, DbError> {
        let mut attributes = self.attributes()?;
        let mut stmt = self.conn.prepare("SELECT id FROM identities ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids
            .into_iter()
            .map(|id| Identity::new(id, attributes.remove(&id).unwrap_or_default()))
            .collect())
    }

    fn add_identity(&self, attributes: &Attributes) -> Result<i64, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("INSERT INTO identities (created_at) VALUES (?1)", params![now()])?;
        let id = tx.last_insert_rowid();
        write_attributes(&tx, id, attributes)?;
        tx.commit()?;
        Ok(id)
    }

    fn update_identity(&self, identity: &Identity) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM identity_attributes WHERE identity = ?1",
            params![identity.id],
        )?;
        write_attributes(&tx, identity.id, &identity.attributes)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_identity(&self, id: i64) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM identity_attributes WHERE identity = ?1", params![id])?;
        tx.execute("DELETE FROM training_records WHERE identity = ?1", params![id])?;
        tx.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn save_training(&self, algorithm: Algorithm, records: &[TrainingRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }

        let created_at = now();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO training_records (algorithm, identity, context, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in records {
                let vector = serde_json::to_string(&record.vector)?;
                insert.execute(params![
                    algorithm.identifier(),
                    record.identity,
                    record.context,
                    vector,
                    created_at
                ])?;
            }
        }
        tx.commit()?;
        self.touch_recognizer(algorithm)?;

        tracing::debug!(algorithm = %algorithm, records = records.len(), "training saved");
        Ok(())
    }

    fn training(&self, algorithm: Algorithm) -> Result<Vec<TrainingRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, context, vector FROM training_records WHERE algorithm = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![algorithm.identifier()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (identity, context, vector) = row?;
            records.push(TrainingRecord {
                identity,
                context,
                vector: serde_json::from_str(&vector)?,
            });
        }
        Ok(records)
    }

    fn training_updated_at(&self, algorithm: Algorithm) -> Result<Option<DateTime<Utc>>, DbError> {
        let stamp: Option<String> = self
            .conn
            .query_row(
                "SELECT updated_at FROM recognizers WHERE algorithm = ?1",
                params![algorithm.identifier()],
                |row| row.get(0),
            )
            .optional()?;

        stamp.map(|s| parse_timestamp(&s)).transpose()
    }

    fn clear_training(&self, algorithm: Algorithm, context: Option<&str>) -> Result<(), DbError> {
        let removed = match context {
            None => {
                let tx = self.conn.unchecked_transaction()?;
                let n = tx.execute(
                    "DELETE FROM training_records WHERE algorithm = ?1",
                    params![algorithm.identifier()],
                )?;
                tx.execute(
                    "DELETE FROM recognizers WHERE algorithm = ?1",
                    params![algorithm.identifier()],
                )?;
                tx.commit()?;
                n
            }
            Some(context) => {
                let n = self.conn.execute(
                    "DELETE FROM training_records WHERE algorithm = ?1 AND context = ?2",
                    params![algorithm.identifier(), context],
                )?;
                self.touch_recognizer(algorithm)?;
                n
            }
        };

        tracing::debug!(algorithm = %algorithm, context = ?context, removed, "training cleared");
        Ok(())
    }

    fn clear_training_for(
        &self,
        algorithm: Algorithm,
        identities: &[i64],
        context: Option<&str>,
    ) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0usize;
        for &identity in identities {
            removed += match context {
                None => tx.execute(
                    "DELETE FROM training_records WHERE algorithm = ?1 AND identity = ?2",
                    params![algorithm.identifier(), identity],
                )?,
                Some(context) => tx.execute(
                    "DELETE FROM training_records WHERE algorithm = ?1 AND identity = ?2 AND context = ?3",
                    params![algorithm.identifier(), identity, context],
                )?,
            };
        }
        tx.commit()?;
        self.touch_recognizer(algorithm)?;

        tracing::debug!(algorithm = %algorithm, identities = identities.len(), removed, "training cleared");
        Ok(())
    }

    fn integrity_check(&self) -> Result<bool, DbError> {
        let mut stmt = self.conn.prepare("PRAGMA integrity_check")?;
        let messages = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let ok = messages.len() == 1 && messages[0] == "ok";
        if !ok {
            for message in &messages {
                tracing::warn!(message = %message, "face database integrity problem");
            }
        }
        Ok(ok)
    }

    fn vacuum(&self) -> Result<(), DbError> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DbError::Timestamp(s.to_string()))
}
