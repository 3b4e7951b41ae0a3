use attend_core::{Embedding, FaceRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("seed copy failed: {0}")]
    Seed(#[source] std::io::Error),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
    #[error("empty embedding")]
    EmptyEmbedding,
}

/// SQLite-backed encoding database: one row per user id.
///
/// Embeddings are stored as little-endian f32 bytes.
pub struct EncodingStore {
    conn: Connection,
}

impl EncodingStore {
    /// Open (or create) the database at the given path and create the schema.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS encodings (
                 user_id INTEGER PRIMARY KEY,
                 name TEXT NOT NULL,
                 embedding BLOB NOT NULL,
                 model_version TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    /// Copy `seed` to `db_path` when the database is missing or empty.
    ///
    /// Returns true when the seed was copied.
    pub fn seed_if_missing(db_path: &Path, seed: Option<&Path>) -> Result<bool, StoreError> {
        let Some(seed) = seed else {
            return Ok(false);
        };
        let present = std::fs::metadata(db_path).map(|m| m.len() > 0).unwrap_or(false);
        if present {
            return Ok(false);
        }
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::Seed)?;
        }
        std::fs::copy(seed, db_path).map_err(StoreError::Seed)?;
        tracing::info!(seed = %seed.display(), path = %db_path.display(), "encoding database seeded");
        Ok(true)
    }

    /// Look up a single user.
    pub fn get(&self, user_id: i64) -> Result<Option<FaceRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, name, embedding, model_version FROM encodings WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(user_id, name, blob, version)| to_record(user_id, name, &blob, version))
            .transpose()
    }

    pub fn contains(&self, user_id: i64) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM encodings WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every enrolled user, ordered by id (the gallery for identification).
    pub fn all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, name, embedding, model_version FROM encodings ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (user_id, name, blob, version) = row?;
            records.push(to_record(user_id, name, &blob, version)?);
        }
        Ok(records)
    }

    /// Add a new user.
    pub fn insert(&self, user_id: i64, name: &str, embedding: &Embedding) -> Result<(), StoreError> {
        let blob = embedding_to_bytes(&embedding.values)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO encodings (user_id, name, embedding, model_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![user_id, name, blob, model_version(embedding), now],
        )?;
        tracing::info!(user_id, name, "encoding inserted");
        Ok(())
    }

    /// Replace the encoding and name of an existing user. Returns false if the id is unknown.
    pub fn update(&self, user_id: i64, name: &str, embedding: &Embedding) -> Result<bool, StoreError> {
        let blob = embedding_to_bytes(&embedding.values)?;
        let now = chrono::Utc::now().to_rfc3339();
        let affected = self.conn.execute(
            "UPDATE encodings SET name = ?2, embedding = ?3, model_version = ?4, updated_at = ?5
             WHERE user_id = ?1",
            params![user_id, name, blob, model_version(embedding), now],
        )?;
        tracing::info!(user_id, name, updated = affected > 0, "encoding updated");
        Ok(affected > 0)
    }

    /// Enrolled users without their encodings.
    pub fn list(&self) -> Result<Vec<UserInfo>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, name, model_version, created_at, updated_at
             FROM encodings ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserInfo {
                user_id: row.get(0)?,
                name: row.get(1)?,
                model_version: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Metadata about an enrolled user (no embedding data).
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserInfo {
    pub user_id: i64,
    pub name: String,
    pub model_version: String,
    pub created_at: String,
    pub updated_at: String,
}

fn model_version(embedding: &Embedding) -> String {
    embedding
        .model_version
        .clone()
        .unwrap_or_else(|| "unknown".to_string())
}

fn to_record(user_id: i64, name: String, blob: &[u8], version: String) -> Result<FaceRecord, StoreError> {
    Ok(FaceRecord {
        user_id,
        name,
        embedding: Embedding {
            values: bytes_to_embedding(blob)?,
            model_version: Some(version),
        },
    })
}

fn embedding_to_bytes(values: &[f32]) -> Result<Vec<u8>, StoreError> {
    if values.is_empty() {
        return Err(StoreError::EmptyEmbedding);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbeddingValue);
    }
    Ok(values.iter().flat_map(|v| v.to_le_bytes()).collect())
}

fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if v.is_finite() {
                Ok(v)
            } else {
                Err(StoreError::InvalidEmbeddingValue)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: Some("w600k_r50".to_string()),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = EncodingStore::open_in_memory().unwrap();
        let emb = embedding((0..512).map(|i| i as f32 / 512.0).collect());
        store.insert(1001, "alice", &emb).unwrap();

        let record = store.get(1001).unwrap().unwrap();
        assert_eq!(record.user_id, 1001);
        assert_eq!(record.name, "alice");
        assert_eq!(record.embedding, emb);
        assert!(store.contains(1001).unwrap());
        assert!(store.get(1002).unwrap().is_none());
        assert!(!store.contains(1002).unwrap());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let store = EncodingStore::open_in_memory().unwrap();
        let emb = embedding(vec![1.0, 0.0]);
        store.insert(7, "a", &emb).unwrap();
        assert!(matches!(store.insert(7, "b", &emb), Err(StoreError::Db(_))));
    }

    #[test]
    fn test_update_replaces_name_and_embedding() {
        let store = EncodingStore::open_in_memory().unwrap();
        store.insert(7, "old", &embedding(vec![1.0, 0.0])).unwrap();

        assert!(store.update(7, "new", &embedding(vec![0.0, 1.0])).unwrap());
        let record = store.get(7).unwrap().unwrap();
        assert_eq!(record.name, "new");
        assert_eq!(record.embedding.values, vec![0.0, 1.0]);

        assert!(!store.update(8, "ghost", &embedding(vec![1.0])).unwrap());
    }

    #[test]
    fn test_all_and_list_are_ordered() {
        let store = EncodingStore::open_in_memory().unwrap();
        store.insert(30, "c", &embedding(vec![0.3])).unwrap();
        store.insert(10, "a", &embedding(vec![0.1])).unwrap();
        store.insert(20, "b", &embedding(vec![0.2])).unwrap();

        let ids: Vec<i64> = store.all().unwrap().iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_embedding_byte_fidelity() {
        let values = vec![0.0, -0.0, 1.0, -1.0, f32::MIN_POSITIVE, f32::EPSILON, std::f32::consts::PI];
        let bytes = embedding_to_bytes(&values).unwrap();
        assert_eq!(bytes.len(), values.len() * 4);
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());

        let recovered = bytes_to_embedding(&bytes).unwrap();
        for (orig, rec) in values.iter().zip(recovered.iter()) {
            assert_eq!(orig.to_bits(), rec.to_bits());
        }
    }

    #[test]
    fn test_rejects_bad_embeddings() {
        assert!(matches!(embedding_to_bytes(&[]), Err(StoreError::EmptyEmbedding)));
        assert!(matches!(embedding_to_bytes(&[f32::NAN]), Err(StoreError::InvalidEmbeddingValue)));
        assert!(matches!(bytes_to_embedding(&[0u8; 6]), Err(StoreError::InvalidBlob(6))));
        assert!(matches!(
            bytes_to_embedding(&f32::INFINITY.to_le_bytes()),
            Err(StoreError::InvalidEmbeddingValue)
        ));
    }

    #[test]
    fn test_open_persists_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/face_data.db");
        {
            let store = EncodingStore::open(&path).unwrap();
            store.insert(1, "alice", &embedding(vec![0.5, 0.5])).unwrap();
        }
        let reopened = EncodingStore::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[test]
    fn test_open_reports_unusable_directory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = EncodingStore::open(&blocker.join("face_data.db")).err().unwrap();
        assert!(matches!(err, StoreError::CreateDir { ref path, .. } if *path == blocker));
    }

    #[test]
    fn test_seed_copied_only_when_missing_or_empty() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed.db");
        {
            let store = EncodingStore::open(&seed).unwrap();
            store.insert(42, "seeded", &embedding(vec![1.0])).unwrap();
        }
        let db = dir.path().join("data/face_data.db");

        assert!(!EncodingStore::seed_if_missing(&db, None).unwrap());
        assert!(EncodingStore::seed_if_missing(&db, Some(&seed)).unwrap());
        assert!(EncodingStore::open(&db).unwrap().contains(42).unwrap());

        // Already populated: left alone.
        assert!(!EncodingStore::seed_if_missing(&db, Some(&seed)).unwrap());

        // Empty file counts as missing.
        let empty = dir.path().join("empty.db");
        std::fs::write(&empty, b"").unwrap();
        assert!(EncodingStore::seed_if_missing(&empty, Some(&seed)).unwrap());
    }
}
