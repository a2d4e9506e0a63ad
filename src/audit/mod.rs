//! Audit sink
//!
//! Best-effort persistence of the per-request trace. Write failures are
//! swallowed with a warning and never block the response. In-memory by
//! default; Postgres when a database URL is configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_id: Uuid,
    pub trace_id: Uuid,
    pub payload: serde_json::Value,
    /// SHA-256 over the serialized payload, for integrity checks.
    pub payload_hash: String,
    pub created_at: DateTime<Utc>,
}

enum AuditBackend {
    InMemory {
        records: Arc<RwLock<HashMap<Uuid, AuditRecord>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: Arc<OnceCell<()>>,
    },
}

pub struct AuditSink {
    backend: AuditBackend,
}

impl AuditSink {
    pub fn new_in_memory() -> Self {
        Self {
            backend: AuditBackend::InMemory {
                records: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    /// Postgres when AUDIT_DATABASE_URL / DATABASE_URL is set and the
    /// pool can be created lazily; in-memory otherwise.
    pub fn from_env() -> Self {
        let database_url = env::var("AUDIT_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(&url)
            {
                Ok(pool) => {
                    info!("Audit sink backend: postgres");
                    return Self {
                        backend: AuditBackend::Postgres {
                            pool,
                            schema_ready: Arc::new(OnceCell::new()),
                        },
                    };
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres audit backend, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Audit sink backend: in-memory");
        Self::new_in_memory()
    }

    async fn ensure_schema_if_needed(&self) -> Result<(), sqlx::Error> {
        let AuditBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS audit_records (
                      trace_id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      payload JSONB NOT NULL,
                      payload_hash TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_audit_records_user_time
                    ON audit_records (user_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await?;

        Ok(())
    }

    /// Best-effort write. Failures are logged and swallowed — the caller
    /// never waits on audit success.
    pub async fn record(&self, user_id: Uuid, trace_id: Uuid, payload: serde_json::Value) {
        let record = AuditRecord {
            user_id,
            trace_id,
            payload_hash: compute_payload_hash(&payload),
            payload,
            created_at: Utc::now(),
        };

        match &self.backend {
            AuditBackend::InMemory { records } => {
                let mut records = records.write().await;
                records.insert(trace_id, record);
            }
            AuditBackend::Postgres { pool, .. } => {
                if let Err(e) = self.ensure_schema_if_needed().await {
                    warn!("Audit schema init failed, dropping record: {}", e);
                    return;
                }
                let result = sqlx::query(
                    r#"
                    INSERT INTO audit_records (trace_id, user_id, payload, payload_hash, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (trace_id) DO NOTHING
                    "#,
                )
                .bind(record.trace_id)
                .bind(record.user_id)
                .bind(&record.payload)
                .bind(&record.payload_hash)
                .bind(record.created_at)
                .execute(pool)
                .await;

                if let Err(e) = result {
                    warn!("Audit write failed, dropping record: {}", e);
                }
            }
        }
    }

    /// Retrieve a record by trace id (in-memory backend only returns
    /// data written by this process).
    pub async fn get(&self, trace_id: Uuid) -> Option<AuditRecord> {
        match &self.backend {
            AuditBackend::InMemory { records } => {
                let records = records.read().await;
                records.get(&trace_id).cloned()
            }
            AuditBackend::Postgres { .. } => None,
        }
    }

    /// List trace ids for a user, oldest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> Vec<Uuid> {
        match &self.backend {
            AuditBackend::InMemory { records } => {
                let records = records.read().await;
                let mut items: Vec<_> = records
                    .values()
                    .filter(|r| r.user_id == user_id)
                    .map(|r| (r.trace_id, r.created_at))
                    .collect();
                items.sort_by_key(|(_, created_at)| *created_at);
                items.into_iter().map(|(id, _)| id).collect()
            }
            AuditBackend::Postgres { .. } => Vec::new(),
        }
    }

    /// Verify a stored record's payload against its hash.
    pub async fn verify_integrity(&self, trace_id: Uuid) -> bool {
        match self.get(trace_id).await {
            Some(record) => compute_payload_hash(&record.payload) == record.payload_hash,
            None => false,
        }
    }
}

impl Default for AuditSink {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

/// SHA-256 over the payload, streamed into the hasher without an
/// intermediate String.
pub fn compute_payload_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), payload).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_retrieve() {
        let sink = AuditSink::new_in_memory();
        let user_id = Uuid::new_v4();
        let trace_id = Uuid::new_v4();

        sink.record(user_id, trace_id, json!({ "intent": "spending" }))
            .await;

        let record = sink.get(trace_id).await.unwrap();
        assert_eq!(record.user_id, user_id);
        assert!(sink.verify_integrity(trace_id).await);
    }

    #[tokio::test]
    async fn test_list_for_user_is_time_ordered() {
        let sink = AuditSink::new_in_memory();
        let user_id = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        sink.record(user_id, first, json!({ "n": 1 })).await;
        sink.record(user_id, second, json!({ "n": 2 })).await;
        sink.record(Uuid::new_v4(), Uuid::new_v4(), json!({ "n": 3 }))
            .await;

        let traces = sink.list_for_user(user_id).await;
        assert_eq!(traces, vec![first, second]);
    }

    #[test]
    fn test_payload_hash_is_stable() {
        let payload = json!({ "a": 1, "b": [true, null] });
        assert_eq!(
            compute_payload_hash(&payload),
            compute_payload_hash(&payload)
        );
    }
}
