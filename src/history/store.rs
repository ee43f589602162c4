//! PostgreSQL store for persisting agent sessions.
//!
//! One row per session id. The conversation (`memory`), session state
//! (`session_data`) and agent reference (`agent_data`) are JSONB columns;
//! timestamps are unix seconds.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::config::DatabaseConfig;
use crate::db::SessionStorage;
use crate::error::DatabaseError;
use crate::history::{AgentSession, SessionData};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
});

static DRIVER_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^postgres(?:ql)?\+[A-Za-z0-9_]+://").expect("driver pattern is valid")
});

const COLUMNS: &str = "session_id, agent_id, user_id, memory, agent_data, session_data, \
                       extra_data, created_at, updated_at";

/// Session storage in a Postgres table.
pub struct PostgresAgentStorage {
    pool: Pool,
    schema: String,
    table_name: String,
    table_ready: OnceCell<()>,
}

impl PostgresAgentStorage {
    /// Build the storage and its connection pool.
    ///
    /// No connection is opened until the first query.
    pub fn new(
        db_url: &SecretString,
        schema: &str,
        table_name: &str,
        pool_size: usize,
    ) -> Result<Self, DatabaseError> {
        validate_identifier(schema)?;
        validate_identifier(table_name)?;

        let url = normalize_url(db_url.expose_secret());
        let ssl_mode = tokio_postgres::Config::from_str(&url)
            .map_err(|e| DatabaseError::Pool(format!("invalid database URL: {e}")))?
            .get_ssl_mode();

        let mut cfg = Config::new();
        cfg.url = Some(url);
        cfg.pool = Some(PoolConfig::new(pool_size.max(1)));

        let pool = match ssl_mode {
            tokio_postgres::config::SslMode::Disable => {
                cfg.create_pool(Some(Runtime::Tokio1), NoTls)?
            }
            _ => cfg.create_pool(Some(Runtime::Tokio1), make_rustls_connector()?)?,
        };

        Ok(Self {
            pool,
            schema: schema.to_string(),
            table_name: table_name.to_string(),
            table_ready: OnceCell::new(),
        })
    }

    /// Build the storage from resolved configuration.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Self::new(
            &config.url,
            &config.schema,
            &config.table_name,
            config.pool_size,
        )
    }

    /// Get a connection from the pool.
    pub async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }

    /// Fully qualified, quoted table name.
    fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table_name)
    }

    async fn ensure_table(&self) -> Result<(), DatabaseError> {
        self.table_ready
            .get_or_try_init(|| async { self.create().await })
            .await?;
        Ok(())
    }
}

/// Build a rustls-based TLS connector using the platform's root certificate store.
fn make_rustls_connector() -> Result<MakeRustlsConnect, DatabaseError> {
    let mut root_store = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::warn!("error loading system root certs: {e}");
    }
    for cert in native.certs {
        if let Err(e) = root_store.add(cert) {
            tracing::warn!("skipping invalid system root cert: {e}");
        }
    }
    if root_store.is_empty() {
        tracing::warn!("no system root certificates found; TLS connections will fail");
    }

    let config =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| DatabaseError::Pool(format!("TLS setup failed: {e}")))?
            .with_root_certificates(root_store)
            .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

/// Reject anything that is not a plain SQL identifier.
pub(crate) fn validate_identifier(name: &str) -> Result<(), DatabaseError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}

/// Accept SQLAlchemy-style `postgresql+driver://` URLs by dropping the driver.
pub(crate) fn normalize_url(url: &str) -> String {
    DRIVER_SUFFIX.replace(url, "postgresql://").into_owned()
}

fn is_undefined_table(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNDEFINED_TABLE)
}

fn row_to_session(row: &Row) -> Result<AgentSession, DatabaseError> {
    let memory: Option<serde_json::Value> = row.get("memory");
    let session_data: Option<serde_json::Value> = row.get("session_data");

    let memory = memory
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| DatabaseError::Serialization(format!("memory: {e}")))?
        .unwrap_or_default();
    let session_data: SessionData = session_data
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| DatabaseError::Serialization(format!("session_data: {e}")))?
        .unwrap_or_default();

    Ok(AgentSession {
        session_id: row.get("session_id"),
        agent_id: row.get("agent_id"),
        user_id: row.get("user_id"),
        memory,
        agent_data: row.get("agent_data"),
        session_data,
        extra_data: row.get("extra_data"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl SessionStorage for PostgresAgentStorage {
    fn describe(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }

    async fn create(&self) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let table = self.qualified();
        let sql = format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS "{schema}";
            CREATE TABLE IF NOT EXISTS {table} (
                session_id TEXT PRIMARY KEY,
                agent_id TEXT,
                user_id TEXT,
                memory JSONB,
                agent_data JSONB,
                session_data JSONB,
                extra_data JSONB,
                created_at BIGINT NOT NULL,
                updated_at BIGINT
            );
            CREATE INDEX IF NOT EXISTS "{name}_user_id_idx" ON {table} (user_id);
            "#,
            schema = self.schema,
            name = self.table_name,
        );
        conn.batch_execute(&sql).await?;
        tracing::debug!("Ensured session table {}", self.describe());
        Ok(())
    }

    async fn table_exists(&self) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&self.schema, &self.table_name],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn read(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<AgentSession>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE session_id = $1 AND ($2::TEXT IS NULL OR user_id = $2)",
            self.qualified()
        );

        match conn.query_opt(&sql, &[&session_id, &user_id]).await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) if is_undefined_table(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, session: &AgentSession) -> Result<AgentSession, DatabaseError> {
        self.ensure_table().await?;
        let conn = self.conn().await?;

        let memory = serde_json::to_value(&session.memory)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let session_data = serde_json::to_value(&session.session_data)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().timestamp();

        let sql = format!(
            r#"
            INSERT INTO {} ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id) DO UPDATE SET
                agent_id = EXCLUDED.agent_id,
                user_id = EXCLUDED.user_id,
                memory = EXCLUDED.memory,
                agent_data = EXCLUDED.agent_data,
                session_data = EXCLUDED.session_data,
                extra_data = EXCLUDED.extra_data,
                updated_at = EXCLUDED.updated_at
            RETURNING {COLUMNS}
            "#,
            self.qualified()
        );

        let params: [&(dyn tokio_postgres::types::ToSql + Sync); 9] = [
            &session.session_id,
            &session.agent_id,
            &session.user_id,
            &memory,
            &session.agent_data,
            &session_data,
            &session.extra_data,
            &session.created_at,
            &now,
        ];

        let row = match conn.query_one(&sql, &params).await {
            Ok(row) => row,
            // Table dropped after it was first ensured.
            Err(e) if is_undefined_table(&e) => {
                tracing::warn!("Session table {} missing, recreating", self.describe());
                // create() takes its own connection; a pool of one must get this one back first.
                drop(conn);
                self.create().await?;
                self.conn().await?.query_one(&sql, &params).await?
            }
            Err(e) => return Err(e.into()),
        };

        row_to_session(&row)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!("DELETE FROM {} WHERE session_id = $1", self.qualified());
        match conn.execute(&sql, &[&session_id]).await {
            Ok(n) => Ok(n > 0),
            Err(e) if is_undefined_table(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_session_ids(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT session_id FROM {} \
             WHERE ($1::TEXT IS NULL OR user_id = $1) AND ($2::TEXT IS NULL OR agent_id = $2) \
             ORDER BY created_at DESC, session_id",
            self.qualified()
        );
        match conn.query(&sql, &[&user_id, &agent_id]).await {
            Ok(rows) => Ok(rows.iter().map(|r| r.get("session_id")).collect()),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_sessions(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<Vec<AgentSession>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} \
             WHERE ($1::TEXT IS NULL OR user_id = $1) AND ($2::TEXT IS NULL OR agent_id = $2) \
             ORDER BY created_at DESC, session_id",
            self.qualified()
        );
        match conn.query(&sql, &[&user_id, &agent_id]).await {
            Ok(rows) => rows.iter().map(row_to_session).collect(),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_table(&self) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.batch_execute(&format!("DROP TABLE IF EXISTS {}", self.qualified()))
            .await?;
        tracing::info!("Dropped session table {}", self.describe());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated() {
        assert!(validate_identifier("agent_sessions").is_ok());
        assert!(validate_identifier("_private2").is_ok());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("drop table; --").is_err());
        assert!(validate_identifier("quoted\"name").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn driver_suffix_is_stripped() {
        assert_eq!(
            normalize_url("postgresql+psycopg://u:p@localhost:5432/postgres"),
            "postgresql://u:p@localhost:5432/postgres"
        );
        assert_eq!(
            normalize_url("postgres://u:p@host/db"),
            "postgres://u:p@host/db"
        );
    }

    #[tokio::test]
    async fn storage_builds_without_connecting() {
        let url = SecretString::from("postgresql://u:p@127.0.0.1:1/db?sslmode=disable".to_string());
        let storage = PostgresAgentStorage::new(&url, "ai", "agent_sessions", 4).unwrap();
        assert_eq!(storage.describe(), "ai.agent_sessions");
        assert_eq!(storage.qualified(), "\"ai\".\"agent_sessions\"");

        let tls_url = SecretString::from("postgresql://u:p@db.example.com/db".to_string());
        assert!(PostgresAgentStorage::new(&tls_url, "ai", "agent_sessions", 4).is_ok());
    }

    #[tokio::test]
    async fn bad_table_name_rejected_before_pool() {
        let url = SecretString::from("postgresql://u:p@localhost/db".to_string());
        let err = PostgresAgentStorage::new(&url, "ai", "sessions;drop", 4)
            .err()
            .unwrap();
        assert!(matches!(err, DatabaseError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let url = SecretString::from("not a url at all".to_string());
        assert!(PostgresAgentStorage::new(&url, "ai", "agent_sessions", 4).is_err());
    }
}
