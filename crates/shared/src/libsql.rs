use std::ops::Deref;
use std::path::PathBuf;

use crate::error::CommonError;
use libsql::params::IntoParams;
use libsql::{Database, Rows};
use tracing::info;
use url::Url;

/// Connection wrapper that retries on SQLITE_BUSY.
#[derive(Debug, Clone)]
pub struct Connection(pub libsql::Connection);

impl Connection {
    pub fn new(connection: libsql::Connection) -> Self {
        Self(connection)
    }
}

impl Deref for Connection {
    type Target = libsql::Connection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[macro_export]
macro_rules! execute_with_retry {
    ($operation:expr) => {
        execute_with_retry!($operation, 10)
    };
    ($operation:expr, $max_retries:expr) => {{
        async {
            let mut _retries = 0u32;
            let _max_retries: u32 = $max_retries;

            loop {
                match $operation.await {
                    Ok(result) => break Ok(result),
                    Err(err) => {
                        let err_str = err.to_string();
                        if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY")
                        {
                            tracing::warn!("Database is locked, retrying... {:?}", err);
                            if _retries >= _max_retries {
                                break Err(err);
                            }

                            _retries += 1;

                            // Very low delay with exponential backoff
                            let delay_us = 10_000 * (1 << _retries.min(6));
                            tokio::time::sleep(std::time::Duration::from_micros(delay_us)).await;
                        } else {
                            break Err(err);
                        }
                    }
                }
            }
        }
        .await
    }};
}

impl Connection {
    /// Execute a statement, returning the number of changed rows.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> libsql::Result<u64> {
        tracing::trace!("executing `{}`", sql);
        let params = params.into_params()?;
        execute_with_retry!(self.0.execute(sql, params.clone()), 10)
    }

    /// Execute a batch of statements.
    pub async fn execute_batch(&self, sql: &str) -> libsql::Result<()> {
        tracing::trace!("executing batch `{}`", sql);
        execute_with_retry!(self.0.execute_batch(sql), 10).map(|_| ())
    }

    /// Run a query, returning the rows.
    pub async fn query(&self, sql: &str, params: impl IntoParams) -> libsql::Result<Rows> {
        let stmt = self.prepare(sql).await?;
        let params = params.into_params()?;
        execute_with_retry!(stmt.query(params.clone()), 10)
    }
}

/// An ordered set of schema migration files, `(filename, sql)`.
pub type Migrations = &'static [(&'static str, &'static str)];

pub struct LocalConnectionParams {
    pub path_to_db_file: PathBuf,
}

pub struct RemoteConnectionParams {
    pub remote_url: String,
    pub auth_token: String,
}

pub enum ConnectionType {
    Local(LocalConnectionParams),
    Remote(RemoteConnectionParams),
}

impl TryFrom<Url> for ConnectionType {
    type Error = CommonError;
    fn try_from(url: Url) -> Result<Self, Self::Error> {
        if url.scheme() != "libsql" {
            let scheme = url.scheme();
            return Err(CommonError::Unknown(anyhow::anyhow!(
                "invalid scheme: {scheme}"
            )));
        }

        let mode = url
            .query_pairs()
            .find(|(key, _)| key == "mode")
            .map(|(_, value)| value.to_string())
            .unwrap_or_else(|| "local".to_string());

        match mode.as_str() {
            "local" => {
                let is_relative = url.as_str().starts_with("libsql://./");
                let path = if is_relative {
                    format!(".{}", url.path())
                } else {
                    url.path().to_string()
                };
                Ok(ConnectionType::Local(LocalConnectionParams {
                    path_to_db_file: PathBuf::from(path),
                }))
            }
            "remote" => {
                let mut remote_url = url.clone();
                remote_url.set_query(None);

                let auth_token = match url.query_pairs().find(|(key, _)| key == "auth") {
                    Some((_, value)) => value.to_string(),
                    None => {
                        return Err(CommonError::Unknown(anyhow::anyhow!(
                            "missing auth query parameter for remote connection"
                        )));
                    }
                };

                Ok(ConnectionType::Remote(RemoteConnectionParams {
                    remote_url: remote_url.to_string(),
                    auth_token,
                }))
            }
            _ => Err(CommonError::Unknown(anyhow::anyhow!(
                "invalid mode: {mode}"
            ))),
        }
    }
}

/// Apply pending migrations, tracked in a `schema_migrations` table keyed by
/// filename so re-running on an existing database is a no-op.
pub async fn apply_migrations(
    conn: &Connection,
    migrations: Migrations,
) -> Result<(), CommonError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            filename TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .await?;

    for (filename, sql) in migrations {
        let mut rows = conn
            .query(
                "SELECT filename FROM schema_migrations WHERE filename = ?1",
                libsql::params![*filename],
            )
            .await?;
        if rows.next().await?.is_some() {
            continue;
        }

        info!(migration = filename, "applying migration");
        conn.execute_batch(sql).await?;
        conn.execute(
            "INSERT INTO schema_migrations (filename) VALUES (?1)",
            libsql::params![*filename],
        )
        .await?;
    }

    Ok(())
}

pub async fn establish_db_connection(
    connection_string: &Url,
    migrations: Option<Migrations>,
) -> Result<(Database, Connection), CommonError> {
    let connection_type = ConnectionType::try_from(connection_string.clone())?;

    let (db, conn) = match connection_type {
        ConnectionType::Local(params) => {
            info!("establishing local connection");
            if let Some(parent) = params.path_to_db_file.parent() {
                if !std::fs::exists(parent)? {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let db = libsql::Builder::new_local(params.path_to_db_file.clone())
                .build()
                .await?;
            let conn = db.connect()?;
            (db, conn)
        }
        ConnectionType::Remote(params) => {
            info!("establishing remote connection");
            let db =
                libsql::Builder::new_remote(params.remote_url.clone(), params.auth_token.clone())
                    .build()
                    .await?;
            let conn = db.connect()?;
            (db, conn)
        }
    };

    let conn = Connection(conn);
    conn.execute("PRAGMA foreign_keys = ON", ()).await?;

    if let Some(migrations) = migrations {
        apply_migrations(&conn, migrations).await?;
    }

    Ok((db, conn))
}
