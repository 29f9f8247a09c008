use crate::error::CommonError;
use crate::libsql::{Connection, Migrations, apply_migrations};

/// Open an in-memory database with the given migrations applied.
///
/// The returned `Database` must stay alive for the connection to remain valid.
pub async fn setup_in_memory_database(
    migrations: Migrations,
) -> Result<(libsql::Database, Connection), CommonError> {
    let db = libsql::Builder::new_local(":memory:").build().await?;
    let conn = Connection(db.connect()?);

    conn.execute("PRAGMA foreign_keys = ON", ()).await?;
    apply_migrations(&conn, migrations).await?;

    Ok((db, conn))
}
