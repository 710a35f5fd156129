use sqlx::AnyPool;

use crate::config::Config;
use crate::error::Error;

/// Which concrete backend a `Config` resolves to. DDL (and only DDL)
/// differs enough between Postgres and SQLite that the migrator needs to
/// know which dialect it is talking to; every other query in this crate
/// is written against the portable subset `sqlx::Any` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Postgres,
    Sqlite,
}

impl Kind {
    pub(crate) fn of(config: &Config) -> Self {
        match config {
            Config::Postgres(_) => Kind::Postgres,
            Config::Sqlite(_) => Kind::Sqlite,
        }
    }
}

/// Creates the single `event` table this crate requires, if it does not
/// already exist.
///
/// Run automatically by `SqlEventLog::connect`. Safe to run more than
/// once: every statement is `IF NOT EXISTS`.
pub(crate) async fn run(pool: &AnyPool, kind: Kind) -> Result<(), Error> {
    let ddl = match kind {
        Kind::Postgres => {
            r#"
            CREATE TABLE IF NOT EXISTS event (
                sequence BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                id TEXT NOT NULL,
                stream_id TEXT NOT NULL,
                stream_version BIGINT NOT NULL,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                meta TEXT,
                causation_event_id TEXT,
                correlation_event_id TEXT,
                occurred_on TEXT NOT NULL,
                UNIQUE (id),
                UNIQUE (stream_id, stream_version)
            )
            "#
        }
        Kind::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS event (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                stream_id TEXT NOT NULL,
                stream_version INTEGER NOT NULL,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                meta TEXT,
                causation_event_id TEXT,
                correlation_event_id TEXT,
                occurred_on TEXT NOT NULL,
                UNIQUE (id),
                UNIQUE (stream_id, stream_version)
            )
            "#
        }
    };

    sqlx::query(ddl).execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_stream_id ON event (stream_id)")
        .execute(pool)
        .await?;

    Ok(())
}
