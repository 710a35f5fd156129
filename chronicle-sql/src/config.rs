/// Connection target for `SqlEventLog`.
///
/// Mirrors the two recognized configuration options of the event log:
/// `postgres_dsn` and `sqlite_path` are mutually exclusive, so this is an
/// enum rather than two optional fields.
#[derive(Debug, Clone)]
pub enum Config {
    /// Connect to Postgres using the given connection string.
    Postgres(String),
    /// Connect to SQLite at the given path, e.g. `data.db` or
    /// `:memory:?cache=shared` for a shared in-memory database.
    Sqlite(String),
}

impl Config {
    pub fn postgres(dsn: impl Into<String>) -> Self {
        Self::Postgres(dsn.into())
    }

    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::Sqlite(path.into())
    }

    pub(crate) fn connect_url(&self) -> String {
        match self {
            Config::Postgres(dsn) => dsn.clone(),
            // `:memory:` (optionally with `?cache=shared`) is sqlite's own
            // in-process special path and uses `sqlite:` rather than
            // `sqlite://`, which sqlx would otherwise parse as a host.
            Config::Sqlite(path) if path.starts_with(":memory:") => format!("sqlite:{path}"),
            Config::Sqlite(path) => format!("sqlite://{path}"),
        }
    }
}
