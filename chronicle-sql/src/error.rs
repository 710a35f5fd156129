use thiserror::Error;

/// Everything that can go wrong talking to the underlying database,
/// distinct from the `chronicle::AppendError`/`ReadError` sentinels that
/// wrap this type for the rest of the workspace.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Decode(#[from] chronicle::DecodeError),
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
