//! Persistence errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The diff protocol never persists an empty token; callers must fail
    /// the round before reaching the store.
    #[error("refusing to save an empty token")]
    EmptyToken,
}
