// src/error.rs

//! Error types for the granary transaction set core

use crate::label::LabelKeyError;
use thiserror::Error;

/// Errors that can occur in transaction set operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("{0}")]
    Label(#[from] LabelKeyError),

    #[error("OpenPGP error: {0}")]
    Pgp(String),

    #[error("public key rejected: {0}")]
    KeyLint(String),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("{0}")]
    LockUnavailable(String),

    #[error("invalid root directory: {0}")]
    InvalidRoot(String),

    #[error("transaction set has {0} pending elements")]
    ElementsPending(usize),

    #[error("signal mask operation failed: {0}")]
    Signal(String),

    #[error("header verification failed: {0}")]
    HeaderCheck(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
