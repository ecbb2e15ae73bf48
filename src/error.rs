/*
* File: src/error.rs
*
* Crate-wide error kind. Every fallible operation in the git workspace,
* cluster gateway, queues, and status writer surfaces one of these kinds
* so that the queue-worker boundary can decide "retry" vs "final" without
* string-matching messages.
*
* SPDX-License-Identifier: Apache-2.0
*/

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not-found",
            Error::AlreadyExists(_) => "already-exists",
            Error::Conflict(_) => "conflict",
            Error::InvalidArgument(_) => "invalid-argument",
            Error::NotSupported(_) => "not-supported",
            Error::Timeout(_) => "timeout",
            Error::Network(_) => "network",
            Error::Auth(_) => "auth",
            Error::Io(_) => "io",
            Error::Decode(_) => "decode",
            Error::Internal(_) => "internal",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
                Error::Auth(resp.message.clone())
            }
            kube::Error::Api(resp) => Error::Internal(resp.message.clone()),
            _ => Error::Network(e.to_string()),
        }
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
