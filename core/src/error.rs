//! Error types for the HTTP action handlers.
//!
//! # Design
//! `ActionError` is the single error surfaced to the host. Validation
//! failures name the offending field or path. A `TransportFault` keeps
//! whatever status and headers were observed before the failure so the
//! response router can still deliver them; it is always the error reported
//! for the invocation, even when a later delivery also fails.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::http::ResponseHeaders;
use crate::types::BodyEncoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFaultKind {
    /// A response arrived but its status is not classified as successful.
    Status,
    /// The request and response stream did not finish within the timeout.
    Timeout,
    /// Connection, protocol or body stream failure.
    Network,
}

/// Failure of the request/response cycle.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportFault {
    pub kind: TransportFaultKind,
    pub status: Option<u16>,
    pub headers: Option<ResponseHeaders>,
    message: String,
}

impl TransportFault {
    pub fn status(status: u16, headers: ResponseHeaders) -> Self {
        Self {
            kind: TransportFaultKind::Status,
            status: Some(status),
            headers: Some(headers),
            message: format!("Response code {status}"),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: TransportFaultKind::Timeout,
            status: None,
            headers: None,
            message: format!("Request timed out after {after:?}"),
        }
    }

    pub fn network(
        reason: impl std::fmt::Display,
        status: Option<u16>,
        headers: Option<ResponseHeaders>,
    ) -> Self {
        Self {
            kind: TransportFaultKind::Network,
            status,
            headers,
            message: format!("Request failed: {reason}"),
        }
    }
}

/// Errors returned by validation and execution of an action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Options failed the structural or semantic checks.
    #[error("invalid options at `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// A referenced file does not exist. `path` is absolute.
    #[error("Unable to locate file at path: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error(transparent)]
    Transport(#[from] TransportFault),

    /// The response body could not be converted to the requested encoding.
    #[error("unable to decode response body as {encoding}: {reason}")]
    Encoding {
        encoding: BodyEncoding,
        reason: String,
    },

    /// A context destination could not be written.
    #[error("unable to write to `{destination}`: {reason}")]
    Delivery { destination: String, reason: String },

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template collaborator failed.
    #[error("template resolution failed: {0}")]
    Template(String),
}

impl ActionError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        ActionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn delivery(destination: impl ToString, reason: impl Into<String>) -> Self {
        ActionError::Delivery {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }

    /// Status code captured before the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ActionError::Transport(fault) => fault.status,
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ActionError::Validation { .. } | ActionError::MissingFile { .. }
        )
    }
}
