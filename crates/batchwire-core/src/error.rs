//! Error types for the batch engine.

use thiserror::Error;

/// Errors raised by the transport collaborator while sending a batch or
/// re-fetching an entity.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The outer batch request itself was rejected with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

/// Fatal errors returned synchronously from the coordinator's lifecycle
/// methods. Per-operation server failures are never surfaced here — they
/// are reported row-by-row in the execute result so partial success stays
/// observable.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A change set is already open; they cannot be nested.
    #[error("close the current change set before opening a new one; change sets cannot be nested")]
    ChangesetAlreadyOpen,

    /// A mutating operation or `close_changeset` was called with no open
    /// change set.
    #[error("open a change set before queuing data modification requests or closing one")]
    NoOpenChangeset,

    /// `execute` was called while a change set was still open.
    #[error("call close_changeset before executing the batch request")]
    ChangesetStillOpen,

    /// A parent resource was supplied that was not itself queued earlier in
    /// the same batch.
    #[error("parent entity was not queued earlier in this batch")]
    ParentNotQueued,

    /// A parent resource only makes sense for inserts.
    #[error("a parent resource can only be supplied for insert operations; it references entities created in the same batch")]
    ParentOnUpdate,

    /// The parent's entity type declares no navigation toward the child's
    /// type, so no content-id-relative URL can be formed.
    #[error("entity type '{parent}' has no navigation to entity type '{child}'")]
    NoNavigation { parent: String, child: String },

    /// The entity has no URL the operation could target.
    #[error("entity has no resolvable URL: {0}")]
    UnresolvableUrl(String),

    /// The service root URL could not be parsed.
    #[error("invalid service root URL: {0}")]
    InvalidServiceRoot(String),

    /// The transport failed to deliver the batch; the whole execute call is
    /// aborted (queue state has already been cleared).
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BatchError {
    /// Returns `true` for changeset lifecycle misuse (open/close/execute out
    /// of order).
    pub fn is_sequence_error(&self) -> bool {
        matches!(
            self,
            Self::ChangesetAlreadyOpen | Self::NoOpenChangeset | Self::ChangesetStillOpen
        )
    }

    /// Returns `true` for unresolvable entity references (missing parent,
    /// parent on update, missing navigation, no URL).
    pub fn is_reference_error(&self) -> bool {
        matches!(
            self,
            Self::ParentNotQueued
                | Self::ParentOnUpdate
                | Self::NoNavigation { .. }
                | Self::UnresolvableUrl(_)
        )
    }
}
