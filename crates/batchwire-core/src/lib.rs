//! batchwire-core — batch protocol engine for OData-style services.
//!
//! # Overview
//!
//! Batchwire assembles otherwise-independent create/update/delete/action
//! invocations into a single `multipart/mixed` HTTP request and, on reply,
//! correlates each embedded response back to the entity or operation that
//! caused it. The core crate defines:
//!
//! - [`BatchCoordinator`] — the public orchestrator (changeset lifecycle,
//!   queuing, execution)
//! - [`ChangeSet`] / [`Operation`] — atomicity groups and their embedded
//!   request units
//! - [`PayloadBuilder`] — outer multipart composition
//! - [`EntityState`] / [`EntityRecord`] — the entity-state seam
//! - [`BatchTransport`] — the raw HTTP delivery seam
//! - [`ResourceLocator`] / [`ServiceRoot`] — URL resolution
//! - [`BatchError`] / [`TransportError`] — structured error types
//!
//! Failures inside a batch are partial by nature: some operations in a group
//! succeed while others fail. Fatal misuse (changeset sequencing, broken
//! references) is returned as [`BatchError`] before anything is sent;
//! per-operation server failures come back as [`OperationOutcome`] rows so a
//! partial success can still be observed and applied.

pub mod changeset;
pub mod coordinator;
pub mod correlate;
pub mod entity;
pub mod error;
pub mod locator;
pub mod operation;
pub mod payload;
pub mod response;
pub mod transport;

pub use changeset::ChangeSet;
pub use coordinator::{BatchCoordinator, BatchResult};
pub use correlate::{CallCallback, Completion, OperationOutcome};
pub use entity::{shared, EntityRecord, EntityState, Navigation, SharedEntity};
pub use error::{BatchError, TransportError};
pub use locator::{ResourceLocator, ServiceRoot};
pub use operation::{CallKind, CallTarget, Operation, OperationKind};
pub use payload::PayloadBuilder;
pub use response::{BatchResponse, ResponseEntry, ANNOTATION_PREFIX};
pub use transport::BatchTransport;
