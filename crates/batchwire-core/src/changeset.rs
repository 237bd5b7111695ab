//! Ordered atomicity groups of operations.

use uuid::Uuid;

use crate::correlate::Completion;
use crate::operation::Operation;

/// An ordered group of operations the server applies all-or-nothing.
///
/// Owns a boundary token unique to the batch run and assigns each queued
/// operation a content identifier `<boundary>-<seq>`, `seq` starting at 1
/// and never reused or reordered.
pub struct ChangeSet {
    boundary: String,
    operations: Vec<(Operation, Completion)>,
}

impl ChangeSet {
    pub(crate) fn new() -> Self {
        Self {
            boundary: format!("changeset_{}", Uuid::new_v4()),
            operations: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Queue an operation, assign its content identifier and register its
    /// completion. Returns the content identifier.
    pub(crate) fn add(&mut self, mut op: Operation, completion: Completion) -> String {
        let id = format!("{}-{}", self.boundary, self.operations.len() + 1);
        op.assign_content_id(id.clone());
        self.operations.push((op, completion));
        id
    }

    /// Render this changeset's multipart payload: its `Content-Type` header
    /// line, a blank line, each operation preceded by a boundary delimiter,
    /// then the closing delimiter.
    pub fn encode(&self, host: &str) -> String {
        let mut lines = vec![
            format!("Content-Type: multipart/mixed;boundary={}", self.boundary),
            String::new(),
        ];
        for (op, _) in &self.operations {
            lines.push(format!("--{}", self.boundary));
            lines.push(op.encode(host));
        }
        lines.push(format!("--{}--", self.boundary));
        lines.join("\n")
    }

    /// Drain into (content-id, completion) pairs in queuing order, for the
    /// correlation snapshot.
    pub(crate) fn into_entries(self) -> Vec<(String, Completion)> {
        self.operations
            .into_iter()
            .map(|(op, c)| (op.content_id().unwrap_or_default().to_string(), c))
            .collect()
    }
}
