//! Outer multipart body composition.

use crate::changeset::ChangeSet;

/// Composes the outer `multipart/mixed` body from the queued parts.
///
/// Lines are joined with `\n` throughout the encoding pipeline; this builder
/// normalizes every newline to CRLF at the end, as MIME multipart requires,
/// and yields UTF-8 bytes ready for the transport.
pub struct PayloadBuilder<'a> {
    boundary: &'a str,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(boundary: &'a str) -> Self {
        Self { boundary }
    }

    /// Render the full batch body.
    pub fn render(&self, parts: &[ChangeSet], host: &str) -> Vec<u8> {
        let mut lines = Vec::with_capacity(parts.len() * 2 + 2);
        for part in parts {
            lines.push(format!("--{}", self.boundary));
            lines.push(part.encode(host));
        }
        if lines.is_empty() {
            lines.push(format!("--{}", self.boundary));
        }
        lines.push(format!("--{}--", self.boundary));
        lines.join("\n").replace('\n', "\r\n").into_bytes()
    }
}
