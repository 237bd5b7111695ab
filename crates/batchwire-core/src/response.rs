//! Parsed batch-response wire types.
//!
//! The transport collaborator parses the server's multipart reply into this
//! JSON shape; the correlator only ever works on these structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response-body keys carrying this prefix are protocol annotations and are
/// stripped before entity state is updated.
pub const ANNOTATION_PREFIX: &str = "@odata.";

/// One embedded response, correlated back to its operation by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// The content identifier of the operation this entry answers.
    pub id: String,
    /// Embedded HTTP status of the individual operation.
    pub status: u16,
    /// Boundary token of the changeset the operation belonged to.
    #[serde(rename = "atomicityGroup", default)]
    pub atomicity_group: String,
    /// Embedded response body, if the server sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ResponseEntry {
    /// Returns `true` if the embedded status is in `[200, 300)`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server-provided error message, dug out of `body.error.message`.
    pub fn server_message(&self) -> Option<&str> {
        self.body
            .as_ref()?
            .get("error")?
            .get("message")?
            .as_str()
    }

    /// Body object with all annotation-prefixed keys removed. Non-object or
    /// absent bodies yield an empty map.
    pub fn cleaned_body(&self) -> serde_json::Map<String, Value> {
        match &self.body {
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(k, _)| !k.starts_with(ANNOTATION_PREFIX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => serde_json::Map::new(),
        }
    }
}

/// The full parsed reply to one batch request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<ResponseEntry>,
}
