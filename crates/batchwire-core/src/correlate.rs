//! Two-pass response correlation.
//!
//! A server may omit or reorder responses for operations it never attempted
//! after an earlier failure in the same atomicity group, so the correlator
//! never assumes a 1:1, in-order response stream. Pass 1 walks the queued
//! snapshot and looks each content-id up in the response list; pass 2 sweeps
//! up response entries no snapshot entry claimed.

use serde_json::Value;
use tracing::{debug, warn};

use crate::entity::{EntityState, SharedEntity};
use crate::response::{BatchResponse, ResponseEntry};
use crate::transport::BatchTransport;

/// Callback invoked with the cleaned response body of an action or function
/// invocation.
pub type CallCallback = Box<dyn FnMut(&Value) + Send>;

/// What to apply once an operation's embedded response is matched.
pub enum Completion {
    /// Reset dirty tracking, mark persisted, apply returned field values.
    Insert { entity: SharedEntity },
    /// Reset dirty tracking; either apply the response body or re-fetch the
    /// full entity from `refresh_url` and apply that.
    Update {
        entity: SharedEntity,
        force_refresh: bool,
        refresh_url: String,
    },
    /// Mark the entity as no longer persisted.
    Delete { entity: SharedEntity },
    /// Hand the cleaned body to the caller's callback.
    Call { callback: Option<CallCallback> },
}

impl Completion {
    pub(crate) fn entity(&self) -> Option<&SharedEntity> {
        match self {
            Self::Insert { entity }
            | Self::Update { entity, .. }
            | Self::Delete { entity } => Some(entity),
            Self::Call { .. } => None,
        }
    }
}

/// One row of the execute result: the touched entity (if any), the embedded
/// HTTP status, and an error message for failed operations.
pub struct OperationOutcome {
    pub entity: Option<SharedEntity>,
    pub status: u16,
    pub error: Option<String>,
}

impl std::fmt::Debug for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationOutcome")
            .field("entity", &self.entity.as_ref().map(|_| "<shared entity>"))
            .field("status", &self.status)
            .field("error", &self.error)
            .finish()
    }
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Reported when a queued content-id has no (or more than one) matching
/// response entry.
const NO_RESPONSE_MESSAGE: &str =
    "Server sent no error message. There might be errors in previous operations of the same batch.";

const NO_SERVER_MESSAGE: &str = "Server sent no error message";

fn matched_error_message(entry: &ResponseEntry) -> String {
    format!(
        "HTTP {} for changeset '{}' and content_id '{}' with error {}",
        entry.status,
        entry.atomicity_group,
        entry.id,
        entry.server_message().unwrap_or(NO_SERVER_MESSAGE)
    )
}

fn unmatched_error_message(entry: &ResponseEntry) -> String {
    format!(
        "HTTP {} for content_id '{}' with error {}",
        entry.status,
        entry.id,
        entry.server_message().unwrap_or(NO_SERVER_MESSAGE)
    )
}

/// Apply a successful entry's body through the operation's completion.
/// Returns an error string when a forced refresh fetch fails; the outcome
/// for that operation is then reported as failed.
async fn apply_completion(
    completion: Completion,
    entry: &ResponseEntry,
    transport: &dyn BatchTransport,
) -> Option<String> {
    let body = entry.cleaned_body();
    match completion {
        Completion::Insert { entity } => {
            let mut state = entity.lock().unwrap();
            state.reset();
            state.set_persisted(true);
            state.apply(&body);
            None
        }
        Completion::Update {
            entity,
            force_refresh,
            refresh_url,
        } => {
            entity.lock().unwrap().reset();
            if force_refresh {
                match transport.get(&refresh_url).await {
                    Ok(Value::Object(full)) => {
                        entity.lock().unwrap().apply(&full);
                        None
                    }
                    Ok(_) => None,
                    Err(e) => {
                        warn!(url = %refresh_url, error = %e, "post-update refresh failed");
                        Some(format!("refresh after update failed: {e}"))
                    }
                }
            } else {
                entity.lock().unwrap().apply(&body);
                None
            }
        }
        Completion::Delete { entity } => {
            let mut state = entity.lock().unwrap();
            state.set_persisted(false);
            state.reset();
            None
        }
        Completion::Call { callback } => {
            if let Some(mut cb) = callback {
                cb(&Value::Object(body));
            }
            None
        }
    }
}

/// Match each snapshot entry to its response, apply completions, then sweep
/// up the unclaimed response entries. Returns outcomes in entity-touch order
/// followed by the leftovers, in response order.
pub(crate) async fn correlate(
    snapshot: Vec<(String, Completion)>,
    response: &BatchResponse,
    transport: &dyn BatchTransport,
) -> Vec<OperationOutcome> {
    let mut outcomes = Vec::with_capacity(snapshot.len());
    let mut processed: Vec<String> = Vec::with_capacity(snapshot.len());

    for (content_id, completion) in snapshot {
        let entity = completion.entity().cloned();
        let matches: Vec<&ResponseEntry> = response
            .responses
            .iter()
            .filter(|r| r.id == content_id)
            .collect();

        if matches.len() != 1 {
            // missing or ambiguous — generic failure, id stays unclaimed
            debug!(content_id = %content_id, matches = matches.len(), "no usable response entry");
            outcomes.push(OperationOutcome {
                entity,
                status: 500,
                error: Some(NO_RESPONSE_MESSAGE.to_string()),
            });
            continue;
        }

        let entry = matches[0];
        processed.push(content_id);

        if !entry.is_success() {
            outcomes.push(OperationOutcome {
                entity,
                status: entry.status,
                error: Some(matched_error_message(entry)),
            });
            continue;
        }

        let refresh_error = apply_completion(completion, entry, transport).await;
        outcomes.push(OperationOutcome {
            entity,
            status: entry.status,
            error: refresh_error,
        });
    }

    for entry in response
        .responses
        .iter()
        .filter(|r| !processed.contains(&r.id))
    {
        outcomes.push(OperationOutcome {
            entity: None,
            status: entry.status,
            error: if entry.is_success() {
                None
            } else {
                Some(unmatched_error_message(entry))
            },
        });
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{shared, EntityRecord};
    use crate::error::TransportError;
    use async_trait::async_trait;
    use serde_json::json;

    struct MockTransport {
        refresh_body: Option<Value>,
    }

    #[async_trait]
    impl BatchTransport for MockTransport {
        async fn send_batch(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: Vec<u8>,
        ) -> Result<BatchResponse, TransportError> {
            Ok(BatchResponse::default())
        }

        async fn get(&self, _url: &str) -> Result<Value, TransportError> {
            self.refresh_body
                .clone()
                .ok_or_else(|| TransportError::Http("refresh refused".into()))
        }
    }

    fn entry(id: &str, status: u16, body: Value) -> ResponseEntry {
        ResponseEntry {
            id: id.into(),
            status,
            atomicity_group: "cs".into(),
            body: Some(body),
        }
    }

    #[tokio::test]
    async fn insert_success_applies_and_persists() {
        let entity = shared(EntityRecord::new("Author", "Authors"));
        let response = BatchResponse {
            responses: vec![entry(
                "cs-1",
                201,
                json!({"@odata.context": "x", "Id": 7}),
            )],
        };
        let outcomes = correlate(
            vec![("cs-1".into(), Completion::Insert { entity: entity.clone() })],
            &response,
            &MockTransport { refresh_body: None },
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, 201);
        assert!(outcomes[0].error.is_none());
        let state = entity.lock().unwrap();
        assert!(state.persisted());
        assert_eq!(state.data_for_insert()["Id"], json!(7));
        assert!(!state.data_for_insert().contains_key("@odata.context"));
    }

    #[tokio::test]
    async fn missing_entry_reports_500_and_stays_unclaimed() {
        let entity = shared(EntityRecord::new("Author", "Authors"));
        // response only answers some other operation
        let response = BatchResponse {
            responses: vec![entry("cs-9", 400, json!({"error": {"message": "bad"}}))],
        };
        let outcomes = correlate(
            vec![("cs-1".into(), Completion::Insert { entity })],
            &response,
            &MockTransport { refresh_body: None },
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, 500);
        assert!(outcomes[0].error.as_deref().unwrap().contains("previous operations"));
        // cs-9 swept up in pass 2, without an entity
        assert!(outcomes[1].entity.is_none());
        assert_eq!(outcomes[1].status, 400);
        assert!(outcomes[1].error.as_deref().unwrap().contains("cs-9"));
        assert!(outcomes[1].error.as_deref().unwrap().contains("bad"));
    }

    #[tokio::test]
    async fn failed_entry_carries_server_status_and_message() {
        let entity = shared(EntityRecord::new("Author", "Authors"));
        let response = BatchResponse {
            responses: vec![entry(
                "cs-1",
                409,
                json!({"error": {"message": "duplicate key"}}),
            )],
        };
        let outcomes = correlate(
            vec![("cs-1".into(), Completion::Insert { entity: entity.clone() })],
            &response,
            &MockTransport { refresh_body: None },
        )
        .await;

        assert_eq!(outcomes[0].status, 409);
        let msg = outcomes[0].error.as_deref().unwrap();
        assert!(msg.contains("HTTP 409"));
        assert!(msg.contains("changeset 'cs'"));
        assert!(msg.contains("duplicate key"));
        assert!(!entity.lock().unwrap().persisted());
    }

    #[tokio::test]
    async fn update_with_force_refresh_applies_fetched_entity() {
        let mut rec = EntityRecord::new("Author", "Authors");
        rec.mark_persisted("https://svc/odata/Authors(1)");
        let entity = shared(rec);
        let response = BatchResponse {
            responses: vec![entry("cs-1", 204, json!({}))],
        };
        let outcomes = correlate(
            vec![(
                "cs-1".into(),
                Completion::Update {
                    entity: entity.clone(),
                    force_refresh: true,
                    refresh_url: "/Authors(1)".into(),
                },
            )],
            &response,
            &MockTransport {
                refresh_body: Some(json!({"Id": 1, "Name": "fresh"})),
            },
        )
        .await;

        assert!(outcomes[0].error.is_none());
        assert_eq!(
            entity.lock().unwrap().data_for_insert()["Name"],
            json!("fresh")
        );
    }

    #[tokio::test]
    async fn failed_refresh_downgrades_outcome() {
        let mut rec = EntityRecord::new("Author", "Authors");
        rec.mark_persisted("https://svc/odata/Authors(1)");
        let entity = shared(rec);
        let response = BatchResponse {
            responses: vec![entry("cs-1", 200, json!({}))],
        };
        let outcomes = correlate(
            vec![(
                "cs-1".into(),
                Completion::Update {
                    entity,
                    force_refresh: true,
                    refresh_url: "/Authors(1)".into(),
                },
            )],
            &response,
            &MockTransport { refresh_body: None },
        )
        .await;

        assert_eq!(outcomes[0].status, 200);
        assert!(outcomes[0].error.as_deref().unwrap().contains("refresh"));
    }

    #[tokio::test]
    async fn delete_clears_persisted() {
        let mut rec = EntityRecord::new("Author", "Authors");
        rec.mark_persisted("https://svc/odata/Authors(1)");
        let entity = shared(rec);
        let response = BatchResponse {
            responses: vec![entry("cs-1", 204, json!({}))],
        };
        correlate(
            vec![("cs-1".into(), Completion::Delete { entity: entity.clone() })],
            &response,
            &MockTransport { refresh_body: None },
        )
        .await;
        assert!(!entity.lock().unwrap().persisted());
    }

    #[tokio::test]
    async fn call_callback_gets_cleaned_body() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        let response = BatchResponse {
            responses: vec![entry(
                "cs-1",
                200,
                json!({"@odata.context": "x", "value": 5}),
            )],
        };
        correlate(
            vec![(
                "cs-1".into(),
                Completion::Call {
                    callback: Some(Box::new(move |v| {
                        *sink.lock().unwrap() = Some(v.clone());
                    })),
                },
            )],
            &response,
            &MockTransport { refresh_body: None },
        )
        .await;

        let got = seen.lock().unwrap().clone().unwrap();
        assert_eq!(got, json!({"value": 5}));
    }

    #[tokio::test]
    async fn ambiguous_ids_are_not_claimed() {
        let entity = shared(EntityRecord::new("Author", "Authors"));
        let response = BatchResponse {
            responses: vec![
                entry("cs-1", 200, json!({})),
                entry("cs-1", 200, json!({})),
            ],
        };
        let outcomes = correlate(
            vec![("cs-1".into(), Completion::Insert { entity })],
            &response,
            &MockTransport { refresh_body: None },
        )
        .await;

        // duplicate → error row, then both entries swept up in pass 2
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].status, 500);
        assert!(outcomes[1].entity.is_none() && outcomes[2].entity.is_none());
    }
}
