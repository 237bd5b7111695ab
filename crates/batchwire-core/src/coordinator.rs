//! `BatchCoordinator` — changeset lifecycle, operation queuing and execution.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::changeset::ChangeSet;
use crate::correlate::{correlate, CallCallback, Completion, OperationOutcome};
use crate::entity::{EntityState, SharedEntity};
use crate::error::BatchError;
use crate::locator::ResourceLocator;
use crate::operation::{CallTarget, Operation, OperationKind};
use crate::payload::PayloadBuilder;
use crate::response::BatchResponse;
use crate::transport::BatchTransport;

/// The coordinator's changeset state machine. At most one changeset is open
/// at any time; they cannot be nested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Idle,
    ChangesetOpen,
}

/// Everything one `execute` call produced.
pub struct BatchResult {
    /// Entities touched by the batch, in queuing order.
    pub entities: Vec<SharedEntity>,
    /// Per-operation outcomes: matched entries in queuing order, then
    /// leftover unmatched response entries.
    pub responses: Vec<OperationOutcome>,
    /// The parsed server response, untouched.
    pub raw: BatchResponse,
    /// Snapshot of the (entity, content-id) map the batch was sent with.
    pub id_map: Vec<(SharedEntity, String)>,
}

impl std::fmt::Debug for BatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchResult")
            .field("entities", &format_args!("[{} shared entities]", self.entities.len()))
            .field("responses", &self.responses)
            .field("raw", &self.raw)
            .field("id_map", &format_args!("[{} entries]", self.id_map.len()))
            .finish()
    }
}

/// Public orchestrator for one logical batch attempt.
///
/// Queue mutating operations between `open_changeset` and `close_changeset`,
/// then `execute`. Queue state is cleared unconditionally before the network
/// send, so the coordinator returns to an empty, reusable state even when
/// the transport fails. Not safe for concurrent use — all lifecycle methods
/// take `&mut self`.
pub struct BatchCoordinator {
    boundary: String,
    state: CoordinatorState,
    parts: Vec<ChangeSet>,
    id_map: Vec<(SharedEntity, String)>,
    locator: Arc<dyn ResourceLocator>,
}

impl BatchCoordinator {
    /// Create a coordinator with a fresh random batch boundary.
    pub fn new(locator: Arc<dyn ResourceLocator>) -> Self {
        Self {
            boundary: format!("batch_{}", Uuid::new_v4()),
            state: CoordinatorState::Idle,
            parts: Vec::new(),
            id_map: Vec::new(),
            locator,
        }
    }

    /// The outer multipart boundary of this batch.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.id_map.is_empty()
    }

    /// Open a new changeset and register it as a queued part.
    pub fn open_changeset(&mut self) -> Result<(), BatchError> {
        if self.state == CoordinatorState::ChangesetOpen {
            return Err(BatchError::ChangesetAlreadyOpen);
        }
        self.parts.push(ChangeSet::new());
        self.state = CoordinatorState::ChangesetOpen;
        Ok(())
    }

    /// Close the open changeset. It stays queued as a part.
    pub fn close_changeset(&mut self) -> Result<(), BatchError> {
        if self.state == CoordinatorState::Idle {
            return Err(BatchError::NoOpenChangeset);
        }
        self.state = CoordinatorState::Idle;
        Ok(())
    }

    fn require_open(&mut self) -> Result<&mut ChangeSet, BatchError> {
        if self.state == CoordinatorState::Idle {
            return Err(BatchError::NoOpenChangeset);
        }
        self.parts.last_mut().ok_or(BatchError::NoOpenChangeset)
    }

    /// Queue an insert or update for `entity`, routed on whether it already
    /// carries a persisted identity.
    ///
    /// Inserts may reference a `parent` entity queued earlier in the same
    /// batch; the operation then targets the parent's navigation via a
    /// content-id-relative URL instead of the entity set. Updates send only
    /// changed fields; an update with nothing to send queues no operation
    /// and returns `Ok(None)`. With `force_refresh`, a successful update is
    /// followed by a full re-fetch of the entity.
    pub fn queue_save(
        &mut self,
        entity: &SharedEntity,
        force_refresh: bool,
        parent: Option<&SharedEntity>,
    ) -> Result<Option<String>, BatchError> {
        let persisted = entity.lock().unwrap().persisted();
        if persisted {
            if parent.is_some() {
                return Err(BatchError::ParentOnUpdate);
            }
            self.queue_update(entity, force_refresh)
        } else {
            self.queue_insert(entity, parent).map(Some)
        }
    }

    fn queue_insert(
        &mut self,
        entity: &SharedEntity,
        parent: Option<&SharedEntity>,
    ) -> Result<String, BatchError> {
        if self.state == CoordinatorState::Idle {
            return Err(BatchError::NoOpenChangeset);
        }

        let (child_type, entity_set, mut insert_data, child_navs) = {
            let state = entity.lock().unwrap();
            (
                state.entity_type().to_string(),
                state.entity_set().to_string(),
                state.data_for_insert(),
                state.navigations().to_vec(),
            )
        };

        let url = match parent {
            None => self
                .locator
                .collection_url(&entity_set)
                .ok_or_else(|| {
                    BatchError::UnresolvableUrl(format!(
                        "entity of type '{child_type}' belongs to no entity set"
                    ))
                })?,
            Some(parent) => {
                let parent_id = self
                    .id_map
                    .iter()
                    .find(|(queued, _)| Arc::ptr_eq(queued, parent))
                    .map(|(_, id)| id.clone())
                    .ok_or(BatchError::ParentNotQueued)?;

                let (parent_type, parent_navs) = {
                    let state = parent.lock().unwrap();
                    (state.entity_type().to_string(), state.navigations().to_vec())
                };
                let nav = parent_navs
                    .iter()
                    .find(|n| n.target_type == child_type)
                    .ok_or_else(|| BatchError::NoNavigation {
                        parent: parent_type.clone(),
                        child: child_type.clone(),
                    })?;

                // The navigation path implies the parent key; the child's
                // scalar FK has no value yet and must not be sent at all.
                if let Some(fk) = child_navs
                    .iter()
                    .find(|n| n.target_type == parent_type)
                    .and_then(|n| n.foreign_key.as_deref())
                {
                    insert_data.remove(fk);
                }

                format!("${parent_id}/{}", nav.name)
            }
        };

        let op = Operation::new(OperationKind::Create, url, Some(Value::Object(insert_data)));
        let id = self.require_open()?.add(
            op,
            Completion::Insert {
                entity: entity.clone(),
            },
        );
        debug!(content_id = %id, entity_type = %child_type, "queued insert");
        self.id_map.push((entity.clone(), id.clone()));
        Ok(id)
    }

    fn queue_update(
        &mut self,
        entity: &SharedEntity,
        force_refresh: bool,
    ) -> Result<Option<String>, BatchError> {
        if self.state == CoordinatorState::Idle {
            return Err(BatchError::NoOpenChangeset);
        }

        let (instance_url, patch) = {
            let state = entity.lock().unwrap();
            (state.instance_url(), state.data_for_update())
        };
        let instance_url = instance_url.ok_or_else(|| {
            BatchError::UnresolvableUrl("entity has no instance URL".to_string())
        })?;
        let url = self.locator.relativize(&instance_url);

        // annotation-prefixed keys alone do not make a patch worth sending
        if !patch.keys().any(|k| !k.starts_with('@')) {
            debug!(url = %url, "nothing to update");
            return Ok(None);
        }

        let op = Operation::new(OperationKind::Update, &url, Some(Value::Object(patch)));
        let id = self.require_open()?.add(
            op,
            Completion::Update {
                entity: entity.clone(),
                force_refresh,
                refresh_url: url,
            },
        );
        debug!(content_id = %id, "queued update");
        self.id_map.push((entity.clone(), id.clone()));
        Ok(Some(id))
    }

    /// Queue a delete for a persisted entity. On success the completion
    /// marks the entity as no longer persisted.
    pub fn queue_delete(&mut self, entity: &SharedEntity) -> Result<String, BatchError> {
        if self.state == CoordinatorState::Idle {
            return Err(BatchError::NoOpenChangeset);
        }

        let instance_url = entity.lock().unwrap().instance_url().ok_or_else(|| {
            BatchError::UnresolvableUrl("entity has no instance URL".to_string())
        })?;
        let url = self.locator.relativize(&instance_url);

        let op = Operation::new(OperationKind::Delete, url, None);
        let id = self.require_open()?.add(
            op,
            Completion::Delete {
                entity: entity.clone(),
            },
        );
        debug!(content_id = %id, "queued delete");
        self.id_map.push((entity.clone(), id.clone()));
        Ok(id)
    }

    /// Queue an action or function invocation. The optional callback
    /// receives the cleaned response body during correlation.
    pub fn queue_call(
        &mut self,
        target: CallTarget,
        callback: Option<CallCallback>,
    ) -> Result<String, BatchError> {
        let op = target.into_operation();
        let id = self
            .require_open()?
            .add(op, Completion::Call { callback });
        debug!(content_id = %id, "queued call");
        Ok(id)
    }

    /// Render the current queue as the outer multipart body without sending
    /// it. Fails while a changeset is still open.
    pub fn payload(&self) -> Result<Vec<u8>, BatchError> {
        if self.state == CoordinatorState::ChangesetOpen {
            return Err(BatchError::ChangesetStillOpen);
        }
        Ok(PayloadBuilder::new(&self.boundary).render(&self.parts, &self.locator.host()))
    }

    /// The `Content-Type` header value sent with the batch.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed;boundary={};charset=utf-8", self.boundary)
    }

    /// Serialize the queued parts, clear all queue state, send the payload
    /// and correlate the response.
    ///
    /// The queue is cleared before the network call — win or lose, the
    /// coordinator is empty afterwards, so a partially-sent batch can never
    /// linger and be resent. A transport failure aborts the whole call.
    pub async fn execute(
        &mut self,
        transport: &dyn BatchTransport,
    ) -> Result<BatchResult, BatchError> {
        if self.state == CoordinatorState::ChangesetOpen {
            return Err(BatchError::ChangesetStillOpen);
        }

        let payload = self.payload()?;
        let id_map = std::mem::take(&mut self.id_map);
        let parts = std::mem::take(&mut self.parts);
        let snapshot: Vec<(String, Completion)> = parts
            .into_iter()
            .flat_map(|cs| cs.into_entries())
            .collect();

        info!(
            boundary = %self.boundary,
            operations = snapshot.len(),
            bytes = payload.len(),
            "sending batch"
        );

        let url = self.locator.batch_url();
        let headers = vec![("Content-Type".to_string(), self.content_type())];
        let raw = transport.send_batch(&url, &headers, payload).await?;

        let responses = correlate(snapshot, &raw, transport).await;
        let failed = responses.iter().filter(|o| o.error.is_some()).count();
        info!(responses = responses.len(), failed, "batch complete");

        let entities = id_map.iter().map(|(e, _)| e.clone()).collect();
        Ok(BatchResult {
            entities,
            responses,
            raw,
            id_map,
        })
    }
}
