//! EditService: transport-agnostic edit lifecycle.
//!
//! Owns the admission queue, the backend, and the event logger. `process`
//! implements the whole flow for one submission: admit, wait for the turn,
//! invoke the backend, release. The release is tied to an RAII guard so the
//! queue advances on every exit path.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::backend::{EditRequest, ImageBackend};
use crate::events::{EventLogger, GenerationEvent};
use crate::queue::{AdmissionQueue, QueueStatus, TicketId};

/// Wire response for one edit submission.
///
/// Backend failure is data, not a transport error: `success` is false and
/// `error` is set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub queue_id: TicketId,
}

pub struct EditService {
    queue: AdmissionQueue,
    backend: Arc<dyn ImageBackend>,
    events: EventLogger,
}

impl EditService {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            queue: AdmissionQueue::new(),
            backend,
            events: EventLogger::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventLogger) -> Self {
        self.events = events;
        self
    }

    /// Substitute the queue (tests shorten the settling pause).
    pub fn with_queue(mut self, queue: AdmissionQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn status(&self, ticket: Option<TicketId>) -> QueueStatus {
        self.queue.status(ticket)
    }

    /// Run one submission through the queue and the backend.
    pub async fn process(&self, request: EditRequest) -> EditResponse {
        let started = Instant::now();
        let ticket = self.queue.admit();
        let position = self.queue.status(Some(ticket.id())).position;
        tracing::info!(ticket = %ticket.id(), position, "edit request admitted");

        self.queue.await_turn(ticket.id()).await;
        let _turn = self.queue.guard(ticket.id());
        tracing::debug!(
            ticket = %ticket.id(),
            waited = ?started.elapsed(),
            "turn acquired, invoking backend"
        );

        let result = self.backend.generate(&request).await;
        let elapsed = started.elapsed();

        match result {
            Ok(image) => {
                tracing::info!(ticket = %ticket.id(), elapsed = ?elapsed, "generation succeeded");
                self.events.log_generation(GenerationEvent {
                    prompt: request.prompt.clone(),
                    success: true,
                    original_image: Some(request.image_data.clone()),
                    generated_image: Some(image.image_data.clone()),
                    error: None,
                    elapsed,
                });
                EditResponse {
                    success: true,
                    image_data: Some(image.image_data),
                    mime_type: Some(image.mime_type),
                    error: None,
                    queue_id: ticket.id(),
                }
            }
            Err(e) => {
                tracing::warn!(ticket = %ticket.id(), error = %e, "generation failed");
                self.events.log_generation(GenerationEvent {
                    prompt: request.prompt.clone(),
                    success: false,
                    original_image: Some(request.image_data.clone()),
                    generated_image: None,
                    error: Some(e.to_string()),
                    elapsed,
                });
                EditResponse {
                    success: false,
                    image_data: None,
                    mime_type: None,
                    error: Some(e.to_string()),
                    queue_id: ticket.id(),
                }
            }
        }
    }
}
