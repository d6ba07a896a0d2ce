//! Engine - envelope store plus pipeline execution surface.
//!
//! This is the boundary a transport (gRPC, IPC, HTTP) calls into. Every
//! operation is a thin pass-through to [`Envelope`] or [`Runtime`] methods,
//! addressed by envelope id.

use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::AgentOutcome;
use crate::envelope::{BoundsCheck, Envelope, InterruptResponse};
use crate::persistence::PersistenceAdapter;
use crate::runtime::{RunOutcome, Runtime, StreamEvent};
use crate::types::{EnvelopeId, Error, RequestId, Result, SessionId, UserId};

/// Parameters for [`Engine::create_envelope`]. Empty ids are generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEnvelopeRequest {
    #[serde(default)]
    pub raw_input: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl CreateEnvelopeRequest {
    pub fn new(raw_input: impl Into<String>) -> Self {
        Self {
            raw_input: raw_input.into(),
            ..Self::default()
        }
    }
}

type EnvelopeStore = Arc<RwLock<HashMap<String, Envelope>>>;

/// Holds live envelopes and runs them through one pipeline.
///
/// An envelope is taken out of the store while it runs, so concurrent runs
/// of the same envelope are rejected with `NotFound`.
#[derive(Clone)]
pub struct Engine {
    runtime: Runtime,
    envelopes: EnvelopeStore,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("runtime", &self.runtime)
            .field("persistence", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            envelopes: Arc::new(RwLock::new(HashMap::new())),
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        self.persistence = Some(adapter);
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    // =========================================================================
    // Envelope CRUD
    // =========================================================================

    /// Create and store an envelope bound to the engine's pipeline.
    pub async fn create_envelope(&self, request: CreateEnvelopeRequest) -> Result<Envelope> {
        let mut envelope = Envelope::with_input(request.raw_input);
        if let Some(id) = non_empty(request.request_id) {
            envelope.identity.request_id =
                RequestId::from_string(id).map_err(Error::validation)?;
        }
        if let Some(id) = non_empty(request.user_id) {
            envelope.identity.user_id = UserId::from_string(id).map_err(Error::validation)?;
        }
        if let Some(id) = non_empty(request.session_id) {
            envelope.identity.session_id =
                SessionId::from_string(id).map_err(Error::validation)?;
        }
        envelope.audit.metadata = request.metadata;
        self.runtime.prepare(&mut envelope);

        debug!(envelope_id = %envelope.identity.envelope_id, "envelope created");
        self.put(envelope.clone()).await;
        Ok(envelope)
    }

    pub async fn get_envelope(&self, id: &str) -> Result<Envelope> {
        self.envelopes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Apply `updates` via [`Envelope::merge_updates`].
    pub async fn update_envelope(
        &self,
        id: &str,
        updates: HashMap<String, Value>,
    ) -> Result<Envelope> {
        let mut store = self.envelopes.write().await;
        let envelope = store.get_mut(id).ok_or_else(|| not_found(id))?;
        envelope.merge_updates(updates);
        Ok(envelope.clone())
    }

    /// Deep copy under a fresh envelope id.
    pub async fn clone_envelope(&self, id: &str) -> Result<Envelope> {
        let mut cloned = self.get_envelope(id).await?;
        cloned.identity.envelope_id = EnvelopeId::new();
        self.put(cloned.clone()).await;
        Ok(cloned)
    }

    pub async fn remove_envelope(&self, id: &str) -> bool {
        self.envelopes.write().await.remove(id).is_some()
    }

    pub async fn check_bounds(&self, id: &str) -> Result<BoundsCheck> {
        let store = self.envelopes.read().await;
        let envelope = store.get(id).ok_or_else(|| not_found(id))?;
        Ok(envelope.check_bounds())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub async fn execute(&self, id: &str, cancel: &CancellationToken) -> Result<RunOutcome> {
        let mut envelope = self.take(id).await?;
        let result = self.runtime.execute(&mut envelope, cancel).await;
        self.put(envelope).await;
        result
    }

    /// Stream the run of envelope `id`.
    ///
    /// The run is driven by a background task that stores the final envelope
    /// back before forwarding the sentinel, so dropping the returned stream
    /// early neither stops the run nor loses the envelope.
    pub async fn execute_stream(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, StreamEvent>> {
        let envelope = self.take(id).await?;
        let store = self.envelopes.clone();
        let mut events = self.runtime.execute_stream(envelope, cancel);
        let (mut tx, rx) = mpsc::channel(self.runtime.settings().stream_buffer.max(1));

        tokio::spawn(async move {
            let mut forwarding = true;
            while let Some(event) = events.next().await {
                if let StreamEvent::Finished { envelope, .. } = &event {
                    store.write().await.insert(
                        envelope.identity.envelope_id.to_string(),
                        (**envelope).clone(),
                    );
                }
                if forwarding && tx.send(event).await.is_err() {
                    debug!("engine stream receiver dropped, draining run");
                    forwarding = false;
                }
            }
        });
        Ok(rx.boxed())
    }

    pub async fn execute_agent(
        &self,
        id: &str,
        agent: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        let mut envelope = self.take(id).await?;
        let result = self.runtime.execute_agent(agent, &mut envelope, cancel).await;
        self.put(envelope).await;
        result
    }

    pub async fn resume(
        &self,
        id: &str,
        response: InterruptResponse,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut envelope = self.take(id).await?;
        let result = self.runtime.resume(&mut envelope, response, cancel).await;
        self.put(envelope).await;
        result
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Save the envelope's state dict under its id.
    pub async fn checkpoint(&self, id: &str) -> Result<()> {
        let adapter = self.adapter()?;
        let state = self.get_envelope(id).await?.to_state_dict()?;
        adapter.save_state(id, &state).await?;
        info!(envelope_id = id, "checkpoint saved");
        Ok(())
    }

    /// Load a saved envelope back into the store, replacing any live copy.
    pub async fn restore(&self, id: &str) -> Result<Envelope> {
        let adapter = self.adapter()?;
        let state = adapter
            .load_state(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("no checkpoint for envelope {}", id)))?;
        let envelope = Envelope::from_state_dict(state)?;
        self.put(envelope.clone()).await;
        info!(envelope_id = id, "checkpoint restored");
        Ok(envelope)
    }

    fn adapter(&self) -> Result<&Arc<dyn PersistenceAdapter>> {
        self.persistence
            .as_ref()
            .ok_or_else(|| Error::config("engine has no persistence adapter"))
    }

    async fn take(&self, id: &str) -> Result<Envelope> {
        self.envelopes
            .write()
            .await
            .remove(id)
            .ok_or_else(|| not_found(id))
    }

    async fn put(&self, envelope: Envelope) {
        self.envelopes
            .write()
            .await
            .insert(envelope.identity.envelope_id.to_string(), envelope);
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn not_found(id: &str) -> Error {
    Error::not_found(format!("envelope {} not found", id))
}
