//! Type-safe event bus for in-process progress reporting.
//!
//! The [`EventBus`] lets workflows and steps emit typed events. Any other
//! component (the daemon's status output, tests) can subscribe to specific
//! event types without being wired into the workflow.
//!
//! Each event type is a distinct struct implementing the [`Event`] marker trait.
//! Internally, the bus keeps a `HashMap<TypeId, Box<dyn Any>>` where each
//! value is a `tokio::sync::broadcast::Sender<E>`. Channels are created lazily
//! on the first `subscribe()`.
//!
//! ```rust
//! use tally_types::events::{EventBus, StepStarted};
//! use tally_types::CollectionId;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe::<StepStarted>();
//!
//! bus.emit(StepStarted {
//!     collection_id: CollectionId::from("books"),
//!     step: "collect-checksums".into(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.step, "collect-checksums");
//! # });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::{CollectionId, FileId, Finding, PillarId};

// ---------------------------------------------------------------------------
// Event trait
// ---------------------------------------------------------------------------

/// Marker trait for all events that can travel through the [`EventBus`].
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A workflow run has started for a collection.
#[derive(Clone, Debug)]
pub struct WorkflowStarted {
    /// The collection being checked.
    pub collection_id: CollectionId,
    /// Workflow name ("full-integrity", "incremental-integrity", "repair", ...).
    pub workflow: String,
}
impl Event for WorkflowStarted {}

/// A workflow step has started.
#[derive(Clone, Debug)]
pub struct StepStarted {
    /// The collection being checked.
    pub collection_id: CollectionId,
    /// Step name.
    pub step: String,
}
impl Event for StepStarted {}

/// A workflow step has finished, successfully or not.
#[derive(Clone, Debug)]
pub struct StepFinished {
    /// The collection being checked.
    pub collection_id: CollectionId,
    /// Step name.
    pub step: String,
    /// Whether the step completed without error.
    pub ok: bool,
}
impl Event for StepFinished {}

/// A pillar failed during a collection step and was excluded from the rest of it.
#[derive(Clone, Debug)]
pub struct ContributorFailed {
    /// The collection being checked.
    pub collection_id: CollectionId,
    /// The pillar that failed.
    pub pillar_id: PillarId,
    /// Failure reason as reported or inferred.
    pub reason: String,
}
impl Event for ContributorFailed {}

/// An integrity finding has been reported.
#[derive(Clone, Debug)]
pub struct FindingReported {
    /// The collection being checked.
    pub collection_id: CollectionId,
    /// The finding.
    pub finding: Finding,
}
impl Event for FindingReported {}

/// A missing file was copied back to a pillar.
#[derive(Clone, Debug)]
pub struct FileRepaired {
    /// The collection the file belongs to.
    pub collection_id: CollectionId,
    /// The repaired file.
    pub file_id: FileId,
    /// The pillar that received the copy.
    pub pillar_id: PillarId,
}
impl Event for FileRepaired {}

/// A workflow run has ended.
#[derive(Clone, Debug)]
pub struct WorkflowFinished {
    /// The collection that was checked.
    pub collection_id: CollectionId,
    /// Workflow name.
    pub workflow: String,
    /// Whether the run completed without being aborted.
    pub completed: bool,
    /// Whether integrity issues were found.
    pub issues_found: bool,
}
impl Event for WorkflowFinished {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct EventBusInner {
    channels: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// A type-safe event bus.
///
/// Clonable (`Arc` inside). Thread-safe. Non-blocking emits.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    /// Create a new empty event bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                channels: HashMap::new(),
            })),
        }
    }

    /// Emit an event to all current subscribers of type `E`.
    ///
    /// Events nobody subscribed to are dropped.
    pub fn emit<E: Event>(&self, event: E) {
        let inner = self.inner.lock().expect("event bus lock poisoned");

        if let Some(sender) = inner
            .channels
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<broadcast::Sender<E>>())
        {
            // An error only means every receiver is gone.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");

        let entry = inner
            .channels
            .entry(TypeId::of::<E>())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel::<E>(DEFAULT_CHANNEL_CAPACITY);
                Box::new(tx)
            });

        let rx = match entry.downcast_ref::<broadcast::Sender<E>>() {
            Some(sender) => sender.subscribe(),
            // TypeId keys make a mismatch impossible; fall back to a dead channel.
            None => broadcast::channel::<E>(1).1,
        };

        EventReceiver { rx }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("channel_count", &inner.channels.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventReceiver
// ---------------------------------------------------------------------------

/// Typed receiver for a specific event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped. Lagged events are skipped
    /// with a warning.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<E> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
