//! The provisioning backend's surface: request, handle and callback slots.
//!
//! A [`Provisioner`] returns a [`ProvisionHandle`] immediately; the outcome
//! arrives later through whichever slot the backend fires. Signals fired
//! before a slot is bound are buffered and replayed when it is bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credential::redact;

/// Room listing visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Room parameters shared by every attempt of one acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub name: String,
    pub capacity: u16,
    pub visibility: Visibility,
    pub proxy: Option<String>,
    pub debug: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            name: "roomhost public room".to_string(),
            capacity: 16,
            visibility: Visibility::Public,
            proxy: None,
            debug: false,
        }
    }
}

/// Input handed to the backend, built fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionRequest {
    #[serde(flatten)]
    pub room: RoomSettings,
    #[serde(serialize_with = "serialize_redacted")]
    pub credential: String,
}

fn serialize_redacted<S: serde::Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&redact(value))
}

impl ProvisionRequest {
    pub fn new(room: RoomSettings, credential: impl Into<String>) -> Self {
        Self {
            room,
            credential: credential.into(),
        }
    }
}

/// A participant reported by informational callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: u32,
    pub name: String,
}

impl Participant {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Backend signal, as fired into a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Link(String),
    Error(String),
    SpecificError(String),
    ParticipantJoin(Participant),
    ParticipantLeave(Participant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Link,
    Error,
    SpecificError,
    ParticipantJoin,
    ParticipantLeave,
}

impl Signal {
    fn slot(&self) -> Slot {
        match self {
            Signal::Link(_) => Slot::Link,
            Signal::Error(_) => Slot::Error,
            Signal::SpecificError(_) => Slot::SpecificError,
            Signal::ParticipantJoin(_) => Slot::ParticipantJoin,
            Signal::ParticipantLeave(_) => Slot::ParticipantLeave,
        }
    }
}

type Callback = Arc<dyn Fn(Signal) + Send + Sync>;

#[derive(Default)]
struct Slots {
    bound: HashMap<Slot, Callback>,
    backlog: Vec<Signal>,
    /// While set, every signal is buffered and binding does not replay.
    held: bool,
}

/// Handle returned by [`Provisioner::provision`].
///
/// Clones share the same slots: the backend keeps one clone to fire
/// signals, the attempt binds callbacks on another.
#[derive(Clone)]
pub struct ProvisionHandle {
    slots: Arc<Mutex<Slots>>,
    specific_errors: bool,
}

impl std::fmt::Debug for ProvisionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.lock();
        f.debug_struct("ProvisionHandle")
            .field("bound", &slots.bound.len())
            .field("backlog", &slots.backlog.len())
            .field("specific_errors", &self.specific_errors)
            .finish()
    }
}

impl Default for ProvisionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionHandle {
    /// Handle exposing every callback slot.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::default())),
            specific_errors: true,
        }
    }

    /// Handle from a backend that has no specific-error channel.
    pub fn without_specific_errors() -> Self {
        Self {
            specific_errors: false,
            ..Self::new()
        }
    }

    pub fn supports_specific_errors(&self) -> bool {
        self.specific_errors
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bind(&self, slot: Slot, callback: Callback) {
        let replay: Vec<Signal> = {
            let mut slots = self.lock();
            slots.bound.insert(slot, Arc::clone(&callback));
            if slots.held {
                return;
            }
            let (matching, rest): (Vec<Signal>, Vec<Signal>) = std::mem::take(&mut slots.backlog)
                .into_iter()
                .partition(|signal| signal.slot() == slot);
            slots.backlog = rest;
            matching
        };
        for signal in replay {
            callback(signal);
        }
    }

    /// Bind several slots as one step. Signals buffered before or during
    /// `bind` are replayed in arrival order once all of them are bound.
    pub fn bind_atomically<F>(&self, bind: F)
    where
        F: FnOnce(&Self),
    {
        self.lock().held = true;
        bind(self);
        loop {
            let replay: Vec<(Callback, Signal)> = {
                let mut slots = self.lock();
                let mut replay = Vec::new();
                let mut rest = Vec::new();
                for signal in std::mem::take(&mut slots.backlog) {
                    match slots.bound.get(&signal.slot()) {
                        Some(callback) => replay.push((Arc::clone(callback), signal)),
                        None => rest.push(signal),
                    }
                }
                slots.backlog = rest;
                if replay.is_empty() {
                    slots.held = false;
                    return;
                }
                replay
            };
            for (callback, signal) in replay {
                callback(signal);
            }
        }
    }

    /// Fire a signal. Callbacks run outside the slot lock.
    pub fn emit(&self, signal: Signal) {
        if signal.slot() == Slot::SpecificError && !self.specific_errors {
            debug!(?signal, "handle has no specific-error channel; signal dropped");
            return;
        }
        let callback = {
            let mut slots = self.lock();
            let bound = if slots.held {
                None
            } else {
                slots.bound.get(&signal.slot()).cloned()
            };
            match bound {
                Some(callback) => callback,
                None => {
                    slots.backlog.push(signal);
                    return;
                }
            }
        };
        callback(signal);
    }

    pub fn emit_link(&self, link: impl Into<String>) {
        self.emit(Signal::Link(link.into()));
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        self.emit(Signal::Error(message.into()));
    }

    pub fn emit_specific_error(&self, message: impl Into<String>) {
        self.emit(Signal::SpecificError(message.into()));
    }

    pub fn emit_participant_join(&self, participant: Participant) {
        self.emit(Signal::ParticipantJoin(participant));
    }

    pub fn emit_participant_leave(&self, participant: Participant) {
        self.emit(Signal::ParticipantLeave(participant));
    }

    pub fn on_link<F>(&self, f: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.bind(
            Slot::Link,
            Arc::new(move |signal| {
                if let Signal::Link(link) = signal {
                    f(link)
                }
            }),
        );
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.bind(
            Slot::Error,
            Arc::new(move |signal| {
                if let Signal::Error(message) = signal {
                    f(message)
                }
            }),
        );
    }

    /// Bind the specific-error slot. Returns `false` when the backend does
    /// not expose that channel.
    pub fn on_specific_error<F>(&self, f: F) -> bool
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        if !self.specific_errors {
            return false;
        }
        self.bind(
            Slot::SpecificError,
            Arc::new(move |signal| {
                if let Signal::SpecificError(message) = signal {
                    f(message)
                }
            }),
        );
        true
    }

    pub fn on_participant_join<F>(&self, f: F)
    where
        F: Fn(Participant) + Send + Sync + 'static,
    {
        self.bind(
            Slot::ParticipantJoin,
            Arc::new(move |signal| {
                if let Signal::ParticipantJoin(participant) = signal {
                    f(participant)
                }
            }),
        );
    }

    pub fn on_participant_leave<F>(&self, f: F)
    where
        F: Fn(Participant) + Send + Sync + 'static,
    {
        self.bind(
            Slot::ParticipantLeave,
            Arc::new(move |signal| {
                if let Signal::ParticipantLeave(participant) = signal {
                    f(participant)
                }
            }),
        );
    }

    /// Signals fired while no callback was bound for them.
    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }
}

/// The external provisioning call: returns a handle immediately and reports
/// the outcome later through its callback slots.
pub trait Provisioner: Send + Sync {
    fn provision(&self, request: ProvisionRequest) -> ProvisionHandle;
}

impl<F> Provisioner for F
where
    F: Fn(ProvisionRequest) -> ProvisionHandle + Send + Sync,
{
    fn provision(&self, request: ProvisionRequest) -> ProvisionHandle {
        self(request)
    }
}

/// Receiver of informational room events. Never affects settlement.
pub trait RoomObserver: Send + Sync {
    fn participant_joined(&self, _participant: &Participant) {}

    fn participant_left(&self, _participant: &Participant) {}
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl RoomObserver for LoggingObserver {
    fn participant_joined(&self, participant: &Participant) {
        info!(event = "room.participant_joined", id = participant.id, name = %participant.name);
    }

    fn participant_left(&self, participant: &Participant) {
        info!(event = "room.participant_left", id = participant.id, name = %participant.name);
    }
}
