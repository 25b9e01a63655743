//! In-memory provisioning backend (testing and dry runs)
//!
//! `ScriptedProvisioner` answers every `provision` call with a handle that
//! replays a timed script of signals. Steps at offset zero are fired before
//! the handle is returned, the rest from a spawned tokio task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::handle::{Participant, ProvisionHandle, ProvisionRequest, Provisioner, Signal};

/// One scripted signal and its offset from the `provision` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub at: Duration,
    pub signal: Signal,
}

impl ScriptStep {
    pub fn link(at: Duration, link: impl Into<String>) -> Self {
        Self {
            at,
            signal: Signal::Link(link.into()),
        }
    }

    pub fn error(at: Duration, message: impl Into<String>) -> Self {
        Self {
            at,
            signal: Signal::Error(message.into()),
        }
    }

    pub fn specific_error(at: Duration, message: impl Into<String>) -> Self {
        Self {
            at,
            signal: Signal::SpecificError(message.into()),
        }
    }

    pub fn join(at: Duration, participant: Participant) -> Self {
        Self {
            at,
            signal: Signal::ParticipantJoin(participant),
        }
    }

    pub fn leave(at: Duration, participant: Participant) -> Self {
        Self {
            at,
            signal: Signal::ParticipantLeave(participant),
        }
    }
}

/// Backend whose n-th call plays the n-th script; calls past the end
/// replay the last one. An empty script models a silent backend.
#[derive(Debug)]
pub struct ScriptedProvisioner {
    scripts: Vec<Vec<ScriptStep>>,
    specific_errors: bool,
    calls: AtomicU32,
    requests: Mutex<Vec<ProvisionRequest>>,
}

impl ScriptedProvisioner {
    pub fn sequence(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts,
            specific_errors: true,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same script on every call.
    pub fn always(script: Vec<ScriptStep>) -> Self {
        Self::sequence(vec![script])
    }

    /// Never fires anything.
    pub fn silent() -> Self {
        Self::always(Vec::new())
    }

    /// Hand out handles without a specific-error channel.
    pub fn without_specific_errors(mut self) -> Self {
        self.specific_errors = false;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ProvisionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn script_for(&self, call: usize) -> Vec<ScriptStep> {
        self.scripts
            .get(call)
            .or_else(|| self.scripts.last())
            .cloned()
            .unwrap_or_default()
    }
}

impl Provisioner for ScriptedProvisioner {
    fn provision(&self, request: ProvisionRequest) -> ProvisionHandle {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        let handle = if self.specific_errors {
            ProvisionHandle::new()
        } else {
            ProvisionHandle::without_specific_errors()
        };

        let (immediate, delayed): (Vec<ScriptStep>, Vec<ScriptStep>) = self
            .script_for(call)
            .into_iter()
            .partition(|step| step.at.is_zero());
        for step in immediate {
            handle.emit(step.signal);
        }

        if !delayed.is_empty() {
            let backend = handle.clone();
            let start = tokio::time::Instant::now();
            tokio::spawn(async move {
                let mut delayed = delayed;
                delayed.sort_by_key(|step| step.at);
                for step in delayed {
                    tokio::time::sleep_until(start + step.at).await;
                    backend.emit(step.signal);
                }
            });
        }

        handle
    }
}
