use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::sink::EventSink;
use crate::state::StateMachine;
use crate::stream::StreamCloseHandle;
use crate::types::{ClientState, Outcome};

pub const CANCELLED_NOTICE: &str = "Request cancelled.";

/// Everything that has to be torn down to stop the active request.
struct RequestHandle {
    epoch: u64,
    transport: Option<AbortHandle>,
    stream: Option<StreamCloseHandle>,
    reader: Option<AbortHandle>,
    outcome: Option<oneshot::Sender<Outcome>>,
}

impl RequestHandle {
    fn resolve(&mut self, outcome: Outcome) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }

    fn teardown(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.abort();
        }
    }
}

#[derive(Default)]
struct Slot {
    state: StateMachine,
    active: Option<RequestHandle>,
    next_epoch: u64,
}

impl Slot {
    fn active_mut(&mut self, epoch: u64) -> Option<&mut RequestHandle> {
        self.active.as_mut().filter(|handle| handle.epoch == epoch)
    }
}

/// Owns the cancellation flag and the single active request slot.
///
/// Every state transition and every presentation event for a request goes
/// through the slot lock and is checked against the request's epoch, so a
/// cancelled or finished request can never emit again.
pub(crate) struct Coordinator {
    cancelled: Arc<AtomicBool>,
    slot: Mutex<Slot>,
    sink: Arc<dyn EventSink>,
}

impl Coordinator {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            slot: Mutex::new(Slot::default()),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ClientState {
        self.lock().state.current()
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Idle -> Running. Rejects without touching the active request when one
    /// is already running.
    pub(crate) fn begin(&self) -> Result<(u64, oneshot::Receiver<Outcome>)> {
        let mut slot = self.lock();
        if let Err(err) = slot.state.begin() {
            warn!("rejected dispatch while a request is running");
            return Err(err);
        }
        self.cancelled.store(false, Ordering::SeqCst);

        slot.next_epoch = slot.next_epoch.wrapping_add(1);
        let epoch = slot.next_epoch;
        let (tx, rx) = oneshot::channel();
        slot.active = Some(RequestHandle {
            epoch,
            transport: None,
            stream: None,
            reader: None,
            outcome: Some(tx),
        });
        self.sink.on_state_change(ClientState::Running);
        debug!(epoch, "request slot opened");
        Ok((epoch, rx))
    }

    pub(crate) fn attach_transport(&self, epoch: u64, transport: AbortHandle) {
        let mut slot = self.lock();
        match slot.active_mut(epoch) {
            Some(handle) => handle.transport = Some(transport),
            // Cancelled before the task was registered, or already finished.
            None => transport.abort(),
        }
    }

    /// Returns false when the request is no longer current; the stream and
    /// reader are released immediately in that case.
    pub(crate) fn attach_stream(
        &self,
        epoch: u64,
        stream: StreamCloseHandle,
        reader: AbortHandle,
    ) -> bool {
        let mut slot = self.lock();
        match slot.active_mut(epoch) {
            Some(handle) => {
                handle.stream = Some(stream);
                handle.reader = Some(reader);
                true
            }
            None => {
                stream.close();
                reader.abort();
                false
            }
        }
    }

    /// Delivers events for `epoch` if it is still the active request.
    pub(crate) fn emit(&self, epoch: u64, deliver: impl FnOnce(&dyn EventSink)) -> bool {
        let slot = self.lock();
        let current = slot
            .active
            .as_ref()
            .is_some_and(|handle| handle.epoch == epoch);
        if current {
            deliver(self.sink.as_ref());
        }
        current
    }

    /// Running -> Idle for `epoch`, emitting `last` first. A no-op when the
    /// request was already cancelled or finished.
    pub(crate) fn finish(
        &self,
        epoch: u64,
        outcome: Outcome,
        last: impl FnOnce(&dyn EventSink),
    ) -> bool {
        let mut slot = self.lock();
        if slot.active_mut(epoch).is_none() {
            debug!(epoch, "request already settled");
            return false;
        }
        let Some(mut handle) = slot.active.take() else {
            return false;
        };

        last(self.sink.as_ref());
        if slot.state.finish() {
            self.sink.on_state_change(ClientState::Idle);
        }
        debug!(epoch, ?outcome, "request finished");
        handle.resolve(outcome);
        true
    }

    /// Idempotent. Returns whether a running request was cancelled.
    pub(crate) fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);

        let mut slot = self.lock();
        let Some(mut handle) = slot.active.take() else {
            debug!("cancel with no active request");
            return false;
        };
        handle.teardown();

        self.sink.on_system_message(CANCELLED_NOTICE);
        if slot.state.finish() {
            self.sink.on_state_change(ClientState::Idle);
        }
        info!(epoch = handle.epoch, "request cancelled");
        handle.resolve(Outcome::Cancelled);
        true
    }
}
