use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::task::AbortHandle;

use crate::rooms::RoomId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    Ring,
    /// Waiting for this participant to come back.
    Grace(String),
    Linger,
}

/// At most one pending timer per room. Scheduling a new one aborts whatever
/// was pending, so a superseded timer never gets to fire.
#[derive(Debug, Default)]
pub struct RoomTimers {
    pending: DashMap<RoomId, (TimerKind, AbortHandle)>,
}

impl RoomTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fire` after `after` unless cancelled or replaced first.
    ///
    /// `fire` is synchronous: once the sleep completes nothing else is
    /// awaited, so the task cannot be interrupted halfway through a callback
    /// that replaces its own timer. The room's slot stays locked until the
    /// handle is stored, so even a zero delay cannot fire ahead of it.
    pub fn schedule<F>(&self, room_id: &RoomId, kind: TimerKind, after: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let spawn = move || {
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                fire();
            })
            .abort_handle()
        };

        match self.pending.entry(room_id.clone()) {
            Entry::Occupied(mut slot) => {
                let (_, previous) = slot.insert((kind, spawn()));
                previous.abort();
            }
            Entry::Vacant(slot) => {
                slot.insert((kind, spawn()));
            }
        }
    }

    pub fn cancel(&self, room_id: &RoomId) -> Option<TimerKind> {
        let (_, (kind, handle)) = self.pending.remove(room_id)?;
        handle.abort();
        Some(kind)
    }

    /// Cancels only if the pending timer is exactly `kind`.
    pub fn cancel_kind(&self, room_id: &RoomId, kind: &TimerKind) -> bool {
        match self.pending.remove_if(room_id, |_, (pending, _)| pending == kind) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self, room_id: &RoomId) -> Option<TimerKind> {
        self.pending.get(room_id).map(|entry| entry.0.clone())
    }
}
