//! Global admission gate for pack builds.
//!
//! One pack identifier holds the gate at a time, system-wide. Other identifiers queue in
//! arrival order; every waiter registered for the same identifier is woken together when that
//! identifier is promoted.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{EmojiGridError, EmojiGridResult};

#[derive(Debug)]
struct Waiter {
    id: u64,
    signal: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct GateState {
    holder: Option<String>,
    /// Distinct identifiers waiting for the gate. A promoted identifier stays at the head until
    /// it releases.
    queue: VecDeque<String>,
    waiters: HashMap<String, Vec<Waiter>>,
    next_waiter: u64,
    /// Callers currently admitted under `holder`.
    admitted: usize,
}

impl GateState {
    fn release(&mut self, pack: &str) {
        if self.holder.as_deref() != Some(pack) {
            return;
        }
        self.queue.retain(|p| p != pack);
        self.promote_next();
        tracing::debug!(pack, next = ?self.holder, "admission released");
    }

    /// One admitted caller is done; the gate moves on after the last one.
    fn leave(&mut self, pack: &str) {
        if self.holder.as_deref() != Some(pack) {
            return;
        }
        self.admitted = self.admitted.saturating_sub(1);
        if self.admitted == 0 {
            self.release(pack);
        }
    }

    fn promote_next(&mut self) {
        while let Some(next) = self.queue.front().cloned() {
            let waiters = self.waiters.remove(&next).unwrap_or_default();
            let mut woken = 0usize;
            for w in waiters {
                if w.signal.send(()).is_ok() {
                    woken += 1;
                }
            }
            if woken > 0 {
                tracing::debug!(pack = %next, waiters = woken, "admission promoted");
                self.holder = Some(next);
                self.admitted = woken;
                return;
            }
            // Every waiter for this identifier went away; nobody would ever release it.
            self.queue.pop_front();
        }
        self.holder = None;
        self.admitted = 0;
    }
}

/// Result of [`AdmissionGate::acquire`].
#[derive(Debug)]
pub enum Admission {
    /// The caller holds the gate and may build now.
    Ready,
    /// The caller must wait on the ticket.
    Wait(AdmissionTicket),
}

/// A registered wait for one pack identifier.
#[derive(Debug)]
pub struct AdmissionTicket {
    pack: String,
    waiter: u64,
    signal: oneshot::Receiver<()>,
}

impl AdmissionTicket {
    pub fn pack(&self) -> &str {
        &self.pack
    }

    /// Resolves once the ticket's identifier holds the gate.
    ///
    /// Returns `false` if the gate dropped the registration without promoting it.
    pub async fn wait(&mut self) -> bool {
        (&mut self.signal).await.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct AdmissionGate {
    state: Mutex<GateState>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes the gate for `pack`, or registers a wait for it.
    ///
    /// Re-entrant: the current holder is always admitted again.
    pub fn acquire(&self, pack: &str) -> Admission {
        let mut st = self.lock();
        match st.holder.as_deref() {
            None => {
                st.holder = Some(pack.to_string());
                st.admitted = 1;
                return Admission::Ready;
            }
            Some(h) if h == pack => {
                st.admitted += 1;
                return Admission::Ready;
            }
            Some(_) => {}
        }

        let (tx, rx) = oneshot::channel();
        st.next_waiter += 1;
        let waiter = st.next_waiter;
        st.waiters.entry(pack.to_string()).or_default().push(Waiter {
            id: waiter,
            signal: tx,
        });
        if !st.queue.iter().any(|p| p == pack) {
            st.queue.push_back(pack.to_string());
        }

        Admission::Wait(AdmissionTicket {
            pack: pack.to_string(),
            waiter,
            signal: rx,
        })
    }

    /// Gives the gate up for every caller admitted under `pack` and promotes the next waiting
    /// identifier. A no-op unless `pack` is the current holder.
    pub fn release(&self, pack: &str) {
        self.lock().release(pack);
    }

    /// Withdraws a ticket that will not be waited on any more.
    ///
    /// If the ticket was already signalled the caller was admitted without knowing it, so it
    /// leaves the gate on its own behalf.
    pub fn abandon(&self, mut ticket: AdmissionTicket) {
        self.withdraw(&mut ticket);
    }

    fn withdraw(&self, ticket: &mut AdmissionTicket) {
        let mut st = self.lock();
        if ticket.signal.try_recv().is_ok() {
            st.leave(&ticket.pack);
            return;
        }

        let now_empty = match st.waiters.get_mut(&ticket.pack) {
            Some(list) => {
                list.retain(|w| w.id != ticket.waiter);
                list.is_empty()
            }
            None => true,
        };
        if now_empty {
            st.waiters.remove(&ticket.pack);
            if st.holder.as_deref() != Some(ticket.pack.as_str()) {
                st.queue.retain(|p| *p != ticket.pack);
            }
        }
    }

    /// Waits for the gate and returns a permit that releases it on drop.
    pub async fn enter(
        self: &Arc<Self>,
        pack: &str,
        cancel: &CancellationToken,
    ) -> EmojiGridResult<AdmissionPermit> {
        if cancel.is_cancelled() {
            return Err(EmojiGridError::Cancelled);
        }

        if let Admission::Wait(ticket) = self.acquire(pack) {
            tracing::info!(pack, holder = ?self.holder(), "waiting for admission");
            // Withdrawn on every exit but admission, including this future being dropped.
            let mut pending = PendingAdmission {
                gate: self,
                ticket,
                armed: true,
            };
            let woke = tokio::select! {
                ok = pending.ticket.wait() => ok,
                _ = cancel.cancelled() => false,
            };
            if !woke {
                return Err(EmojiGridError::Cancelled);
            }
            pending.armed = false;
        }

        Ok(AdmissionPermit {
            gate: Arc::clone(self),
            pack: pack.to_string(),
        })
    }

    pub fn holder(&self) -> Option<String> {
        self.lock().holder.clone()
    }

    /// Identifiers waiting or promoted, in queue order.
    pub fn queued(&self) -> Vec<String> {
        self.lock().queue.iter().cloned().collect()
    }
}

struct PendingAdmission<'a> {
    gate: &'a AdmissionGate,
    ticket: AdmissionTicket,
    armed: bool,
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.withdraw(&mut self.ticket);
        }
    }
}

/// Admission for one caller. The gate moves on once every permit of the holder is dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
    pack: String,
}

impl AdmissionPermit {
    pub fn pack(&self) -> &str {
        &self.pack
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.lock().leave(&self.pack);
    }
}
