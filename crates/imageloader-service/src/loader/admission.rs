//! First come, first served admission control.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// Limits how many loads run at the same time.
///
/// Slots are granted at [`enter`](Admission::enter) time when one is free. Otherwise the
/// caller joins a FIFO wait list, and a released slot is handed directly to the oldest
/// waiter without ever becoming free in between. The active count therefore never
/// exceeds `max`, and waiters are released exactly once, in arrival order.
pub struct Admission {
    max: usize,
    state: Mutex<AdmissionState>,
}

#[derive(Default)]
struct AdmissionState {
    active: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Admission {
    /// Creates admission control with `max` slots. A `max` of `0` is treated as `1`.
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max: max.max(1),
            state: Mutex::default(),
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Requests a slot.
    ///
    /// The request is registered immediately, so the order of `enter` calls is the order
    /// in which slots are granted.
    pub fn enter(self: &Arc<Self>) -> Ticket {
        let mut state = self.lock();
        if state.active < self.max {
            state.active += 1;
            Ticket::Ready(Permit::new(self))
        } else {
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            metric!(gauge("loads.queued") = state.waiters.len() as u64);
            Ticket::Queued(Waiter {
                admission: Arc::clone(self),
                receiver: Some(receiver),
            })
        }
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Number of requests waiting for a slot.
    pub fn pending(&self) -> usize {
        self.lock()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }

    /// Hands the slot to the oldest waiter still listening, or frees it.
    fn release(&self) {
        let mut state = self.lock();
        while let Some(next) = state.waiters.pop_front() {
            if next.send(()).is_ok() {
                metric!(gauge("loads.queued") = state.waiters.len() as u64);
                return;
            }
        }
        state.active -= 1;
        metric!(gauge("loads.queued") = 0u64);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Admission")
            .field("max", &self.max)
            .field("active", &state.active)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// A held admission slot, released on drop.
pub struct Permit {
    admission: Arc<Admission>,
}

impl Permit {
    fn new(admission: &Arc<Admission>) -> Self {
        Self {
            admission: Arc::clone(admission),
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.admission.release();
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

/// The outcome of [`Admission::enter`].
#[derive(Debug)]
pub enum Ticket {
    /// A slot was free and is now held.
    Ready(Permit),
    /// The request waits for a slot to be handed over.
    Queued(Waiter),
}

impl Ticket {
    /// Waits until the slot is granted.
    ///
    /// Returns `None` if the slot can no longer be handed over.
    pub async fn wait(self) -> Option<Permit> {
        match self {
            Self::Ready(permit) => Some(permit),
            Self::Queued(mut waiter) => waiter.granted().await,
        }
    }
}

/// A queued request for a slot.
///
/// A slot handed over to a waiter that is dropped before taking it is released again.
pub struct Waiter {
    admission: Arc<Admission>,
    receiver: Option<oneshot::Receiver<()>>,
}

impl Waiter {
    async fn granted(&mut self) -> Option<Permit> {
        let receiver = self.receiver.as_mut()?;
        receiver.await.ok()?;
        self.receiver = None;
        Some(Permit::new(&self.admission))
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if receiver.try_recv().is_ok() {
                self.admission.release();
            }
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("granted", &self.receiver.is_none())
            .finish_non_exhaustive()
    }
}
