//! Per-branch runtime state of an initialized highway driver.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::registers::{LamStatus, RegisterBackend, Registers};

/// State shared between a waiting transaction and the interrupt handler.
///
/// The mutex stands in for masking interrupts: the waiter holds it while
/// arming the ready interrupt, the handler holds it while releasing the waiter.
#[derive(Debug, Default)]
pub(crate) struct WaitState {
    /// A transaction has armed the ready interrupt and is blocked.
    pub waiting: bool,
    /// The ready semaphore. At most one pending signal.
    pub signaled: bool,
    /// Status latched by the handler when it signals.
    pub last_status: LamStatus,
}

/// Hardware information for one branch.
///
/// Created once by branch initialization and kept for the life of the
/// registry. Only the wait state changes after creation.
pub struct HardwareInfo {
    branch: u8,
    registers: Arc<dyn RegisterBackend>,
    busy_wait_limit: u32,
    fast: bool,
    reply_timeout: Duration,
    wait: Mutex<WaitState>,
    ready: Condvar,
}

impl HardwareInfo {
    pub fn new(
        branch: u8,
        registers: Arc<dyn RegisterBackend>,
        busy_wait_limit: u32,
        fast: bool,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            branch,
            registers,
            busy_wait_limit,
            fast,
            reply_timeout,
            wait: Mutex::new(WaitState::default()),
            ready: Condvar::new(),
        }
    }

    pub fn branch(&self) -> u8 {
        self.branch
    }

    pub fn registers(&self) -> Registers<'_> {
        Registers::new(self.registers.as_ref())
    }

    /// Status reads spent polling before falling back to the ready interrupt.
    pub fn busy_wait_limit(&self) -> u32 {
        self.busy_wait_limit
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Whether the branch polls for replies instead of taking interrupts.
    pub fn is_fast(&self) -> bool {
        self.fast
    }

    /// Whether a transaction is blocked waiting for the ready interrupt.
    pub fn is_waiting(&self) -> bool {
        self.lock_wait().waiting
    }

    pub(crate) fn lock_wait(&self) -> MutexGuard<'_, WaitState> {
        self.wait.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the ready semaphore is signaled or the reply timeout runs out.
    pub(crate) fn wait_ready<'a>(
        &'a self,
        state: MutexGuard<'a, WaitState>,
    ) -> MutexGuard<'a, WaitState> {
        let (state, _) = self
            .ready
            .wait_timeout_while(state, self.reply_timeout, |s| !s.signaled)
            .unwrap_or_else(PoisonError::into_inner);
        state
    }

    /// Latch `status` and release the waiter. Called with the wait state locked.
    pub(crate) fn signal_ready(&self, state: &mut WaitState, status: LamStatus) {
        state.waiting = false;
        state.last_status = status;
        state.signaled = true;
        self.ready.notify_one();
    }
}

impl fmt::Debug for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareInfo")
            .field("branch", &self.branch)
            .field("busy_wait_limit", &self.busy_wait_limit)
            .field("fast", &self.fast)
            .field("reply_timeout", &self.reply_timeout)
            .finish_non_exhaustive()
    }
}
