//! Interrupt service for the highway driver card.
//!
//! One interrupt line serves two conditions: the highway became ready while
//! a transaction waits for it, and a crate sent a demand message (a LAM).

use log::{debug, trace, warn};

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use crate::hwinfo::HardwareInfo;
use crate::registers::LamStatus;

/// Handler connected to an interrupt vector.
///
/// `on_interrupt` runs in interrupt context and must not block.
pub trait InterruptHandler: Send + Sync {
    fn on_interrupt(&self);
}

/// Receiver of demand messages, keyed by branch, crate and slot.
///
/// Called from interrupt context; must not block.
pub trait LamDispatcher: Send + Sync {
    fn dispatch(&self, branch: u8, crate_number: u8, slot: u8);
}

/// Decoded demand status register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Demand {
    pub crate_number: u8,
    pub slot: u8,
    /// Second demand message bit of the graded-LAM word
    pub m2: bool,
}

impl Demand {
    pub const fn decode(word: u16) -> Self {
        Self {
            crate_number: ((word >> 6) & 0x3f) as u8,
            slot: (word & 0x1f) as u8,
            m2: word & 0x20 != 0,
        }
    }

    pub const fn encode(self) -> u16 {
        (self.crate_number as u16 & 0x3f) << 6 | (self.m2 as u16) << 5 | (self.slot as u16 & 0x1f)
    }
}

/// Interrupt handler bound to one branch.
pub struct BranchInterrupt {
    info: Arc<HardwareInfo>,
    dispatcher: Arc<dyn LamDispatcher>,
}

impl BranchInterrupt {
    pub fn new(info: Arc<HardwareInfo>, dispatcher: Arc<dyn LamDispatcher>) -> Self {
        Self { info, dispatcher }
    }
}

impl InterruptHandler for BranchInterrupt {
    fn on_interrupt(&self) {
        let regs = self.info.registers();

        let mut state = self.info.lock_wait();
        let status = regs.lam_status();
        if state.waiting && status.contains(LamStatus::READY) {
            regs.disarm(LamStatus::READY);
            self.info.signal_ready(&mut state, status);
        }
        drop(state);

        if status.contains(LamStatus::DEMAND) {
            regs.clear_status(LamStatus::DEMAND);
            let demand = Demand::decode(regs.demand_status());
            trace!(
                "Branch {}: demand from C{} N{}",
                self.info.branch(),
                demand.crate_number,
                demand.slot
            );
            self.dispatcher
                .dispatch(self.info.branch(), demand.crate_number, demand.slot);
        }

        regs.enable_interrupts(true);
    }
}

/// A demand message received from a crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LamEvent {
    pub branch: u8,
    pub crate_number: u8,
    pub slot: u8,
}

/// Bounded queue of LAM events for a monitor thread.
///
/// Events arriving while the queue is full are dropped and logged.
pub struct LamQueue {
    tx: SyncSender<LamEvent>,
}

impl LamQueue {
    pub fn new(depth: usize) -> (Self, Receiver<LamEvent>) {
        let (tx, rx) = sync_channel(depth);
        (Self { tx }, rx)
    }
}

impl LamDispatcher for LamQueue {
    fn dispatch(&self, branch: u8, crate_number: u8, slot: u8) {
        let event = LamEvent {
            branch,
            crate_number,
            slot,
        };
        match self.tx.try_send(event) {
            Ok(()) => (),
            Err(TrySendError::Full(event)) => warn!("LAM queue full, dropped {:?}", event),
            Err(TrySendError::Disconnected(event)) => {
                debug!("LAM queue closed, dropped {:?}", event)
            }
        }
    }
}

/// Ignores demand messages.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoDispatch;

impl LamDispatcher for NoDispatch {
    fn dispatch(&self, _branch: u8, _crate_number: u8, _slot: u8) {}
}
