//! Waiting for the reply message of a CAMAC operation.
//!
//! Fast highways answer within a few status reads, so the wait first polls
//! the LAM status register. Once the calibrated number of reads has passed
//! without a reply, the ready interrupt is armed and the caller sleeps until
//! the interrupt handler releases it, or the reply timeout runs out.

use log::{trace, warn};

use crate::hwinfo::HardwareInfo;
use crate::registers::LamStatus;

/// Derive the busy-wait limit from the status reads a reply took at init.
///
/// Highways slower than `cutoff` get a limit of 1, i.e. they always wait for
/// the interrupt. Faster ones poll for twice the measured time.
pub fn calibrate(measured: u32, cutoff: u32) -> u32 {
    if polls_replies(measured, cutoff) {
        measured.saturating_mul(2)
    } else {
        1
    }
}

/// Whether a highway measured at `measured` status reads is fast enough to
/// poll for replies.
pub const fn polls_replies(measured: u32, cutoff: u32) -> bool {
    measured <= cutoff
}

/// Wait for the reply to the operation just started on the branch and
/// return the LAM status.
///
/// On timeout the returned status has the ready bit cleared.
pub fn wait_reply(info: &HardwareInfo) -> LamStatus {
    let regs = info.registers();
    let mut polls = 0;
    loop {
        let status = regs.lam_status();
        if status.is_reply_ready() {
            return status;
        }
        polls += 1;
        if polls > info.busy_wait_limit() {
            return wait_interrupt(info);
        }
    }
}

fn wait_interrupt(info: &HardwareInfo) -> LamStatus {
    let regs = info.registers();
    let mut state = info.lock_wait();
    state.waiting = true;
    regs.arm(LamStatus::READY);
    trace!("Branch {}: waiting for ready interrupt", info.branch());

    let mut state = info.wait_ready(state);
    if state.signaled {
        state.signaled = false;
        return state.last_status;
    }

    state.waiting = false;
    regs.disarm(LamStatus::READY);
    // Drain a signal that raced the timeout.
    state.signaled = false;
    drop(state);
    warn!(
        "Branch {}: no ready interrupt within {:?}",
        info.branch(),
        info.reply_timeout()
    );
    regs.lam_status() - LamStatus::READY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{ReadRegister, RegisterBackend, WriteRegister};
    use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Reports ready after a fixed number of status reads.
    struct Polled {
        reads: AtomicU32,
        ready_after: u32,
        arms: AtomicU32,
        disarms: AtomicU32,
    }

    impl Polled {
        fn new(ready_after: u32) -> Arc<Self> {
            Arc::new(Self {
                reads: AtomicU32::new(0),
                ready_after,
                arms: AtomicU32::new(0),
                disarms: AtomicU32::new(0),
            })
        }
    }

    impl RegisterBackend for Polled {
        fn read_register(&self, offset: usize) -> u16 {
            assert_eq!(offset, ReadRegister::LamStatus.offset());
            let n = self.reads.fetch_add(1, SeqCst);
            if n >= self.ready_after {
                LamStatus::REPLY_READY.bits()
            } else {
                LamStatus::NO_Q.bits()
            }
        }

        fn write_register(&self, offset: usize, value: u16) {
            assert_eq!(value, LamStatus::READY.bits());
            if offset == WriteRegister::SelectiveSetMask.offset() {
                self.arms.fetch_add(1, SeqCst);
            } else if offset == WriteRegister::SelectiveClearMask.offset() {
                self.disarms.fetch_add(1, SeqCst);
            }
        }
    }

    #[test]
    fn test_calibrate() {
        assert_eq!(calibrate(0, 100), 0);
        assert_eq!(calibrate(7, 100), 14);
        assert_eq!(calibrate(100, 100), 200);
        assert_eq!(calibrate(101, 100), 1);
        assert_eq!(calibrate(999_999, 100), 1);
        // A reply on the first poll is still a fast highway.
        assert!(polls_replies(0, 100));
        assert!(polls_replies(100, 100));
        assert!(!polls_replies(101, 100));
    }

    #[test]
    fn test_busy_wait() {
        let regs = Polled::new(5);
        let info = HardwareInfo::new(0, regs.clone(), 10, true, Duration::from_secs(1));
        assert_eq!(wait_reply(&info), LamStatus::REPLY_READY);
        assert_eq!(regs.reads.load(SeqCst), 6);
        assert_eq!(regs.arms.load(SeqCst), 0);
    }

    #[test]
    fn test_timeout_clears_ready() {
        let regs = Polled::new(u32::MAX);
        let info = HardwareInfo::new(0, regs.clone(), 3, true, Duration::from_millis(20));
        let status = wait_reply(&info);
        assert!(!status.contains(LamStatus::READY));
        assert_eq!(regs.arms.load(SeqCst), 1);
        assert_eq!(regs.disarms.load(SeqCst), 1);
        assert!(!info.is_waiting());
    }

    #[test]
    fn test_interrupt_release() {
        let regs = Polled::new(u32::MAX);
        let info = Arc::new(HardwareInfo::new(
            0,
            regs.clone(),
            1,
            false,
            Duration::from_secs(5),
        ));
        let latched = LamStatus::REPLY_READY | LamStatus::NO_Q;

        let isr = {
            let info = Arc::clone(&info);
            thread::spawn(move || loop {
                let mut state = info.lock_wait();
                if state.waiting {
                    info.signal_ready(&mut state, latched);
                    return;
                }
                drop(state);
                thread::sleep(Duration::from_millis(1));
            })
        };
        assert_eq!(wait_reply(&info), latched);
        isr.join().unwrap();
        assert_eq!(regs.arms.load(SeqCst), 1);
        assert_eq!(regs.disarms.load(SeqCst), 0);
        // Two reads: the first poll and the one that exceeded the limit.
        assert_eq!(regs.reads.load(SeqCst), 2);
    }
}
