//! Classification of LAM status snapshots into Q response and faults.

use crate::error::Fault;
use crate::registers::LamStatus;

/// Result of checking one status snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatusCheck {
    pub fault: Option<Fault>,
    pub q: bool,
}

impl StatusCheck {
    pub const fn is_ok(self) -> bool {
        self.fault.is_none()
    }
}

// Highest priority first.
const PRIORITY: [(LamStatus, Fault); 7] = [
    (LamStatus::TIMEOUT, Fault::HardwareTimeout),
    (LamStatus::SYNC_LOST, Fault::LostSynch),
    (LamStatus::LONG_PARITY, Fault::LongitudinalParity),
    (LamStatus::TRANS_PARITY, Fault::TransverseParity),
    (LamStatus::ADNR, Fault::CrateNotResponding),
    (LamStatus::CTRL_ERROR, Fault::ControllerError),
    (LamStatus::NO_X, Fault::NoXResponse),
];

/// Pick the fault reported by `status`, if any.
pub fn classify(status: LamStatus) -> Option<Fault> {
    if !status.intersects(LamStatus::ERROR) && status.contains(LamStatus::READY) {
        return None;
    }
    PRIORITY
        .iter()
        .find(|(bit, _)| status.contains(*bit))
        .map(|&(_, fault)| fault)
        .or_else(|| (!status.contains(LamStatus::READY)).then_some(Fault::NotReady))
}

/// Derive the Q response and fault of a completed operation.
///
/// Q is reported as 0 whenever a fault is found, whatever the no-Q bit says.
pub fn check_status(status: LamStatus) -> StatusCheck {
    match classify(status) {
        Some(fault) => StatusCheck {
            fault: Some(fault),
            q: false,
        },
        None => StatusCheck {
            fault: None,
            q: !status.contains(LamStatus::NO_Q),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: LamStatus = LamStatus::REPLY_READY;

    #[test]
    fn test_q_response() {
        assert_eq!(
            check_status(READY),
            StatusCheck {
                fault: None,
                q: true
            }
        );
        assert_eq!(
            check_status(READY | LamStatus::NO_Q),
            StatusCheck {
                fault: None,
                q: false
            }
        );
    }

    #[test]
    fn test_priority() {
        let status = READY | LamStatus::TIMEOUT | LamStatus::TRANS_PARITY;
        assert_eq!(check_status(status).fault, Some(Fault::HardwareTimeout));

        let status = READY | LamStatus::NO_X | LamStatus::ADNR | LamStatus::CTRL_ERROR;
        assert_eq!(classify(status), Some(Fault::CrateNotResponding));

        let status = READY | LamStatus::LONG_PARITY | LamStatus::SYNC_LOST;
        assert_eq!(classify(status), Some(Fault::LostSynch));

        // Every error outranks not-ready.
        assert_eq!(classify(LamStatus::NO_X), Some(Fault::NoXResponse));
        assert_eq!(classify(LamStatus::empty()), Some(Fault::NotReady));
    }

    #[test]
    fn test_fault_forces_no_q() {
        // NO_Q clear, but the fault wins.
        let check = check_status(READY | LamStatus::NO_X);
        assert_eq!(check.fault, Some(Fault::NoXResponse));
        assert!(!check.q);
        assert!(!check.is_ok());
    }

    #[test]
    fn test_ignored_bits() {
        // Demand and previous-demand-error bits don't affect the result.
        let check = check_status(READY | LamStatus::DEMAND | LamStatus::DMD_ERROR);
        assert!(check.is_ok());
        assert!(check.q);
    }
}
