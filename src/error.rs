//! Error types returned by the highway driver.

use snafu::Snafu;

use core::fmt;

use crate::types::{Cnaf, Error as TypeError};

/// A hardware or protocol condition reported for one CAMAC operation.
///
/// Variants are listed in classification priority order: when a status
/// snapshot carries several error bits, the first matching variant wins.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// No reply message came back around the highway.
    HardwareTimeout,
    /// The highway driver lost byte or bit synchronization.
    LostSynch,
    LongitudinalParity,
    TransverseParity,
    /// No crate answered to the address.
    CrateNotResponding,
    /// The serial crate controller reported an error.
    ControllerError,
    /// The addressed module did not accept the command (X = 0).
    NoXResponse,
    /// The highway driver never came ready.
    NotReady,
    /// A repeat-until-Q transfer ran out of retries.
    WaitQTimeout,
}

/// Which part of the highway a fault is charged against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Branch,
    Crate,
    Slot,
}

impl Fault {
    pub const fn scope(self) -> Scope {
        match self {
            Fault::HardwareTimeout
            | Fault::LostSynch
            | Fault::LongitudinalParity
            | Fault::TransverseParity
            | Fault::NotReady => Scope::Branch,
            Fault::CrateNotResponding | Fault::ControllerError => Scope::Crate,
            Fault::NoXResponse | Fault::WaitQTimeout => Scope::Slot,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Fault::HardwareTimeout => "Serial highway timeout",
            Fault::LostSynch => "Serial highway lost synch",
            Fault::LongitudinalParity => "Longitudinal parity error",
            Fault::TransverseParity => "Transverse parity error",
            Fault::CrateNotResponding => "Crate controller not responding",
            Fault::ControllerError => "Error detected by crate controller",
            Fault::NoXResponse => "No X response",
            Fault::NotReady => "Serial highway driver not ready",
            Fault::WaitQTimeout => "Timed out waiting for Q",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error type for highway operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A CAMAC operation failed on the highway.
    #[snafu(display("{} at {}", fault, cnaf))]
    Highway { fault: Fault, cnaf: Cnaf },
    /// The branch was never initialized, or its initialization failed.
    #[snafu(display("No highway driver for branch {}", branch))]
    NoHardware { branch: u8 },
    /// An address or function argument is out of range.
    #[snafu(context(false), display("Invalid argument: {}", source))]
    InvalidArgument { source: TypeError },
    /// The starting address of a scan is above the ending address.
    #[snafu(display("Starting address is above the ending address"))]
    BadAddressSpec,
    /// The addresses of a scan or action list span more than one branch.
    #[snafu(display("Multiple branches not supported"))]
    MultiBranch,
    /// The addresses of a scan span more than one crate.
    #[snafu(display("Multiple crates not supported"))]
    MultiCrate,
    /// The requested repeat count is zero.
    #[snafu(display("Invalid repeat count"))]
    BadRepeatCount,
    /// The data buffer can't hold the requested number of words.
    #[snafu(display("Data buffer holds {} words, {} requested", len, requested))]
    BufferTooSmall { len: usize, requested: usize },
    /// No card answered at the bus address of the branch.
    #[snafu(display("No highway driver card at {:#06x} for branch {}", address, branch))]
    CardNotFound { branch: u8, address: usize },
    /// A card answered, but it is not a Hytec VSD2992.
    #[snafu(display(
        "Card for branch {} is not a VSD2992 (id {:#06x}, module {})",
        branch,
        id,
        module
    ))]
    WrongCard { branch: u8, id: u16, module: u16 },
    /// The highway never came ready during calibration, or reported a broken loop.
    #[snafu(display("Serial highway on branch {} is broken", branch))]
    HighwayBroken { branch: u8 },
    #[snafu(display("Can't connect interrupt vector {:#04x}", vector))]
    InterruptConnect { vector: u8, source: std::io::Error },
}

impl Error {
    /// The highway fault behind this error, if any.
    pub fn fault(&self) -> Option<Fault> {
        match self {
            Error::Highway { fault, .. } => Some(*fault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_scope() {
        assert_eq!(Fault::HardwareTimeout.scope(), Scope::Branch);
        assert_eq!(Fault::NotReady.scope(), Scope::Branch);
        assert_eq!(Fault::CrateNotResponding.scope(), Scope::Crate);
        assert_eq!(Fault::NoXResponse.scope(), Scope::Slot);
        assert_eq!(Fault::WaitQTimeout.scope(), Scope::Slot);
    }

    #[test]
    fn test_display() {
        let err = Error::Highway {
            fault: Fault::NoXResponse,
            cnaf: Cnaf::from_bits(0x0001_0600),
        };
        assert_eq!(err.to_string(), "No X response at B(0) C(1) N(3) A(0) F(0)");
        assert_eq!(err.fault(), Some(Fault::NoXResponse));
        let err: Error = TypeError::InvalidSlot.into();
        assert_eq!(err.to_string(), "Invalid argument: Invalid slot");
        assert_eq!(err.fault(), None);
    }
}
