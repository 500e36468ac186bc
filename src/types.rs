//! This module defines range-checked types for CAMAC addresses and the
//! packed channel and CNAF words used to load the highway driver.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::TryInto;
use core::fmt;
use core::ops::Deref;

use crate::registers::naf;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid branch number.
    #[snafu(display("Invalid branch"))]
    InvalidBranch,
    /// The value isn't a valid serial crate number.
    #[snafu(display("Invalid crate"))]
    InvalidCrate,
    /// The value isn't a valid slot (station) number.
    #[snafu(display("Invalid slot"))]
    InvalidSlot,
    /// The value isn't a valid subaddress.
    #[snafu(display("Invalid subaddress"))]
    InvalidSubaddress,
    /// The value isn't a valid CAMAC function code.
    #[snafu(display("Invalid function"))]
    InvalidFunction,
}

const fn invalid_branch() -> InvalidBranchSnafu {
    InvalidBranchSnafu
}

const fn invalid_crate() -> InvalidCrateSnafu {
    InvalidCrateSnafu
}

const fn invalid_slot() -> InvalidSlotSnafu {
    InvalidSlotSnafu
}

const fn invalid_subaddress() -> InvalidSubaddressSnafu {
    InvalidSubaddressSnafu
}

const fn invalid_function() -> InvalidFunctionSnafu {
    InvalidFunctionSnafu
}

/// Number of branch table entries.
pub const MAX_BRANCHES: usize = 8;
pub const MIN_CRATE: u8 = 1;
/// Highest serial crate address.
pub const MAX_CRATE: u8 = 62;
/// Highest slot holding a normal module.
pub const MAX_NORMAL_SLOT: u8 = 23;
/// Slot of the serial crate controller.
pub const SCC_SLOT: u8 = 30;
pub const MAX_SUBADDRESS: u8 = 15;
pub const MAX_FUNCTION: u8 = 31;

macro_rules! deref_u8 {
    ($t:ty) => {
        impl Deref for $t {
            type Target = u8;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl PartialEq<u8> for $t {
            fn eq(&self, other: &u8) -> bool {
                self.0 == *other
            }
        }
    };
}

/// Branch is a range-checked index of a highway driver card, [0, 7].
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Branch(u8);

impl Branch {
    /// # Errors
    /// Returns [`Error::InvalidBranch`] if `branch` is out of range.
    pub fn new(branch: impl TryInto<u8>) -> Result<Self, Error> {
        let branch = branch.try_into().ok().with_context(invalid_branch)?;
        ensure!((branch as usize) < MAX_BRANCHES, invalid_branch());
        Ok(Self(branch))
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

deref_u8!(Branch);

/// Crate is a range-checked serial crate address, [1, 62].
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Crate(u8);

impl Crate {
    /// # Errors
    /// Returns [`Error::InvalidCrate`] if `crate_number` is out of range.
    pub fn new(crate_number: impl TryInto<u8>) -> Result<Self, Error> {
        let c = crate_number.try_into().ok().with_context(invalid_crate)?;
        ensure!((MIN_CRATE..=MAX_CRATE).contains(&c), invalid_crate());
        Ok(Self(c))
    }
}

deref_u8!(Crate);

/// Slot is a module station number: [1, 23], or 30 for the crate controller.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Slot(u8);

impl Slot {
    /// # Errors
    /// Returns [`Error::InvalidSlot`] if `slot` is neither a module slot nor
    /// the crate controller slot.
    pub fn new(slot: impl TryInto<u8>) -> Result<Self, Error> {
        let n = slot.try_into().ok().with_context(invalid_slot)?;
        ensure!(
            (1..=MAX_NORMAL_SLOT).contains(&n) || n == SCC_SLOT,
            invalid_slot()
        );
        Ok(Self(n))
    }
}

deref_u8!(Slot);

/// Subaddress is a range-checked [0, 15] integer.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Subaddress(u8);

impl Subaddress {
    /// # Errors
    /// Returns [`Error::InvalidSubaddress`] if `a` is out of range.
    pub fn new(a: impl TryInto<u8>) -> Result<Self, Error> {
        let a = a.try_into().ok().with_context(invalid_subaddress)?;
        ensure!(a <= MAX_SUBADDRESS, invalid_subaddress());
        Ok(Self(a))
    }
}

deref_u8!(Subaddress);

/// Function is a CAMAC function code, [0, 31].
///
/// F0-F7 read data from a module, F16-F23 write data to it, the rest are
/// control functions that transfer no data.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Function(u8);

/// Create a new [`Function`], panics if it is out of range.
pub const fn func(f: u8) -> Function {
    if f <= MAX_FUNCTION {
        return Function(f);
    }
    panic!("Invalid function.")
}

impl Function {
    /// # Errors
    /// Returns [`Error::InvalidFunction`] if `f` is out of range.
    pub fn new(f: impl TryInto<u8>) -> Result<Self, Error> {
        let f = f.try_into().ok().with_context(invalid_function)?;
        ensure!(f <= MAX_FUNCTION, invalid_function());
        Ok(Self(f))
    }

    pub const fn is_read(self) -> bool {
        self.0 < 8
    }

    pub const fn is_write(self) -> bool {
        self.0 & 0x18 == 0x10
    }

    pub const fn is_control(self) -> bool {
        !self.is_read() && !self.is_write()
    }

    /// Whether the function moves a data word.
    pub const fn has_data(self) -> bool {
        !self.is_control()
    }
}

deref_u8!(Function);


/// Packed CAMAC channel variable: branch, crate, slot and subaddress.
///
/// Layout: branch in bits [31:24], crate in [23:16], slot in [13:9] and
/// subaddress in [8:5]. The function bits [4:0] are always zero.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Channel(u32);

impl Channel {
    /// Pack a channel variable from its parts, checking every field.
    /// # Errors
    /// Returns the [`Error`] for the first out-of-range field.
    pub fn new(
        branch: impl TryInto<u8>,
        crate_number: impl TryInto<u8>,
        slot: impl TryInto<u8>,
        subaddress: impl TryInto<u8>,
    ) -> Result<Self, Error> {
        Ok(Self::from_parts(
            Branch::new(branch)?,
            Crate::new(crate_number)?,
            Slot::new(slot)?,
            Subaddress::new(subaddress)?,
        ))
    }

    pub const fn from_parts(b: Branch, c: Crate, n: Slot, a: Subaddress) -> Self {
        Self((b.0 as u32) << 24 | (c.0 as u32) << 16 | (n.0 as u32) << 9 | (a.0 as u32) << 5)
    }

    /// Unpack the channel variable into branch, crate, slot and subaddress.
    pub const fn unpack(self) -> (Branch, Crate, Slot, Subaddress) {
        (
            Branch((self.0 >> 24) as u8),
            Crate((self.0 >> 16) as u8),
            Slot(((self.0 & naf::N_MASK) >> 9) as u8),
            Subaddress(((self.0 & naf::A_MASK) >> 5) as u8),
        )
    }

    pub const fn branch(self) -> Branch {
        Branch((self.0 >> 24) as u8)
    }

    pub const fn crate_number(self) -> Crate {
        Crate((self.0 >> 16) as u8)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn with_function(self, f: Function) -> Cnaf {
        Cnaf(self.0 | f.0 as u32)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (b, c, n, a) = self.unpack();
        write!(f, "B{} C{} N{} A{}", b.0, c.0, n.0, a.0)
    }
}

/// A channel variable combined with a function code.
///
/// The high half is loaded into the crate register, the low half into the
/// NAF register. Address scans walk the NAF half arithmetically.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Cnaf(u32);

impl Cnaf {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Branch and crate, for the crate register.
    pub const fn hi(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Slot, subaddress and function, for the NAF register.
    pub const fn lo(self) -> u16 {
        self.0 as u16
    }

    pub const fn branch(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn crate_number(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn slot(self) -> u8 {
        ((self.0 & naf::N_MASK) >> 9) as u8
    }

    pub const fn subaddress(self) -> u8 {
        ((self.0 & naf::A_MASK) >> 5) as u8
    }

    pub const fn function(self) -> Function {
        Function((self.0 & naf::F_MASK) as u8)
    }

    /// Same slot, next subaddress. Subaddress 15 carries into the next slot.
    #[must_use]
    pub const fn next_subaddress(self) -> Self {
        Self(self.0 + naf::A1)
    }

    /// Subaddress 0 of the next slot.
    #[must_use]
    pub const fn next_slot(self) -> Self {
        Self((self.0 & !naf::A_MASK) + naf::N1)
    }

    /// Advance by the address-scan rule: next subaddress on Q, next slot on no Q.
    #[must_use]
    pub const fn scan_next(self, q: bool) -> Self {
        if q {
            self.next_subaddress()
        } else {
            self.next_slot()
        }
    }

    /// True once an address scan has walked past the last slot of the crate.
    pub const fn past_crate_end(self) -> bool {
        self.lo() > naf::MAX_NAF
    }
}

impl fmt::Display for Cnaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "B({}) C({}) N({}) A({}) F({})",
            self.branch(),
            self.crate_number(),
            self.slot(),
            self.subaddress(),
            self.function().0
        )
    }
}

impl fmt::Debug for Cnaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cnaf({:#010x}: {})", self.0, self)
    }
}
