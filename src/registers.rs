//! Register layout of the Hytec VSD2992 serial highway driver.
//!
//! The card exposes two overlaid views of 16-bit registers at the same
//! base address: reading offset X and writing offset X address different
//! registers. [`ReadRegister`] and [`WriteRegister`] name the byte offsets,
//! [`LamStatus`] and [`Csr`] name the status bits.
//!
//! All accesses go through a [`RegisterBackend`], so that the driver can run
//! against real memory-mapped hardware ([`MmioRegisters`]) or a software model
//! of the card (see [`crate::sim`]).

use bitflags::bitflags;
use core::ptr::NonNull;

/// Manufacturer id reported by every Hytec card.
pub const HYTEC_ID: u16 = 0xff7f;
/// Module code of the VSD2992.
pub const VSD_2992: u16 = 2992;
/// Bytes of address space decoded by one card.
pub const CARD_SIZE: usize = 0x40;

/// Read-side registers, by byte offset from the card base.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ReadRegister {
    /// Manufacturer id
    Id = 0x00,
    /// Module code
    Module = 0x02,
    /// Control/status
    Csr = 0x04,
    LamMask = 0x0a,
    Vector = 0x0c,
    LamStatus = 0x0e,
    /// Status of the last reply message
    ReplyStatus = 0x16,
    /// Crate and slot of the pending demand message
    DemandStatus = 0x18,
    /// Low 16 bits of read data. Reading restarts a block-mode read.
    DataLow = 0x1a,
    /// High 8 bits of read data
    DataHigh = 0x1c,
    DemandInput = 0x1e,
    DemandPointer = 0x20,
    UPort = 0x22,
    LoopCsr = 0x30,
    LoopN = 0x32,
    LoopA = 0x34,
    LoopF = 0x36,
    LoopData4 = 0x38,
    LoopData3 = 0x3a,
    LoopData2 = 0x3c,
    LoopData1 = 0x3e,
}

/// Write-side registers, by byte offset from the card base.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum WriteRegister {
    Vector = 0x00,
    InterruptEnable = 0x04,
    LamMask = 0x0a,
    ClearLamMask = 0x0c,
    /// Clears the given bits in the LAM status register
    SelectiveClearStatus = 0x0e,
    ClearLamStatus = 0x10,
    /// Clears the given bits in the LAM mask register
    SelectiveClearMask = 0x12,
    /// Sets the given bits in the LAM mask register
    SelectiveSetMask = 0x14,
    /// Slot, subaddress and function. Starts non-write commands.
    Naf = 0x16,
    /// Branch and crate
    Crate = 0x18,
    /// Low 16 bits of write data. Starts write commands.
    DataLow = 0x1a,
    /// High 8 bits of write data
    DataHigh = 0x1c,
    DemandSelectFirst = 0x1e,
    DemandSelectPointer = 0x20,
    UPort = 0x22,
    Fifo = 0x24,
    LoopBuffer = 0x26,
}

impl ReadRegister {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

impl WriteRegister {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Bits of the LAM status register.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct LamStatus: u16 {
        const NO_Q          = 0x0001;
        const NO_X          = 0x0002;
        /// Error detected by the serial crate controller
        const CTRL_ERROR    = 0x0004;
        /// Error in a previous demand message
        const DMD_ERROR     = 0x0008;
        /// Address not recognized: no crate answered
        const ADNR          = 0x0010;
        const LONG_PARITY   = 0x0020;
        const TIMEOUT       = 0x0040;
        const TRANS_PARITY  = 0x0080;
        /// Highway ready for the next command
        const READY         = 0x0100;
        /// Transmission of the reply message complete
        const XMIT_DONE     = 0x0200;
        const DEMAND        = 0x0400;
        const SYNC_LOST     = 0x0800;
    }
}

impl LamStatus {
    /// Both bits required before a reply can be read.
    pub const REPLY_READY: Self = Self::READY.union(Self::XMIT_DONE);

    /// Bits cleared before starting a command.
    pub const RESET: Self = Self::NO_Q
        .union(Self::NO_X)
        .union(Self::CTRL_ERROR)
        .union(Self::DMD_ERROR)
        .union(Self::ADNR)
        .union(Self::LONG_PARITY)
        .union(Self::TIMEOUT)
        .union(Self::TRANS_PARITY)
        .union(Self::READY)
        .union(Self::XMIT_DONE)
        .union(Self::SYNC_LOST);

    /// Bits that indicate a failed operation.
    pub const ERROR: Self = Self::NO_X
        .union(Self::CTRL_ERROR)
        .union(Self::ADNR)
        .union(Self::LONG_PARITY)
        .union(Self::TIMEOUT)
        .union(Self::TRANS_PARITY)
        .union(Self::SYNC_LOST);

    /// Bits that mean the highway loop itself is down.
    pub const HIGHWAY_BROKEN: Self = Self::TIMEOUT.union(Self::SYNC_LOST);

    pub fn is_reply_ready(self) -> bool {
        self.contains(Self::REPLY_READY)
    }
}

bitflags! {
    /// Bits of the control/status register.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct Csr: u16 {
        const BUSY              = 0x0001;
        const READY             = 0x0010;
        const X                 = 0x0020;
        const Q                 = 0x0040;
        const INTERRUPT_ENABLE  = 0x0080;
        const XMIT_DONE         = 0x0100;
        const SHR               = 0x0200;
        const LAM               = 0x0400;
        const SYNC              = 0x0800;
        const DEMAND            = 0x1000;
    }
}

/// Slot, subaddress and function field layout of the NAF register.
pub mod naf {
    /// One unit of subaddress
    pub const A1: u32 = 0x0020;
    /// One unit of slot
    pub const N1: u32 = 0x0200;
    pub const F_MASK: u32 = 0x001f;
    pub const A_MASK: u32 = 0x01e0;
    pub const N_MASK: u32 = 0x3e00;
    /// Repeat mode: a read of the low data word restarts the same command.
    pub const REPEAT: u16 = 0x4000;
    pub const Q_MODE: u16 = 0x8000;
    /// Address scan mode: a read of the low data word starts the next address.
    pub const SCAN: u16 = 0xc000;
    pub const MODE_MASK: u16 = 0xc000;
    /// Highest NAF inside a crate (N23 A15 F31).
    pub const MAX_NAF: u16 = 0x2fff;
    /// F16 with no data, loaded to stop a block-mode transfer.
    pub const DUMMY_WRITE: u16 = 0x0010;
}

/// U-port value that resets all non-control functions.
pub const UPORT_RESET: u16 = 0x0080;

/// Access to one card's registers.
///
/// Implementations must perform every access when asked, with no caching
/// or reordering, since reads of some registers have side effects.
pub trait RegisterBackend: Send + Sync {
    fn read_register(&self, offset: usize) -> u16;
    fn write_register(&self, offset: usize, value: u16);
}

/// Registers of a card mapped into the local address space.
#[derive(Debug)]
pub struct MmioRegisters {
    base: NonNull<u16>,
}

// SAFETY: the mapped block is device memory, accessed only with volatile
// single-word operations.
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// # Safety
    /// `base` must point to a VSD2992 register block mapped for the whole
    /// lifetime of the returned value, valid for 16-bit volatile reads and
    /// writes over [`CARD_SIZE`] bytes.
    pub unsafe fn new(base: NonNull<u16>) -> Self {
        Self { base }
    }

    fn word(&self, offset: usize) -> *mut u16 {
        debug_assert!(offset < CARD_SIZE && offset % 2 == 0);
        // SAFETY: offset stays inside the block, see new().
        unsafe { self.base.as_ptr().add(offset / 2) }
    }
}

impl RegisterBackend for MmioRegisters {
    fn read_register(&self, offset: usize) -> u16 {
        // SAFETY: see new().
        unsafe { self.word(offset).read_volatile() }
    }

    fn write_register(&self, offset: usize, value: u16) {
        // SAFETY: see new().
        unsafe { self.word(offset).write_volatile(value) }
    }
}

/// Named accessors over a [`RegisterBackend`].
#[derive(Copy, Clone)]
pub struct Registers<'a> {
    backend: &'a dyn RegisterBackend,
}

impl<'a> Registers<'a> {
    pub fn new(backend: &'a dyn RegisterBackend) -> Self {
        Self { backend }
    }

    pub fn read(self, reg: ReadRegister) -> u16 {
        self.backend.read_register(reg.offset())
    }

    pub fn write(self, reg: WriteRegister, value: u16) {
        self.backend.write_register(reg.offset(), value)
    }

    pub fn manufacturer_id(self) -> u16 {
        self.read(ReadRegister::Id)
    }

    pub fn module_code(self) -> u16 {
        self.read(ReadRegister::Module)
    }

    pub fn csr(self) -> Csr {
        Csr::from_bits_retain(self.read(ReadRegister::Csr))
    }

    pub fn lam_status(self) -> LamStatus {
        LamStatus::from_bits_retain(self.read(ReadRegister::LamStatus))
    }

    pub fn demand_status(self) -> u16 {
        self.read(ReadRegister::DemandStatus)
    }

    pub fn data_low(self) -> u16 {
        self.read(ReadRegister::DataLow)
    }

    pub fn data_high(self) -> u16 {
        self.read(ReadRegister::DataHigh)
    }

    pub fn clear_status(self, bits: LamStatus) {
        self.write(WriteRegister::SelectiveClearStatus, bits.bits())
    }

    pub fn clear_all_status(self) {
        self.write(WriteRegister::ClearLamStatus, 0)
    }

    pub fn set_lam_mask(self, bits: LamStatus) {
        self.write(WriteRegister::LamMask, bits.bits())
    }

    pub fn clear_lam_mask(self) {
        self.write(WriteRegister::ClearLamMask, 0)
    }

    /// Arm interrupts on the given status bits.
    pub fn arm(self, bits: LamStatus) {
        self.write(WriteRegister::SelectiveSetMask, bits.bits())
    }

    pub fn disarm(self, bits: LamStatus) {
        self.write(WriteRegister::SelectiveClearMask, bits.bits())
    }

    pub fn load_crate(self, hi: u16) {
        self.write(WriteRegister::Crate, hi)
    }

    pub fn load_naf(self, naf: u16) {
        self.write(WriteRegister::Naf, naf)
    }

    pub fn load_data_high(self, value: u16) {
        self.write(WriteRegister::DataHigh, value)
    }

    pub fn load_data_low(self, value: u16) {
        self.write(WriteRegister::DataLow, value)
    }

    pub fn set_vector(self, vector: u8) {
        self.write(WriteRegister::Vector, vector.into())
    }

    pub fn enable_interrupts(self, enable: bool) {
        let bits = if enable {
            Csr::INTERRUPT_ENABLE
        } else {
            Csr::empty()
        };
        self.write(WriteRegister::InterruptEnable, bits.bits())
    }

    pub fn reset(self) {
        self.write(WriteRegister::UPort, UPORT_RESET)
    }
}
