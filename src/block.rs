//! CAMAC operations on one branch: single actions and the three block
//! transfer modes.
//!
//! * Address scan (MAD) walks subaddresses of a module while it answers Q,
//!   then moves to subaddress 0 of the next slot, up to an ending address.
//!   Block reads step over empty slots; commands and writes stop at them.
//! * Repeat until no Q (UBC) repeats one address, and stops at the first
//!   Q = 0 reply without error.
//! * Repeat until Q (UBR) repeats one address, retrying no-Q replies up to
//!   a retry budget, and moves to the next data word on each Q = 1.
//!
//! Each mode has command, read and write variants selected by the function
//! code. Block reads run the card in its scan or repeat mode, where reading
//! the low data word starts the next operation; a dummy write to the NAF
//! register before the last fetch stops the card.

use log::{debug, trace};
use snafu::ensure;

use core::fmt;

use crate::error::{BadRepeatCountSnafu, BufferTooSmallSnafu, Error, Fault, HighwaySnafu};
use crate::error_log::ErrorLog;
use crate::hwinfo::HardwareInfo;
use crate::registers::{naf, LamStatus, Registers};
use crate::reply::wait_reply;
use crate::status::{check_status, StatusCheck};
use crate::types::{Cnaf, Function};

/// A data word moved by a CAMAC operation.
///
/// `i32` transfers 24-bit words through both data registers, `i16` transfers
/// 16-bit words through the low data register only.
pub trait DataWord: Copy + Default + fmt::Debug + Send + 'static {
    /// Read the word of the last completed read. For block reads this also
    /// starts the next read.
    fn fetch(regs: Registers<'_>) -> Self;
    /// Load the word to write. The low word write starts the operation.
    fn store(self, regs: Registers<'_>);
    fn to_i32(self) -> i32;
}

impl DataWord for i32 {
    fn fetch(regs: Registers<'_>) -> Self {
        let hi = i32::from(regs.data_high() & 0xff);
        let lo = i32::from(regs.data_low());
        hi << 16 | lo
    }

    fn store(self, regs: Registers<'_>) {
        regs.load_data_high((self >> 16) as u16);
        regs.load_data_low(self as u16);
    }

    fn to_i32(self) -> i32 {
        self
    }
}

impl DataWord for i16 {
    fn fetch(regs: Registers<'_>) -> Self {
        regs.data_low() as i16
    }

    fn store(self, regs: Registers<'_>) {
        regs.load_data_low(self as u16);
    }

    fn to_i32(self) -> i32 {
        self.into()
    }
}

/// Requested and achieved operation counts of a block transfer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    pub requested: usize,
    pub actual: usize,
}

impl ControlBlock {
    pub const fn new(requested: usize) -> Self {
        Self {
            requested,
            actual: 0,
        }
    }

    /// Check the block against function `f` and a data buffer of `len`
    /// words, and reset the achieved count.
    pub(crate) fn prepare(&mut self, f: Function, len: usize) -> Result<(), Error> {
        self.actual = 0;
        ensure!(self.requested >= 1, BadRepeatCountSnafu);
        ensure!(
            !f.has_data() || len >= self.requested,
            BufferTooSmallSnafu {
                len,
                requested: self.requested
            }
        );
        Ok(())
    }

    fn done(&self) -> bool {
        self.actual >= self.requested
    }
}

/// Data word and Q response of a single action.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SingleAction<W> {
    pub data: W,
    pub q: bool,
}

/// Runs operations on a branch. The caller holds the branch lock.
pub(crate) struct Transaction<'a> {
    info: &'a HardwareInfo,
    log: &'a dyn ErrorLog,
    max_noq_retry: u32,
}

impl<'a> Transaction<'a> {
    pub fn new(info: &'a HardwareInfo, log: &'a dyn ErrorLog, max_noq_retry: u32) -> Self {
        Self {
            info,
            log,
            max_noq_retry,
        }
    }

    fn regs(&self) -> Registers<'a> {
        self.info.registers()
    }

    fn record(&self, cnaf: Cnaf, fault: Fault, status: LamStatus) {
        debug!("{}: {} (LAM status {:#06x})", cnaf, fault, status.bits());
        self.log.record(cnaf, fault);
    }

    /// Wait for the reply and classify it, recording any fault.
    fn complete(&self, cnaf: Cnaf) -> StatusCheck {
        let status = wait_reply(self.info);
        let check = check_status(status);
        if let Some(fault) = check.fault {
            self.record(cnaf, fault, status);
        }
        check
    }

    /// Q response of the completed operation, or its fault.
    fn reply(&self, cnaf: Cnaf) -> Result<bool, Error> {
        let check = self.complete(cnaf);
        match check.fault {
            None => Ok(check.q),
            Some(fault) => HighwaySnafu { fault, cnaf }.fail(),
        }
    }

    /// Like `reply`, but an empty slot reads as Q = 0 so that a block read
    /// moves on to the next slot.
    fn scan_reply(&self, cnaf: Cnaf) -> Result<bool, Error> {
        match self.reply(cnaf) {
            Err(Error::Highway {
                fault: Fault::NoXResponse,
                ..
            }) => Ok(false),
            other => other,
        }
    }

    fn wait_q_timeout(&self, cnaf: Cnaf, retries: u32) -> Error {
        debug!("{}: no Q after {} retries", cnaf, retries);
        self.log.record(cnaf, Fault::WaitQTimeout);
        Error::Highway {
            fault: Fault::WaitQTimeout,
            cnaf,
        }
    }

    fn start(&self, naf: u16) {
        let regs = self.regs();
        regs.clear_status(LamStatus::RESET);
        regs.load_naf(naf);
    }

    pub fn single<W: DataWord>(&self, cnaf: Cnaf, data: W) -> Result<SingleAction<W>, Error> {
        let regs = self.regs();
        let f = cnaf.function();
        trace!("{} single", cnaf);
        regs.clear_status(LamStatus::RESET);
        regs.load_crate(cnaf.hi());
        regs.load_naf(cnaf.lo());
        if f.is_write() {
            data.store(regs);
        }
        let q = self.reply(cnaf)?;
        let data = if f.is_read() {
            W::fetch(regs)
        } else if f.is_write() {
            data
        } else {
            W::default()
        };
        Ok(SingleAction { data, q })
    }

    /// Address scan from `start` to at most `end`.
    pub fn mad<W: DataWord>(
        &self,
        start: Cnaf,
        end: Cnaf,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let f = start.function();
        trace!("{} address scan to {}, {} words", start, end, cb.requested);
        self.regs().load_crate(start.hi());
        if f.is_read() {
            self.mad_read(start, end, data, cb)
        } else if f.is_write() {
            self.mad_write(start, end, data, cb)
        } else {
            self.mad_command(start, end, cb)
        }
    }

    fn mad_command(&self, mut cnaf: Cnaf, end: Cnaf, cb: &mut ControlBlock) -> Result<(), Error> {
        loop {
            self.start(cnaf.lo());
            let q = self.reply(cnaf)?;
            if q {
                cb.actual += 1;
            }
            cnaf = cnaf.scan_next(q);
            if cnaf.past_crate_end() || cnaf > end || cb.done() {
                return Ok(());
            }
        }
    }

    fn mad_read<W: DataWord>(
        &self,
        mut cnaf: Cnaf,
        end: Cnaf,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let regs = self.regs();
        self.start(cnaf.lo() | naf::SCAN);
        loop {
            let q = match self.scan_reply(cnaf) {
                Ok(q) => q,
                Err(e) => {
                    regs.load_naf(naf::DUMMY_WRITE);
                    return Err(e);
                }
            };
            if q {
                cb.actual += 1;
            }
            cnaf = cnaf.scan_next(q);
            let last = cb.done() || cnaf > end || cnaf.past_crate_end();
            if last {
                regs.load_naf(naf::DUMMY_WRITE);
            }
            regs.clear_status(LamStatus::RESET);
            if q {
                data[cb.actual - 1] = W::fetch(regs);
            } else {
                // Restart at the next slot
                regs.data_low();
            }
            if last {
                return Ok(());
            }
        }
    }

    fn mad_write<W: DataWord>(
        &self,
        mut cnaf: Cnaf,
        end: Cnaf,
        data: &[W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let regs = self.regs();
        loop {
            self.start(cnaf.lo());
            data[cb.actual].store(regs);
            let q = self.reply(cnaf)?;
            if q {
                cb.actual += 1;
            }
            cnaf = cnaf.scan_next(q);
            if cnaf.past_crate_end() || cnaf > end || cb.done() {
                return Ok(());
            }
        }
    }

    /// Repeat `cnaf` until Q = 0 or the requested count is reached.
    pub fn ubc<W: DataWord>(
        &self,
        cnaf: Cnaf,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let f = cnaf.function();
        trace!("{} repeat until no Q, {} words", cnaf, cb.requested);
        self.regs().load_crate(cnaf.hi());
        if f.is_read() {
            self.ubc_read(cnaf, data, cb)
        } else if f.is_write() {
            self.ubc_write(cnaf, data, cb)
        } else {
            self.ubc_command(cnaf, cb)
        }
    }

    fn ubc_command(&self, cnaf: Cnaf, cb: &mut ControlBlock) -> Result<(), Error> {
        loop {
            self.start(cnaf.lo());
            if !self.reply(cnaf)? {
                return Ok(());
            }
            cb.actual += 1;
            if cb.done() {
                return Ok(());
            }
        }
    }

    fn ubc_read<W: DataWord>(
        &self,
        cnaf: Cnaf,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let regs = self.regs();
        self.start(cnaf.lo() | naf::REPEAT);
        loop {
            if !self.reply(cnaf)? {
                return Ok(());
            }
            cb.actual += 1;
            let last = cb.done();
            if last {
                regs.load_naf(naf::DUMMY_WRITE);
            }
            regs.clear_status(LamStatus::RESET);
            data[cb.actual - 1] = W::fetch(regs);
            if last {
                return Ok(());
            }
        }
    }

    fn ubc_write<W: DataWord>(
        &self,
        cnaf: Cnaf,
        data: &[W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let regs = self.regs();
        loop {
            self.start(cnaf.lo());
            data[cb.actual].store(regs);
            if !self.reply(cnaf)? {
                return Ok(());
            }
            cb.actual += 1;
            if cb.done() {
                return Ok(());
            }
        }
    }

    /// Repeat `cnaf`, retrying no-Q replies, until the requested count is reached.
    pub fn ubr<W: DataWord>(
        &self,
        cnaf: Cnaf,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let f = cnaf.function();
        trace!("{} repeat until Q, {} words", cnaf, cb.requested);
        self.regs().load_crate(cnaf.hi());
        if f.is_read() {
            self.ubr_read(cnaf, data, cb)
        } else if f.is_write() {
            self.ubr_write(cnaf, data, cb)
        } else {
            self.ubr_command(cnaf, cb)
        }
    }

    fn ubr_command(&self, cnaf: Cnaf, cb: &mut ControlBlock) -> Result<(), Error> {
        let mut retries = 0;
        loop {
            self.start(cnaf.lo());
            if self.reply(cnaf)? {
                cb.actual += 1;
                if cb.done() {
                    return Ok(());
                }
                retries = 0;
            } else {
                retries += 1;
                if retries >= self.max_noq_retry {
                    return Err(self.wait_q_timeout(cnaf, retries));
                }
            }
        }
    }

    fn ubr_read<W: DataWord>(
        &self,
        cnaf: Cnaf,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let regs = self.regs();
        let mut retries = 0;
        self.start(cnaf.lo() | naf::REPEAT);
        loop {
            let q = self.reply(cnaf)?;
            regs.clear_status(LamStatus::RESET);
            if q {
                cb.actual += 1;
                let last = cb.done();
                if last {
                    regs.load_naf(naf::DUMMY_WRITE);
                }
                retries = 0;
                data[cb.actual - 1] = W::fetch(regs);
                if last {
                    return Ok(());
                }
            } else {
                retries += 1;
                if retries >= self.max_noq_retry {
                    return Err(self.wait_q_timeout(cnaf, retries));
                }
                // Repeat the read
                regs.data_low();
            }
        }
    }

    fn ubr_write<W: DataWord>(
        &self,
        cnaf: Cnaf,
        data: &[W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let regs = self.regs();
        let mut retries = 0;
        loop {
            self.start(cnaf.lo());
            data[cb.actual].store(regs);
            if self.reply(cnaf)? {
                cb.actual += 1;
                if cb.done() {
                    return Ok(());
                }
                retries = 0;
            } else {
                retries += 1;
                if retries >= self.max_noq_retry {
                    return Err(self.wait_q_timeout(cnaf, retries));
                }
            }
        }
    }
}
