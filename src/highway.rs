//! The branch registry and the CAMAC library entry points built on it.
//!
//! A [`Highway`] owns the hardware information of every initialized branch.
//! All operations look the branch up, validate their arguments before any
//! register access, and hold the branch lock for the whole transaction.

use arrayvec::ArrayVec;
use log::{debug, info, warn};
use snafu::{ensure, OptionExt};

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::block::{ControlBlock, DataWord, SingleAction, Transaction};
use crate::config::HighwayConfig;
use crate::error::{
    BadAddressSpecSnafu, BadRepeatCountSnafu, BufferTooSmallSnafu, Error, MultiBranchSnafu,
    MultiCrateSnafu, NoHardwareSnafu,
};
use crate::error_log::{ErrorLog, NoErrorLog};
use crate::hwinfo::HardwareInfo;
use crate::interrupt::{LamDispatcher, LamEvent, LamQueue};
use crate::types::{Branch, Channel, Error as TypeError, Function, MAX_BRANCHES};

pub(crate) struct BranchEntry {
    pub info: Arc<HardwareInfo>,
    lock: Mutex<()>,
}

impl BranchEntry {
    pub fn new(info: Arc<HardwareInfo>) -> Self {
        Self {
            info,
            lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) type BranchTable = ArrayVec<Option<Arc<BranchEntry>>, MAX_BRANCHES>;

/// Registry of highway driver branches.
///
/// Dropping the registry disables interrupts on every initialized card.
pub struct Highway {
    pub(crate) config: HighwayConfig,
    pub(crate) table: RwLock<BranchTable>,
    /// Held for the whole of a branch initialization.
    init_lock: Mutex<()>,
    pub(crate) dispatcher: Arc<dyn LamDispatcher>,
    error_log: Arc<dyn ErrorLog>,
}

impl Highway {
    /// Create an empty registry. Demand messages from every branch go to
    /// `dispatcher`.
    pub fn new(config: HighwayConfig, dispatcher: Arc<dyn LamDispatcher>) -> Self {
        let mut entries = usize::from(config.num_cards);
        if entries > MAX_BRANCHES {
            warn!(
                "{} cards configured, only {} branches supported",
                entries, MAX_BRANCHES
            );
            entries = MAX_BRANCHES;
        }
        let table = (0..entries).map(|_| None).collect();
        Self {
            config,
            table: RwLock::new(table),
            init_lock: Mutex::new(()),
            dispatcher,
            error_log: Arc::new(NoErrorLog),
        }
    }

    /// Create a registry that queues demand messages.
    pub fn with_lam_queue(config: HighwayConfig) -> (Self, Receiver<LamEvent>) {
        let (queue, rx) = LamQueue::new(config.lam_queue_depth);
        (Self::new(config, Arc::new(queue)), rx)
    }

    /// Send classified faults to `log`.
    pub fn with_error_log(mut self, log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = log;
        self
    }

    pub fn config(&self) -> &HighwayConfig {
        &self.config
    }

    pub(crate) fn read_table(&self) -> RwLockReadGuard<'_, BranchTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_table(&self) -> RwLockWriteGuard<'_, BranchTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_init(&self) -> MutexGuard<'_, ()> {
        self.init_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Table index of `branch`, if the configuration allows it.
    pub(crate) fn branch_index(&self, branch: impl Into<u8>) -> Result<usize, Error> {
        let branch = Branch::new(branch.into())?;
        if branch.index() >= self.read_table().len() {
            return Err(TypeError::InvalidBranch.into());
        }
        Ok(branch.index())
    }

    fn entry(&self, branch: Branch) -> Result<Arc<BranchEntry>, Error> {
        let index = self.branch_index(*branch)?;
        self.read_table()[index]
            .clone()
            .context(NoHardwareSnafu { branch: *branch })
    }

    /// Hardware information of an initialized branch.
    /// # Errors
    /// [`Error::NoHardware`] if the branch was never initialized or its
    /// initialization failed.
    pub fn lookup(&self, branch: u8) -> Result<Arc<HardwareInfo>, Error> {
        Ok(self.entry(Branch::new(branch)?)?.info.clone())
    }

    /// Initialized branch numbers.
    pub fn branches(&self) -> Vec<u8> {
        self.read_table()
            .iter()
            .flatten()
            .map(|e| e.info.branch())
            .collect()
    }

    /// Disable interrupts on every initialized card.
    pub fn shutdown(&self) {
        for entry in self.read_table().iter().flatten() {
            debug!("Disabling interrupts on branch {}", entry.info.branch());
            entry.info.registers().enable_interrupts(false);
        }
    }

    fn run<R>(
        &self,
        branch: Branch,
        f: impl FnOnce(&Transaction<'_>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let entry = self.entry(branch)?;
        let _guard = entry.lock();
        let tx = Transaction::new(&entry.info, self.error_log.as_ref(), self.config.max_noq_retry);
        f(&tx)
    }

    /// Build a channel variable, checking that the branch is configured.
    pub fn cdreg(
        &self,
        branch: u8,
        crate_number: u8,
        slot: u8,
        subaddress: u8,
    ) -> Result<Channel, Error> {
        let ext = Channel::new(branch, crate_number, slot, subaddress).map_err(|e| {
            debug!(
                "cdreg: invalid address B{} C{} N{} A{}: {}",
                branch, crate_number, slot, subaddress, e
            );
            e
        })?;
        self.branch_index(*ext.branch())?;
        Ok(ext)
    }

    /// Single action with a data word of type `W`.
    ///
    /// Read functions return the word read, write functions send `data` and
    /// return it, control functions return zero.
    pub fn single_action<W: DataWord>(
        &self,
        f: Function,
        ext: Channel,
        data: W,
    ) -> Result<SingleAction<W>, Error> {
        self.run(ext.branch(), |tx| tx.single(ext.with_function(f), data))
    }

    /// Single action, 24-bit data.
    pub fn cfsa(&self, f: Function, ext: Channel, data: i32) -> Result<SingleAction<i32>, Error> {
        self.single_action(f, ext, data)
    }

    /// Single action, 16-bit data.
    pub fn cssa(&self, f: Function, ext: Channel, data: i16) -> Result<SingleAction<i16>, Error> {
        self.single_action(f, ext, data)
    }

    /// General multiple action: run `cb.requested` single actions from
    /// `actions` in order, on one branch.
    ///
    /// `data[i]` supplies or receives the word of action i and `q[i]` its Q
    /// response. Stops at the first failure with `cb.actual` set to the
    /// number of actions completed.
    pub fn general_action<W: DataWord>(
        &self,
        actions: &[(Function, Channel)],
        data: &mut [W],
        q: &mut [bool],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        cb.actual = 0;
        ensure!(cb.requested >= 1, BadRepeatCountSnafu);
        let len = actions.len().min(data.len()).min(q.len());
        ensure!(
            len >= cb.requested,
            BufferTooSmallSnafu {
                len,
                requested: cb.requested
            }
        );
        let branch = actions[0].1.branch();
        self.run(branch, |tx| {
            for (i, &(f, ext)) in actions[..cb.requested].iter().enumerate() {
                ensure!(ext.branch() == branch, MultiBranchSnafu);
                let reply = tx.single(ext.with_function(f), data[i])?;
                data[i] = reply.data;
                q[i] = reply.q;
                cb.actual = i + 1;
            }
            Ok(())
        })
    }

    /// General multiple action, 24-bit data.
    pub fn cfga(
        &self,
        actions: &[(Function, Channel)],
        data: &mut [i32],
        q: &mut [bool],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.general_action(actions, data, q, cb)
    }

    /// General multiple action, 16-bit data.
    pub fn csga(
        &self,
        actions: &[(Function, Channel)],
        data: &mut [i16],
        q: &mut [bool],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.general_action(actions, data, q, cb)
    }

    /// Address scan from `range[0]` up to `range[1]` within one crate.
    pub fn address_scan<W: DataWord>(
        &self,
        f: Function,
        range: [Channel; 2],
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        let [start, end] = range;
        cb.prepare(f, data.len())?;
        ensure!(start <= end, BadAddressSpecSnafu);
        ensure!(start.branch() == end.branch(), MultiBranchSnafu);
        ensure!(start.crate_number() == end.crate_number(), MultiCrateSnafu);
        self.run(start.branch(), |tx| {
            tx.mad(start.with_function(f), end.with_function(f), data, cb)
        })
    }

    /// Address scan, 24-bit data.
    pub fn cfmad(
        &self,
        f: Function,
        range: [Channel; 2],
        data: &mut [i32],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.address_scan(f, range, data, cb)
    }

    /// Address scan, 16-bit data.
    pub fn csmad(
        &self,
        f: Function,
        range: [Channel; 2],
        data: &mut [i16],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.address_scan(f, range, data, cb)
    }

    /// Repeat one address until it answers Q = 0.
    pub fn repeat_until_no_q<W: DataWord>(
        &self,
        f: Function,
        ext: Channel,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        cb.prepare(f, data.len())?;
        self.run(ext.branch(), |tx| tx.ubc(ext.with_function(f), data, cb))
    }

    /// Repeat until no Q, 24-bit data.
    pub fn cfubc(
        &self,
        f: Function,
        ext: Channel,
        data: &mut [i32],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.repeat_until_no_q(f, ext, data, cb)
    }

    /// Repeat until no Q, 16-bit data.
    pub fn csubc(
        &self,
        f: Function,
        ext: Channel,
        data: &mut [i16],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.repeat_until_no_q(f, ext, data, cb)
    }

    /// Repeat one address, retrying no-Q replies, until `cb.requested`
    /// operations have answered Q = 1.
    pub fn repeat_until_q<W: DataWord>(
        &self,
        f: Function,
        ext: Channel,
        data: &mut [W],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        cb.prepare(f, data.len())?;
        self.run(ext.branch(), |tx| tx.ubr(ext.with_function(f), data, cb))
    }

    /// Repeat until Q, 24-bit data.
    pub fn cfubr(
        &self,
        f: Function,
        ext: Channel,
        data: &mut [i32],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.repeat_until_q(f, ext, data, cb)
    }

    /// Repeat until Q, 16-bit data.
    pub fn csubr(
        &self,
        f: Function,
        ext: Channel,
        data: &mut [i16],
        cb: &mut ControlBlock,
    ) -> Result<(), Error> {
        self.repeat_until_q(f, ext, data, cb)
    }
}

impl Drop for Highway {
    fn drop(&mut self) {
        if !self.branches().is_empty() {
            info!("Shutting down serial highway drivers");
        }
        self.shutdown();
    }
}
