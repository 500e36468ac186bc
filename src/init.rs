//! Bringing up a highway driver card.

use log::{debug, error, info};
use snafu::{OptionExt, ResultExt};

use std::io;
use std::sync::Arc;

use crate::error::{
    CardNotFoundSnafu, Error, HighwayBrokenSnafu, InterruptConnectSnafu, WrongCardSnafu,
};
use crate::highway::{BranchEntry, Highway};
use crate::hwinfo::HardwareInfo;
use crate::interrupt::{BranchInterrupt, InterruptHandler};
use crate::registers::{naf, LamStatus, RegisterBackend, Registers, HYTEC_ID, VSD_2992};
use crate::reply::{calibrate, polls_replies};

/// Bus services needed to bring up a card.
pub trait Platform {
    /// Probe for a card at `address` in the short I/O space, returning its
    /// registers if something answers a read of the first word.
    fn map_card(&self, address: usize) -> Option<Arc<dyn RegisterBackend>>;

    fn connect_interrupt(&self, vector: u8, handler: Arc<dyn InterruptHandler>) -> io::Result<()>;

    fn enable_interrupt_level(&self, level: u8);

    /// Run `f` with interrupts masked.
    fn with_interrupts_locked<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// Time a dummy write (F16 to crate 0, slot 0) around the highway.
///
/// Returns the number of status reads before the highway came ready, capped
/// at `max_reads`, and the last status read.
fn measure_round_trip(regs: Registers<'_>, max_reads: u32) -> (u32, LamStatus) {
    regs.reset();
    regs.clear_lam_mask();
    regs.clear_all_status();
    regs.load_crate(0);
    regs.load_naf(naf::DUMMY_WRITE);
    regs.load_data_high(0);
    regs.load_data_low(0);

    let mut reads = 0;
    let mut status = regs.lam_status();
    while reads < max_reads && !status.contains(LamStatus::READY) {
        status = regs.lam_status();
        reads += 1;
    }
    (reads, status)
}

impl Highway {
    /// Initialize the highway driver card of `branch`.
    ///
    /// Probes and identifies the card, times the highway to choose between
    /// polling and interrupt waits, connects the interrupt handler and arms
    /// demand interrupts. A branch that is already initialized is returned
    /// as is. Failure leaves the branch unusable but affects no other branch.
    ///
    /// Initializations are serialized, but the registry stays readable while
    /// a card is probed and timed.
    pub fn init_branch<P: Platform>(
        &self,
        branch: u8,
        platform: &P,
    ) -> Result<Arc<HardwareInfo>, Error> {
        let index = self.branch_index(branch)?;
        let _init = self.lock_init();
        if let Some(entry) = &self.read_table()[index] {
            return Ok(entry.info.clone());
        }

        let address = self.config.card_address(branch);
        let backend = platform.map_card(address).with_context(|| {
            debug!("No card at {:#06x} for branch {}", address, branch);
            CardNotFoundSnafu { branch, address }
        })?;
        let regs = Registers::new(backend.as_ref());

        let (id, module) = (regs.manufacturer_id(), regs.module_code());
        if id != HYTEC_ID || module != VSD_2992 {
            error!(
                "Did not find a VSD2992 card where expected for branch {}",
                branch
            );
            return WrongCardSnafu { branch, id, module }.fail();
        }
        info!("Initializing Hytec VSD2992 serial driver for branch {}", branch);

        let (reads, status) = platform
            .with_interrupts_locked(|| measure_round_trip(regs, self.config.max_busywait));
        if status.intersects(LamStatus::HIGHWAY_BROKEN) || !status.contains(LamStatus::READY) {
            error!(
                "Serial highway on branch {} is broken, initialization terminated",
                branch
            );
            return HighwayBrokenSnafu { branch }.fail();
        }
        let busy_wait_limit = calibrate(reads, self.config.busywait_cutoff);

        let info = Arc::new(HardwareInfo::new(
            branch,
            backend.clone(),
            busy_wait_limit,
            polls_replies(reads, self.config.busywait_cutoff),
            self.config.reply_timeout,
        ));
        let vector = self.config.vector(branch);
        let handler = Arc::new(BranchInterrupt::new(info.clone(), self.dispatcher.clone()));
        platform
            .connect_interrupt(vector, handler)
            .map_err(|e| {
                error!(
                    "Can't connect branch {} to its interrupt service routine: {}",
                    branch, e
                );
                e
            })
            .context(InterruptConnectSnafu { vector })?;

        self.write_table()[index] = Some(Arc::new(BranchEntry::new(info.clone())));
        regs.reset();
        regs.clear_all_status();
        regs.set_vector(vector);
        regs.set_lam_mask(LamStatus::DEMAND);
        regs.enable_interrupts(true);
        platform.enable_interrupt_level(self.config.irq_level);

        info!("Serial highway branch {} initialized", branch);
        if info.is_fast() {
            info!(
                "Highway {} is fast, polling for command completion for up to {} reads",
                branch, busy_wait_limit
            );
        } else {
            info!(
                "Highway {} is slow, waiting for interrupts on command completion",
                branch
            );
        }
        Ok(info)
    }
}
