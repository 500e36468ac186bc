//! Highway driver configuration, supplied once when the registry is created.

use std::time::Duration;

use crate::registers::CARD_SIZE;

/// Card placement and timing parameters.
///
/// The defaults match a standard VSD2992 installation: card 0 at A16
/// address 0xDE00, vectors from 0x80, interrupt level 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighwayConfig {
    /// A16 bus address of the card for branch 0. Branch b is at
    /// `base_address + b * 0x40`.
    pub base_address: usize,
    pub irq_level: u8,
    /// Interrupt vector of branch 0. Branch b uses `vector_base + b`.
    pub vector_base: u8,
    /// Number of branches that may be initialized.
    pub num_cards: u8,
    /// Ceiling on status reads while timing the highway at init.
    pub max_busywait: u32,
    /// Highways measured slower than this use interrupt waits only.
    pub busywait_cutoff: u32,
    /// How long to wait for the ready interrupt.
    pub reply_timeout: Duration,
    /// Consecutive no-Q replies a repeat-until-Q transfer accepts.
    pub max_noq_retry: u32,
    /// Capacity of the LAM message queue.
    pub lam_queue_depth: usize,
}

impl Default for HighwayConfig {
    fn default() -> Self {
        Self {
            base_address: 0xde00,
            irq_level: 3,
            vector_base: 0x80,
            num_cards: 7,
            max_busywait: 1_000_000,
            busywait_cutoff: 100,
            reply_timeout: Duration::from_secs(1),
            max_noq_retry: 100,
            lam_queue_depth: 64,
        }
    }
}

impl HighwayConfig {
    pub fn with_base_address(mut self, address: usize) -> Self {
        self.base_address = address;
        self
    }

    pub fn with_vector_base(mut self, vector: u8) -> Self {
        self.vector_base = vector;
        self
    }

    pub fn with_num_cards(mut self, n: u8) -> Self {
        self.num_cards = n;
        self
    }

    pub fn with_max_busywait(mut self, n: u32) -> Self {
        self.max_busywait = n;
        self
    }

    pub fn with_busywait_cutoff(mut self, n: u32) -> Self {
        self.busywait_cutoff = n;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_max_noq_retry(mut self, n: u32) -> Self {
        self.max_noq_retry = n;
        self
    }

    pub fn card_address(&self, branch: u8) -> usize {
        self.base_address + CARD_SIZE * usize::from(branch)
    }

    pub fn vector(&self, branch: u8) -> u8 {
        self.vector_base.wrapping_add(branch)
    }
}
