#![allow(dead_code)]

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Once};
use std::time::Duration;

use camac_highway::sim::{Module, ReplyTiming, SimulatedBus, SimulatedCard};
use camac_highway::{Channel, ErrorTally, Highway, HighwayConfig, LamEvent};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Short timeouts so that interrupt and broken-highway tests stay quick.
pub fn test_config() -> HighwayConfig {
    HighwayConfig::default()
        .with_max_busywait(2_000)
        .with_reply_timeout(Duration::from_millis(200))
        .with_max_noq_retry(5)
}

/// One simulated branch-0 card on a bus, with a registry around it.
pub struct Rig {
    pub bus: SimulatedBus,
    pub card: Arc<SimulatedCard>,
    pub highway: Highway,
    pub lams: Receiver<LamEvent>,
    pub errors: Arc<ErrorTally>,
}

impl Rig {
    /// Build the rig without initializing the branch.
    pub fn with_config(config: HighwayConfig) -> Self {
        init_logger();
        let card = SimulatedCard::new();
        let bus = SimulatedBus::new();
        bus.install(config.card_address(0), card.clone());
        let errors = Arc::new(ErrorTally::new());
        let (highway, lams) = Highway::with_lam_queue(config);
        let highway = highway.with_error_log(errors.clone());
        Self {
            bus,
            card,
            highway,
            lams,
            errors,
        }
    }

    /// Build the rig and initialize branch 0.
    pub fn ready() -> Self {
        let rig = Self::with_config(test_config());
        rig.init();
        rig
    }

    /// Crate 1 with register modules in slots 1-4 and a FIFO in slot 10.
    pub fn with_crate() -> Self {
        let rig = Self::ready();
        rig.populate();
        rig
    }

    pub fn init(&self) {
        self.highway
            .init_branch(0, &self.bus)
            .expect("branch 0 initializes");
        self.card.clear_ops();
    }

    pub fn populate(&self) {
        self.card.insert_module(1, 1, Module::with_values(&[11, 12, 13]));
        self.card.insert_module(1, 2, Module::with_values(&[21]));
        self.card.insert_module(1, 3, Module::registers(0));
        self.card
            .insert_module(1, 4, Module::with_values(&[0x7f_0001, 0x80_0002]));
        self.card.insert_module(1, 10, Module::fifo(8));
    }

    pub fn set_timing(&self, timing: ReplyTiming) {
        self.card.set_timing(timing);
    }

    pub fn ext(&self, crate_number: u8, slot: u8, subaddress: u8) -> Channel {
        self.highway
            .cdreg(0, crate_number, slot, subaddress)
            .expect("valid channel")
    }

    /// (slot, subaddress, function) of every command run since init.
    pub fn visits(&self) -> Vec<(u8, u8, u8)> {
        self.card
            .ops()
            .iter()
            .map(|op| (op.slot, op.subaddress, op.function))
            .collect()
    }
}
