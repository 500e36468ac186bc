//! Driver core for the Hytec VSD2992 CAMAC serial highway interface.
//!
//! A [`Highway`] registry holds one entry per initialized branch (driver
//! card). Operations address modules through packed [`Channel`] variables
//! and come in the usual CAMAC flavours:
//!
//! * single actions ([`Highway::cfsa`], [`Highway::cssa`]),
//! * general multiple actions ([`Highway::cfga`], [`Highway::csga`]),
//! * address scans ([`Highway::cfmad`], [`Highway::csmad`]),
//! * repeat until no Q ([`Highway::cfubc`], [`Highway::csubc`]),
//! * repeat until Q ([`Highway::cfubr`], [`Highway::csubr`]).
//!
//! The `f` variants move 24-bit words, the `s` variants 16-bit words.
//!
//! Card registers are reached through a [`RegisterBackend`]; bus services
//! (probing, interrupt connection) through a [`Platform`]. The [`sim`]
//! module provides software versions of both.
//!
//! ```
//! use std::sync::Arc;
//! use camac_highway::sim::{Module, SimulatedBus, SimulatedCard};
//! use camac_highway::{func, Highway, HighwayConfig};
//!
//! let config = HighwayConfig::default();
//! let card = SimulatedCard::new();
//! card.insert_module(1, 5, Module::with_values(&[0x12_3456]));
//! let bus = SimulatedBus::new();
//! bus.install(config.card_address(0), card);
//!
//! let (highway, _lams) = Highway::with_lam_queue(config);
//! highway.init_branch(0, &bus)?;
//! let ext = highway.cdreg(0, 1, 5, 0)?;
//! let reply = highway.cfsa(func(0), ext, 0)?;
//! assert!(reply.q);
//! assert_eq!(reply.data, 0x12_3456);
//! # Ok::<(), camac_highway::Error>(())
//! ```

pub mod block;
pub mod command;
pub mod config;
pub mod error;
pub mod error_log;
pub mod highway;
pub mod hwinfo;
pub mod init;
pub mod interrupt;
pub mod registers;
mod reply;
pub mod sim;
pub mod status;
pub mod types;

pub use block::{ControlBlock, DataWord, SingleAction};
pub use command::{parse_command, BcnafCommand, Report};
pub use config::HighwayConfig;
pub use error::{Error, Fault, Scope};
pub use error_log::{ErrorLog, ErrorTally, Location, NoErrorLog, Tally};
pub use highway::Highway;
pub use hwinfo::HardwareInfo;
pub use init::Platform;
pub use interrupt::{InterruptHandler, LamDispatcher, LamEvent, LamQueue, NoDispatch};
pub use registers::{LamStatus, MmioRegisters, RegisterBackend, Registers};
pub use types::{func, Branch, Channel, Cnaf, Crate, Function, Slot, Subaddress};
