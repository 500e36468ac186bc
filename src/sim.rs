//! Software model of a VSD2992 card, its serial highway and the crates on it.
//!
//! [`SimulatedCard`] implements [`RegisterBackend`] with the register
//! semantics the driver relies on: command start on the NAF or low data
//! word, scan and repeat block-read modes, the LAM status and mask
//! registers, demand messages and the interrupt enable. [`SimulatedBus`]
//! implements [`Platform`] and delivers card interrupts to the connected
//! handlers from a separate thread.
//!
//! Replies come from a queue of scripted [`SimReply`] values first, then
//! from the modules installed in the simulated crates.

use log::trace;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::init::Platform;
use crate::interrupt::{Demand, InterruptHandler};
use crate::registers::{
    naf, Csr, LamStatus, ReadRegister, RegisterBackend, WriteRegister, HYTEC_ID, UPORT_RESET,
    VSD_2992,
};
use crate::types::{MAX_SUBADDRESS, SCC_SLOT};

/// When the reply to a command shows up in the LAM status register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReplyTiming {
    /// After this many status reads report not ready. The reply also
    /// arrives when the ready interrupt is armed.
    Polls(u32),
    /// Only once the ready interrupt is armed.
    OnInterrupt,
    /// Never: the highway is dead.
    Never,
}

/// Reply to one command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimReply {
    pub q: bool,
    pub x: bool,
    /// Error bits reported with the reply
    pub faults: LamStatus,
    pub data: i32,
}

impl SimReply {
    pub const fn q(data: i32) -> Self {
        Self {
            q: true,
            x: true,
            faults: LamStatus::empty(),
            data,
        }
    }

    pub const fn no_q() -> Self {
        Self {
            q: false,
            x: true,
            faults: LamStatus::empty(),
            data: 0,
        }
    }

    pub const fn no_x() -> Self {
        Self {
            q: false,
            x: false,
            faults: LamStatus::empty(),
            data: 0,
        }
    }

    pub const fn fault(faults: LamStatus) -> Self {
        Self {
            q: true,
            x: true,
            faults,
            data: 0,
        }
    }

    fn status(self) -> LamStatus {
        let mut status = LamStatus::REPLY_READY | self.faults;
        status.set(LamStatus::NO_Q, !self.q);
        status.set(LamStatus::NO_X, !self.x);
        status
    }
}

/// A command as executed on the highway.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimOp {
    pub crate_number: u8,
    pub slot: u8,
    pub subaddress: u8,
    pub function: u8,
    /// Word sent by a write function
    pub data: Option<i32>,
}

/// A module in a simulated crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Module {
    /// Registers at subaddresses below `depth`, read with F0-F7 and written
    /// with F16-F23. Other subaddresses answer Q = 0.
    Registers { values: [i32; 16], depth: u8 },
    /// A FIFO: reads pop (Q = 0 when empty), writes push (Q = 0 when full),
    /// F9 clears it.
    Fifo {
        data: VecDeque<i32>,
        capacity: usize,
    },
}

impl Module {
    pub fn registers(depth: u8) -> Self {
        Module::Registers {
            values: [0; 16],
            depth: depth.min(MAX_SUBADDRESS + 1),
        }
    }

    /// Register module holding `values` at subaddresses 0, 1, ...
    pub fn with_values(values: &[i32]) -> Self {
        let mut regs = [0; 16];
        let depth = values.len().min(regs.len());
        regs[..depth].copy_from_slice(&values[..depth]);
        Module::Registers {
            values: regs,
            depth: depth as u8,
        }
    }

    pub fn fifo(capacity: usize) -> Self {
        Module::Fifo {
            data: VecDeque::new(),
            capacity,
        }
    }

    fn execute(&mut self, a: u8, f: u8, data: i32) -> SimReply {
        match self {
            Module::Registers { values, depth } => {
                if a >= *depth {
                    SimReply::no_q()
                } else if f < 8 {
                    SimReply::q(values[usize::from(a)])
                } else if f & 0x18 == 0x10 {
                    values[usize::from(a)] = data;
                    SimReply::q(0)
                } else {
                    SimReply::q(0)
                }
            }
            Module::Fifo { data: fifo, capacity } => {
                if f < 8 {
                    fifo.pop_front().map_or(SimReply::no_q(), SimReply::q)
                } else if f & 0x18 == 0x10 {
                    if fifo.len() < *capacity {
                        fifo.push_back(data);
                        SimReply::q(0)
                    } else {
                        SimReply::no_q()
                    }
                } else {
                    if f == 9 {
                        fifo.clear();
                    }
                    SimReply::q(0)
                }
            }
        }
    }
}

#[derive(Debug)]
struct Pending {
    reply: SimReply,
    polls_left: u32,
}

#[derive(Debug)]
struct CardState {
    id: u16,
    module: u16,
    lst: LamStatus,
    lmk: LamStatus,
    ie: bool,
    vector: u8,
    crate_reg: u16,
    naf: u16,
    mode: u16,
    data_high: u16,
    read_data: i32,
    last_q: bool,
    pending: Option<Pending>,
    timing: ReplyTiming,
    highway_fault: LamStatus,
    script: VecDeque<SimReply>,
    crates: HashMap<u8, HashMap<u8, Module>>,
    demands: VecDeque<u16>,
    ops: Vec<SimOp>,
    accesses: usize,
    ready_arms: usize,
}

impl CardState {
    fn is_write(&self) -> bool {
        self.naf & 0x18 == 0x10
    }

    fn is_read(&self) -> bool {
        self.naf & 0x1f < 8
    }

    fn start(&mut self, data: Option<i32>) {
        let op = SimOp {
            crate_number: self.crate_reg as u8,
            slot: ((self.naf >> 9) & 0x1f) as u8,
            subaddress: ((self.naf >> 5) & 0xf) as u8,
            function: (self.naf & 0x1f) as u8,
            data,
        };
        trace!("sim: {:?}", op);
        self.ops.push(op);
        let reply = match self.script.pop_front() {
            Some(reply) => reply,
            None => self.model_reply(op),
        };
        self.lst.remove(LamStatus::REPLY_READY);
        let polls_left = match self.timing {
            ReplyTiming::Polls(n) => n,
            _ => 0,
        };
        self.pending = Some(Pending { reply, polls_left });
    }

    fn model_reply(&mut self, op: SimOp) -> SimReply {
        let slots = match self.crates.get_mut(&op.crate_number) {
            Some(slots) => slots,
            None => return SimReply::fault(LamStatus::ADNR),
        };
        if op.slot == SCC_SLOT {
            return SimReply::q(0);
        }
        match slots.get_mut(&op.slot) {
            Some(module) => module.execute(op.subaddress, op.function, op.data.unwrap_or(0)),
            None => SimReply::no_x(),
        }
    }

    fn complete(&mut self) {
        if let Some(Pending { reply, .. }) = self.pending.take() {
            self.lst |= reply.status() | self.highway_fault;
            self.read_data = reply.data & 0x00ff_ffff;
            self.last_q = reply.q;
        }
    }

    fn poll(&mut self) {
        let arrived = match &mut self.pending {
            Some(pending) if matches!(self.timing, ReplyTiming::Polls(_)) => {
                if pending.polls_left == 0 {
                    true
                } else {
                    pending.polls_left -= 1;
                    false
                }
            }
            _ => false,
        };
        if arrived {
            self.complete();
        }
    }

    /// Restart a block-mode read after the low data word was read.
    fn restart(&mut self) {
        if self.mode == 0 || self.pending.is_some() || !self.is_read() {
            return;
        }
        if self.mode == naf::SCAN {
            let current = u32::from(self.naf);
            let next = if self.last_q {
                current + naf::A1
            } else {
                (current & !naf::A_MASK) + naf::N1
            };
            self.naf = (next & 0x3fff) as u16;
        }
        self.start(None);
    }

    fn csr(&self) -> Csr {
        let mut csr = Csr::SYNC;
        csr.set(Csr::BUSY, self.pending.is_some());
        csr.set(Csr::READY, self.lst.contains(LamStatus::READY));
        csr.set(Csr::XMIT_DONE, self.lst.contains(LamStatus::XMIT_DONE));
        csr.set(Csr::Q, !self.lst.contains(LamStatus::NO_Q));
        csr.set(Csr::X, !self.lst.contains(LamStatus::NO_X));
        csr.set(Csr::INTERRUPT_ENABLE, self.ie);
        csr.set(Csr::DEMAND, self.lst.contains(LamStatus::DEMAND));
        csr
    }

    /// Assert the interrupt line if enabled and a masked condition is set.
    /// The card drops its interrupt enable until the handler re-enables it.
    fn take_interrupt(&mut self) -> Option<u8> {
        if self.ie && self.lst.intersects(self.lmk) {
            self.ie = false;
            Some(self.vector)
        } else {
            None
        }
    }

    fn read(&mut self, offset: usize) -> u16 {
        match offset {
            o if o == ReadRegister::Id.offset() => self.id,
            o if o == ReadRegister::Module.offset() => self.module,
            o if o == ReadRegister::Csr.offset() => self.csr().bits(),
            o if o == ReadRegister::LamMask.offset() => self.lmk.bits(),
            o if o == ReadRegister::Vector.offset() => self.vector.into(),
            o if o == ReadRegister::LamStatus.offset() => {
                self.poll();
                self.lst.bits()
            }
            o if o == ReadRegister::DemandStatus.offset() => {
                let word = self.demands.pop_front().unwrap_or(0);
                if !self.demands.is_empty() {
                    self.lst |= LamStatus::DEMAND;
                }
                word
            }
            o if o == ReadRegister::DataLow.offset() => {
                let lo = self.read_data as u16;
                self.restart();
                lo
            }
            o if o == ReadRegister::DataHigh.offset() => ((self.read_data >> 16) & 0xff) as u16,
            o if o == ReadRegister::UPort.offset() => 0,
            _ => 0,
        }
    }

    fn write(&mut self, offset: usize, value: u16) {
        let bits = LamStatus::from_bits_retain(value);
        match offset {
            o if o == WriteRegister::Vector.offset() => self.vector = value as u8,
            o if o == WriteRegister::InterruptEnable.offset() => {
                self.ie = Csr::from_bits_retain(value).contains(Csr::INTERRUPT_ENABLE)
            }
            o if o == WriteRegister::LamMask.offset() => self.lmk = bits,
            o if o == WriteRegister::ClearLamMask.offset() => self.lmk = LamStatus::empty(),
            o if o == WriteRegister::SelectiveClearStatus.offset() => self.lst.remove(bits),
            o if o == WriteRegister::ClearLamStatus.offset() => {
                self.lst = LamStatus::empty();
                self.demands.clear();
            }
            o if o == WriteRegister::SelectiveClearMask.offset() => self.lmk.remove(bits),
            o if o == WriteRegister::SelectiveSetMask.offset() => {
                self.lmk.insert(bits);
                if bits.contains(LamStatus::READY) {
                    self.ready_arms += 1;
                    if self.timing != ReplyTiming::Never {
                        self.complete();
                    }
                }
            }
            o if o == WriteRegister::Naf.offset() => {
                self.mode = value & naf::MODE_MASK;
                self.naf = value & !naf::MODE_MASK;
                if !self.is_write() {
                    self.start(None);
                }
            }
            o if o == WriteRegister::Crate.offset() => self.crate_reg = value,
            o if o == WriteRegister::DataHigh.offset() => self.data_high = value,
            o if o == WriteRegister::DataLow.offset() => {
                if self.is_write() {
                    let data = i32::from(self.data_high & 0xff) << 16 | i32::from(value);
                    self.start(Some(data));
                }
            }
            o if o == WriteRegister::UPort.offset() => {
                if value & UPORT_RESET != 0 {
                    self.mode = 0;
                    self.pending = None;
                }
            }
            _ => (),
        }
    }
}

type InterruptLine = Arc<dyn Fn(u8) + Send + Sync>;

/// Simulated VSD2992 card.
pub struct SimulatedCard {
    state: Mutex<CardState>,
    line: Mutex<Option<InterruptLine>>,
}

impl SimulatedCard {
    /// A card answering every command after two status reads, with no
    /// crates on its highway.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CardState {
                id: HYTEC_ID,
                module: VSD_2992,
                lst: LamStatus::empty(),
                lmk: LamStatus::empty(),
                ie: false,
                vector: 0,
                crate_reg: 0,
                naf: 0,
                mode: 0,
                data_high: 0,
                read_data: 0,
                last_q: false,
                pending: None,
                timing: ReplyTiming::Polls(2),
                highway_fault: LamStatus::empty(),
                script: VecDeque::new(),
                crates: HashMap::new(),
                demands: VecDeque::new(),
                ops: Vec::new(),
                accesses: 0,
                ready_arms: 0,
            }),
            line: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the card state, then assert the interrupt line if needed.
    fn update<R>(&self, f: impl FnOnce(&mut CardState) -> R) -> R {
        let (result, irq) = {
            let mut state = self.lock();
            let result = f(&mut *state);
            (result, state.take_interrupt())
        };
        if let Some(vector) = irq {
            let line = self.line.lock().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(line) = line {
                line(vector);
            }
        }
        result
    }

    pub(crate) fn connect_line(&self, line: InterruptLine) {
        *self.line.lock().unwrap_or_else(PoisonError::into_inner) = Some(line);
    }

    pub fn set_identity(&self, id: u16, module: u16) {
        let mut state = self.lock();
        state.id = id;
        state.module = module;
    }

    pub fn set_timing(&self, timing: ReplyTiming) {
        self.lock().timing = timing;
    }

    /// Report `bits` with every reply from now on.
    pub fn set_highway_fault(&self, bits: LamStatus) {
        self.lock().highway_fault = bits;
    }

    /// Add an empty crate.
    pub fn add_crate(&self, crate_number: u8) {
        self.lock().crates.entry(crate_number).or_default();
    }

    /// Put `module` in a slot, adding the crate if needed.
    pub fn insert_module(&self, crate_number: u8, slot: u8, module: Module) {
        self.lock()
            .crates
            .entry(crate_number)
            .or_default()
            .insert(slot, module);
    }

    pub fn module(&self, crate_number: u8, slot: u8) -> Option<Module> {
        self.lock().crates.get(&crate_number)?.get(&slot).cloned()
    }

    /// Queue scripted replies, used before the crate model.
    pub fn push_replies(&self, replies: impl IntoIterator<Item = SimReply>) {
        self.lock().script.extend(replies);
    }

    pub fn pending_replies(&self) -> usize {
        self.lock().script.len()
    }

    /// A crate sends a demand message for `slot`.
    pub fn raise_demand(&self, crate_number: u8, slot: u8) {
        let word = Demand {
            crate_number,
            slot,
            m2: false,
        }
        .encode();
        self.update(|state| {
            state.demands.push_back(word);
            state.lst |= LamStatus::DEMAND;
        });
    }

    /// Commands executed so far.
    pub fn ops(&self) -> Vec<SimOp> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Register reads and writes so far.
    pub fn register_accesses(&self) -> usize {
        self.lock().accesses
    }

    /// Times the ready interrupt was armed.
    pub fn ready_arms(&self) -> usize {
        self.lock().ready_arms
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.lock().ie
    }

    pub fn lam_mask(&self) -> LamStatus {
        self.lock().lmk
    }

    pub fn vector(&self) -> u8 {
        self.lock().vector
    }
}

impl RegisterBackend for SimulatedCard {
    fn read_register(&self, offset: usize) -> u16 {
        self.update(|state| {
            state.accesses += 1;
            state.read(offset)
        })
    }

    fn write_register(&self, offset: usize, value: u16) {
        self.update(|state| {
            state.accesses += 1;
            state.write(offset, value)
        })
    }
}

type HandlerMap = Arc<Mutex<HashMap<u8, Arc<dyn InterruptHandler>>>>;

/// Simulated VME bus holding cards at short I/O addresses.
#[derive(Default)]
pub struct SimulatedBus {
    cards: Mutex<HashMap<usize, Arc<SimulatedCard>>>,
    handlers: HandlerMap,
    levels: Mutex<Vec<u8>>,
    fail_connect: AtomicBool,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug `card` in at `address` and wire its interrupt line to the bus.
    pub fn install(&self, address: usize, card: Arc<SimulatedCard>) {
        let handlers = Arc::clone(&self.handlers);
        card.connect_line(Arc::new(move |vector: u8| {
            let handlers = Arc::clone(&handlers);
            thread::spawn(move || {
                let handler = handlers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&vector)
                    .cloned();
                match handler {
                    Some(handler) => handler.on_interrupt(),
                    None => trace!("sim: spurious interrupt on vector {:#04x}", vector),
                }
            });
        }));
        self.cards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, card);
    }

    /// Make the next interrupt connections fail.
    pub fn fail_interrupt_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn is_connected(&self, vector: u8) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&vector)
    }

    pub fn enabled_levels(&self) -> Vec<u8> {
        self.levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Platform for SimulatedBus {
    fn map_card(&self, address: usize) -> Option<Arc<dyn RegisterBackend>> {
        let cards = self.cards.lock().unwrap_or_else(PoisonError::into_inner);
        let card = cards.get(&address)?;
        Some(Arc::clone(card) as Arc<dyn RegisterBackend>)
    }

    fn connect_interrupt(&self, vector: u8, handler: Arc<dyn InterruptHandler>) -> io::Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "interrupt vector in use",
            ));
        }
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(vector, handler);
        Ok(())
    }

    fn enable_interrupt_level(&self, level: u8) {
        self.levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Registers;

    #[test]
    fn test_identity_and_polling() {
        let card = SimulatedCard::new();
        card.set_timing(ReplyTiming::Polls(1));
        card.insert_module(1, 3, Module::with_values(&[0x12_3456]));
        let regs = Registers::new(card.as_ref());
        assert_eq!(regs.manufacturer_id(), HYTEC_ID);
        assert_eq!(regs.module_code(), VSD_2992);

        regs.load_crate(1);
        regs.load_naf(3 << 9);
        assert!(!regs.lam_status().is_reply_ready());
        assert!(regs.lam_status().is_reply_ready());
        assert_eq!(regs.data_high(), 0x12);
        assert_eq!(regs.data_low(), 0x3456);
        assert_eq!(card.ops().len(), 1);
    }

    #[test]
    fn test_write_starts_on_low_word() {
        let card = SimulatedCard::new();
        card.insert_module(2, 4, Module::registers(2));
        let regs = Registers::new(card.as_ref());
        regs.load_crate(2);
        regs.load_naf(4 << 9 | 1 << 5 | 16);
        assert!(card.ops().is_empty());
        regs.load_data_high(0x00ab);
        regs.load_data_low(0xcdef);
        assert_eq!(card.ops()[0].data, Some(0xab_cdef));
        match card.module(2, 4) {
            Some(Module::Registers { values, .. }) => assert_eq!(values[1], 0xab_cdef),
            other => panic!("unexpected module {:?}", other),
        }
    }

    #[test]
    fn test_absent_crate_and_slot() {
        let card = SimulatedCard::new();
        card.set_timing(ReplyTiming::Polls(0));
        card.add_crate(1);
        let regs = Registers::new(card.as_ref());
        regs.load_crate(5);
        regs.load_naf(1 << 9);
        assert!(regs.lam_status().contains(LamStatus::ADNR));
        regs.clear_status(LamStatus::RESET);
        regs.load_crate(1);
        regs.load_naf(1 << 9);
        let status = regs.lam_status();
        assert!(status.contains(LamStatus::NO_X | LamStatus::NO_Q));
    }

    #[test]
    fn test_fifo_module() {
        let mut fifo = Module::fifo(2);
        assert_eq!(fifo.execute(0, 16, 1), SimReply::q(0));
        assert_eq!(fifo.execute(0, 16, 2), SimReply::q(0));
        assert_eq!(fifo.execute(0, 16, 3), SimReply::no_q());
        assert_eq!(fifo.execute(0, 0, 0), SimReply::q(1));
        assert_eq!(fifo.execute(0, 9, 0), SimReply::q(0));
        assert_eq!(fifo.execute(0, 0, 0), SimReply::no_q());
    }

    #[test]
    fn test_never_ready() {
        let card = SimulatedCard::new();
        card.set_timing(ReplyTiming::Never);
        let regs = Registers::new(card.as_ref());
        regs.load_naf(0);
        regs.arm(LamStatus::READY);
        for _ in 0..10 {
            assert!(!regs.lam_status().contains(LamStatus::READY));
        }
        assert_eq!(card.ready_arms(), 1);
    }
}
