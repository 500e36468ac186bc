mod common;

use std::collections::VecDeque;

use camac_highway::sim::{Module, SimReply};
use camac_highway::{func, ControlBlock, Error, Fault, LamStatus, Location};
use common::*;

fn fifo_rig(items: &[i32]) -> Rig {
    let rig = Rig::with_crate();
    rig.card.insert_module(
        1,
        10,
        Module::Fifo {
            data: items.iter().copied().collect(),
            capacity: 8,
        },
    );
    rig
}

fn fifo_contents(rig: &Rig) -> VecDeque<i32> {
    match rig.card.module(1, 10) {
        Some(Module::Fifo { data, .. }) => data,
        other => panic!("unexpected module {:?}", other),
    }
}

#[test]
fn ubc_read_until_empty() {
    let rig = fifo_rig(&[5, 6, 7]);
    let mut data = [0i32; 10];
    let mut cb = ControlBlock::new(10);
    rig.highway
        .cfubc(func(0), rig.ext(1, 10, 0), &mut data, &mut cb)
        .unwrap();
    assert_eq!(cb.actual, 3);
    assert_eq!(data[..3], [5, 6, 7]);
    // Three reads with Q, one without.
    assert_eq!(rig.visits().len(), 4);
}

#[test]
fn ubc_read_stops_at_count() {
    let rig = fifo_rig(&[5, 6, 7]);
    let mut data = [0i16; 2];
    let mut cb = ControlBlock::new(2);
    rig.highway
        .csubc(func(0), rig.ext(1, 10, 0), &mut data, &mut cb)
        .unwrap();
    assert_eq!(cb.actual, 2);
    assert_eq!(data, [5, 6]);
    assert_eq!(rig.visits().len(), 2);
    assert_eq!(fifo_contents(&rig), [7]);
}

#[test]
fn ubc_write_until_full() {
    let rig = fifo_rig(&[]);
    let mut data: Vec<i32> = (0..10).collect();
    let mut cb = ControlBlock::new(10);
    rig.highway
        .cfubc(func(16), rig.ext(1, 10, 0), &mut data, &mut cb)
        .unwrap();
    assert_eq!(cb.actual, 8);
    assert_eq!(fifo_contents(&rig), (0..8).collect::<VecDeque<_>>());
}

#[test]
fn ubc_command() {
    let rig = Rig::with_crate();
    rig.card
        .push_replies([SimReply::q(0), SimReply::q(0), SimReply::no_q()]);
    let mut cb = ControlBlock::new(10);
    rig.highway
        .cfubc(func(25), rig.ext(1, 1, 0), &mut [], &mut cb)
        .unwrap();
    assert_eq!(cb.actual, 2);
    assert_eq!(rig.visits(), [(1, 0, 25), (1, 0, 25), (1, 0, 25)]);
}

#[test]
fn ubc_fault_keeps_partial_count() {
    let rig = Rig::with_crate();
    rig.card.push_replies([
        SimReply::q(5),
        SimReply::fault(LamStatus::TRANS_PARITY),
    ]);
    let mut data = [0i32; 4];
    let mut cb = ControlBlock::new(4);
    let res = rig
        .highway
        .cfubc(func(2), rig.ext(1, 1, 0), &mut data, &mut cb);
    assert_eq!(res.unwrap_err().fault(), Some(Fault::TransverseParity));
    assert_eq!(cb.actual, 1);
    assert_eq!(data[0], 5);
}

#[test]
fn ubr_read_retries_no_q() {
    let rig = Rig::with_crate();
    rig.card.push_replies([
        SimReply::no_q(),
        SimReply::no_q(),
        SimReply::q(7),
        SimReply::no_q(),
        SimReply::q(8),
    ]);
    let mut data = [0i32; 2];
    let mut cb = ControlBlock::new(2);
    rig.highway
        .cfubr(func(0), rig.ext(1, 1, 0), &mut data, &mut cb)
        .unwrap();
    assert_eq!(cb.actual, 2);
    assert_eq!(data, [7, 8]);
    assert_eq!(rig.visits().len(), 5);
    assert_eq!(rig.card.pending_replies(), 0);
}

#[test]
fn ubr_below_retry_limit_succeeds() {
    // The test configuration allows five consecutive no-Q replies.
    let rig = Rig::with_crate();
    rig.card
        .push_replies(std::iter::repeat(SimReply::no_q()).take(4));
    rig.card.push_replies([SimReply::q(9)]);
    let mut data = [0i32; 1];
    let mut cb = ControlBlock::new(1);
    rig.highway
        .cfubr(func(0), rig.ext(1, 1, 0), &mut data, &mut cb)
        .unwrap();
    assert_eq!(data, [9]);
    assert_eq!(rig.visits().len(), 5);
}

#[test]
fn ubr_at_retry_limit_fails() {
    let rig = Rig::with_crate();
    rig.card
        .push_replies(std::iter::repeat(SimReply::no_q()).take(5));
    rig.card.push_replies([SimReply::q(9)]);
    let mut data = [0i32; 1];
    let mut cb = ControlBlock::new(1);
    let res = rig
        .highway
        .cfubr(func(0), rig.ext(1, 1, 0), &mut data, &mut cb);
    assert!(matches!(
        res,
        Err(Error::Highway {
            fault: Fault::WaitQTimeout,
            ..
        })
    ));
    assert_eq!(cb.actual, 0);
    assert_eq!(rig.visits().len(), 5);
    assert_eq!(rig.card.pending_replies(), 1);
    assert_eq!(
        rig.errors
            .count(Location::Slot(0, 1, 1), Fault::WaitQTimeout)
            .total,
        1
    );
}

#[test]
fn ubr_write_resends_until_q() {
    let rig = Rig::with_crate();
    rig.card.push_replies([
        SimReply::no_q(),
        SimReply::q(0),
        SimReply::no_q(),
        SimReply::no_q(),
        SimReply::q(0),
    ]);
    let mut data = [1i16, 2];
    let mut cb = ControlBlock::new(2);
    rig.highway
        .csubr(func(17), rig.ext(1, 1, 0), &mut data, &mut cb)
        .unwrap();
    assert_eq!(cb.actual, 2);
    let written: Vec<_> = rig.card.ops().iter().map(|op| op.data).collect();
    assert_eq!(written, [Some(1), Some(1), Some(2), Some(2), Some(2)]);
}

#[test]
fn ubr_command() {
    let rig = Rig::with_crate();
    rig.card.push_replies([SimReply::no_q(), SimReply::q(0)]);
    let mut cb = ControlBlock::new(1);
    rig.highway
        .cfubr(func(8), rig.ext(1, 1, 0), &mut [], &mut cb)
        .unwrap();
    assert_eq!(cb.actual, 1);
    assert_eq!(rig.visits().len(), 2);
}

#[test]
fn ubr_16_bit_read_takes_low_word() {
    let rig = Rig::with_crate();
    rig.card.push_replies([SimReply::q(0x12_3456)]);
    let mut data = [0i16; 1];
    let mut cb = ControlBlock::new(1);
    rig.highway
        .csubr(func(0), rig.ext(1, 1, 0), &mut data, &mut cb)
        .unwrap();
    assert_eq!(data, [0x3456]);
}

#[test]
fn repeat_checks_touch_no_registers() {
    let rig = Rig::with_crate();
    let accesses = rig.card.register_accesses();
    let mut data = [0i32; 2];
    let mut cb = ControlBlock::new(0);
    let res = rig
        .highway
        .cfubr(func(0), rig.ext(1, 1, 0), &mut data, &mut cb);
    assert!(matches!(res, Err(Error::BadRepeatCount)));
    let mut cb = ControlBlock::new(3);
    let res = rig
        .highway
        .cfubc(func(16), rig.ext(1, 1, 0), &mut data, &mut cb);
    assert!(matches!(
        res,
        Err(Error::BufferTooSmall {
            len: 2,
            requested: 3
        })
    ));
    assert_eq!(rig.card.register_accesses(), accesses);
}
