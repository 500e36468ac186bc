mod common;

use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

use camac_highway::sim::ReplyTiming;
use camac_highway::{func, ControlBlock, Fault, LamEvent, LamStatus, Location};
use common::*;

const WAIT: Duration = Duration::from_secs(2);

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < WAIT, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn reply_by_interrupt() {
    let rig = Rig::with_crate();
    rig.set_timing(ReplyTiming::OnInterrupt);
    let reply = rig.highway.cfsa(func(0), rig.ext(1, 1, 1), 0).unwrap();
    assert!(reply.q);
    assert_eq!(reply.data, 12);
    assert_eq!(rig.card.ready_arms(), 1);

    let info = rig.highway.lookup(0).unwrap();
    assert!(!info.is_waiting());
    assert!(!rig.card.lam_mask().contains(LamStatus::READY));
}

#[test]
fn block_transfer_by_interrupt() {
    let rig = Rig::with_crate();
    rig.set_timing(ReplyTiming::OnInterrupt);
    let range = [rig.ext(1, 1, 0), rig.ext(1, 2, 0)];
    let mut data = [0i32; 8];
    let mut cb = ControlBlock::new(8);
    rig.highway
        .cfmad(func(0), range, &mut data, &mut cb)
        .unwrap();
    assert_eq!(data[..cb.actual], [11, 12, 13, 21]);
    // One armed wait per operation.
    assert_eq!(rig.card.ready_arms(), rig.visits().len());
}

#[test]
fn slow_highway_always_waits_for_interrupt() {
    let rig = Rig::with_config(test_config());
    rig.set_timing(ReplyTiming::Polls(150));
    rig.init();
    rig.populate();
    let reply = rig.highway.cfsa(func(0), rig.ext(1, 2, 0), 0).unwrap();
    assert_eq!(reply.data, 21);
    assert_eq!(rig.card.ready_arms(), 1);
}

#[test]
fn missing_interrupt_times_out() {
    let rig = Rig::with_crate();
    rig.set_timing(ReplyTiming::Never);
    let start = Instant::now();
    let res = rig.highway.cfsa(func(0), rig.ext(1, 1, 0), 0);
    assert!(start.elapsed() >= rig.highway.config().reply_timeout);
    assert_eq!(res.unwrap_err().fault(), Some(Fault::NotReady));
    assert!(!rig.highway.lookup(0).unwrap().is_waiting());
    assert!(!rig.card.lam_mask().contains(LamStatus::READY));
    assert_eq!(
        rig.errors.count(Location::Branch(0), Fault::NotReady).total,
        1
    );

    // The branch recovers once the highway answers again.
    rig.set_timing(ReplyTiming::Polls(1));
    let reply = rig.highway.cfsa(func(0), rig.ext(1, 1, 0), 0).unwrap();
    assert_eq!(reply.data, 11);
}

#[test]
fn demand_reaches_lam_queue() {
    let rig = Rig::ready();
    rig.card.raise_demand(3, 17);
    let event = rig.lams.recv_timeout(WAIT).unwrap();
    assert_eq!(
        event,
        LamEvent {
            branch: 0,
            crate_number: 3,
            slot: 17
        }
    );
    wait_until("interrupt re-enable", || rig.card.interrupts_enabled());

    rig.card.raise_demand(4, 2);
    rig.card.raise_demand(5, 9);
    let slots: Vec<_> = (0..2)
        .map(|_| rig.lams.recv_timeout(WAIT).unwrap())
        .map(|e| (e.crate_number, e.slot))
        .collect();
    assert_eq!(slots, [(4, 2), (5, 9)]);
}

#[test]
fn demand_during_transfer() {
    let rig = Rig::with_crate();
    rig.set_timing(ReplyTiming::OnInterrupt);
    rig.card.raise_demand(2, 6);
    let reply = rig.highway.cfsa(func(0), rig.ext(1, 2, 0), 0).unwrap();
    assert_eq!(reply.data, 21);
    let event = rig.lams.recv_timeout(WAIT).unwrap();
    assert_eq!((event.crate_number, event.slot), (2, 6));
}

#[test]
fn no_demands_after_shutdown() {
    let rig = Rig::ready();
    rig.highway.shutdown();
    rig.card.raise_demand(3, 17);
    assert_eq!(
        rig.lams.recv_timeout(Duration::from_millis(100)),
        Err(RecvTimeoutError::Timeout)
    );
}
