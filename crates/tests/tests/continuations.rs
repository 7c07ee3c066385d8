//! Cross-domain continuations.

use rill::{Domain, DomainConfig, ObserverAction, VarSignal, observe};
use rill_tests::{FiringLog, init_tracing};

/// A continuation recorded in one domain runs as a turn in its target
/// domain after the producing turn ends.
#[test]
fn continuation_carries_a_value_across_domains() {
    init_tracing();
    let d1 = Domain::new(DomainConfig::sequential_concurrent()).unwrap();
    let d2 = Domain::new(DomainConfig::sequential_concurrent()).unwrap();

    let p_var = VarSignal::new(&d1, 1);
    let p = p_var.signal().map(|v| v * 2);
    let q = VarSignal::new(&d2, 0);

    let q_target = q.clone();
    let d2_target = d2.clone();
    let _obs = observe(&p, move |value: &i32, ctx| {
        let value = *value;
        let q = q_target.clone();
        ctx.record_continuation(&d2_target, move |tx| q.set(tx, value));
        ObserverAction::Continue
    });

    d1.transaction(|tx| p_var.set(tx, 5)).unwrap();

    assert_eq!(q.get(), 10, "q updated by d2's continuation turn");
}

/// Multiple continuations for one target dispatch in record order.
#[test]
fn continuations_dispatch_in_record_order() {
    init_tracing();
    let d1 = Domain::new(DomainConfig::sequential_concurrent()).unwrap();
    let d2 = Domain::new(DomainConfig::sequential_concurrent()).unwrap();

    let trigger = VarSignal::new(&d1, 0);
    let order = FiringLog::new();

    let d2_target = d2.clone();
    let log = order.clone();
    let _obs = observe(&trigger.signal(), move |_value: &i32, ctx| {
        for step in 1..=3 {
            let log = log.clone();
            ctx.record_continuation(&d2_target, move |_tx| log.push(step));
        }
        ObserverAction::Continue
    });

    d1.transaction(|tx| trigger.set(tx, 1)).unwrap();

    assert_eq!(order.snapshot(), vec![1, 2, 3]);
}

/// A chain D1 -> D2 -> D1 loops back as a separate D1 turn with a
/// strictly greater id.
#[test]
fn looping_continuation_runs_as_a_later_turn() {
    init_tracing();
    let d1 = Domain::new(DomainConfig::sequential_concurrent()).unwrap();
    let d2 = Domain::new(DomainConfig::sequential_concurrent()).unwrap();

    let p = VarSignal::new(&d1, 0);
    let q = VarSignal::new(&d2, 0);
    let back = VarSignal::new(&d1, 0);

    // D1: p pulses -> send p's value to D2's q.
    let q_target = q.clone();
    let d2_target = d2.clone();
    let _p_obs = observe(&p.signal(), move |value: &i32, ctx| {
        let value = *value;
        let q = q_target.clone();
        ctx.record_continuation(&d2_target, move |tx| q.set(tx, value));
        ObserverAction::Continue
    });

    // D2: q pulses -> send it back into D1.
    let back_target = back.clone();
    let d1_target = d1.clone();
    let _q_obs = observe(&q.signal(), move |value: &i32, ctx| {
        let value = *value;
        let back = back_target.clone();
        ctx.record_continuation(&d1_target, move |tx| back.set(tx, value + 1));
        ObserverAction::Continue
    });

    // D1 again: log the turn the loop-back lands in.
    let d1_turns = FiringLog::new();
    let log = d1_turns.clone();
    let _back_obs = observe(&back.signal(), move |value: &i32, ctx| {
        log.push((*value, ctx.turn_id()));
        ObserverAction::Continue
    });

    let first_turn = d1.transaction(|tx| {
        p.set(tx, 5);
        tx.turn().id()
    });
    let first_turn = first_turn.unwrap();

    assert_eq!(q.get(), 5);
    assert_eq!(back.get(), 6);
    let firings = d1_turns.snapshot();
    assert_eq!(firings.len(), 1);
    let (value, loop_turn) = firings[0];
    assert_eq!(value, 6);
    assert!(
        loop_turn > first_turn,
        "loop-back turn {loop_turn} must follow {first_turn}"
    );
}
