//! End-to-end propagation scenarios, run against every engine.

use rill::{ObserverAction, Signal, VarSignal, observe, select};
use rill_tests::{FiringLog, engine_matrix};

/// Addition chain: x = (a + b) + c reads 6, then observes 15 exactly
/// once when a turn sets a = 10.
#[test]
fn addition_chain_observes_final_sum_once() {
    for (name, domain) in engine_matrix() {
        let a = VarSignal::new(&domain, 1);
        let b = VarSignal::new(&domain, 2);
        let c = VarSignal::new(&domain, 3);
        let ab = a.signal().map2(&b.signal(), |a, b| a + b);
        let x = ab.map2(&c.signal(), |ab, c| ab + c);
        assert_eq!(x.get(), 6, "{name}: initial read");

        let log = FiringLog::new();
        let sink = log.clone();
        let _obs = observe(&x, move |value: &i32, _ctx| {
            sink.push(*value);
            ObserverAction::Continue
        });

        domain.transaction(|tx| a.set(tx, 10)).unwrap();

        assert_eq!(x.get(), 15, "{name}: after turn");
        assert_eq!(log.snapshot(), vec![15], "{name}: fires exactly once");
    }
}

/// Fan-out: c = a + (a * 2) must never observe a value mixing the new
/// a with the stale doubled a.
#[test]
fn fan_out_is_glitch_free() {
    for (name, domain) in engine_matrix() {
        let a = VarSignal::new(&domain, 1);
        let b = a.signal().map(|a| a * 2);
        let c = a.signal().map2(&b, |a, b| a + b);
        assert_eq!(c.get(), 3, "{name}: initial read");

        let log = FiringLog::new();
        let sink = log.clone();
        let _obs = observe(&c, move |value: &i32, _ctx| {
            sink.push(*value);
            ObserverAction::Continue
        });

        domain.transaction(|tx| a.set(tx, 5)).unwrap();

        assert_eq!(c.get(), 15, "{name}: after turn");
        assert_eq!(log.snapshot(), vec![15], "{name}: one firing, no glitch");
    }
}

/// A node whose recomputed value is unchanged reports idle; dependents
/// and observers stay quiet.
#[test]
fn unchanged_values_do_not_propagate() {
    for (name, domain) in engine_matrix() {
        let a = VarSignal::new(&domain, 20);
        let clamped = a.signal().map(|a| (*a).min(10));
        let downstream = clamped.map(|v| v + 1);

        let log = FiringLog::new();
        let sink = log.clone();
        let _obs = observe(&downstream, move |value: &i32, _ctx| {
            sink.push(*value);
            ObserverAction::Continue
        });

        // 20 -> 25: the clamp still reads 10, nothing downstream moves.
        domain.transaction(|tx| a.set(tx, 25)).unwrap();

        assert_eq!(downstream.get(), 11, "{name}");
        assert!(log.is_empty(), "{name}: no firings through the clamp");
    }
}

/// Dynamic rewire: r follows sel ? x : y. Flipping sel swaps the data
/// edge, updates r's level, and stops x from reaching r.
#[test]
fn dynamic_rewire_swaps_dependencies() {
    for (name, domain) in engine_matrix() {
        let sel = VarSignal::new(&domain, true);
        let x = VarSignal::new(&domain, 1);
        let y_var = VarSignal::new(&domain, 2);
        // y sits one level up so the rewire must re-level r.
        let y = y_var.signal().map(|v| *v);
        let r = select(&sel.signal(), &x.signal(), &y);
        assert_eq!(r.get(), 1, "{name}: initial");
        assert_eq!(r.level(), 1, "{name}: initial level");

        let log = FiringLog::new();
        let sink = log.clone();
        let _obs = observe(&r, move |value: &i32, _ctx| {
            sink.push(*value);
            ObserverAction::Continue
        });

        domain.transaction(|tx| sel.set(tx, false)).unwrap();
        assert_eq!(r.get(), 2, "{name}: follows y");
        assert_eq!(r.level(), 2, "{name}: level raised past y");
        assert_eq!(log.snapshot(), vec![2], "{name}");

        // The abandoned branch is disconnected.
        domain.transaction(|tx| x.set(tx, 100)).unwrap();
        assert_eq!(log.snapshot(), vec![2], "{name}: x no longer fires r");

        // The live branch still propagates.
        domain.transaction(|tx| y_var.set(tx, 7)).unwrap();
        assert_eq!(log.snapshot(), vec![2, 7], "{name}");
    }
}

/// Adding then removing a dynamic predecessor restores the node's
/// level and edge sets exactly.
#[test]
fn rewire_round_trip_restores_the_graph() {
    for (name, domain) in engine_matrix() {
        let sel = VarSignal::new(&domain, true);
        let x = VarSignal::new(&domain, 1);
        let y = VarSignal::new(&domain, 2);
        let r = select(&sel.signal(), &x.signal(), &y.signal());

        let preds_before = r.predecessor_ids();
        let level_before = r.level();

        domain.transaction(|tx| sel.set(tx, false)).unwrap();
        domain.transaction(|tx| sel.set(tx, true)).unwrap();

        assert_eq!(r.predecessor_ids(), preds_before, "{name}");
        assert_eq!(r.level(), level_before, "{name}");
        assert_eq!(r.get(), 1, "{name}");
    }
}

/// An observer that queues its own detach stops receiving turns.
#[test]
fn observer_detaches_mid_turn() {
    for (name, domain) in engine_matrix() {
        let x = VarSignal::new(&domain, 0);
        let log = FiringLog::new();
        let sink = log.clone();
        let obs = observe(&x.signal(), move |value: &i32, _ctx| {
            sink.push(*value);
            if *value == 42 {
                ObserverAction::StopAndDetach
            } else {
                ObserverAction::Continue
            }
        });

        domain.transaction(|tx| x.set(tx, 41)).unwrap();
        assert!(obs.is_attached(), "{name}");

        domain.transaction(|tx| x.set(tx, 42)).unwrap();
        assert!(!obs.is_attached(), "{name}: detached after the turn");
        assert_eq!(domain.observer_count(), 0, "{name}");

        domain.transaction(|tx| x.set(tx, 43)).unwrap();
        assert_eq!(log.snapshot(), vec![41, 42], "{name}: no firing after detach");
    }
}

/// The same graph and the same turns produce identical final values
/// and identical observer firings on every engine.
#[test]
fn engines_agree_on_values_and_firings() {
    fn run(domain: &rill::DomainRef) -> (Vec<i64>, i64) {
        let a = VarSignal::new(domain, 1i64);
        let b = VarSignal::new(domain, 10i64);
        let doubled = a.signal().map(|a| a * 2);
        let sum = a.signal().map2(&b.signal(), |a, b| a + b);
        let joined: Signal<i64> = doubled.map2(&sum, |d, s| d + s);

        let log = FiringLog::new();
        let sink = log.clone();
        let _obs = observe(&joined, move |value: &i64, _ctx| {
            sink.push(*value);
            ObserverAction::Continue
        });

        domain.transaction(|tx| a.set(tx, 5)).unwrap();
        domain.transaction(|tx| b.set(tx, 100)).unwrap();
        domain
            .transaction(|tx| {
                a.set(tx, 2);
                b.set(tx, 3);
            })
            .unwrap();

        (log.snapshot(), joined.get())
    }

    let mut reference: Option<(Vec<i64>, i64)> = None;
    for (name, domain) in engine_matrix() {
        let result = run(&domain);
        match &reference {
            None => reference = Some(result),
            Some(expected) => assert_eq!(&result, expected, "{name} diverged"),
        }
    }
}
