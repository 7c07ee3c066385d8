//! Concurrent submission: turn serialization and input merging.

use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use rill::{ObserverAction, TurnFlags, VarSignal, observe};
use rill_tests::{FiringLog, engine_matrix};

/// Concurrent transactions on one domain are serialized; every staged
/// increment lands.
#[test]
fn concurrent_transactions_serialize() {
    for (name, domain) in engine_matrix() {
        let counter = VarSignal::new(&domain, 0);

        thread::scope(|scope| {
            for _ in 0..8 {
                let domain = domain.clone();
                let counter = counter.clone();
                scope.spawn(move || {
                    for _ in 0..10 {
                        domain
                            .transaction(|tx| counter.modify(tx, |v| *v += 1))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(counter.get(), 80, "{name}");
    }
}

/// While a prior turn is propagating, three async submitters coalesce
/// into a single follow-up turn: the counter gains all three
/// increments, dependents observe exactly one additional firing.
#[test]
fn async_inputs_merge_into_one_turn() {
    for (name, domain) in engine_matrix() {
        let a = VarSignal::new(&domain, 0);
        let mirrored = a.signal().map(|v| *v);

        let log = FiringLog::new();
        let sink = log.clone();
        let _obs = observe(&mirrored, move |value: &i32, _ctx| {
            sink.push(*value);
            ObserverAction::Continue
        });

        // All four parties rendezvous, then the holder keeps the first
        // turn open long enough for the submitters to pile up behind it.
        let barrier = Barrier::new(4);

        thread::scope(|scope| {
            let holder = {
                let domain = domain.clone();
                let barrier = &barrier;
                scope.spawn(move || {
                    domain
                        .transaction(|_tx| {
                            barrier.wait();
                            thread::sleep(Duration::from_millis(400));
                        })
                        .unwrap();
                })
            };

            // First submitter becomes the blocked follow-up turn...
            let first = {
                let domain = domain.clone();
                let a = a.clone();
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    domain
                        .async_transaction(TurnFlags::MERGING, move |tx| {
                            a.modify(tx, |v| *v += 1);
                        })
                        .unwrap();
                })
            };

            // ...the rest merge into it while it waits.
            let mergers: Vec<_> = (0..2)
                .map(|_| {
                    let domain = domain.clone();
                    let a = a.clone();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        thread::sleep(Duration::from_millis(100));
                        domain
                            .async_transaction(TurnFlags::MERGING, move |tx| {
                                a.modify(tx, |v| *v += 1);
                            })
                            .unwrap();
                    })
                })
                .collect();

            holder.join().unwrap();
            first.join().unwrap();
            for merger in mergers {
                merger.join().unwrap();
            }
        });

        assert_eq!(a.get(), 3, "{name}: all increments landed");
        assert_eq!(log.snapshot(), vec![3], "{name}: one follow-up firing");
    }
}
