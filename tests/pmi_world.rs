mod common;

use common::{new_log, probe_registry, run_world, CountingCommunicator, Event, Foo};
use pmi::{ObjectId, Opcode, Pmi, PmiConfig, PmiError, Snapshot, WorkerState};

fn events_named(log: &[Event], name: &str) -> Vec<usize> {
    log.iter()
        .filter_map(|event| match event {
            Event::Invoked(n, serial) if *n == name => Some(*serial),
            _ => None,
        })
        .collect()
}

#[test]
fn foo_bar_scenario_routes_one_call_per_rank() {
    let results = run_world(4, |comm| {
        let log = new_log();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            let a = pmi.create::<Foo>().unwrap();
            let b = pmi.create::<Foo>().unwrap();
            let c = pmi.create::<Foo>().unwrap();
            assert_eq!(
                (a.id(), b.id(), c.id()),
                (ObjectId(0), ObjectId(1), ObjectId(2))
            );
            pmi.destroy(b).unwrap();
            let d = pmi.create::<Foo>().unwrap();
            assert_eq!(d.id(), ObjectId(1));
            pmi.invoke(&c, "bar").unwrap();
            assert_eq!(pmi.local(&c).unwrap().calls, 1);
            assert_eq!(pmi.local(&a).unwrap().calls, 0);
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
            assert_eq!(pmi.worker_state(), WorkerState::Finished);
        }
        let snapshot = pmi.snapshot();
        let events = log.borrow().clone();
        (snapshot, events)
    });

    for (snapshot, events) in &results {
        assert_eq!(
            *snapshot,
            Snapshot {
                classes: 1,
                methods: 1,
                table_len: 3,
                live_objects: vec![ObjectId(0), ObjectId(1), ObjectId(2)],
            }
        );
        // the third instance built on each rank sits in slot 2
        assert_eq!(events_named(events, "Foo::bar"), vec![2]);
        assert_eq!(
            &events[..5],
            &[
                Event::Created(0),
                Event::Created(1),
                Event::Created(2),
                Event::Dropped(1),
                Event::Created(3),
            ]
        );
    }
}

#[test]
fn every_worker_observes_the_controller_sequence() {
    let results = run_world(5, |comm| {
        let log = new_log();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            let mut foos = Vec::new();
            let mut bazs = Vec::new();
            // a fixed but irregular script
            for step in 0..40usize {
                match step % 7 {
                    0 | 3 => foos.push(pmi.create::<Foo>().unwrap()),
                    1 => bazs.push(pmi.create::<common::Baz>().unwrap()),
                    2 | 5 => {
                        if let Some(foo) = foos.get(step % foos.len().max(1)) {
                            pmi.invoke(foo, if step % 2 == 0 { "bar" } else { "qux" }).unwrap();
                        }
                    }
                    4 => {
                        if let Some(baz) = bazs.last() {
                            pmi.invoke(baz, "bar").unwrap();
                        }
                    }
                    _ => {
                        if foos.len() > 1 {
                            let foo = foos.remove(step % foos.len());
                            pmi.destroy(foo).unwrap();
                        }
                    }
                }
            }
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
        }
        let snapshot = pmi.snapshot();
        let events = log.borrow().clone();
        (snapshot, events)
    });

    let (snapshot, events) = &results[0];
    assert!(events.len() >= 40);
    for (other_snapshot, other_events) in &results[1..] {
        assert_eq!(other_snapshot, snapshot);
        assert_eq!(other_events, events);
    }
}

#[test]
fn association_is_idempotent_and_broadcast_once() {
    run_world(3, |comm| {
        let log = new_log();
        let (comm, broadcasts) = CountingCommunicator::new(comm);
        let mut pmi = Pmi::new(comm, PmiConfig::default(), probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            let first = pmi.associate_class("Foo").unwrap();
            let after_first = broadcasts.get();
            // one command and one name
            assert_eq!(after_first, 2);
            assert_eq!(pmi.associate_class("Foo").unwrap(), first);
            assert_eq!(broadcasts.get(), after_first);

            let method = pmi.associate_method("Foo::bar").unwrap();
            assert_eq!(pmi.associate_method("Foo::bar").unwrap(), method);
            assert_eq!(broadcasts.get(), 4);

            let foo = pmi.create::<Foo>().unwrap();
            assert_eq!(foo.class_id(), first);
            // both identities are known, so each verb costs one command
            pmi.invoke(&foo, "bar").unwrap();
            assert_eq!(broadcasts.get(), 6);
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
            assert_eq!(broadcasts.get(), 7);
        }
    });
}

#[test]
fn one_failing_worker_surfaces_its_message_on_the_controller() {
    let results = run_world(4, |comm| {
        let log = new_log();
        let rank = pmi::message::Communicator::rank(&comm);
        let mut registry = probe_registry(&log);
        registry
            .register_fallible_method::<Foo, _, _>("check", move |_| {
                if rank == 2 {
                    Err("M: rank 2 disagrees")
                } else {
                    Ok(())
                }
            })
            .unwrap();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), registry).unwrap();
        if pmi.is_controller() {
            let foo = pmi.create::<Foo>().unwrap();
            let err = pmi.invoke(&foo, "check").unwrap_err();
            assert!(err.is_user(), "{}", err);
            assert!(err.to_string().contains("M: rank 2 disagrees"), "{}", err);
            assert!(err.to_string().contains("Worker 2"), "{}", err);

            // nobody was left behind: the next call goes through everywhere
            pmi.invoke(&foo, "bar").unwrap();
            pmi.destroy(foo).unwrap();
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
        }
        let events = log.borrow().clone();
        events
    });
    for events in results {
        assert_eq!(events_named(&events, "Foo::bar"), vec![0]);
        assert_eq!(events.last(), Some(&Event::Dropped(0)));
    }
}

#[test]
fn worker_without_registration_is_a_user_error() {
    run_world(3, |comm| {
        let log = new_log();
        let rank = pmi::message::Communicator::rank(&comm);
        let registry = if rank == 1 {
            pmi::Registry::new()
        } else {
            probe_registry(&log)
        };
        let mut pmi = Pmi::new(comm, PmiConfig::default(), registry).unwrap();
        if pmi.is_controller() {
            let err = pmi.create::<Foo>().unwrap_err();
            assert!(err.is_user(), "{}", err);
            assert!(
                err.to_string().contains("Worker 1 has not registered class \"Foo\""),
                "{}",
                err
            );

            // the failure sticks: no further command reaches the workers
            let again = pmi.create::<common::Baz>().unwrap_err();
            assert_eq!(again.to_string(), err.to_string());
            let again = pmi.associate_method("Foo::bar").unwrap_err();
            assert_eq!(again.to_string(), err.to_string());
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
            let snapshot = pmi.snapshot();
            assert_eq!(snapshot.methods, 0);
            assert!(snapshot.live_objects.is_empty());
        }
    });
}

#[test]
fn panicking_method_is_reported_without_stalling() {
    run_world(3, |comm| {
        let log = new_log();
        let rank = pmi::message::Communicator::rank(&comm);
        let mut registry = probe_registry(&log);
        registry
            .register_method::<Foo, _>("explode", move |_| {
                if rank == 1 {
                    panic!("boom");
                }
            })
            .unwrap();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), registry).unwrap();
        if pmi.is_controller() {
            let foo = pmi.create::<Foo>().unwrap();
            let err = pmi.invoke(&foo, "explode").unwrap_err();
            assert!(matches!(err, PmiError::Other(_)), "{}", err);
            assert!(err.to_string().contains("callback panicked: boom"), "{}", err);
            pmi.invoke(&foo, "bar").unwrap();
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
        }
    });
}

#[test]
fn roles_are_checked_locally() {
    run_world(2, |comm| {
        let log = new_log();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            assert!(pmi.receive_object_id().unwrap_err().is_user());
            assert!(pmi.handle_next().unwrap_err().is_user());
            // a no-op on the controller
            pmi.worker_loop().unwrap();

            let foo = pmi.create::<Foo>().unwrap();
            pmi.end_workers().unwrap();
            assert!(!pmi.workers_active());

            let err = pmi.create::<Foo>().unwrap_err();
            assert!(err.is_user());
            assert!(err.to_string().contains("workers have been terminated"), "{}", err);
            assert!(pmi.invoke(&foo, "bar").unwrap_err().is_user());
            assert!(pmi.end_workers().unwrap_err().is_user());
            // the local instance still goes away
            pmi.destroy(foo).unwrap();
            assert_eq!(log.borrow().last(), Some(&Event::Dropped(0)));
        } else {
            let err = pmi.create::<Foo>().unwrap_err();
            assert!(err.is_user());
            assert!(
                err.to_string()
                    .starts_with("user error: Worker 1 tries to create a parallel object"),
                "{}",
                err
            );
            assert!(pmi.associate_class("Foo").unwrap_err().is_user());
            assert!(pmi.end_workers().unwrap_err().is_user());
            pmi.worker_loop().unwrap();
            assert!(pmi.handle_next().unwrap_err().is_user());
            assert_eq!(pmi.snapshot().live_objects, vec![ObjectId(0)]);
        }
    });
}

#[test]
fn object_ids_can_be_broadcast_directly() {
    let received = run_world(3, |comm| {
        let log = new_log();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            pmi.broadcast_object_id(ObjectId(7)).unwrap();
            pmi.end_workers().unwrap();
            None
        } else {
            let id = pmi.receive_object_id().unwrap();
            pmi.worker_loop().unwrap();
            Some(id)
        }
    });
    assert_eq!(received, vec![None, Some(ObjectId(7)), Some(ObjectId(7))]);
}

#[test]
fn receive_checks_the_expected_opcode() {
    run_world(2, |comm| {
        let log = new_log();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            let foo = pmi.create::<Foo>().unwrap();
            pmi.invoke(&foo, "bar").unwrap();
            pmi.end_workers().unwrap();
        } else {
            pmi.receive(Opcode::AssociateClass).unwrap();
            pmi.receive(Opcode::Create).unwrap();
            let err = pmi.receive(Opcode::Invoke).unwrap_err();
            assert!(err.is_user());
            assert!(err.to_string().contains("expected Invoke"), "{}", err);
            pmi.receive(Opcode::Invoke).unwrap();
            pmi.receive(Opcode::End).unwrap();
            assert_eq!(pmi.worker_state(), pmi::WorkerState::Finished);
        }
        let events = log.borrow().clone();
        assert_eq!(events_named(&events, "Foo::bar"), vec![0]);
    });
}

#[test]
fn fast_path_skips_the_status_gather() {
    run_world(3, |comm| {
        let log = new_log();
        let rank = pmi::message::Communicator::rank(&comm);
        let mut registry = probe_registry(&log);
        registry
            .register_fallible_method::<Foo, _, _>("check", move |_| {
                if rank == 1 {
                    Err("ignored on the fast path")
                } else {
                    Ok(())
                }
            })
            .unwrap();
        let config = PmiConfig::default().with_check_status(false);
        let mut pmi = Pmi::new(comm, config, registry).unwrap();
        if pmi.is_controller() {
            let foo = pmi.create::<Foo>().unwrap();
            pmi.invoke(&foo, "check").unwrap();
            pmi.invoke(&foo, "bar").unwrap();
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
        }
        let events = log.borrow().clone();
        assert_eq!(events_named(&events, "Foo::bar"), vec![0]);
    });
}

#[test]
fn dropping_the_controller_ends_the_workers() {
    let states = run_world(3, |comm| {
        let log = new_log();
        let mut pmi = Pmi::new(comm, PmiConfig::default(), probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            let foo = pmi.create::<Foo>().unwrap();
            pmi.invoke(&foo, "bar").unwrap();
            drop(pmi);
            None
        } else {
            pmi.worker_loop().unwrap();
            Some(pmi.worker_state())
        }
    });
    assert_eq!(
        states,
        vec![None, Some(WorkerState::Finished), Some(WorkerState::Finished)]
    );
}

#[test]
fn controller_can_be_any_rank() {
    let results = run_world(4, |comm| {
        let log = new_log();
        let config = PmiConfig::default().with_controller_rank(2);
        let mut pmi = Pmi::new(comm, config, probe_registry(&log)).unwrap();
        if pmi.is_controller() {
            assert_eq!(pmi.rank(), 2);
            let foo = pmi.create::<Foo>().unwrap();
            pmi.invoke(&foo, "qux").unwrap();
            pmi.destroy(foo).unwrap();
            pmi.end_workers().unwrap();
        } else {
            pmi.worker_loop().unwrap();
        }
        let events = log.borrow().clone();
        events
    });
    for events in results {
        assert_eq!(
            events,
            vec![
                Event::Created(0),
                Event::Invoked("Foo::qux", 0),
                Event::Dropped(0)
            ]
        );
    }
}
