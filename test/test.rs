// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! End-to-end scenarios: a Task Planner and a Vision subsystem bootstrap
//! over localhost and exchange Start/Stop/Wait/Return/Read/Write traffic.
//! Every test uses its own bootstrap port so they can run in parallel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use openrobo::{Message, Operations, Runtime, SubsystemInfo};

const RECV_TIMEOUT: Duration = Duration::from_secs(20);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before the epoch")
        .as_secs_f64()
}

fn roster_set(entries: Vec<SubsystemInfo>) -> HashSet<(String, String, u16)> {
    entries.into_iter().map(|info| (info.id, info.ip, info.port)).collect()
}

#[test]
fn two_peer_bootstrap_gives_both_sides_the_same_roster() {
    init_logging();
    let (tp_tx, tp_rx) = mpsc::channel();
    let (vs_tx, vs_rx) = mpsc::channel();

    thread::spawn(move || {
        let mut vs = Runtime::startup("VS").unwrap();
        vs.make_connection("127.0.0.1", 5480).unwrap();
        vs_tx.send(vs.table().iter().cloned().collect::<Vec<_>>()).unwrap();
        vs.run(Operations::new()).ok();
    });

    thread::spawn(move || {
        let mut tp = Runtime::startup("TP").unwrap();
        tp.accept_connection(5480, &["VS"]).unwrap();
        tp_tx.send(tp.table().iter().cloned().collect::<Vec<_>>()).unwrap();
        tp.run(Operations::new()).ok();
    });

    let tp_table = tp_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let vs_table = vs_rx.recv_timeout(RECV_TIMEOUT).unwrap();

    let ids: HashSet<&str> = tp_table.iter().map(|info| info.id.as_str()).collect();
    assert_eq!(["TP", "VS"].iter().copied().collect::<HashSet<_>>(), ids);
    for info in &tp_table {
        assert_eq!("127.0.0.1", info.ip);
    }

    assert_eq!(roster_set(tp_table), roster_set(vs_table));
}

#[test]
fn remote_start_runs_the_operation_and_returns_its_value() {
    init_logging();
    let (done_tx, done_rx) = mpsc::channel();

    thread::spawn(move || {
        let mut vs = Runtime::startup("VS").unwrap();
        vs.make_connection("127.0.0.1", 5481).unwrap();

        let ops = Operations::new().operation("Grasp", |_worker, _msg| 7);
        vs.run(ops).ok();
    });

    thread::spawn(move || {
        let mut tp = Runtime::startup("TP").unwrap();
        tp.accept_connection(5481, &["VS"]).unwrap();
        tp.create_subthread("driver", vec![], move |worker, _args| {
            let mut start = Message::start("Grasp").unwrap();
            worker.send_command("VS", &mut start).unwrap();

            let ack = worker.receive_return("VS").unwrap();
            assert_eq!(0, ack.return_value().unwrap());

            let done = worker.wait_operation("VS", "Grasp").unwrap();
            done_tx.send(done.return_value().unwrap()).unwrap();
            0
        })
        .unwrap();
        tp.run(Operations::new()).ok();
    });

    assert_eq!(7, done_rx.recv_timeout(RECV_TIMEOUT).unwrap());
}

#[test]
fn read_before_any_write_reports_no_value() {
    init_logging();
    let (done_tx, done_rx) = mpsc::channel();

    thread::spawn(move || {
        let mut vs = Runtime::startup("VS").unwrap();
        vs.make_connection("127.0.0.1", 5482).unwrap();
        vs.run(Operations::new()).ok();
    });

    thread::spawn(move || {
        let mut tp = Runtime::startup("TP").unwrap();
        tp.accept_connection(5482, &["VS"]).unwrap();
        tp.create_subthread("driver", vec![], move |worker, _args| {
            let mut read = Message::read("Pose").unwrap();
            worker.send_command("VS", &mut read).unwrap();

            let reply = worker.receive_return("VS").unwrap();
            assert_eq!(-8, reply.return_value().unwrap());
            assert!(!reply.has_param("x"));
            assert!(reply.time().is_err());

            done_tx.send(()).unwrap();
            0
        })
        .unwrap();
        tp.run(Operations::new()).ok();
    });

    done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
}

#[test]
fn write_then_read_returns_the_payload_with_a_timestamp() {
    init_logging();
    let (t0_tx, t0_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    thread::spawn(move || {
        let mut vs = Runtime::startup("VS").unwrap();
        vs.make_connection("127.0.0.1", 5483).unwrap();
        vs.create_subthread("writer", vec![], move |worker, _args| {
            let t0 = unix_now();
            let mut write = Message::write("Pose").unwrap();
            write.set_double("x", 1.5).unwrap();
            worker.send_command("VS", &mut write).unwrap();

            let ack = worker.receive_return("VS").unwrap();
            assert_eq!(0, ack.return_value().unwrap());

            t0_tx.send(t0).unwrap();
            0
        })
        .unwrap();
        vs.run(Operations::new()).ok();
    });

    thread::spawn(move || {
        let mut tp = Runtime::startup("TP").unwrap();
        tp.accept_connection(5483, &["VS"]).unwrap();
        tp.create_subthread("reader", vec![], move |worker, _args| {
            let t0: f64 = go_rx.recv().unwrap();

            let mut read = Message::read("Pose").unwrap();
            worker.send_command("VS", &mut read).unwrap();

            let reply = worker.receive_return("VS").unwrap();
            assert_eq!(0, reply.return_value().unwrap());
            assert_eq!(1.5, reply.get_double("x").unwrap());

            let stamp = reply.time().unwrap();
            let t1 = unix_now();
            assert!(
                stamp >= t0 - 0.5 && stamp <= t1 + 0.5,
                "stamp {} outside of [{}, {}]",
                stamp,
                t0,
                t1
            );

            done_tx.send(()).unwrap();
            0
        })
        .unwrap();
        tp.run(Operations::new()).ok();
    });

    let t0 = t0_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    go_tx.send(t0).unwrap();
    done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
}

#[test]
fn stop_reaches_a_polling_operation() {
    init_logging();
    let (done_tx, done_rx) = mpsc::channel();

    thread::spawn(move || {
        let mut vs = Runtime::startup("VS").unwrap();
        vs.make_connection("127.0.0.1", 5484).unwrap();

        let ops = Operations::new().operation("Spin", |worker, _msg| {
            while worker.check_working() {
                thread::sleep(Duration::from_millis(10));
            }
            42
        });
        vs.run(ops).ok();
    });

    thread::spawn(move || {
        let mut tp = Runtime::startup("TP").unwrap();
        tp.accept_connection(5484, &["VS"]).unwrap();
        tp.create_subthread("driver", vec![], move |worker, _args| {
            let mut start = Message::start("Spin").unwrap();
            worker.send_command("VS", &mut start).unwrap();

            let ack = worker.receive_return("VS").unwrap();
            assert_eq!(0, ack.return_value().unwrap());

            let done = worker.stop_operation("VS", "Spin").unwrap();
            done_tx.send(done.return_value().unwrap()).unwrap();
            0
        })
        .unwrap();
        tp.run(Operations::new()).ok();
    });

    assert_eq!(42, done_rx.recv_timeout(RECV_TIMEOUT).unwrap());
}

#[test]
fn a_second_identical_start_is_rejected_without_spawning() {
    init_logging();
    let (done_tx, done_rx) = mpsc::channel();
    let spawned = Arc::new(AtomicUsize::new(0));
    let spawned_in_op = spawned.clone();

    thread::spawn(move || {
        let mut vs = Runtime::startup("VS").unwrap();
        vs.make_connection("127.0.0.1", 5485).unwrap();

        let ops = Operations::new().operation("Grasp", move |_worker, _msg| {
            spawned_in_op.fetch_add(1, Ordering::SeqCst);
            // stay alive long enough for the duplicate start to arrive
            thread::sleep(Duration::from_millis(300));
            7
        });
        vs.run(ops).ok();
    });

    thread::spawn(move || {
        let mut tp = Runtime::startup("TP").unwrap();
        tp.accept_connection(5485, &["VS"]).unwrap();
        tp.create_subthread("driver", vec![], move |worker, _args| {
            let mut first = Message::start("Grasp").unwrap();
            worker.send_command("VS", &mut first).unwrap();
            let mut second = Message::start("Grasp").unwrap();
            worker.send_command("VS", &mut second).unwrap();

            // one init acknowledgement, one rejection; the forwarding
            // order depends on when the spawned thread checks in
            let mut codes = vec![
                worker.receive_return("VS").unwrap().return_value().unwrap(),
                worker.receive_return("VS").unwrap().return_value().unwrap(),
            ];
            codes.sort();
            assert_eq!(vec![-4, 0], codes);

            let done = worker.wait_operation("VS", "Grasp").unwrap();
            assert_eq!(7, done.return_value().unwrap());

            done_tx.send(()).unwrap();
            0
        })
        .unwrap();
        tp.run(Operations::new()).ok();
    });

    done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(1, spawned.load(Ordering::SeqCst));
}
