//! Futex wait/wake behavior: per-record waits, any-change waits,
//! timeouts, and spurious-wake absorption.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_wait_times_out_without_update() {
    let dir = tempfile::tempdir().unwrap();
    let store = common::writer_store(dir.path());
    store.add("a.b", "v").unwrap();
    let pr = store.find("a.b").unwrap();

    let started = Instant::now();
    let result = store.wait(Some(&pr), pr.serial(), Some(Duration::from_millis(50)));
    assert!(result.is_none());
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_wait_returns_after_update() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(common::writer_store(dir.path()));
    store.add("a.b", "v").unwrap();
    let pr = store.find("a.b").unwrap();
    let old_serial = pr.serial();

    let waiter = {
        let store = Arc::clone(&store);
        let pr = pr.clone();
        thread::spawn(move || store.wait(Some(&pr), old_serial, Some(Duration::from_secs(5))))
    };

    thread::sleep(Duration::from_millis(20));
    store.update(&pr, "w").unwrap();

    let new_serial = waiter.join().unwrap().expect("wait timed out");
    assert!(new_serial != old_serial);
    assert_eq!(new_serial & 1, 0);
    assert_eq!((new_serial >> 24) as usize, 1);
}

#[test]
fn test_wait_with_stale_serial_returns_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let store = common::writer_store(dir.path());
    store.add("a.b", "v").unwrap();
    let pr = store.find("a.b").unwrap();
    let old_serial = pr.serial();
    store.update(&pr, "w").unwrap();

    // The serial already moved; the futex refuses to sleep.
    let new_serial = store
        .wait(Some(&pr), old_serial, Some(Duration::from_secs(5)))
        .expect("wait timed out");
    assert_eq!(new_serial, pr.serial());
}

#[test]
fn test_wait_any_wakes_on_add() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(common::writer_store(dir.path()));
    let s0 = store.area_serial().unwrap();

    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.wait(None, s0, Some(Duration::from_secs(1))))
    };

    thread::sleep(Duration::from_millis(20));
    store.add("x.y", "1").unwrap();

    let new_serial = waiter.join().unwrap().expect("wait_any timed out");
    assert!(new_serial > s0);

    // With a stale baseline the indefinite wait returns at once.
    let newest = store.wait_any(s0).unwrap();
    assert!(newest > s0);
}

#[test]
fn test_wait_any_wakes_on_update() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(common::writer_store(dir.path()));
    store.add("x.y", "1").unwrap();
    let s0 = store.area_serial().unwrap();

    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.wait(None, s0, Some(Duration::from_secs(1))))
    };

    thread::sleep(Duration::from_millis(20));
    let pr = store.find("x.y").unwrap();
    store.update(&pr, "2").unwrap();

    let new_serial = waiter.join().unwrap().expect("wait_any timed out");
    assert!(new_serial > s0);
}

#[test]
fn test_waiter_observes_contributing_update() {
    // A reader that observes the new area-serial must also observe the
    // update that produced it.
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(common::writer_store(dir.path()));
    store.add("a.b", "before").unwrap();
    let s0 = store.area_serial().unwrap();

    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let serial = store.wait(None, s0, Some(Duration::from_secs(5)));
            assert!(serial.is_some());
            store.get("a.b")
        })
    };

    thread::sleep(Duration::from_millis(20));
    let pr = store.find("a.b").unwrap();
    store.update(&pr, "after").unwrap();

    assert_eq!(waiter.join().unwrap(), "after");
}

#[test]
fn test_every_update_wakes_a_fresh_wait() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(common::writer_store(dir.path()));
    store.add("a.b", "0").unwrap();
    let pr = store.find("a.b").unwrap();

    let writer = {
        let store = Arc::clone(&store);
        let pr = pr.clone();
        thread::spawn(move || {
            for i in 1..=20 {
                store.update(&pr, &i.to_string()).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    // Chain waits: each completed wait hands back the serial to wait
    // past next. Every wake carries a strictly newer serial.
    let mut serial = pr.serial();
    let mut wakes = 0;
    while let Some(next) = store.wait(Some(&pr), serial, Some(Duration::from_millis(500))) {
        assert_ne!(next, serial);
        serial = next;
        wakes += 1;
        if wakes >= 20 {
            break;
        }
    }
    writer.join().unwrap();
    assert!(wakes > 0);
    assert_eq!(store.read(&pr).0, "20");
}
