/// SPSC ring buffer ordering and capacity tests

use feed_pipeline::ring_buffer::channel;
use proptest::prelude::*;
use std::thread;

#[derive(Debug, Clone)]
enum Op {
    Push(u32),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u32>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    /// Any interleaving of pushes and pops behaves like a bounded FIFO queue.
    #[test]
    fn prop_fifo_matches_model(ops in prop::collection::vec(op(), 0..512)) {
        let (mut tx, mut rx) = channel::<u32, 16>();
        let mut model = std::collections::VecDeque::new();

        for op in ops {
            match op {
                Op::Push(v) => {
                    let accepted = tx.try_push(v).is_ok();
                    prop_assert_eq!(accepted, model.len() < 15);
                    if accepted {
                        model.push_back(v);
                    }
                }
                Op::Pop => {
                    prop_assert_eq!(rx.try_pop(), model.pop_front());
                }
            }
            prop_assert_eq!(rx.len(), model.len());
        }
    }
}

#[test]
fn test_full_reports_capacity_minus_one() {
    let (mut tx, rx) = channel::<u8, 64>();
    assert_eq!(tx.capacity(), 63);
    for i in 0..63 {
        tx.try_push(i).unwrap();
    }
    assert!(tx.is_full());
    assert_eq!(tx.try_push(0), Err(0));
    assert_eq!(rx.len(), 63);
}

#[test]
fn test_empty_pop_returns_none() {
    let (_tx, mut rx) = channel::<String, 4>();
    assert!(rx.is_empty());
    assert_eq!(rx.try_pop(), None);
}

#[test]
fn test_cross_thread_order_preserved() {
    const COUNT: u64 = 1_000_000;
    let (mut tx, mut rx) = channel::<u64, 1024>();

    let producer = thread::spawn(move || {
        for i in 0..COUNT {
            let mut item = i;
            loop {
                match tx.try_push(item) {
                    Ok(()) => break,
                    Err(back) => {
                        item = back;
                        std::hint::spin_loop();
                    }
                }
            }
        }
    });

    let mut next = 0u64;
    while next < COUNT {
        match rx.try_pop() {
            Some(v) => {
                assert_eq!(v, next);
                next += 1;
            }
            None => std::hint::spin_loop(),
        }
    }
    producer.join().unwrap();
    assert!(rx.try_pop().is_none());
}

#[test]
fn test_owned_values_move_across_threads() {
    let (mut tx, mut rx) = channel::<Vec<u8>, 8>();
    let producer = thread::spawn(move || {
        for i in 0..100u8 {
            let mut item = vec![i; i as usize];
            while let Err(back) = tx.try_push(item) {
                item = back;
                thread::yield_now();
            }
        }
    });

    let mut received = 0u8;
    while received < 100 {
        if let Some(v) = rx.try_pop() {
            assert_eq!(v.len(), received as usize);
            assert!(v.iter().all(|b| *b == received));
            received += 1;
        } else {
            thread::yield_now();
        }
    }
    producer.join().unwrap();
}
