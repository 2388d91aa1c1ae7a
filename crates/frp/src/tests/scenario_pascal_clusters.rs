//! Ported from `original_source/example/pascal-triangle.cpp`: a Pascal's
//! triangle of height `HEIGHT`, each interior node wrapped in its own
//! cluster the same way the original wraps each node in a fresh
//! `prf::Cluster`. Every node (edge or interior) does a fixed chunk of
//! work; summing the bottom row should equal `2^(HEIGHT - 1)`, the count
//! of root-to-leaf paths, and running with parallel execution enabled
//! should beat running with it disabled whenever more than one core is
//! available.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use frp_core::{Runtime, RuntimeConfig};

use crate::{Stream, StreamSink};

const HEIGHT: usize = 10;
const NODE_DELAY: Duration = Duration::from_millis(15);

fn build_pascal(runtime: &Runtime) -> (StreamSink<i64>, Arc<Mutex<i64>>) {
    let root = StreamSink::<i64>::new(runtime);
    let mut level: Vec<Stream<i64>> = vec![root.as_stream()];

    for row in 2..=HEIGHT {
        let mut next = Vec::with_capacity(row);
        for col in 0..row {
            let _cluster = runtime.enter_cluster(format!("pascal-{row}-{col}"));
            let node = if col == 0 {
                level[0].map(|n| {
                    std::thread::sleep(NODE_DELAY);
                    *n
                })
            } else if col + 1 == row {
                level[col - 1].map(|n| {
                    std::thread::sleep(NODE_DELAY);
                    *n
                })
            } else {
                level[col - 1].merge(&level[col], |a, b| {
                    std::thread::sleep(NODE_DELAY);
                    a + b
                })
            };
            next.push(node);
        }
        level = next;
    }

    let sum = Arc::new(Mutex::new(0i64));
    for stream in &level {
        let captured = sum.clone();
        let _ = stream.listen(move |n| *captured.lock().unwrap() += *n);
    }
    (root, sum)
}

fn run_once(parallel: bool) -> (i64, Duration) {
    let runtime = Runtime::new();
    let (root, sum) = build_pascal(&runtime);
    runtime
        .build(RuntimeConfig {
            use_parallel_execution: parallel,
            ..Default::default()
        })
        .unwrap();

    let start = Instant::now();
    root.send(1).unwrap();
    let elapsed = start.elapsed();

    let total = *sum.lock().unwrap();
    runtime.stop_execution();
    (total, elapsed)
}

#[test]
fn terminal_row_sums_to_two_to_the_height_minus_one() {
    let (total, _) = run_once(false);
    assert_eq!(total, 1i64 << (HEIGHT - 1));
}

#[test]
fn parallel_execution_beats_sequential_on_multiple_cores() {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    if cores < 2 {
        // Nothing to parallelize over; the correctness test above
        // already covers this configuration.
        return;
    }

    let (total_seq, seq_time) = run_once(false);
    let (total_par, par_time) = run_once(true);

    assert_eq!(total_seq, 1i64 << (HEIGHT - 1));
    assert_eq!(total_par, 1i64 << (HEIGHT - 1));
    assert!(
        par_time < seq_time,
        "parallel run ({par_time:?}) was not faster than sequential ({seq_time:?})"
    );
}
