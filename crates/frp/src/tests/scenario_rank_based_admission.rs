//! Exercises the rank-based planner's admission rule directly: three
//! independent listener chains, one per cluster, each gated on a 3-way
//! rendezvous barrier that only releases once all three are genuinely
//! in flight at once. If the planner ever serialized same-rank clusters
//! belonging to the same transaction, this test would hang rather than
//! fail an assertion — `available_parallelism` headroom is irrelevant
//! to correctness here, only to how slowly it hangs.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Barrier};

use frp_core::{Runtime, RuntimeConfig, Transaction};

use crate::StreamSink;

fn build_three_chains(runtime: &Runtime, barrier: Arc<Barrier>) -> (StreamSink<i64>, StreamSink<i64>, StreamSink<i64>, Arc<AtomicI64>) {
    let total = Arc::new(AtomicI64::new(0));

    let s1 = StreamSink::<i64>::new(runtime);
    let s2 = StreamSink::<i64>::new(runtime);
    let s3 = StreamSink::<i64>::new(runtime);

    let chain = |sink: &StreamSink<i64>, cluster_name: &str, barrier: Arc<Barrier>| {
        let _scope = runtime.enter_cluster(cluster_name);
        sink.as_stream().map(move |v| {
            // Blocks until two sibling clusters are also mid-update for
            // this same transaction; only the rank-based planner's
            // "every same-rank cluster may run concurrently" rule can
            // get all three here at once.
            barrier.wait();
            *v
        })
    };

    let c1 = chain(&s1, "chain-1", barrier.clone());
    let c2 = chain(&s2, "chain-2", barrier.clone());
    let c3 = chain(&s3, "chain-3", barrier);

    for chain in [c1, c2, c3] {
        let captured = total.clone();
        let _ = chain.listen(move |v| {
            captured.fetch_add(*v, Ordering::SeqCst);
        });
    }

    (s1, s2, s3, total)
}

#[test]
fn three_same_rank_clusters_in_one_transaction_run_concurrently() {
    let runtime = Runtime::new();
    let barrier = Arc::new(Barrier::new(3));
    let (s1, s2, s3, total) = build_three_chains(&runtime, barrier);

    runtime
        .build(RuntimeConfig {
            use_parallel_execution: true,
            ..Default::default()
        })
        .unwrap();

    let rounds: [(i64, i64, i64); 3] = [(1, 2, 3), (4, 5, 6), (7, 8, 9)];
    for (a, b, c) in rounds {
        // All three sends land in one transaction, so all three clusters
        // are scheduled against the same transaction id; the barrier
        // only clears if the planner admits all three concurrently.
        let scope = Transaction::new(&runtime).unwrap();
        s1.send(a).unwrap();
        s2.send(b).unwrap();
        s3.send(c).unwrap();
        scope.get_join_handler().join();
    }

    let expected: i64 = rounds.iter().map(|(a, b, c)| a + b + c).sum();
    assert_eq!(total.load(Ordering::SeqCst), expected);

    runtime.stop_execution();
}
