use std::sync::{Arc, Mutex};

use frp_core::{Runtime, RuntimeConfig};

use crate::{GlobalCellLoop, Stream, StreamSink};

/// `s1` lives in the default cluster; `cg` is built inside its own named
/// cluster to make sure the feedback genuinely crosses a cluster
/// boundary rather than happening to share one.
fn running_total(runtime: &Runtime) -> (StreamSink<i64>, Stream<i64>) {
    let s1 = StreamSink::new(runtime);
    let cg = {
        let _scope = runtime.enter_cluster("accumulator");
        GlobalCellLoop::<i64>::new(runtime)
    };
    let combined = s1.as_stream().snapshot(&cg.as_cell(), |sent, total| sent + total);
    let held = combined.hold(0);
    cg.loop_(&held, 0, |v| v).unwrap();
    (s1, combined)
}

#[test]
fn feedback_across_clusters_accumulates_one_transaction_late() {
    let runtime = Runtime::new();
    let (s1, combined) = running_total(&runtime);

    let history = Arc::new(Mutex::new(Vec::new()));
    let captured = history.clone();
    let _listener = combined.listen(move |v| captured.lock().unwrap().push(*v));

    runtime.build(RuntimeConfig::default()).unwrap();

    s1.send(1).unwrap();
    s1.send(2).unwrap();
    s1.send(3).unwrap();

    let seen = history.lock().unwrap().clone();
    assert_eq!(seen, vec![1, 3, 6]);
    assert_eq!(seen.iter().sum::<i64>(), 10);

    runtime.stop_execution();
}
