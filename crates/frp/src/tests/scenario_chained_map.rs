use std::sync::{Arc, Mutex};

use frp_core::{Runtime, RuntimeConfig};

use crate::StreamSink;

fn chained_sum_of_three(runtime: &Runtime) -> (StreamSink<i64>, Arc<Mutex<i64>>) {
    let sink = StreamSink::new(runtime);
    let chain = sink.as_stream().map(|v| v + 1).map(|v| v + 1).map(|v| v + 1);
    let sum = Arc::new(Mutex::new(0i64));
    let captured = sum.clone();
    // The closure lives inside the chain's own node now; the returned
    // handle isn't needed again.
    let _listener = chain.listen(move |v| *captured.lock().unwrap() += *v);
    (sink, sum)
}

#[test]
fn three_sends_through_a_triple_map_chain_sum_to_fifteen() {
    let runtime = Runtime::new();
    let (sink, sum) = chained_sum_of_three(&runtime);
    runtime.build(RuntimeConfig::default()).unwrap();

    sink.send(1).unwrap();
    sink.send(2).unwrap();
    sink.send(3).unwrap();

    // 1 -> 2 -> 3 -> 4, 2 -> 3 -> 4 -> 5, 3 -> 4 -> 5 -> 6
    assert_eq!(*sum.lock().unwrap(), 4 + 5 + 6);

    runtime.stop_execution();
}
