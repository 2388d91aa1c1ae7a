//! A sink feeding a three-deep `map` chain, summed by an outside
//! listener. Run with `cargo run -p frp-demos --bin chained-map`.

use frp::{Runtime, RuntimeConfig, StreamSink};

fn main() {
    tracing_subscriber::fmt::init();

    let runtime = Runtime::new();
    let sink = StreamSink::<i64>::new(&runtime);
    let chain = sink.as_stream().map(|v| v + 1).map(|v| v + 1).map(|v| v + 1);

    let total = std::sync::Arc::new(std::sync::Mutex::new(0i64));
    let captured = total.clone();
    let _listener = chain.listen(move |v| *captured.lock().unwrap() += *v);

    runtime.build(RuntimeConfig::default()).expect("build failed");

    for value in [1, 2, 3] {
        sink.send(value).expect("send failed");
    }

    let sum = *total.lock().unwrap();
    println!("sum of (n+1)+(n+1)+(n+1) for n in [1,2,3] = {sum}");
    assert_eq!(sum, 4 + 5 + 6);

    runtime.stop_execution();
}
