//! Ported from `examples/original_source/example/pascal-triangle.cpp`: a
//! Pascal's-triangle dataflow of height 10, each interior node wrapped in
//! its own cluster so the rank-based planner can run independent rows
//! concurrently. Run with `cargo run -p frp-demos --bin pascal-triangle
//! -- yes` to enable parallel execution, or with no argument for the
//! sequential planner.

use std::time::{Duration, Instant};

use frp::{Runtime, RuntimeConfig, Stream, StreamSink};

const HEIGHT: usize = 10;
const NODE_DELAY: Duration = Duration::from_millis(15);

fn heavy_calculate(n: i64) -> i64 {
    std::thread::sleep(NODE_DELAY);
    n
}

fn build_pascal(runtime: &Runtime) -> (StreamSink<i64>, Vec<Stream<i64>>) {
    let root = StreamSink::<i64>::new(runtime);
    let mut level: Vec<Stream<i64>> = vec![root.as_stream()];

    for row in 2..=HEIGHT {
        let mut next = Vec::with_capacity(row);
        for col in 0..row {
            let _cluster = runtime.enter_cluster(format!("pascal-{row}-{col}"));
            let node = if col == 0 {
                level[0].map(|n| heavy_calculate(*n))
            } else if col + 1 == row {
                level[col - 1].map(|n| heavy_calculate(*n))
            } else {
                level[col - 1].merge(&level[col], |a, b| heavy_calculate(a + b))
            };
            next.push(node);
        }
        level = next;
    }

    (root, level)
}

fn main() {
    tracing_subscriber::fmt::init();

    let parallel = std::env::args().nth(1).as_deref() == Some("yes");

    let runtime = Runtime::new();
    let (root, terminal_row) = build_pascal(&runtime);

    let total = std::sync::Arc::new(std::sync::Mutex::new(0i64));
    for stream in &terminal_row {
        let captured = total.clone();
        let _ = stream.listen(move |n| *captured.lock().unwrap() += *n);
    }

    runtime
        .build(RuntimeConfig {
            use_parallel_execution: parallel,
            ..Default::default()
        })
        .expect("build failed");

    let start = Instant::now();
    root.send(1).expect("send failed");
    let elapsed = start.elapsed();

    let sum = *total.lock().unwrap();
    assert_eq!(sum, 1i64 << (HEIGHT - 1));
    println!(
        "height {HEIGHT} pascal triangle, parallel={parallel}: sum={sum}, elapsed={elapsed:?}"
    );

    runtime.stop_execution();
}
