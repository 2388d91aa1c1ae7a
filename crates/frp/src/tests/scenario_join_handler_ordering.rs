use std::sync::{Arc, Mutex as StdMutex};

use frp_core::{Runtime, RuntimeConfig, Transaction};

use crate::StreamSink;

/// `Transaction::get_join_handler` hands back a handle to *this*
/// transaction's own completion; it says nothing about the order other
/// transactions finalize in. That order is fixed the moment each
/// transaction is opened (its id), not the order its handle happens to
/// be joined in.
#[test]
fn finalize_order_follows_transaction_order_regardless_of_join_order() {
    let runtime = Runtime::new();

    let gate = Arc::new(StdMutex::new(()));
    let guard = gate.lock().unwrap();

    let sink: StreamSink<char> = StreamSink::new(&runtime);
    let gated = {
        let gate = gate.clone();
        sink.as_stream().map(move |c| {
            // Blocks until the test releases `guard` below, so all
            // three transactions opened under `open` are genuinely
            // in flight before any of them can finalize.
            drop(gate.lock().unwrap());
            *c
        })
    };

    let log = Arc::new(StdMutex::new(String::new()));
    let captured = log.clone();
    let _listener = gated.listen(move |c| captured.lock().unwrap().push(*c));

    runtime
        .build(RuntimeConfig {
            use_parallel_execution: true,
            ..Default::default()
        })
        .unwrap();

    let open = |letter: char| {
        let scope = Transaction::new(&runtime).unwrap();
        sink.send(letter).unwrap();
        scope.get_join_handler()
    };

    let a = open('A');
    let b = open('B');
    let c = open('C');

    drop(guard);
    log.lock().unwrap().push('Z');

    // Join in reverse order of how the transactions were opened.
    c.join();
    b.join();
    a.join();

    assert_eq!(log.lock().unwrap().as_str(), "ZABC");

    runtime.stop_execution();
}
