use std::sync::{Arc, Mutex};

use frp_core::{Runtime, RuntimeConfig, Transaction};

use crate::{CellSink, StreamSink};

fn pick(index: &i64, letters: &String) -> char {
    letters.chars().nth(*index as usize).expect("index in range")
}

/// `s.snapshot(c, pick)` must read `c` as of the *start* of whichever
/// transaction `s` fires in, even when that same transaction also
/// writes a new value into `c`.
#[test]
fn snapshot_reads_the_cells_pre_transaction_value() {
    let runtime = Runtime::new();
    let s: StreamSink<i64> = StreamSink::new(&runtime);
    let c: CellSink<String> = CellSink::new(&runtime, "ABC".to_string());

    let picked = s.as_stream().snapshot(&c.as_cell(), pick);
    let history = Arc::new(Mutex::new(String::new()));
    let captured = history.clone();
    let _listener = picked.listen(move |ch| captured.lock().unwrap().push(*ch));

    runtime.build(RuntimeConfig::default()).unwrap();

    s.send(1).unwrap(); // 'B'
    s.send(2).unwrap(); // 'C'
    s.send(0).unwrap(); // 'A'

    // Both sends land in the same transaction: the snapshot must still
    // see "ABC", not the "XYZ" being written alongside it.
    {
        let scope = Transaction::new(&runtime).unwrap();
        s.send(2).unwrap(); // reads pre-transaction "ABC" -> 'C'
        c.send("XYZ".to_string()).unwrap();
        scope.get_join_handler().join();
    }

    s.send(1).unwrap(); // cell is now "XYZ" -> 'Y'

    assert_eq!(history.lock().unwrap().as_str(), "BCACY");

    runtime.stop_execution();
}
