#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use neutrix_core::{Path, Value, delete_in, get_in, set_in};

#[derive(Debug, Arbitrary)]
enum Op {
    Set { path: String, value: i64 },
    Delete { path: String },
}

/// Keep list padding bounded.
fn tractable(path: &Path) -> bool {
    path.len() <= 16
        && path
            .segments()
            .iter()
            .all(|s| s.parse::<usize>().map_or(true, |i| i <= 64))
}

fuzz_target!(|ops: Vec<Op>| {
    let mut state = Value::map();
    for op in ops.into_iter().take(64) {
        let before = state.clone();
        let snapshot = before.clone();
        match op {
            Op::Set { path, value } => {
                let path = Path::parse(&path);
                if !tractable(&path) {
                    continue;
                }
                state = set_in(&before, &path, Value::from(value));
                assert_eq!(get_in(&state, &path), Some(&Value::from(value)));
            }
            Op::Delete { path } => {
                let path = Path::parse(&path);
                let existed = get_in(&before, &path).is_some();
                state = delete_in(&before, &path);
                if !existed {
                    assert_eq!(state, before);
                }
            }
        }
        // Updates never mutate the tree they start from.
        assert_eq!(before, snapshot);
    }
});
