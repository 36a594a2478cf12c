#![no_main]

use libfuzzer_sys::fuzz_target;
use neutrix_core::{Path, resolve_path};

fuzz_target!(|input: &str| {
    let path = Path::parse(input);

    // Normalization is idempotent.
    assert_eq!(Path::parse(&path.to_dotted()), path);
    assert_eq!(resolve_path(input), path.segments());

    for segment in path.segments() {
        assert!(!segment.is_empty());
        assert!(!segment.contains('.'));
    }
});
