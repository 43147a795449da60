#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate vexdb;

use vexdb::reader::{Callbacks, PbfReader};

// The reader only opens a path (it memory-maps the file), so fuzz input is
// staged through a per-run temp file rather than fed in as bytes directly.
// Arbitrary input is expected to fail with `MalformedPbf` far more often
// than it parses; the property under test is "never panics", not "often
// succeeds".
fuzz_target!(|data: &[u8]| {
    let mut path = std::env::temp_dir();
    path.push(format!("vexdb-fuzz-{}.osm.pbf", std::process::id()));
    if std::fs::write(&path, data).is_err() {
        return;
    }

    if let Ok(reader) = PbfReader::open(&path) {
        let callbacks = Callbacks::new()
            .with_node(|_| ())
            .with_way(|_| ())
            .with_relation(|_| ());
        let _ = reader.read(callbacks);
    }

    let _ = std::fs::remove_file(&path);
});
