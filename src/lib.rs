/*!
A planet-scale OpenStreetMap PBF store and spatial-extract engine.

`vexdb` loads `*.osm.pbf` files into a local, append-only database indexed
for rectangular bounding-box extraction, and writes extracts back out either
as standard PBF or as a compact custom binary ("vex") format. The core is a
rewindable, phase-aware PBF reader and writer, a tag dictionary codec, an
entity store backed by memory-mapped sparse arenas, a dense ID bitset, and a
fixed spatial grid.

## Loading a file

```no_run
use vexdb::load::Loader;

let stats = Loader::new(std::path::Path::new("/tmp/db"))
    .unwrap()
    .load(std::path::Path::new("input.osm.pbf"))
    .unwrap();
println!("stored {} ways, {} nodes", stats.ways_stored, stats.nodes_stored);
```

## Extracting a bounding box

```no_run
use vexdb::coord::BoundingBox;
use vexdb::extract::Extractor;

let bbox = BoundingBox::parse("13.3,52.4,13.5,52.6").unwrap();
let mut extractor = Extractor::open(std::path::Path::new("/tmp/db")).unwrap();
let mut out = std::fs::File::create("berlin.osm.pbf").unwrap();
extractor.extract_pbf(&bbox, &mut out, "vexdb").unwrap();
```

## Reading raw PBF without a store

The lower-level reader used internally by the loader is also usable on its
own, for callers that just want to walk a PBF file:

```no_run
use vexdb::reader::{Callbacks, PbfReader};

let reader = PbfReader::open("input.osm.pbf").unwrap();
let mut ways = 0u64;
let callbacks = Callbacks::new().with_way(|_way| ways += 1);
reader.read(callbacks).unwrap();
println!("{ways} ways");
```
*/

#![allow(clippy::too_many_arguments)]

pub mod blob;
pub mod block;
pub mod coord;
pub mod dense;
pub mod elements;
pub mod error;
pub mod extract;
pub mod grid;
pub mod id_tracker;
pub mod limits;
pub mod load;
mod proto;
pub mod reader;
pub mod store;
pub mod strtab;
pub mod tags;
pub mod varint;
pub mod vex;
pub mod writer;

pub use blob::{Blob, BlobDecode, BlobReader, BlobType};
pub use block::{HeaderBlock, PrimitiveBlock, PrimitiveGroup};
pub use coord::{BoundingBox, Coord};
pub use dense::DenseNode;
pub use elements::{Node, RelMember, RelMemberType, Relation, Way};
pub use error::{Error, ErrorKind, Result};
pub use extract::{Extractor, OutputFormat};
pub use load::{LoadStats, Loader};
pub use reader::{Callbacks, NodeRef, PbfReader};
pub use store::Store;
