//! Generated protobuf bindings for the OSM PBF wire format.
//!
//! `fileformat` and `osmformat` are produced at build time by `build.rs`
//! from the `.proto` schemas in this directory.

#![allow(clippy::all)]
#![allow(missing_docs)]

pub mod fileformat {
    include!(concat!(env!("OUT_DIR"), "/proto/fileformat.rs"));
}

pub mod osmformat {
    include!(concat!(env!("OUT_DIR"), "/proto/osmformat.rs"));
}
