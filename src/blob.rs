//! Read and decode blobs: the framing unit of a PBF file.
//!
//! A PBF file is a sequence of blobs. Each is preceded by a 4-byte big-endian
//! length of a `BlobHeader`, followed by the header itself (which gives the
//! blob's serialized size and type string), followed by the `Blob` (raw or
//! zlib-compressed payload bytes plus the uncompressed size).

use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read};
use std::path::Path;

use byteorder::ReadBytesExt;
use bumpalo::Bump;
use flate2::read::ZlibDecoder;
use protobuf::Message;

use crate::block::{HeaderBlock, PrimitiveBlock};
use crate::error::{new_blob_error, new_error, new_protobuf_error, BlobError, ErrorKind, Result};
use crate::proto::fileformat;

/// Per the OSM PBF spec: a blob header must never exceed 64 KiB.
pub const MAX_BLOB_HEADER_SIZE: u64 = 64 * 1024;
/// Per the OSM PBF spec: an (uncompressed) blob message must never exceed 32 MiB.
pub const MAX_BLOB_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;

/// The content type of a blob.
#[derive(Debug, Eq, PartialEq)]
pub enum BlobType<'a> {
    OsmHeader,
    OsmData,
    /// An unknown blob type with the given string identifier. A reader should skip it.
    Unknown(&'a str),
}

impl BlobType<'_> {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            BlobType::OsmHeader => "OSMHeader",
            BlobType::OsmData => "OSMData",
            BlobType::Unknown(s) => s,
        }
    }
}

/// The decoded content of a blob.
pub enum BlobDecode {
    OsmHeader(HeaderBlock),
    OsmData(PrimitiveBlock),
    Unknown(String),
}

/// A single framed blob: a header plus its (still possibly compressed) payload.
pub struct Blob {
    pub(crate) header: fileformat::BlobHeader,
    pub(crate) blob: fileformat::Blob,
}

impl Blob {
    pub(crate) fn new(header: fileformat::BlobHeader, blob: fileformat::Blob) -> Blob {
        Blob { header, blob }
    }

    /// Decodes the blob, inflating it if necessary. This is the expensive step the
    /// phase-aware reader skips during fast-forward.
    pub fn decode(&self) -> Result<BlobDecode> {
        match self.get_type() {
            BlobType::OsmHeader => self.to_headerblock().map(BlobDecode::OsmHeader),
            BlobType::OsmData => self.to_primitiveblock().map(BlobDecode::OsmData),
            BlobType::Unknown(s) => Ok(BlobDecode::Unknown(s.to_string())),
        }
    }

    pub fn get_type(&self) -> BlobType<'_> {
        match self.header.type_.as_str() {
            "OSMHeader" => BlobType::OsmHeader,
            "OSMData" => BlobType::OsmData,
            x => BlobType::Unknown(x),
        }
    }

    pub fn to_headerblock(&self) -> Result<HeaderBlock> {
        decode_blob(&self.blob, "header block").map(HeaderBlock::new)
    }

    pub fn to_primitiveblock(&self) -> Result<PrimitiveBlock> {
        decode_blob(&self.blob, "primitive block").map(PrimitiveBlock::new)
    }
}

/// A reader over raw blobs from any `Read` source, with no phase awareness.
/// Used as the innermost stage of [`crate::pbf_reader::PbfReader`] and directly
/// by callers that just want to enumerate every blob in a file.
pub struct BlobReader<R: Read> {
    reader: R,
    last_blob_ok: bool,
}

impl<R: Read> BlobReader<R> {
    pub fn new(reader: R) -> BlobReader<R> {
        BlobReader {
            reader,
            last_blob_ok: true,
        }
    }
}

impl BlobReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path)?;
        Ok(BlobReader::new(BufReader::new(f)))
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.last_blob_ok {
            return None;
        }

        let header_size: u64 = match self.reader.read_u32::<byteorder::BigEndian>() {
            Ok(n) => u64::from(n),
            Err(e) => {
                return match e.kind() {
                    IoErrorKind::UnexpectedEof => None,
                    _ => {
                        self.last_blob_ok = false;
                        Some(Err(new_error(ErrorKind::Io(e))))
                    }
                };
            }
        };

        if header_size >= MAX_BLOB_HEADER_SIZE {
            self.last_blob_ok = false;
            return Some(Err(new_blob_error(BlobError::HeaderTooBig { size: header_size })));
        }

        let header: fileformat::BlobHeader =
            match fileformat::BlobHeader::parse_from_reader(&mut self.reader.by_ref().take(header_size)) {
                Ok(h) => h,
                Err(e) => {
                    self.last_blob_ok = false;
                    return Some(Err(new_protobuf_error(e, "blob header")));
                }
            };

        let datasize = u64::from(header.datasize as u32);
        if datasize >= MAX_BLOB_MESSAGE_SIZE {
            self.last_blob_ok = false;
            return Some(Err(new_blob_error(BlobError::MessageTooBig { size: datasize })));
        }

        let blob: fileformat::Blob =
            match fileformat::Blob::parse_from_reader(&mut self.reader.by_ref().take(datasize)) {
                Ok(b) => b,
                Err(e) => {
                    self.last_blob_ok = false;
                    return Some(Err(new_protobuf_error(e, "blob")));
                }
            };

        Some(Ok(Blob::new(header, blob)))
    }
}

/// Decode a blob's payload into a protobuf message, using `bump` as scratch
/// space for the intermediate decompression buffer rather than a fresh heap
/// `Vec` per blob. Callers that decode many blobs in sequence (the reader's
/// main walk) reset the same `Bump` between calls, so the allocator only
/// ever grows to the largest blob seen instead of churning per block.
pub(crate) fn decode_blob_in<T>(
    blob: &fileformat::Blob,
    location: &'static str,
    bump: &Bump,
) -> Result<T>
where
    T: protobuf::Message,
{
    if let Some(raw) = blob.raw.as_ref() {
        T::parse_from_bytes(raw).map_err(|e| new_protobuf_error(e, location))
    } else if let Some(zdata) = blob.zlib_data.as_ref() {
        let mut decoder = ZlibDecoder::new(zdata.as_slice());
        // `raw_size` carries the exact uncompressed length per the PBF spec,
        // so the arena can size the buffer up front with a single
        // `read_exact` instead of the grow-and-copy a `Vec::read_to_end`
        // would need (and `std::io::Read::read_to_end` only accepts a plain
        // heap `Vec` anyway, not an arena-backed one).
        let size = blob.raw_size.unwrap_or(0).max(0) as usize;
        let out = bump.alloc_slice_fill_copy(size, 0u8);
        decoder
            .read_exact(out)
            .map_err(|e| new_error(ErrorKind::Io(e)))?;
        T::parse_from_bytes(out).map_err(|e| new_protobuf_error(e, location))
    } else {
        Err(new_blob_error(BlobError::Empty))
    }
}

/// As [`decode_blob_in`], but for call sites (tests, the standalone blob
/// counter) that decode only a handful of blobs and don't keep an arena
/// around.
pub(crate) fn decode_blob<T>(blob: &fileformat::Blob, location: &'static str) -> Result<T>
where
    T: protobuf::Message,
{
    let bump = Bump::new();
    decode_blob_in(blob, location, &bump)
}
