//! [FlatGeobuf](https://flatgeobuf.org/) encoding and decoding of in-memory datasets.
//!
//! Features are accumulated with [`FgbWriter`], optionally Hilbert sorted
//! and indexed with a packed R-Tree, and read back with [`FgbReader`].
//!
//! ```
//! use flatgeobuf_codec::*;
//! use fallible_streaming_iterator::FallibleStreamingIterator;
//!
//! # fn roundtrip() -> Result<()> {
//! let columns = vec![ColumnMeta::new("name", ColumnType::String)];
//! let mut fgb = FgbWriter::create("places", columns)?;
//! let point = Geometry::Point(Some(Coord::xy(1.0, 2.0)));
//! fgb.add_feature(Some(&point), &vec![Some(ColumnValue::String("home"))])?;
//! let buf = fgb.finish()?;
//!
//! let mut reader = FgbReader::open(&buf)?.select_all()?;
//! while let Some(feature) = reader.next()? {
//!     assert_eq!(feature.geometry.as_deref(), Some(&point));
//! }
//! # Ok(())
//! # }
//! # roundtrip().unwrap();
//! ```

#[macro_use]
extern crate log;

mod error;
#[allow(dead_code, unused_imports, non_snake_case, clippy::all)]
mod feature_generated;
mod feature_reader;
mod feature_writer;
mod geometry;
mod geometry_reader;
mod geometry_writer;
mod header;
#[allow(dead_code, unused_imports, non_snake_case, clippy::all)]
mod header_generated;
pub mod packed_r_tree;
mod properties_reader;
mod properties_writer;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use feature_reader::{decode_feature, decode_feature_unchecked, FgbFeature};
pub use feature_writer::{EncodedFeature, FeatureWriter};
pub use geometry::{Coord, FgbGeometry, Geometry};
pub use header::{
    decode_header, decode_header_unchecked, encode_header, ColumnMeta, CrsMeta, HeaderMeta,
};
pub use header_generated::{ColumnType, GeometryType};
pub use packed_r_tree::{NodeItem, PackedRTree};
pub use geozero::ColumnValue;
pub use properties_reader::{column_type, read_properties};
pub use properties_writer::{PropertyWriter, RowProvider};
pub use reader::*;
pub use writer::*;

/// Generated FlatBuffers accessors for the raw `Header` and `Feature` messages
pub mod fbs {
    pub use crate::feature_generated::*;
    pub use crate::header_generated::*;
}

pub const VERSION: u8 = 3;
pub const MAGIC_BYTES: [u8; 8] = [b'f', b'g', b'b', VERSION, b'f', b'g', b'b', 1];
pub(crate) const HEADER_MAX_BUFFER_SIZE: usize = 1048576 * 10;

/// Check the file signature. Any patch level up to the current one is accepted.
pub fn check_magic_bytes(magic_bytes: &[u8]) -> bool {
    magic_bytes.len() >= MAGIC_BYTES.len()
        && magic_bytes[0..3] == MAGIC_BYTES[0..3]
        && magic_bytes[3] == VERSION
        && magic_bytes[4..7] == MAGIC_BYTES[4..7]
        && magic_bytes[7] <= MAGIC_BYTES[7]
}

/// Slice out the size-prefixed message at `offset`, prefix included.
/// Returns the message and the offset right after it.
pub(crate) fn size_prefixed_message(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let available = buf.len().saturating_sub(offset);
    let Some(prefix) = offset.checked_add(4).and_then(|end| buf.get(offset..end)) else {
        return Err(Error::TruncatedMessage {
            offset,
            needed: 4,
            available,
        });
    };
    let size = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let end = (offset + 4).checked_add(size);
    match end.and_then(|end| buf.get(offset..end).map(|msg| (msg, end))) {
        Some(found) => Ok(found),
        None => Err(Error::TruncatedMessage {
            offset,
            needed: size.saturating_add(4),
            available,
        }),
    }
}
