use crate::header_generated::{ColumnType, GeometryType};
use flatbuffers::InvalidFlatbuffer;
use geozero::error::GeozeroError;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum Error {
    MissingMagicBytes,
    IllegalHeaderSize(usize),
    InvalidFlatbuffer(InvalidFlatbuffer),
    /// Size prefix or message body runs past the end of the buffer
    TruncatedMessage {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// A freshly built message did not pass verification
    VerificationFailed(&'static str),
    MixedGeometryType {
        expected: GeometryType,
        found: GeometryType,
    },
    UnsupportedGeometryType(GeometryType),
    MissingCoordinates(GeometryType),
    /// Ring/part boundary outside the coordinate run
    InvalidEnds {
        end: usize,
        points: usize,
    },
    UnknownColumnType(ColumnType),
    PropertyTypeMismatch {
        column: usize,
        expected: ColumnType,
    },
    ColumnCountMismatch {
        expected: usize,
        found: usize,
    },
    PropertyIndexOutOfRange {
        index: usize,
        columns: usize,
    },
    TruncatedProperties {
        offset: usize,
    },
    InvalidPropertySize(ColumnType),
    /// String or blob longer than its `u32` length prefix can express
    PropertyTooLarge(usize),
    InvalidUtf8,
    NoIndex,
    IllegalNodeSize(u16),
    /// Index announced for this many features does not fit the buffer
    IndexTooLarge(u64),
    /// Node offset pointing outside the level or feature section it addresses
    InvalidNodeOffset {
        level: usize,
        offset: u64,
    },
    IO(std::io::Error),
    Geozero(GeozeroError),
}
pub type Result<T> = std::result::Result<T, Error>;

fn type_name<T: std::fmt::Debug>(t: T) -> String {
    format!("{t:?}")
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MissingMagicBytes => "Missing magic bytes. Is this an fgb file?".fmt(f),
            Error::IllegalHeaderSize(size) => write!(f, "Illegal header size: {size}"),
            Error::InvalidFlatbuffer(invalid_flatbuffer) => invalid_flatbuffer.fmt(f),
            Error::TruncatedMessage {
                offset,
                needed,
                available,
            } => write!(
                f,
                "Truncated message at offset {offset}: {needed} bytes needed, {available} available"
            ),
            Error::VerificationFailed(what) => write!(f, "{what} buffer failed verification"),
            Error::MixedGeometryType { expected, found } => write!(
                f,
                "Cannot mix geometry types in one dataset: expected {}, found {}",
                type_name(expected),
                type_name(found)
            ),
            Error::UnsupportedGeometryType(geometry_type) => {
                write!(f, "Unsupported geometry type {}", type_name(geometry_type))
            }
            Error::MissingCoordinates(geometry_type) => {
                write!(f, "{} geometry without coordinates", type_name(geometry_type))
            }
            Error::InvalidEnds { end, points } => {
                write!(f, "Part end {end} outside of {points} coordinates")
            }
            Error::UnknownColumnType(column_type) => {
                write!(f, "Unknown column type {}", type_name(column_type))
            }
            Error::PropertyTypeMismatch { column, expected } => write!(
                f,
                "Property value for column {column} does not match column type {}",
                type_name(expected)
            ),
            Error::ColumnCountMismatch { expected, found } => {
                write!(f, "Row has {found} values, schema has {expected} columns")
            }
            Error::PropertyIndexOutOfRange { index, columns } => write!(
                f,
                "Property column index {index} out of range ({columns} columns)"
            ),
            Error::TruncatedProperties { offset } => {
                write!(f, "Property buffer truncated at offset {offset}")
            }
            Error::InvalidPropertySize(column_type) => write!(
                f,
                "invalid size for {} value",
                type_name(column_type).to_lowercase()
            ),
            Error::PropertyTooLarge(len) => {
                write!(f, "Property value of {len} bytes exceeds the u32 length prefix")
            }
            Error::InvalidUtf8 => "Invalid UTF-8 encoding".fmt(f),
            Error::NoIndex => "Index missing".fmt(f),
            Error::IllegalNodeSize(size) => {
                write!(f, "Illegal index node size: {size} (must be at least 2)")
            }
            Error::IndexTooLarge(count) => {
                write!(f, "Index for {count} features exceeds the buffer")
            }
            Error::InvalidNodeOffset { level, offset } => {
                write!(f, "Invalid node offset {offset} on index level {level}")
            }
            Error::IO(io) => io.fmt(f),
            Error::Geozero(geozero) => geozero.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<InvalidFlatbuffer> for Error {
    fn from(value: InvalidFlatbuffer) -> Self {
        Error::InvalidFlatbuffer(value)
    }
}

impl From<GeozeroError> for Error {
    fn from(value: GeozeroError) -> Self {
        Error::Geozero(value)
    }
}

impl From<Error> for GeozeroError {
    fn from(value: Error) -> Self {
        match value {
            Error::Geozero(e) => e,
            e => GeozeroError::Feature(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_size_message() {
        let err = Error::InvalidPropertySize(ColumnType::Double);
        assert_eq!(err.to_string(), "invalid size for double value");
    }

    #[test]
    fn mixed_type_message_names_types() {
        let err = Error::MixedGeometryType {
            expected: GeometryType::Point,
            found: GeometryType::LineString,
        };
        let msg = err.to_string();
        assert!(msg.contains("Point"));
        assert!(msg.contains("LineString"));
    }
}
