use crate::error::{Error, Result};
use crate::header::ColumnMeta;
use crate::header_generated::ColumnType;
use byteorder::{ByteOrder, LittleEndian};
use geozero::ColumnValue;
use std::mem::size_of;
use std::str;

/// Copies a value. `geozero::ColumnValue` does not implement `Clone`,
/// but every variant holds only `Copy` data.
pub(crate) fn copy_value<'a>(value: &ColumnValue<'a>) -> ColumnValue<'a> {
    match *value {
        ColumnValue::Byte(v) => ColumnValue::Byte(v),
        ColumnValue::UByte(v) => ColumnValue::UByte(v),
        ColumnValue::Bool(v) => ColumnValue::Bool(v),
        ColumnValue::Short(v) => ColumnValue::Short(v),
        ColumnValue::UShort(v) => ColumnValue::UShort(v),
        ColumnValue::Int(v) => ColumnValue::Int(v),
        ColumnValue::UInt(v) => ColumnValue::UInt(v),
        ColumnValue::Long(v) => ColumnValue::Long(v),
        ColumnValue::ULong(v) => ColumnValue::ULong(v),
        ColumnValue::Float(v) => ColumnValue::Float(v),
        ColumnValue::Double(v) => ColumnValue::Double(v),
        ColumnValue::String(v) => ColumnValue::String(v),
        ColumnValue::Json(v) => ColumnValue::Json(v),
        ColumnValue::DateTime(v) => ColumnValue::DateTime(v),
        ColumnValue::Binary(v) => ColumnValue::Binary(v),
    }
}

/// Column type a property value is stored as
pub fn column_type(value: &ColumnValue) -> ColumnType {
    match value {
        ColumnValue::Byte(_) => ColumnType::Byte,
        ColumnValue::UByte(_) => ColumnType::UByte,
        ColumnValue::Bool(_) => ColumnType::Bool,
        ColumnValue::Short(_) => ColumnType::Short,
        ColumnValue::UShort(_) => ColumnType::UShort,
        ColumnValue::Int(_) => ColumnType::Int,
        ColumnValue::UInt(_) => ColumnType::UInt,
        ColumnValue::Long(_) => ColumnType::Long,
        ColumnValue::ULong(_) => ColumnType::ULong,
        ColumnValue::Float(_) => ColumnType::Float,
        ColumnValue::Double(_) => ColumnType::Double,
        ColumnValue::String(_) => ColumnType::String,
        ColumnValue::Json(_) => ColumnType::Json,
        ColumnValue::DateTime(_) => ColumnType::DateTime,
        ColumnValue::Binary(_) => ColumnType::Binary,
    }
}

/// Fixed-width value bytes, or an error naming the column type
fn fixed(bytes: &[u8], width: usize, column_type: ColumnType) -> Result<&[u8]> {
    bytes
        .get(..width)
        .ok_or(Error::InvalidPropertySize(column_type))
}

/// uint32 length followed by that many bytes
fn length_prefixed(bytes: &[u8], column_type: ColumnType) -> Result<(&[u8], usize)> {
    let len = LittleEndian::read_u32(fixed(bytes, size_of::<u32>(), column_type)?) as usize;
    let start = size_of::<u32>();
    let data = start
        .checked_add(len)
        .and_then(|end| bytes.get(start..end))
        .ok_or(Error::InvalidPropertySize(column_type))?;
    Ok((data, start + len))
}

fn utf8(data: &[u8]) -> Result<&str> {
    str::from_utf8(data).map_err(|_| Error::InvalidUtf8)
}

/// Decode one value of `column_type` from the start of `bytes`.
/// Returns the value and the number of bytes consumed.
fn read_value(bytes: &[u8], column_type: ColumnType) -> Result<(ColumnValue, usize)> {
    let value = match column_type {
        ColumnType::Byte => (ColumnValue::Byte(fixed(bytes, 1, column_type)?[0] as i8), 1),
        ColumnType::UByte => (ColumnValue::UByte(fixed(bytes, 1, column_type)?[0]), 1),
        ColumnType::Bool => (ColumnValue::Bool(fixed(bytes, 1, column_type)?[0] != 0), 1),
        ColumnType::Short => (
            ColumnValue::Short(LittleEndian::read_i16(fixed(bytes, 2, column_type)?)),
            2,
        ),
        ColumnType::UShort => (
            ColumnValue::UShort(LittleEndian::read_u16(fixed(bytes, 2, column_type)?)),
            2,
        ),
        ColumnType::Int => (
            ColumnValue::Int(LittleEndian::read_i32(fixed(bytes, 4, column_type)?)),
            4,
        ),
        ColumnType::UInt => (
            ColumnValue::UInt(LittleEndian::read_u32(fixed(bytes, 4, column_type)?)),
            4,
        ),
        ColumnType::Long => (
            ColumnValue::Long(LittleEndian::read_i64(fixed(bytes, 8, column_type)?)),
            8,
        ),
        ColumnType::ULong => (
            ColumnValue::ULong(LittleEndian::read_u64(fixed(bytes, 8, column_type)?)),
            8,
        ),
        ColumnType::Float => (
            ColumnValue::Float(LittleEndian::read_f32(fixed(bytes, 4, column_type)?)),
            4,
        ),
        ColumnType::Double => (
            ColumnValue::Double(LittleEndian::read_f64(fixed(bytes, 8, column_type)?)),
            8,
        ),
        ColumnType::String => {
            let (data, size) = length_prefixed(bytes, column_type)?;
            (ColumnValue::String(utf8(data)?), size)
        }
        ColumnType::Json => {
            let (data, size) = length_prefixed(bytes, column_type)?;
            (ColumnValue::Json(utf8(data)?), size)
        }
        ColumnType::DateTime => {
            let (data, size) = length_prefixed(bytes, column_type)?;
            (ColumnValue::DateTime(utf8(data)?), size)
        }
        ColumnType::Binary => {
            let (data, size) = length_prefixed(bytes, column_type)?;
            (ColumnValue::Binary(data), size)
        }
        other => return Err(Error::UnknownColumnType(other)),
    };
    Ok(value)
}

/// Decode a property buffer into `(column index, value)` pairs in storage order.
///
/// Null columns have no entry. Decoding stops when fewer than two bytes
/// remain, so a stray trailing byte is tolerated.
pub fn read_properties<'a>(
    properties: &'a [u8],
    columns: &[ColumnMeta],
) -> Result<Vec<(usize, ColumnValue<'a>)>> {
    let mut values = Vec::new();
    let mut offset = 0;
    while properties.len() - offset >= size_of::<u16>() {
        let index = LittleEndian::read_u16(&properties[offset..]) as usize;
        offset += size_of::<u16>();
        let column = columns.get(index).ok_or(Error::PropertyIndexOutOfRange {
            index,
            columns: columns.len(),
        })?;
        if offset == properties.len() {
            return Err(Error::TruncatedProperties { offset });
        }
        let (value, size) = read_value(&properties[offset..], column.type_)?;
        offset += size;
        values.push((index, value));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(types: &[ColumnType]) -> Vec<ColumnMeta> {
        types
            .iter()
            .enumerate()
            .map(|(i, t)| ColumnMeta::new(&format!("col{i}"), *t))
            .collect()
    }

    #[test]
    fn read_fixed_and_strings() -> Result<()> {
        let schema = columns(&[ColumnType::Int, ColumnType::String, ColumnType::Double]);
        let mut buf = vec![0, 0];
        buf.extend((-7i32).to_le_bytes());
        buf.extend([2, 0]);
        buf.extend(1.5f64.to_le_bytes());
        buf.extend([1, 0]);
        buf.extend(3u32.to_le_bytes());
        buf.extend(b"abc");
        let values = read_properties(&buf, &schema)?;
        assert_eq!(
            values,
            vec![
                (0, ColumnValue::Int(-7)),
                (2, ColumnValue::Double(1.5)),
                (1, ColumnValue::String("abc")),
            ]
        );
        Ok(())
    }

    #[test]
    fn trailing_byte_is_ignored() -> Result<()> {
        let schema = columns(&[ColumnType::Bool]);
        let values = read_properties(&[0, 0, 1, 0xff], &schema)?;
        assert_eq!(values, vec![(0, ColumnValue::Bool(true))]);
        Ok(())
    }

    #[test]
    fn index_out_of_range() {
        let schema = columns(&[ColumnType::Bool]);
        assert!(matches!(
            read_properties(&[3, 0, 1], &schema),
            Err(Error::PropertyIndexOutOfRange {
                index: 3,
                columns: 1
            })
        ));
    }

    #[test]
    fn insufficient_bytes_name_the_type() {
        let schema = columns(&[ColumnType::Double]);
        let err = read_properties(&[0, 0, 1, 2, 3], &schema).unwrap_err();
        assert_eq!(err.to_string(), "invalid size for double value");

        let schema = columns(&[ColumnType::String]);
        let mut buf = vec![0, 0];
        buf.extend(10u32.to_le_bytes());
        buf.extend(b"short");
        assert!(matches!(
            read_properties(&buf, &schema),
            Err(Error::InvalidPropertySize(ColumnType::String))
        ));
    }

    #[test]
    fn missing_value() {
        let schema = columns(&[ColumnType::Int]);
        assert!(matches!(
            read_properties(&[0, 0], &schema),
            Err(Error::TruncatedProperties { offset: 2 })
        ));
    }

    #[test]
    fn invalid_utf8() {
        let schema = columns(&[ColumnType::String]);
        let mut buf = vec![0, 0];
        buf.extend(2u32.to_le_bytes());
        buf.extend([0xc3, 0x28]);
        assert!(matches!(
            read_properties(&buf, &schema),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn value_column_types() {
        assert_eq!(column_type(&ColumnValue::UShort(1)), ColumnType::UShort);
        assert_eq!(column_type(&ColumnValue::Json("{}")), ColumnType::Json);
        assert_eq!(column_type(&ColumnValue::Binary(&[1])), ColumnType::Binary);
    }

    #[test]
    fn unknown_column_type() {
        let schema = columns(&[ColumnType(42)]);
        assert!(matches!(
            read_properties(&[0, 0, 1], &schema),
            Err(Error::UnknownColumnType(ColumnType(42)))
        ));
    }
}
