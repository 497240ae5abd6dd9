use crate::error::{Error, Result};
use crate::header::ColumnMeta;
use crate::properties_reader::{column_type, copy_value};
use byteorder::{LittleEndian, WriteBytesExt};
use geozero::ColumnValue;

/// Source of one row of attribute values, addressed by column index
pub trait RowProvider {
    fn column_count(&self) -> usize;
    /// Value of column `i`, `None` for null
    fn value(&self, i: usize) -> Option<ColumnValue<'_>>;
}

impl RowProvider for [Option<ColumnValue<'_>>] {
    fn column_count(&self) -> usize {
        self.len()
    }
    fn value(&self, i: usize) -> Option<ColumnValue<'_>> {
        self.get(i).and_then(|v| v.as_ref()).map(copy_value)
    }
}

impl RowProvider for Vec<Option<ColumnValue<'_>>> {
    fn column_count(&self) -> usize {
        self.len()
    }
    fn value(&self, i: usize) -> Option<ColumnValue<'_>> {
        self.as_slice().value(i)
    }
}

/// Row without any columns
impl RowProvider for () {
    fn column_count(&self) -> usize {
        0
    }
    fn value(&self, _i: usize) -> Option<ColumnValue<'_>> {
        None
    }
}

/// Encodes rows into the packed property format.
///
/// The scratch buffer is reused across rows.
#[derive(Default)]
pub struct PropertyWriter {
    buf: Vec<u8>,
}

impl PropertyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `row` against the column schema. Null values are skipped.
    pub fn encode<R: RowProvider + ?Sized>(
        &mut self,
        columns: &[ColumnMeta],
        row: &R,
    ) -> Result<&[u8]> {
        if row.column_count() != columns.len() {
            return Err(Error::ColumnCountMismatch {
                expected: columns.len(),
                found: row.column_count(),
            });
        }
        self.buf.clear();
        for (i, column) in columns.iter().enumerate() {
            let Some(value) = row.value(i) else {
                continue;
            };
            if column_type(&value) != column.type_ {
                return Err(Error::PropertyTypeMismatch {
                    column: i,
                    expected: column.type_,
                });
            }
            let index = u16::try_from(i).map_err(|_| Error::PropertyIndexOutOfRange {
                index: i,
                columns: columns.len(),
            })?;
            self.buf.write_u16::<LittleEndian>(index)?;
            self.write_value(&value)?;
        }
        Ok(&self.buf)
    }

    fn write_value(&mut self, value: &ColumnValue) -> Result<()> {
        let out = &mut self.buf;
        match *value {
            ColumnValue::Byte(v) => out.write_i8(v)?,
            ColumnValue::UByte(v) => out.write_u8(v)?,
            ColumnValue::Bool(v) => out.write_u8(u8::from(v))?,
            ColumnValue::Short(v) => out.write_i16::<LittleEndian>(v)?,
            ColumnValue::UShort(v) => out.write_u16::<LittleEndian>(v)?,
            ColumnValue::Int(v) => out.write_i32::<LittleEndian>(v)?,
            ColumnValue::UInt(v) => out.write_u32::<LittleEndian>(v)?,
            ColumnValue::Long(v) => out.write_i64::<LittleEndian>(v)?,
            ColumnValue::ULong(v) => out.write_u64::<LittleEndian>(v)?,
            ColumnValue::Float(v) => out.write_f32::<LittleEndian>(v)?,
            ColumnValue::Double(v) => out.write_f64::<LittleEndian>(v)?,
            ColumnValue::String(v) | ColumnValue::Json(v) | ColumnValue::DateTime(v) => {
                write_bytes(out, v.as_bytes())?
            }
            ColumnValue::Binary(v) => write_bytes(out, v)?,
        }
        Ok(())
    }
}

fn length_prefix(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::PropertyTooLarge(len))
}

fn write_bytes(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    out.write_u32::<LittleEndian>(length_prefix(data.len())?)?;
    out.extend_from_slice(data);
    Ok(())
}
