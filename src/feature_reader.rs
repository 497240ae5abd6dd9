use crate::error::Result;
use crate::feature_generated::{
    size_prefixed_root_as_feature, size_prefixed_root_as_feature_unchecked, Feature,
};
use crate::geometry::FgbGeometry;
use crate::geometry_reader::read_geometry;
use crate::header::{ColumnMeta, HeaderMeta};
use crate::properties_reader::{copy_value, read_properties};
use geozero::ColumnValue;
use crate::size_prefixed_message;

/// Decoded feature. Property strings and blobs borrow from the dataset buffer.
#[derive(Debug, PartialEq)]
pub struct FgbFeature<'a> {
    /// `None` for features without (or with an empty) geometry.
    /// Carries the dataset SRID and dimensions.
    pub geometry: Option<FgbGeometry>,
    /// `(column index, value)` for every non-null column
    pub properties: Vec<(usize, ColumnValue<'a>)>,
}

impl Clone for FgbFeature<'_> {
    fn clone(&self) -> Self {
        FgbFeature {
            geometry: self.geometry.clone(),
            properties: self
                .properties
                .iter()
                .map(|(i, value)| (*i, copy_value(value)))
                .collect(),
        }
    }
}

impl<'a> FgbFeature<'a> {
    /// Value of column `index`, `None` when null
    pub fn property(&self, index: usize) -> Option<&ColumnValue<'a>> {
        self.properties
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, value)| value)
    }

    fn from_fbs(feature: &Feature<'a>, header: &HeaderMeta) -> Result<Self> {
        let srid = Some(header.srid()).filter(|srid| *srid > 0);
        let geometry = feature
            .geometry()
            .map(|g| {
                read_geometry(&g, header.geometry_type, header.has_z, header.has_m).map(
                    |geometry| FgbGeometry {
                        geometry,
                        srid,
                        has_z: header.has_z,
                        has_m: header.has_m,
                    },
                )
            })
            .transpose()?;
        let properties = match feature.properties() {
            Some(properties) if !properties.is_empty() => {
                // features may carry their own schema
                match feature.columns() {
                    Some(columns) => {
                        let columns: Vec<_> =
                            columns.iter().map(|c| ColumnMeta::from_fbs(&c)).collect();
                        read_properties(properties.bytes(), &columns)?
                    }
                    None => read_properties(properties.bytes(), &header.columns)?,
                }
            }
            _ => Vec::new(),
        };
        Ok(FgbFeature {
            geometry,
            properties,
        })
    }
}

/// Decode and verify the feature message at `offset`.
///
/// Returns the feature and the offset of the next message.
pub fn decode_feature<'a>(
    buf: &'a [u8],
    offset: usize,
    header: &HeaderMeta,
) -> Result<(FgbFeature<'a>, usize)> {
    let (msg, next) = size_prefixed_message(buf, offset)?;
    let feature = size_prefixed_root_as_feature(msg)?;
    trace!("feature at offset {offset}, {} bytes", msg.len());
    Ok((FgbFeature::from_fbs(&feature, header)?, next))
}

/// Decode the feature message at `offset` without FlatBuffers verification.
///
/// # Safety
/// The caller must guarantee that the message is a valid feature.
pub unsafe fn decode_feature_unchecked<'a>(
    buf: &'a [u8],
    offset: usize,
    header: &HeaderMeta,
) -> Result<(FgbFeature<'a>, usize)> {
    let (msg, next) = size_prefixed_message(buf, offset)?;
    let feature = size_prefixed_root_as_feature_unchecked(msg);
    Ok((FgbFeature::from_fbs(&feature, header)?, next))
}
