//! Dataset-level metadata block: owned representation and codec.

use crate::error::{Error, Result};
use crate::header_generated::*;
use crate::packed_r_tree::PackedRTree;
use crate::{size_prefixed_message, HEADER_MAX_BUFFER_SIZE};
use flatbuffers::{FlatBufferBuilder, WIPOffset};

/// Column schema entry
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_: ColumnType,
    pub title: Option<String>,
    pub description: Option<String>,
    /// -1 when unspecified
    pub width: i32,
    pub precision: i32,
    pub scale: i32,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub metadata: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: &str, type_: ColumnType) -> Self {
        ColumnMeta {
            name: name.to_string(),
            type_,
            title: None,
            description: None,
            width: -1,
            precision: -1,
            scale: -1,
            nullable: true,
            unique: false,
            primary_key: false,
            metadata: None,
        }
    }

    pub(crate) fn from_fbs(column: &Column) -> Self {
        ColumnMeta {
            name: column.name().to_string(),
            type_: column.type_(),
            title: column.title().map(str::to_string),
            description: column.description().map(str::to_string),
            width: column.width(),
            precision: column.precision(),
            scale: column.scale(),
            nullable: column.nullable(),
            unique: column.unique(),
            primary_key: column.primary_key(),
            metadata: column.metadata().map(str::to_string),
        }
    }

    fn create<'a>(&self, fbb: &mut FlatBufferBuilder<'a>) -> WIPOffset<Column<'a>> {
        let args = ColumnArgs {
            name: Some(fbb.create_string(&self.name)),
            type_: self.type_,
            title: self.title.as_deref().map(|s| fbb.create_string(s)),
            description: self.description.as_deref().map(|s| fbb.create_string(s)),
            width: self.width,
            precision: self.precision,
            scale: self.scale,
            nullable: self.nullable,
            unique: self.unique,
            primary_key: self.primary_key,
            metadata: self.metadata.as_deref().map(|s| fbb.create_string(s)),
        };
        Column::create(fbb, &args)
    }
}

/// Coordinate reference system entry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrsMeta {
    /// Defining organization, EPSG when absent
    pub org: Option<String>,
    /// Numeric id assigned by the organization (0 = unknown)
    pub code: i32,
    pub name: Option<String>,
    pub description: Option<String>,
    pub wkt: Option<String>,
    pub code_string: Option<String>,
}

impl CrsMeta {
    /// CRS given by its EPSG code
    pub fn epsg(code: i32) -> Self {
        CrsMeta {
            code,
            ..Default::default()
        }
    }

    /// True when the entry carries anything worth writing
    pub fn is_set(&self) -> bool {
        self.code > 0
            || self.org.is_some()
            || self.name.is_some()
            || self.description.is_some()
            || self.wkt.is_some()
            || self.code_string.is_some()
    }

    fn from_fbs(crs: &Crs) -> Self {
        CrsMeta {
            org: crs.org().map(str::to_string),
            code: crs.code(),
            name: crs.name().map(str::to_string),
            description: crs.description().map(str::to_string),
            wkt: crs.wkt().map(str::to_string),
            code_string: crs.code_string().map(str::to_string),
        }
    }

    fn create<'a>(&self, fbb: &mut FlatBufferBuilder<'a>) -> WIPOffset<Crs<'a>> {
        let args = CrsArgs {
            org: self.org.as_deref().map(|s| fbb.create_string(s)),
            code: self.code,
            name: self.name.as_deref().map(|s| fbb.create_string(s)),
            description: self.description.as_deref().map(|s| fbb.create_string(s)),
            wkt: self.wkt.as_deref().map(|s| fbb.create_string(s)),
            code_string: self.code_string.as_deref().map(|s| fbb.create_string(s)),
        };
        Crs::create(fbb, &args)
    }
}

/// Owned dataset metadata
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderMeta {
    pub name: String,
    /// Unknown for heterogeneous datasets
    pub geometry_type: GeometryType,
    pub has_z: bool,
    pub has_m: bool,
    pub has_t: bool,
    pub has_tm: bool,
    pub columns: Vec<ColumnMeta>,
    /// 0 when unknown
    pub features_count: u64,
    /// min_x, min_y, max_x, max_y
    pub envelope: Option<[f64; 4]>,
    /// 0 when no index is present
    pub index_node_size: u16,
    pub crs: Option<CrsMeta>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<String>,
}

impl HeaderMeta {
    /// Spatial reference id, 0 for none
    pub fn srid(&self) -> i32 {
        self.crs.as_ref().map_or(0, |crs| crs.code)
    }

    /// True when the header announces a spatial index after itself
    pub fn has_index(&self) -> bool {
        self.index_node_size > 0 && self.features_count > 0
    }

    /// Byte length of the index block following the header
    pub fn index_size(&self) -> Result<usize> {
        if !self.has_index() {
            return Ok(0);
        }
        PackedRTree::check_node_size(self.index_node_size)?;
        usize::try_from(self.features_count)
            .ok()
            .and_then(|count| PackedRTree::checked_index_size(count, self.index_node_size))
            .ok_or(Error::IndexTooLarge(self.features_count))
    }

    fn from_fbs(header: &Header) -> Self {
        let columns = header
            .columns()
            .map(|columns| columns.iter().map(|c| ColumnMeta::from_fbs(&c)).collect())
            .unwrap_or_default();
        let envelope = header
            .envelope()
            .filter(|env| env.len() >= 4)
            .map(|env| [env.get(0), env.get(1), env.get(2), env.get(3)]);
        HeaderMeta {
            name: header.name().unwrap_or_default().to_string(),
            geometry_type: header.geometry_type(),
            has_z: header.has_z(),
            has_m: header.has_m(),
            has_t: header.has_t(),
            has_tm: header.has_tm(),
            columns,
            features_count: header.features_count(),
            envelope,
            index_node_size: header.index_node_size(),
            crs: header.crs().map(|crs| CrsMeta::from_fbs(&crs)),
            title: header.title().map(str::to_string),
            description: header.description().map(str::to_string),
            metadata: header.metadata().map(str::to_string),
        }
    }
}

/// Encode the header as a size-prefixed message.
///
/// With `verify` the finished message is run through the FlatBuffers
/// verifier before it is returned.
pub fn encode_header(meta: &HeaderMeta, verify: bool) -> Result<Vec<u8>> {
    let mut fbb = FlatBufferBuilder::new();
    let columns = if meta.columns.is_empty() {
        None
    } else {
        let columns: Vec<_> = meta.columns.iter().map(|c| c.create(&mut fbb)).collect();
        Some(fbb.create_vector(&columns))
    };
    let crs = meta
        .crs
        .as_ref()
        .filter(|crs| crs.is_set())
        .map(|crs| crs.create(&mut fbb));
    let args = HeaderArgs {
        name: Some(fbb.create_string(&meta.name)),
        envelope: meta.envelope.map(|env| fbb.create_vector(&env)),
        geometry_type: meta.geometry_type,
        has_z: meta.has_z,
        has_m: meta.has_m,
        has_t: meta.has_t,
        has_tm: meta.has_tm,
        columns,
        features_count: meta.features_count,
        index_node_size: meta.index_node_size,
        crs,
        title: meta.title.as_deref().map(|s| fbb.create_string(s)),
        description: meta.description.as_deref().map(|s| fbb.create_string(s)),
        metadata: meta.metadata.as_deref().map(|s| fbb.create_string(s)),
    };
    let header = Header::create(&mut fbb, &args);
    finish_size_prefixed_header_buffer(&mut fbb, header);
    let buf = fbb.finished_data();
    if verify && size_prefixed_root_as_header(buf).is_err() {
        return Err(Error::VerificationFailed("Header"));
    }
    debug!("encoded header of {} bytes", buf.len());
    Ok(buf.to_vec())
}

/// Locate the header message at `offset` and check its size prefix.
fn header_message(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let (msg, next) = size_prefixed_message(buf, offset)?;
    let header_size = msg.len() - 4;
    if !(8..=HEADER_MAX_BUFFER_SIZE).contains(&header_size) {
        return Err(Error::IllegalHeaderSize(header_size));
    }
    Ok((msg, next))
}

/// Step over the index block announced by `meta`.
fn skip_index(meta: &HeaderMeta, buf: &[u8], offset: usize) -> Result<usize> {
    let index_size = meta.index_size()?;
    if index_size > 0 {
        debug!("skipping index of {index_size} bytes at offset {offset}");
    }
    match offset.checked_add(index_size) {
        Some(next) if next <= buf.len() => Ok(next),
        _ => Err(Error::TruncatedMessage {
            offset,
            needed: index_size,
            available: buf.len().saturating_sub(offset),
        }),
    }
}

/// Decode and verify the header at `offset`.
///
/// Returns the metadata and the offset of the first feature, i.e. past
/// the index block when one is present.
pub fn decode_header(buf: &[u8], offset: usize) -> Result<(HeaderMeta, usize)> {
    let (msg, next) = header_message(buf, offset)?;
    let header = size_prefixed_root_as_header(msg)?;
    let meta = HeaderMeta::from_fbs(&header);
    debug!("header size {}, {} columns", msg.len() - 4, meta.columns.len());
    let next = skip_index(&meta, buf, next)?;
    Ok((meta, next))
}

/// Decode the header at `offset` without FlatBuffers verification.
///
/// # Safety
/// The caller must guarantee that the message is a valid header.
pub unsafe fn decode_header_unchecked(buf: &[u8], offset: usize) -> Result<(HeaderMeta, usize)> {
    let (msg, next) = header_message(buf, offset)?;
    let header = size_prefixed_root_as_header_unchecked(msg);
    let meta = HeaderMeta::from_fbs(&header);
    let next = skip_index(&meta, buf, next)?;
    Ok((meta, next))
}
