use crate::error::Result;
use crate::feature_writer::FeatureWriter;
use crate::geometry::{FgbGeometry, Geometry};
use crate::header::{encode_header, ColumnMeta, CrsMeta, HeaderMeta};
use crate::header_generated::GeometryType;
use crate::packed_r_tree::{calc_extent, hilbert_sort, NodeItem, PackedRTree};
use crate::properties_writer::{PropertyWriter, RowProvider};
use crate::MAGIC_BYTES;
use std::io::Write;

/// FlatGeobuf dataset writer
///
/// The dataset geometry type and dimensions are taken from the first feature.
/// Without an index, features are appended as they arrive and the buffer is
/// final as soon as the last one is added. With an index, [`FgbWriter::finish`]
/// Hilbert sorts the features and rewrites the buffer with header, index and
/// features in sorted order.
///
/// # Usage example:
///
/// ```
/// use flatgeobuf_codec::*;
///
/// # fn write() -> Result<Vec<u8>> {
/// let columns = vec![ColumnMeta::new("fid", ColumnType::ULong)];
/// let options = FgbWriterOptions {
///     write_index: true,
///     crs: FgbCrs {
///         code: 4326,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// let mut fgb = FgbWriter::create_with_options("places", columns, options)?;
/// let point = Geometry::Point(Some(Coord::xy(8.5, 47.4)));
/// fgb.add_feature(Some(&point), &vec![Some(ColumnValue::ULong(1))])?;
/// fgb.finish()
/// # }
/// # write().unwrap();
/// ```
pub struct FgbWriter {
    header: HeaderMeta,
    write_index: bool,
    index_node_size: u16,
    verify: bool,
    /// Magic bytes, header and features in insertion order
    out: Vec<u8>,
    /// Offset of the first feature in `out`
    features_base: usize,
    /// None until the first feature established the dataset type
    feat_writer: Option<FeatureWriter>,
    prop_writer: PropertyWriter,
    feat_offsets: Vec<FeatureOffset>,
    feat_nodes: Vec<NodeItem>,
    features_count: u64,
}

/// Options for FlatGeobuf writer
#[derive(Debug)]
pub struct FgbWriterOptions<'a> {
    /// Write index and sort features accordingly.
    pub write_index: bool,
    /// Index branching factor, at least 2.
    pub index_node_size: u16,
    /// CRS definition
    pub crs: FgbCrs<'a>,
    /// Dataset title
    pub title: Option<&'a str>,
    /// Dataset description (intended for free form long text)
    pub description: Option<&'a str>,
    /// Dataset metadata (intended to be application specific)
    pub metadata: Option<&'a str>,
    /// Run the FlatBuffers verifier on every message written.
    pub verify: bool,
}

impl Default for FgbWriterOptions<'_> {
    fn default() -> Self {
        FgbWriterOptions {
            write_index: false,
            index_node_size: PackedRTree::DEFAULT_NODE_SIZE,
            crs: Default::default(),
            title: None,
            description: None,
            metadata: None,
            verify: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct FgbCrs<'a> {
    /// Case-insensitive name of the defining organization e.g. EPSG or epsg (NULL = EPSG)
    pub org: Option<&'a str>,
    /// Numeric ID of the Spatial Reference System assigned by the organization (0 = unknown)
    pub code: i32,
    /// Human readable name of this SRS
    pub name: Option<&'a str>,
    /// Human readable description of this SRS
    pub description: Option<&'a str>,
    /// Well-known Text Representation of the Spatial Reference System
    pub wkt: Option<&'a str>,
    /// Text ID of the Spatial Reference System assigned by the organization in the (rare) case when it is not an integer and thus cannot be set into code
    pub code_string: Option<&'a str>,
}

impl From<&FgbCrs<'_>> for CrsMeta {
    fn from(crs: &FgbCrs<'_>) -> Self {
        CrsMeta {
            org: crs.org.map(str::to_string),
            code: crs.code,
            name: crs.name.map(str::to_string),
            description: crs.description.map(str::to_string),
            wkt: crs.wkt.map(str::to_string),
            code_string: crs.code_string.map(str::to_string),
        }
    }
}

#[derive(Debug)]
// Feature position relative to `features_base`
struct FeatureOffset {
    offset: usize,
    size: usize,
}

impl FgbWriter {
    /// Configure a new dataset with default options (no index)
    pub fn create(name: &str, columns: Vec<ColumnMeta>) -> Result<Self> {
        Self::create_with_options(name, columns, FgbWriterOptions::default())
    }

    /// Configure a new dataset
    pub fn create_with_options(
        name: &str,
        columns: Vec<ColumnMeta>,
        options: FgbWriterOptions,
    ) -> Result<Self> {
        if options.write_index {
            PackedRTree::check_node_size(options.index_node_size)?;
        }
        let crs = CrsMeta::from(&options.crs);
        let header = HeaderMeta {
            name: name.to_string(),
            columns,
            crs: crs.is_set().then_some(crs),
            title: options.title.map(str::to_string),
            description: options.description.map(str::to_string),
            metadata: options.metadata.map(str::to_string),
            ..Default::default()
        };
        Ok(FgbWriter {
            header,
            write_index: options.write_index,
            index_node_size: options.index_node_size,
            verify: options.verify,
            out: Vec::new(),
            features_base: 0,
            feat_writer: None,
            prop_writer: PropertyWriter::new(),
            feat_offsets: Vec::new(),
            feat_nodes: Vec::new(),
            features_count: 0,
        })
    }

    /// Dataset metadata as known so far
    pub fn header(&self) -> &HeaderMeta {
        &self.header
    }

    /// Number of features added
    pub fn features_count(&self) -> u64 {
        self.features_count
    }

    /// Bytes accumulated so far
    pub fn bytes_written(&self) -> usize {
        self.out.len()
    }

    /// Add a feature. `row` holds one value per column, `None` for null.
    ///
    /// Dimensions are taken from the geometry's coordinates. The first
    /// feature writes the header. A failing call leaves the writer unchanged.
    pub fn add_feature<R: RowProvider + ?Sized>(
        &mut self,
        geometry: Option<&Geometry>,
        row: &R,
    ) -> Result<()> {
        let has_z = geometry.is_some_and(Geometry::has_z);
        let has_m = geometry.is_some_and(Geometry::has_m);
        self.add(geometry, has_z, has_m, None, row)
    }

    /// Add a feature with declared dimensions and spatial reference.
    ///
    /// On the first feature these fix the dataset dimensions, and its SRID
    /// becomes the dataset CRS unless the options already set one.
    pub fn add_feature_geom<R: RowProvider + ?Sized>(
        &mut self,
        geometry: Option<&FgbGeometry>,
        row: &R,
    ) -> Result<()> {
        match geometry {
            Some(g) => self.add(Some(&g.geometry), g.has_z, g.has_m, g.srid, row),
            None => self.add(None, false, false, None, row),
        }
    }

    fn add<R: RowProvider + ?Sized>(
        &mut self,
        geometry: Option<&Geometry>,
        has_z: bool,
        has_m: bool,
        srid: Option<i32>,
        row: &R,
    ) -> Result<()> {
        let properties = self.prop_writer.encode(&self.header.columns, row)?;
        let starting = self.feat_writer.is_none();
        // any non-null geometry fixes the dataset type, even an empty one
        let dataset_type = geometry.map_or(GeometryType::Unknown, Geometry::geometry_type);
        let mut first = None;
        let feat_writer = match self.feat_writer.as_mut() {
            Some(feat_writer) => feat_writer,
            None => first.insert(FeatureWriter::new(
                dataset_type,
                has_z,
                has_m,
                self.verify,
            )),
        };
        let encoded = feat_writer.encode(geometry, properties)?;

        if starting {
            let mut header = self.header.clone();
            header.geometry_type = dataset_type;
            header.has_z = has_z;
            header.has_m = has_m;
            if header.crs.is_none() {
                header.crs = srid.filter(|srid| *srid > 0).map(CrsMeta::epsg);
            }
            let header_buf = encode_header(&header, self.verify)?;
            debug!(
                "dataset type {:?}, header size {}",
                dataset_type,
                header_buf.len()
            );
            self.header = header;
            self.out.extend_from_slice(&MAGIC_BYTES);
            self.out.extend_from_slice(&header_buf);
            self.features_base = self.out.len();
        }

        let offset = self.out.len() - self.features_base;
        let size = encoded.buf.len();
        trace!("feature {} at offset {offset}, {size} bytes", self.features_count);
        if self.write_index {
            let mut node = encoded.bbox;
            // Offset is index of feat_offsets before sorting
            // Will be replaced with output offset after sorting
            node.offset = self.feat_offsets.len() as u64;
            self.feat_nodes.push(node);
            self.feat_offsets.push(FeatureOffset { offset, size });
        }
        self.out.extend_from_slice(encoded.buf);
        self.features_count += 1;
        if let Some(feat_writer) = first {
            self.feat_writer = Some(feat_writer);
        }
        Ok(())
    }

    /// Finish the dataset and return the complete buffer
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.feat_writer.is_none() {
            // no features: magic bytes and header only
            let mut out = MAGIC_BYTES.to_vec();
            out.extend(encode_header(&self.header, self.verify)?);
            return Ok(out);
        }
        if !self.write_index {
            return Ok(self.out);
        }

        let extent = calc_extent(&self.feat_nodes);
        debug!("Hilbert sorting {} features", self.feat_nodes.len());
        hilbert_sort(&mut self.feat_nodes, &extent);
        // Leaf offsets are the feature positions in sorted order
        let mut offset = 0;
        let index_nodes = self
            .feat_nodes
            .iter()
            .map(|tmpnode| {
                let mut node = tmpnode.clone();
                node.offset = offset;
                offset += self.feat_offsets[tmpnode.offset as usize].size as u64;
                node
            })
            .collect::<Vec<_>>();
        let tree = PackedRTree::build(&index_nodes, &extent, self.index_node_size)?;

        self.header.features_count = self.features_count;
        self.header.index_node_size = self.index_node_size;
        self.header.envelope = if extent.is_empty() {
            None
        } else {
            Some([extent.min_x, extent.min_y, extent.max_x, extent.max_y])
        };
        let header_buf = encode_header(&self.header, self.verify)?;

        let features_size = self.out.len() - self.features_base;
        let mut out =
            Vec::with_capacity(MAGIC_BYTES.len() + header_buf.len() + tree.size() + features_size);
        out.extend_from_slice(&MAGIC_BYTES);
        out.extend_from_slice(&header_buf);
        tree.stream_write(&mut out)?;
        debug!(
            "index of {} bytes written at offset {}",
            tree.size(),
            MAGIC_BYTES.len() + header_buf.len()
        );
        for node in &self.feat_nodes {
            let feat = &self.feat_offsets[node.offset as usize];
            let start = self.features_base + feat.offset;
            out.extend_from_slice(&self.out[start..start + feat.size]);
        }
        Ok(out)
    }

    /// Finish the dataset and write it to `out`
    pub fn write(self, mut out: impl Write) -> Result<()> {
        let buf = self.finish()?;
        out.write_all(&buf)?;
        Ok(())
    }
}
