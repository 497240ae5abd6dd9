use crate::error::{Error, Result};
use crate::feature_reader::{decode_feature, decode_feature_unchecked, FgbFeature};
use crate::header::{decode_header, decode_header_unchecked, ColumnMeta, HeaderMeta};
use crate::packed_r_tree::{PackedRTree, SearchResultItem};
use crate::reader::reader_state::*;
use crate::{check_magic_bytes, MAGIC_BYTES};
use fallible_streaming_iterator::FallibleStreamingIterator;
use geozero::{FeatureProcessor, GeozeroDatasource, GeozeroGeometry};
use std::io::Cursor;
use std::marker::PhantomData;

/// FlatGeobuf dataset reader over an in-memory buffer
pub struct FgbReader<'a, State = Initial> {
    buf: &'a [u8],
    /// FlatBuffers verification
    verify: bool,
    header: HeaderMeta,
    /// Buffer offset of the index block
    index_base: usize,
    /// Buffer offset of feature section base
    feature_base: usize,
    /// Selected features or None if no bbox filter
    item_filter: Option<Vec<SearchResultItem>>,
    /// Buffer offset of the next feature when streaming all features
    offset: usize,
    /// Number of features decoded so far
    feat_no: usize,
    current: Option<FgbFeature<'a>>,
    /// Reader state
    state: PhantomData<State>,
}

// Reader states for ensuring correct read API usage at compile-time
pub(crate) mod reader_state {
    pub struct Initial;
    pub struct Open;
    pub struct FeaturesSelected;
}

impl<'a> FgbReader<'a, Initial> {
    /// Open dataset by reading the header information
    pub fn open(buf: &'a [u8]) -> Result<FgbReader<'a, Open>> {
        Self::check_magic_bytes(buf)?;
        let (header, feature_base) = decode_header(buf, MAGIC_BYTES.len())?;
        Ok(Self::opened(buf, true, header, feature_base))
    }

    /// Open dataset by reading the header information without FlatBuffers verification
    ///
    /// # Safety
    /// The buffer must hold valid FlatGeobuf messages.
    pub unsafe fn open_unchecked(buf: &'a [u8]) -> Result<FgbReader<'a, Open>> {
        Self::check_magic_bytes(buf)?;
        let (header, feature_base) = decode_header_unchecked(buf, MAGIC_BYTES.len())?;
        Ok(Self::opened(buf, false, header, feature_base))
    }

    fn check_magic_bytes(buf: &[u8]) -> Result<()> {
        if !check_magic_bytes(buf) {
            return Err(Error::MissingMagicBytes);
        }
        Ok(())
    }

    fn opened(
        buf: &'a [u8],
        verify: bool,
        header: HeaderMeta,
        feature_base: usize,
    ) -> FgbReader<'a, Open> {
        // decode_header already validated the index size
        let index_size = header.index_size().unwrap_or(0);
        FgbReader {
            buf,
            verify,
            header,
            index_base: feature_base - index_size,
            feature_base,
            item_filter: None,
            offset: feature_base,
            feat_no: 0,
            current: None,
            state: PhantomData::<Open>,
        }
    }
}

impl<'a, State> FgbReader<'a, State> {
    /// Header information
    pub fn header(&self) -> &HeaderMeta {
        &self.header
    }

    /// Spatial reference id of the dataset, 0 for none
    pub fn srid(&self) -> i32 {
        self.header.srid()
    }

    fn select(self, item_filter: Option<Vec<SearchResultItem>>) -> FgbReader<'a, FeaturesSelected> {
        FgbReader {
            buf: self.buf,
            verify: self.verify,
            header: self.header,
            index_base: self.index_base,
            feature_base: self.feature_base,
            item_filter,
            offset: self.feature_base,
            feat_no: 0,
            current: None,
            state: PhantomData::<FeaturesSelected>,
        }
    }
}

impl<'a> FgbReader<'a, Open> {
    /// Select all features.
    pub fn select_all(self) -> Result<FgbReader<'a, FeaturesSelected>> {
        Ok(self.select(None))
    }

    /// Select features within a bounding box.
    pub fn select_bbox(
        self,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<FgbReader<'a, FeaturesSelected>> {
        // Read R-Tree index and build filter for features within bbox
        if !self.header.has_index() {
            return Err(Error::NoIndex);
        }
        let mut index = Cursor::new(&self.buf[self.index_base..self.feature_base]);
        let mut list = PackedRTree::stream_search(
            &mut index,
            self.header.features_count as usize,
            self.header.index_node_size,
            min_x,
            min_y,
            max_x,
            max_y,
        )?;
        let features_size = self.buf.len() - self.feature_base;
        if let Some(item) = list.iter().find(|item| item.offset >= features_size) {
            return Err(Error::InvalidNodeOffset {
                level: 0,
                offset: item.offset as u64,
            });
        }
        list.sort_by_key(|item| item.offset);
        debug!("bbox selection matched {} features", list.len());
        Ok(self.select(Some(list)))
    }

    /// Load the R-Tree index
    pub fn index(&self) -> Result<PackedRTree> {
        if !self.header.has_index() {
            return Err(Error::NoIndex);
        }
        PackedRTree::from_buf(
            &self.buf[self.index_base..self.feature_base],
            self.header.features_count as usize,
            self.header.index_node_size,
        )
    }
}

impl<'a> FgbReader<'a, FeaturesSelected> {
    /// Number of selected features, if known up front
    pub fn features_count(&self) -> Option<usize> {
        self.item_filter.as_ref().map(Vec::len)
    }

    /// Return current feature
    pub fn cur_feature(&self) -> Option<&FgbFeature<'a>> {
        self.current.as_ref()
    }

    /// Read and process all selected features
    pub fn process_features<W: FeatureProcessor>(&mut self, out: &mut W) -> Result<()> {
        out.dataset_begin(Some(self.header.name.as_str()))?;
        let columns = self.header.columns.clone();
        let mut cnt = 0;
        while let Some(feature) = self.next()? {
            process_feature(feature, &columns, cnt, out)?;
            cnt += 1;
        }
        out.dataset_end()?;
        Ok(())
    }

    fn decode_at(&self, offset: usize) -> Result<(FgbFeature<'a>, usize)> {
        if self.verify {
            decode_feature(self.buf, offset, &self.header)
        } else {
            // SAFETY: only reachable through `open_unchecked`
            unsafe { decode_feature_unchecked(self.buf, offset, &self.header) }
        }
    }
}

fn process_feature<W: FeatureProcessor>(
    feature: &FgbFeature,
    columns: &[ColumnMeta],
    idx: u64,
    out: &mut W,
) -> Result<()> {
    out.feature_begin(idx)?;
    out.properties_begin()?;
    for (i, value) in &feature.properties {
        let name = columns.get(*i).map_or("", |c| c.name.as_str());
        if out.property(*i, name, value)? {
            break;
        }
    }
    out.properties_end()?;
    if let Some(geometry) = &feature.geometry {
        out.geometry_begin()?;
        geometry.process_geom(out)?;
        out.geometry_end()?;
    }
    out.feature_end(idx)?;
    Ok(())
}

/// `FallibleStreamingIterator` differs from the standard library's `Iterator`
/// in two ways:
/// * each call to `next` can fail.
/// * returned `FgbFeature` is valid until `next` is called again or `FgbReader` is
///   reset or finalized.
///
/// While these iterators cannot be used with Rust `for` loops, `while let`
/// loops offer a similar level of ergonomics:
/// ```rust
/// use flatgeobuf_codec::*;
/// use fallible_streaming_iterator::FallibleStreamingIterator;
///
/// # fn read_fgb(buf: &[u8]) -> Result<()> {
/// let mut fgb = FgbReader::open(buf)?.select_all()?;
/// while let Some(feature) = fgb.next()? {
///     println!("{:?}", feature.geometry);
/// }
/// # Ok(())
/// # }
/// ```
impl<'a> FallibleStreamingIterator for FgbReader<'a, FeaturesSelected> {
    type Error = Error;
    type Item = FgbFeature<'a>;

    fn advance(&mut self) -> Result<()> {
        let offset = match &self.item_filter {
            Some(filter) => match filter.get(self.feat_no) {
                // leaf offsets are bounded by the feature section in select_bbox
                Some(item) => self.feature_base + item.offset,
                None => self.buf.len(),
            },
            None => self.offset,
        };
        if offset >= self.buf.len() {
            self.current = None;
            return Ok(());
        }
        let (feature, next) = self.decode_at(offset)?;
        self.current = Some(feature);
        self.offset = next;
        self.feat_no += 1;
        Ok(())
    }

    fn get(&self) -> Option<&FgbFeature<'a>> {
        self.current.as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.item_filter {
            Some(filter) => {
                let remaining = filter.len().saturating_sub(self.feat_no);
                (remaining, Some(remaining))
            }
            None if self.offset >= self.buf.len() => (0, Some(0)),
            None => (0, None),
        }
    }
}

impl GeozeroDatasource for FgbReader<'_, FeaturesSelected> {
    /// Consume and process all selected features.
    fn process<P: FeatureProcessor>(&mut self, processor: &mut P) -> geozero::error::Result<()> {
        self.process_features(processor)?;
        Ok(())
    }
}

mod inspect {
    use super::*;

    impl FgbReader<'_, Open> {
        /// Process R-Tree index for debugging purposes
        #[doc(hidden)]
        pub fn process_index<P: FeatureProcessor>(&self, processor: &mut P) -> Result<()> {
            self.index()?.process_index(processor)?;
            Ok(())
        }
    }
}
