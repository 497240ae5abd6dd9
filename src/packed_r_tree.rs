//! Create and read a [packed Hilbert R-Tree](https://en.wikipedia.org/wiki/Hilbert_R-tree#Packed_Hilbert_R-trees)
//! to enable fast bounding box spatial filtering.
//!
//! Storage layout: root first, leaves last, each level contiguous. An internal
//! node's `offset` is the array index of its first child, a leaf's `offset`
//! is the byte offset of its feature relative to the start of the feature section.

use crate::error::{Error, Result};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::min;
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::size_of;
use std::ops::Range;

#[derive(Clone, PartialEq, Debug)]
#[repr(C)]
/// R-Tree node
pub struct NodeItem {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    /// Byte offset in feature data section
    pub offset: u64,
}

impl NodeItem {
    pub fn bounds(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> NodeItem {
        NodeItem {
            min_x,
            min_y,
            max_x,
            max_y,
            offset: 0,
        }
    }

    /// Empty (inverted) box, grows with the first `expand`
    pub fn create(offset: u64) -> NodeItem {
        NodeItem {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
            offset,
        }
    }

    pub fn from_reader(mut rdr: impl Read) -> Result<Self> {
        Ok(NodeItem {
            min_x: rdr.read_f64::<LittleEndian>()?,
            min_y: rdr.read_f64::<LittleEndian>()?,
            max_x: rdr.read_f64::<LittleEndian>()?,
            max_y: rdr.read_f64::<LittleEndian>()?,
            offset: rdr.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, wtr: &mut W) -> std::io::Result<()> {
        wtr.write_f64::<LittleEndian>(self.min_x)?;
        wtr.write_f64::<LittleEndian>(self.min_y)?;
        wtr.write_f64::<LittleEndian>(self.max_x)?;
        wtr.write_f64::<LittleEndian>(self.max_y)?;
        wtr.write_u64::<LittleEndian>(self.offset)?;
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True for a box that was never expanded
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Grow to cover `r`
    pub fn expand(&mut self, r: &NodeItem) {
        self.min_x = self.min_x.min(r.min_x);
        self.min_y = self.min_y.min(r.min_y);
        self.max_x = self.max_x.max(r.max_x);
        self.max_y = self.max_y.max(r.max_y);
    }

    /// Grow to cover the point `(x, y)`
    pub fn expand_xy(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Boxes touching at an edge or corner intersect
    pub fn intersects(&self, r: &NodeItem) -> bool {
        self.max_x >= r.min_x
            && self.max_y >= r.min_y
            && self.min_x <= r.max_x
            && self.min_y <= r.max_y
    }

    /// Does this box cover `r` completely?
    pub fn contains(&self, r: &NodeItem) -> bool {
        self.min_x <= r.min_x
            && self.min_y <= r.min_y
            && self.max_x >= r.max_x
            && self.max_y >= r.max_y
    }
}

/// Read `count` consecutive nodes
fn read_nodes(mut data: impl Read, count: usize) -> Result<Vec<NodeItem>> {
    (0..count).map(|_| NodeItem::from_reader(&mut data)).collect()
}

/// Read `count` nodes starting at node `node_index` of the index at `base`
fn read_node_items<R: Read + Seek>(
    data: &mut R,
    base: u64,
    node_index: usize,
    count: usize,
) -> Result<Vec<NodeItem>> {
    data.seek(SeekFrom::Start(
        base + (node_index * size_of::<NodeItem>()) as u64,
    ))?;
    read_nodes(data, count)
}

#[derive(Debug, Clone, PartialEq)]
/// Bbox filter search result
pub struct SearchResultItem {
    /// Byte offset in feature data section
    pub offset: usize,
    /// Feature number
    pub index: usize,
}

/// Resolution of the Hilbert curve per axis
pub const HILBERT_MAX: u32 = (1 << 16) - 1;

// Based on public domain code at https://github.com/rawrunprotected/hilbert_curves
fn hilbert(x: u32, y: u32) -> u32 {
    let mut a = x ^ y;
    let mut b = 0xFFFF ^ a;
    let mut c = 0xFFFF ^ (x | y);
    let mut d = x & (y ^ 0xFFFF);

    let mut aa = a | (b >> 1);
    let mut bb = (a >> 1) ^ a;
    let mut cc = ((c >> 1) ^ (b & (d >> 1))) ^ c;
    let mut dd = ((a & (c >> 1)) ^ (d >> 1)) ^ d;

    a = aa;
    b = bb;
    c = cc;
    d = dd;
    aa = (a & (a >> 2)) ^ (b & (b >> 2));
    bb = (a & (b >> 2)) ^ (b & ((a ^ b) >> 2));
    cc ^= (a & (c >> 2)) ^ (b & (d >> 2));
    dd ^= (b & (c >> 2)) ^ ((a ^ b) & (d >> 2));

    a = aa;
    b = bb;
    c = cc;
    d = dd;
    aa = (a & (a >> 4)) ^ (b & (b >> 4));
    bb = (a & (b >> 4)) ^ (b & ((a ^ b) >> 4));
    cc ^= (a & (c >> 4)) ^ (b & (d >> 4));
    dd ^= (b & (c >> 4)) ^ ((a ^ b) & (d >> 4));

    a = aa;
    b = bb;
    c = cc;
    d = dd;
    cc ^= (a & (c >> 8)) ^ (b & (d >> 8));
    dd ^= (b & (c >> 8)) ^ ((a ^ b) & (d >> 8));

    a = cc ^ (cc >> 1);
    b = dd ^ (dd >> 1);

    let mut i0 = x ^ y;
    let mut i1 = b | (0xFFFF ^ (i0 | a));

    i0 = (i0 | (i0 << 8)) & 0x00FF00FF;
    i0 = (i0 | (i0 << 4)) & 0x0F0F0F0F;
    i0 = (i0 | (i0 << 2)) & 0x33333333;
    i0 = (i0 | (i0 << 1)) & 0x55555555;

    i1 = (i1 | (i1 << 8)) & 0x00FF00FF;
    i1 = (i1 | (i1 << 4)) & 0x0F0F0F0F;
    i1 = (i1 | (i1 << 2)) & 0x33333333;
    i1 = (i1 | (i1 << 1)) & 0x55555555;

    (i1 << 1) | i0
}

// Scale one center coordinate onto 0..=hilbert_max. A degenerate extent
// axis (single point, single column of boxes) maps to 0.
fn scale(center: f64, min: f64, span: f64, hilbert_max: u32) -> u32 {
    if span.is_nan() || span <= 0.0 {
        return 0;
    }
    let v = (hilbert_max as f64 * (center - min) / span).floor();
    if v.is_nan() {
        0
    } else {
        (v as u32).min(hilbert_max)
    }
}

/// Hilbert curve position of a box center within `extent`
pub fn hilbert_bbox(r: &NodeItem, hilbert_max: u32, extent: &NodeItem) -> u32 {
    // calculate bbox center and scale to hilbert_max
    let x = scale(
        (r.min_x + r.max_x) / 2.0,
        extent.min_x,
        extent.width(),
        hilbert_max,
    );
    let y = scale(
        (r.min_y + r.max_y) / 2.0,
        extent.min_y,
        extent.height(),
        hilbert_max,
    );
    hilbert(x, y)
}

/// Stable sort by ascending Hilbert position
pub fn hilbert_sort(items: &mut [NodeItem], extent: &NodeItem) {
    items.sort_by_cached_key(|item| hilbert_bbox(item, HILBERT_MAX, extent));
}

pub fn calc_extent(nodes: &[NodeItem]) -> NodeItem {
    nodes.iter().fold(NodeItem::create(0), |mut a, b| {
        a.expand(b);
        a
    })
}

/// Breadth-first traversal from the root. `read_nodes` returns the nodes of
/// the given index range; children are queued in storage order so a
/// serialized index is read front to back.
fn search_levels(
    level_bounds: &[Range<usize>],
    node_size: u16,
    bounds: &NodeItem,
    mut read_nodes: impl FnMut(Range<usize>) -> Result<Vec<NodeItem>>,
) -> Result<Vec<SearchResultItem>> {
    let Some(leaves) = level_bounds.first() else {
        return Ok(Vec::new());
    };
    let mut results = Vec::new();
    let mut queue = VecDeque::from([(0, level_bounds.len() - 1)]);
    while let Some((first, level)) = queue.pop_front() {
        // first is within level_bounds[level], checked when queued
        let end = min(first + node_size as usize, level_bounds[level].end);
        trace!("reading nodes {first}..{end} on level {level}");
        let nodes = read_nodes(first..end)?;
        for (pos, node) in (first..end).zip(&nodes) {
            if !bounds.intersects(node) {
                continue;
            }
            if level == 0 {
                let offset = usize::try_from(node.offset).map_err(|_| Error::InvalidNodeOffset {
                    level,
                    offset: node.offset,
                })?;
                results.push(SearchResultItem {
                    offset,
                    index: pos - leaves.start,
                });
            } else {
                let children = &level_bounds[level - 1];
                let first = usize::try_from(node.offset)
                    .ok()
                    .filter(|first| children.contains(first))
                    .ok_or(Error::InvalidNodeOffset {
                        level: level - 1,
                        offset: node.offset,
                    })?;
                queue.push_back((first, level - 1));
            }
        }
    }
    Ok(results)
}

/// Packed Hilbert R-Tree
pub struct PackedRTree {
    extent: NodeItem,
    node_items: Vec<NodeItem>,
    num_leaf_nodes: usize,
    branching_factor: u16,
    level_bounds: Vec<Range<usize>>,
}

impl PackedRTree {
    pub const DEFAULT_NODE_SIZE: u16 = 16;

    pub(crate) fn check_node_size(node_size: u16) -> Result<()> {
        if node_size < 2 {
            return Err(Error::IllegalNodeSize(node_size));
        }
        Ok(())
    }

    fn check_num_items(num_items: usize, node_size: u16) -> Result<()> {
        match Self::checked_index_size(num_items, node_size) {
            Some(_) => Ok(()),
            None => Err(Error::IndexTooLarge(num_items as u64)),
        }
    }

    /// Node ranges per level, leaves first. Empty for zero items.
    fn generate_level_bounds(num_items: usize, node_size: u16) -> Vec<Range<usize>> {
        if num_items == 0 {
            return Vec::new();
        }
        let node_size = node_size.max(2) as usize;
        // level sizes bottom-up; even a single leaf gets a root above it
        let mut sizes = vec![num_items];
        let mut n = num_items;
        loop {
            n = n.div_ceil(node_size);
            sizes.push(n);
            if n == 1 {
                break;
            }
        }
        // leaves are stored last, the root first
        let mut end: usize = sizes.iter().sum();
        sizes
            .iter()
            .map(|size| {
                let start = end - size;
                end = start;
                start..start + size
            })
            .collect()
    }

    /// Fill every parent level from the level below it
    fn generate_nodes(&mut self) {
        let node_size = self.branching_factor as usize;
        let levels = self.level_bounds.clone();
        for pair in levels.windows(2) {
            let (children, parents) = (&pair[0], &pair[1]);
            for (parent, first) in parents.clone().zip(children.clone().step_by(node_size)) {
                let last = min(first + node_size, children.end);
                let mut node = NodeItem::create(first as u64);
                for child in &self.node_items[first..last] {
                    node.expand(child);
                }
                self.node_items[parent] = node;
            }
        }
    }

    fn num_nodes(&self) -> usize {
        self.node_items.len()
    }

    /// Build a tree over leaves already in Hilbert order.
    pub fn build(nodes: &[NodeItem], extent: &NodeItem, node_size: u16) -> Result<PackedRTree> {
        Self::check_node_size(node_size)?;
        let level_bounds = PackedRTree::generate_level_bounds(nodes.len(), node_size);
        let num_nodes = level_bounds.first().map_or(0, |leaves| leaves.end);
        debug!(
            "building index: {} leaves, {num_nodes} nodes, node size {node_size}",
            nodes.len()
        );
        let mut node_items = vec![NodeItem::create(0); num_nodes - nodes.len()];
        node_items.extend_from_slice(nodes);
        let mut tree = PackedRTree {
            extent: extent.clone(),
            node_items,
            num_leaf_nodes: nodes.len(),
            branching_factor: node_size,
            level_bounds,
        };
        tree.generate_nodes();
        Ok(tree)
    }

    /// Load a serialized tree
    pub fn from_buf(data: impl Read, num_items: usize, node_size: u16) -> Result<PackedRTree> {
        Self::check_node_size(node_size)?;
        Self::check_num_items(num_items, node_size)?;
        let level_bounds = PackedRTree::generate_level_bounds(num_items, node_size);
        let num_nodes = level_bounds.first().map_or(0, |leaves| leaves.end);
        let node_items = read_nodes(data, num_nodes)?;
        Ok(PackedRTree {
            extent: calc_extent(&node_items),
            node_items,
            num_leaf_nodes: num_items,
            branching_factor: node_size,
            level_bounds,
        })
    }

    /// Search the tree for leaves intersecting the given box
    pub fn search(
        &self,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<Vec<SearchResultItem>> {
        let bounds = NodeItem::bounds(min_x, min_y, max_x, max_y);
        search_levels(
            &self.level_bounds,
            self.branching_factor,
            &bounds,
            |nodes| Ok(self.node_items[nodes].to_vec()),
        )
    }

    /// Search a serialized tree. `data` must be positioned at the start of
    /// the index and is left positioned right after it.
    pub fn stream_search<R: Read + Seek>(
        data: &mut R,
        num_items: usize,
        node_size: u16,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<Vec<SearchResultItem>> {
        Self::check_node_size(node_size)?;
        Self::check_num_items(num_items, node_size)?;
        let bounds = NodeItem::bounds(min_x, min_y, max_x, max_y);
        let level_bounds = PackedRTree::generate_level_bounds(num_items, node_size);
        let Some(num_nodes) = level_bounds.first().map(|leaves| leaves.end) else {
            return Ok(Vec::new());
        };
        let index_base = data.stream_position()?;
        let results = search_levels(&level_bounds, node_size, &bounds, |nodes| {
            read_node_items(data, index_base, nodes.start, nodes.len())
        })?;
        data.seek(SeekFrom::Start(
            index_base + (num_nodes * size_of::<NodeItem>()) as u64,
        ))?;
        Ok(results)
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.num_nodes() * size_of::<NodeItem>()
    }

    /// Serialized size in bytes of a tree over `num_items` leaves, 0 for no items.
    /// Saturates at `usize::MAX`.
    pub fn index_size(num_items: usize, node_size: u16) -> usize {
        Self::checked_index_size(num_items, node_size).unwrap_or(usize::MAX)
    }

    /// Serialized size in bytes, `None` when it overflows `usize`
    pub fn checked_index_size(num_items: usize, node_size: u16) -> Option<usize> {
        if num_items == 0 {
            return Some(0);
        }
        let node_size_min = node_size.max(2) as usize;
        let mut n = num_items;
        let mut num_nodes = n;
        loop {
            n = n.div_ceil(node_size_min);
            num_nodes = num_nodes.checked_add(n)?;
            if n == 1 {
                break;
            }
        }
        num_nodes.checked_mul(size_of::<NodeItem>())
    }

    /// Write all index nodes
    pub fn stream_write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for item in &self.node_items {
            item.write(out)?;
        }
        Ok(())
    }

    pub fn extent(&self) -> NodeItem {
        self.extent.clone()
    }

    /// All nodes in storage order
    pub fn node_items(&self) -> &[NodeItem] {
        &self.node_items
    }

    /// Node ranges per level, leaves first
    pub fn level_bounds(&self) -> &[Range<usize>] {
        &self.level_bounds
    }

    pub fn num_leaf_nodes(&self) -> usize {
        self.num_leaf_nodes
    }

    pub fn branching_factor(&self) -> u16 {
        self.branching_factor
    }
}

mod inspect {
    use super::*;
    use geozero::{ColumnValue, FeatureProcessor};

    impl PackedRTree {
        /// Emit every node box as a polygon feature, root level first.
        /// Properties: `levelno` (0 = root), `pos` (node index), `offset`.
        pub fn process_index<P: FeatureProcessor>(
            &self,
            processor: &mut P,
        ) -> geozero::error::Result<()> {
            processor.dataset_begin(Some("PackedRTree"))?;
            let levels = self.level_bounds.iter().rev().enumerate();
            let nodes =
                levels.flat_map(|(levelno, level)| level.clone().map(move |pos| (levelno, pos)));
            for (fid, (levelno, pos)) in nodes.enumerate() {
                let fid = fid as u64;
                let node = &self.node_items[pos];
                processor.feature_begin(fid)?;
                processor.properties_begin()?;
                let props = [
                    ("levelno", levelno as u64),
                    ("pos", pos as u64),
                    ("offset", node.offset),
                ];
                for (i, (name, value)) in props.into_iter().enumerate() {
                    processor.property(i, name, &ColumnValue::ULong(value))?;
                }
                processor.properties_end()?;
                processor.geometry_begin()?;
                processor.polygon_begin(true, 1, 0)?;
                processor.linestring_begin(false, 5, 0)?;
                let ring = [
                    (node.min_x, node.min_y),
                    (node.min_x, node.max_y),
                    (node.max_x, node.max_y),
                    (node.max_x, node.min_y),
                    (node.min_x, node.min_y),
                ];
                for (i, (x, y)) in ring.into_iter().enumerate() {
                    processor.xy(x, y, i)?;
                }
                processor.linestring_end(false, 0)?;
                processor.polygon_end(true, 0)?;
                processor.geometry_end()?;
                processor.feature_end(fid)?;
            }
            processor.dataset_end()
        }
    }
}
