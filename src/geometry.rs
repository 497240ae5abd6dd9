//! Owned geometry values handed to the encoder and returned by the decoder.

use crate::header_generated::GeometryType;
use crate::packed_r_tree::NodeItem;
use geozero::error::Result as GeozeroResult;
use geozero::{CoordDimensions, GeomProcessor, GeozeroGeometry};
use std::ops::Deref;

/// Coordinate with optional Z and M ordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Coord {
            x,
            y,
            z: None,
            m: None,
        }
    }
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Coord {
            x,
            y,
            z: Some(z),
            m: None,
        }
    }
    pub fn xym(x: f64, y: f64, m: f64) -> Self {
        Coord {
            x,
            y,
            z: None,
            m: Some(m),
        }
    }
    pub fn xyzm(x: f64, y: f64, z: f64, m: f64) -> Self {
        Coord {
            x,
            y,
            z: Some(z),
            m: Some(m),
        }
    }
}

/// Supported geometry kinds. `Point(None)` is the empty point.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    GeometryCollection(Vec<Geometry>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
        }
    }

    /// Visit every coordinate in storage order, stopping early when `f` returns false.
    fn visit_coords<F: FnMut(&Coord) -> bool>(&self, f: &mut F) -> bool {
        match self {
            Geometry::Point(p) => p.iter().all(|c| f(c)),
            Geometry::LineString(coords) | Geometry::MultiPoint(coords) => {
                coords.iter().all(|c| f(c))
            }
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                rings.iter().flatten().all(|c| f(c))
            }
            Geometry::MultiPolygon(polys) => polys.iter().flatten().flatten().all(|c| f(c)),
            Geometry::GeometryCollection(parts) => parts.iter().all(|g| g.visit_coords(&mut *f)),
        }
    }

    fn first_coord(&self) -> Option<Coord> {
        let mut first = None;
        self.visit_coords(&mut |c: &Coord| {
            first = Some(*c);
            false
        });
        first
    }

    /// True when the geometry holds no coordinates at all
    pub fn is_empty(&self) -> bool {
        self.first_coord().is_none()
    }

    pub fn has_z(&self) -> bool {
        self.first_coord().map_or(false, |c| c.z.is_some())
    }

    pub fn has_m(&self) -> bool {
        self.first_coord().map_or(false, |c| c.m.is_some())
    }

    /// Axis-aligned bounding box, empty (inverted) for an empty geometry
    pub fn bbox(&self) -> NodeItem {
        let mut bbox = NodeItem::create(0);
        self.visit_coords(&mut |c: &Coord| {
            bbox.expand_xy(c.x, c.y);
            true
        });
        bbox
    }

    fn process<P: GeomProcessor>(
        &self,
        processor: &mut P,
        tagged: bool,
        idx: usize,
    ) -> GeozeroResult<()> {
        match self {
            Geometry::Point(None) => processor.empty_point(idx),
            Geometry::Point(Some(c)) => {
                processor.point_begin(idx)?;
                process_coord(processor, c, 0)?;
                processor.point_end(idx)
            }
            Geometry::LineString(coords) => process_line(processor, coords, tagged, idx),
            Geometry::Polygon(rings) => process_polygon(processor, rings, tagged, idx),
            Geometry::MultiPoint(coords) => {
                processor.multipoint_begin(coords.len(), idx)?;
                for (i, c) in coords.iter().enumerate() {
                    process_coord(processor, c, i)?;
                }
                processor.multipoint_end(idx)
            }
            Geometry::MultiLineString(lines) => {
                processor.multilinestring_begin(lines.len(), idx)?;
                for (i, line) in lines.iter().enumerate() {
                    process_line(processor, line, false, i)?;
                }
                processor.multilinestring_end(idx)
            }
            Geometry::MultiPolygon(polys) => {
                processor.multipolygon_begin(polys.len(), idx)?;
                for (i, rings) in polys.iter().enumerate() {
                    process_polygon(processor, rings, false, i)?;
                }
                processor.multipolygon_end(idx)
            }
            Geometry::GeometryCollection(parts) => {
                processor.geometrycollection_begin(parts.len(), idx)?;
                for (i, part) in parts.iter().enumerate() {
                    part.process(processor, true, i)?;
                }
                processor.geometrycollection_end(idx)
            }
        }
    }
}

fn process_coord<P: GeomProcessor>(
    processor: &mut P,
    c: &Coord,
    idx: usize,
) -> GeozeroResult<()> {
    if processor.multi_dim() {
        processor.coordinate(c.x, c.y, c.z, c.m, None, None, idx)
    } else {
        processor.xy(c.x, c.y, idx)
    }
}

fn process_line<P: GeomProcessor>(
    processor: &mut P,
    coords: &[Coord],
    tagged: bool,
    idx: usize,
) -> GeozeroResult<()> {
    processor.linestring_begin(tagged, coords.len(), idx)?;
    for (i, c) in coords.iter().enumerate() {
        process_coord(processor, c, i)?;
    }
    processor.linestring_end(tagged, idx)
}

fn process_polygon<P: GeomProcessor>(
    processor: &mut P,
    rings: &[Vec<Coord>],
    tagged: bool,
    idx: usize,
) -> GeozeroResult<()> {
    processor.polygon_begin(tagged, rings.len(), idx)?;
    for (i, ring) in rings.iter().enumerate() {
        process_line(processor, ring, false, i)?;
    }
    processor.polygon_end(tagged, idx)
}

impl GeozeroGeometry for Geometry {
    fn process_geom<P: GeomProcessor>(&self, processor: &mut P) -> GeozeroResult<()> {
        self.process(processor, true, 0)
    }
    fn dims(&self) -> CoordDimensions {
        CoordDimensions {
            z: self.has_z(),
            m: self.has_m(),
            t: false,
            tm: false,
        }
    }
}

/// Geometry together with its spatial reference and coordinate dimensions.
///
/// The dimension flags are authoritative, so an empty geometry can still be
/// declared as Z or M.
#[derive(Clone, Debug, PartialEq)]
pub struct FgbGeometry {
    pub geometry: Geometry,
    /// Spatial reference id, `None` when unknown
    pub srid: Option<i32>,
    pub has_z: bool,
    pub has_m: bool,
}

impl FgbGeometry {
    /// Dimensions taken from the first coordinate, no spatial reference
    pub fn new(geometry: Geometry) -> Self {
        FgbGeometry {
            has_z: geometry.has_z(),
            has_m: geometry.has_m(),
            srid: None,
            geometry,
        }
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }

    pub fn with_dims(mut self, has_z: bool, has_m: bool) -> Self {
        self.has_z = has_z;
        self.has_m = has_m;
        self
    }

    pub fn srid(&self) -> Option<i32> {
        self.srid
    }

    /// Declared Z flag, independent of the coordinates
    pub fn has_z(&self) -> bool {
        self.has_z
    }

    pub fn has_m(&self) -> bool {
        self.has_m
    }
}

impl From<Geometry> for FgbGeometry {
    fn from(geometry: Geometry) -> Self {
        FgbGeometry::new(geometry)
    }
}

impl Deref for FgbGeometry {
    type Target = Geometry;

    fn deref(&self) -> &Geometry {
        &self.geometry
    }
}

impl GeozeroGeometry for FgbGeometry {
    fn process_geom<P: GeomProcessor>(&self, processor: &mut P) -> GeozeroResult<()> {
        self.geometry.process(processor, true, 0)
    }
    fn dims(&self) -> CoordDimensions {
        CoordDimensions {
            z: self.has_z(),
            m: self.has_m(),
            t: false,
            tm: false,
        }
    }
}
