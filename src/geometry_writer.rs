//! Flatten a [`Geometry`] into the FlatGeobuf wire geometry table.

use crate::feature_generated::{Geometry as FbGeometry, GeometryArgs};
use crate::geometry::{Coord, Geometry};
use crate::header_generated::GeometryType;
use flatbuffers::{FlatBufferBuilder, ForwardsUOffset, Vector, WIPOffset};

/// Flat coordinate arrays of one wire geometry record
struct CoordBuffers {
    has_z: bool,
    has_m: bool,
    xy: Vec<f64>,
    z: Vec<f64>,
    m: Vec<f64>,
    /// Cumulative point count after each ring/part
    ends: Vec<u32>,
}

impl CoordBuffers {
    fn new(has_z: bool, has_m: bool) -> Self {
        CoordBuffers {
            has_z,
            has_m,
            xy: Vec::new(),
            z: Vec::new(),
            m: Vec::new(),
            ends: Vec::new(),
        }
    }

    fn push(&mut self, c: &Coord) {
        self.xy.push(c.x);
        self.xy.push(c.y);
        if self.has_z {
            self.z.push(c.z.unwrap_or(0.0));
        }
        if self.has_m {
            self.m.push(c.m.unwrap_or(0.0));
        }
    }

    fn push_run(&mut self, coords: &[Coord]) {
        self.xy.reserve(coords.len() * 2);
        for c in coords {
            self.push(c);
        }
    }

    fn push_part(&mut self, coords: &[Coord]) {
        self.push_run(coords);
        self.ends.push((self.xy.len() / 2) as u32);
    }

    fn finish<'a>(
        &self,
        fbb: &mut FlatBufferBuilder<'a>,
        type_: GeometryType,
        parts: Option<WIPOffset<Vector<'a, ForwardsUOffset<FbGeometry<'a>>>>>,
    ) -> WIPOffset<FbGeometry<'a>> {
        let has_coords = !self.xy.is_empty();
        // a single ring/part is implied by the full coordinate run
        let ends = if has_coords && self.ends.len() > 1 {
            Some(fbb.create_vector(&self.ends))
        } else {
            None
        };
        let xy = if has_coords {
            Some(fbb.create_vector(&self.xy))
        } else {
            None
        };
        let z = if has_coords && self.has_z {
            Some(fbb.create_vector(&self.z))
        } else {
            None
        };
        let m = if has_coords && self.has_m {
            Some(fbb.create_vector(&self.m))
        } else {
            None
        };
        FbGeometry::create(
            fbb,
            &GeometryArgs {
                ends,
                xy,
                z,
                m,
                type_,
                parts,
                ..Default::default()
            },
        )
    }
}

/// Build the wire record for `geometry`.
///
/// The type tag is stamped on nested records and on top-level records of
/// datasets without a declared type; homogeneous top-level records leave it
/// at Unknown since the header supplies it.
pub(crate) fn write_geometry<'a>(
    fbb: &mut FlatBufferBuilder<'a>,
    geometry: &Geometry,
    dataset_type: GeometryType,
    has_z: bool,
    has_m: bool,
    depth: usize,
) -> WIPOffset<FbGeometry<'a>> {
    let type_ = if depth > 0 || dataset_type == GeometryType::Unknown {
        geometry.geometry_type()
    } else {
        GeometryType::Unknown
    };
    let mut coords = CoordBuffers::new(has_z, has_m);
    match geometry {
        Geometry::Point(point) => {
            if let Some(c) = point {
                coords.push(c);
            }
        }
        Geometry::LineString(points) | Geometry::MultiPoint(points) => coords.push_run(points),
        Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
            for ring in rings {
                coords.push_part(ring);
            }
        }
        Geometry::MultiPolygon(polygons) => {
            let parts: Vec<_> = polygons
                .iter()
                .filter(|rings| !rings.is_empty())
                .map(|rings| {
                    let mut part = CoordBuffers::new(has_z, has_m);
                    for ring in rings {
                        part.push_part(ring);
                    }
                    part.finish(fbb, GeometryType::Polygon, None)
                })
                .collect();
            let parts = fbb.create_vector(&parts);
            return coords.finish(fbb, type_, Some(parts));
        }
        Geometry::GeometryCollection(geometries) => {
            let parts: Vec<_> = geometries
                .iter()
                .map(|part| write_geometry(fbb, part, dataset_type, has_z, has_m, depth + 1))
                .collect();
            let parts = fbb.create_vector(&parts);
            return coords.finish(fbb, type_, Some(parts));
        }
    }
    coords.finish(fbb, type_, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(geometry: &Geometry, dataset_type: GeometryType, has_z: bool, has_m: bool) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let g = write_geometry(&mut fbb, geometry, dataset_type, has_z, has_m, 0);
        fbb.finish(g, None);
        fbb.finished_data().to_vec()
    }

    fn ring(coords: &[(f64, f64)]) -> Vec<Coord> {
        coords.iter().map(|&(x, y)| Coord::xy(x, y)).collect()
    }

    #[test]
    fn point_xy() -> Result<(), flatbuffers::InvalidFlatbuffer> {
        let buf = encode(
            &Geometry::Point(Some(Coord::xy(1.0, 2.0))),
            GeometryType::Point,
            false,
            false,
        );
        let g = flatbuffers::root::<FbGeometry>(&buf)?;
        assert_eq!(g.xy().unwrap().iter().collect::<Vec<_>>(), vec![1.0, 2.0]);
        assert!(g.z().is_none());
        assert!(g.ends().is_none());
        assert_eq!(g.type_(), GeometryType::Unknown);
        Ok(())
    }

    #[test]
    fn polygon_with_hole_records_ends() -> Result<(), flatbuffers::InvalidFlatbuffer> {
        let polygon = Geometry::Polygon(vec![
            ring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 0.0)]),
            ring(&[(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 1.0)]),
        ]);
        let buf = encode(&polygon, GeometryType::Polygon, false, false);
        let g = flatbuffers::root::<FbGeometry>(&buf)?;
        assert_eq!(g.ends().unwrap().iter().collect::<Vec<_>>(), vec![4, 8]);
        assert_eq!(g.xy().unwrap().len(), 16);
        Ok(())
    }

    #[test]
    fn single_ring_omits_ends() -> Result<(), flatbuffers::InvalidFlatbuffer> {
        let lines = Geometry::MultiLineString(vec![ring(&[(0.0, 0.0), (1.0, 1.0)])]);
        let buf = encode(&lines, GeometryType::MultiLineString, false, false);
        let g = flatbuffers::root::<FbGeometry>(&buf)?;
        assert!(g.ends().is_none());
        Ok(())
    }

    #[test]
    fn missing_ordinates_filled_with_zero() -> Result<(), flatbuffers::InvalidFlatbuffer> {
        let line = Geometry::LineString(vec![Coord::xyz(0.0, 0.0, 5.0), Coord::xy(1.0, 1.0)]);
        let buf = encode(&line, GeometryType::LineString, true, true);
        let g = flatbuffers::root::<FbGeometry>(&buf)?;
        assert_eq!(g.z().unwrap().iter().collect::<Vec<_>>(), vec![5.0, 0.0]);
        assert_eq!(g.m().unwrap().iter().collect::<Vec<_>>(), vec![0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn multipolygon_parts() -> Result<(), flatbuffers::InvalidFlatbuffer> {
        let mp = Geometry::MultiPolygon(vec![
            vec![ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)])],
            vec![],
            vec![ring(&[(5.0, 5.0), (6.0, 5.0), (6.0, 6.0), (5.0, 5.0)])],
        ]);
        let buf = encode(&mp, GeometryType::MultiPolygon, false, false);
        let g = flatbuffers::root::<FbGeometry>(&buf)?;
        assert!(g.xy().is_none());
        let parts = g.parts().unwrap();
        // polygons without rings are dropped
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.get(0).type_(), GeometryType::Polygon);
        assert_eq!(parts.get(1).xy().unwrap().get(0), 5.0);
        Ok(())
    }

    #[test]
    fn heterogeneous_stamps_type() -> Result<(), flatbuffers::InvalidFlatbuffer> {
        let gc = Geometry::GeometryCollection(vec![
            Geometry::Point(Some(Coord::xy(1.0, 1.0))),
            Geometry::LineString(ring(&[(0.0, 0.0), (1.0, 1.0)])),
        ]);
        let buf = encode(&gc, GeometryType::Unknown, false, false);
        let g = flatbuffers::root::<FbGeometry>(&buf)?;
        assert_eq!(g.type_(), GeometryType::GeometryCollection);
        let parts = g.parts().unwrap();
        assert_eq!(parts.get(0).type_(), GeometryType::Point);
        assert_eq!(parts.get(1).type_(), GeometryType::LineString);
        Ok(())
    }

    #[test]
    fn empty_point_has_no_coordinates() -> Result<(), flatbuffers::InvalidFlatbuffer> {
        let buf = encode(&Geometry::Point(None), GeometryType::Point, true, false);
        let g = flatbuffers::root::<FbGeometry>(&buf)?;
        assert!(g.xy().is_none());
        assert!(g.z().is_none());
        Ok(())
    }
}
