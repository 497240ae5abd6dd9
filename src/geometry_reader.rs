//! Rebuild a [`Geometry`] from the FlatGeobuf wire geometry table.

use crate::error::{Error, Result};
use crate::feature_generated::Geometry as FbGeometry;
use crate::geometry::{Coord, Geometry};
use crate::header_generated::GeometryType;
use flatbuffers::Vector;
use std::ops::Range;

/// Coordinate arrays of one record, length-checked against the point count
struct Ordinates<'a> {
    xy: Vector<'a, f64>,
    z: Option<Vector<'a, f64>>,
    m: Option<Vector<'a, f64>>,
}

impl<'a> Ordinates<'a> {
    fn new(
        geometry: &FbGeometry<'a>,
        xy: Vector<'a, f64>,
        geometry_type: GeometryType,
        has_z: bool,
        has_m: bool,
    ) -> Result<Self> {
        let num_points = xy.len() / 2;
        let checked = |ordinates: Option<Vector<'a, f64>>, wanted: bool| -> Result<_> {
            if !wanted {
                return Ok(None);
            }
            match ordinates {
                Some(v) if v.len() >= num_points => Ok(Some(v)),
                _ => Err(Error::MissingCoordinates(geometry_type)),
            }
        };
        Ok(Ordinates {
            xy,
            z: checked(geometry.z(), has_z)?,
            m: checked(geometry.m(), has_m)?,
        })
    }

    fn num_points(&self) -> usize {
        self.xy.len() / 2
    }

    fn coord(&self, i: usize) -> Coord {
        Coord {
            x: self.xy.get(i * 2),
            y: self.xy.get(i * 2 + 1),
            z: self.z.map(|z| z.get(i)),
            m: self.m.map(|m| m.get(i)),
        }
    }

    fn run(&self, range: Range<usize>) -> Vec<Coord> {
        range.map(|i| self.coord(i)).collect()
    }
}

/// Split the point run into rings/parts using `ends`
fn runs(geometry: &FbGeometry, ordinates: &Ordinates) -> Result<Vec<Vec<Coord>>> {
    let num_points = ordinates.num_points();
    match geometry.ends() {
        Some(ends) if ends.len() > 1 => {
            let mut parts = Vec::with_capacity(ends.len());
            let mut start = 0;
            for end in ends.iter() {
                let end = end as usize;
                if end < start || end > num_points {
                    return Err(Error::InvalidEnds {
                        end,
                        points: num_points,
                    });
                }
                parts.push(ordinates.run(start..end));
                start = end;
            }
            Ok(parts)
        }
        _ => Ok(vec![ordinates.run(0..num_points)]),
    }
}

fn empty(geometry_type: GeometryType) -> Geometry {
    match geometry_type {
        GeometryType::Point => Geometry::Point(None),
        GeometryType::LineString => Geometry::LineString(Vec::new()),
        GeometryType::Polygon => Geometry::Polygon(Vec::new()),
        GeometryType::MultiPoint => Geometry::MultiPoint(Vec::new()),
        _ => Geometry::MultiLineString(Vec::new()),
    }
}

fn read(
    geometry: &FbGeometry,
    geometry_type: GeometryType,
    has_z: bool,
    has_m: bool,
    nested: bool,
) -> Result<Geometry> {
    let geometry_type = if geometry_type == GeometryType::Unknown {
        geometry.type_()
    } else {
        geometry_type
    };
    match geometry_type {
        GeometryType::MultiPolygon => {
            let mut polygons = Vec::new();
            for part in geometry.parts().into_iter().flat_map(|parts| parts.iter()) {
                match read(&part, GeometryType::Polygon, has_z, has_m, true)? {
                    Geometry::Polygon(rings) => polygons.push(rings),
                    _ => return Err(Error::UnsupportedGeometryType(part.type_())),
                }
            }
            Ok(Geometry::MultiPolygon(polygons))
        }
        GeometryType::GeometryCollection => {
            let mut geometries = Vec::new();
            for part in geometry.parts().into_iter().flat_map(|parts| parts.iter()) {
                geometries.push(read(&part, part.type_(), has_z, has_m, true)?);
            }
            Ok(Geometry::GeometryCollection(geometries))
        }
        GeometryType::Point
        | GeometryType::LineString
        | GeometryType::Polygon
        | GeometryType::MultiPoint
        | GeometryType::MultiLineString => {
            let xy = match geometry.xy() {
                Some(xy) if !xy.is_empty() => xy,
                // empty members of collections carry no coordinates
                _ if nested => return Ok(empty(geometry_type)),
                _ => return Err(Error::MissingCoordinates(geometry_type)),
            };
            let ordinates = Ordinates::new(geometry, xy, geometry_type, has_z, has_m)?;
            let geometry = match geometry_type {
                GeometryType::Point => {
                    Geometry::Point((ordinates.num_points() > 0).then(|| ordinates.coord(0)))
                }
                GeometryType::LineString => {
                    Geometry::LineString(ordinates.run(0..ordinates.num_points()))
                }
                GeometryType::MultiPoint => {
                    Geometry::MultiPoint(ordinates.run(0..ordinates.num_points()))
                }
                GeometryType::Polygon => Geometry::Polygon(runs(geometry, &ordinates)?),
                _ => Geometry::MultiLineString(runs(geometry, &ordinates)?),
            };
            Ok(geometry)
        }
        other => Err(Error::UnsupportedGeometryType(other)),
    }
}

/// Decode a top-level wire record. `geometry_type` is the dataset type from
/// the header; `Unknown` defers to the type stamped on the record.
pub(crate) fn read_geometry(
    geometry: &FbGeometry,
    geometry_type: GeometryType,
    has_z: bool,
    has_m: bool,
) -> Result<Geometry> {
    read(geometry, geometry_type, has_z, has_m, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry_writer::write_geometry;
    use flatbuffers::FlatBufferBuilder;

    fn roundtrip(geometry: &Geometry, dataset_type: GeometryType) -> Result<Geometry> {
        let (has_z, has_m) = (geometry.has_z(), geometry.has_m());
        let mut fbb = FlatBufferBuilder::new();
        let g = write_geometry(&mut fbb, geometry, dataset_type, has_z, has_m, 0);
        fbb.finish(g, None);
        let g = flatbuffers::root::<FbGeometry>(fbb.finished_data())?;
        read_geometry(&g, dataset_type, has_z, has_m)
    }

    fn line(coords: &[(f64, f64)]) -> Vec<Coord> {
        coords.iter().map(|&(x, y)| Coord::xy(x, y)).collect()
    }

    #[test]
    fn simple_types() -> Result<()> {
        let geometries = vec![
            Geometry::Point(Some(Coord::xy(1.0, 2.0))),
            Geometry::LineString(line(&[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)])),
            Geometry::MultiPoint(line(&[(0.0, 0.0), (5.0, 5.0)])),
            Geometry::Polygon(vec![
                line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 0.0)]),
                line(&[(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 1.0)]),
            ]),
            Geometry::MultiLineString(vec![line(&[(0.0, 0.0), (1.0, 1.0)])]),
        ];
        for geometry in geometries {
            assert_eq!(roundtrip(&geometry, geometry.geometry_type())?, geometry);
        }
        Ok(())
    }

    #[test]
    fn zm_coordinates() -> Result<()> {
        let geometry = Geometry::MultiLineString(vec![
            vec![Coord::xyzm(0.0, 0.0, 1.0, 2.0), Coord::xyzm(1.0, 1.0, 3.0, 4.0)],
            vec![Coord::xyzm(5.0, 5.0, 6.0, 7.0), Coord::xyzm(8.0, 8.0, 9.0, 10.0)],
        ]);
        assert_eq!(roundtrip(&geometry, GeometryType::MultiLineString)?, geometry);
        let geometry = Geometry::Point(Some(Coord::xym(1.0, 2.0, 3.0)));
        assert_eq!(roundtrip(&geometry, GeometryType::Point)?, geometry);
        Ok(())
    }

    #[test]
    fn nested_collections() -> Result<()> {
        let geometry = Geometry::GeometryCollection(vec![
            Geometry::Point(Some(Coord::xy(1.0, 2.0))),
            Geometry::MultiPolygon(vec![vec![line(&[
                (0.0, 0.0),
                (1.0, 0.0),
                (1.0, 1.0),
                (0.0, 0.0),
            ])]]),
            Geometry::LineString(Vec::new()),
        ]);
        assert_eq!(roundtrip(&geometry, GeometryType::GeometryCollection)?, geometry);
        assert_eq!(roundtrip(&geometry, GeometryType::Unknown)?, geometry);
        Ok(())
    }

    #[test]
    fn missing_xy_at_top_level() {
        let mut fbb = FlatBufferBuilder::new();
        let g = FbGeometry::create(&mut fbb, &Default::default());
        fbb.finish(g, None);
        let g = flatbuffers::root::<FbGeometry>(fbb.finished_data()).unwrap();
        assert!(matches!(
            read_geometry(&g, GeometryType::LineString, false, false),
            Err(Error::MissingCoordinates(GeometryType::LineString))
        ));
    }

    #[test]
    fn unsupported_type() {
        let mut fbb = FlatBufferBuilder::new();
        let g = FbGeometry::create(&mut fbb, &Default::default());
        fbb.finish(g, None);
        let g = flatbuffers::root::<FbGeometry>(fbb.finished_data()).unwrap();
        assert!(matches!(
            read_geometry(&g, GeometryType::CircularString, false, false),
            Err(Error::UnsupportedGeometryType(GeometryType::CircularString))
        ));
        // heterogeneous record without a type tag
        assert!(matches!(
            read_geometry(&g, GeometryType::Unknown, false, false),
            Err(Error::UnsupportedGeometryType(GeometryType::Unknown))
        ));
    }

    #[test]
    fn ends_out_of_range() {
        let mut fbb = FlatBufferBuilder::new();
        let xy = fbb.create_vector(&[0.0, 0.0, 1.0, 1.0]);
        let ends = fbb.create_vector(&[1u32, 5]);
        let g = FbGeometry::create(
            &mut fbb,
            &crate::feature_generated::GeometryArgs {
                xy: Some(xy),
                ends: Some(ends),
                ..Default::default()
            },
        );
        fbb.finish(g, None);
        let g = flatbuffers::root::<FbGeometry>(fbb.finished_data()).unwrap();
        assert!(matches!(
            read_geometry(&g, GeometryType::Polygon, false, false),
            Err(Error::InvalidEnds { end: 5, points: 2 })
        ));
    }

    #[test]
    fn declared_z_without_array() {
        let mut fbb = FlatBufferBuilder::new();
        let xy = fbb.create_vector(&[0.0, 0.0]);
        let g = FbGeometry::create(
            &mut fbb,
            &crate::feature_generated::GeometryArgs {
                xy: Some(xy),
                ..Default::default()
            },
        );
        fbb.finish(g, None);
        let g = flatbuffers::root::<FbGeometry>(fbb.finished_data()).unwrap();
        assert!(matches!(
            read_geometry(&g, GeometryType::Point, true, false),
            Err(Error::MissingCoordinates(GeometryType::Point))
        ));
    }
}
