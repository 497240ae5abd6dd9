use crate::error::{Error, Result};
use crate::feature_generated::{
    finish_size_prefixed_feature_buffer, size_prefixed_root_as_feature, Feature, FeatureArgs,
};
use crate::geometry::Geometry;
use crate::geometry_writer::write_geometry;
use crate::header_generated::GeometryType;
use crate::packed_r_tree::NodeItem;
use flatbuffers::FlatBufferBuilder;

/// One encoded feature message
#[derive(Debug)]
pub struct EncodedFeature<'a> {
    /// Size-prefixed message bytes
    pub buf: &'a [u8],
    /// Geometry bounds, empty when the feature has no geometry
    pub bbox: NodeItem,
}

/// Encodes features of one dataset into size-prefixed messages
pub struct FeatureWriter {
    fbb: FlatBufferBuilder<'static>,
    dataset_type: GeometryType,
    has_z: bool,
    has_m: bool,
    verify: bool,
}

impl FeatureWriter {
    pub fn new(dataset_type: GeometryType, has_z: bool, has_m: bool, verify: bool) -> Self {
        FeatureWriter {
            fbb: FlatBufferBuilder::new(),
            dataset_type,
            has_z,
            has_m,
            verify,
        }
    }

    pub fn dataset_type(&self) -> GeometryType {
        self.dataset_type
    }

    /// Reject geometries of another type than the dataset's.
    ///
    /// Heterogeneous datasets (type Unknown) accept everything; missing or
    /// empty geometries are always accepted.
    pub fn check_type(&self, geometry: Option<&Geometry>) -> Result<()> {
        match geometry {
            Some(g)
                if self.dataset_type != GeometryType::Unknown
                    && !g.is_empty()
                    && g.geometry_type() != self.dataset_type =>
            {
                Err(Error::MixedGeometryType {
                    expected: self.dataset_type,
                    found: g.geometry_type(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Encode one feature. `properties` is an encoded property buffer,
    /// omitted from the message when empty.
    pub fn encode(
        &mut self,
        geometry: Option<&Geometry>,
        properties: &[u8],
    ) -> Result<EncodedFeature<'_>> {
        self.check_type(geometry)?;
        self.fbb.reset();
        let geometry = geometry.filter(|g| !g.is_empty());
        let bbox = geometry.map_or_else(|| NodeItem::create(0), Geometry::bbox);
        let geometry = geometry.map(|g| {
            write_geometry(
                &mut self.fbb,
                g,
                self.dataset_type,
                self.has_z,
                self.has_m,
                0,
            )
        });
        let properties = if properties.is_empty() {
            None
        } else {
            Some(self.fbb.create_vector(properties))
        };
        let feature = Feature::create(
            &mut self.fbb,
            &FeatureArgs {
                geometry,
                properties,
                ..Default::default()
            },
        );
        finish_size_prefixed_feature_buffer(&mut self.fbb, feature);
        let buf = self.fbb.finished_data();
        if self.verify && size_prefixed_root_as_feature(buf).is_err() {
            return Err(Error::VerificationFailed("Feature"));
        }
        Ok(EncodedFeature { buf, bbox })
    }
}
