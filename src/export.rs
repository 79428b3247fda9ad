use gdal::vector::{Geometry, LayerAccess, LayerOptions, OGRwkbGeometryType};
use gdal::{Dataset, DriverManager};
use std::path::Path;
use tracing::debug;

use crate::contour::ELEV_FIELD;
use crate::error::{Error, Result};

/// ベクタレイヤを別形式に変換し、Z座標を属性値で置き換える（`ogr2ogr -zfield` 相当）
#[derive(Debug, Clone)]
pub struct VectorTranscoder {
    driver: String,
    z_field: String,
}

impl Default for VectorTranscoder {
    fn default() -> Self {
        Self::new("DXF", ELEV_FIELD)
    }
}

impl VectorTranscoder {
    pub fn new(driver: impl Into<String>, z_field: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            z_field: z_field.into(),
        }
    }

    /// 変換して書き出したフィーチャ数を返す
    pub fn transcode(&self, input: &Path, output: &Path) -> Result<usize> {
        let source = Dataset::open(input)?;
        let mut source_layer = source.layer(0)?;
        let srs = source_layer.spatial_ref();

        let driver = DriverManager::get_driver_by_name(&self.driver)?;
        let mut target = driver.create_vector_only(output)?;
        let mut target_layer = target.create_layer(LayerOptions {
            name: "entities",
            srs: srs.as_ref(),
            ty: OGRwkbGeometryType::wkbLineString25D,
            ..Default::default()
        })?;

        let mut written = 0;
        for feature in source_layer.features() {
            // ジオメトリの無いフィーチャは飛ばす
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            let z = feature
                .field_as_double_by_name(&self.z_field)?
                .ok_or_else(|| {
                    Error::input(format!(
                        "feature {:?} has no {} value",
                        feature.fid(),
                        self.z_field
                    ))
                })?;

            target_layer.create_feature(with_z(geometry, z)?)?;
            written += 1;
        }

        debug!(
            "Transcoded {} features to {} ({:?})",
            written, self.driver, output
        );
        Ok(written)
    }
}

/// 全頂点のZを `z` にしたラインを作る
fn with_z(geometry: &Geometry, z: f64) -> Result<Geometry> {
    let count = geometry.geometry_count();
    if count == 0 {
        let mut line = Geometry::empty(OGRwkbGeometryType::wkbLineString25D)?;
        for (x, y, _) in geometry.get_point_vec() {
            line.add_point((x, y, z));
        }
        return Ok(line);
    }

    // マルチライン
    let mut multi = Geometry::empty(OGRwkbGeometryType::wkbMultiLineString25D)?;
    for i in 0..count {
        let part = geometry.get_geometry(i);
        multi.add_geometry(with_z(&part, z)?)?;
    }
    Ok(multi)
}
