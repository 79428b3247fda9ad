//! 境界ポリゴンによるラスタのクリップ（crop to cutline）
//!
//! 出力範囲は境界の外接矩形をソースのピクセル格子に合わせて外側に丸めたもの。
//! セル中心が境界の外にあるセルは NoData になる。

use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{BoundingRect, Intersects, MultiPolygon, Point, Rect};
use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{pixel_to_world, world_to_pixel, ElevationRaster, GeoTransform, SampleType};
use crate::raster::band_encoding;

/// 整数とみなす誤差
const SNAP_EPSILON: f64 = 1e-9;

/// クリップ用の境界（全レイヤ・全フィーチャのポリゴンをまとめたもの）
#[derive(Debug, Clone)]
pub struct Boundary {
    polygons: MultiPolygon<f64>,
}

impl Boundary {
    pub fn new(polygons: MultiPolygon<f64>) -> Result<Self> {
        if polygons.0.is_empty() {
            return Err(Error::input("boundary contains no polygon"));
        }
        Ok(Self { polygons })
    }

    /// ベクタファイルを読み込む。`target_srs` が指定され、レイヤの座標系と異なる場合は変換する
    pub fn open(path: &Path, target_srs: Option<&SpatialRef>) -> Result<Self> {
        let dataset = Dataset::open(path)
            .map_err(|e| Error::input(format!("cannot open boundary {:?}: {}", path, e)))?;

        let mut polygons = Vec::new();
        for mut layer in dataset.layers() {
            let transform = match (layer.spatial_ref(), target_srs) {
                (Some(mut source), Some(target)) if source != *target => {
                    debug!("Reprojecting boundary layer {:?} to raster CRS", layer.name());
                    // 座標は常に (x, y) = (経度, 緯度) の順で扱う
                    let mut target = target.clone();
                    source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
                    target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
                    Some(CoordTransform::new(&source, &target)?)
                }
                _ => None,
            };

            for feature in layer.features() {
                let Some(geometry) = feature.geometry() else {
                    continue;
                };
                let mut geometry = geometry.clone();
                if let Some(transform) = &transform {
                    geometry.transform_inplace(transform)?;
                }
                collect_polygons(geometry.to_geo()?, &mut polygons);
            }
        }

        Self::new(MultiPolygon(polygons))
    }

    fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.polygons.bounding_rect()
    }

    /// 境界線上の点も内側とみなす
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygons.intersects(&Point::new(x, y))
    }
}

fn collect_polygons(geometry: geo::Geometry<f64>, out: &mut Vec<geo::Polygon<f64>>) {
    match geometry {
        geo::Geometry::Polygon(polygon) => out.push(polygon),
        geo::Geometry::MultiPolygon(multi) => out.extend(multi.0),
        geo::Geometry::Rect(rect) => out.push(rect.to_polygon()),
        geo::Geometry::GeometryCollection(collection) => {
            for geometry in collection.0 {
                collect_polygons(geometry, out);
            }
        }
        // 線・点は無視する
        _ => {}
    }
}

/// ソースラスタ内の読み込み範囲（ピクセル）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub col: usize,
    pub row: usize,
    pub cols: usize,
    pub rows: usize,
}

impl Window {
    /// 窓の左上を原点とするジオトランスフォーム
    pub fn geo_transform(&self, source: &GeoTransform) -> GeoTransform {
        let (x, y) = pixel_to_world(source, self.col as f64, self.row as f64);
        [x, source[1], source[2], y, source[4], source[5]]
    }
}

/// 境界の外接矩形をピクセル範囲に変換する。ラスタと重ならなければ `None`
pub fn pixel_window(
    geo_transform: &GeoTransform,
    raster_size: (usize, usize),
    boundary: &Boundary,
) -> Option<Window> {
    let rect = boundary.bounding_rect()?;
    let (min, max) = (rect.min(), rect.max());

    let mut col_min = f64::INFINITY;
    let mut col_max = f64::NEG_INFINITY;
    let mut row_min = f64::INFINITY;
    let mut row_max = f64::NEG_INFINITY;
    for (x, y) in [(min.x, min.y), (min.x, max.y), (max.x, min.y), (max.x, max.y)] {
        let (col, row) = world_to_pixel(geo_transform, x, y)?;
        col_min = col_min.min(col);
        col_max = col_max.max(col);
        row_min = row_min.min(row);
        row_max = row_max.max(row);
    }

    let (cols, rows) = raster_size;
    let col0 = clamp_index(snap(col_min).floor(), cols);
    let col1 = clamp_index(snap(col_max).ceil(), cols);
    let row0 = clamp_index(snap(row_min).floor(), rows);
    let row1 = clamp_index(snap(row_max).ceil(), rows);

    if col1 <= col0 || row1 <= row0 {
        return None;
    }

    Some(Window {
        col: col0,
        row: row0,
        cols: col1 - col0,
        rows: row1 - row0,
    })
}

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        value
    }
}

fn clamp_index(value: f64, upper: usize) -> usize {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, upper as f64) as usize
}

/// 境界外のセルを NoData にする（行単位で並列）
fn mask_outside(raster: &mut ElevationRaster, boundary: &Boundary) {
    let cols = raster.cols.max(1);
    let geo_transform = raster.geo_transform;
    let nodata = raster.nodata;

    raster
        .values
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, values)| {
            for (col, value) in values.iter_mut().enumerate() {
                // セル中心で判定
                let (x, y) = pixel_to_world(&geo_transform, col as f64 + 0.5, row as f64 + 0.5);
                if !boundary.contains(x, y) {
                    *value = nodata;
                }
            }
        });
}

/// ラスタファイルを境界でクリップする
///
/// 窓の範囲だけを読み込む。保存型は Float64 ならそのまま、それ以外は Float32 になる。
pub fn clip(dem_path: &Path, boundary_path: &Path, fallback_nodata: f64) -> Result<ElevationRaster> {
    let dataset = Dataset::open(dem_path)
        .map_err(|e| Error::input(format!("cannot open raster {:?}: {}", dem_path, e)))?;
    if dataset.raster_count() == 0 {
        return Err(Error::input(format!("{:?} has no raster band", dem_path)));
    }

    let raster_size = dataset.raster_size();
    let geo_transform = dataset
        .geo_transform()
        .map_err(|_| Error::input(format!("{:?} has no geotransform", dem_path)))?;
    let srs = dataset.spatial_ref().ok();

    let boundary = Boundary::open(boundary_path, srs.as_ref())?;
    let window = overlap_window(&geo_transform, raster_size, &boundary)?;
    debug!("Clip window {:?} of raster {:?}", window, raster_size);

    let band = dataset.rasterband(1)?;
    let (sample_type, nodata) = band_encoding(&band, fallback_nodata);

    let buffer = band.read_as::<f64>(
        (window.col as isize, window.row as isize),
        (window.cols, window.rows),
        (window.cols, window.rows),
        None,
    )?;
    let (_, values) = buffer.into_shape_and_vec();

    let source = SourceInfo {
        geo_transform,
        projection: dataset.projection(),
        nodata,
        sample_type,
    };
    Ok(cut_window(&source, &window, values, &boundary))
}

/// 切り出し元ラスタの属性
struct SourceInfo {
    geo_transform: GeoTransform,
    projection: String,
    nodata: f64,
    sample_type: SampleType,
}

fn overlap_window(
    geo_transform: &GeoTransform,
    raster_size: (usize, usize),
    boundary: &Boundary,
) -> Result<Window> {
    pixel_window(geo_transform, raster_size, boundary)
        .ok_or_else(|| Error::input("boundary does not overlap the raster extent"))
}

/// 窓の値からクリップ済みラスタを作り、境界外をマスクする
fn cut_window(
    source: &SourceInfo,
    window: &Window,
    values: Vec<f64>,
    boundary: &Boundary,
) -> ElevationRaster {
    let mut clipped = ElevationRaster {
        cols: window.cols,
        rows: window.rows,
        geo_transform: window.geo_transform(&source.geo_transform),
        projection: source.projection.clone(),
        nodata: source.nodata,
        sample_type: source.sample_type,
        values,
    };
    mask_outside(&mut clipped, boundary);
    warn_if_empty(&clipped);
    clipped
}

fn warn_if_empty(raster: &ElevationRaster) {
    if raster.valid_count() == 0 {
        warn!(
            "Clipped raster ({} x {}) has no valid cells inside the boundary",
            raster.cols, raster.rows
        );
    }
}
