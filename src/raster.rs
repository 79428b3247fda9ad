use gdal::raster::{Buffer, GdalDataType, GdalType, RasterBand};
use gdal::{Dataset, DriverManager};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{ElevationRaster, SampleType};

/// ジオトランスフォームが無いラスタ用（ピクセル座標そのまま）
const IDENTITY_TRANSFORM: [f64; 6] = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

#[derive(Default)]
pub struct GeoTiffWriter {}

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self {}
    }

    pub fn write(&self, raster: &ElevationRaster, output_path: &Path) -> Result<()> {
        match raster.sample_type {
            SampleType::Float32 => self.write_typed(raster, output_path, |v| v as f32),
            SampleType::Float64 => self.write_typed(raster, output_path, |v| v),
        }
    }

    fn write_typed<T: GdalType + Copy>(
        &self,
        raster: &ElevationRaster,
        output_path: &Path,
        cast: impl Fn(f64) -> T,
    ) -> Result<()> {
        let (rows, cols) = raster.shape();

        tracing::debug!(
            "Writing {:?} GeoTIFF: {} x {} pixels -> {:?}",
            raster.sample_type,
            cols,
            rows,
            output_path
        );

        // GTiffドライバーを取得
        let driver = DriverManager::get_driver_by_name("GTiff")?;

        // データセットを作成
        let mut dataset = driver.create_with_band_type::<T, _>(output_path, cols, rows, 1)?;

        // ジオトランスフォームを設定
        dataset.set_geo_transform(&raster.geo_transform)?;

        // 座標系を設定（無い場合はそのまま）
        if !raster.projection.is_empty() {
            dataset.set_projection(&raster.projection)?;
        }

        let mut band = dataset.rasterband(1)?;

        // NoData値を設定
        band.set_no_data_value(Some(raster.nodata))?;

        // データを書き込み（GDALは行優先順を期待）
        let data: Vec<T> = raster.values.iter().map(|v| cast(*v)).collect();
        let mut buffer = Buffer::new((cols, rows), data);
        band.write((0, 0), (cols, rows), &mut buffer)?;

        Ok(())
    }
}

/// ラスタファイルの1バンド目を読み込む
pub fn read_raster(path: &Path, fallback_nodata: f64) -> Result<ElevationRaster> {
    let dataset = Dataset::open(path)
        .map_err(|e| Error::input(format!("cannot open raster {:?}: {}", path, e)))?;
    from_dataset(&dataset, fallback_nodata)
}

/// 開いているデータセットから標高ラスタを構築する
pub fn from_dataset(dataset: &Dataset, fallback_nodata: f64) -> Result<ElevationRaster> {
    if dataset.raster_count() == 0 {
        return Err(Error::input("dataset has no raster band"));
    }

    let (cols, rows) = dataset.raster_size();
    let geo_transform = dataset.geo_transform().unwrap_or(IDENTITY_TRANSFORM);
    let projection = dataset.projection();

    let band = dataset.rasterband(1)?;
    let (sample_type, nodata) = band_encoding(&band, fallback_nodata);

    // 全体を一括で読み込む
    let buffer = band.read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;
    let (_, values) = buffer.into_shape_and_vec();

    Ok(ElevationRaster {
        cols,
        rows,
        geo_transform,
        projection,
        nodata,
        sample_type,
        values,
    })
}

/// バンドの保存型とNoData値
///
/// Float64 以外は Float32 として扱う。セル値は保存型の精度で読まれるため、
/// NoData値も同じ精度に丸めて比較できるようにする。
pub(crate) fn band_encoding(band: &RasterBand, fallback_nodata: f64) -> (SampleType, f64) {
    let sample_type = match band.band_type() {
        GdalDataType::Float64 => SampleType::Float64,
        _ => SampleType::Float32,
    };
    let nodata = sample_type.quantize(band.no_data_value().unwrap_or(fallback_nodata));
    (sample_type, nodata)
}

#[cfg(test)]
pub(crate) fn gtiff_available() -> bool {
    DriverManager::get_driver_by_name("GTiff").is_ok()
}
