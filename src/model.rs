/// ソースにNoData値が無い場合に使う値
pub const DEFAULT_NODATA: f64 = -9999.0;

/// メートル→フィート換算係数 (1 / 0.3048)
pub const METERS_TO_FEET: f64 = 3.28084;

/// GDAL形式のアフィン変換係数
pub type GeoTransform = [f64; 6];

pub fn pixel_to_world(gt: &GeoTransform, col: f64, row: f64) -> (f64, f64) {
    (
        gt[0] + col * gt[1] + row * gt[2],
        gt[3] + col * gt[4] + row * gt[5],
    )
}

/// ワールド座標をピクセル座標に変換（逆アフィン）。変換が退化していれば `None`
pub fn world_to_pixel(gt: &GeoTransform, x: f64, y: f64) -> Option<(f64, f64)> {
    let det = gt[1] * gt[5] - gt[2] * gt[4];
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let dx = x - gt[0];
    let dy = y - gt[3];
    Some(((gt[5] * dx - gt[2] * dy) / det, (gt[1] * dy - gt[4] * dx) / det))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Float32,
    Float64,
}

impl SampleType {
    /// 保存型の精度に丸める
    pub fn quantize(self, value: f64) -> f64 {
        match self {
            SampleType::Float32 => value as f32 as f64,
            SampleType::Float64 => value,
        }
    }
}

/// 単一バンドの標高ラスタ（行優先）
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationRaster {
    pub cols: usize,
    pub rows: usize,
    pub geo_transform: GeoTransform,
    /// WKT。座標系が無い場合は空文字列
    pub projection: String,
    pub nodata: f64,
    pub sample_type: SampleType,
    pub values: Vec<f64>,
}

impl ElevationRaster {
    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// NoData値、または有限でない値（NaN・無限大）なら真
    pub fn is_nodata(&self, value: f64) -> bool {
        !value.is_finite() || value == self.nodata
    }

    pub fn value(&self, col: usize, row: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    /// 行スライスのイテレータ
    pub fn row_slices(&self) -> impl Iterator<Item = &[f64]> {
        // cols == 0 の場合 chunks が panic するため空にする
        self.values.chunks(self.cols.max(1)).take(self.rows)
    }

    /// ピクセル座標（列, 行）をワールド座標に変換
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        pixel_to_world(&self.geo_transform, col, row)
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| !self.is_nodata(**v)).count()
    }

    /// 有効セルの (min, max)。有効セルが無ければ `None`
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| !self.is_nodata(*v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// 形状・座標系・NoDataを引き継いだ新しいラスタを作る
    pub fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.values.len());
        Self {
            cols: self.cols,
            rows: self.rows,
            geo_transform: self.geo_transform,
            projection: self.projection.clone(),
            nodata: self.nodata,
            sample_type: self.sample_type,
            values,
        }
    }
}

#[cfg(test)]
pub(crate) fn ramp_raster(cols: usize, rows: usize) -> ElevationRaster {
    ElevationRaster {
        cols,
        rows,
        geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
        projection: String::new(),
        nodata: DEFAULT_NODATA,
        sample_type: SampleType::Float64,
        values: (0..cols * rows).map(|v| v as f64).collect(),
    }
}
