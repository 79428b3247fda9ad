use rayon::prelude::*;
use tracing::debug;

use crate::model::{ElevationRaster, METERS_TO_FEET};

/// 有効セルをメートルからフィートに換算する
///
/// NoDataセルは換算せずそのまま残す。結果は保存型の精度に丸める。
pub fn meters_to_feet(raster: &ElevationRaster) -> ElevationRaster {
    let sample_type = raster.sample_type;

    match raster.value_range() {
        Some((min, max)) => debug!("Original DEM stats - min: {}, max: {}", min, max),
        None => debug!("Original DEM has no valid cells"),
    }

    let values: Vec<f64> = raster
        .values
        .par_iter()
        .map(|&value| {
            if raster.is_nodata(value) {
                value
            } else {
                sample_type.quantize(value * METERS_TO_FEET)
            }
        })
        .collect();

    let converted = raster.with_values(values);
    if let Some((min, max)) = converted.value_range() {
        debug!("Converted DEM stats - min: {}, max: {}", min, max);
    }
    converted
}
