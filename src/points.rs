use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::model::{ElevationRaster, SampleType};

pub const HEADER: &str = "X,Y,Z";

/// 有効セルを `X,Y,Z` の行として書き出し、書いた点の数を返す
///
/// 行優先（Y外側, X内側）で走査し、NoDataセルは飛ばす。
/// 座標はピクセルの左上隅（ジオトランスフォームをそのまま適用）。
pub fn write_points<W: Write>(raster: &ElevationRaster, writer: &mut W) -> Result<usize> {
    writeln!(writer, "{}", HEADER)?;

    let mut count = 0;
    for (y, row) in raster.row_slices().enumerate() {
        for (x, &value) in row.iter().enumerate() {
            if raster.is_nodata(value) {
                continue;
            }
            let (px, py) = raster.pixel_to_world(x as f64, y as f64);
            match raster.sample_type {
                // Float32 のラスタは f32 の最短表現で出力
                SampleType::Float32 => writeln!(writer, "{},{},{}", px, py, value as f32)?,
                SampleType::Float64 => writeln!(writer, "{},{},{}", px, py, value)?,
            }
            count += 1;
        }
    }

    Ok(count)
}

pub fn write_points_csv(raster: &ElevationRaster, output_path: &Path) -> Result<usize> {
    let mut writer = BufWriter::new(File::create(output_path)?);
    let count = write_points(raster, &mut writer)?;
    writer.flush()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ramp_raster, DEFAULT_NODATA};

    fn render(raster: &ElevationRaster) -> (usize, String) {
        let mut out = Vec::new();
        let count = write_points(raster, &mut out).unwrap();
        (count, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_one_record_per_valid_cell() {
        let mut raster = ramp_raster(4, 4);
        raster.values[3] = DEFAULT_NODATA;
        raster.values[10] = DEFAULT_NODATA;

        let (count, text) = render(&raster);
        assert_eq!(count, raster.valid_count());
        assert_eq!(count, 14);
        assert_eq!(text.lines().count(), 15);
        assert_eq!(text.lines().next(), Some(HEADER));
    }

    #[test]
    fn test_row_major_world_coordinates() {
        let mut raster = ramp_raster(2, 2);
        raster.geo_transform = [100.0, 10.0, 0.0, 50.0, 0.0, -10.0];

        let (_, text) = render(&raster);
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(rows, vec!["100,50,0", "110,50,1", "100,40,2", "110,40,3"]);
    }

    #[test]
    fn test_non_finite_cells_are_skipped() {
        let mut raster = ramp_raster(3, 3);
        raster.values[2] = f64::NAN;
        raster.values[5] = f64::INFINITY;

        let (count, text) = render(&raster);
        assert_eq!(count, 7);
        assert!(!text.contains("NaN"));
        assert!(!text.contains("inf"));
        assert!(!text.lines().any(|l| l.starts_with("2,0,")));
    }

    #[test]
    fn test_rotation_terms_are_applied() {
        let mut raster = ramp_raster(2, 2);
        raster.geo_transform = [0.0, 1.0, 0.5, 0.0, 0.25, -1.0];

        let (_, text) = render(&raster);
        let last = text.lines().last().unwrap();
        // x=1, y=1: px = 0 + 1 + 0.5, py = 0 + 0.25 - 1
        assert_eq!(last, "1.5,-0.75,3");
    }

    #[test]
    fn test_all_nodata_is_header_only() {
        let mut raster = ramp_raster(3, 2);
        raster.values = vec![DEFAULT_NODATA; 6];

        let (count, text) = render(&raster);
        assert_eq!(count, 0);
        assert_eq!(text, "X,Y,Z\n");
    }

    #[test]
    fn test_float32_values_print_short() {
        let mut raster = ramp_raster(1, 1);
        raster.sample_type = SampleType::Float32;
        raster.values = vec![0.1f32 as f64];

        let (_, text) = render(&raster);
        assert_eq!(text.lines().nth(1), Some("0,0,0.1"));
    }

    #[test]
    fn test_write_points_csv() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("points.csv");

        let count = write_points_csv(&ramp_raster(3, 3), &path).unwrap();
        assert_eq!(count, 9);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 10);
    }
}
