//! 等高線の生成
//!
//! セル中心を格子点とする marching squares で等値線を追跡し、
//! `ID`（連番）と `elev`（標高値、Z座標にも格納）を持つラインとして出力する。
//! NoDataを含む 2x2 セルは追跡しない。

use gdal::spatial_ref::SpatialRef;
use gdal::vector::{
    FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType,
};
use gdal::DriverManager;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::ElevationRaster;

pub const ID_FIELD: &str = "ID";
pub const ELEV_FIELD: &str = "elev";

#[derive(Debug, Clone, PartialEq)]
pub struct ContourLine {
    pub id: i32,
    pub elev: f64,
    /// ワールド座標。閉じた線は始点と終点が一致する
    pub points: Vec<(f64, f64)>,
}

impl ContourLine {
    pub fn is_closed(&self) -> bool {
        self.points.len() > 2 && self.points.first() == self.points.last()
    }
}

/// セル辺の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Edge {
    /// (row, col) と (row, col + 1) の間
    Horizontal { row: usize, col: usize },
    /// (row, col) と (row + 1, col) の間
    Vertical { row: usize, col: usize },
}

type Segment = (Edge, Edge);

/// `base + k * interval` の各標高で等高線を追跡する
pub fn trace_contours(
    raster: &ElevationRaster,
    interval: f64,
    base: f64,
) -> Result<Vec<ContourLine>> {
    if !(interval.is_finite() && interval > 0.0) {
        return Err(Error::input(format!(
            "contour interval must be a positive number, got {}",
            interval
        )));
    }

    let (rows, cols) = raster.shape();
    if rows < 2 || cols < 2 {
        return Ok(Vec::new());
    }

    // 標高インデックスごとのセグメント
    let mut segments: BTreeMap<i64, Vec<Segment>> = BTreeMap::new();

    for row in 0..rows - 1 {
        for col in 0..cols - 1 {
            // 左上, 右上, 右下, 左下
            let corners = [
                raster.value(col, row),
                raster.value(col + 1, row),
                raster.value(col + 1, row + 1),
                raster.value(col, row + 1),
            ];
            if corners.iter().any(|v| raster.is_nodata(*v)) {
                continue;
            }

            let lo = corners.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = corners.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let first = ((lo - base) / interval).ceil() as i64;
            let last = ((hi - base) / interval).floor() as i64;

            for k in first..=last {
                let level = base + k as f64 * interval;
                quad_segments(row, col, &corners, level, segments.entry(k).or_default());
            }
        }
    }

    let mut lines = Vec::new();
    for (k, level_segments) in &segments {
        let level = base + *k as f64 * interval;
        for chain in link_segments(level_segments) {
            let mut points: Vec<(f64, f64)> = chain
                .iter()
                .map(|edge| {
                    let (col, row) = edge_point(raster, *edge, level);
                    raster.pixel_to_world(col, row)
                })
                .collect();
            // 格子点上を通る場合の重複点を除く
            points.dedup();
            if points.len() < 2 {
                continue;
            }

            let id = i32::try_from(lines.len())
                .map_err(|_| Error::input("too many contour lines for an integer ID field"))?;
            lines.push(ContourLine {
                id,
                elev: level,
                points,
            });
        }
    }

    debug!(
        "Traced {} contour lines over {} levels",
        lines.len(),
        segments.len()
    );
    Ok(lines)
}

/// 1つの 2x2 セルで標高 `level` が通過するセグメントを追加する
fn quad_segments(
    row: usize,
    col: usize,
    corners: &[f64; 4],
    level: f64,
    out: &mut Vec<Segment>,
) {
    let top = Edge::Horizontal { row, col };
    let right = Edge::Vertical { row, col: col + 1 };
    let bottom = Edge::Horizontal { row: row + 1, col };
    let left = Edge::Vertical { row, col };

    let above = corners.map(|v| v >= level);
    let case = above
        .iter()
        .fold(0u8, |acc, &is_above| (acc << 1) | is_above as u8);

    match case {
        0 | 15 => {}
        // 鞍点: セル中心の平均値で分け方を決める
        5 | 10 => {
            let center_above = corners.iter().sum::<f64>() / 4.0 >= level;
            let corner_edges = [(left, top), (top, right), (right, bottom), (bottom, left)];
            for (i, edges) in corner_edges.into_iter().enumerate() {
                if above[i] != center_above {
                    out.push(edges);
                }
            }
        }
        _ => {
            let crossings: Vec<Edge> = [
                (top, above[0] != above[1]),
                (right, above[1] != above[2]),
                (bottom, above[3] != above[2]),
                (left, above[0] != above[3]),
            ]
            .into_iter()
            .filter_map(|(edge, crosses)| crosses.then_some(edge))
            .collect();
            if let [a, b] = crossings[..] {
                out.push((a, b));
            }
        }
    }
}

/// 辺上の交点（ピクセル座標、セル中心 = +0.5）
fn edge_point(raster: &ElevationRaster, edge: Edge, level: f64) -> (f64, f64) {
    match edge {
        Edge::Horizontal { row, col } => {
            let a = raster.value(col, row);
            let b = raster.value(col + 1, row);
            let t = (level - a) / (b - a);
            (col as f64 + 0.5 + t, row as f64 + 0.5)
        }
        Edge::Vertical { row, col } => {
            let a = raster.value(col, row);
            let b = raster.value(col, row + 1);
            let t = (level - a) / (b - a);
            (col as f64 + 0.5, row as f64 + 0.5 + t)
        }
    }
}

/// 辺を共有するセグメントをつないで折れ線にする
///
/// 端点を持つ線を先に追跡し、残りは閉じた線として扱う。
fn link_segments(segments: &[Segment]) -> Vec<Vec<Edge>> {
    let mut by_edge: HashMap<Edge, Vec<usize>> = HashMap::new();
    for (i, (a, b)) in segments.iter().enumerate() {
        by_edge.entry(*a).or_default().push(i);
        by_edge.entry(*b).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut chains = Vec::new();

    let walk = |start: Edge, first: usize, used: &mut Vec<bool>| -> Vec<Edge> {
        let mut chain = vec![start];
        let mut current = start;
        let mut segment = first;
        loop {
            used[segment] = true;
            let (a, b) = segments[segment];
            let next = if a == current { b } else { a };
            chain.push(next);

            let following = by_edge[&next].iter().copied().find(|i| !used[*i]);
            match following {
                Some(i) => {
                    segment = i;
                    current = next;
                }
                None => break,
            }
        }
        chain
    };

    // 開いた線
    for i in 0..segments.len() {
        if used[i] {
            continue;
        }
        let (a, b) = segments[i];
        let start = if by_edge[&a].len() == 1 {
            Some(a)
        } else if by_edge[&b].len() == 1 {
            Some(b)
        } else {
            None
        };
        if let Some(start) = start {
            chains.push(walk(start, i, &mut used));
        }
    }

    // 閉じた線
    for i in 0..segments.len() {
        if !used[i] {
            let start = segments[i].0;
            chains.push(walk(start, i, &mut used));
        }
    }

    chains
}

/// 等高線を Shapefile (LineString25D) として書き出す
pub fn write_contour_layer(lines: &[ContourLine], projection: &str, path: &Path) -> Result<()> {
    let driver = DriverManager::get_driver_by_name("ESRI Shapefile")?;
    let mut dataset = driver.create_vector_only(path)?;

    let srs = if projection.is_empty() {
        None
    } else {
        Some(SpatialRef::from_wkt(projection)?)
    };

    let mut layer = dataset.create_layer(LayerOptions {
        name: "contour",
        srs: srs.as_ref(),
        ty: OGRwkbGeometryType::wkbLineString25D,
        ..Default::default()
    })?;
    layer.create_defn_fields(&[
        (ID_FIELD, OGRFieldType::OFTInteger),
        (ELEV_FIELD, OGRFieldType::OFTReal),
    ])?;

    for line in lines {
        let mut geometry = Geometry::empty(OGRwkbGeometryType::wkbLineString25D)?;
        for &(x, y) in &line.points {
            geometry.add_point((x, y, line.elev));
        }
        layer.create_feature_fields(
            geometry,
            &[ID_FIELD, ELEV_FIELD],
            &[
                FieldValue::IntegerValue(line.id),
                FieldValue::RealValue(line.elev),
            ],
        )?;
    }

    Ok(())
}
