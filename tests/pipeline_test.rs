use gdal::DriverManager;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use terrain_bundle::raster::read_raster;
use terrain_bundle::{
    AbortHandle, ArtifactKind, ElevationRaster, Error, GeoTiffWriter, Pipeline, PipelineConfig,
    PipelineError, SampleType, Stage, StageHook,
};

const NODATA: f64 = -9999.0;

fn drivers_available() -> bool {
    ["GTiff", "GeoJSON", "ESRI Shapefile", "DXF"]
        .iter()
        .all(|name| DriverManager::get_driver_by_name(name).is_ok())
}

/// 4x4、値 0..15、原点 (0, 0)、1m 解像度
fn sample_dem() -> ElevationRaster {
    ElevationRaster {
        cols: 4,
        rows: 4,
        geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
        projection: String::new(),
        nodata: NODATA,
        sample_type: SampleType::Float64,
        values: (0..16).map(|v| v as f64).collect(),
    }
}

fn boundary_geojson(ring: &[(f64, f64)]) -> String {
    let coords: Vec<String> = ring.iter().map(|(x, y)| format!("[{}, {}]", x, y)).collect();
    format!(
        r#"{{"type": "FeatureCollection", "features": [{{"type": "Feature", "properties": {{}}, "geometry": {{"type": "Polygon", "coordinates": [[{}]]}}}}]}}"#,
        coords.join(", ")
    )
}

struct Inputs {
    _dir: TempDir,
    dem: PathBuf,
    boundary: PathBuf,
}

fn write_inputs(ring: &[(f64, f64)]) -> Inputs {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem.tif");
    let boundary = dir.path().join("boundary.geojson");
    GeoTiffWriter::new().write(&sample_dem(), &dem).unwrap();
    fs::write(&boundary, boundary_geojson(ring)).unwrap();
    Inputs {
        _dir: dir,
        dem,
        boundary,
    }
}

const FULL_EXTENT: [(f64, f64); 5] = [
    (0.0, 0.0),
    (4.0, 0.0),
    (4.0, -4.0),
    (0.0, -4.0),
    (0.0, 0.0),
];

fn read_artifact_raster(bytes: &[u8]) -> ElevationRaster {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("artifact.tif");
    fs::write(&path, bytes).unwrap();
    read_raster(&path, NODATA).unwrap()
}

/// 作業ディレクトリの場所を記録し、指定ステージの前で中断する
#[derive(Default)]
struct RecordingHook {
    workspace: Mutex<Option<PathBuf>>,
    break_before: Option<Stage>,
}

impl StageHook for RecordingHook {
    fn before_stage(&self, stage: Stage, workspace: &Path) -> ControlFlow<()> {
        *self.workspace.lock().unwrap() = Some(workspace.to_path_buf());
        if self.break_before == Some(stage) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

fn config_in(root: &Path, parallel: bool) -> PipelineConfig {
    PipelineConfig {
        workspace_root: Some(root.to_path_buf()),
        parallel_branches: parallel,
        ..PipelineConfig::default()
    }
}

#[test]
fn test_end_to_end_bundle() {
    if !drivers_available() {
        eprintln!("Skipping test: required GDAL drivers not available");
        return;
    }
    let inputs = write_inputs(&FULL_EXTENT);
    let root = TempDir::new().unwrap();

    let bundle = Pipeline::new(config_in(root.path(), true))
        .run(&inputs.dem, &inputs.boundary)
        .unwrap();

    let kinds: Vec<ArtifactKind> = bundle.artifacts().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, ArtifactKind::ALL.to_vec());
    assert!(bundle.artifacts().iter().all(|a| !a.bytes.is_empty()));

    // 境界がラスタ全体を覆うので値はそのまま
    let clipped = read_artifact_raster(&bundle.get(ArtifactKind::ClippedRaster).unwrap().bytes);
    let source = sample_dem();
    assert_eq!(clipped.shape(), (4, 4));
    assert_eq!(clipped.geo_transform, source.geo_transform);
    assert_eq!(clipped.values, source.values);

    let converted =
        read_artifact_raster(&bundle.get(ArtifactKind::ConvertedRaster).unwrap().bytes);
    for (feet, meters) in converted.values.iter().zip(&source.values) {
        assert!((feet - meters * 3.28084).abs() < 1e-9);
    }

    let csv = String::from_utf8(bundle.get(ArtifactKind::PointCloud).unwrap().bytes.clone())
        .unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 17);
    assert_eq!(lines[0], "X,Y,Z");
    assert_eq!(lines[1], "0,0,0");
    assert_eq!(lines[16], "3,-3,15");

    let contours = bundle.get(ArtifactKind::ContourLayer).unwrap();
    assert!(contours.sidecars.iter().any(|(ext, _)| ext == "dbf"));

    // 作業ディレクトリは残らない
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn test_sequential_and_parallel_runs_agree() {
    if !drivers_available() {
        eprintln!("Skipping test: required GDAL drivers not available");
        return;
    }
    let inputs = write_inputs(&FULL_EXTENT);
    let root = TempDir::new().unwrap();

    let parallel = Pipeline::new(config_in(root.path(), true))
        .run(&inputs.dem, &inputs.boundary)
        .unwrap();
    let sequential = Pipeline::new(config_in(root.path(), false))
        .run(&inputs.dem, &inputs.boundary)
        .unwrap();

    for kind in [ArtifactKind::PointCloud, ArtifactKind::ClippedRaster] {
        assert_eq!(
            parallel.get(kind).unwrap().bytes,
            sequential.get(kind).unwrap().bytes
        );
    }
}

#[test]
fn test_workspace_removed_when_any_stage_fails() {
    if !drivers_available() {
        eprintln!("Skipping test: required GDAL drivers not available");
        return;
    }
    let inputs = write_inputs(&FULL_EXTENT);

    for stage in Stage::ALL {
        let root = TempDir::new().unwrap();
        let hook = Arc::new(RecordingHook {
            break_before: Some(stage),
            ..Default::default()
        });

        let err = Pipeline::new(config_in(root.path(), false))
            .with_hook(hook.clone())
            .run(&inputs.dem, &inputs.boundary)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Aborted { stage: s } if s == stage));

        let workspace = hook.workspace.lock().unwrap().clone().unwrap();
        assert!(!workspace.exists(), "{:?} left behind after {}", workspace, stage);
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}

/// 書き出し前に等高線レイヤを壊し、ステージ内部で失敗させる
struct CorruptContourLayer {
    workspace: Mutex<Option<PathBuf>>,
}

impl StageHook for CorruptContourLayer {
    fn before_stage(&self, stage: Stage, workspace: &Path) -> ControlFlow<()> {
        *self.workspace.lock().unwrap() = Some(workspace.to_path_buf());
        if stage == Stage::Export {
            for ext in ["shx", "dbf", "prj", "cpg"] {
                let _ = fs::remove_file(workspace.join(format!("contour-layer.{}", ext)));
            }
            fs::write(workspace.join("contour-layer.shp"), b"not a shapefile").unwrap();
        }
        ControlFlow::Continue(())
    }
}

#[test]
fn test_workspace_removed_when_stage_body_fails() {
    if !drivers_available() {
        eprintln!("Skipping test: required GDAL drivers not available");
        return;
    }
    let inputs = write_inputs(&FULL_EXTENT);
    let root = TempDir::new().unwrap();
    let hook = Arc::new(CorruptContourLayer {
        workspace: Mutex::new(None),
    });

    let err = Pipeline::new(config_in(root.path(), false))
        .with_hook(hook.clone())
        .run(&inputs.dem, &inputs.boundary)
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Export));
    assert!(matches!(err, PipelineError::Stage { .. }));

    let workspace = hook.workspace.lock().unwrap().clone().unwrap();
    assert!(!workspace.exists());
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn test_workspace_removed_after_success() {
    if !drivers_available() {
        eprintln!("Skipping test: required GDAL drivers not available");
        return;
    }
    let inputs = write_inputs(&FULL_EXTENT);
    let hook = Arc::new(RecordingHook::default());

    Pipeline::new(PipelineConfig::default())
        .with_hook(hook.clone())
        .run(&inputs.dem, &inputs.boundary)
        .unwrap();

    let workspace = hook.workspace.lock().unwrap().clone().unwrap();
    assert!(!workspace.exists());
}

#[test]
fn test_boundary_outside_raster_fails_at_clip() {
    if !drivers_available() {
        eprintln!("Skipping test: required GDAL drivers not available");
        return;
    }
    let inputs = write_inputs(&[
        (100.0, 100.0),
        (101.0, 100.0),
        (101.0, 99.0),
        (100.0, 99.0),
        (100.0, 100.0),
    ]);
    let root = TempDir::new().unwrap();

    let err = Pipeline::new(config_in(root.path(), true))
        .run(&inputs.dem, &inputs.boundary)
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Clip));
    assert!(matches!(
        err,
        PipelineError::Stage {
            source: Error::Input(_),
            ..
        }
    ));
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn test_missing_dem_is_input_error() {
    let dir = TempDir::new().unwrap();
    let err = Pipeline::new(PipelineConfig::default())
        .run(
            &dir.path().join("missing.tif"),
            &dir.path().join("missing.geojson"),
        )
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Clip));
    assert!(matches!(
        err,
        PipelineError::Stage {
            source: Error::Input(_),
            ..
        }
    ));
}

#[test]
fn test_abort_handle_stops_run() {
    if !drivers_available() {
        eprintln!("Skipping test: required GDAL drivers not available");
        return;
    }
    let inputs = write_inputs(&FULL_EXTENT);
    let root = TempDir::new().unwrap();
    let abort = AbortHandle::new();
    abort.abort();

    let err = Pipeline::new(config_in(root.path(), true))
        .with_hook(Arc::new(abort))
        .run(&inputs.dem, &inputs.boundary)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Aborted { stage: Stage::Clip }));
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}
