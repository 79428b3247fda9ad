//! パイプラインの実行制御
//!
//! ```text
//! Init -> Clipped -> Converted -> Contoured -> Exported -+
//!            |                                           +-> Done
//!            +-----> Sampled ----------------------------+
//! ```
//!
//! クリップ後の2系統は互いに依存しないため並列に実行できる。
//! 成功・失敗にかかわらず作業ディレクトリは必ず削除する。

use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bundle::{ArtifactBundle, ArtifactKind};
use crate::clip;
use crate::config::PipelineConfig;
use crate::contour;
use crate::convert;
use crate::error::{PipelineError, Result};
use crate::export::VectorTranscoder;
use crate::model::ElevationRaster;
use crate::points;
use crate::raster::GeoTiffWriter;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Clip,
    Convert,
    Contour,
    Export,
    Sample,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Clip,
        Stage::Convert,
        Stage::Contour,
        Stage::Export,
        Stage::Sample,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Clip => "clip",
            Stage::Convert => "convert",
            Stage::Contour => "contour",
            Stage::Export => "export",
            Stage::Sample => "sample",
        }
    }

    /// このステージの入力を作るステージ
    pub fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::Clip => None,
            Stage::Convert | Stage::Sample => Some(Stage::Clip),
            Stage::Contour => Some(Stage::Convert),
            Stage::Export => Some(Stage::Contour),
        }
    }

    pub fn artifact(self) -> ArtifactKind {
        match self {
            Stage::Clip => ArtifactKind::ClippedRaster,
            Stage::Convert => ArtifactKind::ConvertedRaster,
            Stage::Contour => ArtifactKind::ContourLayer,
            Stage::Export => ArtifactKind::CadExport,
            Stage::Sample => ArtifactKind::PointCloud,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Clipped,
    Converted,
    Contoured,
    Exported,
    Sampled,
    Done,
    Failed(Stage),
}

/// 完了したステージを記録し、実行状態を導出する
#[derive(Debug, Default)]
pub struct StageTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    completed: BTreeSet<Stage>,
    failed: Option<Stage>,
    last: Option<Stage>,
}

impl StageTracker {
    /// 前提ステージが完了していれば実行できる
    pub fn is_ready(&self, stage: Stage) -> bool {
        let inner = self.lock();
        !inner.completed.contains(&stage)
            && stage
                .prerequisite()
                .map_or(true, |before| inner.completed.contains(&before))
    }

    pub fn record(&self, stage: Stage) -> RunState {
        let mut inner = self.lock();
        inner.completed.insert(stage);
        inner.last = Some(stage);
        Self::derive(&inner)
    }

    pub fn fail(&self, stage: Stage) -> RunState {
        let mut inner = self.lock();
        // 最初の失敗を残す
        inner.failed.get_or_insert(stage);
        Self::derive(&inner)
    }

    pub fn state(&self) -> RunState {
        Self::derive(&self.lock())
    }

    fn derive(inner: &TrackerState) -> RunState {
        if let Some(stage) = inner.failed {
            return RunState::Failed(stage);
        }
        if inner.completed.contains(&Stage::Export) && inner.completed.contains(&Stage::Sample) {
            return RunState::Done;
        }
        match inner.last {
            None => RunState::Init,
            Some(Stage::Clip) => RunState::Clipped,
            Some(Stage::Convert) => RunState::Converted,
            Some(Stage::Contour) => RunState::Contoured,
            Some(Stage::Export) => RunState::Exported,
            Some(Stage::Sample) => RunState::Sampled,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // ロック中にpanicしても状態は壊れないのでそのまま使う
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// ステージ境界で呼ばれるフック
pub trait StageHook: Send + Sync {
    /// `Break` を返すと実行を中断する（作業ディレクトリは削除される）
    fn before_stage(&self, _stage: Stage, _workspace: &Path) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn after_stage(&self, _stage: Stage, _artifact: &Path) {}
}

/// 別スレッドから実行を中断するためのハンドル
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

impl StageHook for AbortHandle {
    fn before_stage(&self, _stage: Stage, _workspace: &Path) -> ControlFlow<()> {
        if self.is_aborted() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    hooks: Vec<Arc<dyn StageHook>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn StageHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// DEMと境界から5つの成果物を生成する
    pub fn run(
        &self,
        dem_path: &Path,
        boundary_path: &Path,
    ) -> Result<ArtifactBundle, PipelineError> {
        self.config
            .validate()
            .map_err(|source| PipelineError::Stage {
                stage: Stage::Contour,
                source,
            })?;

        let workspace = Workspace::acquire(self.config.workspace_root.as_deref())
            .map_err(PipelineError::Workspace)?;
        let run_id = workspace.run_id().to_string();
        info!(
            "[{}] Processing DEM {:?} with boundary {:?}",
            run_id, dem_path, boundary_path
        );

        let started = Instant::now();
        let tracker = StageTracker::default();
        let outcome = self.run_stages(&workspace, &tracker, dem_path, boundary_path);

        // 結果にかかわらず作業ディレクトリを削除
        let released = workspace.release();

        match outcome {
            Ok(bundle) => {
                released.map_err(PipelineError::Workspace)?;
                info!(
                    "[{}] Run finished in {:?} ({:?})",
                    run_id,
                    started.elapsed(),
                    tracker.state()
                );
                Ok(bundle)
            }
            Err(err) => {
                if let Err(cleanup) = released {
                    warn!("[{}] Failed to remove workspace: {}", run_id, cleanup);
                }
                error!("[{}] Run failed ({:?}): {}", run_id, tracker.state(), err);
                Err(err)
            }
        }
    }

    fn run_stages(
        &self,
        workspace: &Workspace,
        tracker: &StageTracker,
        dem_path: &Path,
        boundary_path: &Path,
    ) -> Result<ArtifactBundle, PipelineError> {
        let clipped = self.run_stage(workspace, tracker, Stage::Clip, |path| {
            let clipped = clip::clip(dem_path, boundary_path, self.config.fallback_nodata)?;
            GeoTiffWriter::new().write(&clipped, path)?;
            Ok(clipped)
        })?;

        if self.config.parallel_branches {
            let (surface, points) = rayon::join(
                || self.surface_branch(workspace, tracker, &clipped),
                || self.point_branch(workspace, tracker, &clipped),
            );
            surface?;
            points?;
        } else {
            self.surface_branch(workspace, tracker, &clipped)?;
            self.point_branch(workspace, tracker, &clipped)?;
        }

        ArtifactBundle::collect(workspace).map_err(PipelineError::Workspace)
    }

    /// フィート換算 → 等高線 → DXF
    fn surface_branch(
        &self,
        workspace: &Workspace,
        tracker: &StageTracker,
        clipped: &ElevationRaster,
    ) -> Result<(), PipelineError> {
        let converted = self.run_stage(workspace, tracker, Stage::Convert, |path| {
            let converted = convert::meters_to_feet(clipped);
            GeoTiffWriter::new().write(&converted, path)?;
            Ok(converted)
        })?;

        let contour_path = self.run_stage(workspace, tracker, Stage::Contour, |path| {
            let lines = contour::trace_contours(
                &converted,
                self.config.contour_interval,
                self.config.contour_base,
            )?;
            contour::write_contour_layer(&lines, &converted.projection, path)?;
            debug!("Contour layer has {} features", lines.len());
            Ok(path.to_path_buf())
        })?;

        self.run_stage(workspace, tracker, Stage::Export, |path| {
            VectorTranscoder::default().transcode(&contour_path, path)?;
            Ok(())
        })
    }

    /// 点群（クリップ済みラスタの元の単位のまま）
    fn point_branch(
        &self,
        workspace: &Workspace,
        tracker: &StageTracker,
        clipped: &ElevationRaster,
    ) -> Result<(), PipelineError> {
        self.run_stage(workspace, tracker, Stage::Sample, |path| {
            let count = points::write_points_csv(clipped, path)?;
            debug!("Point cloud has {} records", count);
            Ok(())
        })
    }

    fn run_stage<T>(
        &self,
        workspace: &Workspace,
        tracker: &StageTracker,
        stage: Stage,
        body: impl FnOnce(&Path) -> Result<T>,
    ) -> Result<T, PipelineError> {
        for hook in &self.hooks {
            if hook.before_stage(stage, workspace.path()).is_break() {
                warn!("[{}] Aborted before {} stage", workspace.run_id(), stage);
                tracker.fail(stage);
                return Err(PipelineError::Aborted { stage });
            }
        }
        debug_assert!(tracker.is_ready(stage), "{} stage is not ready", stage);

        let path: PathBuf = workspace
            .artifact_path(&stage.artifact().workspace_file_name())
            .map_err(|source| PipelineError::Stage { stage, source })?;

        let started = Instant::now();
        info!("[{}] {} stage started", workspace.run_id(), stage);

        let output = body(&path).map_err(|source| {
            tracker.fail(stage);
            PipelineError::Stage { stage, source }
        })?;

        let state = tracker.record(stage);
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        info!(
            "[{}] {} stage finished in {:?}: {} ({} bytes) -> {:?}",
            workspace.run_id(),
            stage,
            started.elapsed(),
            stage.artifact(),
            size,
            state
        );

        for hook in &self.hooks {
            hook.after_stage(stage, &path);
        }
        Ok(output)
    }
}
