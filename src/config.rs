use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::model::DEFAULT_NODATA;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 等高線間隔（フィート）
    pub contour_interval: f64,
    /// 等高線の基準値
    pub contour_base: f64,
    /// 作業ディレクトリの親（`None` ならシステムの一時ディレクトリ）
    pub workspace_root: Option<PathBuf>,
    /// クリップ後の2系統を並列に実行するか
    pub parallel_branches: bool,
    /// ソースラスタにNoData値が無い場合に使う値
    pub fallback_nodata: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            contour_interval: 1.0,
            contour_base: 0.0,
            workspace_root: None,
            parallel_branches: true,
            fallback_nodata: DEFAULT_NODATA,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.contour_interval.is_finite() && self.contour_interval > 0.0) {
            return Err(Error::input(format!(
                "contour interval must be a positive number, got {}",
                self.contour_interval
            )));
        }
        if !self.contour_base.is_finite() {
            return Err(Error::input("contour base must be finite"));
        }
        Ok(())
    }
}
