use thiserror::Error;

use crate::pipeline::Stage;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// ステージ単位のエラー分類
#[derive(Debug, Error)]
pub enum Error {
    /// 入力ラスタ・境界が読めない、境界がラスタ範囲外、設定値が不正
    #[error("Input error: {0}")]
    Input(String),

    /// GDAL側の処理失敗
    #[error("Geospatial tool error: {0}")]
    ExternalTool(#[from] gdal::errors::GdalError),

    /// ワークスペースの作成・書き込み・削除の失敗
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl Error {
    pub fn input(message: impl Into<String>) -> Self {
        Error::Input(message.into())
    }
}

/// オーケストレータが呼び出し元に返すエラー
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Error,
    },

    #[error("Run aborted before {stage} stage")]
    Aborted { stage: Stage },

    #[error("Workspace error: {0}")]
    Workspace(#[source] Error),
}

impl PipelineError {
    /// 失敗したステージ（ワークスペース自体の失敗では `None`）
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } | PipelineError::Aborted { stage } => Some(*stage),
            PipelineError::Workspace(_) => None,
        }
    }
}
