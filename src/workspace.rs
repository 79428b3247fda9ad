//! 1回の処理で使う作業ディレクトリ
//!
//! 実行ごとに一意なディレクトリを作り、終了時（成功・失敗とも）に中身ごと削除する。

use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::error::{Error, Result};

const RUN_PREFIX: &str = "terrain-run-";

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    run_id: String,
}

impl Workspace {
    /// `root` 配下（未指定ならシステムの一時ディレクトリ）に作業ディレクトリを作る
    pub fn acquire(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(RUN_PREFIX);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let run_id = dir
            .path()
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(RUN_PREFIX))
            .unwrap_or_default()
            .to_string();

        debug!("Acquired workspace {} at {:?}", run_id, dir.path());
        Ok(Self { dir, run_id })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 作業ディレクトリ直下のファイルパスを返す
    ///
    /// ディレクトリ外を指す名前（区切り文字・`..`・絶対パス）は拒否する。
    pub fn artifact_path(&self, file_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.path().join(file_name)),
            _ => Err(Error::input(format!(
                "artifact name {:?} escapes the workspace",
                file_name
            ))),
        }
    }

    /// ディレクトリと中のファイルをすべて削除する
    ///
    /// 一部のファイルが書かれていなくても問題ない。
    pub fn release(self) -> Result<()> {
        let Workspace { dir, run_id } = self;
        let path = dir.path().to_path_buf();
        dir.close()?;
        debug!("Released workspace {} ({:?})", run_id, path);
        Ok(())
    }
}
