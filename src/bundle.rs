use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::workspace::Workspace;

/// Shapefile の付属ファイル
const SHAPEFILE_SIDECARS: [&str; 4] = ["shx", "dbf", "prj", "cpg"];

/// パイプラインが生成する成果物の種類（出力順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    ClippedRaster,
    ConvertedRaster,
    ContourLayer,
    CadExport,
    PointCloud,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::ClippedRaster,
        ArtifactKind::ConvertedRaster,
        ArtifactKind::ContourLayer,
        ArtifactKind::CadExport,
        ArtifactKind::PointCloud,
    ];

    /// ステージ間の受け渡しに使う論理名
    pub fn logical_name(self) -> &'static str {
        match self {
            ArtifactKind::ClippedRaster => "clipped-raster",
            ArtifactKind::ConvertedRaster => "converted-raster",
            ArtifactKind::ContourLayer => "contour-layer",
            ArtifactKind::CadExport => "cad-export",
            ArtifactKind::PointCloud => "point-cloud",
        }
    }

    /// 呼び出し側に返す名前
    pub fn bundle_name(self) -> &'static str {
        match self {
            ArtifactKind::ClippedRaster => "clipped_dem",
            ArtifactKind::ConvertedRaster => "clipped_dem_feet",
            ArtifactKind::ContourLayer => "contours-shape-file",
            ArtifactKind::CadExport => "contours",
            ArtifactKind::PointCloud => "pvsyst_shading_file",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::ClippedRaster | ArtifactKind::ConvertedRaster => "tif",
            ArtifactKind::ContourLayer => "shp",
            ArtifactKind::CadExport => "dxf",
            ArtifactKind::PointCloud => "csv",
        }
    }

    /// 作業ディレクトリ内のファイル名
    pub fn workspace_file_name(self) -> String {
        format!("{}.{}", self.logical_name(), self.extension())
    }

    pub fn bundle_file_name(self) -> String {
        format!("{}.{}", self.bundle_name(), self.extension())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.logical_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
    /// (拡張子, 内容)。Shapefile の .shx/.dbf/.prj など
    pub sidecars: Vec<(String, Vec<u8>)>,
}

impl Artifact {
    /// 作業ディレクトリから成果物を読み込む
    pub fn read_from(workspace: &Workspace, kind: ArtifactKind) -> Result<Self> {
        let bytes = fs::read(workspace.artifact_path(&kind.workspace_file_name())?)?;

        let mut sidecars = Vec::new();
        if kind == ArtifactKind::ContourLayer {
            for extension in SHAPEFILE_SIDECARS {
                let name = format!("{}.{}", kind.logical_name(), extension);
                let path = workspace.artifact_path(&name)?;
                if path.exists() {
                    sidecars.push((extension.to_string(), fs::read(path)?));
                }
            }
        }

        Ok(Self {
            kind,
            bytes,
            sidecars,
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.bundle_name()
    }

    /// 本体と付属ファイルの (ファイル名, 内容)
    pub fn files(&self) -> impl Iterator<Item = (String, &[u8])> {
        let main = std::iter::once((self.kind.bundle_file_name(), self.bytes.as_slice()));
        let sidecars = self.sidecars.iter().map(|(extension, bytes)| {
            (
                format!("{}.{}", self.kind.bundle_name(), extension),
                bytes.as_slice(),
            )
        });
        main.chain(sidecars)
    }
}

/// 1回の実行で得られる5つの成果物
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBundle {
    artifacts: Vec<Artifact>,
}

impl ArtifactBundle {
    pub fn collect(workspace: &Workspace) -> Result<Self> {
        let artifacts = ArtifactKind::ALL
            .iter()
            .map(|kind| Artifact::read_from(workspace, *kind))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { artifacts })
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    /// 成果物を1つのZIPにまとめる
    pub fn write_zip(&self, output_path: &Path) -> Result<()> {
        let file = BufWriter::new(File::create(output_path)?);
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for artifact in &self.artifacts {
            for (name, bytes) in artifact.files() {
                zip.start_file(name, options)?;
                zip.write_all(bytes)?;
            }
        }

        let mut file = zip.finish()?;
        file.flush()?;
        info!("Written bundle: {:?}", output_path);
        Ok(())
    }

    /// 成果物をディレクトリに展開する
    pub fn write_dir(&self, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)?;
        for artifact in &self.artifacts {
            for (name, bytes) in artifact.files() {
                fs::write(output_dir.join(&name), bytes)?;
            }
        }
        info!("Written bundle files to {:?}", output_dir);
        Ok(())
    }
}
