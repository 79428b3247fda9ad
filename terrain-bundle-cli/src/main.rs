use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use terrain_bundle::{Pipeline, PipelineConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力DEM（GDALで読めるラスタ）
    #[arg(value_name = "DEM")]
    dem: PathBuf,

    /// 境界ポリゴン（GeoJSON、Shapefile など）
    #[arg(value_name = "BOUNDARY")]
    boundary: PathBuf,

    /// 出力ZIPファイル
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// 成果物を展開するディレクトリ
    #[arg(long, value_name = "DIR")]
    extract: Option<PathBuf>,

    /// 等高線間隔（フィート）
    #[arg(short, long, default_value_t = 1.0)]
    interval: f64,

    /// 等高線の基準値
    #[arg(long, default_value_t = 0.0)]
    base: f64,

    /// 作業ディレクトリの親（デフォルト: システムの一時ディレクトリ）
    #[arg(long, value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,

    /// クリップ後の処理を逐次実行
    #[arg(long)]
    sequential: bool,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.output.is_none() && args.extract.is_none() {
        anyhow::bail!("Specify --output and/or --extract");
    }

    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    let config = PipelineConfig {
        contour_interval: args.interval,
        contour_base: args.base,
        workspace_root: args.workdir.clone(),
        parallel_branches: !args.sequential,
        ..PipelineConfig::default()
    };

    let pipeline = Pipeline::new(config);
    let bundle = match pipeline.run(&args.dem, &args.boundary) {
        Ok(bundle) => bundle,
        Err(err) => {
            error!("Processing failed: {}", err);
            return Err(err.into());
        }
    };

    for artifact in bundle.artifacts() {
        info!("{}: {} bytes", artifact.name(), artifact.bytes.len());
    }

    if let Some(output) = &args.output {
        bundle
            .write_zip(output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
    }
    if let Some(dir) = &args.extract {
        bundle
            .write_dir(dir)
            .with_context(|| format!("Failed to write files to {}", dir.display()))?;
    }

    info!("Total processing time: {:?}", start_time.elapsed());

    Ok(())
}
