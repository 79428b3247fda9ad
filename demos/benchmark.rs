use anyhow::Result;
use std::path::Path;
use std::time::{Duration, Instant};
use terrain_bundle::{Pipeline, PipelineConfig};

fn timed_run(pipeline: &Pipeline, dem: &Path, boundary: &Path) -> Result<(Duration, usize)> {
    let start = Instant::now();
    let bundle = pipeline.run(dem, boundary)?;
    let size = bundle.artifacts().iter().map(|a| a.bytes.len()).sum();
    Ok((start.elapsed(), size))
}

fn main() -> Result<()> {
    // 環境変数でテスト用DEMと境界のパスを指定
    let dem = std::env::var("BENCH_DEM_PATH").unwrap_or_else(|_| "test_dir/dem.tif".to_string());
    let boundary = std::env::var("BENCH_BOUNDARY_PATH")
        .unwrap_or_else(|_| "test_dir/boundary.geojson".to_string());

    let dem_path = Path::new(&dem);
    let boundary_path = Path::new(&boundary);

    if !dem_path.exists() || !boundary_path.exists() {
        eprintln!("Test inputs not found: {} / {}", dem, boundary);
        eprintln!("Set BENCH_DEM_PATH and BENCH_BOUNDARY_PATH to specify test files");
        return Ok(());
    }

    println!("Benchmarking pipeline: {} clipped by {}", dem, boundary);

    for parallel in [true, false] {
        let pipeline = Pipeline::new(PipelineConfig {
            parallel_branches: parallel,
            ..PipelineConfig::default()
        });

        let mut total = Duration::ZERO;
        for run in 1..=3 {
            let (elapsed, size) = timed_run(&pipeline, dem_path, boundary_path)?;
            println!(
                "{} run {}: {:?} ({} bytes)",
                if parallel { "parallel" } else { "sequential" },
                run,
                elapsed,
                size
            );
            total += elapsed;
        }
        println!("Average processing time: {:?}", total / 3);
    }

    Ok(())
}
