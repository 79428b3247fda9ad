pub mod bundle;
pub mod clip;
pub mod config;
pub mod contour;
pub mod convert;
pub mod error;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod points;
pub mod raster;
pub mod workspace;

pub use bundle::{Artifact, ArtifactBundle, ArtifactKind};
pub use config::PipelineConfig;
pub use error::{Error, PipelineError, Result};
pub use model::{ElevationRaster, SampleType};
pub use pipeline::{AbortHandle, Pipeline, RunState, Stage, StageHook};
pub use raster::GeoTiffWriter;
pub use workspace::Workspace;
