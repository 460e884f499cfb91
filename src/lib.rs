//! # trackset - identity datasets from box annotations
//!
//! Turns per-frame box annotations produced by a manual labeling tool into
//! training data for tracking models:
//!
//! - a **ReID** dataset of per-identity image crops, partitioned into
//!   `bounding_box_train` / `query` / `bounding_box_test`,
//! - **MOT** ground truth (`gt/gt.txt` + `seqinfo.ini`) per video sequence,
//! - a **YOLO** detection dataset of frames and normalized box labels.
//!
//! ## Pipeline
//!
//! ```text
//! annotation tree -> discovery -> annotation -> overlap -> identity -> crops -> partition
//!                                           \-> mot
//!                                           \-> yolo
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use trackset_rs::{BuilderConfig, ReidBuilder};
//!
//! let config = BuilderConfig::default();
//! let mut builder = ReidBuilder::new(config)?;
//! let summary = builder.run("data/raw", "data/processed")?;
//! println!("{} crops in {} identities", summary.crops, summary.identities);
//! ```

pub mod annotation;
pub mod config;
pub mod crops;
pub mod discovery;
pub mod geometry;
pub mod identity;
pub mod mot;
pub mod overlap;
pub mod partition;
pub mod reid;
pub mod utils;
pub mod yolo;

// Re-exports for convenience
pub use annotation::{AnnotationRecord, LabeledBox, Shape};
pub use config::{BuilderConfig, LabelPolicy, MotLabelEncoding, PathRule, SplitLayout};
pub use crops::{CropExtractor, CropJob};
pub use discovery::{discover, Frame, SourceFolder};
pub use geometry::BBox;
pub use identity::IdentityResolver;
pub use mot::{GroundTruthFile, MotBuilder, SequenceInfo};
pub use overlap::{FrameVerdict, OverlapResolver, Rejection};
pub use partition::{PartitionPlan, Partitioner, Split};
pub use reid::{ReidBuilder, ReidSummary};
pub use yolo::YoloBuilder;

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur while building datasets
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Input not found: {0}")]
        MissingInput(String),

        #[error("Missing asset: {0}")]
        MissingAsset(String),

        #[error("Malformed annotation: {0}")]
        MalformedAnnotation(String),

        #[error("Degenerate geometry: {0}")]
        DegenerateGeometry(String),

        #[error("Identity overflow: {0}")]
        IdentityOverflow(String),

        #[error("MOT file error: {0}")]
        Mot(String),

        #[error("JSON error: {0}")]
        Json(#[from] serde_json::Error),

        #[error("Image error: {0}")]
        Image(#[from] image::ImageError),

        #[error("IO error: {0}")]
        IoError(#[from] std::io::Error),
    }

    /// Result type for dataset building operations
    pub type Result<T> = std::result::Result<T, Error>;
}
