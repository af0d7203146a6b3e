//! Anchor-free, single-class ("person") detector core: a truncated
//! ResNet-18 backbone tapped at strides 8/16/32, a three-level top-down
//! feature pyramid, and per-location box/confidence prediction heads with a
//! prior-biased confidence initialization.
//!
//! The crate covers the network itself plus its parameter-level contracts
//! (pretrained backbone import, checkpointing, backbone freezing). Losses,
//! box decoding, non-max suppression, data loading, and the training loop
//! are external collaborators that consume the `[B, N, 5]` prediction
//! tensor and the var-store surface exposed here.

mod common;
pub mod config;
pub mod model;
pub mod module;
pub mod weights;

pub use config::DetectorConfig;
pub use model::{num_locations, PersonDetector, PersonDetectorInit};
