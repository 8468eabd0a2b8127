//! `speclink-linkage`: specimen record linkage and voxel spacing verification.
//!
//! Pure engine crate: links local specimen rows to repository records, then
//! checks voxel spacing for matched rows through a [`MediaClient`]. No
//! network code lives here.

pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod matcher;
pub mod media;
pub mod model;
pub mod normalize;
pub mod results;
pub mod spacing;
pub mod table;
pub mod verify;

pub use config::LinkageConfig;
pub use engine::{run, run_matching, run_verification, CancelToken};
pub use error::LinkageError;
pub use media::{MediaClient, MediaFailure};
pub use model::{
    LocalRecord, MatchResult, MatchRun, RepositoryRecord, VerificationResult, VerificationRun,
    VerificationStatus,
};
pub use spacing::{Millimeters, VoxelSpacing};
