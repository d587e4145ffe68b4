//! # Pursuit Retrieval
//!
//! Two independent retrieval channels scored on the same parent unit and
//! fused into one calibrated answer/abstain decision.
//!
//! - [`sparse`]: sentence-level BM25 mapped back to parents, squashed through
//!   a globally fitted sigmoid.
//! - [`dense`]: nearest-neighbour search over embedded parents, distance
//!   mapped onto the sparse confidence scale.
//! - [`fusion`]: parallel channel queries, max-confidence fusion, the
//!   threshold decision and graceful degradation when a channel is down.
//! - [`calibration`] and [`probe`]: curve fitting and the threshold sweep
//!   against a labeled probe set.

pub mod calibration;
pub mod dense;
pub mod fusion;
pub mod local;
pub mod probe;
pub mod sparse;
pub mod stack;
pub mod text;

pub use calibration::{DenseCalibration, ProbeResult, SigmoidCalibration, SweepRow};
pub use fusion::{FusionEngine, RetrievalChannel, decide, fuse};
pub use local::{HashingEmbedder, InMemoryCorpus, InMemoryVectorIndex, ProviderEmbedder};
pub use probe::{CalibrationReport, Probe};
pub use stack::LocalStack;
