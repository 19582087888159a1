pub mod curve;
pub mod delay;
pub mod envelope;
pub mod utils;

pub use curve::{CompressionCurve, CompressionMode};
pub use delay::DelayLine;
pub use envelope::{EnvelopeState, LevelEstimator};
pub use utils::{
    coefficient_to_time_constant, db_to_linear, linear_to_db, ms_to_samples,
    time_constant_to_coefficient,
};
