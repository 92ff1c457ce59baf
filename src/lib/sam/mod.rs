//! SAM/BAM record utilities and test-record builders.

pub mod builder;
pub mod record_utils;

pub use builder::{FragBuilder, PairBuilder, RecordBuilder, SamBuilder, Strand};
pub use record_utils::{
    leading_clipping, reference_length, trailing_clipping, unclipped_end,
    unclipped_five_prime_coordinate, unclipped_start,
};
