//! Initial values for parameter blocks on a fresh start.

use std::{
    error::Error,
    fmt::{self, Display},
};

use comms::specs::{BlockSpec, InitSpec};
use rand::{
    Rng,
    distr::{Distribution, Uniform, uniform::Error as UniformError},
};

/// Error returned when an `InitSpec` can't produce values, for example an empty
/// uniform range.
#[derive(Debug)]
pub struct InitErr {
    pub id: String,
    pub reason: String,
}

impl Display for InitErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can't initialize block {:?}: {}", self.id, self.reason)
    }
}

impl Error for InitErr {}

/// Generates the initial values of a block.
///
/// # Arguments
/// * `spec` - The block description.
/// * `rng` - The random generator shared by every block, so a seed reproduces the whole store.
///
/// # Returns
/// The values, exactly `spec.len` of them, or an `InitErr` if the distribution is invalid.
pub fn generate<R: Rng>(spec: &BlockSpec, rng: &mut R) -> Result<Vec<f32>, InitErr> {
    let len = spec.len.get();

    match spec.init {
        InitSpec::Const { value } => Ok(vec![value; len]),
        InitSpec::Uniform { low, high } => {
            let distribution = Uniform::new(low, high).map_err(|e: UniformError| InitErr {
                id: spec.id.clone(),
                reason: e.to_string(),
            })?;

            Ok(distribution.sample_iter(rng).take(len).collect())
        }
    }
}
