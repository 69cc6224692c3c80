//! The local compute step, the part of training this crate doesn't own.

use std::{collections::BTreeMap, error::Error, fmt, time::Duration};

use comms::specs::ComputeSpec;

use crate::client::Params;

/// Deltas by block identifier.
pub type Deltas = BTreeMap<String, Vec<f32>>;

/// Error returned by a failed compute step, fatal to the worker.
#[derive(Debug)]
pub struct ComputeErr(pub String);

impl fmt::Display for ComputeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for ComputeErr {}

/// Turns pulled parameters into updates.
#[trait_variant::make(Compute: Send)]
pub trait ComputeTemplate {
    /// Should compute one delta per block it wants to update.
    ///
    /// # Arguments
    /// * `params` - The pulled blocks, the deltas must keep their lengths.
    ///
    /// # Returns
    /// The deltas, or a `ComputeErr` if the step can't be computed.
    async fn compute(&mut self, params: &Params) -> Result<Deltas, ComputeErr>;
}

/// Pulls every value towards `target` by a fraction `rate` of the distance per step.
///
/// Stands in for a gradient step on `(target - x)^2 / 2`.
#[derive(Debug, Clone, Copy)]
pub struct Quadratic {
    target: f32,
    rate: f32,
    delay: Duration,
}

impl Quadratic {
    /// Creates a new `Quadratic`.
    ///
    /// # Arguments
    /// * `target` - The minimum of the objective.
    /// * `rate` - The learning rate.
    /// * `delay` - Simulated compute time per step.
    pub fn new(target: f32, rate: f32, delay: Duration) -> Self {
        Self {
            target,
            rate,
            delay,
        }
    }
}

impl From<ComputeSpec> for Quadratic {
    fn from(spec: ComputeSpec) -> Self {
        Self::new(spec.target, spec.rate, Duration::from_millis(spec.delay_ms))
    }
}

impl Compute for Quadratic {
    async fn compute(&mut self, params: &Params) -> Result<Deltas, ComputeErr> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut deltas = Deltas::new();

        for (id, block) in params {
            let delta: Vec<f32> = block
                .values()
                .iter()
                .map(|v| self.rate * (self.target - v))
                .collect();

            if delta.iter().any(|d| !d.is_finite()) {
                return Err(ComputeErr(format!("non finite delta for block {id:?}")));
            }

            deltas.insert(id.clone(), delta);
        }

        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parameter_server::BlockValue;

    use super::{Compute, Params, Quadratic};

    #[tokio::test]
    async fn test_quadratic_moves_towards_target() {
        let mut compute = Quadratic::new(1.0, 0.5, Duration::ZERO);
        let params: Params = [("w".to_string(), BlockValue::new(vec![0.0, 3.0], 2))].into();

        let deltas = compute.compute(&params).await.unwrap();
        assert_eq!(deltas["w"], [0.5, -1.0]);
    }

    #[tokio::test]
    async fn test_non_finite_delta_fails() {
        let mut compute = Quadratic::new(1.0, f32::INFINITY, Duration::ZERO);
        let params: Params = [("w".to_string(), BlockValue::new(vec![0.0], 0))].into();

        assert!(compute.compute(&params).await.is_err());
    }
}
