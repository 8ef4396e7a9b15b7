//! Policy.
use super::Env;
use anyhow::Result;

/// Maps observations of an environment to actions.
///
/// Evaluators drive rollouts through this trait only; agents expose
/// a policy view of themselves, for example an ε-greedy one, to be evaluated.
pub trait Policy<E: Env> {
    /// Returns the action for `obs`.
    fn sample(&mut self, obs: &E::Obs) -> Result<E::Act>;
}
