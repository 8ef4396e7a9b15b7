//! Evaluate [`Policy`].
use crate::{record::Record, Env, Logger, Policy};
use anyhow::Result;
mod default_evaluator;
pub use default_evaluator::DefaultEvaluator;

/// Evaluate [`Policy`].
pub trait Evaluator<E: Env> {
    /// Runs evaluation rollouts of `policy`, pushing every step into `logger`.
    ///
    /// The caller of this method needs to handle the internal state of the
    /// agent behind `policy`, like training/evaluation mode.
    fn evaluate<P, L>(&mut self, policy: &mut P, logger: &mut L) -> Result<Record>
    where
        P: Policy<E>,
        L: Logger<E>;
}
