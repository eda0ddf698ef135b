//! Error taxonomy for the planning pipeline.
//!
//! Locally recoverable infeasibility (a placement or route that cannot be
//! made) is signalled by absent results at the call site and never
//! surfaces here. These errors are for conditions the caller must act on.

/// Errors surfaced by the planning pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The local-search improver produced a layout scoring measurably
    /// below its input. The remove-then-refill protocol guarantees
    /// monotonic non-decrease, so a regression is a modeling or
    /// implementation bug, not a legitimate outcome.
    #[error(
        "score regressed from {before:.6} to {after:.6} (state {before_serial} -> {after_serial}); \
         remove-then-refill must never lose score"
    )]
    ScoreRegression {
        before: f64,
        after: f64,
        before_serial: u64,
        after_serial: u64,
    },

    /// The initial greedy pass could not place a single required building.
    #[error("no solution: the greedy pass placed no buildings")]
    NoSolution,
}
