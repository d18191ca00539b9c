//! Visiting-order planning for a collector's day.
//!
//! The optimizer is pure: it sees stops through the [`Stop`] trait and returns
//! a [`RoutePlan`]. Persisting the route and attaching tasks is the caller's job.

pub mod optimizer;
pub mod stop;

pub use optimizer::{NearestNeighborOptimizer, OptimizerSettings, RoutePlan, NEAREST_NEIGHBOR};
pub use stop::Stop;
