//! Aggregate contract for the event-sourced collection entities.

use crate::error::{DomainError, DomainResult};

/// Identity + version of an aggregate root.
///
/// Tasks, routes, collectors and invoices are all aggregate roots: each one is
/// persisted as its own stream and mutated one command at a time.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far (the stream revision).
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the stream to be at an exact revision.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale aggregate version (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Decide / evolve split for aggregates.
///
/// - `handle(&self, cmd)` validates the command against current state and returns
///   the events describing what happened. It never mutates.
/// - `apply(&mut self, event)` evolves state and bumps the version by one.
///
/// A command that is rejected must leave the aggregate untouched, which is what
/// makes "invalid amount" or "task already finalized" failures side-effect free.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
