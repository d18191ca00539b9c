use chrono::{DateTime, Utc};

/// A fact emitted by an aggregate.
///
/// Events are immutable, versioned and append-only. Task outcomes
/// (`collections.task.collected`, `.skipped`, `.failed`) are the events the
/// collector statistics are derived from.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name, e.g. `collections.route.gps_point_recorded`.
    fn event_type(&self) -> &'static str;

    /// Schema version of this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
