//! Planner-facing view of a visit.

use fieldcollect_geo::GeoPoint;

/// Something the optimizer can sequence.
///
/// Implement it for your own task type; the optimizer never needs more than an
/// id and an optional coordinate.
pub trait Stop {
    type Id: Clone + Eq;

    fn id(&self) -> &Self::Id;

    /// `None` when the stop has no coordinates and therefore cannot be sequenced.
    fn location(&self) -> Option<GeoPoint>;

    fn has_location(&self) -> bool {
        self.location().is_some()
    }
}
