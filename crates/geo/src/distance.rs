//! Haversine great-circle distance.

use crate::point::GeoPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
///
/// `a = sin²(Δφ/2) + cos φ1 · cos φ2 · sin²(Δλ/2)`, `d = 2R · atan2(√a, √(1−a))`.
pub fn haversine_distance(from: GeoPoint, to: GeoPoint) -> f64 {
    let phi1 = from.lat().to_radians();
    let phi2 = to.lat().to_radians();
    let delta_phi = (to.lat() - from.lat()).to_radians();
    let delta_lambda = (to.lng() - from.lng()).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` just past 1 for nearly antipodal points.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Total length of a polyline, summing consecutive segment distances in order.
pub fn path_length<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> f64 {
    let mut total = 0.0;
    let mut previous: Option<GeoPoint> = None;
    for point in points {
        if let Some(prev) = previous {
            total += haversine_distance(prev, *point);
        }
        previous = Some(*point);
    }
    total
}
