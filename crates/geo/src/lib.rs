//! Geographic primitives for field collection.
//!
//! Distances are great-circle (haversine) distances on a sphere of mean Earth
//! radius. There is no road network here: a collector's route length is the
//! sum of straight segments between stops.

pub mod distance;
pub mod point;

pub use distance::{EARTH_RADIUS_METERS, haversine_distance, path_length};
pub use point::GeoPoint;
