//! Great-circle and polygon math used by the geofence index, the scoring
//! engine, and broadcast targeting. Pure functions, no I/O.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (haversine).
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Ray-cast point-in-polygon over (lat, lon) vertices. Points exactly on an
/// edge count as inside (closed containment), matching the disk rule.
pub fn point_in_polygon(lat: f64, lon: f64, vertices: &[(f64, f64)]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    // Edge test first so boundary points are not at the mercy of ray parity.
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        if point_to_segment_m(lat, lon, a, b) < 1e-6 {
            return true;
        }
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (yi, xi) = vertices[i];
        let (yj, xj) = vertices[j];
        if ((yi > lat) != (yj > lat))
            && (lon < (xj - xi) * (lat - yi) / (yj - yi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Meters from a point to a polygon edge, on an equirectangular projection
/// about the query latitude. Adequate for zone-scale geometry (< tens of km).
pub fn point_to_segment_m(lat: f64, lon: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    let scale = lat.to_radians().cos();
    let px = lon * scale;
    let py = lat;
    let ax = a.1 * scale;
    let ay = a.0;
    let bx = b.1 * scale;
    let by = b.0;

    let dx = bx - ax;
    let dy = by - ay;
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    // Back to degrees, then to meters via haversine for consistency.
    haversine_m(lat, lon, cy, cx / scale)
}

/// Minimum distance in meters from a point to any polygon edge.
pub fn polygon_boundary_distance_m(lat: f64, lon: f64, vertices: &[(f64, f64)]) -> f64 {
    let mut min = f64::MAX;
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        let d = point_to_segment_m(lat, lon, a, b);
        if d < min {
            min = d;
        }
    }
    min
}

// Deliberately below the true meters-per-degree so derived bounding boxes
// over-cover; the exact great-circle cut runs afterwards.
const METERS_PER_DEGREE: f64 = 110_540.0;

/// Degrees of latitude spanning at least `meters`.
pub fn lat_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Degrees of longitude spanning at least `meters` at the given latitude.
pub fn lon_degrees(meters: f64, at_lat: f64) -> f64 {
    let cos = at_lat.to_radians().cos().abs().max(0.01);
    meters / (METERS_PER_DEGREE * cos)
}

/// Snap a coordinate to a ~100 m grid. Used by the public panic-alert feed
/// so raw tourist positions are never exposed.
pub fn coarsen_100m(lat: f64, lon: f64) -> (f64, f64) {
    let step = 0.001; // ~111 m of latitude
    ((lat / step).round() * step, (lon / step).round() * step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Delhi -> Mumbai is ~1150 km
        let d = haversine_m(28.6139, 77.2090, 19.0760, 72.8777);
        assert!((d - 1_150_000.0).abs() < 20_000.0, "got {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert_eq!(haversine_m(41.0, 29.0, 41.0, 29.0), 0.0);
    }

    #[test]
    fn haversine_small_offset() {
        // 0.001 deg latitude ~ 111 m
        let d = haversine_m(41.0, 29.0, 41.001, 29.0);
        assert!((d - 111.0).abs() < 2.0, "got {d}");
    }

    #[test]
    fn polygon_contains_interior_point() {
        let square = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
        assert!(point_in_polygon(0.5, 0.5, &square));
        assert!(!point_in_polygon(1.5, 0.5, &square));
    }

    #[test]
    fn polygon_boundary_point_is_inside() {
        let square = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
        assert!(point_in_polygon(0.0, 0.5, &square));
        assert!(point_in_polygon(0.0, 0.0, &square));
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        assert!(!point_in_polygon(0.0, 0.0, &[(0.0, 0.0), (1.0, 1.0)]));
    }

    #[test]
    fn boundary_distance_of_square() {
        let square = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
        // Center of a 1-degree square is ~55.6 km from the nearest edge.
        let d = polygon_boundary_distance_m(0.5, 0.5, &square);
        assert!((d - 55_660.0).abs() < 1_000.0, "got {d}");
    }

    #[test]
    fn coarsen_snaps_to_grid() {
        let (lat, lon) = coarsen_100m(28.61394, 77.20907);
        assert!((lat - 28.614).abs() < 1e-9);
        assert!((lon - 77.209).abs() < 1e-9);
        // Identical after re-coarsening
        assert_eq!(coarsen_100m(lat, lon), (lat, lon));
    }

    #[test]
    fn lon_degrees_wider_at_high_latitude() {
        assert!(lon_degrees(1000.0, 60.0) > lon_degrees(1000.0, 0.0));
    }
}
