//! In-memory geofence index.
//!
//! Zones are few (hundreds) but consulted on every location update, so the
//! query path works on an immutable snapshot: readers clone an `Arc` and
//! never wait on a refresh. The refresher task rebuilds the snapshot from
//! the database on an interval and swaps the pointer; a failed refresh keeps
//! the stale snapshot serving.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::geo;
use crate::models::{Zone, ZoneType};

#[derive(Clone, Debug)]
pub struct ZoneDef {
    pub id: i64,
    pub name: String,
    pub zone_type: ZoneType,
    pub center_lat: f64,
    pub center_lon: f64,
    pub geometry: ZoneGeometry,
}

#[derive(Clone, Debug)]
pub enum ZoneGeometry {
    Disk { radius_m: f64 },
    Polygon { vertices: Vec<(f64, f64)> },
}

impl ZoneDef {
    /// Closed containment, same rule as the index query path.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        match &self.geometry {
            ZoneGeometry::Disk { radius_m } => {
                geo::haversine_m(lat, lon, self.center_lat, self.center_lon) <= *radius_m
            }
            ZoneGeometry::Polygon { vertices } => geo::point_in_polygon(lat, lon, vertices),
        }
    }

    /// Bounding box (min_lat, max_lat, min_lon, max_lon) for SQL prefilters.
    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        match &self.geometry {
            ZoneGeometry::Disk { radius_m } => {
                let dlat = geo::lat_degrees(*radius_m);
                let dlon = geo::lon_degrees(*radius_m, self.center_lat);
                (
                    self.center_lat - dlat,
                    self.center_lat + dlat,
                    self.center_lon - dlon,
                    self.center_lon + dlon,
                )
            }
            ZoneGeometry::Polygon { vertices } => {
                let mut min_lat = f64::MAX;
                let mut max_lat = f64::MIN;
                let mut min_lon = f64::MAX;
                let mut max_lon = f64::MIN;
                for (lat, lon) in vertices {
                    min_lat = min_lat.min(*lat);
                    max_lat = max_lat.max(*lat);
                    min_lon = min_lon.min(*lon);
                    max_lon = max_lon.max(*lon);
                }
                (min_lat, max_lat, min_lon, max_lon)
            }
        }
    }
}

/// A zone matched by a point or radius query.
#[derive(Clone, Debug)]
pub struct ZoneHit {
    pub zone_id: i64,
    pub name: String,
    pub zone_type: ZoneType,
    /// Meters to the zone boundary. Inside a zone this is the depth past the
    /// boundary; outside it is the distance still to cover.
    pub boundary_distance_m: f64,
    pub inside: bool,
}

#[derive(Default)]
struct Snapshot {
    zones: Vec<ZoneDef>,
}

pub struct GeofenceIndex {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl GeofenceIndex {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(Arc::new(Snapshot::default())) }
    }

    /// Replace the snapshot with a freshly built zone set.
    pub fn install(&self, zones: Vec<ZoneDef>) {
        let snap = Arc::new(Snapshot { zones });
        *self.snapshot.write().expect("geofence snapshot lock poisoned") = snap;
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().expect("geofence snapshot lock poisoned").clone()
    }

    pub fn zone_count(&self) -> usize {
        self.current().zones.len()
    }

    /// All active zones containing the point. Containment is closed: a point
    /// exactly on the boundary is inside.
    pub fn zones_containing(&self, lat: f64, lon: f64) -> Vec<ZoneHit> {
        let snap = self.current();
        let mut hits = Vec::new();
        for z in &snap.zones {
            match &z.geometry {
                ZoneGeometry::Disk { radius_m } => {
                    let d = geo::haversine_m(lat, lon, z.center_lat, z.center_lon);
                    if d <= *radius_m {
                        hits.push(ZoneHit {
                            zone_id: z.id,
                            name: z.name.clone(),
                            zone_type: z.zone_type,
                            boundary_distance_m: radius_m - d,
                            inside: true,
                        });
                    }
                }
                ZoneGeometry::Polygon { vertices } => {
                    if geo::point_in_polygon(lat, lon, vertices) {
                        hits.push(ZoneHit {
                            zone_id: z.id,
                            name: z.name.clone(),
                            zone_type: z.zone_type,
                            boundary_distance_m: geo::polygon_boundary_distance_m(lat, lon, vertices),
                            inside: true,
                        });
                    }
                }
            }
        }
        hits
    }

    /// Zones whose center lies within `radius_m` of the point, with distance
    /// to their boundary, nearest first.
    pub fn zones_near(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<ZoneHit> {
        let snap = self.current();
        let mut hits = Vec::new();
        for z in &snap.zones {
            let center_d = geo::haversine_m(lat, lon, z.center_lat, z.center_lon);
            if center_d > radius_m {
                continue;
            }
            let (boundary, inside) = match &z.geometry {
                ZoneGeometry::Disk { radius_m: r } => ((center_d - r).max(0.0), center_d <= *r),
                ZoneGeometry::Polygon { vertices } => {
                    let inside = geo::point_in_polygon(lat, lon, vertices);
                    let d = if inside { 0.0 } else { geo::polygon_boundary_distance_m(lat, lon, vertices) };
                    (d, inside)
                }
            };
            hits.push(ZoneHit {
                zone_id: z.id,
                name: z.name.clone(),
                zone_type: z.zone_type,
                boundary_distance_m: boundary,
                inside,
            });
        }
        hits.sort_by(|a, b| a.boundary_distance_m.total_cmp(&b.boundary_distance_m));
        hits
    }

    /// Nearest risky/restricted boundary, for the zone-risk factor's
    /// interpolation band. Distance is 0 when inside a hazard zone.
    pub fn nearest_hazard(&self, lat: f64, lon: f64) -> Option<(ZoneType, f64)> {
        let snap = self.current();
        let mut nearest: Option<(ZoneType, f64)> = None;
        for z in &snap.zones {
            if z.zone_type == ZoneType::Safe {
                continue;
            }
            let d = match &z.geometry {
                ZoneGeometry::Disk { radius_m } => {
                    let center_d = geo::haversine_m(lat, lon, z.center_lat, z.center_lon);
                    (center_d - radius_m).max(0.0)
                }
                ZoneGeometry::Polygon { vertices } => {
                    if geo::point_in_polygon(lat, lon, vertices) {
                        0.0
                    } else {
                        geo::polygon_boundary_distance_m(lat, lon, vertices)
                    }
                }
            };
            nearest = match nearest {
                Some((_, n)) if n <= d => nearest,
                _ => Some((z.zone_type, d)),
            };
        }
        nearest
    }
}

/// Build index entries from zone rows, excluding malformed geometry.
pub fn build_defs(rows: Vec<Zone>) -> Vec<ZoneDef> {
    let mut defs = Vec::with_capacity(rows.len());
    for z in rows {
        let Some(zone_type) = ZoneType::parse(&z.zone_type) else {
            warn!(zone_id = z.id, zone_type = %z.zone_type, "zone_unknown_type_skipped");
            continue;
        };
        let geometry = match (&z.bounds, z.radius_m) {
            (Some(bounds), _) => match parse_polygon(bounds) {
                Some(vertices) => ZoneGeometry::Polygon { vertices },
                None => {
                    warn!(zone_id = z.id, "zone_malformed_polygon_skipped");
                    continue;
                }
            },
            (None, Some(radius_m)) if radius_m > 0.0 => ZoneGeometry::Disk { radius_m },
            _ => {
                warn!(zone_id = z.id, "zone_missing_geometry_skipped");
                continue;
            }
        };
        defs.push(ZoneDef {
            id: z.id,
            name: z.name,
            zone_type,
            center_lat: z.center_lat,
            center_lon: z.center_lon,
            geometry,
        });
    }
    defs
}

fn parse_polygon(bounds: &serde_json::Value) -> Option<Vec<(f64, f64)>> {
    let arr = bounds.as_array()?;
    let mut vertices = Vec::with_capacity(arr.len());
    for v in arr {
        let pair = v.as_array()?;
        if pair.len() != 2 {
            return None;
        }
        vertices.push((pair[0].as_f64()?, pair[1].as_f64()?));
    }
    if vertices.len() < 3 {
        return None;
    }
    Some(vertices)
}

/// Periodic snapshot refresh. Runs for the life of the process; a failed
/// query logs and leaves the previous snapshot in place.
pub async fn refresher(index: Arc<GeofenceIndex>, pool: PgPool, interval_secs: u64) {
    let mut iv = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        iv.tick().await;
        match crate::repo::zones::fetch_active(&pool).await {
            Ok(rows) => {
                let defs = build_defs(rows);
                let n = defs.len();
                index.install(defs);
                info!(zones = n, "zone_snapshot_refreshed");
            }
            Err(e) => {
                warn!(error = %e, "zone_snapshot_refresh_failed — serving stale snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disk(id: i64, zone_type: ZoneType, lat: f64, lon: f64, radius_m: f64) -> ZoneDef {
        ZoneDef {
            id,
            name: format!("zone-{id}"),
            zone_type,
            center_lat: lat,
            center_lon: lon,
            geometry: ZoneGeometry::Disk { radius_m },
        }
    }

    #[test]
    fn disk_containment_is_closed() {
        let idx = GeofenceIndex::new();
        // 200 m disk; a point ~111 m north is inside, ~222 m north is not.
        idx.install(vec![disk(1, ZoneType::Restricted, 40.7589, -73.9851, 200.0)]);
        assert_eq!(idx.zones_containing(40.7599, -73.9851).len(), 1);
        assert_eq!(idx.zones_containing(40.7609, -73.9851).len(), 0);
    }

    #[test]
    fn polygon_zone_from_bounds() {
        let defs = build_defs(vec![Zone {
            id: 7,
            name: "old town".into(),
            zone_type: "risky".into(),
            center_lat: 0.5,
            center_lon: 0.5,
            radius_m: None,
            bounds: Some(json!([[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]])),
            is_active: true,
            created_by: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }]);
        assert_eq!(defs.len(), 1);
        let idx = GeofenceIndex::new();
        idx.install(defs);
        let hits = idx.zones_containing(0.5, 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].zone_type, ZoneType::Risky);
        assert!(hits[0].inside);
    }

    #[test]
    fn malformed_polygon_is_excluded() {
        let defs = build_defs(vec![Zone {
            id: 8,
            name: "bad".into(),
            zone_type: "risky".into(),
            center_lat: 0.0,
            center_lon: 0.0,
            radius_m: None,
            bounds: Some(json!([[0.0, 0.0], [1.0, 1.0]])),
            is_active: true,
            created_by: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }]);
        assert!(defs.is_empty());
    }

    #[test]
    fn nearest_hazard_ignores_safe_zones() {
        let idx = GeofenceIndex::new();
        idx.install(vec![
            disk(1, ZoneType::Safe, 41.0, 29.0, 100.0),
            disk(2, ZoneType::Risky, 41.01, 29.0, 100.0), // ~1.1 km north
        ]);
        let (zone_type, d) = idx.nearest_hazard(41.0, 29.0).unwrap();
        assert_eq!(zone_type, ZoneType::Risky);
        assert!((d - 1_013.0).abs() < 30.0, "got {d}");
    }

    #[test]
    fn nearest_hazard_zero_inside() {
        let idx = GeofenceIndex::new();
        idx.install(vec![disk(1, ZoneType::Restricted, 41.0, 29.0, 500.0)]);
        assert_eq!(idx.nearest_hazard(41.0, 29.0), Some((ZoneType::Restricted, 0.0)));
    }

    #[test]
    fn zones_near_sorted_by_boundary_distance() {
        let idx = GeofenceIndex::new();
        idx.install(vec![
            disk(1, ZoneType::Risky, 41.02, 29.0, 100.0),
            disk(2, ZoneType::Risky, 41.005, 29.0, 100.0),
        ]);
        let hits = idx.zones_near(41.0, 29.0, 5_000.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].zone_id, 2);
        assert_eq!(hits[1].zone_id, 1);
    }

    #[test]
    fn empty_index_matches_nothing() {
        let idx = GeofenceIndex::new();
        assert!(idx.zones_containing(0.0, 0.0).is_empty());
        assert!(idx.nearest_hazard(0.0, 0.0).is_none());
    }
}
