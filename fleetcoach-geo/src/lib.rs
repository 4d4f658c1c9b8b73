use fleetcoach_types::{GeoPoint, SafetyEvent};
use serde::Serialize;

pub mod units;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default radius under which events are considered to share a location.
pub const DEFAULT_CLUSTER_RADIUS_M: f64 = 300.0;

/// Great-circle distance in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Events sharing a physical spot. Derived per invocation, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationCluster {
    /// Position of the first member; all later members are tested against it.
    pub centroid: GeoPoint,
    /// Indices into the clustered input, ascending.
    pub event_indices: Vec<usize>,
}

impl LocationCluster {
    pub fn contains(&self, index: usize) -> bool {
        self.event_indices.contains(&index)
    }
}

/// Letter label for the n-th cluster: A, B, C, ... then A1, B1, ...
pub fn cluster_label(n: usize) -> String {
    let letter = char::from(b'A' + (n % 26) as u8);
    match n / 26 {
        0 => letter.to_string(),
        round => format!("{letter}{round}"),
    }
}

/// Greedy incremental proximity clustering.
///
/// Positions are visited in input order; each joins the first existing
/// cluster whose centroid lies within `radius_m`, else opens a new one.
/// `None` positions are skipped entirely. Singletons are dropped at the end.
/// The result depends on input order and that is relied on: cluster identity
/// must stay stable across one invocation.
pub fn cluster<I>(positions: I, radius_m: f64) -> Vec<LocationCluster>
where
    I: IntoIterator<Item = Option<GeoPoint>>,
{
    let mut clusters: Vec<LocationCluster> = Vec::new();

    for (idx, pos) in positions.into_iter().enumerate() {
        let Some(pos) = pos else { continue };

        match clusters
            .iter_mut()
            .find(|c| haversine_m(pos, c.centroid) <= radius_m)
        {
            Some(c) => c.event_indices.push(idx),
            None => clusters.push(LocationCluster {
                centroid: pos,
                event_indices: vec![idx],
            }),
        }
    }

    clusters.retain(|c| c.event_indices.len() > 1);
    clusters
}

/// Cluster safety events by their enriched position.
pub fn cluster_events(events: &[SafetyEvent], radius_m: f64) -> Vec<LocationCluster> {
    cluster(events.iter().map(|e| e.position), radius_m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> Option<GeoPoint> {
        Some(GeoPoint::new(lat, lon))
    }

    #[test]
    fn haversine_known_distance() {
        // One degree of latitude is ~111.19 km on the mean sphere.
        let d = haversine_m(GeoPoint::new(0.0, 10.0), GeoPoint::new(1.0, 10.0));
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
        assert_eq!(haversine_m(GeoPoint::new(40.0, -74.0), GeoPoint::new(40.0, -74.0)), 0.0);
    }

    #[test]
    fn nearby_pair_clusters_and_far_singleton_is_dropped() {
        let clusters = cluster(
            vec![p(40.0, -74.0), p(40.0001, -74.0001), p(41.0, -75.0)],
            DEFAULT_CLUSTER_RADIUS_M,
        );
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].event_indices, vec![0, 1]);
        assert_eq!(clusters[0].centroid, GeoPoint::new(40.0, -74.0));
    }

    #[test]
    fn missing_positions_are_skipped_but_keep_indices() {
        let clusters = cluster(vec![None, p(40.0, -74.0), None, p(40.0, -74.0)], 300.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].event_indices, vec![1, 3]);
    }

    #[test]
    fn greedy_attach_uses_first_cluster_and_centroid_only() {
        // ~222 m steps along a meridian: b is within radius of a, c is within radius
        // of b but not of a's centroid, so c opens its own cluster and d joins a.
        let a = p(40.0, -74.0);
        let b = p(40.002, -74.0);
        let c = p(40.004, -74.0);
        let d = p(40.0005, -74.0);
        let clusters = cluster(vec![a, b, c, d], 300.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].event_indices, vec![0, 1, 3]);
    }

    #[test]
    fn far_apart_points_never_share_a_cluster() {
        let clusters = cluster(vec![p(40.0, -74.0), p(40.01, -74.0)], 300.0);
        assert!(clusters.is_empty());
    }

    #[test]
    fn labels() {
        assert_eq!(cluster_label(0), "A");
        assert_eq!(cluster_label(2), "C");
        assert_eq!(cluster_label(27), "B1");
    }
}
