//! Angle-of-arrival estimation.
//!
//! Each finalized cluster gets a plane fitted through its `(x, y, rssi)`
//! members. The plane's gradient in the xy-plane points along the local
//! direction of increasing signal strength, i.e. toward the emitter; it is
//! stored as a ray with the cluster centroid as origin.

use crate::cluster::Cluster;
use crate::plane_fit::fit_plane_normal;
use tracing::info;

/// Fit AoA rays for every cluster with at least three members.
///
/// Clusters whose plane fit degenerates (zero normal) are skipped and keep
/// a zero gradient; the position search ignores them.
pub fn estimate_aoa(clusters: &mut [Cluster], min_points: usize) {
    for cluster in clusters.iter_mut() {
        if cluster.size() < 3 {
            continue;
        }

        let normal = {
            let (xs, ys, rssis) = cluster.member_arrays();
            fit_plane_normal(xs, ys, rssis, min_points)
        };
        if normal.z == 0.0 {
            continue;
        }

        let grad_x = -normal.x / normal.z;
        let grad_y = -normal.y / normal.z;
        cluster.aoa_x = grad_x;
        cluster.aoa_y = grad_y;
        cluster.estimated_aoa = grad_y.atan2(grad_x).to_degrees();

        info!(
            "cluster AoA estimated at {:.2} degrees (grad_x={:.4}, grad_y={:.4})",
            cluster.estimated_aoa, grad_x, grad_y
        );
    }
}
