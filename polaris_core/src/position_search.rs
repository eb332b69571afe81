//! Position search over the cluster AoA rays.
//!
//! The cost of a candidate point aggregates, over all clusters with a
//! nonzero AoA, the perpendicular distance to the cluster's ray (or a
//! walk-back penalty when the point lies behind the centroid), weighted by
//! the angular deviation and the cluster score. Two minimizers are
//! available: a coarse-to-fine tiled grid walk and a gradient-descent
//! variant seeded at pairwise ray intersections.

use crate::cluster::Cluster;
use nalgebra::Vector2;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Aggregate geometric cost of candidate point `(x, y)`.
///
/// Clusters with a zero gradient are skipped, as are terms whose geometry
/// degenerates (candidate on the centroid, cosine out of domain).
pub fn aggregate_cost(
    clusters: &[Cluster],
    x: f64,
    y: f64,
    extra_weight: f64,
    angle_weight: f64,
) -> f64 {
    let p = Vector2::new(x, y);
    let mut total_cost = 0.0;

    for cluster in clusters {
        let grad = Vector2::new(cluster.aoa_x, cluster.aoa_y);
        if grad.x == 0.0 && grad.y == 0.0 {
            continue;
        }

        let d = p - Vector2::new(cluster.centroid_x, cluster.centroid_y);
        let d_norm = d.norm();
        if d_norm < f64::EPSILON {
            continue;
        }

        let grad_norm = grad.norm();
        let cross_mag = (d.x * grad.y - d.y * grad.x).abs();
        let dot = d.dot(&grad);

        // Behind the centroid: walk-back along the ray plus the distance to
        // the centroid. In front: perpendicular distance to the ray.
        let geometric_cost = if dot < 0.0 {
            -dot / grad_norm + d_norm
        } else {
            cross_mag / grad_norm
        };

        let cos_theta = dot / (grad_norm * d_norm);
        if !(-1.0..=1.0).contains(&cos_theta) {
            warn!("numerical issue in cost calculation, cos_theta={cos_theta}");
            continue;
        }
        let theta = cos_theta.acos();

        let mut weight = extra_weight + theta * angle_weight;
        if cluster.score > 0.0 {
            weight += cluster.score;
        }
        total_cost += weight * geometric_cost;
    }

    total_cost
}

// ============================================================================
// GRID WALK
// ============================================================================

#[derive(Debug, Clone)]
pub struct GridWalkConfig {
    /// Grid step in planar units.
    pub precision: f64,
    /// Cells per tile side.
    pub grid_half_size: usize,
    pub extra_weight: f64,
    pub angle_weight: f64,
    /// Wall-clock bound, checked at the top of each zone iteration.
    pub timeout: Option<Duration>,
}

impl Default for GridWalkConfig {
    fn default() -> Self {
        Self {
            precision: 0.5,
            grid_half_size: 500,
            extra_weight: 1.0,
            angle_weight: 1.0,
            timeout: None,
        }
    }
}

/// Quadrant-expanding tiled grid minimization.
///
/// Evaluates the cost on every grid point of the four quadrant tiles of
/// the current zone (deduplicated by anchor), then advances the zone one
/// tile toward the new best point while improvement continues. On timeout
/// the incumbent point is returned.
pub fn grid_walk(clusters: &[Cluster], config: &GridWalkConfig) -> (f64, f64) {
    let tile = config.precision * config.grid_half_size as f64;

    let mut best_x = 0.0;
    let mut best_y = 0.0;
    let mut best_cost =
        aggregate_cost(clusters, best_x, best_y, config.extra_weight, config.angle_weight);

    let mut zone_x = -tile;
    let mut zone_y = -tile;

    let start = Instant::now();
    let mut visited_quadrants: HashSet<(u64, u64)> = HashSet::new();

    loop {
        if let Some(timeout) = config.timeout {
            if start.elapsed() > timeout {
                warn!("timeout reached during grid walk");
                break;
            }
        }

        let mut iter_best_x = best_x;
        let mut iter_best_y = best_y;
        let mut iter_best_cost = best_cost;

        for q in 0..4 {
            let quadrant_x = zone_x + (q % 2) as f64 * tile;
            let quadrant_y = zone_y + (q / 2) as f64 * tile;

            if !visited_quadrants.insert((quadrant_x.to_bits(), quadrant_y.to_bits())) {
                continue;
            }

            for ix in 0..config.grid_half_size {
                for iy in 0..config.grid_half_size {
                    let x = quadrant_x + ix as f64 * config.precision;
                    let y = quadrant_y + iy as f64 * config.precision;
                    let cost =
                        aggregate_cost(clusters, x, y, config.extra_weight, config.angle_weight);
                    if cost < iter_best_cost {
                        iter_best_cost = cost;
                        iter_best_x = x;
                        iter_best_y = y;
                    }
                }
            }
        }

        info!(
            "grid walk iteration found best point (x={:.2}, y={:.2}) with cost {:.4}",
            iter_best_x, iter_best_y, iter_best_cost
        );

        if iter_best_cost < best_cost {
            best_cost = iter_best_cost;
            best_x = iter_best_x;
            best_y = iter_best_y;

            // Advance one tile toward the new best along each axis
            zone_x += tile * if best_x < zone_x + tile { -1.0 } else { 1.0 };
            zone_y += tile * if best_y < zone_y + tile { -1.0 } else { 1.0 };
        } else {
            break;
        }
    }

    info!(
        "grid walk completed with best point (x={:.2}, y={:.2}) and cost {:.4}",
        best_x, best_y, best_cost
    );
    (best_x, best_y)
}

// ============================================================================
// GRADIENT DESCENT
// ============================================================================

#[derive(Debug, Clone)]
pub struct GradientDescentConfig {
    /// Neighbourhood step in planar units.
    pub precision: f64,
    pub extra_weight: f64,
    pub angle_weight: f64,
    pub timeout: Option<Duration>,
}

impl Default for GradientDescentConfig {
    fn default() -> Self {
        Self {
            precision: 0.5,
            extra_weight: 1.0,
            angle_weight: 1.0,
            timeout: None,
        }
    }
}

/// Pairwise intersections of the cluster AoA rays, keeping only points in
/// front of both clusters. Parallel and zero-gradient pairs are skipped.
pub fn ray_intersections(clusters: &[Cluster]) -> Vec<(f64, f64)> {
    let mut intersections = Vec::new();

    for i in 0..clusters.len() {
        for j in (i + 1)..clusters.len() {
            let ci = &clusters[i];
            let cj = &clusters[j];

            // centroid_i + t1 * aoa_i = centroid_j + t2 * aoa_j
            let a1 = ci.aoa_x;
            let b1 = -cj.aoa_x;
            let c1 = cj.centroid_x - ci.centroid_x;

            let a2 = ci.aoa_y;
            let b2 = -cj.aoa_y;
            let c2 = cj.centroid_y - ci.centroid_y;

            let denom = a1 * b2 - a2 * b1;
            if denom.abs() < f64::EPSILON {
                continue;
            }

            let t1 = (c1 * b2 - c2 * b1) / denom;
            let t2 = (a1 * c2 - a2 * c1) / denom;
            if t1 < 0.0 || t2 < 0.0 {
                continue; // intersection behind one of the clusters
            }

            let x = ci.centroid_x + t1 * ci.aoa_x;
            let y = ci.centroid_y + t1 * ci.aoa_y;
            intersections.push((x, y));
            debug!("ray intersection between clusters {i} and {j} at (x={x:.2}, y={y:.2})");
        }
    }

    if intersections.len() < 3 {
        warn!(
            "only {} intersections found between cluster AoA rays",
            intersections.len()
        );
    }
    intersections
}

/// Hill-descend from every ray intersection and keep the global best.
///
/// Returns `None` when no ray intersections exist.
pub fn gradient_descent(
    clusters: &[Cluster],
    config: &GradientDescentConfig,
) -> Option<(f64, f64)> {
    let intersections = ray_intersections(clusters);
    if intersections.is_empty() {
        return None;
    }
    debug!("starting gradient descent with {} intersection points", intersections.len());

    let mut global_best = (0.0, 0.0);
    let mut global_best_cost = f64::MAX;
    let start = Instant::now();

    for &(seed_x, seed_y) in &intersections {
        if let Some(timeout) = config.timeout {
            if start.elapsed() > timeout {
                warn!("timeout reached during gradient descent");
                break;
            }
        }

        let mut current = (seed_x, seed_y);
        let mut current_cost = aggregate_cost(
            clusters,
            current.0,
            current.1,
            config.extra_weight,
            config.angle_weight,
        );

        let mut visited: HashSet<(u64, u64)> = HashSet::new();
        let mut keep_descending = true;
        let mut explored_new_point = true;

        while keep_descending && explored_new_point {
            if let Some(timeout) = config.timeout {
                if start.elapsed() > timeout {
                    warn!("timeout reached during gradient descent loop");
                    break;
                }
            }

            let mut best = current;
            let mut best_cost = current_cost;
            explored_new_point = false;

            for dx in -1i32..=1 {
                for dy in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let x = current.0 + f64::from(dx) * config.precision;
                    let y = current.1 + f64::from(dy) * config.precision;
                    if !visited.insert((x.to_bits(), y.to_bits())) {
                        continue;
                    }
                    explored_new_point = true;

                    let cost = aggregate_cost(
                        clusters,
                        x,
                        y,
                        config.extra_weight,
                        config.angle_weight,
                    );
                    if cost <= best_cost {
                        best_cost = cost;
                        best = (x, y);
                    }
                }
            }

            if best_cost <= current_cost {
                current = best;
                current_cost = best_cost;
            } else {
                keep_descending = false;
            }
        }

        if current_cost < global_best_cost {
            global_best_cost = current_cost;
            global_best = current;
        } else if (current_cost - global_best_cost).abs() < f64::EPSILON {
            warn!("multiple local minima found with the same cost value");
        }
        debug!(
            "descent from ({seed_x:.2}, {seed_y:.2}) reached ({:.2}, {:.2}) with cost {:.4}",
            current.0, current.1, current_cost
        );
    }

    info!(
        "gradient descent completed, global minimum at (x={:.2}, y={:.2}) with cost {:.4}",
        global_best.0, global_best.1, global_best_cost
    );
    Some(global_best)
}
