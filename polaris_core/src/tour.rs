//! Tour ordering and point coalescing.
//!
//! Before the cluster search, each device's samples are reordered along an
//! approximate shortest path (greedy nearest neighbour seed plus 2-opt
//! local improvement) so contiguous subsequences are spatially coherent,
//! and near-duplicate samples are merged. Both stages run single-threaded
//! and, as a side effect, the ordering populates the distance cache that
//! the parallel search reads.

use crate::distance_cache::DistanceCache;
use crate::sample::{Sample, SampleError};
use tracing::{debug, info};

const MAX_TWO_OPT_PASSES: u32 = 100;

/// Lengths before and after the 2-opt improvement.
#[derive(Debug, Clone, Copy)]
pub struct TourStats {
    pub initial_length: f64,
    pub optimized_length: f64,
    pub passes: u32,
}

/// Total length of the path through `points` in order.
pub fn tour_length(points: &[Sample], cache: &DistanceCache) -> Result<f64, SampleError> {
    let mut total = 0.0;
    for pair in points.windows(2) {
        total += cache.distance(&pair[0], &pair[1])?;
    }
    Ok(total)
}

/// Reorder `points` along an approximate shortest Hamiltonian path.
///
/// Stage A seeds with a greedy nearest-neighbour walk from the first
/// sample; stage B applies 2-opt segment reversals until a full pass makes
/// no improvement or the pass cap is hit. Returns `None` for fewer than
/// three points (nothing to do).
pub fn reorder_by_nearest_tour(
    points: &mut Vec<Sample>,
    cache: &DistanceCache,
) -> Result<Option<TourStats>, SampleError> {
    if points.len() < 3 {
        return Ok(None);
    }

    // Greedy nearest-neighbour seed over indices
    let n = points.len();
    let mut order = Vec::with_capacity(n);
    let mut remaining: Vec<usize> = (1..n).collect();
    order.push(0);
    while !remaining.is_empty() {
        let last = order[order.len() - 1];
        let mut best_pos = 0;
        let mut best_dist = f64::MAX;
        for (pos, &candidate) in remaining.iter().enumerate() {
            let d = cache.distance(&points[last], &points[candidate])?;
            if d < best_dist {
                best_dist = d;
                best_pos = pos;
            }
        }
        order.push(remaining.remove(best_pos));
    }

    let mut path: Vec<Sample> = order.into_iter().map(|i| points[i].clone()).collect();
    let mut total_dist = tour_length(&path, cache)?;
    let initial_length = total_dist;

    // 2-opt local search: replace edges (i, i+1) and (j, j+1) with (i, j)
    // and (i+1, j+1) by reversing the segment [i+1, j]
    let mut improved = true;
    let mut passes = 0;
    while improved && passes < MAX_TWO_OPT_PASSES {
        improved = false;
        passes += 1;

        for i in 0..path.len() - 2 {
            for j in (i + 1)..path.len() - 1 {
                let d_ab = cache.distance(&path[i], &path[i + 1])?;
                let d_cd = cache.distance(&path[j], &path[j + 1])?;
                let current_cost = d_ab + d_cd;

                let d_ac = cache.distance(&path[i], &path[j])?;
                let d_bd = cache.distance(&path[i + 1], &path[j + 1])?;
                let new_cost = d_ac + d_bd;

                if new_cost < current_cost {
                    path[i + 1..=j].reverse();
                    total_dist -= current_cost - new_cost;
                    improved = true;
                }
            }
        }
    }

    info!(
        "optimized sample path: length reduced from {:.2}m to {:.2}m ({} passes)",
        initial_length, total_dist, passes
    );

    *points = path;
    Ok(Some(TourStats {
        initial_length,
        optimized_length: total_dist,
        passes,
    }))
}

/// Merge pairs of samples closer than `coalition_distance`, averaging
/// position and RSSI. The scan measures against sample `i`'s position as it
/// was when the outer loop reached it, so the result is order-dependent but
/// deterministic. Returns the number of merges.
pub fn coalesce(points: &mut Vec<Sample>, coalition_distance: f64) -> Result<usize, SampleError> {
    let radius_sq = coalition_distance * coalition_distance;
    let mut merged = 0;

    let mut i = 0;
    while i < points.len() {
        let (old_x, old_y) = points[i].planar()?;
        let mut j = i + 1;
        while j < points.len() {
            let (xj, yj) = points[j].planar()?;
            let dx = old_x - xj;
            let dy = old_y - yj;

            if dx * dx + dy * dy <= radius_sq {
                let (xi, yi) = points[i].planar()?;
                let new_x = (xi + xj) / 2.0;
                let new_y = (yi + yj) / 2.0;
                let new_rssi = f64::from(points[i].rssi + points[j].rssi) / 2.0;

                debug!(
                    "coalesced sample (x={:.2}, y={:.2}, rssi={}) into (x={:.2}, y={:.2}, rssi={})",
                    xj, yj, points[j].rssi, new_x, new_y, new_rssi
                );

                points[i].set_planar(new_x, new_y);
                points[i].rssi = new_rssi as i32;
                points.remove(j);
                merged += 1;
            } else {
                j += 1;
            }
        }
        i += 1;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::PlanarFrame;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn planar_sample(id: u32, x: f64, y: f64) -> Sample {
        let mut s = Sample::from_planar(x, y, PlanarFrame::new(0.0, 0.0), -50, i64::from(id));
        s.id = id;
        s
    }

    #[test]
    fn test_short_input_is_untouched() {
        let cache = DistanceCache::new();
        let mut points = vec![planar_sample(1, 0.0, 0.0), planar_sample(2, 5.0, 0.0)];
        let stats = reorder_by_nearest_tour(&mut points, &cache).unwrap();
        assert!(stats.is_none());
        assert_eq!(points[0].id, 1);
    }

    #[test]
    fn test_two_opt_never_worse_than_greedy() {
        let cache = DistanceCache::new();
        let mut rng = StdRng::seed_from_u64(123_456);
        let mut points: Vec<Sample> = (0..20)
            .map(|i| {
                planar_sample(
                    i,
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                )
            })
            .collect();
        let ids_before: Vec<u32> = {
            let mut v: Vec<u32> = points.iter().map(|p| p.id).collect();
            v.sort_unstable();
            v
        };

        let stats = reorder_by_nearest_tour(&mut points, &cache)
            .unwrap()
            .unwrap();
        assert!(stats.optimized_length <= stats.initial_length + 1e-9);
        assert!(stats.optimized_length > 0.0);

        // The reordering is a permutation
        let mut ids_after: Vec<u32> = points.iter().map(|p| p.id).collect();
        ids_after.sort_unstable();
        assert_eq!(ids_before, ids_after);

        // The result length matches a recomputation from scratch
        let recomputed = tour_length(&points, &cache).unwrap();
        assert!((recomputed - stats.optimized_length).abs() < 1e-9);
    }

    #[test]
    fn test_tour_orders_scattered_line() {
        let cache = DistanceCache::new();
        // Shuffled points on a line; the optimal path walks it end to end
        let xs = [3.0, 0.0, 1.0, 4.0, 2.0, 5.0];
        let mut points: Vec<Sample> = xs
            .iter()
            .enumerate()
            .map(|(i, &x)| planar_sample(i as u32, x, 0.0))
            .collect();

        let stats = reorder_by_nearest_tour(&mut points, &cache)
            .unwrap()
            .unwrap();
        // Extent of the line is 5; greedy from x=3 cannot beat 7
        assert!(stats.optimized_length >= 5.0);
        assert!(stats.optimized_length <= stats.initial_length);
    }

    #[test]
    fn test_coalesce_merges_and_averages() {
        let mut points = vec![
            planar_sample(1, 0.0, 0.0),
            planar_sample(2, 1.5, 0.0),
            planar_sample(3, 3.0, 0.0),
        ];
        points[0].rssi = -40;
        points[1].rssi = -50;

        let merged = coalesce(&mut points, 2.0).unwrap();
        assert_eq!(merged, 1);
        assert_eq!(points.len(), 2);

        // First pair merged at the midpoint; the far point is measured
        // against the pre-merge position and stays separate
        let (x, y) = points[0].planar().unwrap();
        assert!((x - 0.75).abs() < 1e-12);
        assert_eq!(y, 0.0);
        assert_eq!(points[0].rssi, -45);
        let (x1, _) = points[1].planar().unwrap();
        assert_eq!(x1, 3.0);
    }

    #[test]
    fn test_coalesce_leaves_sparse_points() {
        let mut points = vec![
            planar_sample(1, 0.0, 0.0),
            planar_sample(2, 10.0, 0.0),
            planar_sample(3, 20.0, 0.0),
        ];
        let merged = coalesce(&mut points, 2.0).unwrap();
        assert_eq!(merged, 0);
        assert_eq!(points.len(), 3);
    }
}
