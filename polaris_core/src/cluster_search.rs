//! Combinatorial cluster discovery.
//!
//! After tour ordering and coalescing, every sample index becomes a seed.
//! Seeds are visited in a stride traversal (a coprime-stride permutation of
//! `[0, n)`) so parallel workers start far apart on the tour, and each seed
//! runs a lexicographic depth-first enumeration of subsets of its candidate
//! set, keeping the best-scoring valid cluster that does not overlap the
//! already-accepted ones. Seeds are independent; the only shared state is
//! the distance cache, the accepted-cluster list, and a running
//! combination counter.

use crate::cluster::{Cluster, ClusterError, ScoreParams};
use crate::distance_cache::DistanceCache;
use crate::sample::{Sample, SampleError};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterSearchError {
    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

#[derive(Debug, Clone)]
pub struct ClusterSearchConfig {
    /// Minimum member count for a cluster to be evaluated.
    pub min_points: usize,
    /// Candidate distance cap around each seed, meters.
    pub max_internal_distance: f64,
    /// Wall-clock budget per seed, checked every 100 evaluations.
    pub per_seed_timeout: Duration,
    /// Maximum allowed shared fraction against accepted clusters.
    pub max_overlap: f64,
    /// Validity windows and score weights.
    pub score: ScoreParams,
}

impl Default for ClusterSearchConfig {
    fn default() -> Self {
        Self {
            min_points: 3,
            max_internal_distance: 20.0,
            per_seed_timeout: Duration::from_secs(1),
            max_overlap: 0.05,
            score: ScoreParams::default(),
        }
    }
}

/// Per-seed exploration record. Each slot is written only by the worker
/// that ran the seed.
#[derive(Debug, Clone, Serialize)]
pub struct SeedStats {
    pub seed_index: usize,
    pub combinations: u64,
    pub elapsed_ms: f64,
    pub candidates: usize,
    pub timed_out: bool,
}

/// Aggregated clustering telemetry for one device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchTelemetry {
    pub combinations_explored: u64,
    pub clustering_time_ms: f64,
    pub timed_out_seeds: usize,
    pub seeds: Vec<SeedStats>,
}

impl SearchTelemetry {
    pub fn merge(&mut self, other: SearchTelemetry) {
        self.combinations_explored += other.combinations_explored;
        self.clustering_time_ms += other.clustering_time_ms;
        self.timed_out_seeds += other.timed_out_seeds;
        self.seeds.extend(other.seeds);
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Stride traversal of `[0, n)`: visit `0, s, 2s, ... (mod n)` with
/// `s = max(2, ceil(sqrt(n)))` grown until `gcd(s, n) = 1`. The result is a
/// full permutation that keeps consecutive seeds far apart on the tour.
pub fn stride_order(n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let mut stride = 2.max((n as f64).sqrt().ceil() as usize);
    while gcd(stride, n) > 1 {
        stride += 1;
    }

    let mut order = Vec::with_capacity(n);
    let mut current = 0;
    for _ in 0..n {
        order.push(current);
        current = (current + stride) % n;
    }
    order
}

/// Discover clusters over one device's (ordered, coalesced) samples.
///
/// Returns the accepted clusters in their finalized point-bearing form,
/// plus the search telemetry.
pub fn find_best_clusters(
    points: &[Sample],
    cache: &DistanceCache,
    config: &ClusterSearchConfig,
) -> Result<(Vec<Cluster>, SearchTelemetry), ClusterSearchError> {
    let clustering_start = Instant::now();
    let working: RwLock<Vec<Cluster>> = RwLock::new(Vec::new());
    let combinations_total = AtomicU64::new(0);

    let order = stride_order(points.len());
    info!(
        "cluster search over {} seeds on {} workers, per-seed timeout {:.2}s",
        order.len(),
        rayon::current_num_threads(),
        config.per_seed_timeout.as_secs_f64()
    );

    let stats = order
        .par_iter()
        .map(|&seed| explore_seed(seed, points, cache, config, &working, &combinations_total))
        .collect::<Result<Vec<SeedStats>, ClusterSearchError>>()?;

    let accepted = working.into_inner().expect("working cluster list poisoned");
    let mut clusters = Vec::with_capacity(accepted.len());
    for cluster in &accepted {
        clusters.push(cluster.to_normal(points)?);
    }

    let telemetry = SearchTelemetry {
        combinations_explored: combinations_total.load(Ordering::Relaxed),
        clustering_time_ms: clustering_start.elapsed().as_secs_f64() * 1e3,
        timed_out_seeds: stats.iter().filter(|s| s.timed_out).count(),
        seeds: stats,
    };

    info!("=== cluster search summary ===");
    info!("  total combinations explored: {}", telemetry.combinations_explored);
    info!("  total clustering time: {:.2} ms", telemetry.clustering_time_ms);
    if telemetry.timed_out_seeds > 0 {
        warn!(
            "{} seeds timed out (using best cluster found before timeout)",
            telemetry.timed_out_seeds
        );
    }

    Ok((clusters, telemetry))
}

/// Depth-first exploration of one seed's candidate subsets.
fn explore_seed(
    seed: usize,
    points: &[Sample],
    cache: &DistanceCache,
    config: &ClusterSearchConfig,
    working: &RwLock<Vec<Cluster>>,
    combinations_total: &AtomicU64,
) -> Result<SeedStats, ClusterSearchError> {
    let seed_start = Instant::now();
    let mut seed_combinations: u64 = 0;
    let mut timed_out = false;

    // Candidate set: every other sample within the internal-distance cap.
    // Misses here hit the cache's write path; the tour stage has already
    // filled most pairs.
    let mut candidates = Vec::new();
    for j in 0..points.len() {
        if j == seed {
            continue;
        }
        if cache.distance(&points[seed], &points[j])? <= config.max_internal_distance {
            candidates.push(j);
        }
    }
    let n_candidates = candidates.len();

    if n_candidates + 1 < config.min_points {
        return Ok(SeedStats {
            seed_index: seed,
            combinations: 0,
            elapsed_ms: 0.0,
            candidates: n_candidates,
            timed_out: false,
        });
    }

    let mut cluster = Cluster::vectorized(points.len());
    let (seed_x, seed_y) = points[seed].planar()?;
    cluster.add_vectorized(seed_x, seed_y, f64::from(points[seed].rssi), seed)?;

    let mut best: Option<Cluster> = None;
    let mut best_score = f64::NEG_INFINITY;

    let mut selection: Vec<usize> = Vec::with_capacity(n_candidates);
    let mut stack: Vec<usize> = vec![0];

    while let Some(&candidate_idx) = stack.last() {
        // Timeout check every 100 evaluations
        if seed_combinations % 100 == 0 && seed_start.elapsed() > config.per_seed_timeout {
            timed_out = true;
            break;
        }

        if candidate_idx >= n_candidates {
            // Exhausted this level: unwind one selection step
            stack.pop();
            if let Some(last) = selection.pop() {
                cluster.remove_vectorized(selection.len() + 1, candidates[last])?;
            }
            if let Some(top) = stack.last_mut() {
                *top += 1;
            }
            continue;
        }

        selection.push(candidate_idx);
        let member = candidates[candidate_idx];
        let (x, y) = points[member].planar()?;
        cluster.add_vectorized(x, y, f64::from(points[member].rssi), member)?;

        if selection.len() + 1 >= config.min_points {
            seed_combinations += 1;
            evaluate_candidate(&mut cluster, &mut best, &mut best_score, working, config);
        }

        if candidate_idx + 1 < n_candidates {
            stack.push(candidate_idx + 1);
        } else {
            if let Some(last) = selection.pop() {
                cluster.remove_vectorized(selection.len() + 1, candidates[last])?;
            }
            if let Some(top) = stack.last_mut() {
                *top += 1;
            }
        }
    }

    let elapsed_ms = seed_start.elapsed().as_secs_f64() * 1e3;

    if let Some(best_cluster) = best {
        let size = best_cluster.size();
        let mut accepted = working.write().expect("working cluster list poisoned");
        // Re-check under the exclusive lock: another seed may have appended
        // an overlapping cluster since the shared-lock check
        let still_disjoint = accepted
            .iter()
            .all(|existing| best_cluster.overlap(existing) <= config.max_overlap);
        if still_disjoint {
            accepted.push(best_cluster);
            drop(accepted);
            info!(
                "seed {} formed a valid cluster with score {:.4}, size {} ({} combinations explored in {:.2} ms)",
                seed, best_score, size, seed_combinations, elapsed_ms
            );
        } else {
            debug!("seed {seed} best cluster discarded: overlaps a concurrently accepted cluster");
        }
    }

    combinations_total.fetch_add(seed_combinations, Ordering::Relaxed);
    Ok(SeedStats {
        seed_index: seed,
        combinations: seed_combinations,
        elapsed_ms,
        candidates: n_candidates,
        timed_out,
    })
}

/// Validity + scoring gate for the current DFS node. Takes a shared lock on
/// the accepted list for the overlap test; returns whether the cluster was
/// valid at all.
fn evaluate_candidate(
    cluster: &mut Cluster,
    best: &mut Option<Cluster>,
    best_score: &mut f64,
    working: &RwLock<Vec<Cluster>>,
    config: &ClusterSearchConfig,
) -> bool {
    if !cluster.passes_windows(&config.score) {
        return false;
    }

    let score = cluster.evaluate_score(&config.score);
    if score > *best_score {
        {
            let accepted = working.read().expect("working cluster list poisoned");
            for existing in accepted.iter() {
                if cluster.overlap(existing) > config.max_overlap {
                    return false;
                }
            }
        }
        *best_score = score;
        *best = Some(cluster.clone());
    }
    true
}
