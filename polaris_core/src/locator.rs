//! Emitter location service.
//!
//! [`EmitterLocator`] owns the per-device sample map, the distance cache
//! and the parameter store, and runs the full pipeline: projection → tour
//! ordering → coalescing → cluster discovery → AoA estimation → position
//! search → back-projection. Cluster discovery and position search are
//! independent strategies selected per run.

use crate::aoa::estimate_aoa;
use crate::cluster::{Cluster, ClusterError, ScoreParams, Window};
use crate::cluster_search::{
    find_best_clusters, ClusterSearchConfig, ClusterSearchError, SearchTelemetry, SeedStats,
};
use crate::distance_cache::DistanceCache;
use crate::params::{ParamError, Params};
use crate::position_search::{
    gradient_descent, grid_walk, GradientDescentConfig, GridWalkConfig,
};
use crate::projection::PlanarFrame;
use crate::sample::{Sample, SampleError};
use crate::tour::{coalesce, reorder_by_nearest_tour};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("sample {id} carries invalid coordinates")]
    InvalidCoordinates { id: u32 },

    #[error("insufficient clusters formed for AoA estimation: {0}")]
    InsufficientClusters(usize),

    #[error("no intersections found between cluster AoA rays")]
    NoRayIntersections,

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Search(#[from] ClusterSearchError),
}

/// How clusters are discovered per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterStrategy {
    /// Seed-parallel subset enumeration with score-based selection.
    #[default]
    Combinatorial,
    /// Legacy contiguous walk along the tour, split on elongation.
    ContiguousSplit,
}

/// How the aggregate cost is minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// Quadrant-expanding tiled grid walk.
    #[default]
    GridWalk,
    /// Hill descent seeded at pairwise AoA ray intersections.
    GradientDescent,
}

/// Telemetry of one `locate` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTelemetry {
    pub total_points: usize,
    pub cluster_count: usize,
    pub combinations_explored: u64,
    pub clustering_time_ms: f64,
    pub timed_out_seeds: usize,
    pub seeds: Vec<SeedStats>,
}

/// The estimated emitter position with its run telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct Estimate {
    pub latitude: f64,
    pub longitude: f64,
    pub telemetry: RunTelemetry,
}

/// All tunables of a run, resolved from the parameter store with the
/// documented defaults.
#[derive(Debug, Clone)]
struct ResolvedParams {
    coalition_distance: f64,
    min_points: usize,
    cluster_ratio_threshold: f64,
    max_internal_distance: f64,
    max_overlap: f64,
    per_seed_timeout: Duration,
    grid_half_size: usize,
    extra_weight: f64,
    angle_weight: f64,
    score: ScoreParams,
}

impl ResolvedParams {
    fn from_params(params: &Params) -> Result<Self, ParamError> {
        let score = ScoreParams {
            geometric_ratio: Window {
                min: params.f64_or("min_geometric_ratio", 0.15)?,
                ideal: params.f64_or("ideal_geometric_ratio", 1.0)?,
                max: params.f64_or("max_geometric_ratio", 1.0)?,
                weight: params.f64_or("weight_geometric_ratio", 1.0)?,
            },
            area: Window {
                min: params.f64_or("min_area", 10.0)?,
                ideal: params.f64_or("ideal_area", 50.0)?,
                max: params.f64_or("max_area", 1000.0)?,
                weight: params.f64_or("weight_area", 1.0)?,
            },
            rssi_variance: Window {
                min: params.f64_or("min_rssi_variance", 5.0)?,
                ideal: params.f64_or("ideal_rssi_variance", 50.0)?,
                max: params.f64_or("max_rssi_variance", 500.0)?,
                weight: params.f64_or("weight_rssi_variance", 1.0)?,
            },
            bottom_rssi: params.f64_or("bottom_rssi", -90.0)?,
            top_rssi: params.f64_or("top_rssi", -30.0)?,
            rssi_weight: params.f64_or("weight_rssi", 1.0)?,
        };

        Ok(Self {
            coalition_distance: params.f64_or("coalition_distance", 2.0)?,
            min_points: params.i64_or("cluster_min_points", 3)?.max(0) as usize,
            cluster_ratio_threshold: params.f64_or("cluster_ratio_threshold", 0.25)?,
            max_internal_distance: params.f64_or("max_internal_distance", 20.0)?,
            max_overlap: params.f64_or("max_overlap", 0.05)?,
            per_seed_timeout: Duration::from_secs_f64(
                params.f64_or("per_seed_timeout", 1.0)?.max(0.0),
            ),
            grid_half_size: params.i64_or("grid_half_size", 500)?.max(1) as usize,
            extra_weight: params.f64_or("extra_weight", 1.0)?,
            angle_weight: params.f64_or("angle_weight", 1.0)?,
            score,
        })
    }

    fn search_config(&self) -> ClusterSearchConfig {
        ClusterSearchConfig {
            min_points: self.min_points,
            max_internal_distance: self.max_internal_distance,
            per_seed_timeout: self.per_seed_timeout,
            max_overlap: self.max_overlap,
            score: self.score.clone(),
        }
    }
}

pub struct EmitterLocator {
    frame: PlanarFrame,
    devices: BTreeMap<String, Vec<Sample>>,
    cache: DistanceCache,
    params: Params,
    cluster_strategy: ClusterStrategy,
    search_strategy: SearchStrategy,
}

impl EmitterLocator {
    pub fn new(frame: PlanarFrame) -> Self {
        Self::with_params(frame, Params::new())
    }

    pub fn with_params(frame: PlanarFrame, params: Params) -> Self {
        Self {
            frame,
            devices: BTreeMap::new(),
            cache: DistanceCache::new(),
            params,
            cluster_strategy: ClusterStrategy::default(),
            search_strategy: SearchStrategy::default(),
        }
    }

    pub fn set_cluster_strategy(&mut self, strategy: ClusterStrategy) {
        self.cluster_strategy = strategy;
    }

    pub fn set_search_strategy(&mut self, strategy: SearchStrategy) {
        self.search_strategy = strategy;
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    pub fn frame(&self) -> PlanarFrame {
        self.frame
    }

    pub fn sample_count(&self) -> usize {
        self.devices.values().map(Vec::len).sum()
    }

    /// Ingest one sample. Samples are kept ordered by timestamp within
    /// their device sequence; invalid coordinates are fatal for the run.
    pub fn add_sample(&mut self, mut sample: Sample) -> Result<(), LocateError> {
        sample.project()?;
        if !sample.has_valid_geographic() {
            return Err(LocateError::InvalidCoordinates { id: sample.id });
        }

        let device = sample.device_id.clone().unwrap_or_default();
        let sequence = self.devices.entry(device).or_default();
        let position = sequence.partition_point(|s| s.timestamp_ms < sample.timestamp_ms);
        sequence.insert(position, sample);
        Ok(())
    }

    /// Drop all samples and cached state.
    pub fn reset(&mut self) {
        self.devices.clear();
        self.cache.clear();
    }

    /// Run the full pipeline and estimate the emitter position.
    ///
    /// `precision` is the position-search step in planar meters; `timeout`
    /// bounds the position search (`None` = unbounded).
    pub fn locate(
        &mut self,
        precision: f64,
        timeout: Option<Duration>,
    ) -> Result<Estimate, LocateError> {
        self.cache.clear();
        let resolved = ResolvedParams::from_params(&self.params)?;

        let mut clusters: Vec<Cluster> = Vec::new();
        let mut telemetry = RunTelemetry::default();
        let mut search_telemetry = SearchTelemetry::default();

        for (device, samples) in &self.devices {
            info!("device '{}' has {} data points", device, samples.len());

            let mut points = samples.clone();
            for point in &mut points {
                point.project()?;
            }

            reorder_by_nearest_tour(&mut points, &self.cache)?;
            coalesce(&mut points, resolved.coalition_distance)?;
            telemetry.total_points += points.len();

            let before = clusters.len();
            match self.cluster_strategy {
                ClusterStrategy::Combinatorial => {
                    let (mut found, device_telemetry) =
                        find_best_clusters(&points, &self.cache, &resolved.search_config())?;
                    clusters.append(&mut found);
                    search_telemetry.merge(device_telemetry);
                }
                ClusterStrategy::ContiguousSplit => {
                    let mut found = contiguous_split(
                        &points,
                        resolved.min_points,
                        resolved.cluster_ratio_threshold,
                    )?;
                    clusters.append(&mut found);
                }
            }
            info!(
                "added {} clusters from device '{}' ({} total)",
                clusters.len() - before,
                device,
                clusters.len()
            );
        }

        info!(
            "formed a total of {} clusters from {} data points",
            clusters.len(),
            telemetry.total_points
        );
        if clusters.len() < 2 {
            return Err(LocateError::InsufficientClusters(clusters.len()));
        }
        if clusters.len() < 3 {
            warn!(
                "only {} clusters formed; AoA estimation may be unreliable",
                clusters.len()
            );
        }

        estimate_aoa(&mut clusters, resolved.min_points);
        telemetry.cluster_count = clusters.len();
        telemetry.combinations_explored = search_telemetry.combinations_explored;
        telemetry.clustering_time_ms = search_telemetry.clustering_time_ms;
        telemetry.timed_out_seeds = search_telemetry.timed_out_seeds;
        telemetry.seeds = search_telemetry.seeds;

        let (x, y) = match self.search_strategy {
            SearchStrategy::GridWalk => grid_walk(
                &clusters,
                &GridWalkConfig {
                    precision,
                    grid_half_size: resolved.grid_half_size,
                    extra_weight: resolved.extra_weight,
                    angle_weight: resolved.angle_weight,
                    timeout,
                },
            ),
            SearchStrategy::GradientDescent => gradient_descent(
                &clusters,
                &GradientDescentConfig {
                    precision,
                    extra_weight: resolved.extra_weight,
                    angle_weight: resolved.angle_weight,
                    timeout,
                },
            )
            .ok_or(LocateError::NoRayIntersections)?,
        };

        let (latitude, longitude) = self.frame.to_geographic(x, y);
        info!(
            "position estimated at lat={:.7}, lon={:.7} (planar x={:.2}, y={:.2})",
            latitude, longitude, x, y
        );

        Ok(Estimate {
            latitude,
            longitude,
            telemetry,
        })
    }
}

/// Legacy contiguous clustering: walk the tour order, splitting off a new
/// cluster whenever the growing one becomes wide enough (geometric ratio
/// above the threshold) at the minimum size.
pub fn contiguous_split(
    points: &[Sample],
    min_points: usize,
    ratio_threshold: f64,
) -> Result<Vec<Cluster>, ClusterError> {
    let mut clusters = Vec::new();
    let mut current = Cluster::normal();

    for point in points {
        current.add_sample(point.clone())?;
        if current.geometric_ratio() > ratio_threshold && current.size() >= min_points {
            clusters.push(std::mem::replace(&mut current, Cluster::normal()));
        }
    }

    if current.size() > 0 {
        if current.size() < min_points {
            warn!(
                "trailing cluster with {} points does not meet the minimum size",
                current.size()
            );
        }
        clusters.push(current);
    }

    info!("contiguous split formed {} clusters", clusters.len());
    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> PlanarFrame {
        PlanarFrame::new(59.8586, 17.6389)
    }

    fn geo_sample(frame: PlanarFrame, dx: f64, dy: f64, rssi: i32, ts: i64) -> Sample {
        let (lat, lon) = frame.to_geographic(dx, dy);
        Sample::new(lat, lon, frame, rssi, ts, None, Some("dev-a".into()))
    }

    #[test]
    fn test_add_sample_rejects_invalid_coordinates() {
        let mut locator = EmitterLocator::new(frame());
        let bad = Sample::new(f64::NAN, 17.6, frame(), -50, 0, None, None);
        assert!(matches!(
            locator.add_sample(bad),
            Err(LocateError::InvalidCoordinates { .. })
        ));
    }

    #[test]
    fn test_add_sample_orders_by_timestamp() {
        let f = frame();
        let mut locator = EmitterLocator::new(f);
        locator.add_sample(geo_sample(f, 0.0, 0.0, -50, 300)).unwrap();
        locator.add_sample(geo_sample(f, 1.0, 0.0, -50, 100)).unwrap();
        locator.add_sample(geo_sample(f, 2.0, 0.0, -50, 200)).unwrap();

        let device = locator.devices.get("dev-a").unwrap();
        let stamps: Vec<i64> = device.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
        assert_eq!(locator.sample_count(), 3);
    }

    #[test]
    fn test_locate_with_sparse_data_is_insufficient() {
        let f = frame();
        let mut locator = EmitterLocator::new(f);
        // Far-apart samples: no candidate sets, no clusters
        for i in 0..5 {
            locator
                .add_sample(geo_sample(f, f64::from(i) * 200.0, 0.0, -50, i64::from(i)))
                .unwrap();
        }
        let err = locator.locate(0.5, None).unwrap_err();
        assert!(matches!(err, LocateError::InsufficientClusters(0)));
    }

    #[test]
    fn test_reset_clears_state() {
        let f = frame();
        let mut locator = EmitterLocator::new(f);
        locator.add_sample(geo_sample(f, 0.0, 0.0, -50, 0)).unwrap();
        locator.reset();
        assert_eq!(locator.sample_count(), 0);
    }

    #[test]
    fn test_contiguous_split_on_two_triangles() {
        let f = frame();
        let coords = [
            // Wide triangle: splits once three members are in
            (0.0, 0.0),
            (4.0, 0.0),
            (2.0, 3.0),
            // Second wide triangle far along the tour
            (20.0, 0.0),
            (24.0, 0.0),
            (22.0, 3.0),
        ];
        let points: Vec<Sample> = coords
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| geo_sample(f, x, y, -50, i as i64))
            .collect();

        let clusters = contiguous_split(&points, 3, 0.25).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].size(), 3);
        assert_eq!(clusters[1].size(), 3);
    }
}
