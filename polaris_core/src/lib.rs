//! Polaris Core - RSSI Emitter Geolocation
//!
//! Estimates the 2D position of a stationary radio emitter from located
//! RSSI samples taken by moving observers. The pipeline:
//! 1. **Projection**: geographic fixes into a local planar frame
//! 2. **Tour ordering**: per-device samples along an approximate shortest
//!    path, so contiguous subsequences are spatially coherent
//! 3. **Cluster discovery**: compact, elongation- and variance-gated
//!    subsets suitable for a local gradient fit (seed-parallel)
//! 4. **AoA estimation**: a plane fit per cluster turns RSSI into a
//!    gradient ray pointing toward the emitter
//! 5. **Position search**: minimize the aggregate ray cost, then project
//!    the minimizer back to geographic coordinates

pub mod aoa;
pub mod cluster;
pub mod cluster_search;
pub mod distance_cache;
pub mod locator;
pub mod params;
pub mod plane_fit;
pub mod position_search;
pub mod projection;
pub mod sample;
pub mod signal_json;
pub mod tour;

// Re-export key types for convenience
pub use cluster::{BitSet, BoundingBox, Cluster, ClusterError, ScoreParams, Window};
pub use cluster_search::{ClusterSearchConfig, SearchTelemetry, SeedStats};
pub use distance_cache::DistanceCache;
pub use locator::{ClusterStrategy, EmitterLocator, Estimate, LocateError, SearchStrategy};
pub use params::{ParamError, ParamValue, Params};
pub use projection::{haversine_distance, PlanarFrame, EARTH_RADIUS_METERS};
pub use sample::{Sample, SampleError};
