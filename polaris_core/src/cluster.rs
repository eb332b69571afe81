//! Point clusters and their geometry.
//!
//! A [`Cluster`] is a subset of one device's samples together with the
//! running statistics the search needs: centroid, mean/variance of RSSI,
//! and an oriented bounding box aligned with the principal axis (the line
//! through the two furthest-apart members).
//!
//! Clusters come in two representations. The *vectorized* form carries a
//! membership bitset over the device's sample indices, so subset overlap
//! reduces to bitwise AND plus popcount; it is the form the combinatorial
//! search mutates. The *normal* form owns copies of the member samples and
//! is produced at finalization for AoA fitting and downstream use.

use crate::sample::{Sample, SampleError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error("operation requires a vectorized cluster")]
    NotVectorized,

    #[error("operation requires a point-bearing cluster")]
    NotNormal,

    #[error("index {0} out of range")]
    IndexOutOfRange(usize),

    #[error("index {0} is not a member of the cluster")]
    NotAMember(usize),

    #[error("conversion changed the furthest distance: {got} != {expected}")]
    ConversionMismatch { got: f64, expected: f64 },

    #[error(transparent)]
    Sample(#[from] SampleError),
}

// ============================================================================
// BITSET
// ============================================================================

/// Compact membership bitset over sample indices (64-bit words).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn with_capacity(n_bits: usize) -> Self {
        Self {
            words: vec![0; n_bits.div_ceil(64)],
        }
    }

    fn ensure_capacity(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
    }

    pub fn set(&mut self, index: usize) {
        self.ensure_capacity(index);
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    pub fn clear_bit(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1u64 << (index % 64)) != 0)
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Population count of the intersection with `other`.
    pub fn shared_count(&self, other: &BitSet) -> usize {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// Indices of all set bits, ascending.
    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count_ones());
        for (word_idx, &w) in self.words.iter().enumerate() {
            let mut word = w;
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                out.push(word_idx * 64 + bit);
                word &= word - 1; // clear lowest set bit
            }
        }
        out
    }
}

// ============================================================================
// CLUSTER
// ============================================================================

/// Bounding box in the principal-axis coordinate system.
///
/// `range_u` spans the principal axis (through the two furthest members),
/// `range_v` the perpendicular. Invalid until the cluster has at least
/// three members and a nonzero furthest-pair distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBox {
    pub range_u: f64,
    pub range_v: f64,
    pub valid: bool,
}

#[derive(Debug, Clone)]
enum Repr {
    Vectorized { bits: BitSet, capacity: usize },
    Normal { samples: Vec<Sample> },
}

#[derive(Debug, Clone)]
pub struct Cluster {
    // Parallel member arrays, kept in both representations for the numeric
    // inner loops (bbox, variance, plane fit inputs).
    xs: Vec<f64>,
    ys: Vec<f64>,
    rssis: Vec<f64>,
    repr: Repr,

    pub estimated_aoa: f64,
    pub avg_rssi: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub aoa_x: f64,
    pub aoa_y: f64,
    pub score: f64,

    bbox: BoundingBox,
    furthest: (usize, usize),
    furthest_distance: f64,
    variance_cache: Option<f64>,
}

impl Cluster {
    /// Empty vectorized cluster over a device with `capacity` samples.
    pub fn vectorized(capacity: usize) -> Self {
        Self::with_repr(Repr::Vectorized {
            bits: BitSet::with_capacity(capacity),
            capacity,
        })
    }

    /// Empty point-bearing cluster.
    pub fn normal() -> Self {
        Self::with_repr(Repr::Normal {
            samples: Vec::new(),
        })
    }

    fn with_repr(repr: Repr) -> Self {
        Self {
            xs: Vec::new(),
            ys: Vec::new(),
            rssis: Vec::new(),
            repr,
            estimated_aoa: 0.0,
            avg_rssi: 0.0,
            centroid_x: 0.0,
            centroid_y: 0.0,
            aoa_x: 0.0,
            aoa_y: 0.0,
            score: 0.0,
            bbox: BoundingBox::default(),
            furthest: (0, 0),
            furthest_distance: 0.0,
            variance_cache: Some(0.0),
        }
    }

    pub fn is_vectorized(&self) -> bool {
        matches!(self.repr, Repr::Vectorized { .. })
    }

    pub fn size(&self) -> usize {
        self.xs.len()
    }

    /// Member samples of a normal cluster.
    pub fn samples(&self) -> Option<&[Sample]> {
        match &self.repr {
            Repr::Normal { samples } => Some(samples),
            Repr::Vectorized { .. } => None,
        }
    }

    /// Member coordinate/RSSI arrays, parallel and in insertion order.
    pub fn member_arrays(&self) -> (&[f64], &[f64], &[f64]) {
        (&self.xs, &self.ys, &self.rssis)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn furthest_distance(&self) -> f64 {
        self.furthest_distance
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Add a member to a vectorized cluster by its device index.
    pub fn add_vectorized(
        &mut self,
        x: f64,
        y: f64,
        rssi: f64,
        index: usize,
    ) -> Result<(), ClusterError> {
        let Repr::Vectorized { bits, capacity } = &mut self.repr else {
            return Err(ClusterError::NotVectorized);
        };
        if *capacity == 0 || index >= *capacity {
            return Err(ClusterError::IndexOutOfRange(index));
        }
        bits.set(index);

        self.variance_cache = None;
        self.xs.push(x);
        self.ys.push(y);
        self.rssis.push(rssi);
        self.update_means_on_add(x, y, rssi);
        self.extend_bounding_box(self.xs.len() - 1);
        Ok(())
    }

    /// Add a sample to a normal cluster.
    pub fn add_sample(&mut self, sample: Sample) -> Result<(), ClusterError> {
        let (x, y) = sample.planar()?;
        let rssi = f64::from(sample.rssi);
        let Repr::Normal { samples } = &mut self.repr else {
            return Err(ClusterError::NotNormal);
        };
        samples.push(sample);

        self.variance_cache = None;
        self.xs.push(x);
        self.ys.push(y);
        self.rssis.push(rssi);
        self.update_means_on_add(x, y, rssi);
        self.extend_bounding_box(self.xs.len() - 1);
        Ok(())
    }

    fn update_means_on_add(&mut self, x: f64, y: f64, rssi: f64) {
        let n = self.xs.len() as f64;
        self.avg_rssi = (self.avg_rssi * (n - 1.0) + rssi) / n;
        self.centroid_x = (self.centroid_x * (n - 1.0) + x) / n;
        self.centroid_y = (self.centroid_y * (n - 1.0) + y) / n;
    }

    fn recompute_means(&mut self) {
        if self.xs.is_empty() {
            self.avg_rssi = 0.0;
            self.centroid_x = 0.0;
            self.centroid_y = 0.0;
            return;
        }
        let n = self.xs.len() as f64;
        self.avg_rssi = self.rssis.iter().sum::<f64>() / n;
        self.centroid_x = self.xs.iter().sum::<f64>() / n;
        self.centroid_y = self.ys.iter().sum::<f64>() / n;
    }

    /// Remove a member from a vectorized cluster.
    ///
    /// `member_index` addresses the parallel arrays, `device_index` the
    /// membership bit.
    pub fn remove_vectorized(
        &mut self,
        member_index: usize,
        device_index: usize,
    ) -> Result<(), ClusterError> {
        let Repr::Vectorized { bits, capacity } = &mut self.repr else {
            return Err(ClusterError::NotVectorized);
        };
        if member_index >= self.xs.len() {
            return Err(ClusterError::IndexOutOfRange(member_index));
        }
        if device_index >= *capacity {
            return Err(ClusterError::IndexOutOfRange(device_index));
        }
        if !bits.get(device_index) {
            return Err(ClusterError::NotAMember(device_index));
        }
        bits.clear_bit(device_index);

        self.variance_cache = None;
        self.xs.remove(member_index);
        self.ys.remove(member_index);
        self.rssis.remove(member_index);
        self.recompute_means();

        if member_index == self.furthest.0 || member_index == self.furthest.1 {
            self.compute_bounding_box();
        }
        Ok(())
    }

    /// Remove a member from a normal cluster by sample id. Absent ids are
    /// ignored.
    pub fn remove_sample(&mut self, sample_id: u32) -> Result<(), ClusterError> {
        let Repr::Normal { samples } = &mut self.repr else {
            return Err(ClusterError::NotNormal);
        };
        let Some(idx) = samples.iter().position(|s| s.id == sample_id) else {
            return Ok(());
        };
        samples.remove(idx);

        self.variance_cache = None;
        self.xs.remove(idx);
        self.ys.remove(idx);
        self.rssis.remove(idx);
        self.recompute_means();

        if idx == self.furthest.0 || idx == self.furthest.1 {
            self.compute_bounding_box();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Population variance of member RSSI, cached between mutations.
    pub fn variance_rssi(&mut self) -> f64 {
        if let Some(v) = self.variance_cache {
            return v;
        }
        if self.size() < 2 {
            return 0.0;
        }
        let sum_sq: f64 = self
            .rssis
            .iter()
            .map(|r| (r - self.avg_rssi) * (r - self.avg_rssi))
            .sum();
        let v = sum_sq / self.size() as f64;
        self.variance_cache = Some(v);
        v
    }

    /// Fraction of shared members: `shared / (|a| + |b|)`.
    pub fn overlap(&self, other: &Cluster) -> f64 {
        let total = self.size() + other.size();
        if total == 0 {
            return 0.0;
        }

        let shared = match (&self.repr, &other.repr) {
            (Repr::Vectorized { bits: a, .. }, Repr::Vectorized { bits: b, .. }) => {
                a.shared_count(b)
            }
            (Repr::Normal { samples: a }, Repr::Normal { samples: b }) => a
                .iter()
                .filter(|p| b.iter().any(|q| q.id == p.id))
                .count(),
            (Repr::Vectorized { bits, .. }, Repr::Normal { samples })
            | (Repr::Normal { samples }, Repr::Vectorized { bits, .. }) => bits
                .indices()
                .into_iter()
                .filter(|&idx| samples.iter().any(|s| s.id as usize == idx))
                .count(),
        };
        shared as f64 / total as f64
    }

    /// `range_v / range_u`: 1.0 is square, 0.0 is a line (or invalid box).
    pub fn geometric_ratio(&self) -> f64 {
        if !self.bbox.valid || self.bbox.range_u == 0.0 {
            return 0.0;
        }
        self.bbox.range_v / self.bbox.range_u
    }

    /// Principal-axis bounding box area, or 0 when invalid.
    pub fn area(&self) -> f64 {
        if !self.bbox.valid {
            return 0.0;
        }
        self.bbox.range_u * self.bbox.range_v
    }

    /// Member indices: set bits for the vectorized form, sample ids for the
    /// normal form.
    pub fn point_indices(&self) -> Vec<usize> {
        match &self.repr {
            Repr::Vectorized { bits, .. } => bits.indices(),
            Repr::Normal { samples } => samples.iter().map(|s| s.id as usize).collect(),
        }
    }

    // ------------------------------------------------------------------
    // Bounding box
    // ------------------------------------------------------------------

    /// Incremental update after appending member `new_idx`: the furthest
    /// pair can only change to a pair involving the new member.
    fn extend_bounding_box(&mut self, new_idx: usize) {
        let mut sqrdist = self.furthest_distance * self.furthest_distance;
        let (mut idx1, mut idx2) = self.furthest;

        let x = self.xs[new_idx];
        let y = self.ys[new_idx];
        for j in 0..self.xs.len() {
            let dx = x - self.xs[j];
            let dy = y - self.ys[j];
            let d = dx * dx + dy * dy;
            if d > sqrdist {
                sqrdist = d;
                idx1 = new_idx;
                idx2 = j;
            }
        }

        self.furthest_distance = sqrdist.sqrt();
        self.furthest = (idx1, idx2);
        self.project_extents();
    }

    /// Full recomputation over all member pairs.
    fn compute_bounding_box(&mut self) {
        let mut sqrdist = 0.0;
        let mut idx1 = 0;
        let mut idx2 = 0;

        for i in 0..self.xs.len() {
            for j in (i + 1)..self.xs.len() {
                let dx = self.xs[i] - self.xs[j];
                let dy = self.ys[i] - self.ys[j];
                let d = dx * dx + dy * dy;
                if d > sqrdist {
                    sqrdist = d;
                    idx1 = i;
                    idx2 = j;
                }
            }
        }

        self.furthest_distance = sqrdist.sqrt();
        self.furthest = (idx1, idx2);
        self.project_extents();
    }

    /// Project all members onto the principal axis and its perpendicular,
    /// with the centroid as origin.
    fn project_extents(&mut self) {
        if self.furthest_distance == 0.0 || self.size() < 3 {
            self.bbox.valid = false;
            return;
        }

        let (i1, i2) = self.furthest;
        let ux = (self.xs[i2] - self.xs[i1]) / self.furthest_distance;
        let uy = (self.ys[i2] - self.ys[i1]) / self.furthest_distance;
        // Perpendicular unit vector
        let vx = -uy;
        let vy = ux;

        let mut min_u = f64::INFINITY;
        let mut max_u = f64::NEG_INFINITY;
        let mut min_v = f64::INFINITY;
        let mut max_v = f64::NEG_INFINITY;
        for i in 0..self.xs.len() {
            let dx = self.xs[i] - self.centroid_x;
            let dy = self.ys[i] - self.centroid_y;
            let pu = dx * ux + dy * uy;
            let pv = dx * vx + dy * vy;
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }

        self.bbox.range_u = max_u - min_u;
        self.bbox.range_v = max_v - min_v;
        self.bbox.valid = true;
    }

    // ------------------------------------------------------------------
    // Conversion
    // ------------------------------------------------------------------

    /// Materialize a vectorized cluster as a normal one, pulling member
    /// samples out of the device's sample slice. The bounding box is
    /// recomputed from scratch and must agree with the vectorized form.
    pub fn to_normal(&self, all_samples: &[Sample]) -> Result<Cluster, ClusterError> {
        let Repr::Vectorized { bits, .. } = &self.repr else {
            return Err(ClusterError::NotVectorized);
        };

        let mut out = Cluster::normal();
        for idx in bits.indices() {
            let sample = all_samples
                .get(idx)
                .ok_or(ClusterError::IndexOutOfRange(idx))?;
            let (x, y) = sample.planar()?;
            out.xs.push(x);
            out.ys.push(y);
            out.rssis.push(f64::from(sample.rssi));
            if let Repr::Normal { samples } = &mut out.repr {
                samples.push(sample.clone());
            }
        }

        out.estimated_aoa = self.estimated_aoa;
        out.avg_rssi = self.avg_rssi;
        out.centroid_x = self.centroid_x;
        out.centroid_y = self.centroid_y;
        out.aoa_x = self.aoa_x;
        out.aoa_y = self.aoa_y;
        out.score = self.score;
        out.variance_cache = None;
        out.compute_bounding_box();

        if (out.furthest_distance - self.furthest_distance).abs() > 1e-9 {
            return Err(ClusterError::ConversionMismatch {
                got: out.furthest_distance,
                expected: self.furthest_distance,
            });
        }
        Ok(out)
    }
}

// ============================================================================
// SCORING
// ============================================================================

/// A triangular feature window: 0 at `min` and `max`, 1 at `ideal`.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub min: f64,
    pub ideal: f64,
    pub max: f64,
    pub weight: f64,
}

impl Window {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Tent interpolation; a degenerate side (ideal == bound) scores 1.
    pub fn triangle(&self, value: f64) -> f64 {
        if value < self.min || value > self.max {
            return 0.0;
        }
        if value <= self.ideal {
            if self.ideal == self.min {
                1.0
            } else {
                (value - self.min) / (self.ideal - self.min)
            }
        } else if self.max == self.ideal {
            1.0
        } else {
            (self.max - value) / (self.max - self.ideal)
        }
    }
}

/// Feature windows and weights for cluster validity and scoring.
#[derive(Debug, Clone)]
pub struct ScoreParams {
    pub geometric_ratio: Window,
    pub area: Window,
    pub rssi_variance: Window,
    /// Lower end of the mean-RSSI ramp (scores 0).
    pub bottom_rssi: f64,
    /// Upper end of the mean-RSSI ramp (scores 1).
    pub top_rssi: f64,
    pub rssi_weight: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            geometric_ratio: Window {
                min: 0.15,
                ideal: 1.0,
                max: 1.0,
                weight: 1.0,
            },
            area: Window {
                min: 10.0,
                ideal: 50.0,
                max: 1000.0,
                weight: 1.0,
            },
            rssi_variance: Window {
                min: 5.0,
                ideal: 50.0,
                max: 500.0,
                weight: 1.0,
            },
            bottom_rssi: -90.0,
            top_rssi: -30.0,
            rssi_weight: 1.0,
        }
    }
}

impl Cluster {
    /// Whether the cluster falls inside all three validity windows.
    pub fn passes_windows(&mut self, params: &ScoreParams) -> bool {
        let gr = self.geometric_ratio();
        let area = self.area();
        let variance = self.variance_rssi();
        params.geometric_ratio.contains(gr)
            && params.area.contains(area)
            && params.rssi_variance.contains(variance)
    }

    /// Weighted sum of the triangular feature scores plus the mean-RSSI
    /// ramp. Stores the result in `self.score` and returns it.
    pub fn evaluate_score(&mut self, params: &ScoreParams) -> f64 {
        let gr_score = params.geometric_ratio.triangle(self.geometric_ratio());
        let area_score = params.area.triangle(self.area());
        let variance_score = params.rssi_variance.triangle(self.variance_rssi());

        let rssi_score = if self.avg_rssi > params.bottom_rssi {
            let ramp = if params.top_rssi == params.bottom_rssi {
                1.0
            } else {
                (self.avg_rssi - params.bottom_rssi) / (params.top_rssi - params.bottom_rssi)
            };
            ramp.clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.score = params.geometric_ratio.weight * gr_score
            + params.area.weight * area_score
            + params.rssi_variance.weight * variance_score
            + params.rssi_weight * rssi_score;
        self.score
    }
}
