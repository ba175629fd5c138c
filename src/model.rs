//! Reference mechanical model: an axial bar network over the mesh edges.
//!
//! Every mesh edge is a bar with rest length taken from the input geometry
//! and axial stiffness k = EA / L₀. Under an optional gravity load the model
//! computes a per-vertex residual force
//!
//!   r_i = p_i + Σ_{bars (i,j)}  k (L − L₀) · (x_j − x_i)/L
//!
//! and predicts the deformation of each free vertex as u_i = c · r_i
//! (supports do not move, so u is zero at constrained vertices). Two loss
//! definitions are offered: the summed squared deformation norm over free
//! vertices, and the total elastic strain energy of the bars. Both come
//! with hand-coded analytic gradients; no AD framework.
//!
//! The model caches residuals and deformations between the loss evaluation
//! and the gradient/visualization uses within one iteration. The driver
//! calls [`BeamModel::clean_attributes`] at the end of each iteration to
//! drop that state; only a detached copy of the deformation magnitudes
//! survives for checkpoint coloring.

use crate::mesh::TriMesh;
use crate::terms::LossTerm;
use crate::types::{FormFindConfig, FormFindError, LossType};
use ndarray::Array2;
use std::cell::RefCell;

/// Axial stiffness numerator EA shared by all bars.
const UNIT_AXIAL_STIFFNESS: f64 = 1.0;

/// Deformation per unit residual force.
const COMPLIANCE: f64 = 1.0;

/// Bars shorter than this are treated as degenerate geometry.
const MIN_BAR_LENGTH: f64 = 1e-12;

// ─────────────────────────────────────────────────────────────
//  Per-iteration cache
// ─────────────────────────────────────────────────────────────

/// Mutable scratch refreshed each iteration.
///
/// `lengths` / `dirs` are the geometry-dependent shared precomputation;
/// `residuals` is only valid while `evaluated` holds. The deformation
/// magnitudes are a detached value snapshot that outlives the cleanup so a
/// checkpoint can color by the previous evaluation.
#[derive(Debug)]
struct ModelCache {
    lengths: Vec<f64>,
    dirs: Array2<f64>,
    residuals: Array2<f64>,
    evaluated: bool,
    deformation_magnitudes: Option<Vec<f64>>,
}

// ─────────────────────────────────────────────────────────────
//  BeamModel
// ─────────────────────────────────────────────────────────────

/// Differentiable bar-network model over a fixed mesh topology.
///
/// The cache sits behind a `RefCell` because [`LossTerm`] takes `&self`
/// while evaluation mutates scratch buffers; evaluation is single-threaded
/// so the borrows never overlap.
#[derive(Debug)]
pub struct BeamModel {
    pub weight: f64,
    loss_type: LossType,
    edges: Vec<(usize, usize)>,
    rest_lengths: Vec<f64>,
    stiffness: Vec<f64>,
    loads: Array2<f64>,
    free_mask: Vec<bool>,
    cache: RefCell<ModelCache>,
}

impl BeamModel {
    /// Build the bar network from the unperturbed mesh.
    ///
    /// Rest lengths come from the input geometry, so a mesh evaluated at
    /// its rest shape without load has exactly zero residual everywhere.
    pub fn new(mesh: &TriMesh, config: &FormFindConfig) -> Result<Self, FormFindError> {
        let nv = mesh.num_vertices();
        let edges: Vec<(usize, usize)> = mesh.edges().iter().map(|e| (e.start, e.end)).collect();

        let mut rest_lengths = Vec::with_capacity(edges.len());
        let mut stiffness = Vec::with_capacity(edges.len());
        for &(i, j) in &edges {
            let mut l2 = 0.0;
            for d in 0..3 {
                let diff = mesh.vertices[[j, d]] - mesh.vertices[[i, d]];
                l2 += diff * diff;
            }
            let l0 = l2.sqrt();
            if l0 < MIN_BAR_LENGTH {
                return Err(FormFindError::Model(format!(
                    "bar ({i}, {j}) has zero rest length"
                )));
            }
            rest_lengths.push(l0);
            stiffness.push(UNIT_AXIAL_STIFFNESS / l0);
        }

        let free_mask: Vec<bool> = mesh.vertex_is_constrained.iter().map(|&c| !c).collect();

        let mut loads = Array2::<f64>::zeros((nv, 3));
        if config.beam_have_load {
            for (v, &free) in free_mask.iter().enumerate() {
                if free {
                    loads[[v, 2]] = -config.load_magnitude;
                }
            }
        }

        let ne = edges.len();
        Ok(Self {
            weight: 1.0,
            loss_type: config.loss_type,
            edges,
            rest_lengths,
            stiffness,
            loads,
            free_mask,
            cache: RefCell::new(ModelCache {
                lengths: vec![0.0; ne],
                dirs: Array2::zeros((ne, 3)),
                residuals: Array2::zeros((nv, 3)),
                evaluated: false,
                deformation_magnitudes: None,
            }),
        })
    }

    /// Refresh the geometry-dependent shared precomputation (bar lengths
    /// and unit directions) from the current positions.
    pub fn refresh_geometry(&self, vertices: &Array2<f64>) -> Result<(), FormFindError> {
        let mut cache = self.cache.borrow_mut();
        for (e, &(i, j)) in self.edges.iter().enumerate() {
            let mut l2 = 0.0;
            let mut t = [0.0; 3];
            for d in 0..3 {
                t[d] = vertices[[j, d]] - vertices[[i, d]];
                l2 += t[d] * t[d];
            }
            let len = l2.sqrt();
            if len < MIN_BAR_LENGTH {
                return Err(FormFindError::Model(format!(
                    "bar ({i}, {j}) collapsed to zero length"
                )));
            }
            cache.lengths[e] = len;
            for d in 0..3 {
                cache.dirs[[e, d]] = t[d] / len;
            }
        }
        Ok(())
    }

    /// Residual forces for the refreshed geometry: external load plus the
    /// axial force sum at every vertex.
    fn compute_residuals(&self, cache: &mut ModelCache) {
        cache.residuals.assign(&self.loads);
        for (e, &(i, j)) in self.edges.iter().enumerate() {
            let f = self.stiffness[e] * (cache.lengths[e] - self.rest_lengths[e]);
            for d in 0..3 {
                let fv = f * cache.dirs[[e, d]];
                cache.residuals[[i, d]] += fv;
                cache.residuals[[j, d]] -= fv;
            }
        }
    }

    /// Predicted per-vertex deformations (N×3) from the last evaluation.
    ///
    /// `None` if no evaluation has happened since the last cleanup.
    pub fn deformations(&self) -> Option<Array2<f64>> {
        let cache = self.cache.borrow();
        if !cache.evaluated {
            return None;
        }
        let mut u = Array2::<f64>::zeros(cache.residuals.raw_dim());
        for (v, &free) in self.free_mask.iter().enumerate() {
            if free {
                for d in 0..3 {
                    u[[v, d]] = COMPLIANCE * cache.residuals[[v, d]];
                }
            }
        }
        Some(u)
    }

    /// Detached per-vertex deformation magnitudes from the most recent
    /// evaluation. Survives [`Self::clean_attributes`].
    pub fn deformation_magnitudes(&self) -> Option<Vec<f64>> {
        self.cache.borrow().deformation_magnitudes.clone()
    }

    /// Drop per-iteration cached state.
    ///
    /// Idempotent. The detached deformation-magnitude snapshot is kept for
    /// checkpoint coloring; everything else is invalidated so the next
    /// iteration starts from a fresh evaluation.
    pub fn clean_attributes(&self) {
        let mut cache = self.cache.borrow_mut();
        cache.evaluated = false;
        cache.residuals.fill(0.0);
    }

    fn loss_value(&self, cache: &ModelCache) -> f64 {
        match self.loss_type {
            LossType::Deformation => {
                let c2 = COMPLIANCE * COMPLIANCE;
                let mut total = 0.0;
                for (v, &free) in self.free_mask.iter().enumerate() {
                    if free {
                        for d in 0..3 {
                            let r = cache.residuals[[v, d]];
                            total += c2 * r * r;
                        }
                    }
                }
                self.weight * total
            }
            LossType::Stress => {
                let mut total = 0.0;
                for e in 0..self.edges.len() {
                    let stretch = cache.lengths[e] - self.rest_lengths[e];
                    total += 0.5 * self.stiffness[e] * stretch * stretch;
                }
                self.weight * total
            }
        }
    }
}

impl LossTerm for BeamModel {
    fn name(&self) -> &'static str {
        "beam"
    }

    fn loss(&self, vertices: &Array2<f64>) -> Result<f64, FormFindError> {
        self.refresh_geometry(vertices)?;
        let mut cache = self.cache.borrow_mut();
        self.compute_residuals(&mut cache);
        cache.evaluated = true;

        let mut mags = vec![0.0; self.free_mask.len()];
        for (v, &free) in self.free_mask.iter().enumerate() {
            if free {
                let mut n2 = 0.0;
                for d in 0..3 {
                    let u = COMPLIANCE * cache.residuals[[v, d]];
                    n2 += u * u;
                }
                mags[v] = n2.sqrt();
            }
        }
        cache.deformation_magnitudes = Some(mags);

        Ok(self.loss_value(&cache))
    }

    fn accumulate_gradient(
        &self,
        vertices: &Array2<f64>,
        grad: &mut Array2<f64>,
    ) -> Result<(), FormFindError> {
        let mut cache = self.cache.borrow_mut();
        if !cache.evaluated {
            // Standalone use: rebuild the scratch for this geometry.
            drop(cache);
            self.refresh_geometry(vertices)?;
            cache = self.cache.borrow_mut();
            self.compute_residuals(&mut cache);
            cache.evaluated = true;
        }

        match self.loss_type {
            LossType::Deformation => self.deformation_gradient(&cache, grad),
            LossType::Stress => self.stress_gradient(&cache, grad),
        }
        Ok(())
    }
}

impl BeamModel {
    /// dL/dx for L = w c² Σ_free ‖r_i‖².
    ///
    /// With a_i = 2 w c² r_i (zero at supports), each bar (i,j) contributes
    /// J(a_j − a_i) to vertex i and the negation to vertex j, where
    /// J = k [ I − (L₀/L)(I − ûûᵀ) ] is the symmetric force Jacobian.
    fn deformation_gradient(&self, cache: &ModelCache, grad: &mut Array2<f64>) {
        let scale = 2.0 * self.weight * COMPLIANCE * COMPLIANCE;

        for (e, &(i, j)) in self.edges.iter().enumerate() {
            let k = self.stiffness[e];
            let len = cache.lengths[e];
            let ratio = self.rest_lengths[e] / len;
            let u = [cache.dirs[[e, 0]], cache.dirs[[e, 1]], cache.dirs[[e, 2]]];

            let mut diff = [0.0; 3];
            for d in 0..3 {
                let ai = if self.free_mask[i] {
                    scale * cache.residuals[[i, d]]
                } else {
                    0.0
                };
                let aj = if self.free_mask[j] {
                    scale * cache.residuals[[j, d]]
                } else {
                    0.0
                };
                diff[d] = aj - ai;
            }

            // J·diff = k [ diff − ratio (diff − (û·diff) û) ]
            let u_dot = u[0] * diff[0] + u[1] * diff[1] + u[2] * diff[2];
            for d in 0..3 {
                let g = k * (diff[d] - ratio * (diff[d] - u_dot * u[d]));
                grad[[i, d]] += g;
                grad[[j, d]] -= g;
            }
        }
    }

    /// dL/dx for L = w Σ_e ½ k (L − L₀)²:  w k (L − L₀) û to the far end of
    /// each bar, the negation to the near end.
    fn stress_gradient(&self, cache: &ModelCache, grad: &mut Array2<f64>) {
        for (e, &(i, j)) in self.edges.iter().enumerate() {
            let s = self.weight * self.stiffness[e] * (cache.lengths[e] - self.rest_lengths[e]);
            for d in 0..3 {
                let g = s * cache.dirs[[e, d]];
                grad[[j, d]] += g;
                grad[[i, d]] -= g;
            }
        }
    }
}
