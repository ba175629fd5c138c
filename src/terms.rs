//! Differentiable loss terms and their composition.
//!
//! Each term is an evaluator from the current vertex positions to a scalar
//! loss, plus a hand-coded gradient accumulated into a shared N×3 buffer —
//! no AD framework. The objective composer is a plain sum over an ordered
//! list of enabled terms; any relative weighting lives inside each term.

use crate::types::FormFindError;
use ndarray::Array2;

// ─────────────────────────────────────────────────────────────
//  LossTerm trait
// ─────────────────────────────────────────────────────────────

/// A differentiable scalar term of the composed objective.
///
/// `accumulate_gradient` adds dL/d(vertex positions) into `grad` without
/// zeroing it, so terms compose by accumulation. A term may cache
/// intermediates from `loss` for reuse by the matching gradient call on the
/// same geometry within one iteration.
pub trait LossTerm {
    fn name(&self) -> &'static str;

    /// Scalar loss contribution for the given geometry.
    fn loss(&self, vertices: &Array2<f64>) -> Result<f64, FormFindError>;

    /// Accumulate dL/d(vertices) into `grad` (N×3).
    fn accumulate_gradient(
        &self,
        vertices: &Array2<f64>,
        grad: &mut Array2<f64>,
    ) -> Result<(), FormFindError>;
}

/// Composed objective value: the sum of all enabled terms.
pub fn composed_loss<'a, I>(terms: I, vertices: &Array2<f64>) -> Result<f64, FormFindError>
where
    I: IntoIterator<Item = &'a dyn LossTerm>,
{
    let mut total = 0.0;
    for term in terms {
        total += term.loss(vertices)?;
    }
    Ok(total)
}

/// Accumulate every term's gradient into `grad`.
pub fn accumulate_gradients<'a, I>(
    terms: I,
    vertices: &Array2<f64>,
    grad: &mut Array2<f64>,
) -> Result<(), FormFindError>
where
    I: IntoIterator<Item = &'a dyn LossTerm>,
{
    for term in terms {
        term.accumulate_gradient(vertices, grad)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  Laplacian smoothing
// ─────────────────────────────────────────────────────────────

/// Penalizes each vertex's deviation from its neighborhood centroid:
///
///   L = w · Σ_i ‖x_i − mean_{j ∈ N(i)} x_j‖²
#[derive(Debug, Clone)]
pub struct LaplacianSmoothing {
    pub weight: f64,
    neighbors: Vec<Vec<usize>>,
}

impl LaplacianSmoothing {
    pub fn new(neighbors: Vec<Vec<usize>>, weight: f64) -> Self {
        Self { weight, neighbors }
    }

    fn deviation(&self, vertices: &Array2<f64>, i: usize) -> Option<[f64; 3]> {
        let nbrs = &self.neighbors[i];
        if nbrs.is_empty() {
            return None;
        }
        let inv = 1.0 / nbrs.len() as f64;
        let mut c = [0.0; 3];
        for &j in nbrs {
            for d in 0..3 {
                c[d] += vertices[[j, d]] * inv;
            }
        }
        Some([
            vertices[[i, 0]] - c[0],
            vertices[[i, 1]] - c[1],
            vertices[[i, 2]] - c[2],
        ])
    }
}

impl LossTerm for LaplacianSmoothing {
    fn name(&self) -> &'static str {
        "laplacian_smooth"
    }

    fn loss(&self, vertices: &Array2<f64>) -> Result<f64, FormFindError> {
        let mut total = 0.0;
        for i in 0..vertices.nrows() {
            if let Some(dev) = self.deviation(vertices, i) {
                total += dot(dev, dev);
            }
        }
        Ok(self.weight * total)
    }

    fn accumulate_gradient(
        &self,
        vertices: &Array2<f64>,
        grad: &mut Array2<f64>,
    ) -> Result<(), FormFindError> {
        for i in 0..vertices.nrows() {
            let Some(dev) = self.deviation(vertices, i) else {
                continue;
            };
            let scale = 2.0 * self.weight;
            let nbr_scale = scale / self.neighbors[i].len() as f64;
            for d in 0..3 {
                grad[[i, d]] += scale * dev[d];
            }
            for &j in &self.neighbors[i] {
                for d in 0..3 {
                    grad[[j, d]] -= nbr_scale * dev[d];
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Normal consistency
// ─────────────────────────────────────────────────────────────

/// Penalizes misalignment of adjacent face normals across interior edges:
///
///   L = w · Σ_{(f,g) adjacent} (1 − n̂_f · n̂_g)
///
/// Pairs involving a (near-)degenerate face are skipped; their normal is
/// not defined.
#[derive(Debug, Clone)]
pub struct NormalConsistency {
    pub weight: f64,
    faces: Vec<[usize; 3]>,
    /// Interior-edge face pairs, built once from mesh connectivity.
    pairs: Vec<(usize, usize)>,
}

const DEGENERATE_AREA_EPS: f64 = 1e-12;

impl NormalConsistency {
    pub fn new(faces: Vec<[usize; 3]>, pairs: Vec<(usize, usize)>, weight: f64) -> Self {
        Self {
            weight,
            faces,
            pairs,
        }
    }

    /// Unnormalized face normal N = (b−a)×(c−a) and its length.
    fn face_normal(&self, vertices: &Array2<f64>, f: usize) -> ([f64; 3], f64) {
        let [a, b, c] = self.faces[f];
        let ab = sub(row(vertices, b), row(vertices, a));
        let ac = sub(row(vertices, c), row(vertices, a));
        let n = cross(ab, ac);
        let len = dot(n, n).sqrt();
        (n, len)
    }

    /// Accumulate d(gᵀn̂_f)/d(vertices of f) into `grad`, where `g` is the
    /// downstream gradient on the unit normal of face `f`.
    ///
    /// With N the unnormalized normal, δN = δa×(b−c) (and cyclic), so
    /// ∂(gᵀn̂)/∂a = (b−c) × Pg / |N| where Pg = (I − n̂n̂ᵀ)g.
    fn accumulate_normal_gradient(
        &self,
        vertices: &Array2<f64>,
        f: usize,
        n_unit: [f64; 3],
        n_len: f64,
        g: [f64; 3],
        grad: &mut Array2<f64>,
    ) {
        let [a, b, c] = self.faces[f];
        let pg = sub(g, scale(n_unit, dot(g, n_unit)));
        let inv = 1.0 / n_len;

        let edge_opposite = [
            sub(row(vertices, b), row(vertices, c)), // for vertex a
            sub(row(vertices, c), row(vertices, a)), // for vertex b
            sub(row(vertices, a), row(vertices, b)), // for vertex c
        ];
        for (k, &v) in [a, b, c].iter().enumerate() {
            let contrib = cross(edge_opposite[k], pg);
            for d in 0..3 {
                grad[[v, d]] += inv * contrib[d];
            }
        }
    }
}

impl LossTerm for NormalConsistency {
    fn name(&self) -> &'static str {
        "normal_consistency"
    }

    fn loss(&self, vertices: &Array2<f64>) -> Result<f64, FormFindError> {
        let mut total = 0.0;
        for &(fa, fb) in &self.pairs {
            let (na, la) = self.face_normal(vertices, fa);
            let (nb, lb) = self.face_normal(vertices, fb);
            if la < DEGENERATE_AREA_EPS || lb < DEGENERATE_AREA_EPS {
                continue;
            }
            total += 1.0 - dot(scale(na, 1.0 / la), scale(nb, 1.0 / lb));
        }
        Ok(self.weight * total)
    }

    fn accumulate_gradient(
        &self,
        vertices: &Array2<f64>,
        grad: &mut Array2<f64>,
    ) -> Result<(), FormFindError> {
        for &(fa, fb) in &self.pairs {
            let (na, la) = self.face_normal(vertices, fa);
            let (nb, lb) = self.face_normal(vertices, fb);
            if la < DEGENERATE_AREA_EPS || lb < DEGENERATE_AREA_EPS {
                continue;
            }
            let na_u = scale(na, 1.0 / la);
            let nb_u = scale(nb, 1.0 / lb);

            // d(1 − n̂_a·n̂_b)/dn̂_a = −n̂_b  (and symmetrically for b)
            let ga = scale(nb_u, -self.weight);
            let gb = scale(na_u, -self.weight);
            self.accumulate_normal_gradient(vertices, fa, na_u, la, ga, grad);
            self.accumulate_normal_gradient(vertices, fb, nb_u, lb, gb, grad);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Small vector helpers
// ─────────────────────────────────────────────────────────────

#[inline]
pub(crate) fn row(vertices: &Array2<f64>, i: usize) -> [f64; 3] {
    [vertices[[i, 0]], vertices[[i, 1]], vertices[[i, 2]]]
}

#[inline]
pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub(crate) fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}
