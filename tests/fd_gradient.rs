//! Finite-difference gradient tests for every analytic gradient in the
//! crate: both mechanical losses and both regularizers.
//!
//! Tests build a small n×n grid-shell (boundary pinned, interior free) and
//! compare each component of the analytic gradient against a central
//! difference:
//!
//!     dL/dx_i  ≈  [ L(x + h eᵢ) − L(x − h eᵢ) ] / 2h
//!
//! The geometry is lifted out of plane before checking so no term sits at
//! a symmetric critical point.

use formfind::mesh::TriMesh;
use formfind::model::BeamModel;
use formfind::terms::{LaplacianSmoothing, LossTerm, NormalConsistency};
use formfind::types::{FormFindConfig, LossType};
use ndarray::Array2;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// n×n unit-spaced grid in the z=0 plane, two triangles per cell.
/// Boundary detection pins the rim; interior vertices are free.
fn grid_mesh(n: usize) -> TriMesh {
    let mut vertices = Array2::<f64>::zeros((n * n, 3));
    for i in 0..n {
        for j in 0..n {
            let v = i * n + j;
            vertices[[v, 0]] = j as f64;
            vertices[[v, 1]] = i as f64;
        }
    }
    let mut faces = Vec::new();
    for i in 0..n - 1 {
        for j in 0..n - 1 {
            let a = i * n + j;
            let b = a + 1;
            let c = a + n;
            let d = a + n + 1;
            faces.push([a, b, d]);
            faces.push([a, d, c]);
        }
    }
    TriMesh::from_parts(vertices, faces, None).unwrap()
}

/// Deterministic out-of-plane perturbation so gradients are nontrivial.
fn lifted_positions(mesh: &TriMesh) -> Array2<f64> {
    let mut x = mesh.vertices.clone();
    for v in 0..x.nrows() {
        if !mesh.vertex_is_constrained[v] {
            x[[v, 2]] += 0.3 + 0.1 * (v as f64).sin();
            x[[v, 0]] += 0.05 * (v as f64 * 1.7).cos();
        }
    }
    x
}

/// Central-difference check of `term`'s gradient at `x`.
fn fd_check(term: &dyn LossTerm, x: &Array2<f64>, h: f64, tol_abs: f64, tol_rel: f64) {
    let mut analytic = Array2::<f64>::zeros(x.raw_dim());
    term.accumulate_gradient(x, &mut analytic).unwrap();

    let mut max_abs = 0.0_f64;
    let mut max_rel = 0.0_f64;
    for v in 0..x.nrows() {
        for d in 0..3 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[[v, d]] += h;
            xm[[v, d]] -= h;
            let fd = (term.loss(&xp).unwrap() - term.loss(&xm).unwrap()) / (2.0 * h);

            let a = analytic[[v, d]];
            let abs_err = (a - fd).abs();
            let rel_err = abs_err / fd.abs().max(a.abs()).max(1e-14);
            max_abs = max_abs.max(abs_err);
            max_rel = max_rel.max(rel_err);
            assert!(
                abs_err < tol_abs || rel_err < tol_rel,
                "{}: component ({v}, {d}): analytic={a:.8e}, fd={fd:.8e}, \
                 abs_err={abs_err:.3e}, rel_err={rel_err:.3e}",
                term.name(),
            );
        }
    }
    eprintln!(
        "{}: max |g_a - g_fd| = {max_abs:.3e}, max rel = {max_rel:.3e}",
        term.name()
    );
}

fn loaded_config(loss_type: LossType) -> FormFindConfig {
    FormFindConfig {
        beam_have_load: true,
        load_magnitude: 1.0,
        loss_type,
        ..FormFindConfig::default()
    }
}

// ─────────────────────────────────────────────────────────────
//  Mechanical model
// ─────────────────────────────────────────────────────────────

#[test]
fn beam_deformation_gradient_matches_fd() {
    let mesh = grid_mesh(4);
    let model = BeamModel::new(&mesh, &loaded_config(LossType::Deformation)).unwrap();
    let x = lifted_positions(&mesh);
    fd_check(&model, &x, 1e-6, 1e-5, 1e-5);
}

#[test]
fn beam_stress_gradient_matches_fd() {
    let mesh = grid_mesh(4);
    let model = BeamModel::new(&mesh, &loaded_config(LossType::Stress)).unwrap();
    let x = lifted_positions(&mesh);
    fd_check(&model, &x, 1e-6, 1e-5, 1e-5);
}

#[test]
fn beam_deformation_gradient_without_load() {
    let mesh = grid_mesh(4);
    let config = FormFindConfig {
        beam_have_load: false,
        ..loaded_config(LossType::Deformation)
    };
    let model = BeamModel::new(&mesh, &config).unwrap();
    let x = lifted_positions(&mesh);
    fd_check(&model, &x, 1e-6, 1e-5, 1e-5);
}

// ─────────────────────────────────────────────────────────────
//  Regularizers
// ─────────────────────────────────────────────────────────────

#[test]
fn laplacian_gradient_matches_fd() {
    let mesh = grid_mesh(4);
    let term = LaplacianSmoothing::new(mesh.neighbors().to_vec(), 1.0);
    let x = lifted_positions(&mesh);
    fd_check(&term, &x, 1e-6, 1e-6, 1e-6);
}

#[test]
fn normal_consistency_gradient_matches_fd() {
    let mesh = grid_mesh(4);
    let pairs: Vec<(usize, usize)> = mesh
        .edges()
        .iter()
        .filter_map(|e| match e.faces {
            [Some(a), Some(b)] => Some((a, b)),
            _ => None,
        })
        .collect();
    assert!(!pairs.is_empty());
    let term = NormalConsistency::new(mesh.faces.clone(), pairs, 1.0);
    let x = lifted_positions(&mesh);
    fd_check(&term, &x, 1e-6, 1e-6, 1e-5);
}

#[test]
fn flat_rest_geometry_is_a_critical_point() {
    // Unloaded mesh at its rest shape: zero loss, zero gradient, for both
    // mechanical losses.
    let mesh = grid_mesh(4);
    for loss_type in [LossType::Deformation, LossType::Stress] {
        let config = FormFindConfig {
            beam_have_load: false,
            ..loaded_config(loss_type)
        };
        let model = BeamModel::new(&mesh, &config).unwrap();
        assert_eq!(model.loss(&mesh.vertices).unwrap(), 0.0);
        let mut grad = Array2::<f64>::zeros(mesh.vertices.raw_dim());
        model.accumulate_gradient(&mesh.vertices, &mut grad).unwrap();
        assert!(grad.iter().all(|&g| g == 0.0));
    }
}
