//! Displacement-field initialization.
//!
//! Produces the (F×3) field under one of four strategies. Randomness is an
//! explicit seeded source, never ambient global state, so noise
//! initializations are reproducible run-to-run.

use crate::mesh::TriMesh;
use crate::model::BeamModel;
use crate::terms::LossTerm;
use crate::types::{FormFindError, InitMode, INIT_NOISE_EPS};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};

/// Build the initial displacement field for the mesh's free vertices.
///
/// `free` lists the unconstrained vertex indices in row order; the result
/// has exactly one row per entry. Every strategy except `zeros` expects a
/// nonzero field and rejects a fully constrained mesh.
pub fn init_displacements(
    mode: InitMode,
    mesh: &TriMesh,
    model: &BeamModel,
    free: &[usize],
    seed: u64,
) -> Result<Array2<f64>, FormFindError> {
    if free.is_empty() && mode != InitMode::Zeros {
        return Err(FormFindError::Config(format!(
            "init_mode {mode:?} expects at least one free vertex, mesh has none"
        )));
    }

    let shape = (free.len(), 3);
    match mode {
        InitMode::Zeros => Ok(Array2::zeros(shape)),
        InitMode::Uniform => {
            let mut rng = StdRng::seed_from_u64(seed);
            let dist = Uniform::new(0.0, INIT_NOISE_EPS);
            Ok(Array2::from_shape_simple_fn(shape, || dist.sample(&mut rng)))
        }
        InitMode::Normal => {
            let mut rng = StdRng::seed_from_u64(seed);
            let dist = Normal::new(0.0, INIT_NOISE_EPS).map_err(|e| {
                FormFindError::Config(format!("invalid normal noise parameters: {e}"))
            })?;
            Ok(Array2::from_shape_simple_fn(shape, || dist.sample(&mut rng)))
        }
        InitMode::StressAided => {
            // One model evaluation against the unperturbed mesh; the field
            // starts as the negated predicted deformation.
            model.loss(&mesh.vertices)?;
            let deformations = model.deformations().ok_or_else(|| {
                FormFindError::Model("model produced no deformations for stress_aided init".into())
            })?;
            let mut field = Array2::zeros(shape);
            for (r, &v) in free.iter().enumerate() {
                for d in 0..3 {
                    field[[r, d]] = -deformations[[v, d]];
                }
            }
            model.clean_attributes();
            Ok(field)
        }
    }
}
