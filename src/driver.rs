//! The form-finding optimization loop.
//!
//! [`FormFinder`] owns one run: the mesh, the constraint partition, the
//! displacement field, the mechanical model, the enabled regularizers, and
//! the gradient step engine. Each iteration executes a fixed sequence:
//! clear gradient state, apply displacements to free vertices, refresh the
//! model's geometry precomputation, checkpoint, evaluate the composed
//! objective, report progress, accumulate gradients, step, clean the
//! model's per-iteration caches. Constrained vertices are never written,
//! so their positions stay bit-identical to setup for the whole run.

use crate::checkpoint::{CheckpointScheduler, Visualizer};
use crate::engine::DescentEngine;
use crate::init::init_displacements;
use crate::mesh::TriMesh;
use crate::model::BeamModel;
use crate::terms::{LaplacianSmoothing, LossTerm, NormalConsistency};
use crate::types::{FormFindConfig, FormFindError};
use ndarray::Array2;

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations: usize,
    /// Objective value per iteration, in order.
    pub loss_trace: Vec<f64>,
}

impl RunSummary {
    pub fn final_loss(&self) -> Option<f64> {
        self.loss_trace.last().copied()
    }
}

pub struct FormFinder {
    config: FormFindConfig,
    mesh: TriMesh,
    model: BeamModel,
    regularizers: Vec<Box<dyn LossTerm>>,
    /// Free (optimizable) vertex indices; row r of the displacement field
    /// belongs to vertex `free[r]`. Fixed for the lifetime of the run.
    free: Vec<usize>,
    displacements: Array2<f64>,
    engine: DescentEngine,
    /// dL/d(vertex positions) scratch, N×3. Rows of constrained vertices
    /// are accumulated but never reach the engine.
    grad_x: Array2<f64>,
    scheduler: CheckpointScheduler,
    visualizer: Option<Box<dyn Visualizer>>,
}

impl FormFinder {
    /// Set up a run: validate configuration, derive the constraint
    /// partition, build the model and enabled regularizers, and initialize
    /// the displacement field.
    ///
    /// All configuration errors surface here, before iteration 0.
    pub fn new(mesh: TriMesh, config: FormFindConfig) -> Result<Self, FormFindError> {
        config.validate()?;

        let free = mesh.free_indices();
        let model = BeamModel::new(&mesh, &config)?;
        let displacements = init_displacements(config.init_mode, &mesh, &model, &free, config.seed)?;

        let mut regularizers: Vec<Box<dyn LossTerm>> = Vec::new();
        if config.with_laplacian_smooth {
            regularizers.push(Box::new(LaplacianSmoothing::new(
                mesh.neighbors().to_vec(),
                1.0,
            )));
        }
        if config.with_normal_consistency {
            let pairs: Vec<(usize, usize)> = mesh
                .edges()
                .iter()
                .filter_map(|e| match e.faces {
                    [Some(a), Some(b)] => Some((a, b)),
                    _ => None,
                })
                .collect();
            regularizers.push(Box::new(NormalConsistency::new(
                mesh.faces.clone(),
                pairs,
                1.0,
            )));
        }

        let engine = DescentEngine::new(config.update_rule, config.lr, config.momentum, free.len());
        let grad_x = Array2::zeros((mesh.num_vertices(), 3));
        let scheduler = CheckpointScheduler::from_config(&config);

        Ok(Self {
            config,
            mesh,
            model,
            regularizers,
            free,
            displacements,
            engine,
            grad_x,
            scheduler,
            visualizer: None,
        })
    }

    /// Attach an external rendering backend for `plot` checkpoints.
    pub fn with_visualizer(mut self, visualizer: Box<dyn Visualizer>) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }

    pub fn model(&self) -> &BeamModel {
        &self.model
    }

    /// Free vertex indices, in displacement-field row order.
    pub fn free_vertices(&self) -> &[usize] {
        &self.free
    }

    /// Current displacement field (F×3).
    pub fn displacements(&self) -> &Array2<f64> {
        &self.displacements
    }

    /// Run `n_iter` iterations synchronously.
    ///
    /// Non-finite loss or gradient aborts with an error; checkpoint I/O
    /// failures are logged and skipped unless `fatal_checkpoint_errors`.
    pub fn run(&mut self) -> Result<RunSummary, FormFindError> {
        let n_iter = self.config.n_iter;
        let mut loss_trace = Vec::with_capacity(n_iter);

        for iteration in 0..n_iter {
            // 1. Clear gradient state from the previous iteration.
            self.engine.zero_grad();
            self.grad_x.fill(0.0);

            // 2. Apply the displacement field to free vertices only.
            for (r, &v) in self.free.iter().enumerate() {
                for d in 0..3 {
                    self.mesh.vertices[[v, d]] += self.displacements[[r, d]];
                }
            }

            // 3. Refresh the model's geometry-dependent precomputation.
            self.model.refresh_geometry(&self.mesh.vertices)?;

            // 4. Checkpoint (read-only; colors come from the previous
            //    evaluation, or nothing before the first one).
            if self.scheduler.due(iteration) {
                let magnitudes = self.model.deformation_magnitudes();
                let outcome = self.scheduler.run(
                    &self.mesh,
                    magnitudes.as_deref(),
                    iteration,
                    self.visualizer.as_deref_mut(),
                );
                if let Err(e) = outcome {
                    if self.config.fatal_checkpoint_errors {
                        return Err(e);
                    }
                    log::warn!("checkpoint at iteration {iteration} failed: {e}");
                }
            }

            // 5. Evaluate the composed objective.
            let loss = self.eval_loss()?;
            if !loss.is_finite() {
                return Err(FormFindError::NonFiniteLoss {
                    iteration,
                    value: loss,
                });
            }
            loss_trace.push(loss);

            // 6. Operator-facing progress line.
            if self.config.display_interval > 0 && iteration % self.config.display_interval == 0 {
                println!("Iteration: {iteration} Loss: {loss}");
            }

            // 7. Accumulate dL/d(displacements) into the engine.
            self.backward()?;
            if self.engine.grad().iter().any(|g| !g.is_finite()) {
                return Err(FormFindError::NonFiniteGradient { iteration });
            }

            // 8. One descent step, mutating the displacement field in place.
            self.engine.step(&mut self.displacements);

            // 9. Drop per-iteration model caches; the next iteration starts
            //    from a fresh, history-free evaluation.
            self.model.clean_attributes();
        }

        Ok(RunSummary {
            iterations: n_iter,
            loss_trace,
        })
    }

    /// Mechanical loss plus every enabled regularizer, summed.
    fn eval_loss(&self) -> Result<f64, FormFindError> {
        let mut total = self.model.loss(&self.mesh.vertices)?;
        for term in &self.regularizers {
            total += term.loss(&self.mesh.vertices)?;
        }
        Ok(total)
    }

    /// Accumulate every term's gradient over vertex positions, then gather
    /// the free rows into the engine's gradient buffer.
    fn backward(&mut self) -> Result<(), FormFindError> {
        self.model
            .accumulate_gradient(&self.mesh.vertices, &mut self.grad_x)?;
        for term in &self.regularizers {
            term.accumulate_gradient(&self.mesh.vertices, &mut self.grad_x)?;
        }

        let grad = self.engine.grad_mut();
        for (r, &v) in self.free.iter().enumerate() {
            for d in 0..3 {
                grad[[r, d]] += self.grad_x[[v, d]];
            }
        }
        Ok(())
    }
}
