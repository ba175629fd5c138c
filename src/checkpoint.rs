//! Scheduled, state-preserving checkpoint actions.
//!
//! At the configured cadence the scheduler renders the mesh through an
//! attached [`Visualizer`] and/or exports a PLY snapshot named
//! `<label>_<iteration>.ply`, with the deformation magnitude carried as a
//! per-vertex quality attribute. Both actions only read optimization
//! state; failures are surfaced to the driver, which logs them as warnings
//! unless configured fatal.

use crate::mesh::TriMesh;
use crate::types::{FormFindConfig, FormFindError};
use std::path::PathBuf;

/// Seam for the external rendering backend.
///
/// `colors` is the per-vertex deformation magnitude when an evaluation has
/// happened; `None` before the first one (the mesh renders uncolored).
pub trait Visualizer {
    fn plot(&mut self, mesh: &TriMesh, colors: Option<&[f64]>) -> Result<(), FormFindError>;
}

#[derive(Debug, Clone)]
pub struct CheckpointScheduler {
    plot: bool,
    save: bool,
    interval: usize,
    label: String,
}

impl CheckpointScheduler {
    pub fn from_config(config: &FormFindConfig) -> Self {
        Self {
            plot: config.plot,
            save: config.save,
            interval: config.plot_save_interval,
            label: config.save_label.clone(),
        }
    }

    /// Whether any checkpoint action fires at this iteration.
    pub fn due(&self, iteration: usize) -> bool {
        (self.plot || self.save) && self.interval > 0 && iteration % self.interval == 0
    }

    /// Snapshot file path for an iteration: `<label>_<iteration>.ply`.
    pub fn snapshot_path(&self, iteration: usize) -> PathBuf {
        PathBuf::from(format!("{}_{}.ply", self.label, iteration))
    }

    /// Execute the enabled actions. Strictly observational: the mesh and
    /// magnitudes are read-only borrows.
    pub fn run(
        &self,
        mesh: &TriMesh,
        magnitudes: Option<&[f64]>,
        iteration: usize,
        visualizer: Option<&mut (dyn Visualizer + '_)>,
    ) -> Result<(), FormFindError> {
        if self.plot {
            if let Some(viz) = visualizer {
                viz.plot(mesh, magnitudes)?;
            }
        }
        if self.save {
            mesh.save_ply(&self.snapshot_path(iteration), magnitudes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(interval: usize) -> CheckpointScheduler {
        CheckpointScheduler {
            plot: false,
            save: true,
            interval,
            label: "run".into(),
        }
    }

    #[test]
    fn cadence_fires_on_multiples() {
        let s = scheduler(4);
        let due: Vec<usize> = (0..10).filter(|&i| s.due(i)).collect();
        assert_eq!(due, vec![0, 4, 8]);
    }

    #[test]
    fn zero_interval_never_fires() {
        let s = scheduler(0);
        assert!((0..10).all(|i| !s.due(i)));
    }

    #[test]
    fn snapshot_naming() {
        let s = scheduler(4);
        assert_eq!(s.snapshot_path(8), PathBuf::from("run_8.ply"));
    }
}
