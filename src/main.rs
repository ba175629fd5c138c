//! Command-line front end for a form-finding run.

use clap::Parser;
use formfind::driver::FormFinder;
use formfind::mesh::TriMesh;
use formfind::types::{FormFindConfig, FormFindError};
use std::path::PathBuf;

/// Gradient-based form-finding of a grid-shell mesh.
#[derive(Debug, Parser)]
#[command(name = "formfind", version, about)]
struct Args {
    /// Source mesh file (ASCII PLY).
    path: PathBuf,

    /// Learning rate for the gradient step engine.
    #[arg(long, default_value_t = 1e-4)]
    lr: f64,

    /// Momentum coefficient (sgd rule only).
    #[arg(long, default_value_t = 0.9)]
    momentum: f64,

    /// Compute target for numeric arrays (only `cpu`).
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Displacement initialization: zeros | uniform | normal | stress_aided.
    #[arg(long, default_value = "zeros")]
    init_mode: String,

    /// Whether the mechanical model applies an external load.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    beam_have_load: bool,

    /// Per-vertex downward load magnitude.
    #[arg(long, default_value_t = 1.0)]
    load_magnitude: f64,

    /// Enable the Laplacian smoothing regularization term.
    #[arg(long)]
    with_laplacian_smooth: bool,

    /// Enable the normal-consistency regularization term.
    #[arg(long)]
    with_normal_consistency: bool,

    /// Total iteration count.
    #[arg(long, default_value_t = 500)]
    n_iter: usize,

    /// Mechanical loss definition: deformation | stress.
    #[arg(long, default_value = "deformation")]
    loss_type: String,

    /// Update rule: sgd | adam.
    #[arg(long, default_value = "sgd")]
    update_rule: String,

    /// Enable visualization checkpoints.
    #[arg(long)]
    plot: bool,

    /// Enable mesh-snapshot export checkpoints.
    #[arg(long)]
    save: bool,

    /// Cadence (iterations) for both checkpoint actions.
    #[arg(long, default_value_t = 100)]
    plot_save_interval: usize,

    /// Cadence (iterations) for console progress lines.
    #[arg(long, default_value_t = 1)]
    display_interval: usize,

    /// Filename prefix for exported snapshots.
    #[arg(long, default_value = "formfind")]
    save_label: String,

    /// RNG seed for the noise initializers.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Abort the run on checkpoint I/O failure instead of warning.
    #[arg(long)]
    fatal_checkpoint_errors: bool,
}

impl Args {
    fn into_config(self) -> Result<(PathBuf, FormFindConfig), FormFindError> {
        let config = FormFindConfig {
            path: Some(self.path.clone()),
            lr: self.lr,
            momentum: self.momentum,
            device: self.device,
            init_mode: self.init_mode.parse()?,
            beam_have_load: self.beam_have_load,
            load_magnitude: self.load_magnitude,
            with_laplacian_smooth: self.with_laplacian_smooth,
            with_normal_consistency: self.with_normal_consistency,
            n_iter: self.n_iter,
            loss_type: self.loss_type.parse()?,
            update_rule: self.update_rule.parse()?,
            plot: self.plot,
            save: self.save,
            plot_save_interval: self.plot_save_interval,
            display_interval: self.display_interval,
            save_label: self.save_label,
            seed: self.seed,
            fatal_checkpoint_errors: self.fatal_checkpoint_errors,
        };
        Ok((self.path, config))
    }
}

fn run() -> Result<(), FormFindError> {
    let (path, config) = Args::parse().into_config()?;
    let mesh = TriMesh::load_ply(&path)?;
    log::debug!(
        "loaded {} vertices, {} faces, {} free",
        mesh.num_vertices(),
        mesh.faces.len(),
        mesh.free_indices().len()
    );

    let mut finder = FormFinder::new(mesh, config)?;
    let summary = finder.run()?;
    if let Some(loss) = summary.final_loss() {
        println!("Finished {} iterations, final loss {loss}", summary.iterations);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
