use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every function in the public API returns `Result<T, FormFindError>`
/// instead of panicking. Configuration and numeric errors abort a run;
/// checkpoint I/O errors are downgraded to warnings by the driver unless
/// configured fatal.
#[derive(Debug)]
pub enum FormFindError {
    /// Invalid configuration value; the message names the offending option.
    Config(String),
    /// Mesh file is malformed or inconsistent.
    MeshFormat(String),
    /// Mechanical model failure (degenerate geometry, zero-length bar, ...).
    Model(String),
    /// Objective evaluated to a non-finite value — the run has diverged.
    NonFiniteLoss { iteration: usize, value: f64 },
    /// A gradient component is non-finite at the given iteration.
    NonFiniteGradient { iteration: usize },
    /// I/O failure (mesh load, snapshot export).
    Io(std::io::Error),
}

impl fmt::Display for FormFindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::MeshFormat(msg) => write!(f, "mesh format error: {msg}"),
            Self::Model(msg) => write!(f, "mechanical model error: {msg}"),
            Self::NonFiniteLoss { iteration, value } => {
                write!(f, "non-finite loss {value} at iteration {iteration}")
            }
            Self::NonFiniteGradient { iteration } => {
                write!(f, "non-finite gradient at iteration {iteration}")
            }
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for FormFindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FormFindError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ─────────────────────────────────────────────────────────────
//  Selector enums
// ─────────────────────────────────────────────────────────────

/// Strategy for producing the initial displacement field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitMode {
    /// All-zero field: the first iteration sees the unperturbed mesh.
    #[default]
    Zeros,
    /// Symmetry-breaking noise, each component uniform over `[0, ε)`.
    Uniform,
    /// Symmetry-breaking noise, each component Gaussian with σ = ε.
    Normal,
    /// Negated model deformations on the unperturbed mesh.
    StressAided,
}

impl FromStr for InitMode {
    type Err = FormFindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zeros" => Ok(Self::Zeros),
            "uniform" => Ok(Self::Uniform),
            "normal" => Ok(Self::Normal),
            "stress_aided" => Ok(Self::StressAided),
            other => Err(FormFindError::Config(format!(
                "unrecognized init_mode '{other}' (expected zeros | uniform | normal | stress_aided)"
            ))),
        }
    }
}

/// Mechanical-model loss definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossType {
    /// Sum of squared predicted deformation norms over free vertices.
    #[default]
    Deformation,
    /// Total elastic strain energy of the bars (stress-based measure).
    Stress,
}

impl FromStr for LossType {
    type Err = FormFindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deformation" => Ok(Self::Deformation),
            "stress" => Ok(Self::Stress),
            other => Err(FormFindError::Config(format!(
                "unrecognized loss_type '{other}' (expected deformation | stress)"
            ))),
        }
    }
}

/// First-order update rule for the gradient step engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateRule {
    /// Momentum-accelerated gradient descent: v ← μv + g, p ← p − lr·v.
    #[default]
    Sgd,
    /// Adaptive moment estimation with bias correction.
    Adam,
}

impl FromStr for UpdateRule {
    type Err = FormFindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sgd" => Ok(Self::Sgd),
            "adam" => Ok(Self::Adam),
            other => Err(FormFindError::Config(format!(
                "unrecognized update_rule '{other}' (expected sgd | adam)"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Configuration
// ─────────────────────────────────────────────────────────────

/// Noise amplitude ε for the `uniform` / `normal` initializers.
pub const INIT_NOISE_EPS: f64 = 1e-6;

/// Full configuration surface of a form-finding run.
///
/// `path` is only consulted by the CLI; library users construct the mesh
/// themselves and hand it to [`crate::driver::FormFinder::new`].
#[derive(Debug, Clone)]
pub struct FormFindConfig {
    /// Source mesh file (ASCII PLY).
    pub path: Option<PathBuf>,
    /// Learning rate for the gradient step engine.
    pub lr: f64,
    /// Momentum coefficient (SGD rule only).
    pub momentum: f64,
    /// Compute target for numeric arrays. Only `cpu` is supported.
    pub device: String,
    /// Displacement-field initialization strategy.
    pub init_mode: InitMode,
    /// Whether the mechanical model applies an external (gravity) load.
    pub beam_have_load: bool,
    /// Magnitude of the per-vertex downward load when `beam_have_load`.
    pub load_magnitude: f64,
    /// Enable the Laplacian smoothing regularization term.
    pub with_laplacian_smooth: bool,
    /// Enable the normal-consistency regularization term.
    pub with_normal_consistency: bool,
    /// Total iteration count.
    pub n_iter: usize,
    /// Mechanical-model loss definition.
    pub loss_type: LossType,
    /// Update rule for the step engine.
    pub update_rule: UpdateRule,
    /// Enable visualization checkpoints.
    pub plot: bool,
    /// Enable mesh-snapshot export checkpoints.
    pub save: bool,
    /// Cadence (iterations) for both checkpoint actions.
    pub plot_save_interval: usize,
    /// Cadence (iterations) for console progress lines.
    pub display_interval: usize,
    /// Filename prefix for exported snapshots.
    pub save_label: String,
    /// RNG seed for the noise initializers.
    pub seed: u64,
    /// Treat checkpoint I/O failures as fatal instead of warnings.
    pub fatal_checkpoint_errors: bool,
}

impl Default for FormFindConfig {
    fn default() -> Self {
        Self {
            path: None,
            lr: 1e-4,
            momentum: 0.9,
            device: "cpu".into(),
            init_mode: InitMode::Zeros,
            beam_have_load: true,
            load_magnitude: 1.0,
            with_laplacian_smooth: false,
            with_normal_consistency: false,
            n_iter: 500,
            loss_type: LossType::Deformation,
            update_rule: UpdateRule::Sgd,
            plot: false,
            save: false,
            plot_save_interval: 100,
            display_interval: 1,
            save_label: "formfind".into(),
            seed: 0,
            fatal_checkpoint_errors: false,
        }
    }
}

impl FormFindConfig {
    /// Validate option values not already covered by enum parsing.
    ///
    /// Runs before iteration 0; every rejection names the offending option.
    pub fn validate(&self) -> Result<(), FormFindError> {
        if self.device != "cpu" {
            return Err(FormFindError::Config(format!(
                "unsupported device '{}' (only 'cpu' is available)",
                self.device
            )));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(FormFindError::Config(format!(
                "lr must be a positive finite number, got {}",
                self.lr
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(FormFindError::Config(format!(
                "momentum must lie in [0, 1), got {}",
                self.momentum
            )));
        }
        if !(self.load_magnitude.is_finite() && self.load_magnitude >= 0.0) {
            return Err(FormFindError::Config(format!(
                "load_magnitude must be non-negative and finite, got {}",
                self.load_magnitude
            )));
        }
        Ok(())
    }
}
