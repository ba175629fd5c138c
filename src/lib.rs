//! **formfind** — gradient-based form-finding for grid-shell meshes.
//!
//! The crate implements the complete optimization pipeline:
//!
//! 1. **Mesh** (`mesh`): triangle mesh, support constraints, ASCII PLY I/O.
//! 2. **Model** (`model`): differentiable axial bar network with hand-coded
//!    gradients (deformation and stress losses).
//! 3. **Terms** (`terms`): loss-term trait, Laplacian smoothing and
//!    normal-consistency regularizers, summation composer.
//! 4. **Engine** (`engine`): momentum SGD / Adam step over the
//!    displacement field.
//! 5. **Driver** (`driver`): the per-iteration optimization loop with
//!    checkpoint scheduling (`checkpoint`) and seeded initialization
//!    (`init`).

pub mod checkpoint;
pub mod driver;
pub mod engine;
pub mod init;
pub mod mesh;
pub mod model;
pub mod terms;
pub mod types;
