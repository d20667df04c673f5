//! Gridflow advances transport equations (momentum and scalars) on a
//! block-structured adaptive mesh, in the style of Berger-Oliger AMR. Each
//! equation is a bundle of fields in a shared registry, combined by
//! pluggable advection (Godunov or method of lines), diffusion (scalar or
//! tensor, explicit to fully implicit), a MAC projection of the advecting
//! face velocities, and a right-hand-side assembly for predictor and
//! corrector stages. Levels are uniform Cartesian grids partitioned into
//! rectangular blocks; every finer level is nested inside the next coarser
//! one.

pub mod advection;
pub mod boundary;
pub mod config;
pub mod diffusion;
pub mod error;
pub mod field;
pub mod flux_average;
pub mod index_space;
pub mod linear_operator;
pub mod linear_solver;
pub mod mesh;
pub mod mesh_mapping;
pub mod meshing;
pub mod patch;
pub mod pde;
pub mod projection;
pub mod rhs;
pub mod time_step;
pub mod turbulence;

pub use config::Config;
pub use error::{Error, Result};
pub use field::{FieldId, FieldRepo, FieldState};
pub use pde::{PdeFields, PdeInfo, PdeSystem};
