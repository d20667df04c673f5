use std::str::FromStr;
use log::warn;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::linear_solver::SolverOptions;




/**
 * Time integration of the diffusion term
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffusionType {
    Explicit,
    CrankNicolson,
    Implicit,
}




// ============================================================================
impl DiffusionType {


    /**
     * Weight of the old diffusion term in the predictor.
     */
    pub fn predictor_factor(self) -> f64 {
        match self {
            DiffusionType::Explicit => 1.0,
            DiffusionType::CrankNicolson => 0.5,
            DiffusionType::Implicit => 0.0,
        }
    }


    /**
     * Weights of the old and new diffusion terms in the corrector.
     */
    pub fn corrector_factors(self) -> (f64, f64) {
        match self {
            DiffusionType::Explicit => (0.5, 0.5),
            DiffusionType::CrankNicolson => (0.5, 0.0),
            DiffusionType::Implicit => (0.0, 0.0),
        }
    }


    /**
     * Fraction of the time step treated implicitly, if any.
     */
    pub fn implicit_factor(self) -> Option<f64> {
        match self {
            DiffusionType::Explicit => None,
            DiffusionType::CrankNicolson => Some(0.5),
            DiffusionType::Implicit => Some(1.0),
        }
    }
}

impl FromStr for DiffusionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "explicit" | "0" => Ok(DiffusionType::Explicit),
            "crank_nicolson" | "crank-nicolson" | "cn" | "1" => Ok(DiffusionType::CrankNicolson),
            "implicit" | "2" => Ok(DiffusionType::Implicit),
            _ => Err(Error::config(format!("invalid diffusion type '{}'", s))),
        }
    }
}




/**
 * Advection strategy
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    Godunov,
    Mol,
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "godunov" => Ok(Scheme::Godunov),
            "mol" | "method_of_lines" => Ok(Scheme::Mol),
            _ => Err(Error::config(format!("invalid advection scheme '{}'", s))),
        }
    }
}




/**
 * Edge-state reconstruction used by the Godunov scheme
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GodunovScheme {
    Plm,
    Ppm,
    PpmNoLimiter,
    WenoJs,
    WenoZ,
}




// ============================================================================
impl GodunovScheme {


    /**
     * Resolve a scheme name. Unknown names fall back to PPM with a warning.
     */
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "plm" => GodunovScheme::Plm,
            "ppm" => GodunovScheme::Ppm,
            "ppm_nolim" => GodunovScheme::PpmNoLimiter,
            "weno" | "weno_js" => GodunovScheme::WenoJs,
            "weno_z" => GodunovScheme::WenoZ,
            other => {
                warn!("godunov_type '{}' is not recognized; using ppm", other);
                GodunovScheme::Ppm
            }
        }
    }
}




/**
 * Run-time options of the PDE advance. Every field has a default, so a
 * partial document deserializes.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub diffusion_type: DiffusionType,
    pub scheme: Scheme,
    pub godunov_type: String,
    pub godunov_use_forces_in_trans: bool,

    /// Deprecated; rejected by `validate`.
    pub use_ppm: Option<bool>,

    /// Deprecated; rejected by `validate`.
    pub use_limiter: Option<bool>,

    pub variable_density: bool,
    pub rho_0: f64,
    pub has_overset: bool,
    pub mesh_mapping: bool,
    pub cfl: f64,
    pub mac_proj: SolverOptions,
    pub diffusion: SolverOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            diffusion_type: DiffusionType::CrankNicolson,
            scheme: Scheme::Godunov,
            godunov_type: "ppm".to_string(),
            godunov_use_forces_in_trans: false,
            use_ppm: None,
            use_limiter: None,
            variable_density: true,
            rho_0: 1.0,
            has_overset: false,
            mesh_mapping: false,
            cfl: 0.5,
            mac_proj: SolverOptions::default(),
            diffusion: SolverOptions::default(),
        }
    }
}




// ============================================================================
impl Config {


    /**
     * Reject option combinations the advance cannot run with.
     */
    pub fn validate(&self) -> Result<()> {
        if self.use_ppm.is_some() {
            return Err(Error::config("option 'use_ppm' is deprecated; use 'godunov_type' instead"));
        }
        if self.use_limiter.is_some() {
            return Err(Error::config("option 'use_limiter' is deprecated; use 'godunov_type' instead"));
        }
        if !(self.rho_0 > 0.0) {
            return Err(Error::config(format!("rho_0 must be positive (got {})", self.rho_0)));
        }
        if !(self.cfl > 0.0) {
            return Err(Error::config(format!("cfl must be positive (got {})", self.cfl)));
        }
        Ok(())
    }

    pub fn godunov_scheme(&self) -> Result<GodunovScheme> {
        self.validate()?;
        Ok(GodunovScheme::parse(&self.godunov_type))
    }
}
