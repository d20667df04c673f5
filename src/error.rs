use thiserror::Error;




/**
 * Error to represent invalid configuration, an invalid mesh hierarchy, a
 * registry lookup failure, or a linear solve that did not converge. Solver
 * failures are forwarded to the caller as-is; nothing in this crate retries
 * a solve.
 */
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("no field named '{0}' in the registry")]
    UnknownField(String),

    #[error("{label}: solver failed to converge after {iterations} iterations (residual {residual:.3e})")]
    SolverNotConverged {
        label: String,
        iterations: usize,
        residual: f64,
    },
}

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn geometry<S: Into<String>>(message: S) -> Self {
        Self::Geometry(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
