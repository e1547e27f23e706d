use std::fmt;

/// Errors raised when constructing or invoking a solver with invalid inputs.
///
/// Only configuration and precondition violations are reported this way.
/// Expected termination conditions (iteration/time budgets, interruption,
/// non-finite evaluations) travel in the stats record of the solve instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolverError {
    /// A parameter value is outside its valid range.
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// Description of the violated requirement.
        message: &'static str,
    },
    /// A vector argument has the wrong length for the problem.
    DimensionMismatch {
        /// Name of the offending argument.
        name: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// The same solver or problem instance is already in use by another
    /// solve. Solver instances are not reentrant; make a copy instead.
    InstanceInUse,
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::InvalidParameter { name, message } => {
                write!(f, "invalid parameter `{}`: {}", name, message)
            }
            SolverError::DimensionMismatch {
                name,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "dimension mismatch for `{}`: expected {}, got {}",
                    name, expected, actual
                )
            }
            SolverError::InstanceInUse => {
                write!(
                    f,
                    "solver or problem instance already in use by another solve"
                )
            }
        }
    }
}

impl std::error::Error for SolverError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let e = SolverError::InvalidParameter {
            name: "tolerance",
            message: "must be positive",
        };
        assert_eq!(e.to_string(), "invalid parameter `tolerance`: must be positive");

        let e = SolverError::DimensionMismatch {
            name: "x",
            expected: 3,
            actual: 2,
        };
        assert!(e.to_string().contains("expected 3, got 2"));
    }
}
