//! Process exit codes.
//!
//! - 0: success
//! - 1: I/O, argument or configuration error
//! - 3: the inverse solver could not improve a divergent cell
//! - 4: a non-finite value reached the table
//!
//! Codes 3 and 4 mean the build was abandoned and no table was written.

use solv_core::BuildError;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CliExitCode {
    Success = 0,
    Failure = 1,
    SolverExhausted = 3,
    NonFinite = 4,
}

impl From<CliExitCode> for ExitCode {
    fn from(code: CliExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Maps an error chain to an exit code, looking for a [`BuildError`] inside it.
pub fn exit_code_for_error(err: &anyhow::Error) -> CliExitCode {
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::NonFinite { .. }) => CliExitCode::NonFinite,
        Some(BuildError::SolverExhausted { .. }) => CliExitCode::SolverExhausted,
        _ => CliExitCode::Failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn fatal_build_errors_have_distinct_codes() {
        let err = anyhow::Error::new(BuildError::NonFinite { x: 0, y: 0, z: 0 });
        assert_eq!(exit_code_for_error(&err), CliExitCode::NonFinite);

        let err = anyhow::Error::new(BuildError::SolverExhausted {
            x: 1,
            y: 2,
            z: 3,
            error: 1e3,
        });
        assert_eq!(exit_code_for_error(&err), CliExitCode::SolverExhausted);
    }

    #[test]
    fn context_does_not_hide_the_cause() {
        let result: Result<(), BuildError> = Err(BuildError::NonFinite { x: 0, y: 1, z: 2 });
        let err = result.context("building sol table").expect_err("error expected");
        assert_eq!(exit_code_for_error(&err), CliExitCode::NonFinite);
    }

    #[test]
    fn other_errors_are_plain_failures() {
        let err = anyhow::anyhow!("disk full");
        assert_eq!(exit_code_for_error(&err), CliExitCode::Failure);
        let err = anyhow::Error::new(BuildError::InvalidSettings("workers".into()));
        assert_eq!(exit_code_for_error(&err), CliExitCode::Failure);
    }
}
