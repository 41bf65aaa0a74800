/// External collaborators the pipeline drives as opaque processes.
///
/// Each collaborator is a trait so a cycle can run against fakes in tests.
///
/// Submodules:
/// - `simulation`: hydrologic model run and its input file rewriting.
/// - `storage`:    time-series store request/response contract.
/// - `tide`:       harmonic tide analysis and prediction.
pub mod simulation;
pub mod storage;
pub mod tide;

use std::process::Command;

use crate::model::ForecastError;

/// Runs `command` to completion, mapping spawn failures and non-zero exits
/// to `ExternalTool`.
pub(crate) fn run_checked(tool: &str, command: &mut Command) -> Result<(), ForecastError> {
    let status = command.status().map_err(|e| ForecastError::ExternalTool {
        tool: tool.to_string(),
        detail: format!("could not start {:?}: {}", command.get_program(), e),
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(ForecastError::ExternalTool {
            tool: tool.to_string(),
            detail: status.to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_successful_command() {
        assert!(run_checked("true", &mut Command::new("true")).is_ok());
    }

    #[test]
    fn test_non_zero_exit_is_external_tool_error() {
        let err = run_checked("false", &mut Command::new("false")).unwrap_err();
        assert!(
            matches!(&err, ForecastError::ExternalTool { tool, .. } if tool == "false"),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_missing_program_is_external_tool_error() {
        let err = run_checked("ghost", &mut Command::new("/nonexistent/flowcast-tool")).unwrap_err();
        assert!(matches!(err, ForecastError::ExternalTool { .. }));
    }
}
