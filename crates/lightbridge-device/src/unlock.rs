//! Vendor unlock utility runner
//!
//! The Katana V2 rejects LED commands until Creative's firmware utility has
//! run once against it; querying the firmware version is enough to trip the
//! unlock. The utility's logging is noisy, so success is judged by a marker
//! substring anywhere in its stdout.

use std::path::PathBuf;
use tracing::{debug, error};

/// Katana V2 USB vendor/product ids, as the utility expects them
const KATANA_V2_VID: &str = "41E";
const KATANA_V2_PID: &str = "3260";

/// One-shot external unlock command
#[derive(Debug, Clone)]
pub struct UnlockCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub success_marker: String,
}

impl UnlockCommand {
    /// Unlock invocation for the Katana V2: ask the firmware utility for the
    /// device version, which unlocks the control channel as a side effect.
    pub fn katana_v2(program: PathBuf) -> Self {
        Self {
            program,
            args: vec![
                "auto".to_string(),
                "ver".to_string(),
                format!("/dv{KATANA_V2_VID}"),
                format!("/dp{KATANA_V2_PID}"),
            ],
            success_marker: "unlock_comms [0]".to_string(),
        }
    }

    /// Run the utility and report whether the success marker appeared.
    ///
    /// Any failure mode (missing binary, non-UTF-8 output, marker absent) is
    /// reported as `false`; unlock failures are retryable, never fatal.
    pub async fn run(&self) -> bool {
        let output = match tokio::process::Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(
                    program = %self.program.display(),
                    error = %e,
                    "Failed to run unlock utility"
                );
                return false;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains(&self.success_marker) {
            debug!(program = %self.program.display(), "Unlock utility reported success");
            true
        } else {
            error!(
                program = %self.program.display(),
                output = %stdout.trim(),
                "Unlock utility did not report success"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_marker_in_stdout_is_success() {
        let cmd = UnlockCommand {
            program: PathBuf::from("echo"),
            args: vec!["fw 1.2.3 unlock_comms [0] done".to_string()],
            success_marker: "unlock_comms [0]".to_string(),
        };
        assert!(cmd.run().await);
    }

    #[tokio::test]
    async fn test_missing_marker_is_failure() {
        let cmd = UnlockCommand {
            program: PathBuf::from("echo"),
            args: vec!["nothing to see".to_string()],
            success_marker: "unlock_comms [0]".to_string(),
        };
        assert!(!cmd.run().await);
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let cmd = UnlockCommand {
            program: PathBuf::from("/nonexistent/firmware_utility"),
            args: vec![],
            success_marker: "unlock_comms [0]".to_string(),
        };
        assert!(!cmd.run().await);
    }

    #[test]
    fn test_katana_arguments() {
        let cmd = UnlockCommand::katana_v2(PathBuf::from("fw_util"));
        assert_eq!(cmd.args, vec!["auto", "ver", "/dv41E", "/dp3260"]);
    }
}
