//! Output of commands executed inside containers.

/// Output from an exec command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether standard output lists `entry` as a whitespace-separated token.
    #[must_use]
    pub fn lists(&self, entry: &str) -> bool {
        self.stdout.split_whitespace().any(|token| token == entry)
    }
}

impl From<std::process::Output> for ExecOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_matches_whole_entries_only() {
        let out = ExecOutput {
            stdout: "bin\ngo-working-dir\ngodata\n".into(),
            ..ExecOutput::default()
        };
        assert!(out.success());
        assert!(out.lists("godata"));
        assert!(!out.lists("go"));
    }
}
