use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Local command execution helpers
pub mod local {
    use super::*;

    pub fn execute(program: &str, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        run(cmd, program)
    }

    /// Execute in `working_dir` with extra environment variables set
    pub fn execute_in(
        program: &str,
        args: &[&str],
        working_dir: &Path,
        envs: &[(&str, &str)],
    ) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(working_dir);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        run(cmd, program)
    }

    fn run(mut cmd: Command, program: &str) -> Result<Output> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        tracing::debug!(command = ?cmd, "executing");
        cmd.output()
            .with_context(|| format!("Failed to execute command: {}", program))
    }

    /// Check if a command exists using native Rust (which crate)
    pub fn check_command_exists(command: &str) -> bool {
        which::which(command).is_ok()
    }

    /// Create a new file readable only by the owner (Unix). The mode is
    /// applied at creation; an existing file is an error.
    pub fn write_private_file(path: impl AsRef<Path>, content: &[u8]) -> Result<()> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let path_ref = path.as_ref();
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path_ref)
            .with_context(|| format!("Failed to create file: {}", path_ref.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write file: {}", path_ref.display()))?;
        Ok(())
    }
}

/// Trimmed stderr, falling back to stdout when stderr is empty
pub fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.to_string()
    }
}
