use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build command is empty or could not be split: {0:?}")]
    EmptyCommand(String),
    #[error("failed to spawn build command `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed while waiting for build command: {0}")]
    Wait(std::io::Error),
    #[error("build command timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("build command exited with {0}")]
    Failed(ExitStatus),
}

/// Runs the downstream build with the parent's stdio, killing it if it
/// outlives `timeout`.
pub fn run_build(
    command_line: &str,
    working_dir: Option<&Path>,
    timeout: Duration,
) -> Result<(), BuildError> {
    let Some(tokens) = shlex::split(command_line) else {
        return Err(BuildError::EmptyCommand(command_line.to_string()));
    };
    let Some((program, args)) = tokens.split_first() else {
        return Err(BuildError::EmptyCommand(command_line.to_string()));
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let cwd = working_dir.unwrap_or(Path::new("."));
    tracing::info!(command = command_line, cwd = %cwd.display(), "running build");

    let mut child = command.spawn().map_err(|source| BuildError::Spawn {
        program: program.clone(),
        source,
    })?;

    let status = match child.wait_timeout(timeout).map_err(BuildError::Wait)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BuildError::TimedOut(timeout));
        }
    };

    if !status.success() {
        return Err(BuildError::Failed(status));
    }

    tracing::info!("build finished");
    Ok(())
}
