//! Local command execution.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::connection::{CommandOutput, DeviceConnection};

/// Executes commands on the local machine through `sh -c`.
pub struct LocalConnection;

impl LocalConnection {
    pub fn new() -> Self {
        Self {}
    }
}

impl DeviceConnection for LocalConnection {
    fn execute_command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        debug!("Executing local command: {command}");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn command process: {command}"))?;

        let start_time = Instant::now();
        let timeout_duration = timeout.unwrap_or(Duration::from_secs(60));

        let mut timed_out = false;
        while child.try_wait()?.is_none() {
            if start_time.elapsed() > timeout_duration {
                timed_out = true;
                warn!("Command timed out after {timeout_duration:?}: {command}");
                child.kill()?;
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let Some(mut stdout_pipe) = child.stdout.take() {
            stdout_pipe.read_to_string(&mut stdout)?;
        }
        if let Some(mut stderr_pipe) = child.stderr.take() {
            stderr_pipe.read_to_string(&mut stderr)?;
        }

        let exit_code = if timed_out {
            -1
        } else {
            // None means the process was killed by a signal.
            child.wait()?.code().unwrap_or(-1)
        };

        debug!("Local command finished: exit_code={exit_code}");

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}
