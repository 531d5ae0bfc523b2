//! Worker processes with their stdin/stdout wired up as protocol streams.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use backhaul_protocol::{Error, ReadStream, Result, WriteStream};
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct Exec {
    name: String,
    child: Child,
    timeout: Duration,
}

impl Exec {
    /// Launches `program`. Every read on the returned stream is bounded by
    /// `timeout`, which also bounds how long [`Exec::free`] waits for exit.
    pub fn spawn<P, I, S>(
        program: P,
        args: I,
        env: &[(String, String)],
        name: impl Into<String>,
        timeout: Duration,
    ) -> Result<(Self, ReadStream, WriteStream)>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let name = name.into();

        let mut child = TokioCommand::new(program.as_ref())
            .args(args)
            .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let program = program.as_ref().to_string_lossy();
                Error::Execute(format!("unable to execute '{program}': {e}"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Execute(format!("{name} has no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Execute(format!("{name} has no stdout")))?;

        debug!(process = %name, pid = ?child.id(), "process started");

        let read = ReadStream::handle(format!("{name} stdout"), stdout, timeout);
        let write = WriteStream::new(format!("{name} stdin"), stdin);

        Ok((Self { name, child, timeout }, read, write))
    }

    /// Errors if the process has exited, giving it up to `grace` to do so.
    pub async fn check(&mut self, grace: Duration) -> Result<()> {
        match timeout(grace, self.child.wait()).await {
            Err(_) => Ok(()),
            Ok(Ok(status)) => Err(Error::Execute(format!(
                "{} terminated unexpectedly [{}]",
                self.name,
                status.code().map_or_else(|| "signal".to_owned(), |code| code.to_string())
            ))),
            Ok(Err(e)) => Err(Error::Execute(format!("unable to wait on {}: {e}", self.name))),
        }
    }

    /// Waits for the process to exit on its own, killing it once the timeout
    /// runs out. Call after the client has sent `exit`.
    pub async fn free(mut self) {
        match timeout(self.timeout, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => debug!(process = %self.name, "process exited"),
            Ok(Ok(status)) => warn!(process = %self.name, "process exited with {status}"),
            Ok(Err(e)) => warn!(process = %self.name, "unable to wait on process: {e}"),
            Err(_) => {
                warn!(
                    process = %self.name,
                    "process did not exit after {}ms, killing",
                    self.timeout.as_millis()
                );
                if let Err(e) = self.child.kill().await {
                    warn!(process = %self.name, "unable to kill process: {e}");
                }
            }
        }
    }
}
