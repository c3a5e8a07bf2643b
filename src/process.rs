use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// A process started on behalf of a workspace or deployment.
pub struct LaunchedProcess {
    /// OS process ID, also the process group ID.
    pub pid: u32,
    /// Handle on the running child.
    pub child: Child,
    /// Stream of stdout/stderr lines.
    pub output_rx: mpsc::Receiver<String>,
}

/// Configures `cmd` with piped output and its own process group, then spawns it.
///
/// `label` names the command in errors and log events.
pub fn spawn_piped(label: &str, cmd: &mut Command) -> Result<LaunchedProcess> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| Error::spawn(label, &e))?;
    let pid = child.id().unwrap_or(0);
    let output_rx = redirect_output(label, &mut child);
    tracing::debug!(command = label, pid, "spawned");

    Ok(LaunchedProcess {
        pid,
        child,
        output_rx,
    })
}

/// Takes the child's stdout and stderr and forwards them line by line to the
/// returned channel and to `debug!` events tagged with `label`.
///
/// Forwarding keeps draining the pipes after the receiver is dropped, so a
/// caller that does not care about output can discard it without stalling
/// the child.
pub fn redirect_output(label: &str, child: &mut Child) -> mpsc::Receiver<String> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let (tx, rx) = mpsc::channel(1000);

    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!(command = %label, "{line}");
                let _ = tx.send(line).await;
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!(command = %label, stream = "stderr", "{line}");
                let _ = tx.send(line).await;
            }
        });
    }

    rx
}

/// Sends SIGTERM to the process group led by `pid`.
///
/// Synchronous so it can run from disposal callbacks.
pub fn terminate_group(pid: u32) {
    #[cfg(unix)]
    {
        let pgid = format!("-{}", pid);
        let status = std::process::Command::new("kill")
            .args(["-TERM", "--", &pgid])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        tracing::debug!(pid, ?status, "terminated process group");
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Checks whether a process with the given PID is still running.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Starts the process described by a Syskit deployment command line.
#[cfg(feature = "syskit")]
pub fn spawn_command_line(command_line: &crate::syskit::CommandLine) -> Result<LaunchedProcess> {
    let mut cmd = Command::new(&command_line.command);
    cmd.args(&command_line.args);
    if !command_line.working_directory.as_os_str().is_empty() {
        cmd.current_dir(&command_line.working_directory);
    }
    for (key, value) in &command_line.env {
        cmd.env(key, value);
    }
    spawn_piped(&command_line.command, &mut cmd)
}

/// Returns a display label for `program args...`.
pub(crate) fn command_label<S: AsRef<str>>(program: &Path, args: &[S]) -> String {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    std::iter::once(name)
        .chain(args.iter().map(|a| a.as_ref().to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}
