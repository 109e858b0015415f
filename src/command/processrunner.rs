use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

#[cfg(target_family = "unix")]
use nix::sys::signal::{self, Signal};
#[cfg(target_family = "unix")]
use nix::unistd::Pid;

use super::{CommandError, CommandExecutor};

/// Captured result of a bounded process invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status_success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// A not-yet-started external command, bound to a wall-clock timeout when run.
///
/// Process-supervision shape: piped stdout/stderr read on a
/// background thread, SIGTERM-then-SIGKILL on timeout) but collapsed into a single
/// run-to-completion call since `bgpq4` invocations are one-shot, not long-running services.
pub struct BoundedProcess {
    cmd: Command,
}

impl BoundedProcess {
    pub fn new<I, S>(binary_path: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(binary_path);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        Self { cmd }
    }
}

impl CommandExecutor for BoundedProcess {
    type Error = CommandError;

    fn run_with_timeout(mut self, timeout: Duration) -> Result<ProcessOutput, Self::Error> {
        let mut child: Child = self.cmd.spawn()?;

        let stdout = child.stdout.take().expect("stdout piped at construction");
        let stderr = child.stderr.take().expect("stderr piped at construction");

        let out_handle = std::thread::spawn(move || read_lines(stdout));
        let err_handle = std::thread::spawn(move || read_lines(stderr));

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                kill_process(&child)?;
                let _ = child.wait();
                return Err(CommandError::Timeout(timeout));
            }
            std::thread::sleep(Duration::from_millis(25));
        };

        let stdout = out_handle.join().unwrap_or_default().join("\n");
        let stderr = err_handle.join().unwrap_or_default().join("\n");

        Ok(ProcessOutput {
            status_success: status.success(),
            stdout,
            stderr,
        })
    }
}

fn read_lines<R: std::io::Read>(reader: R) -> Vec<String> {
    BufReader::new(reader)
        .lines()
        .filter_map(|l| l.ok())
        .collect()
}

#[cfg(target_family = "unix")]
fn kill_process(child: &Child) -> Result<(), CommandError> {
    let pid = Pid::from_raw(child.id() as i32);
    signal::kill(pid, Signal::SIGTERM)?;
    std::thread::sleep(Duration::from_millis(500));
    // best-effort escalation; a process that ignored SIGTERM is force-killed
    let _ = signal::kill(pid, Signal::SIGKILL);
    Ok(())
}

#[cfg(not(target_family = "unix"))]
fn kill_process(child: &Child) -> Result<(), CommandError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_succeeds_within_timeout() {
        let proc = BoundedProcess::new("sh", ["-c", "echo hello; echo world 1>&2"]);
        let out = proc.run_with_timeout(Duration::from_secs(5)).unwrap();
        assert!(out.status_success);
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "world");
    }

    #[test]
    fn run_reports_nonzero_exit() {
        let proc = BoundedProcess::new("sh", ["-c", "exit 3"]);
        let out = proc.run_with_timeout(Duration::from_secs(5)).unwrap();
        assert!(!out.status_success);
    }

    #[test]
    #[cfg(target_family = "unix")]
    fn run_times_out_and_kills() {
        let proc = BoundedProcess::new("sh", ["-c", "trap '' TERM; sleep 30"]);
        let err = proc
            .run_with_timeout(Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
    }
}
