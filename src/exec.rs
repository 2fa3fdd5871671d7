//! External command execution.
//!
//! All child processes (`git`, `patch`, `pre-commit`, ...) run through
//! [`Cmd`] so that timing/debug logging and git's lock discipline are applied
//! consistently. This is the only way external commands should be invoked;
//! reaching for `std::process::Command` directly bypasses both.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

/// How long to wait for a competing process to release `.git/index.lock`
/// before treating it as stale and reclaiming it.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A single external command invocation.
///
/// Builder style: `Cmd::new("git").args(["status", "--porcelain"]).current_dir(&path).run()`.
pub struct Cmd {
    inner: Command,
    program: String,
    args: Vec<String>,
    context: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        let program = program.as_ref().to_string();
        Self {
            inner: Command::new(&program),
            program,
            args: Vec::new(),
            context: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            self.inner.arg(arg);
            self.args.push(arg.to_string());
        }
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.inner.current_dir(dir.as_ref());
        self
    }

    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.inner.env(key.as_ref(), value.as_ref());
        self
    }

    /// Human-readable label attached to debug/trace log lines, e.g. a repo path.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn cmd_str(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Run the command to completion, capturing stdout/stderr.
    ///
    /// Does not interpret the exit status; callers that want a `git`-style
    /// "nonzero means error" contract should use [`Cmd::run_checked`].
    pub fn run(mut self) -> Result<Output> {
        let cmd_str = self.cmd_str();
        match &self.context {
            Some(ctx) => log::debug!("$ {cmd_str} [{ctx}]"),
            None => log::debug!("$ {cmd_str}"),
        }

        let t0 = Instant::now();
        let result = self.inner.output();
        let duration_ms = t0.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(output) => log::debug!(
                "[gimera-trace] cmd=\"{cmd_str}\" dur={duration_ms:.1}ms ok={}",
                output.status.success()
            ),
            Err(e) => log::debug!("[gimera-trace] cmd=\"{cmd_str}\" dur={duration_ms:.1}ms err=\"{e}\""),
        }

        result.with_context(|| format!("failed to spawn `{cmd_str}`"))
    }

    /// Run and raise unless the process exited successfully. The error
    /// message includes combined stdout+stderr.
    pub fn run_checked(self) -> Result<String> {
        let cmd_str = self.cmd_str();
        let output = self.run()?;
        if !output.status.success() {
            let mut message = String::from_utf8_lossy(&output.stderr).replace('\r', "\n");
            if message.trim().is_empty() {
                message = String::from_utf8_lossy(&output.stdout).replace('\r', "\n");
            }
            bail!("`{cmd_str}` failed: {}", message.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Inherit stdio so the child's own output reaches the terminal directly;
    /// returns only the exit status.
    pub fn run_inherited(mut self) -> Result<std::process::ExitStatus> {
        let cmd_str = self.cmd_str();
        self.inner.stdin(Stdio::inherit());
        self.inner.stdout(Stdio::inherit());
        self.inner.stderr(Stdio::inherit());
        self.inner
            .status()
            .with_context(|| format!("failed to spawn `{cmd_str}`"))
    }
}

/// Blocks until `<git_dir>/index.lock` is absent, reclaiming it as stale
/// after an hour. Mirrors the advisory wait git itself performs before most
/// porcelain commands; we add it explicitly because gimera issues many git
/// invocations back-to-back across recursive repos and cannot rely on git's
/// own short internal retry.
pub fn wait_git_lock(git_dir: &Path) -> Result<()> {
    let lock_path = git_dir.join("index.lock");
    let mut waited = Duration::ZERO;

    while lock_path.exists() {
        let age = lock_file_age(&lock_path)?;
        if age > LOCK_STALE_AFTER {
            log::warn!(
                "{} is older than an hour, assuming stale and removing",
                lock_path.display()
            );
            std::fs::remove_file(&lock_path).ok();
            break;
        }
        std::thread::sleep(LOCK_POLL_INTERVAL);
        waited += LOCK_POLL_INTERVAL;
    }

    Ok(())
}

fn lock_file_age(path: &Path) -> Result<Duration> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    Ok(modified.elapsed().unwrap_or(Duration::ZERO))
}

/// Acquires `<git_dir>/gimera.lock` for the duration of a reconciliation run,
/// serializing concurrent `gimera` invocations against the same host repo.
/// Distinct from git's own `index.lock`: this guards gimera's own
/// multi-step, multi-repo operations, not a single git command.
pub struct TreeLock {
    _guard: fd_lock::RwLockWriteGuard<'static, std::fs::File>,
}

impl TreeLock {
    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let lock_path: PathBuf = git_dir.join("gimera.lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;

        // Leaked once per process invocation: the lock (and its backing fd)
        // must outlive every scoped resource opened during a reconciliation
        // run, so there is no meaningful point at which freeing it early
        // would help. The OS releases the flock when the process exits.
        let lock: &'static mut fd_lock::RwLock<std::fs::File> =
            Box::leak(Box::new(fd_lock::RwLock::new(file)));
        let guard = lock
            .write()
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;

        Ok(Self { _guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_checked_captures_stdout() {
        let out = Cmd::new("printf").args(["hello"]).run_checked().unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn run_checked_fails_on_nonzero_exit() {
        let result = Cmd::new("sh").args(["-c", "exit 3"]).run_checked();
        assert!(result.is_err());
    }

    #[test]
    fn wait_git_lock_returns_immediately_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        wait_git_lock(dir.path()).unwrap();
    }

    #[test]
    fn tree_lock_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = TreeLock::acquire(dir.path()).unwrap();
        }
        let _lock_again = TreeLock::acquire(dir.path()).unwrap();
    }
}
