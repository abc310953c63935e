//! Subprocess coalescing: waits for work to arrive, drains everything
//! queued since the last run, and spawns exactly one subprocess per batch.
//!
//! Two shapes of this pattern are used (see [`PendingWork`]): the preview
//! script takes no arguments and just needs to know "run me again" (a
//! pending boolean), while the reduction script accumulates a burst of
//! frame paths and passes them all to one invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// What `ScriptRunner` hands a script invocation: either "just run it" or a
/// batch of paths to pass as arguments.
pub trait PendingWork: Send + 'static {
    /// True if there is nothing queued (the runner should keep waiting).
    fn is_empty(&self) -> bool;
    /// Consumes and returns the queued work, resetting to empty.
    fn take(&mut self) -> Vec<String>;
}

/// Boolean-pending coalescing: any number of `request()` calls between runs
/// collapse into a single invocation with no arguments.
#[derive(Default)]
pub struct PreviewPending {
    available: bool,
}

impl PendingWork for PreviewPending {
    fn is_empty(&self) -> bool {
        !self.available
    }
    fn take(&mut self) -> Vec<String> {
        self.available = false;
        Vec::new()
    }
}

/// Path-burst coalescing: every path pushed between runs is drained into a
/// single invocation's argument list.
#[derive(Default)]
pub struct ReductionPending {
    paths: Vec<PathBuf>,
}

impl PendingWork for ReductionPending {
    fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
    fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.paths)
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

struct Shared<W> {
    pending: std::sync::Mutex<W>,
    notify: Notify,
}

/// Drives a shell script via `tokio::process::Command`, coalescing bursts
/// of requests that arrive faster than the script can run.
pub struct ScriptRunner<W> {
    shared: Arc<Shared<W>>,
    label: &'static str,
}

impl<W: PendingWork + Default> ScriptRunner<W> {
    pub fn new(label: &'static str) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: std::sync::Mutex::new(W::default()),
                notify: Notify::new(),
            }),
            label,
        }
    }

    /// A cheap clonable handle producers use to queue work.
    pub fn handle(&self) -> ScriptRunnerHandle<W> {
        ScriptRunnerHandle { shared: self.shared.clone() }
    }

    /// Runs `script_path` with the coalesced argument list every time work
    /// becomes available, until `shutdown` is notified. Intended as the
    /// body of a long-lived `tokio::spawn`.
    pub async fn run(self, script_path: PathBuf, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = self.shared.notify.notified() => {}
                _ = shutdown.notified() => break,
            }

            let args = {
                let mut guard = self.shared.pending.lock().expect("script runner pending lock poisoned");
                if guard.is_empty() {
                    continue;
                }
                guard.take()
            };

            info!(label = self.label, script = %script_path.display(), args = args.len(), "running script");
            let prefix = log_prefix(self.label);
            match tokio::process::Command::new(&script_path)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
            {
                Ok(mut child) => {
                    let stdout = child.stdout.take().expect("stdout was piped");
                    let stderr = child.stderr.take().expect("stderr was piped");
                    let label = self.label;

                    let out_prefix = prefix.clone();
                    let stdout_task = tokio::spawn(async move {
                        let mut lines = BufReader::new(stdout).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            info!(label, "{out_prefix}{line}");
                        }
                    });
                    let err_prefix = prefix.clone();
                    let stderr_task = tokio::spawn(async move {
                        let mut lines = BufReader::new(stderr).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            info!(label, "{err_prefix}{line}");
                        }
                    });
                    let _ = stdout_task.await;
                    let _ = stderr_task.await;

                    match child.wait().await {
                        Ok(status) if !status.success() => {
                            warn!(label = self.label, status = ?status.code(), "script exited non-zero");
                        }
                        Ok(_) => {}
                        Err(e) => error!(label = self.label, error = %e, "failed to wait on script"),
                    }
                }
                Err(e) => error!(label = self.label, error = %e, "failed to spawn script"),
            }
        }
        info!(label = self.label, "script runner exiting");
    }
}

/// Builds the `"Preview: "`/`"Reduction: "`-style log-line prefix for a
/// runner's label, capitalizing just the first character.
fn log_prefix(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) => format!("{}{}: ", c.to_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

#[derive(Clone)]
pub struct ScriptRunnerHandle<W> {
    shared: Arc<Shared<W>>,
}

impl ScriptRunnerHandle<PreviewPending> {
    pub fn request(&self) {
        self.shared.pending.lock().expect("script runner pending lock poisoned").available = true;
        self.shared.notify.notify_one();
    }
}

impl ScriptRunnerHandle<ReductionPending> {
    pub fn push(&self, path: PathBuf) {
        self.shared
            .pending
            .lock()
            .expect("script runner pending lock poisoned")
            .paths
            .push(path);
        self.shared.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_prefix_capitalizes_the_label() {
        assert_eq!(log_prefix("preview"), "Preview: ");
        assert_eq!(log_prefix("reduction"), "Reduction: ");
    }

    #[test]
    fn preview_pending_coalesces_repeated_requests() {
        let mut pending = PreviewPending::default();
        assert!(pending.is_empty());
        pending.available = true;
        pending.available = true;
        assert!(!pending.is_empty());
        assert_eq!(pending.take(), Vec::<String>::new());
        assert!(pending.is_empty());
    }

    #[test]
    fn reduction_pending_drains_every_queued_path() {
        let mut pending = ReductionPending::default();
        pending.paths.push(PathBuf::from("/tmp/a.fits.gz"));
        pending.paths.push(PathBuf::from("/tmp/b.fits.gz"));
        let taken = pending.take();
        assert_eq!(taken, vec!["/tmp/a.fits.gz", "/tmp/b.fits.gz"]);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn runner_invokes_script_once_per_coalesced_batch() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran.txt");
        let script_path = dir.path().join("script.sh");
        std::fs::write(
            &script_path,
            format!("#!/bin/sh\necho ran >> {}\n", marker.display()),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();

        let runner = ScriptRunner::<PreviewPending>::new("preview-test");
        let handle = runner.handle();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let task = tokio::spawn(runner.run(script_path, shutdown_clone));

        handle.request();
        handle.request();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        shutdown.notify_one();
        task.await.unwrap();

        let contents = std::fs::read_to_string(&marker).unwrap_or_default();
        assert_eq!(contents.lines().count(), 1, "expected exactly one coalesced run");
    }

    #[tokio::test]
    async fn script_stdout_is_forwarded_line_by_line_with_label_prefix() {
        use crate::logging::{LogBuffer, LogBufferLayer};
        use tracing_subscriber::layer::SubscriberExt;

        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("script.sh");
        std::fs::write(&script_path, "#!/bin/sh\necho hello from script\n").unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();

        let buffer = LogBuffer::new();
        let subscriber = tracing_subscriber::registry().with(LogBufferLayer::new(buffer.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let runner = ScriptRunner::<PreviewPending>::new("preview");
        let handle = runner.handle();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let task = tokio::spawn(runner.run(script_path, shutdown_clone));

        handle.request();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        shutdown.notify_one();
        task.await.unwrap();

        let logged = buffer
            .snapshot()
            .iter()
            .any(|entry| entry.message == "Preview: hello from script");
        assert!(logged, "expected the script's stdout line to be forwarded with the Preview: prefix");
    }
}
