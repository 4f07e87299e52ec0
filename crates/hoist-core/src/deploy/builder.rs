//! Build and deploy steps run while the deployment lock is held.

use std::path::Path;

use anyhow::Context;

use crate::exec::{Executable, ProcessExecutable};
use crate::types::{ChangeSet, DeployStatus};

/// Receives progress from a running build step.
pub trait BuildReporter {
    /// Move the deployment to `status`.
    fn status(&self, status: DeployStatus, text: &str);

    /// Append a line to the deployment log.
    fn log(&self, message: &str);
}

pub struct BuildContext<'a> {
    pub change_set: &'a ChangeSet,
    /// Fetched or extracted source tree
    pub source_dir: &'a Path,
    /// Directory the site is served from
    pub target_dir: &'a Path,
    pub reporter: &'a dyn BuildReporter,
}

/// Turns a fetched source tree into deployed content.
pub trait BuildStep: Send + Sync {
    fn build(&self, ctx: &BuildContext<'_>) -> anyhow::Result<()>;
}

/// Copies the source tree, minus version-control metadata, into the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncBuildStep;

impl BuildStep for SyncBuildStep {
    fn build(&self, ctx: &BuildContext<'_>) -> anyhow::Result<()> {
        ctx.reporter.status(DeployStatus::Deploying, "Copying files.");
        sync_tree(ctx.source_dir, ctx.target_dir)?;
        ctx.reporter.log(&format!(
            "Copied {} to {}",
            ctx.source_dir.display(),
            ctx.target_dir.display()
        ));
        Ok(())
    }
}

/// Runs a shell command in the source directory, then syncs.
#[derive(Debug, Clone)]
pub struct CommandBuildStep {
    command: String,
}

impl CommandBuildStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn shell(&self, dir: &Path) -> (ProcessExecutable, [&str; 2]) {
        if cfg!(windows) {
            (ProcessExecutable::new("cmd", dir), ["/C", self.command.as_str()])
        } else {
            (ProcessExecutable::new("sh", dir), ["-c", self.command.as_str()])
        }
    }
}

impl BuildStep for CommandBuildStep {
    fn build(&self, ctx: &BuildContext<'_>) -> anyhow::Result<()> {
        ctx.reporter
            .status(DeployStatus::Building, &format!("Running '{}'.", self.command));

        let (shell, args) = self.shell(ctx.source_dir);
        let output = shell
            .execute(&args)
            .with_context(|| format!("Build command failed: {}", self.command))?;
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            ctx.reporter.log(line);
        }

        SyncBuildStep.build(ctx)
    }
}

/// Replace `dst` with a copy of `src`, skipping `.git` and `.hg`.
pub fn sync_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    if dst.exists() {
        std::fs::remove_dir_all(dst)
            .with_context(|| format!("Failed to clear target: {}", dst.display()))?;
    }
    std::fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create target: {}", dst.display()))?;
    copy_tree_filtered(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))
}

fn copy_tree_filtered(src: &Path, dst: &Path) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name == ".git" || file_name == ".hg" {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&file_name);
        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_tree_filtered(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingReporter {
        statuses: Mutex<Vec<DeployStatus>>,
        lines: Mutex<Vec<String>>,
    }

    impl BuildReporter for RecordingReporter {
        fn status(&self, status: DeployStatus, _text: &str) {
            self.statuses.lock().unwrap().push(status);
        }

        fn log(&self, message: &str) {
            self.lines.lock().unwrap().push(message.to_string());
        }
    }

    fn fixture() -> (tempfile::TempDir, ChangeSet) {
        let temp = tempfile::TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join(".git")).unwrap();
        std::fs::create_dir_all(src.join("assets")).unwrap();
        std::fs::write(src.join(".git").join("HEAD"), "ref").unwrap();
        std::fs::write(src.join("index.html"), "hello").unwrap();
        std::fs::write(src.join("assets").join("app.js"), "js").unwrap();
        (temp, ChangeSet::new("abc", "dev", "msg"))
    }

    #[test]
    fn sync_copies_without_metadata() {
        let (temp, change_set) = fixture();
        let target = temp.path().join("wwwroot");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("stale.html"), "old").unwrap();
        let reporter = RecordingReporter::default();

        SyncBuildStep
            .build(&BuildContext {
                change_set: &change_set,
                source_dir: &temp.path().join("src"),
                target_dir: &target,
                reporter: &reporter,
            })
            .unwrap();

        assert!(target.join("index.html").exists());
        assert!(target.join("assets").join("app.js").exists());
        assert!(!target.join(".git").exists());
        assert!(!target.join("stale.html").exists());
        assert_eq!(*reporter.statuses.lock().unwrap(), [DeployStatus::Deploying]);
    }

    #[cfg(unix)]
    #[test]
    fn command_step_runs_in_source_dir() {
        let (temp, change_set) = fixture();
        let target = temp.path().join("wwwroot");
        let reporter = RecordingReporter::default();

        CommandBuildStep::new("echo built > build.txt && echo done")
            .build(&BuildContext {
                change_set: &change_set,
                source_dir: &temp.path().join("src"),
                target_dir: &target,
                reporter: &reporter,
            })
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(target.join("build.txt")).unwrap().trim(),
            "built"
        );
        assert_eq!(
            *reporter.statuses.lock().unwrap(),
            [DeployStatus::Building, DeployStatus::Deploying]
        );
        assert!(reporter.lines.lock().unwrap().contains(&"done".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_fails_the_build() {
        let (temp, change_set) = fixture();
        let reporter = RecordingReporter::default();

        let err = CommandBuildStep::new("echo nope >&2; exit 2")
            .build(&BuildContext {
                change_set: &change_set,
                source_dir: &temp.path().join("src"),
                target_dir: &temp.path().join("wwwroot"),
                reporter: &reporter,
            })
            .unwrap_err();

        assert!(format!("{err:#}").contains("nope"));
    }
}
