//! [`VersionedStore`] backed by the system `git` binary.
//!
//! Every operation shells out to `git -C <peers_dir> ...` through
//! [`tokio::process::Command`].  Nothing is retried; a non-zero exit is
//! reported as [`StoreError::CommandFailed`] with the captured stderr.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::process::Command;

use super::VersionedStore;
use crate::error::StoreError;
use crate::types::Line;

pub struct GitStore {
    workdir: PathBuf,
    remote: String,
    review_branch: String,
    production_branch: String,
    current: Option<Line>,
}

impl GitStore {
    pub fn new(
        workdir: PathBuf,
        remote: String,
        review_branch: String,
        production_branch: String,
    ) -> Self {
        Self {
            workdir,
            remote,
            review_branch,
            production_branch,
            current: None,
        }
    }

    fn branch(&self, line: Line) -> &str {
        match line {
            Line::Review => &self.review_branch,
            Line::Production => &self.production_branch,
        }
    }

    fn describe(args: &[&str]) -> String {
        format!("git {}", args.join(" "))
    }

    async fn output(&self, args: &[&str]) -> Result<(String, Output), StoreError> {
        let command = Self::describe(args);
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.workdir).args(args);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("running {}", command);
        let output = cmd.output().await.map_err(|source| StoreError::Spawn {
            command: command.clone(),
            source,
        })?;
        Ok((command, output))
    }

    async fn run(&self, args: &[&str]) -> Result<(), StoreError> {
        let (command, output) = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("{} failed ({}): {}", command, output.status, stderr);
            return Err(StoreError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VersionedStore for GitStore {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn checkout_line(&mut self, line: Line) -> Result<(), StoreError> {
        let branch = self.branch(line).to_string();
        self.run(&["checkout", branch.as_str()]).await?;
        self.current = Some(line);
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), StoreError> {
        match self.current {
            Some(line) => {
                let branch = self.branch(line).to_string();
                let remote = self.remote.clone();
                self.run(&["pull", "--ff-only", remote.as_str(), branch.as_str()]).await
            }
            None => self.run(&["pull", "--ff-only"]).await,
        }
    }

    async fn stage_and_commit(
        &mut self,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<(), StoreError> {
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut add = vec!["add", "--"];
        add.extend(names.iter().map(String::as_str));
        self.run(&add).await?;
        self.run(&["commit", "-m", message]).await
    }

    async fn push(&mut self, line: Line) -> Result<(), StoreError> {
        let branch = self.branch(line).to_string();
        let remote = self.remote.clone();
        self.run(&["push", remote.as_str(), branch.as_str()]).await
    }

    async fn merge(&mut self, from: Line) -> Result<(), StoreError> {
        let from_branch = self.branch(from).to_string();
        let into_branch = match self.current {
            Some(line) => self.branch(line).to_string(),
            None => "HEAD".to_string(),
        };

        let (command, output) = self
            .output(&["merge", "--no-edit", from_branch.as_str()])
            .await?;
        if output.status.success() {
            return Ok(());
        }

        let detail = format!(
            "{} {}",
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        )
        .trim()
        .to_string();
        error!("{} failed ({}): {}", command, output.status, detail);

        if let Err(e) = self.run(&["merge", "--abort"]).await {
            warn!("could not abort failed merge: {}", e);
        }

        Err(StoreError::MergeConflict {
            from: from_branch,
            into: into_branch,
            detail,
        })
    }

    async fn discard(&mut self, paths: &[PathBuf]) -> Result<(), StoreError> {
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut reset = vec!["reset", "-q", "--"];
        reset.extend(names.iter().map(String::as_str));
        // The files go even if unstaging failed.
        let unstaged = self.run(&reset).await;

        for path in paths {
            let full = self.workdir.join(path);
            match tokio::fs::remove_file(&full).await {
                Ok(()) => debug!("discarded {}", full.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Remove {
                        path: full.display().to_string(),
                        source,
                    })
                }
            }
        }
        unstaged
    }

    async fn rewind(&mut self, line: Line) -> Result<(), StoreError> {
        self.checkout_line(line).await?;
        let upstream = format!("{}/{}", self.remote, self.branch(line));
        warn!("resetting {} to {}", self.branch(line), upstream);
        self.run(&["reset", "-q", "--hard", upstream.as_str()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branches_follow_lines() {
        let store = GitStore::new(
            PathBuf::from("/tmp/peers"),
            "origin".into(),
            "master".into(),
            "deploy".into(),
        );
        assert_eq!(store.branch(Line::Review), "master");
        assert_eq!(store.branch(Line::Production), "deploy");
        assert_eq!(store.workdir(), Path::new("/tmp/peers"));
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = GitStore::new(
            dir.path().to_path_buf(),
            "origin".into(),
            "master".into(),
            "deploy".into(),
        );
        // Not a repository, so checkout can only fail (or git is absent).
        let err = store.checkout_line(Line::Review).await.unwrap_err();
        match err {
            StoreError::CommandFailed { command, stderr, .. } => {
                assert_eq!(command, "git checkout master");
                assert!(!stderr.is_empty());
            }
            StoreError::Spawn { .. } => {}
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.current, None);
    }

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Bare "origin" plus a clone with `master` and `deploy` pushed.
    /// Returns `None` when no usable git binary is installed.
    fn two_line_checkout(root: &Path) -> Option<PathBuf> {
        let origin = root.join("origin.git");
        let peers = root.join("peers");
        std::fs::create_dir_all(&origin).ok()?;
        if !git(&origin, &["init", "--bare", "-q"]) {
            return None;
        }
        let cloned = git(root, &["clone", "-q", origin.to_str()?, peers.to_str()?]);
        assert!(cloned);
        let steps: [&[&str]; 7] = [
            &["config", "user.name", "peergate"],
            &["config", "user.email", "peergate@localhost"],
            &["symbolic-ref", "HEAD", "refs/heads/master"],
            &["commit", "-q", "--allow-empty", "-m", "init"],
            &["push", "-q", "origin", "master"],
            &["branch", "deploy"],
            &["push", "-q", "origin", "deploy"],
        ];
        for args in steps {
            assert!(git(&peers, args), "git {:?} failed", args);
        }
        Some(peers)
    }

    #[tokio::test]
    async fn commit_push_and_merge_against_real_repository() {
        let root = tempfile::tempdir().unwrap();
        let Some(peers) = two_line_checkout(root.path()) else {
            return;
        };
        let mut store = GitStore::new(
            peers.clone(),
            "origin".into(),
            "master".into(),
            "deploy".into(),
        );

        store.checkout_line(Line::Review).await.unwrap();
        store.refresh().await.unwrap();
        std::fs::write(peers.join("35123-abcde"), "key \"00\";\n").unwrap();
        store
            .stage_and_commit(&[PathBuf::from("35123-abcde")], "Added 35123-abcde")
            .await
            .unwrap();
        store.push(Line::Review).await.unwrap();

        store.checkout_line(Line::Production).await.unwrap();
        assert!(!peers.join("35123-abcde").exists());
        store.refresh().await.unwrap();
        store.merge(Line::Review).await.unwrap();
        store.push(Line::Production).await.unwrap();
        assert!(peers.join("35123-abcde").exists());
    }

    #[tokio::test]
    async fn conflicting_merge_is_aborted() {
        let root = tempfile::tempdir().unwrap();
        let Some(peers) = two_line_checkout(root.path()) else {
            return;
        };
        let mut store = GitStore::new(
            peers.clone(),
            "origin".into(),
            "master".into(),
            "deploy".into(),
        );

        store.checkout_line(Line::Review).await.unwrap();
        std::fs::write(peers.join("35000-x"), "key \"aa\";\n").unwrap();
        store
            .stage_and_commit(&[PathBuf::from("35000-x")], "Added 35000-x")
            .await
            .unwrap();

        store.checkout_line(Line::Production).await.unwrap();
        std::fs::write(peers.join("35000-x"), "key \"bb\";\n").unwrap();
        store
            .stage_and_commit(&[PathBuf::from("35000-x")], "Added 35000-x")
            .await
            .unwrap();

        let err = store.merge(Line::Review).await.unwrap_err();
        match err {
            StoreError::MergeConflict { from, into, .. } => {
                assert_eq!(from, "master");
                assert_eq!(into, "deploy");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!peers.join(".git").join("MERGE_HEAD").exists());
        assert_eq!(
            std::fs::read_to_string(peers.join("35000-x")).unwrap(),
            "key \"bb\";\n"
        );
    }

    fn git_stdout(dir: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn discarded_file_does_not_follow_checkout_to_production() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let Some(peers) = two_line_checkout(root.path()) else {
            return;
        };
        let hook = peers.join(".git").join("hooks").join("pre-commit");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut store = GitStore::new(
            peers.clone(),
            "origin".into(),
            "master".into(),
            "deploy".into(),
        );
        store.checkout_line(Line::Review).await.unwrap();
        let paths = [PathBuf::from("35123-abcde")];
        std::fs::write(peers.join("35123-abcde"), "key \"00\";\n").unwrap();
        let err = store
            .stage_and_commit(&paths, "Added 35123-abcde")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CommandFailed { .. }));

        store.discard(&paths).await.unwrap();
        store.checkout_line(Line::Production).await.unwrap();
        assert!(!peers.join("35123-abcde").exists());
        assert_eq!(git_stdout(&peers, &["status", "--porcelain"]), "");
    }

    #[tokio::test]
    async fn rewind_drops_unpushed_commits() {
        let root = tempfile::tempdir().unwrap();
        let Some(peers) = two_line_checkout(root.path()) else {
            return;
        };
        let mut store = GitStore::new(
            peers.clone(),
            "origin".into(),
            "master".into(),
            "deploy".into(),
        );

        store.checkout_line(Line::Review).await.unwrap();
        store.refresh().await.unwrap();
        let published = git_stdout(&peers, &["rev-parse", "HEAD"]);
        let paths = [PathBuf::from("35123-abcde")];
        std::fs::write(peers.join("35123-abcde"), "key \"00\";\n").unwrap();
        store
            .stage_and_commit(&paths, "Added 35123-abcde")
            .await
            .unwrap();
        assert_ne!(git_stdout(&peers, &["rev-parse", "HEAD"]), published);

        store.rewind(Line::Review).await.unwrap();
        store.discard(&paths).await.unwrap();
        assert_eq!(git_stdout(&peers, &["rev-parse", "HEAD"]), published);
        assert!(!peers.join("35123-abcde").exists());
        assert_eq!(git_stdout(&peers, &["status", "--porcelain"]), "");
    }
}
