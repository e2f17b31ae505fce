//! In-memory [`VersionedStore`] for tests.
//!
//! Peer files still live in a real directory (the registry scans it), but
//! branch switching, commits, pushes and merges only touch an in-memory
//! log.  Every call is journalled and any operation can be made to fail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::VersionedStore;
use crate::error::StoreError;
use crate::types::Line;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Checkout,
    Refresh,
    Commit,
    Push,
    Merge,
    Discard,
    Rewind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub paths: Vec<PathBuf>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Journal {
    pub current: Option<Line>,
    pub calls: Vec<(Op, Option<Line>)>,
    pub commits: HashMap<Line, Vec<Commit>>,
    pub pushes: Vec<Line>,
    /// Number of commits on each line that the remote has seen.
    pub published: HashMap<Line, usize>,
    pub fail_on: Option<Op>,
    pub conflict_on_merge: bool,
}

impl Journal {
    pub fn commits_on(&self, line: Line) -> &[Commit] {
        self.commits.get(&line).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn mutations(&self) -> usize {
        self.calls
            .iter()
            .filter(|(op, _)| matches!(op, Op::Commit | Op::Push | Op::Merge))
            .count()
    }
}

/// Clones share the same journal, so a test can keep one handle while the
/// registry owns the other.
#[derive(Clone)]
pub struct MemoryStore {
    workdir: PathBuf,
    pub journal: Arc<Mutex<Journal>>,
}

impl MemoryStore {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            journal: Arc::new(Mutex::new(Journal {
                current: Some(Line::Production),
                ..Default::default()
            })),
        }
    }

    pub fn fail_on(&self, op: Op) {
        self.journal.lock().unwrap().fail_on = Some(op);
    }

    pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    fn record(&self, op: Op, line: Option<Line>) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().unwrap();
        journal.calls.push((op, line));
        if journal.fail_on == Some(op) {
            return Err(StoreError::CommandFailed {
                command: format!("{op:?}"),
                status: "exit status: 1".into(),
                stderr: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn checkout_line(&mut self, line: Line) -> Result<(), StoreError> {
        self.record(Op::Checkout, Some(line))?;
        self.journal.lock().unwrap().current = Some(line);
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), StoreError> {
        let current = self.journal.lock().unwrap().current;
        self.record(Op::Refresh, current)
    }

    async fn stage_and_commit(
        &mut self,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<(), StoreError> {
        let current = self.journal.lock().unwrap().current;
        self.record(Op::Commit, current)?;
        let mut journal = self.journal.lock().unwrap();
        let line = journal.current.unwrap_or(Line::Production);
        journal.commits.entry(line).or_default().push(Commit {
            paths: paths.to_vec(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn push(&mut self, line: Line) -> Result<(), StoreError> {
        self.record(Op::Push, Some(line))?;
        let mut journal = self.journal.lock().unwrap();
        journal.pushes.push(line);
        let count = journal.commits_on(line).len();
        journal.published.insert(line, count);
        Ok(())
    }

    async fn merge(&mut self, from: Line) -> Result<(), StoreError> {
        let current = self.journal.lock().unwrap().current;
        self.record(Op::Merge, current)?;
        let mut journal = self.journal.lock().unwrap();
        if journal.conflict_on_merge {
            return Err(StoreError::MergeConflict {
                from: format!("{from:?}"),
                into: format!("{current:?}"),
                detail: "CONFLICT (add/add)".into(),
            });
        }
        let into = journal.current.unwrap_or(Line::Production);
        let merged = journal.commits_on(from).to_vec();
        journal.commits.entry(into).or_default().extend(merged);
        Ok(())
    }

    async fn discard(&mut self, paths: &[PathBuf]) -> Result<(), StoreError> {
        let current = self.journal.lock().unwrap().current;
        self.record(Op::Discard, current)?;
        for path in paths {
            let full = self.workdir.join(path);
            match std::fs::remove_file(&full) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Remove {
                        path: full.display().to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    async fn rewind(&mut self, line: Line) -> Result<(), StoreError> {
        self.record(Op::Rewind, Some(line))?;
        let mut journal = self.journal.lock().unwrap();
        journal.current = Some(line);
        let published = journal.published.get(&line).copied().unwrap_or(0);
        if let Some(commits) = journal.commits.get_mut(&line) {
            commits.truncate(published);
        }
        Ok(())
    }
}
