use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A repository as the workspace layer currently knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub id: Uuid,
    pub path: PathBuf,
    pub name: String,
}

/// A worktree of a repository. The main checkout is a worktree whose path is the repo path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeRef {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub path: PathBuf,
    pub name: String,
}

impl RepoRef {
    pub fn new(id: Uuid, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = display_name_for(&path);
        Self { id, path, name }
    }
}

impl WorktreeRef {
    pub fn new(id: Uuid, repo_id: Uuid, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = display_name_for(&path);
        Self {
            id,
            repo_id,
            path,
            name,
        }
    }
}

fn display_name_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Read access to the workspace database, used when reconciling a checkpoint.
///
/// Lookups by id can fail after the database is regenerated; the path lookups
/// are the fallback.
pub trait WorkspaceLookup: Send + Sync {
    fn repo_by_id(&self, id: Uuid) -> Option<RepoRef>;
    fn repo_by_path(&self, path: &Path) -> Option<RepoRef>;
    fn worktree_by_id(&self, id: Uuid) -> Option<WorktreeRef>;
    fn worktree_by_path(&self, path: &Path) -> Option<WorktreeRef>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkspace {
    repos: Vec<RepoRef>,
    worktrees: Vec<WorktreeRef>,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, repo: RepoRef) -> Self {
        self.repos.push(repo);
        self
    }

    pub fn with_worktree(mut self, worktree: WorktreeRef) -> Self {
        self.worktrees.push(worktree);
        self
    }
}

impl WorkspaceLookup for InMemoryWorkspace {
    fn repo_by_id(&self, id: Uuid) -> Option<RepoRef> {
        self.repos.iter().find(|repo| repo.id == id).cloned()
    }

    fn repo_by_path(&self, path: &Path) -> Option<RepoRef> {
        self.repos.iter().find(|repo| repo.path == path).cloned()
    }

    fn worktree_by_id(&self, id: Uuid) -> Option<WorktreeRef> {
        self.worktrees.iter().find(|wt| wt.id == id).cloned()
    }

    fn worktree_by_path(&self, path: &Path) -> Option<WorktreeRef> {
        self.worktrees.iter().find(|wt| wt.path == path).cloned()
    }
}
