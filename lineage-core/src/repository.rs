use crate::backend::{Backend, CommitStream};
use crate::config::Config;
use crate::error::Result;
use crate::refs::{LocalRef, Ref, RemoteRef};
use async_trait::async_trait;
use git2::{BranchType, Commit, Oid, Repository as Git2Repository, Sort};
use graph::CommitRecord;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub struct Repository {
    path: PathBuf,
    git_repo: Git2Repository,
}

impl Repository {
    /// Open an existing repository
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let git_repo = Git2Repository::open(&path)?;

        Ok(Repository { path, git_repo })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit id HEAD resolves to, if any
    pub fn head_id(&self) -> Option<String> {
        self.git_repo
            .head()
            .and_then(|head| head.resolve())
            .ok()
            .and_then(|reference| reference.target())
            .map(|oid| oid.to_string())
    }

    /// Walk commits reachable from branches, remote branches and HEAD in
    /// topological + time order, handing each to `visit` until it returns
    /// `false` or `limit` commits were visited. Returns the visited count.
    pub fn walk_commits<F>(&self, limit: Option<usize>, mut visit: F) -> Result<usize>
    where
        F: FnMut(CommitRecord) -> bool,
    {
        let mut revwalk = self.git_repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push_glob("refs/heads")?;
        revwalk.push_glob("refs/remotes")?;
        // detached or unborn HEAD
        revwalk.push_head().ok();

        let mut count = 0;
        for oid in revwalk {
            if limit.is_some_and(|limit| count >= limit) {
                break;
            }
            let commit = self.git_repo.find_commit(oid?)?;
            count += 1;
            if !visit(commit_to_record(&commit)) {
                break;
            }
        }

        Ok(count)
    }

    /// Collect the revision walk into memory
    pub fn commits(&self, limit: Option<usize>) -> Result<Vec<CommitRecord>> {
        let mut records = Vec::new();
        self.walk_commits(limit, |record| {
            records.push(record);
            true
        })?;
        Ok(records)
    }

    /// HEAD, local and remote branches, and tags peeled to their commits
    pub fn refs(&self) -> Result<Vec<Ref>> {
        let mut refs = Vec::new();

        if let Some(head) = self.head_id() {
            refs.push(Ref::Head(head));
        }

        for branch in self.git_repo.branches(None)? {
            let (branch, branch_type) = branch?;
            // symbolic refs such as origin/HEAD have no direct target
            let Some(target) = branch.get().target() else {
                continue;
            };
            let Some(name) = branch.name()?.map(str::to_owned) else {
                continue;
            };

            match branch_type {
                BranchType::Local => refs.push(Ref::LocalBranch(LocalRef {
                    id: target.to_string(),
                    name,
                    is_head: branch.is_head(),
                })),
                BranchType::Remote => {
                    if let Some((remote, name)) = name.split_once('/') {
                        refs.push(Ref::RemoteBranch(RemoteRef {
                            id: target.to_string(),
                            remote: remote.to_string(),
                            name: name.to_string(),
                        }));
                    }
                }
            }
        }

        let mut tags: Vec<(Oid, String)> = Vec::new();
        self.git_repo.tag_foreach(|oid, name| {
            if let Some(tag_name) = std::str::from_utf8(name)
                .ok()
                .and_then(|name| name.strip_prefix("refs/tags/"))
            {
                tags.push((oid, tag_name.to_string()));
            }
            true
        })?;
        for (oid, name) in tags {
            let Ok(commit) = self.git_repo.find_object(oid, None).and_then(|obj| obj.peel_to_commit()) else {
                continue;
            };
            refs.push(Ref::Tag(LocalRef {
                id: commit.id().to_string(),
                name,
                is_head: false,
            }));
        }

        Ok(refs)
    }
}

fn commit_to_record(commit: &Commit) -> CommitRecord {
    CommitRecord {
        id: commit.id().to_string(),
        parent_ids: commit.parent_ids().map(|oid| oid.to_string()).collect(),
        time: commit.time().seconds(),
        summary: commit.summary().map(str::to_owned),
        author: commit.author().name().map(str::to_owned),
    }
}

/// `Backend` reading local repositories through libgit2
#[derive(Debug, Clone)]
pub struct GitBackend {
    commit_limit: Option<usize>,
    channel_capacity: usize,
}

impl GitBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            commit_limit: config.commit_limit,
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

impl Default for GitBackend {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

#[async_trait]
impl Backend for GitBackend {
    async fn get_commits(&self, path: &Path) -> Result<CommitStream> {
        let repo = Repository::open(path)?;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let limit = self.commit_limit;

        tokio::task::spawn_blocking(move || {
            // a closed channel means the cycle was superseded
            let walked = repo.walk_commits(limit, |record| tx.blocking_send(Ok(record)).is_ok());
            match walked {
                Ok(count) => {
                    tracing::debug!(count, path = %repo.path().display(), "revision walk finished")
                }
                Err(err) => {
                    tx.blocking_send(Err(err)).ok();
                }
            }
        });

        Ok(rx)
    }

    async fn get_refs(&self, path: &Path) -> Result<Vec<Ref>> {
        Repository::open(path)?.refs()
    }
}
