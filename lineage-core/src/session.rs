//! Drives fetch cycles for the open repository.
//!
//! A [`RepoSession`] runs as a single task. It owns the backend and the
//! ingestion pipeline and reacts to [`SessionCommand`]s sent through a
//! [`SessionHandle`]. Opening another repository while a fetch is running
//! discards that fetch; refresh requests received during a fetch are folded
//! into one more fetch after it.

use crate::backend::{Backend, CommitEvent, CommitStream};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingest::IngestionPipeline;
use crate::refs::Ref;
use graph::GraphSnapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Switch to the repository at this path
    Open(PathBuf),
    /// Reload refs and commits of the current repository
    Refresh,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FetchStatus {
    #[default]
    Idle,
    Fetching,
    Complete,
    Failed(String),
}

impl FetchStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, FetchStatus::Complete | FetchStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub path: Option<PathBuf>,
    /// Refs as last reported by the backend
    pub refs: Vec<Ref>,
    pub fetch: FetchStatus,
    /// Fetch cycles completed for the current path
    pub cycles: u64,
    /// Graph revision the last completed cycle produced
    pub revision: u64,
}

impl SessionStatus {
    /// Commit HEAD currently resolves to according to the backend
    pub fn head(&self) -> Option<&str> {
        self.refs.iter().find_map(|reference| match reference {
            Ref::Head(id) => Some(id.as_str()),
            _ => None,
        })
    }
}

/// How a fetch cycle ended
enum CycleEnd {
    Done { refresh_requested: bool },
    Superseded(SessionCommand),
}

pub struct RepoSession<B> {
    backend: B,
    pipeline: IngestionPipeline,
    path: Option<PathBuf>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    commands_open: bool,
    status: watch::Sender<SessionStatus>,
}

impl<B: Backend> RepoSession<B> {
    pub fn new(backend: B, config: &Config) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(SessionStatus::default());
        let pipeline = IngestionPipeline::new(config.throttle_interval());

        let handle = SessionHandle {
            commands: command_tx,
            snapshots: pipeline.subscribe(),
            status: status_rx,
        };
        let session = Self {
            backend,
            pipeline,
            path: None,
            commands,
            commands_open: true,
            status,
        };
        (session, handle)
    }

    /// Process commands until every handle is dropped
    pub async fn run(mut self) {
        let mut next: Option<SessionCommand> = None;
        loop {
            let command = match next.take() {
                Some(command) => command,
                None => {
                    let deadline = self.pipeline.deadline();
                    tokio::select! {
                        command = self.commands.recv() => match command {
                            Some(command) => command,
                            None => break,
                        },
                        _ = sleep_until(deadline) => {
                            self.pipeline.poll(Instant::now());
                            continue;
                        }
                    }
                }
            };

            next = match command {
                SessionCommand::Open(path) => {
                    self.open(path);
                    self.refresh().await
                }
                SessionCommand::Refresh => self.refresh().await,
            };
        }

        // let the last coalesced snapshot out before stopping
        if let Some(deadline) = self.pipeline.deadline() {
            sleep_until(Some(deadline)).await;
            self.pipeline.poll(Instant::now());
        }
        tracing::debug!("session stopped");
    }

    fn open(&mut self, path: PathBuf) {
        tracing::info!(path = %path.display(), "opening repository");
        self.pipeline.reset();
        self.status.send_modify(|status| {
            *status = SessionStatus {
                path: Some(path.clone()),
                ..SessionStatus::default()
            }
        });
        self.path = Some(path);
    }

    /// Reload refs and commits, repeating while refreshes queue up.
    /// Returns the command that cut the refresh short, if any.
    async fn refresh(&mut self) -> Option<SessionCommand> {
        let Some(path) = self.path.clone() else {
            tracing::warn!("refresh requested without an open repository");
            return None;
        };

        loop {
            self.load_refs(&path).await;
            match self.fetch(&path).await {
                CycleEnd::Superseded(command) => return Some(command),
                CycleEnd::Done { refresh_requested: true } => continue,
                CycleEnd::Done { refresh_requested: false } => return None,
            }
        }
    }

    async fn load_refs(&mut self, path: &Path) {
        match self.backend.get_refs(path).await {
            Ok(refs) => self.status.send_modify(|status| status.refs = refs),
            Err(err) => tracing::error!(path = %path.display(), error = %err, "failed to read refs"),
        }
    }

    async fn fetch(&mut self, path: &Path) -> CycleEnd {
        let cycle = Uuid::new_v4();
        self.set_fetch(FetchStatus::Fetching);

        let stream = match self.backend.get_commits(path).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(%cycle, path = %path.display(), error = %err, "failed to start fetch");
                self.set_fetch(FetchStatus::Failed(err.to_string()));
                return CycleEnd::Done {
                    refresh_requested: false,
                };
            }
        };

        tracing::debug!(%cycle, path = %path.display(), "fetch started");
        self.pipeline.apply(CommitEvent::Start, Instant::now());
        self.drain(cycle, stream).await
    }

    async fn drain(&mut self, cycle: Uuid, mut stream: CommitStream) -> CycleEnd {
        let mut refresh_requested = false;
        loop {
            let deadline = self.pipeline.deadline();
            tokio::select! {
                item = stream.recv() => match item {
                    Some(Ok(record)) => {
                        self.pipeline.apply(CommitEvent::Update(record), Instant::now());
                    }
                    Some(Err(err)) => {
                        tracing::error!(%cycle, error = %err, "fetch failed");
                        self.pipeline.abort(&err.to_string());
                        self.set_fetch(FetchStatus::Failed(err.to_string()));
                        return CycleEnd::Done { refresh_requested };
                    }
                    None => {
                        self.pipeline.apply(CommitEvent::End, Instant::now());
                        let store = self.pipeline.store();
                        tracing::info!(%cycle, commits = store.len(), "fetch complete");
                        let revision = store.revision();
                        self.status.send_modify(|status| {
                            status.fetch = FetchStatus::Complete;
                            status.cycles += 1;
                            status.revision = revision;
                        });
                        return CycleEnd::Done { refresh_requested };
                    }
                },
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(SessionCommand::Refresh) => refresh_requested = true,
                    Some(command @ SessionCommand::Open(_)) => {
                        tracing::debug!(%cycle, "fetch superseded");
                        self.pipeline.abort("superseded");
                        return CycleEnd::Superseded(command);
                    }
                    None => self.commands_open = false,
                },
                _ = sleep_until(deadline) => self.pipeline.poll(Instant::now()),
            }
        }
    }

    fn set_fetch(&self, fetch: FetchStatus) {
        self.status.send_modify(|status| status.fetch = fetch);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// Client side of a running [`RepoSession`]
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<Arc<GraphSnapshot>>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn open(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(SessionCommand::Open(path.into()))
    }

    pub fn refresh(&self) -> Result<()> {
        self.send(SessionCommand::Refresh)
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    /// Latest published graph
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<Arc<GraphSnapshot>> {
        self.snapshots.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn status_updates(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> Result<SessionStatus>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(predicate)
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(settled.clone())
    }

    /// Wait until the graph of `revision` has been published
    pub async fn wait_for_snapshot(&self, revision: u64) -> Result<Arc<GraphSnapshot>> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| snapshot.revision() == revision)
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(snapshot.clone())
    }

    /// Wait for the first fetch of `path` to complete or fail
    pub async fn wait_for_fetch(&self, path: &Path) -> Result<SessionStatus> {
        self.wait_for(|status| status.path.as_deref() == Some(path) && status.fetch.is_settled())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graph::CommitRecord;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Clone)]
    enum Script {
        Commits(Vec<CommitRecord>),
        /// Send the commits, then keep the stream open until dropped
        Hang(Vec<CommitRecord>),
        /// Send the commits, then an error
        FailAfter(Vec<CommitRecord>),
        /// Send the commits, then end the stream once the gate opens
        Gated(Vec<CommitRecord>, Arc<Notify>),
    }

    impl Script {
        fn records(&self) -> &[CommitRecord] {
            match self {
                Script::Commits(records)
                | Script::Hang(records)
                | Script::FailAfter(records)
                | Script::Gated(records, _) => records,
            }
        }
    }

    #[derive(Default)]
    struct ScriptedBackend {
        scripts: Mutex<HashMap<PathBuf, Script>>,
    }

    impl ScriptedBackend {
        fn with(self, path: &str, script: Script) -> Self {
            self.set(path, script);
            self
        }

        fn set(&self, path: &str, script: Script) {
            self.scripts.lock().unwrap().insert(PathBuf::from(path), script);
        }
    }

    #[async_trait]
    impl Backend for Arc<ScriptedBackend> {
        async fn get_commits(&self, path: &Path) -> Result<CommitStream> {
            let script = self.scripts.lock().unwrap().get(path).cloned();
            let script = script.ok_or_else(|| Error::Backend(format!("no repository at {}", path.display())))?;
            let (tx, rx) = mpsc::channel(4);

            tokio::spawn(async move {
                for record in script.records().iter().cloned() {
                    if tx.send(Ok(record)).await.is_err() {
                        return;
                    }
                }
                match script {
                    Script::Commits(_) => {}
                    Script::Hang(_) => tx.closed().await,
                    Script::FailAfter(_) => {
                        tx.send(Err(Error::Backend("connection reset".into()))).await.ok();
                    }
                    Script::Gated(_, gate) => gate.notified().await,
                }
            });
            Ok(rx)
        }

        async fn get_refs(&self, path: &Path) -> Result<Vec<Ref>> {
            let scripts = self.scripts.lock().unwrap();
            let head = scripts
                .get(path)
                .and_then(|script| script.records().first())
                .map(|record| Ref::Head(record.id.clone()));
            Ok(head.into_iter().collect())
        }
    }

    fn chain(ids: &[&str]) -> Vec<CommitRecord> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let parents = ids.get(i + 1).map(|p| p.to_string()).into_iter().collect();
                CommitRecord::new(*id, parents, (ids.len() - i) as i64)
            })
            .collect()
    }

    fn start(backend: Arc<ScriptedBackend>) -> SessionHandle {
        let config = Config {
            throttle_ms: 0,
            ..Config::default()
        };
        let (session, handle) = RepoSession::new(backend, &config);
        tokio::spawn(session.run());
        handle
    }

    fn order(handle: &SessionHandle) -> Vec<String> {
        handle.snapshot().order().to_vec()
    }

    #[tokio::test]
    async fn open_fetches_commits_and_refs() {
        let backend = Arc::new(ScriptedBackend::default().with("/repo", Script::Commits(chain(&["c", "b", "a"]))));
        let handle = start(backend);

        handle.open("/repo").unwrap();
        let status = handle.wait_for_fetch(Path::new("/repo")).await.unwrap();

        assert_eq!(status.fetch, FetchStatus::Complete);
        assert_eq!(status.cycles, 1);
        assert_eq!(status.head(), Some("c"));
        assert_eq!(order(&handle), vec!["c", "b", "a"]);

        let mut selection = crate::ActiveSelection::from_refs(&status.refs).unwrap();
        let snapshot = handle.snapshot();
        assert!(selection.is_related(&snapshot, "a"));
    }

    #[tokio::test]
    async fn completed_graph_is_published_despite_throttling() {
        let backend = Arc::new(ScriptedBackend::default().with("/repo", Script::Commits(chain(&["d", "c", "b", "a"]))));
        let config = Config {
            throttle_ms: 50,
            ..Config::default()
        };
        let (session, handle) = RepoSession::new(backend, &config);
        tokio::spawn(session.run());

        handle.open("/repo").unwrap();
        let status = handle.wait_for_fetch(Path::new("/repo")).await.unwrap();
        let snapshot = handle.wait_for_snapshot(status.revision).await.unwrap();
        assert_eq!(snapshot.order(), ["d", "c", "b", "a"]);
    }

    #[tokio::test]
    async fn refresh_runs_another_cycle() {
        let backend = Arc::new(ScriptedBackend::default().with("/repo", Script::Commits(chain(&["b", "a"]))));
        let handle = start(backend.clone());
        handle.open("/repo").unwrap();
        handle.wait_for_fetch(Path::new("/repo")).await.unwrap();

        backend.set("/repo", Script::Commits(chain(&["c", "b", "a"])));
        handle.refresh().unwrap();
        handle.wait_for(|status| status.cycles == 2).await.unwrap();
        assert_eq!(order(&handle), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn refreshes_during_a_fetch_fold_into_one_rerun() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(
            ScriptedBackend::default().with("/repo", Script::Gated(chain(&["b", "a"]), gate.clone())),
        );
        let handle = start(backend.clone());

        handle.open("/repo").unwrap();
        handle.refresh().unwrap();
        handle.refresh().unwrap();

        // the first stream is held open, so both refreshes land mid-fetch
        let mut snapshots = handle.snapshots();
        snapshots.wait_for(|snapshot| snapshot.len() == 2).await.unwrap();
        assert_eq!(handle.status().fetch, FetchStatus::Fetching);

        backend.set("/repo", Script::Commits(chain(&["c", "b", "a"])));
        gate.notify_one();

        let status = handle
            .wait_for(|status| status.cycles == 2 && status.fetch == FetchStatus::Complete)
            .await
            .unwrap();
        assert_eq!(status.head(), Some("c"));
        assert_eq!(order(&handle), vec!["c", "b", "a"]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status().cycles, 2);
        assert_eq!(handle.status().fetch, FetchStatus::Complete);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_last_snapshot() {
        let backend = Arc::new(ScriptedBackend::default().with("/repo", Script::Commits(chain(&["b", "a"]))));
        let handle = start(backend.clone());
        handle.open("/repo").unwrap();
        handle.wait_for_fetch(Path::new("/repo")).await.unwrap();
        let before = handle.snapshot();

        backend.set("/repo", Script::FailAfter(chain(&["x", "b", "a"])));
        handle.refresh().unwrap();
        let status = handle
            .wait_for(|status| matches!(status.fetch, FetchStatus::Failed(_)))
            .await
            .unwrap();

        assert_eq!(status.cycles, 1);
        let after = handle.snapshot();
        assert_eq!(after.order(), before.order());
        assert_eq!(after.revision(), before.revision());
    }

    #[tokio::test]
    async fn missing_repository_reports_failure() {
        let handle = start(Arc::new(ScriptedBackend::default()));
        handle.open("/nowhere").unwrap();
        let status = handle.wait_for_fetch(Path::new("/nowhere")).await.unwrap();
        assert!(matches!(status.fetch, FetchStatus::Failed(ref msg) if msg.contains("/nowhere")));
        assert!(handle.snapshot().is_empty());
    }

    #[tokio::test]
    async fn opening_another_repository_discards_running_fetch() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .with("/slow", Script::Hang(chain(&["s2", "s1"])))
                .with("/fast", Script::Commits(chain(&["f2", "f1"]))),
        );
        let handle = start(backend);

        handle.open("/slow").unwrap();
        let mut snapshots = handle.snapshots();
        snapshots.wait_for(|snapshot| snapshot.len() == 2).await.unwrap();
        assert_eq!(handle.status().fetch, FetchStatus::Fetching);

        handle.open("/fast").unwrap();
        let status = handle.wait_for_fetch(Path::new("/fast")).await.unwrap();

        assert_eq!(status.fetch, FetchStatus::Complete);
        assert_eq!(status.cycles, 1);
        assert_eq!(order(&handle), vec!["f2", "f1"]);
        assert!(handle.snapshot().get("s1").is_none());
    }

    #[tokio::test]
    async fn git_backend_feeds_the_session() {
        use crate::repository::tests::{commit_at, create_test_repo};
        use crate::GitBackend;

        let (dir, repo) = create_test_repo();
        let base = commit_at(&repo, "base", &[], 100, Some("HEAD"));
        let tip = commit_at(&repo, "tip", &[base], 200, Some("HEAD"));

        let (session, handle) = RepoSession::new(GitBackend::default(), &Config::default());
        tokio::spawn(session.run());
        handle.open(dir.path()).unwrap();

        let status = handle.wait_for_fetch(dir.path()).await.unwrap();
        assert_eq!(status.fetch, FetchStatus::Complete);
        assert_eq!(status.head(), Some(tip.to_string().as_str()));

        let snapshot = handle.wait_for_snapshot(status.revision).await.unwrap();
        assert_eq!(snapshot.order(), [tip.to_string(), base.to_string()]);
        assert_eq!(snapshot.get(&base.to_string()).unwrap().descendant_ids, vec![tip.to_string()]);
    }

    #[tokio::test]
    async fn handle_fails_once_session_is_gone() {
        let (session, handle) = RepoSession::new(Arc::new(ScriptedBackend::default()), &Config::default());
        drop(session);
        assert!(matches!(handle.refresh(), Err(Error::SessionClosed)));
    }
}
