use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRef {
    pub id: String,
    pub name: String,
    pub is_head: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub id: String,
    pub remote: String,
    pub name: String,
}

/// A reference as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Ref {
    /// Commit id HEAD resolves to
    Head(String),
    LocalBranch(LocalRef),
    RemoteBranch(RemoteRef),
    Tag(LocalRef),
}

/// References grouped for display
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Refs {
    pub head: Option<String>,
    pub active_branch: Option<LocalRef>,
    pub local: Vec<LocalRef>,
    /// Remote branches by remote name
    pub remotes: BTreeMap<String, Vec<RemoteRef>>,
    pub tags: Vec<LocalRef>,
}

impl Refs {
    pub fn from_list(refs: Vec<Ref>) -> Self {
        let mut result = Refs::default();

        for reference in refs {
            match reference {
                Ref::Head(id) => result.head = Some(id),
                Ref::LocalBranch(branch) => {
                    if branch.is_head {
                        result.active_branch = Some(branch.clone());
                    }
                    result.local.push(branch);
                }
                Ref::RemoteBranch(branch) => {
                    result
                        .remotes
                        .entry(branch.remote.clone())
                        .or_default()
                        .push(branch);
                }
                Ref::Tag(tag) => result.tags.push(tag),
            }
        }

        result.local.sort_by(|a, b| a.name.cmp(&b.name));
        result.tags.sort_by(|a, b| a.name.cmp(&b.name));
        for branches in result.remotes.values_mut() {
            branches.sort_by(|a, b| a.name.cmp(&b.name));
        }

        result
    }

    /// Names of every ref pointing at `commit_id`
    pub fn names_for(&self, commit_id: &str) -> Vec<String> {
        let local = self.local.iter().filter(|r| r.id == commit_id).map(|r| r.name.clone());
        let remote = self
            .remotes
            .values()
            .flatten()
            .filter(|r| r.id == commit_id)
            .map(|r| format!("{}/{}", r.remote, r.name));
        let tags = self.tags.iter().filter(|r| r.id == commit_id).map(|r| r.name.clone());
        local.chain(remote).chain(tags).collect()
    }
}
