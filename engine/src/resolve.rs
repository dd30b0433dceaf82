//! Conflict resolution between the two replicas.
//!
//! Whole-record last-writer-wins over `updatedAt`. A local version survives
//! only when it is strictly newer; ties go to the server. Concurrent edits
//! to different fields of the same record are not merged, the older record
//! is dropped as a whole.

use crate::{model::Versioned, Category, EntityRef, RecordStore, ServerId, Timestamp};
use serde::{Deserialize, Serialize};

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// The local version is strictly newer and is pushed to the server
    LocalWins,
    /// The remote version is newer or equal and overwrites the local copy
    RemoteWins,
}

/// Decide between two versions by their timestamps alone.
pub fn resolve(local: Timestamp, remote: Timestamp) -> Resolution {
    if local > remote {
        Resolution::LocalWins
    } else {
        Resolution::RemoteWins
    }
}

/// Pick the surviving version of a record.
pub fn pick<'a, T: Versioned>(local: &'a T, remote: &'a T) -> (Resolution, &'a T) {
    match resolve(local.updated_at(), remote.updated_at()) {
        Resolution::LocalWins => (Resolution::LocalWins, local),
        Resolution::RemoteWins => (Resolution::RemoteWins, remote),
    }
}

/// A detected conflict and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: ServerId,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
    pub resolution: Resolution,
}

/// What the server should do with an incoming category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMerge {
    /// No server identifier yet: create and assign one
    Create,
    /// Carries an identifier the server does not have: create under that id
    CreateWithId(ServerId),
    /// Incoming version is strictly newer: overwrite
    Update(ServerId),
    /// Server version is newer or equal: keep it
    Keep(ServerId),
}

/// Server-side merge rule for one pushed category.
pub fn server_merge(incoming: &Category, existing: Option<&Category>) -> ServerMerge {
    let id = match incoming.id {
        EntityRef::Local(_) => return ServerMerge::Create,
        EntityRef::Remote(id) => id,
    };
    match existing {
        None => ServerMerge::CreateWithId(id),
        Some(current) => match resolve(incoming.updated_at, current.updated_at) {
            Resolution::LocalWins => ServerMerge::Update(id),
            Resolution::RemoteWins => ServerMerge::Keep(id),
        },
    }
}

/// Outcome of merging a remote category list into the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Present remotely, absent locally
    pub inserted: usize,
    /// Remote version replaced the local one
    pub overwritten: usize,
    /// Local version is strictly newer and stays queued for push
    pub kept_local: usize,
    pub conflicts: Vec<Conflict>,
}

/// Merge the server's category list into a local table.
///
/// Unknown ids are inserted unconditionally. Known ids go through
/// [`resolve`]; only differing records count as conflicts.
pub fn merge_remote_categories<S>(table: &mut S, remote: Vec<Category>) -> MergeReport
where
    S: RecordStore<Category>,
{
    let mut report = MergeReport::default();
    for incoming in remote {
        let Some(id) = incoming.id.server_id() else {
            tracing::warn!(id = %incoming.id, "server sent a category without a server id");
            continue;
        };
        let Some(local) = table.get(&incoming.id) else {
            table.put(incoming);
            report.inserted += 1;
            continue;
        };
        if *local == incoming {
            continue;
        }

        let (resolution, _) = pick(local, &incoming);
        report.conflicts.push(Conflict {
            id,
            local_updated_at: local.updated_at,
            remote_updated_at: incoming.updated_at,
            resolution,
        });
        match resolution {
            Resolution::LocalWins => {
                tracing::debug!(id, "local category is newer, keeping it");
                report.kept_local += 1;
            }
            Resolution::RemoteWins => {
                table.put(incoming);
                report.overwritten += 1;
            }
        }
    }
    report
}
