use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

/// Ownership and state of a single submitted link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Who submitted the link first. Never changes afterwards.
    #[serde(alias = "Owner")]
    pub owner: UserId,
    /// `true` while the link is waiting for others to promote it.
    #[serde(rename = "isEnabled", alias = "IsEnabled")]
    pub enabled: bool,
}

/// Link ID to its record. Ordered, so listing is stable between runs.
pub type LinkMap = BTreeMap<String, LinkRecord>;

/// What [`LinkRegistry::add_link`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAdded {
    /// First time this ID was seen, the submitter now owns it.
    New,
    /// ID was already known. It's enabled again, still with its old owner.
    Reenabled { owner: UserId },
}

/// All links known to the bot, behind a single lock.
///
/// Nothing in here touches the disk; see [`crate::persistence`] for that.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: Mutex<LinkMap>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(links: LinkMap) -> Self {
        Self {
            links: Mutex::new(links),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkMap> {
        // Nothing panics while holding the lock, and the map is valid
        // after every single operation anyway.
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a link, or enable it again if it's already known.
    /// The owner is only ever set the first time.
    pub fn add_link(&self, submitter: UserId, id: &str) -> LinkAdded {
        let mut links = self.lock();
        if let Some(record) = links.get_mut(id) {
            record.enabled = true;
            return LinkAdded::Reenabled {
                owner: record.owner,
            };
        }

        links.insert(
            id.to_string(),
            LinkRecord {
                owner: submitter,
                enabled: true,
            },
        );
        LinkAdded::New
    }

    /// Disable a link. Returns `false` if there's no such link.
    pub fn mark_done(&self, id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(record) => {
                record.enabled = false;
                true
            }
            None => false,
        }
    }

    pub fn owner_of(&self, id: &str) -> Option<UserId> {
        self.lock().get(id).map(|record| record.owner)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: &str) -> Option<LinkRecord> {
        self.lock().get(id).copied()
    }

    /// Up to `limit` enabled link IDs that `viewer` did not submit.
    pub fn list_promotable(&self, viewer: UserId, limit: usize) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, record)| record.enabled && record.owner != viewer)
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Serialize every link as JSON, along with how many there are.
    /// Both come from the same instant.
    pub fn encode_snapshot(&self) -> Result<(Vec<u8>, usize), serde_json::Error> {
        let links = self.lock();
        Ok((serde_json::to_vec(&*links)?, links.len()))
    }

    /// Copy of the whole map.
    #[cfg(test)]
    pub(crate) fn to_map(&self) -> LinkMap {
        self.lock().clone()
    }
}
