/*
 * mailcache - backends module
 *
 * Copyright 2020 Manos Pitsidianakis
 *
 * This file is part of mailcache.
 *
 * mailcache is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mailcache is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mailcache. If not, see <http://www.gnu.org/licenses/>.
 */

/*!
 * The capability contract the folder cache consumes.
 *
 * A backend driver provides a [`MailStore`] per configured service and a
 * [`MailFolder`] per opened folder. The cache never touches message bodies;
 * it enumerates folders, reads summary counts and message infos, and
 * subscribes to store-level and folder-level change events through the
 * consumer callback types below.
 */

use std::fmt;
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::email::{Flag, MessageId, MessageInfo};
use crate::error::Result;

/// Hash of a store's URI/name, used to key stores everywhere.
pub type StoreHash = u64;

/// Token returned by event subscriptions, used to disconnect them.
pub type HandlerId = u64;

#[macro_export]
macro_rules! store_hash {
    ($name:expr) => {{
        use std::collections::hash_map::DefaultHasher;
        use std::hash::Hasher;
        let mut hasher = DefaultHasher::new();
        hasher.write($name.as_bytes());
        hasher.finish()
    }};
}

bitflags! {
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StoreFlags: u8 {
        /// The store aggregates folders of other stores (search/virtual
        /// folders); its folders must be re-opened when they reappear.
        const IS_VIRTUAL            = 0b0000_0001;
        const HAS_VIRTUAL_TRASH     = 0b0000_0010;
        const HAS_VIRTUAL_JUNK      = 0b0000_0100;
        const IS_REMOTE             = 0b0000_1000;
        const SUPPORTS_INITIAL_SETUP = 0b0001_0000;
    }
}

bitflags! {
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FolderInfoFlags: u32 {
        /// The folder exists in the hierarchy but holds no messages and
        /// cannot be opened.
        const NOSELECT    = 0b0000_0001;
        const NOINFERIORS = 0b0000_0010;
        const SUBSCRIBED  = 0b0000_0100;
        const VIRTUAL     = 0b0000_1000;
        const SYSTEM      = 0b0001_0000;
    }
}

#[derive(Debug, Copy, Hash, Eq, Clone, Serialize, Deserialize, PartialEq)]
pub enum SpecialUsageMailbox {
    Normal,
    Inbox,
    Archive,
    Drafts,
    Flagged,
    Junk,
    Outbox,
    Sent,
    Trash,
}

impl std::fmt::Display for SpecialUsageMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use SpecialUsageMailbox::*;
        write!(
            f,
            "{}",
            match self {
                Normal => "Normal",
                Inbox => "Inbox",
                Archive => "Archive",
                Drafts => "Drafts",
                Flagged => "Flagged",
                Junk => "Junk",
                Outbox => "Outbox",
                Sent => "Sent",
                Trash => "Trash",
            }
        )
    }
}

impl Default for SpecialUsageMailbox {
    fn default() -> Self {
        SpecialUsageMailbox::Normal
    }
}

impl SpecialUsageMailbox {
    pub fn detect_usage(name: &str) -> Option<SpecialUsageMailbox> {
        if name.eq_ignore_ascii_case("inbox") {
            Some(SpecialUsageMailbox::Inbox)
        } else if name.eq_ignore_ascii_case("archive") {
            Some(SpecialUsageMailbox::Archive)
        } else if name.eq_ignore_ascii_case("drafts") {
            Some(SpecialUsageMailbox::Drafts)
        } else if name.eq_ignore_ascii_case("junk") || name.eq_ignore_ascii_case("spam") {
            Some(SpecialUsageMailbox::Junk)
        } else if name.eq_ignore_ascii_case("outbox") {
            Some(SpecialUsageMailbox::Outbox)
        } else if name.eq_ignore_ascii_case("sent") {
            Some(SpecialUsageMailbox::Sent)
        } else if name.eq_ignore_ascii_case("trash") {
            Some(SpecialUsageMailbox::Trash)
        } else {
            Some(SpecialUsageMailbox::Normal)
        }
    }
}

/// One node of a folder enumeration.
///
/// `unread` is `None` when the backend did not check the folder; a cached
/// count, if any, stays authoritative in that case.
#[derive(Debug, Clone, Default)]
pub struct FolderMeta {
    pub full_name: String,
    pub flags: FolderInfoFlags,
    pub usage: SpecialUsageMailbox,
    pub unread: Option<u32>,
    pub total: u32,
}

impl FolderMeta {
    pub fn new(full_name: &str) -> Self {
        FolderMeta {
            full_name: full_name.to_string(),
            usage: SpecialUsageMailbox::detect_usage(full_name).unwrap_or_default(),
            ..FolderMeta::default()
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Disconnected
    }
}

/// Store-level events a [`MailStore`] reports to its subscribers.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    FolderCreated(FolderMeta),
    FolderDeleted { full_name: String },
    /// `new_subtree` holds the renamed folder and all its descendants,
    /// already carrying their new names; `new_subtree[0]` is the base.
    FolderRenamed {
        old_base: String,
        new_subtree: Vec<FolderMeta>,
    },
    FolderSubscribed(FolderMeta),
    FolderUnsubscribed { full_name: String },
    ConnectionStatusChanged(ConnectionStatus),
}

/// Incremental change set reported by an opened folder.
#[derive(Debug, Clone, Default)]
pub struct FolderChanges {
    pub added: SmallVec<[String; 8]>,
    pub removed: SmallVec<[String; 8]>,
    pub changed: SmallVec<[String; 8]>,
}

impl FolderChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Clone)]
pub struct StoreEventConsumer(Arc<dyn Fn(StoreHash, StoreEvent) + Send + Sync>);

impl StoreEventConsumer {
    pub fn new(b: Arc<dyn Fn(StoreHash, StoreEvent) + Send + Sync>) -> Self {
        StoreEventConsumer(b)
    }
}

impl fmt::Debug for StoreEventConsumer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StoreEventConsumer")
    }
}

impl Deref for StoreEventConsumer {
    type Target = dyn Fn(StoreHash, StoreEvent) + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &(*self.0)
    }
}

#[derive(Clone)]
pub struct FolderChangeConsumer(Arc<dyn Fn(StoreHash, &str, FolderChanges) + Send + Sync>);

impl FolderChangeConsumer {
    pub fn new(b: Arc<dyn Fn(StoreHash, &str, FolderChanges) + Send + Sync>) -> Self {
        FolderChangeConsumer(b)
    }
}

impl fmt::Debug for FolderChangeConsumer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FolderChangeConsumer")
    }
}

impl Deref for FolderChangeConsumer {
    type Target = dyn Fn(StoreHash, &str, FolderChanges) + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &(*self.0)
    }
}

/// A configured mail service with a folder hierarchy.
///
/// All methods may be called from any thread; blocking methods
/// (`prepare_online`, `initial_setup`, `list_folders`, `open_folder`) are
/// only ever called from worker threads.
pub trait MailStore: Debug + Send + Sync {
    fn name(&self) -> &str;
    fn hash(&self) -> StoreHash;
    fn flags(&self) -> StoreFlags;

    fn connection_status(&self) -> ConnectionStatus;
    fn host_reachable(&self) -> bool {
        true
    }

    /// Bring the service online if it is not. Best effort; enumeration is
    /// attempted regardless of the outcome.
    fn prepare_online(&self) -> Result<()> {
        Ok(())
    }

    /// One-time local setup, run before the first enumeration ever done
    /// for this store.
    fn initial_setup(&self) -> Result<()> {
        Ok(())
    }

    /// Enumerate the subscribed folder hierarchy, recursively, without
    /// opening folders. The returned list is flat.
    fn list_folders(&self) -> Result<Vec<FolderMeta>>;

    fn supports_subscriptions(&self) -> bool {
        false
    }

    fn open_folder(&self, full_name: &str) -> Result<Arc<dyn MailFolder>>;

    fn virtual_trash(&self) -> Option<Arc<dyn MailFolder>> {
        None
    }

    fn virtual_junk(&self) -> Option<Arc<dyn MailFolder>> {
        None
    }

    fn subscribe(&self, consumer: StoreEventConsumer) -> HandlerId;
    fn unsubscribe(&self, handler: HandlerId);
}

/// An opened folder with a live summary.
pub trait MailFolder: Debug + Send + Sync {
    fn full_name(&self) -> &str;
    fn store_hash(&self) -> StoreHash;
    fn special_usage(&self) -> SpecialUsageMailbox;

    fn message_count(&self) -> u32;
    /// `None` when the backend has not computed the count yet.
    fn unread_count(&self) -> Option<u32>;
    fn deleted_count(&self) -> u32;
    fn junk_count(&self) -> u32;

    fn message_info(&self, uid: &str) -> Option<MessageInfo>;
    fn set_flags(&self, uid: &str, flags: Flag) -> Result<()>;
    fn set_user_flag(&self, uid: &str, name: &str) -> Result<()>;

    /// Find uids of messages whose Message-ID matches any of `ids`.
    fn uids_matching_message_ids(&self, ids: &[MessageId]) -> Result<SmallVec<[String; 8]>>;

    fn subscribe_changes(&self, consumer: FolderChangeConsumer) -> HandlerId;
    fn unsubscribe_changes(&self, handler: HandlerId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_usage() {
        assert_eq!(
            SpecialUsageMailbox::detect_usage("INBOX"),
            Some(SpecialUsageMailbox::Inbox)
        );
        assert_eq!(
            SpecialUsageMailbox::detect_usage("Spam"),
            Some(SpecialUsageMailbox::Junk)
        );
        assert_eq!(
            SpecialUsageMailbox::detect_usage("Outbox"),
            Some(SpecialUsageMailbox::Outbox)
        );
        assert_eq!(
            SpecialUsageMailbox::detect_usage("lists/rust"),
            Some(SpecialUsageMailbox::Normal)
        );
    }

    #[test]
    fn test_store_hash_is_stable() {
        assert_eq!(store_hash!("imap.example.com"), store_hash!("imap.example.com"));
        assert_ne!(store_hash!("imap.example.com"), store_hash!("imap.example.org"));
    }
}
