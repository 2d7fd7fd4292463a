/*
 * mailcache - update delivery types
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
 * Folder state updates and the notifications they expand to.
 *
 * Worker threads never notify listeners directly; they build an
 * [`UpdateClosure`] and ship it to the owning thread, which expands it
 * into [`CacheNotification`]s in a fixed order and hands those to the
 * registered listeners.
 */

use smallvec::SmallVec;

use crate::backends::StoreHash;

/// Folder lifecycle transition carried by an update, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    None,
    Available,
    Unavailable,
    Deleted,
    Renamed,
}

/// One folder's pending state update, built off the owning thread.
#[derive(Debug, Clone)]
pub struct UpdateClosure {
    pub store_hash: StoreHash,
    pub full_name: String,
    pub signal: LifecycleSignal,
    /// Previous full name; set for renames only.
    pub old_full_name: Option<String>,
    /// `None` means the count was not checked and must not be reported.
    pub unread: Option<u32>,
    pub new_messages: u32,
    /// Set when exactly one new message arrived.
    pub msg_uid: Option<String>,
    pub msg_sender: Option<String>,
    pub msg_subject: Option<String>,
}

impl UpdateClosure {
    pub fn new(store_hash: StoreHash, full_name: &str) -> Self {
        UpdateClosure {
            store_hash,
            full_name: full_name.to_string(),
            signal: LifecycleSignal::None,
            old_full_name: None,
            unread: None,
            new_messages: 0,
            msg_uid: None,
            msg_sender: None,
            msg_subject: None,
        }
    }

    /// Expands the update into notifications, in delivery order: the
    /// lifecycle signal first, then the unread count when it is known,
    /// then the change notification unless this is a pure rename.
    pub fn notifications(&self) -> SmallVec<[CacheNotification; 3]> {
        let mut ret = SmallVec::new();
        match self.signal {
            LifecycleSignal::None => {}
            LifecycleSignal::Available => ret.push(CacheNotification::FolderAvailable {
                store_hash: self.store_hash,
                full_name: self.full_name.clone(),
            }),
            LifecycleSignal::Unavailable => ret.push(CacheNotification::FolderUnavailable {
                store_hash: self.store_hash,
                full_name: self.full_name.clone(),
            }),
            LifecycleSignal::Deleted => ret.push(CacheNotification::FolderDeleted {
                store_hash: self.store_hash,
                full_name: self.full_name.clone(),
            }),
            LifecycleSignal::Renamed => ret.push(CacheNotification::FolderRenamed {
                store_hash: self.store_hash,
                old_full_name: self.old_full_name.clone().unwrap_or_default(),
                full_name: self.full_name.clone(),
            }),
        }
        if let Some(unread) = self.unread {
            ret.push(CacheNotification::FolderUnreadUpdated {
                store_hash: self.store_hash,
                full_name: self.full_name.clone(),
                unread,
            });
        }
        if self.signal != LifecycleSignal::Renamed {
            ret.push(CacheNotification::FolderChanged {
                store_hash: self.store_hash,
                full_name: self.full_name.clone(),
                new_messages: self.new_messages,
                msg_uid: self.msg_uid.clone(),
                msg_sender: self.msg_sender.clone(),
                msg_subject: self.msg_subject.clone(),
            });
        }
        ret
    }
}

/// What the cache tells its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheNotification {
    FolderAvailable {
        store_hash: StoreHash,
        full_name: String,
    },
    FolderUnavailable {
        store_hash: StoreHash,
        full_name: String,
    },
    FolderDeleted {
        store_hash: StoreHash,
        full_name: String,
    },
    FolderRenamed {
        store_hash: StoreHash,
        old_full_name: String,
        full_name: String,
    },
    FolderUnreadUpdated {
        store_hash: StoreHash,
        full_name: String,
        unread: u32,
    },
    FolderChanged {
        store_hash: StoreHash,
        full_name: String,
        new_messages: u32,
        msg_uid: Option<String>,
        msg_sender: Option<String>,
        msg_subject: Option<String>,
    },
}

pub type CacheListener = Box<dyn Fn(&CacheNotification) + Send + Sync + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_unread_is_not_reported() {
        let up = UpdateClosure::new(1, "INBOX");
        let notifications = up.notifications();
        assert_eq!(notifications.len(), 1);
        assert!(matches!(
            notifications[0],
            CacheNotification::FolderChanged { .. }
        ));
    }

    #[test]
    fn test_available_signal_comes_before_counts() {
        let mut up = UpdateClosure::new(1, "INBOX");
        up.signal = LifecycleSignal::Available;
        up.unread = Some(3);
        let notifications = up.notifications();
        assert_eq!(notifications.len(), 3);
        assert!(matches!(
            notifications[0],
            CacheNotification::FolderAvailable { .. }
        ));
        assert!(matches!(
            notifications[1],
            CacheNotification::FolderUnreadUpdated { unread: 3, .. }
        ));
        assert!(matches!(
            notifications[2],
            CacheNotification::FolderChanged { .. }
        ));
    }

    #[test]
    fn test_rename_suppresses_change_notification() {
        let mut up = UpdateClosure::new(1, "Archive/2020");
        up.signal = LifecycleSignal::Renamed;
        up.old_full_name = Some("Archives/2020".to_string());
        up.unread = Some(0);
        let notifications = up.notifications();
        assert_eq!(notifications.len(), 2);
        assert!(matches!(
            notifications[0],
            CacheNotification::FolderRenamed { .. }
        ));
        assert!(matches!(
            notifications[1],
            CacheNotification::FolderUnreadUpdated { .. }
        ));
    }
}
