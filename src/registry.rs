/*
 * mailcache - store and folder registry
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
 * Shared records for tracked stores and folders.
 *
 * [`StoreInfo`] and [`FolderInfo`] are `Arc`-managed so a caller holding
 * one can keep using it after the record was concurrently removed from the
 * registry. The registry lock only guards the store map; each record locks
 * its own mutable state.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;

use crate::backends::{
    ConnectionStatus, FolderInfoFlags, FolderMeta, HandlerId, MailFolder, MailStore,
    SpecialUsageMailbox, StoreHash,
};
use crate::error::Result;

/// Progress of a store's very first folder enumeration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FirstUpdate {
    Running,
    Failed,
    Done,
}

/// Outcome of a folder enumeration, shared with every waiter of a
/// deduplicated scan.
pub type ScanResult = Result<Vec<FolderMeta>>;

/// Completion callback of a [`note_store`](crate::cache::FolderCache::note_store)
/// call, run on the owning thread.
pub type ScanWaiter = Box<dyn FnOnce(ScanResult) + Send + 'static>;

/// Record for one folder of a tracked store.
#[derive(Debug)]
pub struct FolderInfo {
    store: Arc<dyn MailStore>,
    full_name: String,
    inner: Mutex<FolderInfoInner>,
}

#[derive(Debug)]
struct FolderInfoInner {
    flags: FolderInfoFlags,
    usage: SpecialUsageMailbox,
    /// Weak so an unused folder can be reclaimed by its backend; set and
    /// cleared together with `changed_handler`.
    folder: Option<Weak<dyn MailFolder>>,
    changed_handler: Option<HandlerId>,
    /// Last known unread count. An enumeration that did not check the
    /// folder must not clobber this.
    last_unread: Option<u32>,
}

impl FolderInfo {
    pub fn new(store: Arc<dyn MailStore>, meta: &FolderMeta) -> Self {
        FolderInfo {
            store,
            full_name: meta.full_name.clone(),
            inner: Mutex::new(FolderInfoInner {
                flags: meta.flags,
                usage: meta.usage,
                folder: None,
                changed_handler: None,
                last_unread: meta.unread,
            }),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    pub fn store_hash(&self) -> StoreHash {
        self.store.hash()
    }

    pub fn flags(&self) -> FolderInfoFlags {
        self.inner.lock().unwrap().flags
    }

    pub fn set_flags(&self, new_val: FolderInfoFlags) {
        self.inner.lock().unwrap().flags = new_val;
    }

    pub fn usage(&self) -> SpecialUsageMailbox {
        self.inner.lock().unwrap().usage
    }

    pub fn last_unread(&self) -> Option<u32> {
        self.inner.lock().unwrap().last_unread
    }

    pub fn set_last_unread(&self, new_val: u32) {
        self.inner.lock().unwrap().last_unread = Some(new_val);
    }

    /// The tracked live folder, if one is attached and still alive.
    pub fn folder(&self) -> Option<Arc<dyn MailFolder>> {
        self.inner
            .lock()
            .unwrap()
            .folder
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn has_folder(&self) -> bool {
        self.folder().is_some()
    }

    /// Attaches an opened folder and its change subscription, replacing
    /// (and disconnecting) any previous attachment.
    pub fn set_folder(&self, folder: &Arc<dyn MailFolder>, handler: HandlerId) {
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            let previous = (inner.folder.take(), inner.changed_handler.take());
            inner.folder = Some(Arc::downgrade(folder));
            inner.changed_handler = Some(handler);
            previous
        };
        if let (Some(weak), Some(old_handler)) = previous {
            if let Some(old_folder) = weak.upgrade() {
                old_folder.unsubscribe_changes(old_handler);
            }
        }
    }

    /// Detaches the live folder, disconnecting its change subscription.
    /// Weak reference and handler always go together.
    pub fn clear_folder(&self) {
        let taken = {
            let mut inner = self.inner.lock().unwrap();
            (inner.folder.take(), inner.changed_handler.take())
        };
        if let (Some(weak), Some(handler)) = taken {
            if let Some(folder) = weak.upgrade() {
                folder.unsubscribe_changes(handler);
            }
        }
    }
}

/// Record for one tracked store.
pub struct StoreInfo {
    store: Arc<dyn MailStore>,
    inner: Mutex<StoreInfoInner>,
}

pub(crate) struct StoreInfoInner {
    pub folders: IndexMap<String, Arc<FolderInfo>>,
    pub first_update: FirstUpdate,
    /// Folders noted before the first enumeration finished; replayed once
    /// it does.
    pub pending_folder_notes: Vec<Arc<dyn MailFolder>>,
    /// Completion callbacks of every `note_store` call sharing the
    /// in-flight scan. Non-empty means a scan is running.
    pub scan_waiters: Vec<ScanWaiter>,
    pub vtrash: Option<Arc<dyn MailFolder>>,
    pub vjunk: Option<Arc<dyn MailFolder>>,
    pub last_status: ConnectionStatus,
    pub store_handler: Option<HandlerId>,
}

impl std::fmt::Debug for StoreInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("StoreInfo")
            .field("store", &self.store.name())
            .field("folders", &inner.folders.len())
            .field("first_update", &inner.first_update)
            .field("pending_folder_notes", &inner.pending_folder_notes.len())
            .field("scan_waiters", &inner.scan_waiters.len())
            .field("last_status", &inner.last_status)
            .finish()
    }
}

impl StoreInfo {
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        let last_status = store.connection_status();
        StoreInfo {
            store,
            inner: Mutex::new(StoreInfoInner {
                folders: IndexMap::new(),
                first_update: FirstUpdate::Running,
                pending_folder_notes: Vec::new(),
                scan_waiters: Vec::new(),
                vtrash: None,
                vjunk: None,
                last_status,
                store_handler: None,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    pub fn hash(&self) -> StoreHash {
        self.store.hash()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreInfoInner> {
        self.inner.lock().unwrap()
    }

    pub fn first_update(&self) -> FirstUpdate {
        self.lock().first_update
    }

    pub fn ref_folder_info(&self, full_name: &str) -> Option<Arc<FolderInfo>> {
        self.lock().folders.get(full_name).cloned()
    }

    pub fn insert_folder_info(&self, info: Arc<FolderInfo>) {
        self.lock()
            .folders
            .insert(info.full_name().to_string(), info);
    }

    /// Removes and returns the folder record; the caller is responsible
    /// for disconnecting it.
    pub fn steal_folder_info(&self, full_name: &str) -> Option<Arc<FolderInfo>> {
        self.lock().folders.shift_remove(full_name)
    }

    pub fn list_folder_info(&self) -> Vec<Arc<FolderInfo>> {
        self.lock().folders.values().cloned().collect()
    }
}

/// Top-level map of tracked stores.
#[derive(Debug, Default)]
pub struct FolderRegistry {
    stores: Mutex<HashMap<StoreHash, Arc<StoreInfo>>>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        FolderRegistry::default()
    }

    /// Returns the record for `store`, creating it if the store is not
    /// tracked yet. The boolean is `true` when the record is new.
    pub fn insert_store_info(&self, store: Arc<dyn MailStore>) -> (Arc<StoreInfo>, bool) {
        let mut stores = self.stores.lock().unwrap();
        if let Some(existing) = stores.get(&store.hash()) {
            return (existing.clone(), false);
        }
        let info = Arc::new(StoreInfo::new(store));
        stores.insert(info.hash(), info.clone());
        (info, true)
    }

    pub fn ref_store_info(&self, hash: StoreHash) -> Option<Arc<StoreInfo>> {
        self.stores.lock().unwrap().get(&hash).cloned()
    }

    /// Removes and returns the store record; the caller is responsible
    /// for tearing it down.
    pub fn steal_store_info(&self, hash: StoreHash) -> Option<Arc<StoreInfo>> {
        self.stores.lock().unwrap().remove(&hash)
    }

    pub fn stores(&self) -> Vec<Arc<StoreInfo>> {
        self.stores.lock().unwrap().values().cloned().collect()
    }
}
