/*
 * mailcache - folder cache orchestrator
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
 * Single source of truth for which mail folders exist and are usable.
 *
 * [`FolderCache`] tracks stores and their folders, keeps unread counts,
 * watches live folders for changes and tells its listeners about all of it
 * on the owning thread, in a fixed notification order per folder.
 *
 * Stores are enumerated on the slow job lane; concurrent
 * [`FolderCache::note_store`] calls for the same store share one scan.
 * Folder change events are digested on the fast lane, one at a time, so
 * updates for a folder arrive in the order its backend reported them.
 */

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::backends::{
    ConnectionStatus, FolderChangeConsumer, FolderChanges, FolderInfoFlags, FolderMeta, MailFolder,
    MailStore, SpecialUsageMailbox, StoreEvent, StoreEventConsumer, StoreFlags, StoreHash,
};
use crate::conf::CacheConfig;
use crate::datetime::UnixTimestamp;
use crate::email::{Flag, MessageInfo, IGNORE_THREAD_FLAG};
use crate::error::{Error, ErrorKind, ResultIntoError};
use crate::jobs::{JobContext, JobPriority};
use crate::mainloop::{MainLoopEvent, MainLoopHandler};
use crate::registry::{FirstUpdate, FolderInfo, FolderRegistry, ScanResult, ScanWaiter, StoreInfo};
use crate::update::{CacheListener, LifecycleSignal, UpdateClosure};

/// Tracks folder availability across every noted store.
#[derive(Clone, Debug)]
pub struct FolderCache {
    inner: Arc<CacheInner>,
}

pub(crate) struct CacheInner {
    registry: FolderRegistry,
    config: CacheConfig,
    handler: MainLoopHandler,
    listeners: RwLock<Vec<CacheListener>>,
    /// Timestamp of the newest message already announced, per folder. New
    /// mail older than this is not announced again.
    watermarks: Mutex<HashMap<(StoreHash, String), UnixTimestamp>>,
}

impl std::fmt::Debug for CacheInner {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CacheInner")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl FolderCache {
    pub fn new(handler: MainLoopHandler, config: CacheConfig) -> Self {
        FolderCache {
            inner: Arc::new(CacheInner {
                registry: FolderRegistry::new(),
                config,
                handler,
                listeners: RwLock::new(Vec::new()),
                watermarks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a notification listener. Listeners are only ever invoked
    /// on the owning thread.
    pub fn add_listener(&self, listener: CacheListener) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    /// Starts tracking `store` and enumerates its folders on the slow job
    /// lane. `done` runs on the owning thread with the scan outcome; when
    /// a scan for this store is already running, no second scan starts and
    /// `done` receives the shared outcome.
    pub fn note_store(&self, store: Arc<dyn MailStore>, done: Option<ScanWaiter>) {
        self.inner.note_store(store, done);
    }

    /// Starts tracking an opened folder, watching it for changes. Folders
    /// of stores whose first enumeration has not finished are queued and
    /// replayed when it does. Noting the same folder again is a no-op
    /// apart from refreshing its counts.
    pub fn note_folder(&self, folder: Arc<dyn MailFolder>) {
        self.inner.note_folder(folder);
    }

    /// Stops tracking the store, announcing `folder-unavailable` for every
    /// folder. The service itself still exists.
    pub fn service_removed(&self, store_hash: StoreHash) {
        self.inner.service_removed(store_hash);
    }

    /// Disabling a service is the same as removing it.
    pub fn service_disabled(&self, store_hash: StoreHash) {
        self.inner.service_removed(store_hash);
    }

    pub fn service_enabled(&self, store: Arc<dyn MailStore>) {
        self.inner.note_store(store, None);
    }

    pub fn has_folder_info(&self, store_hash: StoreHash, full_name: &str) -> bool {
        self.inner
            .registry
            .ref_store_info(store_hash)
            .and_then(|si| si.ref_folder_info(full_name))
            .is_some()
    }

    /// The tracked live folder, if one is attached and still alive.
    pub fn ref_folder(&self, store_hash: StoreHash, full_name: &str) -> Option<Arc<dyn MailFolder>> {
        self.inner
            .registry
            .ref_store_info(store_hash)?
            .ref_folder_info(full_name)?
            .folder()
    }

    pub fn get_folder_info_flags(
        &self,
        store_hash: StoreHash,
        full_name: &str,
    ) -> Option<FolderInfoFlags> {
        Some(
            self.inner
                .registry
                .ref_store_info(store_hash)?
                .ref_folder_info(full_name)?
                .flags(),
        )
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<CacheInner> {
        &self.inner
    }
}

impl CacheInner {
    pub(crate) fn registry(&self) -> &FolderRegistry {
        &self.registry
    }

    fn note_store(self: &Arc<Self>, store: Arc<dyn MailStore>, done: Option<ScanWaiter>) {
        let (store_info, is_new) = self.registry.insert_store_info(store.clone());
        if is_new {
            let weak = Arc::downgrade(self);
            let consumer = StoreEventConsumer::new(Arc::new(move |store_hash, event| {
                if let Some(inner) = weak.upgrade() {
                    inner.store_event(store_hash, event);
                }
            }));
            let handler_id = store.subscribe(consumer);
            store_info.lock().store_handler = Some(handler_id);
        }

        let start_scan = {
            let mut guard = store_info.lock();
            guard
                .scan_waiters
                .push(done.unwrap_or_else(|| Box::new(|_| {})));
            if guard.scan_waiters.len() == 1 {
                if guard.first_update != FirstUpdate::Done {
                    guard.first_update = FirstUpdate::Running;
                }
                true
            } else {
                false
            }
        };
        if !start_scan {
            return;
        }

        let desc: Cow<'static, str> = format!("note store {}", store.name()).into();
        let inner = self.clone();
        self.handler
            .job_executor
            .submit_slow_ordered(desc, move |ctx| {
                inner.note_store_job(store_info, ctx);
            });
    }

    /// Slow-lane body of a store scan.
    fn note_store_job(self: &Arc<Self>, store_info: Arc<StoreInfo>, ctx: &JobContext) {
        let store = store_info.store().clone();

        let result: ScanResult = if ctx.is_cancelled() {
            Err(Error::new("store scan was cancelled").set_kind(ErrorKind::Cancelled))
        } else {
            // Offline stores can often enumerate from local state, so a
            // connection failure does not fail the scan.
            if let Err(err) = store.prepare_online() {
                log::debug!("Could not bring {} online: {}", store.name(), err);
            }

            if store_info.first_update() != FirstUpdate::Done
                && store
                    .flags()
                    .contains(StoreFlags::SUPPORTS_INITIAL_SETUP)
            {
                if let Err(err) = store.initial_setup() {
                    log::warn!("Failed to run initial setup for {}: {}", store.name(), err);
                }
            }

            store
                .list_folders()
                .chain_err_summary(|| format!("Could not enumerate folders of {}", store.name()))
        };

        match &result {
            Ok(metas) => {
                for meta in metas {
                    self.setup_folder(&store_info, meta);
                }
                if store_info.first_update() != FirstUpdate::Done {
                    self.first_update(&store_info);
                }
            }
            Err(err) => {
                log::debug!("{}", err);
                let mut guard = store_info.lock();
                if guard.first_update == FirstUpdate::Running {
                    guard.first_update = FirstUpdate::Failed;
                }
            }
        }

        let waiters = std::mem::take(&mut store_info.lock().scan_waiters);
        for waiter in waiters {
            let result = result.clone();
            self.handler.job_executor.push_main_loop(
                "note store done".into(),
                JobPriority::Normal,
                move |_ctx| waiter(result),
            );
        }
    }

    /// Completes a store's very first enumeration: note the virtual
    /// junk/trash folders, flip the state and replay queued folder notes.
    fn first_update(self: &Arc<Self>, store_info: &Arc<StoreInfo>) {
        let store = store_info.store();
        let vjunk = store.virtual_junk();
        let vtrash = store.virtual_trash();
        {
            let mut guard = store_info.lock();
            guard.vjunk = vjunk.clone();
            guard.vtrash = vtrash.clone();
        }
        // These queue on pending_folder_notes and get replayed below.
        if let Some(folder) = vjunk {
            self.note_folder(folder);
        }
        if let Some(folder) = vtrash {
            self.note_folder(folder);
        }

        let pending = {
            let mut guard = store_info.lock();
            guard.first_update = FirstUpdate::Done;
            std::mem::take(&mut guard.pending_folder_notes)
        };
        for folder in pending {
            self.note_folder(folder);
        }
    }

    /// Records one enumerated folder, announcing it if it is new.
    fn setup_folder(self: &Arc<Self>, store_info: &Arc<StoreInfo>, meta: &FolderMeta) {
        if let Some(folder_info) = store_info.ref_folder_info(&meta.full_name) {
            folder_info.set_flags(meta.flags);
            self.update_folder(&folder_info, 0, None, Some(meta));
        } else {
            let folder_info = Arc::new(FolderInfo::new(store_info.store().clone(), meta));
            store_info.insert_folder_info(folder_info);
            if !meta.flags.contains(FolderInfoFlags::NOSELECT) {
                let mut up = UpdateClosure::new(store_info.hash(), &meta.full_name);
                up.signal = LifecycleSignal::Available;
                up.unread = meta.unread;
                self.submit_update(up);
            }
        }
    }

    fn note_folder(self: &Arc<Self>, folder: Arc<dyn MailFolder>) {
        let store_hash = folder.store_hash();
        let Some(store_info) = self.registry.ref_store_info(store_hash) else {
            log::debug!(
                "Noting folder {} before its store was noted",
                folder.full_name()
            );
            return;
        };

        {
            let mut guard = store_info.lock();
            if guard.first_update != FirstUpdate::Done {
                // A store whose first enumeration failed gets another
                // chance when a folder shows up for it.
                let retry_scan = guard.first_update == FirstUpdate::Failed;
                if retry_scan {
                    guard.first_update = FirstUpdate::Running;
                }
                guard.pending_folder_notes.push(folder);
                drop(guard);
                if retry_scan {
                    self.note_store(store_info.store().clone(), None);
                }
                return;
            }
        }
        let folder_info = store_info.lock().folders.get(folder.full_name()).cloned();
        let Some(folder_info) = folder_info else {
            log::debug!("No folder record for {}", folder.full_name());
            return;
        };

        let already_attached = folder_info
            .folder()
            .map_or(false, |f| Arc::ptr_eq(&f, &folder));
        if !already_attached {
            let weak = Arc::downgrade(self);
            let consumer = FolderChangeConsumer::new(Arc::new(
                move |store_hash, full_name: &str, changes| {
                    if let Some(inner) = weak.upgrade() {
                        inner.folder_changed(store_hash, full_name, changes);
                    }
                },
            ));
            let handler_id = folder.subscribe_changes(consumer);
            folder_info.set_folder(&folder, handler_id);
        }

        self.update_folder(&folder_info, 0, None, None);
    }

    /// Computes the folder's count to report and ships an update if it is
    /// known.
    ///
    /// Which count that is depends on the folder: trash and sent folders
    /// report the total count when so configured, drafts and outbox always
    /// report total minus deleted minus junked, everything else reports
    /// unread. An enumeration node that did not check the folder, and a
    /// summary that has not computed the count, yield nothing; the last
    /// known count stays authoritative and listeners hear nothing.
    fn update_folder(
        self: &Arc<Self>,
        folder_info: &Arc<FolderInfo>,
        new_messages: u32,
        single_message: Option<(String, String, String)>,
        meta: Option<&FolderMeta>,
    ) {
        let mut unread: Option<u32> = None;

        if let Some(folder) = folder_info.folder() {
            let usage = folder.special_usage();
            let folder_is_drafts_or_outbox = matches!(
                usage,
                SpecialUsageMailbox::Drafts | SpecialUsageMailbox::Outbox
            );
            // Trash aggregates with junk here: both hold messages the
            // user disposed of, and both are usually virtual.
            let special_case = (self.config.count_trash
                && matches!(
                    usage,
                    SpecialUsageMailbox::Trash | SpecialUsageMailbox::Junk
                ))
                || (self.config.count_sent && usage == SpecialUsageMailbox::Sent)
                || folder_is_drafts_or_outbox;

            if special_case {
                let mut total = folder.message_count();
                if folder_is_drafts_or_outbox {
                    total = total
                        .saturating_sub(folder.deleted_count())
                        .saturating_sub(folder.junk_count());
                }
                unread = Some(total);
            } else if let Some(meta) = meta {
                unread = meta.unread;
            } else {
                unread = folder.unread_count();
            }
        }

        if let Some(unread) = unread {
            folder_info.set_last_unread(unread);
            let mut up = UpdateClosure::new(folder_info.store_hash(), folder_info.full_name());
            up.unread = Some(unread);
            up.new_messages = new_messages;
            if let Some((uid, sender, subject)) = single_message {
                up.msg_uid = Some(uid);
                up.msg_sender = Some(sender);
                up.msg_subject = Some(subject);
            }
            self.submit_update(up);
        }
    }

    /// Backend folder change events land here, off any thread, and are
    /// digested on the fast lane so one folder's updates keep their order.
    fn folder_changed(self: &Arc<Self>, store_hash: StoreHash, full_name: &str, changes: FolderChanges) {
        let desc: Cow<'static, str> = format!("process changes of {}", full_name).into();
        let inner = self.clone();
        let full_name = full_name.to_string();
        self.handler.job_executor.submit_fast_ordered(desc, move |ctx| {
            inner.process_folder_changes(store_hash, full_name, changes, ctx);
        });
    }

    fn process_folder_changes(
        self: &Arc<Self>,
        store_hash: StoreHash,
        full_name: String,
        changes: FolderChanges,
        ctx: &JobContext,
    ) {
        let Some(store_info) = self.registry.ref_store_info(store_hash) else {
            return;
        };
        let Some(folder_info) = store_info.ref_folder_info(&full_name) else {
            return;
        };
        let Some(folder) = folder_info.folder() else {
            return;
        };

        let latest_received = *self
            .watermarks
            .lock()
            .unwrap()
            .get(&(store_hash, full_name.clone()))
            .unwrap_or(&0);
        let mut new_latest_received = latest_received;
        let mut new_messages = 0u32;
        let mut single_message: Option<(String, String, String)> = None;

        let usage = folder.special_usage();
        let skip_new_mail_check = folder_info.flags().contains(FolderInfoFlags::VIRTUAL)
            || matches!(
                usage,
                SpecialUsageMailbox::Drafts
                    | SpecialUsageMailbox::Outbox
                    | SpecialUsageMailbox::Sent
            );

        if !skip_new_mail_check && !changes.added.is_empty() {
            // Messages may arrive out of thread order (child before
            // parent), so remember which uids this batch added and resolve
            // them lazily while walking references.
            let mut memo: HashMap<String, IgnoreThread> = changes
                .added
                .iter()
                .map(|uid| (uid.clone(), IgnoreThread::Todo))
                .collect();

            // Check each added message to see that it is brand new, not
            // junk and not already deleted.
            for uid in &changes.added {
                if ctx.is_cancelled() {
                    break;
                }
                let Some(info) = folder.message_info(uid) else {
                    continue;
                };
                let mut flags = info.flags;
                if !flags.is_seen()
                    && !flags.is_trashed()
                    && self.check_ignore_thread(&*folder, &info, &mut memo, 0)
                {
                    let _ = folder.set_flags(uid, flags | Flag::SEEN);
                    let _ = folder.set_user_flag(uid, IGNORE_THREAD_FLAG);
                    flags |= Flag::SEEN;
                }

                if !flags.is_seen()
                    && !flags.is_junk()
                    && !flags.is_trashed()
                    && info.date_received > latest_received
                {
                    if info.date_received > new_latest_received {
                        new_latest_received = info.date_received;
                    }
                    new_messages += 1;
                    if new_messages == 1 {
                        single_message =
                            Some((info.uid.clone(), info.from.clone(), info.subject.clone()));
                    } else {
                        single_message = None;
                    }
                }
            }
        }

        if new_messages > 0 {
            self.watermarks
                .lock()
                .unwrap()
                .insert((store_hash, full_name), new_latest_received);
        }

        self.update_folder(&folder_info, new_messages, single_message, None);
    }

    /// Walks the References chain of `info` to decide whether it belongs
    /// to a muted thread. The In-Reply-To parent (first reference) is
    /// authoritative when found; other references are just guesses.
    fn check_ignore_thread(
        &self,
        folder: &dyn MailFolder,
        info: &MessageInfo,
        memo: &mut HashMap<String, IgnoreThread>,
        depth: usize,
    ) -> bool {
        if depth >= self.config.thread_depth_limit {
            log::debug!(
                "References chain of {} deeper than {}, giving up",
                info.uid,
                self.config.thread_depth_limit
            );
            return false;
        }
        if memo.get(&info.uid) == Some(&IgnoreThread::Done) {
            return info.is_ignore_thread();
        }
        if info.references.is_empty() {
            return false;
        }

        let first_msgid = info.references[0];
        let ids: Vec<_> = info.references.iter().copied().filter(|id| *id != 0).collect();
        if ids.is_empty() {
            return false;
        }
        let uids = match folder.uids_matching_message_ids(&ids) {
            Ok(uids) => uids,
            Err(err) => {
                log::debug!("Reference lookup failed in {}: {}", folder.full_name(), err);
                return false;
            }
        };

        let mut has_ignore_thread = false;
        let mut first_ignore_thread = false;
        let mut found_first_msgid = false;

        for referenced_uid in &uids {
            let Some(mut referenced) = folder.message_info(referenced_uid) else {
                continue;
            };
            let mut cached = memo.get(referenced_uid.as_str()).copied();
            if cached == Some(IgnoreThread::Todo) {
                // In progress, to avoid infinite recursion on reference
                // cycles.
                memo.insert(referenced_uid.clone(), IgnoreThread::InProgress);
                if self.check_ignore_thread(folder, &referenced, memo, depth + 1) {
                    let _ = folder.set_user_flag(referenced_uid, IGNORE_THREAD_FLAG);
                    referenced.user_flags.push(IGNORE_THREAD_FLAG.to_string());
                }
                memo.insert(referenced_uid.clone(), IgnoreThread::Done);
                cached = Some(IgnoreThread::Done);
            }
            let cached = cached.unwrap_or(IgnoreThread::Done);

            if first_msgid != 0 && referenced.message_id == first_msgid {
                first_ignore_thread = referenced.is_ignore_thread();
                found_first_msgid = first_ignore_thread || cached == IgnoreThread::Done;
                if found_first_msgid {
                    break;
                }
            }

            has_ignore_thread = has_ignore_thread || referenced.is_ignore_thread();
        }

        (found_first_msgid && first_ignore_thread) || (!found_first_msgid && has_ignore_thread)
    }

    /// Store-level backend events, off any thread.
    fn store_event(self: &Arc<Self>, store_hash: StoreHash, event: StoreEvent) {
        let Some(store_info) = self.registry.ref_store_info(store_hash) else {
            return;
        };
        match event {
            // When the store supports subscriptions, the subscribed and
            // unsubscribed events are authoritative and created/deleted
            // are ignored.
            StoreEvent::FolderCreated(meta) => {
                if !store_info.store().supports_subscriptions() {
                    self.setup_folder(&store_info, &meta);
                }
            }
            StoreEvent::FolderDeleted { full_name } => {
                if !store_info.store().supports_subscriptions() {
                    self.folder_deleted(&store_info, &full_name);
                }
            }
            StoreEvent::FolderSubscribed(meta) => self.setup_folder(&store_info, &meta),
            StoreEvent::FolderUnsubscribed { full_name } => {
                self.folder_deleted(&store_info, &full_name)
            }
            StoreEvent::FolderRenamed {
                old_base,
                new_subtree,
            } => self.rename_folders(&store_info, &old_base, &new_subtree),
            StoreEvent::ConnectionStatusChanged(status) => {
                self.connection_status_changed(&store_info, status)
            }
        }
    }

    fn folder_deleted(self: &Arc<Self>, store_info: &Arc<StoreInfo>, full_name: &str) {
        if let Some(folder_info) = store_info.steal_folder_info(full_name) {
            self.unset_folder_info(&folder_info, true);
        }
        self.watermarks
            .lock()
            .unwrap()
            .remove(&(store_info.hash(), full_name.to_string()));
    }

    /// Detaches the folder record and announces its disappearance;
    /// `deleted` distinguishes a deleted folder from one that merely went
    /// unavailable.
    fn unset_folder_info(self: &Arc<Self>, folder_info: &Arc<FolderInfo>, deleted: bool) {
        folder_info.clear_folder();
        if !folder_info.flags().contains(FolderInfoFlags::NOSELECT) {
            let mut up = UpdateClosure::new(folder_info.store_hash(), folder_info.full_name());
            up.signal = if deleted {
                LifecycleSignal::Deleted
            } else {
                LifecycleSignal::Unavailable
            };
            self.submit_update(up);
        }
    }

    /// Swaps the `old_base` prefix for the renamed subtree's new base over
    /// every affected folder record.
    fn rename_folders(
        self: &Arc<Self>,
        store_info: &Arc<StoreInfo>,
        old_base: &str,
        new_subtree: &[FolderMeta],
    ) {
        let mut subtree = new_subtree.to_vec();
        subtree.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        let Some(new_base) = subtree.first().map(|meta| meta.full_name.clone()) else {
            return;
        };
        let store_hash = store_info.hash();

        for meta in &subtree {
            let suffix = meta.full_name.strip_prefix(new_base.as_str()).unwrap_or("");
            let old_name = format!("{}{}", old_base, suffix);

            let old_info = store_info.steal_folder_info(&old_name);
            if let Some(old_info) = &old_info {
                old_info.clear_folder();
            }
            let folder_info = Arc::new(FolderInfo::new(store_info.store().clone(), meta));
            store_info.insert_folder_info(folder_info);

            {
                let mut watermarks = self.watermarks.lock().unwrap();
                if let Some(mark) = watermarks.remove(&(store_hash, old_name.clone())) {
                    watermarks.insert((store_hash, meta.full_name.clone()), mark);
                }
            }

            if !meta.flags.contains(FolderInfoFlags::NOSELECT) {
                let mut up = UpdateClosure::new(store_hash, &meta.full_name);
                if old_info.is_some() {
                    up.signal = LifecycleSignal::Renamed;
                    up.old_full_name = Some(old_name);
                } else {
                    up.signal = LifecycleSignal::Available;
                }
                up.unread = Some(meta.unread.unwrap_or(0));
                self.submit_update(up);
            }
        }
    }

    fn connection_status_changed(
        self: &Arc<Self>,
        store_info: &Arc<StoreInfo>,
        status: ConnectionStatus,
    ) {
        let previous = {
            let mut guard = store_info.lock();
            let previous = guard.last_status;
            guard.last_status = status;
            previous
        };
        // A connection that dropped while the host is still reachable is
        // worth a rescan; a store that was merely connecting is not.
        if status == ConnectionStatus::Disconnected
            && previous != ConnectionStatus::Connecting
            && store_info.store().host_reachable()
        {
            self.note_store(store_info.store().clone(), None);
        }
    }

    fn service_removed(self: &Arc<Self>, store_hash: StoreHash) {
        let Some(store_info) = self.registry.steal_store_info(store_hash) else {
            return;
        };
        let handler_id = store_info.lock().store_handler.take();
        if let Some(handler_id) = handler_id {
            store_info.store().unsubscribe(handler_id);
        }
        for folder_info in store_info.list_folder_info() {
            store_info.steal_folder_info(folder_info.full_name());
            self.unset_folder_info(&folder_info, false);
        }
        {
            let mut guard = store_info.lock();
            guard.vtrash = None;
            guard.vjunk = None;
            guard.pending_folder_notes.clear();
        }
        self.watermarks
            .lock()
            .unwrap()
            .retain(|(hash, _), _| *hash != store_hash);
    }

    /// Ships the update to the owning thread; listeners never run on a
    /// worker, even when the update originates on the owning thread
    /// itself.
    fn submit_update(self: &Arc<Self>, up: UpdateClosure) {
        let inner = self.clone();
        self.handler.send(MainLoopEvent::Run(Box::new(move || {
            inner.deliver(up);
        })));
    }

    /// Owning-thread half of update delivery.
    fn deliver(self: &Arc<Self>, up: UpdateClosure) {
        let notifications = up.notifications();
        {
            let listeners = self.listeners.read().unwrap();
            for notification in notifications.iter() {
                for listener in listeners.iter() {
                    listener(notification);
                }
            }
        }

        // A virtual store aggregates folders the cache learns about too
        // late to track through the normal path, so re-open and note them
        // as they are announced.
        if matches!(
            up.signal,
            LifecycleSignal::Available | LifecycleSignal::Renamed
        ) {
            if let Some(store_info) = self.registry.ref_store_info(up.store_hash) {
                if store_info
                    .store()
                    .flags()
                    .contains(StoreFlags::IS_VIRTUAL)
                {
                    match store_info.store().open_folder(&up.full_name) {
                        Ok(folder) => self.note_folder(folder),
                        Err(err) => log::debug!(
                            "Could not re-open virtual folder {}: {}",
                            up.full_name,
                            err
                        ),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum IgnoreThread {
    Todo,
    InProgress,
    Done,
}
