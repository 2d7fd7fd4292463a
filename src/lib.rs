/*
 * mailcache - library
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

//! A folder availability cache and job dispatch engine for e-mail
//! applications.
//!
//! One thread owns the engine and drives a [`MainLoop`](mainloop::MainLoop);
//! backend drivers implement the traits in [`backends`], and the
//! [`FolderCache`](cache::FolderCache) keeps track of which folders exist,
//! are usable and how many unread messages they hold, announcing every
//! change to its listeners on the owning thread.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mailcache::cache::FolderCache;
//! use mailcache::conf::CacheConfig;
//! use mailcache::jobs::JobExecutor;
//! use mailcache::mainloop::MainLoop;
//!
//! let (sender, receiver) = crossbeam::channel::unbounded();
//! let executor = Arc::new(JobExecutor::new(sender.clone()));
//! let mut main_loop = MainLoop::new(receiver, sender, executor);
//! let cache = FolderCache::new(main_loop.handler(), CacheConfig::from_env());
//! cache.add_listener(Box::new(|notification| {
//!     println!("{:?}", notification);
//! }));
//! // cache.note_store(store, None);
//! loop {
//!     main_loop.tick();
//! }
//! ```

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate bitflags;

pub mod backends;
pub mod cache;
pub mod conf;
pub mod datetime;
pub mod email;
pub mod error;
pub mod jobs;
pub mod mainloop;
pub mod registry;
pub mod update;

pub use crate::cache::FolderCache;
pub use crate::conf::CacheConfig;
pub use crate::datetime::UnixTimestamp;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::jobs::{JobExecutor, JobId, JobPriority, JoinHandle};
pub use crate::mainloop::{MainLoop, MainLoopHandler};
pub use crate::registry::{ScanResult, ScanWaiter};
pub use crate::update::CacheNotification;
