/*
 * mailcache - configuration module
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
 * Engine configuration.
 */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Count all messages of trash folders instead of unread ones.
    pub count_trash: bool,
    /// Count all messages of sent folders instead of unread ones.
    pub count_sent: bool,
    /// Maximum References-chain depth followed when resolving whether a
    /// new message belongs to a muted thread.
    pub thread_depth_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            count_trash: false,
            count_sent: false,
            thread_depth_limit: 64,
        }
    }
}

impl CacheConfig {
    /// Reads the count opt-ins from `MAILCACHE_COUNT_TRASH` and
    /// `MAILCACHE_COUNT_SENT`; a set, non-empty value enables them.
    pub fn from_env() -> Self {
        fn env_flag(name: &str) -> bool {
            std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
        }

        CacheConfig {
            count_trash: env_flag("MAILCACHE_COUNT_TRASH"),
            count_sent: env_flag("MAILCACHE_COUNT_SENT"),
            ..CacheConfig::default()
        }
    }
}
