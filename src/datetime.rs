/*
 * mailcache - datetime module
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

use std::time::{SystemTime, UNIX_EPOCH};

pub type UnixTimestamp = u64;

pub fn now() -> UnixTimestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
