/*
 * mailcache - email types
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
 * The minimal message model the folder cache consumes.
 *
 * Backends keep their own summaries; the cache only ever looks at flags,
 * timestamps and the message-id/references chain of a message, so that is
 * all [`MessageInfo`] carries.
 */

use smallvec::SmallVec;

pub use crate::datetime::UnixTimestamp;

/// Hash of a Message-ID header value.
pub type MessageId = u64;

/// User flag set on every message of a muted thread.
pub const IGNORE_THREAD_FLAG: &str = "ignore-thread";

bitflags! {
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Flag: u8 {
        const PASSED  = 0b0000_0001;
        const REPLIED = 0b0000_0010;
        const SEEN    = 0b0000_0100;
        const TRASHED = 0b0000_1000;
        const DRAFT   = 0b0001_0000;
        const FLAGGED = 0b0010_0000;
        const JUNK    = 0b0100_0000;
    }
}

impl Flag {
    pub fn is_seen(&self) -> bool {
        self.contains(Flag::SEEN)
    }

    pub fn is_trashed(&self) -> bool {
        self.contains(Flag::TRASHED)
    }

    pub fn is_junk(&self) -> bool {
        self.contains(Flag::JUNK)
    }
}

/// Summary record for one message, as reported by a backend folder.
#[derive(Debug, Clone, Default)]
pub struct MessageInfo {
    pub uid: String,
    pub flags: Flag,
    pub user_flags: SmallVec<[String; 2]>,
    pub from: String,
    pub subject: String,
    pub date_received: UnixTimestamp,
    pub message_id: MessageId,
    /// Ancestor message-ids. The first entry is the In-Reply-To value,
    /// which names the direct parent; the rest are guesses taken from the
    /// References header.
    pub references: SmallVec<[MessageId; 8]>,
}

impl MessageInfo {
    pub fn has_user_flag(&self, name: &str) -> bool {
        self.user_flags.iter().any(|f| f == name)
    }

    pub fn is_ignore_thread(&self) -> bool {
        self.has_user_flag(IGNORE_THREAD_FLAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_helpers() {
        let flags = Flag::SEEN | Flag::JUNK;
        assert!(flags.is_seen());
        assert!(flags.is_junk());
        assert!(!flags.is_trashed());
        assert!(!Flag::default().is_seen());
    }

    #[test]
    fn test_user_flags() {
        let mut info = MessageInfo {
            uid: "1".into(),
            ..MessageInfo::default()
        };
        assert!(!info.is_ignore_thread());
        info.user_flags.push(IGNORE_THREAD_FLAG.into());
        assert!(info.is_ignore_thread());
        assert!(!info.has_user_flag("important"));
    }
}
