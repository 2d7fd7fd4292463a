/*
 * mailcache - error module
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
 * An error object for `mailcache`
 */

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::result;
use std::sync::Arc;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    None,
    /// The operation was cancelled before it ran to completion.
    Cancelled,
    /// A store or folder the operation refers to is not known.
    NotFound,
    /// The service is offline and the operation needs a connection.
    Offline,
    /// The operation timed out.
    Timeout,
    /// Assertion failure; this should not happen.
    Bug,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::None => "None",
                ErrorKind::Cancelled => "Cancelled",
                ErrorKind::NotFound => "Not found",
                ErrorKind::Offline => "Offline",
                ErrorKind::Timeout => "Timeout",
                ErrorKind::Bug => "Bug, please report this!",
            }
        )
    }
}

impl Default for ErrorKind {
    fn default() -> Self {
        ErrorKind::None
    }
}

impl ErrorKind {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    pub summary: Option<Cow<'static, str>>,
    pub details: Cow<'static, str>,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    pub kind: ErrorKind,
}

pub trait IntoError {
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_kind(self, kind: ErrorKind) -> Error;
}

pub trait ResultIntoError<T> {
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<I: Into<Error>> IntoError for I {
    #[inline]
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_summary(msg)
    }

    #[inline]
    fn set_err_kind(self, kind: ErrorKind) -> Error {
        let err: Error = self.into();
        err.set_kind(kind)
    }
}

impl<T, I: Into<Error>> ResultIntoError<T> for std::result::Result<T, I> {
    #[inline]
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_summary(msg_fn()))
    }

    #[inline]
    fn chain_err_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| err.set_err_kind(kind))
    }
}

impl Error {
    pub fn new<M>(msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        Error {
            summary: None,
            details: msg.into(),
            source: None,
            kind: ErrorKind::None,
        }
    }

    pub fn set_summary<M>(mut self, summary: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        self.summary = Some(summary.into());
        self
    }

    pub fn set_source(
        mut self,
        new_val: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Error {
        self.source = new_val;
        self
    }

    pub fn set_kind(mut self, new_val: ErrorKind) -> Error {
        self.kind = new_val;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind.is_cancelled()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(summary) = self.summary.as_ref() {
            writeln!(f, "Summary: {}", summary)?;
        }
        write!(f, "{}", self.details)?;
        if let Some(source) = self.source.as_ref() {
            write!(f, "\nCaused by: {}", source)?;
        }
        if self.kind != ErrorKind::None {
            write!(f, "\nKind: {}", self.kind)?;
        }
        Ok(())
    }
}

impl From<Error> for String {
    fn from(val: Error) -> Self {
        val.details.into()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|s| &(*(*s)) as _)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(kind: io::Error) -> Error {
        Error::new(kind.to_string()).set_source(Some(Arc::new(kind)))
    }
}

impl<'a> From<Cow<'a, str>> for Error {
    #[inline]
    fn from(kind: Cow<'_, str>) -> Error {
        Error::new(kind.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    #[inline]
    fn from(kind: std::sync::PoisonError<T>) -> Error {
        Error::new(kind.to_string()).set_kind(ErrorKind::Bug)
    }
}

impl From<futures::channel::oneshot::Canceled> for Error {
    #[inline]
    fn from(kind: futures::channel::oneshot::Canceled) -> Error {
        Error::new(kind.to_string()).set_kind(ErrorKind::Cancelled)
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(kind: &str) -> Error {
        Error::new(kind.to_string())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(kind: String) -> Error {
        Error::new(kind)
    }
}
