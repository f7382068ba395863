/*
 * key.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Item key parsing.
 */

//! Item keys.
//!
//! Callers identify items with an opaque key, optionally scoped to a
//! library: `"ABCD1234"` or `"12_ABCD1234"`. A key without a numeric
//! library prefix belongs to the local library (`0`).

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// Internal integer identifier of an item in the host's store.
pub type ItemId = i64;

static LIBRARY_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^([0-9]+)_(.*)$").unwrap());

/// Numeric library scope of an item key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryId(pub u32);

impl LibraryId {
    /// The user's own library.
    pub const LOCAL: LibraryId = LibraryId(0);

    pub fn is_local(self) -> bool {
        self == Self::LOCAL
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A library-scoped item key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub library: LibraryId,
    pub key: String,
}

impl ItemKey {
    pub fn new(library: LibraryId, key: impl Into<String>) -> Self {
        Self {
            library,
            key: key.into(),
        }
    }

    /// Parse `[<library>_]<key>`.
    ///
    /// Keys without a numeric prefix are local, so `"ABCD1234"` and
    /// `"0_ABCD1234"` parse to the same value.
    pub fn parse(input: &str) -> Result<Self> {
        let (library, key) = match LIBRARY_PREFIX_RE.captures(input) {
            Some(caps) => {
                let library = caps[1]
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidKey(input.to_string()))?;
                (LibraryId(library), caps.get(2).map_or("", |m| m.as_str()))
            }
            None => (LibraryId::LOCAL, input),
        };

        if key.is_empty() {
            return Err(Error::InvalidKey(input.to_string()));
        }

        Ok(Self::new(library, key))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.library, self.key)
    }
}

impl std::str::FromStr for ItemKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
