//! Application of the ustar, PAX and GNU extension protocols.
//!
//! Metadata entries (PAX global and per-entry headers, GNU long name and
//! long link) are consumed here and never reach the caller. What they carry
//! is kept as override state and applied to the header of each following
//! real entry:
//!
//! - PAX global headers ('g') override every later entry of the archive.
//! - PAX extended headers ('x') and GNU long name/link entries ('L', 'K')
//!   override only the next entry, taking precedence over global values.
//!
//! Finally a ustar `prefix` left on the header is spliced into its name.
//!
//! See <https://pubs.opengroup.org/onlinepubs/9699919799/utilities/pax.html#tag_20_92_13_01>.

use std::collections::BTreeMap;

use log::{debug, trace, warn};

use crate::entry::Entry;
use crate::error::{ExtractError, Result};
use crate::limits::Limits;
use crate::pax::PaxParser;
use crate::{
    truncate_null, EntryType, Header, PAX_GID, PAX_GNAME, PAX_LINKPATH, PAX_MTIME, PAX_PATH,
    PAX_SIZE, PAX_UID, PAX_UNAME,
};

/// Which override map a PAX header feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Global,
    Next,
}

/// Accumulates extension metadata and rewrites real entries with it.
#[derive(Debug, Default)]
pub struct ExtensionResolver {
    limits: Limits,
    global: BTreeMap<String, String>,
    next: BTreeMap<String, String>,
    /// Per-entry metadata entries seen since the last real entry.
    pending: usize,
}

impl ExtensionResolver {
    /// Create a resolver with no overrides.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    /// Overrides applied to every remaining entry.
    #[must_use]
    pub fn global_overrides(&self) -> &BTreeMap<String, String> {
        &self.global
    }

    /// Overrides waiting for the next real entry.
    #[must_use]
    pub fn next_overrides(&self) -> &BTreeMap<String, String> {
        &self.next
    }

    /// Process one raw entry.
    ///
    /// Metadata entries have their body drained and folded into the override
    /// state; `Ok(None)` is returned for them. Any other entry is rewritten
    /// and returned. Entries outside the ustar family pass through as-is.
    ///
    /// # Errors
    ///
    /// Fails on malformed PAX records and on metadata exceeding the
    /// configured [`Limits`].
    pub async fn resolve(&mut self, mut entry: Entry) -> Result<Option<Entry>> {
        if !entry.header().is_ustar_family() {
            return Ok(Some(entry));
        }

        let entry_type = entry.entry_type();
        match entry_type {
            EntryType::XGlobalHeader => {
                self.read_pax(&mut entry, Scope::Global).await?;
                Ok(None)
            }
            EntryType::XHeader => {
                self.count_pending()?;
                self.read_pax(&mut entry, Scope::Next).await?;
                Ok(None)
            }
            EntryType::GnuLongName | EntryType::GnuLongLink => {
                self.count_pending()?;
                let Some(value) = self.read_gnu_long(&mut entry).await? else {
                    return Ok(None);
                };
                let key = if entry_type == EntryType::GnuLongName {
                    PAX_PATH
                } else {
                    PAX_LINKPATH
                };
                trace!("GNU {key} override {value:?}");
                self.next.insert(key.to_string(), value);
                Ok(None)
            }
            _ => {
                self.apply(entry.header_mut());
                self.check_path_len(entry.header())?;
                Ok(Some(entry))
            }
        }
    }

    /// Signal the end of the archive.
    ///
    /// Returns false if per-entry overrides were left without an entry to
    /// apply to; they are dropped.
    pub fn finish(&mut self) -> bool {
        let orphaned = !self.next.is_empty();
        if orphaned {
            debug!(
                "archive ended with {} unused per-entry overrides",
                self.next.len()
            );
            self.next.clear();
        }
        self.pending = 0;
        !orphaned
    }

    /// Apply global then per-entry overrides to `header`, then splice the
    /// ustar prefix.
    pub fn apply(&mut self, header: &mut Header) {
        for (key, value) in self.global.iter().chain(self.next.iter()) {
            apply_override(header, key, value);
        }
        self.next.clear();
        self.pending = 0;

        if !header.prefix.is_empty() {
            header.name = format!("{}/{}", header.prefix, header.name);
            header.prefix.clear();
        }
    }

    fn count_pending(&mut self) -> Result<()> {
        self.pending += 1;
        if self.pending > self.limits.max_pending_entries {
            return Err(ExtractError::TooManyPendingEntries {
                count: self.pending,
                limit: self.limits.max_pending_entries,
            });
        }
        Ok(())
    }

    async fn read_pax(&mut self, entry: &mut Entry, scope: Scope) -> Result<()> {
        let size = entry.size();
        if size > self.limits.max_pax_size {
            return Err(ExtractError::PaxTooLarge {
                size,
                limit: self.limits.max_pax_size,
            });
        }

        let overrides = match scope {
            Scope::Global => &mut self.global,
            Scope::Next => &mut self.next,
        };
        let Some(body) = entry.body_mut() else {
            return Ok(());
        };

        let mut parser = PaxParser::new();
        while let Some(chunk) = body.chunk().await {
            for record in parser.feed(&chunk) {
                let record = record?;
                trace!("PAX {scope:?} {}={:?}", record.key, record.value);
                overrides.insert(record.key, record.value);
            }
        }
        parser.finish();
        Ok(())
    }

    /// Read a GNU long name/link body. Returns `None` for an entry without
    /// a body, which sets no override.
    async fn read_gnu_long(&self, entry: &mut Entry) -> Result<Option<String>> {
        let size = entry.size();
        if size > self.limits.max_gnu_long_size {
            return Err(ExtractError::GnuLongTooLarge {
                size,
                limit: self.limits.max_gnu_long_size,
            });
        }

        let Some(data) = entry.bytes().await else {
            return Ok(None);
        };
        // GNU tar counts a trailing nul in the entry size
        Ok(Some(String::from_utf8_lossy(truncate_null(&data)).into_owned()))
    }

    fn check_path_len(&self, header: &Header) -> Result<()> {
        let limit = self.limits.max_path_len;
        for path in [&header.name, &header.link_name] {
            if path.len() > limit {
                return Err(ExtractError::PathTooLong {
                    len: path.len(),
                    limit,
                });
            }
        }
        Ok(())
    }
}

/// Apply one override to the matching header field, or to `attrs`.
fn apply_override(header: &mut Header, key: &str, value: &str) {
    match key {
        PAX_GID => set_number(&mut header.group_id, key, value),
        PAX_GNAME => header.group_name = value.to_string(),
        PAX_MTIME => {
            // PAX mtime may carry a fractional part; keep whole seconds
            let seconds = value.split('.').next().unwrap_or_default();
            set_number(&mut header.modified_time, key, seconds)
        }
        PAX_SIZE => set_number(&mut header.size, key, value),
        PAX_UID => set_number(&mut header.user_id, key, value),
        PAX_UNAME => header.user_name = value.to_string(),
        PAX_LINKPATH => header.link_name = value.to_string(),
        PAX_PATH => {
            header.name = value.to_string();
            header.prefix.clear();
        }
        _ => {
            header.attrs.insert(key.to_string(), value.to_string());
        }
    }
}

fn set_number(field: &mut u64, key: &str, value: &str) {
    match value.trim().parse() {
        Ok(n) => *field = n,
        Err(_) => warn!("ignoring unparsable PAX {key} value {value:?}"),
    }
}
