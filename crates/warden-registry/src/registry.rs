//! [`StatusRegistry`] – the published verdict table.
//!
//! On disk the registry is a section-structured text file:
//!
//! ```text
//! [SystemFiles]
//! tokens.json = enabled
//!
//! [SystemPrograms.Vision]
//! AI_Vision.py = disabled
//! ```
//!
//! Sections are groups, keys are unit file names and values are one of
//! `enabled`, `disabled` or `not_implemented`.  Lines starting with `#` or
//! `;` are comments.  Groups and names are written in sorted order, so the
//! same verdicts always render to the same bytes.
//!
//! A name that would not survive being written bare (one containing `=` or
//! `:`, starting with a comment or section character, or with surrounding
//! whitespace) is written in double quotes with `\"`, `\\`, `\n` and `\r`
//! escapes.
//!
//! The published file is never edited in place.  [`StatusRegistry::publish`]
//! writes a sibling temporary file, syncs it and renames it over the target.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};
use warden_types::{Status, UnitKey, WardenError};

const HEADER: &str = "# Unit verdicts. Rewritten as a whole on every verification pass.\n";

/// Mapping of `group → {name → status}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusRegistry {
    groups: BTreeMap<String, BTreeMap<String, Status>>,
}

impl StatusRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for `key`, replacing any previous verdict.
    pub fn set(&mut self, key: &UnitKey, status: Status) {
        self.groups
            .entry(key.group.clone())
            .or_default()
            .insert(key.name.clone(), status);
    }

    pub fn get(&self, key: &UnitKey) -> Option<Status> {
        self.groups.get(&key.group)?.get(&key.name).copied()
    }

    /// Group names in sorted order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Entries of one group in sorted order.
    pub fn group(&self, group: &str) -> impl Iterator<Item = (&str, Status)> {
        self.groups
            .get(group)
            .into_iter()
            .flat_map(|names| names.iter().map(|(n, s)| (n.as_str(), *s)))
    }

    /// Every entry, grouped and sorted.
    pub fn iter(&self) -> impl Iterator<Item = (UnitKey, Status)> + '_ {
        self.groups.iter().flat_map(|(group, names)| {
            names
                .iter()
                .map(move |(name, status)| (UnitKey::new(group.clone(), name.clone()), *status))
        })
    }

    /// Keys whose verdict is [`Status::Enabled`].
    pub fn enabled(&self) -> impl Iterator<Item = UnitKey> + '_ {
        self.with_status(Status::Enabled)
    }

    /// Keys whose verdict is [`Status::NotImplemented`].
    pub fn not_implemented(&self) -> impl Iterator<Item = UnitKey> + '_ {
        self.with_status(Status::NotImplemented)
    }

    fn with_status(&self, wanted: Status) -> impl Iterator<Item = UnitKey> + '_ {
        self.iter()
            .filter(move |(_, status)| *status == wanted)
            .map(|(key, _)| key)
    }

    /// Total number of entries across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Codec ────────────────────────────────────────────────────────────────

    /// Parse the section-file representation.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::RegistryParse`] for entries outside a section,
    /// lines without a `=`/`:` separator, malformed quoted names, empty
    /// section names and unknown status values.
    pub fn parse(text: &str) -> Result<Self, WardenError> {
        let mut registry = Self::new();
        let mut section: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(inner) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = inner.trim();
                if name.is_empty() {
                    return Err(parse_error(line_no, "empty section name"));
                }
                registry.groups.entry(name.to_string()).or_default();
                section = Some(name.to_string());
                continue;
            }

            let Some(group) = section.as_ref() else {
                return Err(parse_error(line_no, "entry before any section header"));
            };
            let (name, value) = split_entry(line).map_err(|e| parse_error(line_no, e))?;
            let status: Status = value
                .parse()
                .map_err(|e: String| parse_error(line_no, &e))?;
            registry.set(&UnitKey::new(group.clone(), name), status);
        }

        Ok(registry)
    }

    /// Render the section-file representation.
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        for (group, names) in &self.groups {
            out.push('\n');
            out.push_str(&format!("[{group}]\n"));
            for (name, status) in names {
                out.push_str(&format!("{} = {status}\n", render_name(name)));
            }
        }
        out
    }

    // ── Storage ──────────────────────────────────────────────────────────────

    /// Read the registry at `path`.  A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, WardenError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(source) => Err(io_error(path, source)),
        }
    }

    /// Like [`StatusRegistry::load`], but publishes an empty registry first
    /// when none exists yet.
    pub fn load_or_create(path: &Path) -> Result<Self, WardenError> {
        if !path.exists() {
            info!(path = %path.display(), "creating empty status registry");
            Self::new().publish(path)?;
        }
        Self::load(path)
    }

    /// Atomically replace the registry at `path` with `self`.
    ///
    /// Readers observe either the previous file or the new one in full.  If
    /// anything fails before the final rename the previous file is left
    /// untouched.
    pub fn publish(&self, path: &Path) -> Result<(), WardenError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;

        let mut staged = tempfile::Builder::new()
            .prefix(".registry-")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| io_error(parent, e))?;
        staged
            .write_all(self.render().as_bytes())
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| io_error(staged.path(), e))?;
        staged
            .persist(path)
            .map_err(|e| io_error(path, e.error))?;

        debug!(path = %path.display(), entries = self.len(), "registry published");
        Ok(())
    }
}

/// Quote `name` when writing it bare would not read back as the same name.
fn render_name(name: &str) -> String {
    let bare = !name.is_empty()
        && name.trim() == name
        && !name.starts_with(['#', ';', '[', '"'])
        && !name.contains(['=', ':', '\n', '\r']);
    if bare {
        return name.to_string();
    }
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Split an entry line into its name and raw status value.
///
/// A name starting with `"` runs to the closing quote; a bare name runs to
/// the first `=` or `:`.
fn split_entry(line: &str) -> Result<(String, &str), &'static str> {
    let Some(rest) = line.strip_prefix('"') else {
        let (name, value) = line
            .split_once(['=', ':'])
            .ok_or("expected `name = status`")?;
        return Ok((name.trim().to_string(), value));
    };

    let mut name = String::new();
    let mut chars = rest.char_indices();
    let after = loop {
        match chars.next() {
            None => return Err("unterminated quoted name"),
            Some((i, '"')) => break &rest[i + 1..],
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => name.push('\n'),
                Some((_, 'r')) => name.push('\r'),
                Some((_, c @ ('"' | '\\'))) => name.push(c),
                _ => return Err("invalid escape in quoted name"),
            },
            Some((_, c)) => name.push(c),
        }
    };
    let value = after
        .trim_start()
        .strip_prefix(['=', ':'])
        .ok_or("expected `=` after quoted name")?;
    Ok((name, value))
}

fn parse_error(line: usize, details: &str) -> WardenError {
    WardenError::RegistryParse {
        line,
        details: details.to_string(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> WardenError {
    WardenError::RegistryIo {
        path: path.to_path_buf(),
        source,
    }
}
