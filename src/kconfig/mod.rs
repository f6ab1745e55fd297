//! Idempotent edits of line-oriented kernel build files.
//!
//! Three file formats are touched by the pipeline and all of them are plain
//! ordered lines of text:
//!
//! - `.config` - `CONFIG_X=value` and `# CONFIG_X is not set`
//! - `Kconfig` - `source "path/Kconfig"` directives
//! - `Makefile` - `obj-$(CONFIG_X) += dir/` rules
//!
//! [`ConfigLines`] holds the lines in memory and every edit is a pure
//! transformation over them, so the behaviour is testable without touching
//! a kernel tree. The free functions ([`set_option`], [`disable_option`],
//! [`insert_after_pattern`]) are read-edit-write wrappers over existing
//! files and only write when the content actually changed.
//!
//! Every edit is idempotent: applying it twice yields byte-identical output
//! to applying it once.
//!
//! # Example
//!
//! ```rust
//! use halow_kernel_builder::kconfig::{ConfigLines, LinePattern};
//!
//! let mut config = ConfigLines::parse("# CONFIG_CRYPTO_CCM is not set\n");
//! config.set_option("CONFIG_CRYPTO_CCM", "y").unwrap();
//! assert_eq!(config.render(), "CONFIG_CRYPTO_CCM=y\n");
//!
//! let mut kconfig = ConfigLines::parse("source \"drivers/net/wireless/ti/Kconfig\"\n");
//! let anchor = LinePattern::literal("source \"drivers/net/wireless/ti/Kconfig\"");
//! kconfig
//!     .insert_after_pattern(&anchor, "source \"drivers/net/wireless/morse/Kconfig\"")
//!     .unwrap();
//! assert_eq!(kconfig.lines().len(), 2);
//! ```

use regex::Regex;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Current state of a single option in a `.config` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionState {
    /// `NAME=value`
    Set(String),
    /// `# NAME is not set`
    NotSet,
}

/// What [`ConfigLines::insert_after_pattern`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The line already existed, ignoring trailing whitespace; nothing changed.
    AlreadyPresent,
    /// Inserted after the anchor found at this zero-based line index.
    AfterAnchor(usize),
    /// No anchor matched; appended at end of file.
    AppendedAtEnd,
}

impl Insertion {
    pub fn changed(self) -> bool {
        !matches!(self, Insertion::AlreadyPresent)
    }
}

impl fmt::Display for Insertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insertion::AlreadyPresent => write!(f, "already present"),
            Insertion::AfterAnchor(idx) => write!(f, "inserted after line {}", idx + 1),
            Insertion::AppendedAtEnd => write!(f, "anchor not found, appended at end"),
        }
    }
}

/// Ordered lines of a text file.
///
/// Rendering always ends a non-empty file with exactly one line ending,
/// which keeps `parse(render(x))` stable across repeated edits. A file with
/// any CRLF ending is rendered with CRLF throughout; otherwise LF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLines {
    lines: Vec<String>,
    crlf: bool,
}

impl ConfigLines {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            crlf: text.contains("\r\n"),
        }
    }

    pub fn render(&self) -> String {
        let ending = if self.crlf { "\r\n" } else { "\n" };
        let mut out = self.lines.join(ending);
        if !self.lines.is_empty() {
            out.push_str(ending);
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Make `name=value` the only definition of `name`.
    ///
    /// Removes every `name=...` line and every `# name is not set` line,
    /// then appends `name=value`. `value` must not contain a line break.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        validate_option_name(name)?;
        single_line(value)?;
        self.remove_option(name);
        self.lines.push(format!("{name}={value}"));
        Ok(())
    }

    /// Make `# name is not set` the only mention of `name`.
    pub fn disable_option(&mut self, name: &str) -> Result<()> {
        validate_option_name(name)?;
        self.remove_option(name);
        self.lines.push(not_set_line(name));
        Ok(())
    }

    /// Look up how `name` is currently defined. The last definition wins,
    /// matching how kconfig itself reads a `.config`.
    pub fn option(&self, name: &str) -> Option<OptionState> {
        let assign = format!("{name}=");
        let not_set = not_set_line(name);
        self.lines.iter().rev().find_map(|line| {
            if let Some(value) = line.strip_prefix(&assign) {
                Some(OptionState::Set(value.to_string()))
            } else if line.trim_end() == not_set {
                Some(OptionState::NotSet)
            } else {
                None
            }
        })
    }

    /// Insert `new_line` after the first line matching `anchor`.
    ///
    /// No-op when `new_line` is already present, ignoring trailing
    /// whitespace. Appends at end of file when no line matches.
    pub fn insert_after_pattern(
        &mut self,
        anchor: &LinePattern,
        new_line: &str,
    ) -> Result<Insertion> {
        single_line(new_line)?;
        let wanted = new_line.trim_end();
        if self.lines.iter().any(|line| line.trim_end() == wanted) {
            return Ok(Insertion::AlreadyPresent);
        }

        let outcome = match self.lines.iter().position(|line| anchor.is_match(line)) {
            Some(idx) => {
                self.lines.insert(idx + 1, new_line.to_string());
                Insertion::AfterAnchor(idx)
            }
            None => {
                self.lines.push(new_line.to_string());
                Insertion::AppendedAtEnd
            }
        };
        Ok(outcome)
    }

    fn remove_option(&mut self, name: &str) {
        let assign = format!("{name}=");
        let not_set = not_set_line(name);
        self.lines
            .retain(|line| !line.starts_with(&assign) && line.trim_end() != not_set);
    }
}

/// Reject text that would render as more than one line.
pub fn single_line(text: &str) -> Result<()> {
    if text.contains(['\n', '\r']) {
        return Err(Error::MultiLine(text.to_string()));
    }
    Ok(())
}

fn not_set_line(name: &str) -> String {
    format!("# {name} is not set")
}

/// Option names are bare identifiers such as `CONFIG_CRYPTO_CCM`.
pub fn validate_option_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidOption(name.to_string()))
    }
}

/// Anchor used to locate an insertion point.
#[derive(Debug, Clone)]
pub enum LinePattern {
    /// Line equal to this text, ignoring surrounding whitespace.
    Literal(String),
    /// Line matching this regular expression anywhere.
    Regex(Regex),
}

impl LinePattern {
    pub fn literal(line: &str) -> Self {
        LinePattern::Literal(line.trim().to_string())
    }

    pub fn regex(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Regex::new(pattern).map(LinePattern::Regex)
    }

    pub fn is_match(&self, line: &str) -> bool {
        match self {
            LinePattern::Literal(text) => line.trim() == text,
            LinePattern::Regex(re) => re.is_match(line),
        }
    }
}

impl fmt::Display for LinePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinePattern::Literal(text) => write!(f, "{text}"),
            LinePattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Read a file, apply `edit`, and write it back if the content changed.
///
/// The file must exist: a missing `.config`, `Kconfig` or `Makefile` means
/// the tree or a configured path is wrong.
fn edit_file<T>(path: &Path, edit: impl FnOnce(&mut ConfigLines) -> Result<T>) -> Result<T> {
    let original = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

    let mut lines = ConfigLines::parse(&original);
    let result = edit(&mut lines)?;
    let rendered = lines.render();

    if rendered != original {
        fs::write(path, rendered).map_err(|e| Error::io(path, e))?;
        debug!("updated {}", path.display());
    }
    Ok(result)
}

/// `set_option` on a file.
pub fn set_option(path: &Path, name: &str, value: &str) -> Result<()> {
    validate_option_name(name)?;
    single_line(value)?;
    edit_file(path, |lines| lines.set_option(name, value))
}

/// `disable_option` on a file.
pub fn disable_option(path: &Path, name: &str) -> Result<()> {
    validate_option_name(name)?;
    edit_file(path, |lines| lines.disable_option(name))
}

/// Set and disable a batch of options in one read-edit-write.
///
/// All names are validated before the file is read, so a bad name leaves
/// the file untouched.
pub fn apply_options<'a>(
    path: &Path,
    options: impl IntoIterator<Item = (&'a str, &'a str)>,
    disabled: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let options: Vec<_> = options.into_iter().collect();
    let disabled: Vec<_> = disabled.into_iter().collect();
    for name in options.iter().map(|(name, _)| name).chain(disabled.iter()) {
        validate_option_name(name)?;
    }
    for (_, value) in &options {
        single_line(value)?;
    }

    edit_file(path, |lines| {
        for (name, value) in &options {
            lines.set_option(name, value)?;
        }
        for name in &disabled {
            lines.disable_option(name)?;
        }
        Ok(())
    })
}

/// `insert_after_pattern` on a file.
pub fn insert_after_pattern(
    path: &Path,
    anchor: &LinePattern,
    new_line: &str,
) -> Result<Insertion> {
    single_line(new_line)?;
    edit_file(path, |lines| lines.insert_after_pattern(anchor, new_line))
}
