//! Compiles a continuation pattern against a library of named
//! sub-patterns (§4.1).
//!
//! Grounded on the teacher's own `grok = "~1.0.1"` dependency: `grok`
//! is a Rust port of the Logstash/Oniguruma grok pattern language,
//! which is exactly "a textual pattern with a library of named
//! sub-patterns loaded from directories" — `%{NAME}` references are
//! resolved against `Grok::insert_definition` entries before the whole
//! expression compiles down to a `regex::Regex` internally. `grok`
//! itself only loads definitions one at a time
//! ([`grok::Grok::insert_definition`], the same call the pack's own
//! `datadog/grok` crate drives from parsed rule text in
//! `parse_grok_rules.rs`); it has no directory-scanning API, so
//! `patterns_dir` walking — one logstash-style `NAME PATTERN` definition
//! per line, `#`-prefixed lines and blanks skipped — is done here.

use std::path::Path;

use grok::{Grok, Pattern};

use crate::error::{self, ConfigError};

/// Tests whether a line matches the compiled continuation pattern.
/// `negate` is applied by the caller (the [`crate::assembler::Assembler`]),
/// not here, per §4.1.
pub struct LineMatcher {
    pattern: Pattern,
}

impl LineMatcher {
    /// Compile `pattern`, resolving `%{NAME}` references against any
    /// named sub-patterns found under `patterns_dir`. Compile failure is
    /// fatal at registration (§4.1).
    pub fn compile(pattern: &str, patterns_dir: &[impl AsRef<Path>]) -> Result<Self, ConfigError> {
        let mut grok = Grok::with_patterns();

        for dir in patterns_dir {
            let dir = dir.as_ref();
            load_patterns_from_dir(&mut grok, dir)?;
        }

        let compiled = grok.compile(pattern, false).map_err(|source| {
            error::InvalidPattern {
                pattern: pattern.to_string(),
                source_display: source.to_string(),
            }
            .build()
        })?;

        Ok(Self { pattern: compiled })
    }

    /// True when the pattern matches anywhere in `line`, per the
    /// underlying engine's semantics.
    pub fn is_match(&self, line: &str) -> bool {
        self.pattern.match_against(line).is_some()
    }
}

/// Load every file directly under `dir` as a logstash-style pattern
/// definition file: one `NAME <definition>` pair per non-blank,
/// non-`#`-comment line.
fn load_patterns_from_dir(grok: &mut Grok, dir: &Path) -> Result<(), ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| {
        error::PatternDirectory {
            dir: dir.display().to_string(),
            source_display: source.to_string(),
        }
        .build()
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| {
            error::PatternDirectory {
                dir: dir.display().to_string(),
                source_display: source.to_string(),
            }
            .build()
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| {
            error::PatternDirectory {
                dir: dir.display().to_string(),
                source_display: source.to_string(),
            }
            .build()
        })?;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((name, definition)) = line.split_once(char::is_whitespace) {
                grok.insert_definition(name.trim(), definition.trim());
            }
        }
    }

    Ok(())
}
