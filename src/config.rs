//! Config tokenizer — the generic key/value section parser backing both the
//! descriptor and directory parsers (SPEC_FULL §4.0).
//!
//! Grammar, line by line: a `[Section]` line starts a new named section;
//! a `Key: value` line adds an entry to the current section; a `Key:` line
//! with an empty value immediately followed by a `-----BEGIN X-----` /
//! `-----END X-----` armor block takes the block's (whitespace-stripped)
//! base64 payload as its value. Unknown sections and unknown keys within a
//! known section are kept, not rejected — callers decide what's required.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::char;
use nom::sequence::delimited;
use nom::IResult;

use crate::crypto::PublicKey;
use crate::error::ConfigError;

/// Typed field parsers, one per scalar type named in spec §6. These
/// correspond to the original's `_parseNickname`/`_parsePublicKey`/etc.

pub fn parse_nickname(raw: &str) -> Result<String, ConfigError> {
    let malformed = |reason: &str| ConfigError::MalformedValue {
        section: "Server".to_string(),
        key: "Nickname".to_string(),
        reason: reason.to_string(),
    };
    if raw.is_empty() || raw.len() > 19 {
        return Err(malformed("nickname must be 1-19 characters"));
    }
    if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(malformed("nickname must be ASCII alphanumeric"));
    }
    Ok(raw.to_string())
}

pub fn parse_base64(raw: &str) -> Result<Vec<u8>, ConfigError> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(stripped)
        .map_err(|e| ConfigError::MalformedValue {
            section: String::new(),
            key: String::new(),
            reason: format!("invalid base64: {e}"),
        })
}

pub fn parse_public_key(raw: &str) -> Result<PublicKey, ConfigError> {
    let der = parse_base64(raw)?;
    PublicKey::from_der(&der).map_err(|_| ConfigError::MalformedValue {
        section: String::new(),
        key: String::new(),
        reason: "invalid RSA public key".to_string(),
    })
}

/// `YYYY-MM-DD HH:MM:SS`, interpreted as UTC.
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
        .map_err(|e| ConfigError::MalformedValue {
            section: String::new(),
            key: String::new(),
            reason: format!("invalid timestamp: {e}"),
        })?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// `YYYY-MM-DD`, interpreted as UTC midnight.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    let naive = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        ConfigError::MalformedValue {
            section: String::new(),
            key: String::new(),
            reason: format!("invalid date: {e}"),
        }
    })?;
    Ok(Utc.from_utc_datetime(&naive.and_hms_opt(0, 0, 0).unwrap()))
}

pub fn parse_int(raw: &str) -> Result<i64, ConfigError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| ConfigError::MalformedValue {
            section: String::new(),
            key: String::new(),
            reason: format!("invalid integer: {e}"),
        })
}

pub fn parse_bool(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        other => Err(ConfigError::MalformedValue {
            section: String::new(),
            key: String::new(),
            reason: format!("invalid boolean: {other:?}"),
        }),
    }
}

/// Comma-separated tokens, each trimmed; empty tokens dropped.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in document order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

fn section_header_line(line: &str) -> IResult<&str, &str> {
    delimited(char('['), take_while1(|c: char| c != ']'), char(']'))(line.trim())
}

fn key_value_line(line: &str) -> Option<(String, String)> {
    let idx = line.find(':')?;
    let (key, rest) = line.split_at(idx);
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    let value = rest[1..].trim();
    Some((key.to_string(), value.to_string()))
}

fn armor_begin_line(line: &str) -> IResult<&str, &str> {
    delimited(tag("-----BEGIN "), take_while1(|c: char| c != '-'), tag("-----"))(line.trim())
}

fn armor_end_line(line: &str) -> IResult<&str, &str> {
    delimited(tag("-----END "), take_while1(|c: char| c != '-'), tag("-----"))(line.trim())
}

/// Split `text` into ordered sections of ordered `(key, value)` pairs.
pub fn tokenize(text: &str) -> Result<Vec<Section>, ConfigError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();
    let mut current = Section {
        name: String::new(),
        entries: Vec::new(),
    };
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }
        if let Ok((_, name)) = section_header_line(line) {
            if !current.name.is_empty() || !current.entries.is_empty() {
                sections.push(current);
            }
            current = Section {
                name: name.to_string(),
                entries: Vec::new(),
            };
            i += 1;
            continue;
        }
        if let Some((key, value)) = key_value_line(line) {
            if value.is_empty() && i + 1 < lines.len() {
                if let Ok((_, label)) = armor_begin_line(lines[i + 1]) {
                    let label = label.to_string();
                    let mut j = i + 2;
                    let mut body = String::new();
                    let mut terminated = false;
                    while j < lines.len() {
                        if let Ok((_, end_label)) = armor_end_line(lines[j]) {
                            if end_label == label {
                                terminated = true;
                                j += 1;
                                break;
                            }
                        }
                        body.push_str(lines[j].trim());
                        j += 1;
                    }
                    if !terminated {
                        return Err(ConfigError::Parse(format!(
                            "unterminated armor block for {key}"
                        )));
                    }
                    current.entries.push((key, body));
                    i = j;
                    continue;
                }
            }
            current.entries.push((key, value));
            i += 1;
            continue;
        }
        return Err(ConfigError::Parse(format!(
            "unparseable line {}: {line:?}",
            i + 1
        )));
    }
    if !current.name.is_empty() || !current.entries.is_empty() {
        sections.push(current);
    }
    Ok(sections)
}

/// A field's presence requirement within a section's syntax table,
/// mirroring the original's `REQUIRE`/`ALLOW`/`ALLOW*` markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Require,
    Allow,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub requirement: Requirement,
    /// `ALLOW*`: the field may repeat.
    pub repeatable: bool,
}

pub const fn require(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        requirement: Requirement::Require,
        repeatable: false,
    }
}

pub const fn allow(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        requirement: Requirement::Allow,
        repeatable: false,
    }
}

pub const fn allow_star(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        requirement: Requirement::Allow,
        repeatable: true,
    }
}

/// Check `section` against `spec`: every `Require`d field must appear
/// exactly once; a non-repeatable field must not appear more than once.
/// Fields not named in `spec` are tolerated (forward compatibility).
pub fn check_syntax(section: &Section, spec: &[FieldSpec]) -> Result<(), ConfigError> {
    for field in spec {
        let count = section.get_all(field.name).len();
        if field.requirement == Requirement::Require && count == 0 {
            return Err(ConfigError::MissingField {
                section: section.name.clone(),
                key: field.name.to_string(),
            });
        }
        if !field.repeatable && count > 1 {
            return Err(ConfigError::MalformedValue {
                section: section.name.clone(),
                key: field.name.to_string(),
                reason: "field repeated but not declared ALLOW*".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_sections_and_entries() {
        let text = "[Server]\nNickname: Example\nPublished: 2003-05-10 12:00:00\n";
        let sections = tokenize(text).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, "Server");
        assert_eq!(sections[0].get("Nickname"), Some("Example"));
    }

    #[test]
    fn tokenizes_armor_block_as_value() {
        let text = "[Server]\nIdentity:\n-----BEGIN RSA PUBLIC KEY-----\nAAAA\nBBBB\n-----END RSA PUBLIC KEY-----\nNickname: x\n";
        let sections = tokenize(text).unwrap();
        assert_eq!(sections[0].get("Identity"), Some("AAAABBBB"));
        assert_eq!(sections[0].get("Nickname"), Some("x"));
    }

    #[test]
    fn rejects_unterminated_armor_block() {
        let text = "[Server]\nIdentity:\n-----BEGIN RSA PUBLIC KEY-----\nAAAA\n";
        assert!(tokenize(text).is_err());
    }

    #[test]
    fn check_syntax_catches_missing_required_field() {
        let section = Section {
            name: "Server".into(),
            entries: vec![("Nickname".into(), "x".into())],
        };
        let spec = [require("Nickname"), require("Identity")];
        assert!(check_syntax(&section, &spec).is_err());
    }

    #[test]
    fn check_syntax_allows_repeated_allow_star_field() {
        let section = Section {
            name: "Incoming/MMTP".into(),
            entries: vec![
                ("Allow".into(), "*".into()),
                ("Allow".into(), "10.0.0.0/8".into()),
            ],
        };
        let spec = [allow_star("Allow")];
        assert!(check_syntax(&section, &spec).is_ok());
    }

    #[test]
    fn parses_timestamp_and_date() {
        let t = parse_time("2003-05-10 12:00:00").unwrap();
        assert_eq!(t.to_string(), "2003-05-10 12:00:00 UTC");
        let d = parse_date("2003-05-17").unwrap();
        assert_eq!(d.to_string(), "2003-05-17 00:00:00 UTC");
    }

    #[test]
    fn nickname_rejects_non_alnum() {
        assert!(parse_nickname("bad nickname").is_err());
        assert!(parse_nickname("Example").is_ok());
    }

    #[test]
    fn csv_drops_empty_tokens() {
        assert_eq!(parse_csv("a, b ,,c"), vec!["a", "b", "c"]);
    }
}
