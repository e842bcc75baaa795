//! Tokenizer for the session-enumeration backend's text output.
//!
//! The backend prints one session per line in whitespace-aligned columns.
//! Columns are separated by runs of two or more whitespace characters, so
//! single spaces inside a value ("10/16/2026 8:15 AM") survive.
//!
//! Five columns: `user, session-or-id, state, idle, logon`. A purely numeric
//! second column is a bare session id with no name and maps to `waiting`.
//!
//! Six columns: `user, session, id, state, idle, logon`.

use crate::models::{SessionRecord, WAITING_LABEL};

/// Line prefixes that mark column-header rows.
const HEADER_PREFIXES: &[&str] = &["Status", "USERNAME"];

/// Marker the backend puts in front of the caller's own session.
const CURRENT_SESSION_MARKER: char = '>';

/// Classification of one line of backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Blank,
    Header,
    Separator,
    Valid(SessionRecord),
    Malformed(String),
}

/// Records and rejected lines from one block of backend output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSessions {
    pub records: Vec<SessionRecord>,
    pub malformed: Vec<String>,
}

/// Split a line on runs of two or more whitespace characters.
pub fn split_columns(line: &str) -> Vec<&str> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let mut fields = Vec::new();
    let mut field_start = 0;
    let mut run: Option<(usize, usize)> = None; // (start, length)

    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            run = match run {
                Some((start, len)) => Some((start, len + 1)),
                None => Some((i, 1)),
            };
        } else if let Some((start, len)) = run.take() {
            if len >= 2 {
                fields.push(&line[field_start..start]);
                field_start = i;
            }
        }
    }
    fields.push(&line[field_start..]);
    fields
}

fn is_header(trimmed: &str) -> bool {
    HEADER_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn is_separator(trimmed: &str) -> bool {
    trimmed.contains("--") && trimmed.chars().all(|c| c == '-' || c.is_whitespace())
}

/// Classify a single line of output from `host`.
pub fn parse_line(host: &str, line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::Blank;
    }
    if is_header(trimmed) {
        return ParsedLine::Header;
    }
    if is_separator(trimmed) {
        return ParsedLine::Separator;
    }

    let fields = split_columns(trimmed);
    let (user, session, state, logon) = match fields.as_slice() {
        [user, session, state, _idle, logon] => {
            let session = if session.chars().all(|c| c.is_ascii_digit()) {
                WAITING_LABEL
            } else {
                *session
            };
            (*user, session, *state, *logon)
        }
        [user, session, _id, state, _idle, logon] => (*user, *session, *state, *logon),
        _ => return ParsedLine::Malformed(line.to_string()),
    };

    let user = user.trim_start_matches(CURRENT_SESSION_MARKER).trim();
    if [user, session, state, logon].iter().any(|f| f.is_empty()) {
        return ParsedLine::Malformed(line.to_string());
    }

    ParsedLine::Valid(SessionRecord {
        host: host.to_string(),
        user: user.to_string(),
        session: session.to_string(),
        state: state.to_string(),
        logon: logon.to_string(),
    })
}

/// Parse a full block of backend output.
pub fn parse_sessions(host: &str, raw: &str) -> ParsedSessions {
    let mut parsed = ParsedSessions::default();
    for line in raw.lines() {
        match parse_line(host, line) {
            ParsedLine::Valid(record) => parsed.records.push(record),
            ParsedLine::Malformed(raw_line) => parsed.malformed.push(raw_line),
            ParsedLine::Blank | ParsedLine::Header | ParsedLine::Separator => {}
        }
    }
    parsed
}
