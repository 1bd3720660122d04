//! Request model and parser.
//!
//! The wire format is a single request line followed by header lines:
//!
//! ```text
//! COMMAND SP TARGET SP VERSION CRLF
//! Key: Value CRLF
//! ...
//! CRLF
//! ```
//!
//! Only the tokens are extracted. Nothing is validated beyond presence:
//! any command, target or version is accepted.

use std::str;

/// Maximum number of header lines accepted in one request
pub const MAX_HEADERS: usize = 256;

/// A single header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    /// `None` when the line carries a name only
    pub value: Option<String>,
}

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<Header>,
}

impl Request {
    /// Number of header lines in the request.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| h.value.as_deref())
    }
}

/// Token of the request line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Command,
    Target,
    Version,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Command => f.write_str("command"),
            Token::Target => f.write_str("target"),
            Token::Version => f.write_str("version"),
        }
    }
}

/// Request parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request bytes are not valid UTF-8
    InvalidUtf8,
    /// A request line token is absent
    Missing(Token),
    /// More than `MAX_HEADERS` header lines
    TooManyHeaders,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidUtf8 => write!(f, "Invalid UTF-8 in request"),
            ParseError::Missing(token) => write!(f, "Missing {} in request line", token),
            ParseError::TooManyHeaders => {
                write!(f, "Too many headers (limit {})", MAX_HEADERS)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse one request from `buffer`.
///
/// The buffer is not modified; all fields of the result are owned.
pub fn parse(buffer: &[u8]) -> Result<Request, ParseError> {
    let text = str::from_utf8(buffer).map_err(|_| ParseError::InvalidUtf8)?;
    let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

    let request_line = lines.next().unwrap_or_default();
    let (command, target, version) = parse_request_line(request_line)?;

    let mut headers = Vec::new();
    for line in lines {
        // Blank line ends the header section
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        headers.push(parse_header(line));
    }

    Ok(Request {
        command: command.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
    })
}

fn parse_request_line(line: &str) -> Result<(&str, &str, &str), ParseError> {
    let rest = line.trim_start_matches(' ');
    let (command, rest) = next_token(rest).ok_or(ParseError::Missing(Token::Command))?;
    let (target, rest) = next_token(rest).ok_or(ParseError::Missing(Token::Target))?;

    let version = rest.trim();
    if version.is_empty() {
        return Err(ParseError::Missing(Token::Version));
    }

    Ok((command, target, version))
}

/// Split off the next space-delimited token, skipping runs of spaces.
fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start_matches(' ');
    if input.is_empty() {
        return None;
    }
    match input.split_once(' ') {
        Some((token, rest)) => Some((token, rest)),
        None => Some((input, "")),
    }
}

fn parse_header(line: &str) -> Header {
    let (name, value) = match line.split_once([':', ' ']) {
        Some((name, rest)) => (name, rest.trim_start_matches([':', ' '])),
        None => (line, ""),
    };

    Header {
        name: name.to_string(),
        value: (!value.is_empty()).then(|| value.to_string()),
    }
}
