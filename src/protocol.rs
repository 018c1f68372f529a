//! Line protocol spoken over the local socket.
//!
//! One request per connection: `<subject> <timestamp>\n`, where the subject is
//! a decimal floor (a demand) or the literal `predict`. The reply is a single
//! line: `ack`, a decimal floor, or `none`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Reply to an accepted demand.
pub const ACK: &str = "ack";
/// Reply to a prediction query when no prediction is available.
pub const NO_PREDICTION: &str = "none";
/// Subject of a prediction query.
pub const PREDICT: &str = "predict";
/// Longest request line accepted, newline included.
pub const MAX_LINE_BYTES: usize = 1024;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,

    #[error("request has no timestamp")]
    MissingTimestamp,

    #[error("invalid request subject '{0}': expected a floor number or 'predict'")]
    InvalidSubject(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid response '{0}'")]
    InvalidResponse(String),

    #[error("request line is too long")]
    TooLong,

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// The elevator was called to `floor` at `timestamp`.
    Demand {
        floor: i64,
        timestamp: DateTime<Utc>,
    },
    /// Where should the elevator rest at `timestamp`?
    Predict { timestamp: DateTime<Utc> },
}

impl Request {
    /// Decode one request line. Trailing line terminators are ignored.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (subject, rest) = line
            .split_once(char::is_whitespace)
            .ok_or(ProtocolError::MissingTimestamp)?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(ProtocolError::MissingTimestamp);
        }
        let timestamp = parse_timestamp(rest)?;

        if subject == PREDICT {
            return Ok(Request::Predict { timestamp });
        }
        match subject.parse::<i64>() {
            Ok(floor) => Ok(Request::Demand { floor, timestamp }),
            Err(_) => Err(ProtocolError::InvalidSubject(subject.to_string())),
        }
    }

    /// Encode as a request line, newline included.
    pub fn encode(&self) -> String {
        match self {
            Request::Demand { floor, timestamp } => {
                format!("{floor} {}\n", format_timestamp(timestamp))
            }
            Request::Predict { timestamp } => {
                format!("{PREDICT} {}\n", format_timestamp(timestamp))
            }
        }
    }
}

/// A reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Floor(i64),
    NoPrediction,
}

impl Response {
    pub fn encode(&self) -> String {
        match self {
            Response::Ack => format!("{ACK}\n"),
            Response::Floor(floor) => format!("{floor}\n"),
            Response::NoPrediction => format!("{NO_PREDICTION}\n"),
        }
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        match line.trim() {
            ACK => Ok(Response::Ack),
            NO_PREDICTION => Ok(Response::NoPrediction),
            other => other
                .parse::<i64>()
                .map(Response::Floor)
                .map_err(|_| ProtocolError::InvalidResponse(other.to_string())),
        }
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.encode().trim_end())
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with an offset, naive date-times (`T` or space separated,
/// seconds and fractions optional) and bare dates. Naive values are UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, ProtocolError> {
    let input = input.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(input) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc());
    }

    Err(ProtocolError::InvalidTimestamp(input.to_string()))
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
