use std::{fmt, str::FromStr};

use thiserror::Error;

/// Unit suffix the sender appends to the elapsed time field.
const ELAPSED_SUFFIX: char = 'l';

/// Separator between the fields of a packet line.
const FIELD_SEPARATOR: char = ',';

/// One reading decoded from a datagram: patient, elapsed time and accelerometer signal.
///
/// Each field keeps the text it arrived with, so the printed line differs from the payload only
/// by the removed `l` suffix. The value only lives between receiving a datagram and printing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketLine {
    patient_id: String,
    elapsed_ms: String,
    signal: String,
}

/// Represents the kind of error that can occur while decoding a packet line
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    /// The payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The payload does not consist of exactly three comma-separated fields.
    #[error("expected three comma-separated fields, found {0}")]
    FieldCount(usize),

    /// The patient identifier is not an integer.
    #[error("invalid patient id: {0:?}")]
    InvalidPatientId(String),

    /// The elapsed time is not a non-negative integer.
    #[error("invalid elapsed time: {0:?}")]
    InvalidElapsed(String),

    /// The signal value is not an integer.
    #[error("invalid signal value: {0:?}")]
    InvalidSignal(String),
}

/// Which signs an integer field may start with.
#[derive(Clone, Copy)]
enum Sign {
    Any,
    NonNegative,
}

/// Checks for an optional sign followed by at least one ASCII digit. Any length is accepted.
fn is_integer(field: &str, sign: Sign) -> bool {
    let digits = match (sign, field.as_bytes().first()) {
        (_, Some(b'+')) | (Sign::Any, Some(b'-')) => &field[1..],
        _ => field,
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

impl PacketLine {
    /// Decodes the raw payload of a datagram as UTF-8 and parses it.
    ///
    /// # Errors
    ///
    /// Returns a `PacketError` if the payload is not UTF-8 or not a well-formed packet line.
    ///
    /// # Examples
    /// ```
    /// use packet_listener::packet::line::PacketLine;
    ///
    /// let line = PacketLine::from_payload(b"2308,49l,-318").unwrap();
    /// assert_eq!(line.to_string(), "2308,49,-318");
    /// ```
    pub fn from_payload(payload: &[u8]) -> Result<Self, PacketError> {
        let text = std::str::from_utf8(payload)?;
        Self::parse(text)
    }

    /// Parses `<patient_id>,<elapsed_ms>l,<signal>`.
    ///
    /// Trailing whitespace such as a line ending is ignored. The `l` suffix on the
    /// elapsed field is removed once if present. Fields are checked to be integers
    /// but keep their text, leading zeros and signs included.
    ///
    /// # Errors
    ///
    /// Returns a `PacketError` if the field count is wrong or a field is not an integer.
    pub fn parse(text: &str) -> Result<Self, PacketError> {
        let text = text.trim_end();
        let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
        let [patient_id, elapsed, signal] = *fields.as_slice() else {
            return Err(PacketError::FieldCount(fields.len()));
        };

        let elapsed = elapsed.strip_suffix(ELAPSED_SUFFIX).unwrap_or(elapsed);

        if !is_integer(patient_id, Sign::Any) {
            return Err(PacketError::InvalidPatientId(patient_id.to_string()));
        }
        if !is_integer(elapsed, Sign::NonNegative) {
            return Err(PacketError::InvalidElapsed(elapsed.to_string()));
        }
        if !is_integer(signal, Sign::Any) {
            return Err(PacketError::InvalidSignal(signal.to_string()));
        }

        Ok(Self {
            patient_id: patient_id.to_string(),
            elapsed_ms: elapsed.to_string(),
            signal: signal.to_string(),
        })
    }

    /// Returns the patient identifier as received.
    #[must_use]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// Returns the elapsed milliseconds as received, without the unit suffix.
    #[must_use]
    pub fn elapsed_ms(&self) -> &str {
        &self.elapsed_ms
    }

    /// Returns the signal in units of g/10000 as received.
    #[must_use]
    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Returns the signal converted to g.
    #[must_use]
    pub fn signal_g(&self) -> f64 {
        self.signal
            .parse::<f64>()
            .map_or(f64::NAN, |signal| signal / 10_000.0)
    }
}

impl FromStr for PacketLine {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders the cleaned line, without a line ending.
impl fmt::Display for PacketLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.patient_id, self.elapsed_ms, self.signal
        )
    }
}
