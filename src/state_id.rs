//! Canonical codec for composite state identifiers.
//!
//! A remote entity is identified by an ordered set of named string fields
//! (for example `project_id` and `cluster_name`). Host tools persist a single
//! opaque string per resource instance, so the fields are encoded as
//! `base64(name):base64(value)` segments sorted by name and joined with `-`.
//! The standard base64 alphabet never produces `:` or `-`, which keeps every
//! value lossless regardless of the characters it contains.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

const SEGMENT_SEPARATOR: char = '-';
const PAIR_SEPARATOR: char = ':';

/// Errors raised while decoding or querying a composite state identifier.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StateIdError {
    /// Raised when a segment is not a `name:value` pair.
    #[error("malformed state id segment '{segment}'")]
    MalformedSegment {
        /// Offending raw segment.
        segment: String,
    },
    /// Raised when a segment half is not valid base64 or UTF-8.
    #[error("state id segment '{segment}' is not valid base64 text: {message}")]
    InvalidEncoding {
        /// Offending raw segment half.
        segment: String,
        /// Decoder message.
        message: String,
    },
    /// Raised when the same field name appears twice.
    #[error("state id contains field '{field}' more than once")]
    DuplicateField {
        /// Repeated field name.
        field: String,
    },
    /// Raised when a required field is absent from the identifier.
    #[error("state id is missing field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },
    /// Raised when an import identifier does not split into the expected
    /// number of parts.
    #[error("import id '{raw}' does not match the format {format}")]
    ImportFormat {
        /// Identifier supplied by the operator.
        raw: String,
        /// Expected format, for example `{project_id}-{cluster_name}`.
        format: String,
    },
}

/// Encodes named fields into the canonical state identifier.
///
/// The output is independent of iteration order: fields are sorted by name
/// before encoding.
#[must_use]
pub fn encode_state_id<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let sorted: BTreeMap<String, String> = fields
        .into_iter()
        .map(|(key, value)| (key.as_ref().to_owned(), value.as_ref().to_owned()))
        .collect();

    let segments: Vec<String> = sorted
        .iter()
        .map(|(key, value)| {
            format!(
                "{}{PAIR_SEPARATOR}{}",
                STANDARD.encode(key),
                STANDARD.encode(value)
            )
        })
        .collect();
    segments.join(&SEGMENT_SEPARATOR.to_string())
}

/// Decodes a canonical state identifier back into its named fields.
///
/// The empty string decodes to an empty map.
///
/// # Errors
///
/// Returns [`StateIdError`] when a segment is malformed, is not valid
/// base64 text, or repeats a field name.
pub fn decode_state_id(id: &str) -> Result<BTreeMap<String, String>, StateIdError> {
    let mut fields = BTreeMap::new();
    if id.is_empty() {
        return Ok(fields);
    }

    for segment in id.split(SEGMENT_SEPARATOR) {
        let Some((raw_key, raw_value)) = segment.split_once(PAIR_SEPARATOR) else {
            return Err(StateIdError::MalformedSegment {
                segment: segment.to_owned(),
            });
        };
        if raw_value.contains(PAIR_SEPARATOR) {
            return Err(StateIdError::MalformedSegment {
                segment: segment.to_owned(),
            });
        }
        let key = decode_part(raw_key)?;
        let value = decode_part(raw_value)?;
        if fields.contains_key(&key) {
            return Err(StateIdError::DuplicateField { field: key });
        }
        fields.insert(key, value);
    }
    Ok(fields)
}

fn decode_part(raw: &str) -> Result<String, StateIdError> {
    let invalid = |message: String| StateIdError::InvalidEncoding {
        segment: raw.to_owned(),
        message,
    };
    let bytes = STANDARD
        .decode(raw)
        .map_err(|err| invalid(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| invalid(err.to_string()))
}

/// Typed composite key identifying one remote entity.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompositeKey {
    fields: BTreeMap<String, String>,
}

impl CompositeKey {
    /// Creates an empty key.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Adds or replaces a named field.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the value of a field when present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns the value of a field that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`StateIdError::MissingField`] when the field is absent.
    pub fn require(&self, name: &str) -> Result<&str, StateIdError> {
        self.get(name).ok_or_else(|| StateIdError::MissingField {
            field: name.to_owned(),
        })
    }

    /// Returns the names of fields whose values differ between two keys,
    /// including fields present in only one of them.
    #[must_use]
    pub fn changed_fields(&self, other: &Self) -> Vec<String> {
        let mut changed: Vec<String> = self
            .fields
            .iter()
            .filter(|(name, value)| other.fields.get(*name) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect();
        changed.extend(
            other
                .fields
                .keys()
                .filter(|name| !self.fields.contains_key(*name))
                .cloned(),
        );
        changed
    }

    /// Returns the underlying name to value map.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Encodes the key into the canonical state identifier.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_state_id(&self.fields)
    }

    /// Decodes a canonical identifier and checks that the expected fields are
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`StateIdError`] when decoding fails or a required field is
    /// missing.
    pub fn decode(id: &str, required: &[&str]) -> Result<Self, StateIdError> {
        let key = Self {
            fields: decode_state_id(id)?,
        };
        for field in required {
            key.require(field)?;
        }
        Ok(key)
    }

    /// Parses an operator supplied import identifier such as
    /// `{project_id}-{cluster_name}`.
    ///
    /// The raw string is split on the first `fields.len() - 1` dashes so the
    /// final field keeps any dashes of its own.
    ///
    /// # Errors
    ///
    /// Returns [`StateIdError::ImportFormat`] when the identifier has too few
    /// parts or any part is empty.
    pub fn from_import_id(raw: &str, fields: &[&str]) -> Result<Self, StateIdError> {
        let format = fields
            .iter()
            .map(|field| format!("{{{field}}}"))
            .collect::<Vec<_>>()
            .join("-");
        let format_error = || StateIdError::ImportFormat {
            raw: raw.to_owned(),
            format: format.clone(),
        };

        let parts: Vec<&str> = raw.splitn(fields.len().max(1), SEGMENT_SEPARATOR).collect();
        if fields.is_empty() || parts.len() != fields.len() || parts.iter().any(|p| p.is_empty())
        {
            return Err(format_error());
        }

        Ok(fields
            .iter()
            .zip(parts)
            .fold(Self::new(), |key, (name, value)| key.with(*name, value)))
    }
}

impl<K, V> FromIterator<(K, V)> for CompositeKey
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.fields {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}
