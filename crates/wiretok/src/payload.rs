//! Request/response payload encodings.
//!
//! - [`PayloadFormat::Raw`]: the whole payload is one text; the response is
//!   the filled ids as decimal numbers separated by single spaces.
//! - [`PayloadFormat::Json`]: the payload is `{"texts": [..]}`; the response
//!   is `{"input_ids": [[..]], "attention_mask": [[..]]}` with one
//!   full-length row per input element, in input order.

use crate::tokenizer::{Batch, TokenId, TokenizeError, Tokenizer};
use core::{fmt, str::FromStr};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// Failure to encode a response payload.
#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write response: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown payload format {0:?}, expected `raw` or `json`")]
pub struct ParseFormatError(String);

/// Wire encoding of request and response payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PayloadFormat {
    #[default]
    Raw,
    Json,
}

#[derive(Serialize)]
struct Response<'a> {
    input_ids: Vec<&'a [TokenId]>,
    attention_mask: Vec<&'a [u8]>,
}

#[derive(Serialize)]
struct Request<'a, T> {
    texts: &'a [T],
}

impl PayloadFormat {
    /// Decodes `payload` and tokenizes it into `batch`.
    ///
    /// Raw payloads always produce a one-row batch. JSON payloads fail only
    /// when the `texts` container is missing or malformed; non-string
    /// elements become rejected rows.
    pub fn tokenize(
        self,
        tokenizer: &Tokenizer,
        payload: &[u8],
        batch: &mut Batch,
    ) -> Result<(), TokenizeError> {
        match self {
            Self::Raw => tokenizer.tokenize_batch_into([Some(payload)], batch),
            Self::Json => {
                let request: Value = serde_json::from_slice(payload)?;
                let texts = request
                    .as_object()
                    .and_then(|object| object.get("texts"))
                    .ok_or(TokenizeError::MissingTexts)?;
                let texts = texts.as_array().ok_or(TokenizeError::TextsNotAList {
                    found: kind_of(texts),
                })?;
                tokenizer.tokenize_batch_into(
                    texts.iter().map(|text| text.as_str().map(str::as_bytes)),
                    batch,
                );
            }
        }
        Ok(())
    }

    /// Encodes `batch` as a response payload, replacing the contents of `out`.
    pub fn encode(self, batch: &Batch, out: &mut Vec<u8>) -> Result<(), PayloadError> {
        out.clear();
        match self {
            Self::Raw => {
                let ids = batch.iter().flat_map(|sequence| sequence.filled_ids());
                for (i, id) in ids.enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    write!(out, "{id}")?;
                }
            }
            Self::Json => {
                let response = Response {
                    input_ids: batch.iter().map(|sequence| sequence.ids()).collect(),
                    attention_mask: batch.iter().map(|sequence| sequence.mask()).collect(),
                };
                serde_json::to_writer(&mut *out, &response)?;
            }
        }
        Ok(())
    }

    /// Encodes a client request for `texts`, replacing the contents of `out`.
    pub fn encode_request<T: AsRef<str> + Serialize>(
        self,
        texts: &[T],
        out: &mut Vec<u8>,
    ) -> Result<(), PayloadError> {
        out.clear();
        match self {
            Self::Raw => {
                for text in texts {
                    out.extend_from_slice(text.as_ref().as_bytes());
                }
            }
            Self::Json => serde_json::to_writer(&mut *out, &Request { texts })?,
        }
        Ok(())
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Json => "json",
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "json" => Ok(Self::Json),
            _ => Err(ParseFormatError(s.to_owned())),
        }
    }
}
