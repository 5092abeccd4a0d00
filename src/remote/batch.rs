//! Lazy scanner over a pull response body.
//!
//! The body has the shape `{"Results": [doc, ...], "LastProcessedEtag": "<etag>"}`.
//! Documents are yielded one at a time as the `Results` array is scanned.
//! The etag marker may appear before or after the results; once the iterator
//! is exhausted, [`BatchReader::last_processed_etag`] holds it if it was sent.
//! Unknown top-level properties are skipped.

use super::token::{read_value, Token};
use super::TokenStream;
use crate::error::RemoteError;
use crate::types::{Document, Etag};
use serde_json::Value;

/// Property holding the batch documents.
pub const RESULTS_PROPERTY: &str = "Results";

/// Property carrying the server's progress etag.
pub const LAST_PROCESSED_ETAG_PROPERTY: &str = "LastProcessedEtag";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReaderState {
    Start,
    Object,
    Results,
    Done,
}

/// Iterator of the documents in one pulled batch.
pub struct BatchReader {
    tokens: TokenStream,
    state: ReaderState,
    last_processed_etag: Option<Etag>,
}

impl BatchReader {
    pub fn new(tokens: TokenStream) -> Self {
        Self {
            tokens,
            state: ReaderState::Start,
            last_processed_etag: None,
        }
    }

    /// Etag reported by the server, if the marker has been scanned.
    pub fn last_processed_etag(&self) -> Option<Etag> {
        self.last_processed_etag
    }

    fn next_token(&mut self) -> Result<Option<Token>, RemoteError> {
        self.tokens.next().transpose()
    }

    fn required_token(&mut self, context: &str) -> Result<Token, RemoteError> {
        self.next_token()?
            .ok_or_else(|| RemoteError::Protocol(format!("stream ended {context}")))
    }

    fn read_property(&mut self, name: String) -> Result<(), RemoteError> {
        let first = self.required_token("before a property value")?;

        if name == RESULTS_PROPERTY {
            return match first {
                Token::StartArray => {
                    self.state = ReaderState::Results;
                    Ok(())
                }
                Token::Scalar(Value::Null) => Ok(()),
                other => Err(RemoteError::Protocol(format!(
                    "expected results array, got {other:?}"
                ))),
            };
        }

        let value = read_value(first, &mut self.tokens)?;
        if name == LAST_PROCESSED_ETAG_PROPERTY {
            match value {
                Value::String(text) => {
                    let etag = text
                        .parse::<Etag>()
                        .map_err(|e| RemoteError::Protocol(e.to_string()))?;
                    self.last_processed_etag = Some(etag);
                }
                Value::Null => {}
                other => {
                    return Err(RemoteError::Protocol(format!(
                        "expected etag string, got {other}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Document>, RemoteError> {
        loop {
            match self.state {
                ReaderState::Done => return Ok(None),
                ReaderState::Start => match self.next_token()? {
                    Some(Token::StartObject) => self.state = ReaderState::Object,
                    None => self.state = ReaderState::Done,
                    Some(other) => {
                        return Err(RemoteError::Protocol(format!(
                            "expected response object, got {other:?}"
                        )))
                    }
                },
                ReaderState::Object => match self.next_token()? {
                    None | Some(Token::EndObject) => self.state = ReaderState::Done,
                    Some(Token::Property(name)) => self.read_property(name)?,
                    Some(other) => {
                        return Err(RemoteError::Protocol(format!(
                            "expected property name, got {other:?}"
                        )))
                    }
                },
                ReaderState::Results => match self.required_token("inside results")? {
                    Token::EndArray => self.state = ReaderState::Object,
                    token => {
                        let value = read_value(token, &mut self.tokens)?;
                        if !value.is_object() {
                            return Err(RemoteError::Protocol(format!(
                                "expected document object, got {value}"
                            )));
                        }
                        return Ok(Some(Document::new(value)));
                    }
                },
            }
        }
    }
}

impl Iterator for BatchReader {
    type Item = Result<Document, RemoteError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(doc) => doc.map(Ok),
            Err(e) => {
                self.state = ReaderState::Done;
                Some(Err(e))
            }
        }
    }
}
