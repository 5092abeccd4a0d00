//! Token model for streamed JSON bodies.

use crate::error::RemoteError;
use serde_json::{Map, Value};

/// One parsed token of a JSON body.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    Property(String),
    /// A scalar value (string, number, bool or null).
    Scalar(Value),
}

/// Flatten a JSON value into tokens, for transports that buffer whole bodies.
pub fn tokenize(value: &Value) -> Vec<Token> {
    let mut tokens = Vec::new();
    push_tokens(value, &mut tokens);
    tokens
}

fn push_tokens(value: &Value, tokens: &mut Vec<Token>) {
    match value {
        Value::Object(map) => {
            tokens.push(Token::StartObject);
            for (key, v) in map {
                tokens.push(Token::Property(key.clone()));
                push_tokens(v, tokens);
            }
            tokens.push(Token::EndObject);
        }
        Value::Array(items) => {
            tokens.push(Token::StartArray);
            for v in items {
                push_tokens(v, tokens);
            }
            tokens.push(Token::EndArray);
        }
        scalar => tokens.push(Token::Scalar(scalar.clone())),
    }
}

fn next_token<I>(tokens: &mut I) -> Result<Token, RemoteError>
where
    I: Iterator<Item = Result<Token, RemoteError>>,
{
    tokens
        .next()
        .unwrap_or_else(|| Err(RemoteError::Protocol("unexpected end of stream".into())))
}

/// Deepest object/array nesting accepted inside one value.
pub const MAX_DEPTH: usize = 128;

/// Build one complete value starting at `first`, consuming the tokens it spans.
pub(crate) fn read_value<I>(first: Token, tokens: &mut I) -> Result<Value, RemoteError>
where
    I: Iterator<Item = Result<Token, RemoteError>>,
{
    read_nested(first, tokens, 0)
}

fn read_nested<I>(first: Token, tokens: &mut I, depth: usize) -> Result<Value, RemoteError>
where
    I: Iterator<Item = Result<Token, RemoteError>>,
{
    if depth >= MAX_DEPTH && matches!(first, Token::StartObject | Token::StartArray) {
        return Err(RemoteError::Protocol("nesting too deep".into()));
    }

    match first {
        Token::Scalar(v) => Ok(v),
        Token::StartObject => {
            let mut map = Map::new();
            loop {
                match next_token(tokens)? {
                    Token::EndObject => return Ok(Value::Object(map)),
                    Token::Property(key) => {
                        let value = read_nested(next_token(tokens)?, tokens, depth + 1)?;
                        map.insert(key, value);
                    }
                    other => {
                        return Err(RemoteError::Protocol(format!(
                            "expected property name, got {other:?}"
                        )))
                    }
                }
            }
        }
        Token::StartArray => {
            let mut items = Vec::new();
            loop {
                match next_token(tokens)? {
                    Token::EndArray => return Ok(Value::Array(items)),
                    token => items.push(read_nested(token, tokens, depth + 1)?),
                }
            }
        }
        other => Err(RemoteError::Protocol(format!(
            "expected a value, got {other:?}"
        ))),
    }
}
