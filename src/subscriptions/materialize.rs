//! How pulled documents become observer items.
//!
//! The strategy is fixed when the connection is opened:
//! - [`RawDocuments`] passes documents through untouched.
//! - [`Typed`] deserializes each document and assigns its identity from metadata.

use crate::error::{Result, SubscriptionError};
use crate::types::Document;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

/// Conversion from a pulled document to the item observers receive.
pub trait Materialize: Send + Sync + 'static {
    type Item: Send + 'static;

    fn materialize(&self, document: Document) -> Result<Self::Item>;
}

/// Types that carry a document identity.
pub trait Identity {
    fn set_identity(&mut self, id: &str);
}

/// Pass-through delivery of raw documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawDocuments;

impl Materialize for RawDocuments {
    type Item = Document;

    fn materialize(&self, document: Document) -> Result<Document> {
        Ok(document)
    }
}

/// Deserialize documents into `T` and set their identity.
pub struct Typed<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> Typed<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Typed<{}>", std::any::type_name::<T>())
    }
}

impl<T> Materialize for Typed<T>
where
    T: DeserializeOwned + Identity + Send + 'static,
{
    type Item = T;

    fn materialize(&self, document: Document) -> Result<T> {
        let id = document
            .id()
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let mut item: T = serde_json::from_value(document.into_body()).map_err(|e| {
            SubscriptionError::Materialize {
                id: id.clone(),
                message: e.to_string(),
            }
        })?;

        if let Some(id) = &id {
            item.set_identity(id);
        }
        Ok(item)
    }
}
