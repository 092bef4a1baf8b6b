use serde::{de::DeserializeOwned, Serialize};

use crate::document::Document;
use crate::error::Result;

/// A resource body that can travel over a transport.
///
/// Implemented for [`Document`] (schema-less) and for every compiled-in
/// k8s-openapi resource (typed). Both map onto the same wire shape.
pub trait Payload: Sized + Send + Sync {
    fn to_document(&self) -> Result<Document>;
    fn from_document(doc: Document) -> Result<Self>;
}

impl Payload for Document {
    fn to_document(&self) -> Result<Document> { Ok(self.clone()) }
    fn from_document(doc: Document) -> Result<Self> { Ok(doc) }
}

impl<K> Payload for K
where
    K: k8s_openapi::Resource + Serialize + DeserializeOwned + Send + Sync,
{
    fn to_document(&self) -> Result<Document> {
        Document::from_value(serde_json::to_value(self)?)
    }

    fn from_document(doc: Document) -> Result<Self> {
        Ok(serde_json::from_value(doc.into_value())?)
    }
}
