use crate::binary::{latin1_decode, latin1_encode};
use crate::inventory::InvRef;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetaError {
    #[error("value of {key:?} cannot be read as {target}: {reason}")]
    Conversion {
        key: String,
        target: &'static str,
        reason: String,
    },
    #[error("value for {key:?} has characters outside one byte")]
    NotByteString { key: String },
}

/// Metadata attached to one node: raw byte values by key, plus an inventory.
/// Values have no schema; the typed accessors interpret them on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetaRef {
    fields: BTreeMap<String, Vec<u8>>,
    inventory: InvRef,
}

impl NodeMetaRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(fields: BTreeMap<String, Vec<u8>>, inventory: InvRef) -> Self {
        Self { fields, inventory }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.inventory.is_empty()
    }

    pub fn get_raw(&self, key: &str) -> Option<&[u8]> {
        self.fields.get(key).map(Vec::as_slice)
    }

    pub fn set_raw(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.fields.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Decodes the stored bytes one character per byte.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(|bytes| latin1_decode(bytes))
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> Result<(), MetaError> {
        let bytes = latin1_encode(value).map_err(|_| MetaError::NotByteString {
            key: key.to_string(),
        })?;
        self.fields.insert(key.to_string(), bytes);
        Ok(())
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>, MetaError> {
        self.parse_field(key, "an integer")
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.fields.insert(key.to_string(), value.to_string().into_bytes());
    }

    pub fn get_float(&self, key: &str) -> Result<Option<f64>, MetaError> {
        self.parse_field(key, "a float")
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.fields.insert(key.to_string(), value.to_string().into_bytes());
    }

    fn parse_field<T>(&self, key: &str, target: &'static str) -> Result<Option<T>, MetaError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(text) = self.get_string(key) else {
            return Ok(None);
        };
        text.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| MetaError::Conversion {
                key: key.to_string(),
                target,
                reason: err.to_string(),
            })
    }

    pub fn get_inventory(&self) -> &InvRef {
        &self.inventory
    }

    pub fn get_inventory_mut(&mut self) -> &mut InvRef {
        &mut self.inventory
    }

    pub fn set_inventory(&mut self, inventory: InvRef) {
        self.inventory = inventory;
    }

    pub fn to_table(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.fields
    }

    pub fn from_table(&mut self, fields: BTreeMap<String, Vec<u8>>) {
        self.fields = fields;
    }
}
