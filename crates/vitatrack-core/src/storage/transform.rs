//! Value transformations applied before a value reaches the backing store

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

use super::StorageError;

/// Reversible string transformation
pub trait ValueTransform: Send + Sync + fmt::Debug {
    fn encode(&self, input: &str) -> Result<String, StorageError>;
    fn decode(&self, input: &str) -> Result<String, StorageError>;
}

/// Pass-through transform, used as the compression slot
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl ValueTransform for Identity {
    fn encode(&self, input: &str) -> Result<String, StorageError> {
        Ok(input.to_string())
    }

    fn decode(&self, input: &str) -> Result<String, StorageError> {
        Ok(input.to_string())
    }
}

/// Base64 obfuscation used as the encryption slot
///
/// This hides values from casual inspection only. It is not cryptography.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Obfuscation;

impl ValueTransform for Base64Obfuscation {
    fn encode(&self, input: &str) -> Result<String, StorageError> {
        let reversed: String = input.chars().rev().collect();
        Ok(STANDARD.encode(reversed.as_bytes()))
    }

    fn decode(&self, input: &str) -> Result<String, StorageError> {
        let bytes = STANDARD.decode(input).map_err(|e| StorageError::Decode {
            key: String::new(),
            message: e.to_string(),
        })?;
        let reversed = String::from_utf8(bytes).map_err(|e| StorageError::Decode {
            key: String::new(),
            message: e.to_string(),
        })?;
        Ok(reversed.chars().rev().collect())
    }
}
