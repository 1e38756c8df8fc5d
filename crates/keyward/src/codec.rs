//! Structured value codec.
//!
//! Structured values are stored as JSON. A type opts in by implementing
//! [`Record`], which names its schema and may add field constraints beyond
//! what serde checks.
//!
//! | Input | Result |
//! |-------|--------|
//! | absent key | `Ok(None)` from [`decode_opt`] |
//! | bytes that are not JSON | [`CacheError::Decode`] |
//! | JSON of the wrong shape | [`CacheError::SchemaValidation`] |
//! | JSON failing [`Record::validate`] | [`CacheError::SchemaValidation`] |
//!
//! Decoding never substitutes defaults for missing or invalid data unless
//! the record type itself declares serde defaults.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::error::Category;

use crate::error::{CacheError, CacheResult};

/// A value with a schema that can be stored by the codec.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use keyward::codec::{self, Record};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct User {
///     id: u64,
///     email: String,
/// }
///
/// impl Record for User {
///     const SCHEMA: &'static str = "user";
///
///     fn validate(&self) -> Result<(), String> {
///         if self.email.contains('@') { Ok(()) } else { Err("email must contain '@'".into()) }
///     }
/// }
///
/// let user = User { id: 7, email: "a@example.com".into() };
/// let bytes = codec::encode(&user).unwrap();
/// assert_eq!(codec::decode::<User>("user:7", &bytes).unwrap(), user);
///
/// let err = codec::decode::<User>("user:7", br#"{"id": 7, "email": "nope"}"#).unwrap_err();
/// assert!(err.is_corrupt_data());
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Schema tag reported in validation errors.
    const SCHEMA: &'static str;

    /// Checks constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated constraint.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl Record for serde_json::Value {
    const SCHEMA: &'static str = "json";
}

macro_rules! impl_record {
    ($($ty:ty => $schema:literal),* $(,)?) => {
        $(
            impl Record for $ty {
                const SCHEMA: &'static str = $schema;
            }
        )*
    };
}

impl_record! {
    String => "string",
    bool => "bool",
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
    f64 => "f64",
}

impl<T: Record> Record for Vec<T> {
    const SCHEMA: &'static str = "list";

    fn validate(&self) -> Result<(), String> {
        self.iter().enumerate().try_for_each(|(idx, item)| {
            item.validate().map_err(|msg| format!("[{idx}]: {msg}"))
        })
    }
}

impl<T: Record> Record for BTreeMap<String, T> {
    const SCHEMA: &'static str = "map";

    fn validate(&self) -> Result<(), String> {
        self.iter().try_for_each(|(name, item)| {
            item.validate().map_err(|msg| format!("{name}: {msg}"))
        })
    }
}

/// Serializes a record.
///
/// # Errors
///
/// Returns [`CacheError::Encode`] if the value fails its own
/// [`validate`](Record::validate) or cannot be represented as JSON.
pub fn encode<T: Record>(value: &T) -> CacheResult<Bytes> {
    value.validate().map_err(|message| CacheError::Encode { schema: T::SCHEMA, message })?;
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CacheError::Encode { schema: T::SCHEMA, message: e.to_string() })
}

/// Deserializes the bytes stored at `key`.
///
/// `key` is only used in error reports.
///
/// # Errors
///
/// Returns [`CacheError::Decode`] for malformed JSON and
/// [`CacheError::SchemaValidation`] when well-formed JSON does not fit `T`.
pub fn decode<T: Record>(key: &str, bytes: &[u8]) -> CacheResult<T> {
    let value: T = serde_json::from_slice(bytes).map_err(|e| match e.classify() {
        Category::Data => CacheError::schema_validation(key, T::SCHEMA, e.to_string()),
        Category::Syntax | Category::Eof | Category::Io => CacheError::decode(key, e),
    })?;
    value.validate().map_err(|message| CacheError::schema_validation(key, T::SCHEMA, message))?;
    Ok(value)
}

/// Like [`decode`], mapping an absent value to `Ok(None)`.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_opt<T: Record>(key: &str, bytes: Option<&[u8]>) -> CacheResult<Option<T>> {
    bytes.map(|bytes| decode(key, bytes)).transpose()
}
