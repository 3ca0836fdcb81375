use crate::adapters::bus::ObjectPath;
use crate::domain::attachment::{Attachment, OutAttachment};
use crate::error::{MmsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dynamically typed bus value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Variant {
    Bool(bool),
    U64(u64),
    Str(String),
    ObjectPath(ObjectPath),
    Array(Vec<Variant>),
    Struct(Vec<Variant>),
    Dict(BTreeMap<String, Variant>),
}

impl Variant {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U64(_) => "u64",
            Self::Str(_) => "string",
            Self::ObjectPath(_) => "object path",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Dict(_) => "dict",
        }
    }

    /// Decodes this value as `T`, failing with `InvalidArguments` on a shape mismatch.
    ///
    /// # Errors
    /// Returns `MmsError::InvalidArguments` if the value does not have the declared type.
    pub fn decode<T: FromVariant>(&self) -> Result<T> {
        T::from_variant(self)
    }
}

/// Explicit decode step from a [`Variant`] into a declared Rust type.
pub trait FromVariant: Sized {
    /// # Errors
    /// Returns `MmsError::InvalidArguments` on a shape mismatch.
    fn from_variant(value: &Variant) -> Result<Self>;
}

fn mismatch(expected: &str, found: &Variant) -> MmsError {
    MmsError::InvalidArguments(format!("expected {expected}, found {}", found.type_name()))
}

impl FromVariant for bool {
    fn from_variant(value: &Variant) -> Result<Self> {
        match value {
            Variant::Bool(b) => Ok(*b),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromVariant for u64 {
    fn from_variant(value: &Variant) -> Result<Self> {
        match value {
            Variant::U64(n) => Ok(*n),
            other => Err(mismatch("u64", other)),
        }
    }
}

impl FromVariant for String {
    fn from_variant(value: &Variant) -> Result<Self> {
        match value {
            Variant::Str(s) => Ok(s.clone()),
            other => Err(mismatch("string", other)),
        }
    }
}

impl FromVariant for ObjectPath {
    fn from_variant(value: &Variant) -> Result<Self> {
        match value {
            Variant::ObjectPath(p) => Ok(p.clone()),
            other => Err(mismatch("object path", other)),
        }
    }
}

impl<T: FromVariant> FromVariant for Vec<T> {
    fn from_variant(value: &Variant) -> Result<Self> {
        match value {
            Variant::Array(items) => items.iter().map(T::from_variant).collect(),
            other => Err(mismatch("array", other)),
        }
    }
}

impl FromVariant for OutAttachment {
    fn from_variant(value: &Variant) -> Result<Self> {
        match value {
            Variant::Struct(fields) => match fields.as_slice() {
                [id, content_type, file_path] => Ok(Self {
                    id: id.decode()?,
                    content_type: content_type.decode()?,
                    file_path: file_path.decode()?,
                }),
                _ => Err(MmsError::InvalidArguments(format!(
                    "attachment struct needs 3 fields, found {}",
                    fields.len()
                ))),
            },
            other => Err(mismatch("attachment struct", other)),
        }
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for Variant {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<ObjectPath> for Variant {
    fn from(value: ObjectPath) -> Self {
        Self::ObjectPath(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Variant {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Self>> for Variant {
    fn from(value: BTreeMap<String, Self>) -> Self {
        Self::Dict(value)
    }
}

impl From<Attachment> for Variant {
    fn from(a: Attachment) -> Self {
        Self::Struct(vec![
            a.id.into(),
            a.media_type.into(),
            a.file_path.into(),
            a.offset.into(),
            a.length.into(),
        ])
    }
}

impl From<OutAttachment> for Variant {
    fn from(a: OutAttachment) -> Self {
        Self::Struct(vec![a.id.into(), a.content_type.into(), a.file_path.into()])
    }
}
