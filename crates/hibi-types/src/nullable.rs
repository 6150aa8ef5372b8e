//! Serde helper for patch fields that distinguish "absent" from "null".
//!
//! With `#[serde(default, deserialize_with = "crate::nullable::deserialize")]`
//! on an `Option<Option<T>>`: absent → `None` (leave unchanged), `null` →
//! `Some(None)` (clear), a value → `Some(Some(v))` (set).

use serde::{Deserialize, Deserializer};

pub(crate) fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
