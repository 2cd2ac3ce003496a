//! # Replies and Arguments
//!
//! `Reply` is what a dispatched operation settles with: nothing, a scalar, or
//! a structured value. `FromReply` converts it into caller types for the typed
//! command wrappers; `ToArg` turns caller values into wire arguments.

use std::collections::HashMap;
use std::hash::Hash;

use bytes::Bytes;
use lazykv_common::RespValue;

use crate::error::{ClientError, ClientResult};

/// Successful result of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Null bulk or null array.
    Nil,
    /// Status line such as `OK` or `PONG`.
    Status(String),
    /// Integer reply.
    Integer(i64),
    /// Bulk string.
    Data(Bytes),
    /// Array of replies.
    Array(Vec<Reply>),
}

impl Reply {
    /// Converts a wire value; error frames become `ClientError::Server`.
    pub fn from_resp(value: RespValue) -> ClientResult<Self> {
        match value {
            RespValue::Simple(text) => Ok(Reply::Status(text)),
            RespValue::Error(message) => Err(ClientError::Server(message)),
            RespValue::Integer(number) => Ok(Reply::Integer(number)),
            RespValue::Bulk(None) => Ok(Reply::Nil),
            RespValue::Bulk(Some(data)) => Ok(Reply::Data(data)),
            RespValue::Array(items) => items
                .into_iter()
                .map(Reply::from_resp)
                .collect::<ClientResult<Vec<_>>>()
                .map(Reply::Array),
        }
    }

    /// Returns true for `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Converts into a caller type.
    pub fn into_value<T: FromReply>(self) -> ClientResult<T> {
        T::from_reply(self)
    }
}

/// Conversion from a `Reply` into a caller type.
pub trait FromReply: Sized {
    /// Performs the conversion.
    fn from_reply(reply: Reply) -> ClientResult<Self>;
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        Ok(reply)
    }
}

impl FromReply for () {
    fn from_reply(_reply: Reply) -> ClientResult<Self> {
        Ok(())
    }
}

impl FromReply for String {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match reply {
            Reply::Status(text) => Ok(text),
            Reply::Data(data) => {
                String::from_utf8(data.to_vec()).map_err(|_| ClientError::unexpected("utf-8 string"))
            }
            Reply::Integer(number) => Ok(number.to_string()),
            _ => Err(ClientError::unexpected("string")),
        }
    }
}

impl FromReply for Bytes {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match reply {
            Reply::Data(data) => Ok(data),
            Reply::Status(text) => Ok(Bytes::from(text)),
            _ => Err(ClientError::unexpected("bytes")),
        }
    }
}

impl FromReply for i64 {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match reply {
            Reply::Integer(number) => Ok(number),
            Reply::Data(data) => std::str::from_utf8(&data)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or_else(|| ClientError::unexpected("integer")),
            _ => Err(ClientError::unexpected("integer")),
        }
    }
}

impl FromReply for bool {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match reply {
            Reply::Integer(number) => Ok(number != 0),
            Reply::Status(_) => Ok(true),
            Reply::Nil => Ok(false),
            _ => Err(ClientError::unexpected("boolean")),
        }
    }
}

impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match reply {
            Reply::Nil => Ok(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        match reply {
            Reply::Array(items) => items.into_iter().map(T::from_reply).collect(),
            Reply::Nil => Ok(Vec::new()),
            _ => Err(ClientError::unexpected("array")),
        }
    }
}

/// Flat `[field, value, field, value, ...]` arrays, as returned by `HGETALL`.
impl<K, V> FromReply for HashMap<K, V>
where
    K: FromReply + Eq + Hash,
    V: FromReply,
{
    fn from_reply(reply: Reply) -> ClientResult<Self> {
        let items = match reply {
            Reply::Array(items) => items,
            Reply::Nil => return Ok(HashMap::new()),
            _ => return Err(ClientError::unexpected("field/value array")),
        };
        if items.len() % 2 != 0 {
            return Err(ClientError::unexpected("even number of field/value items"));
        }

        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            map.insert(K::from_reply(field)?, V::from_reply(value)?);
        }
        Ok(map)
    }
}

/// Conversion of caller values into wire arguments.
pub trait ToArg {
    /// Encodes the value as one argument.
    fn to_arg(&self) -> Bytes;
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

macro_rules! numeric_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

numeric_arg!(i32, i64, u32, u64, usize, f64);
