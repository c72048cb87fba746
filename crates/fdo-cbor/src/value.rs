//! Typed accessors for picking apart positional CBOR arrays.
//!
//! Every accessor takes a `what` label used in the error so that a decode
//! failure names the field that was wrong.

use crate::{SerializationError, SerializationResult, Value};

fn unexpected(what: &'static str, expected: &'static str) -> SerializationError {
    SerializationError::UnexpectedType { what, expected }
}

/// Take an array of any length.
///
/// # Errors
/// Fails if `value` is not an array.
pub fn array(value: Value, what: &'static str) -> SerializationResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(unexpected(what, "array")),
    }
}

/// Take an array with exactly `len` elements.
///
/// # Errors
/// Fails if `value` is not an array or has a different length.
pub fn array_of_len(
    value: Value,
    len: usize,
    what: &'static str,
) -> SerializationResult<Vec<Value>> {
    let items = array(value, what)?;
    if items.len() != len {
        return Err(SerializationError::WrongLength {
            what,
            expected: len,
            actual: items.len(),
        });
    }
    Ok(items)
}

/// Destructure an array of exactly `N` elements into a fixed array.
///
/// # Errors
/// Fails if `value` is not an array of length `N`.
pub fn fields<const N: usize>(value: Value, what: &'static str) -> SerializationResult<[Value; N]> {
    let items = array_of_len(value, N, what)?;
    <[Value; N]>::try_from(items).map_err(|items| SerializationError::WrongLength {
        what,
        expected: N,
        actual: items.len(),
    })
}

/// Take a map as a list of entries.
///
/// # Errors
/// Fails if `value` is not a map.
pub fn map(value: Value, what: &'static str) -> SerializationResult<Vec<(Value, Value)>> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(unexpected(what, "map")),
    }
}

/// Take a byte string.
///
/// # Errors
/// Fails if `value` is not a byte string.
pub fn bytes(value: Value, what: &'static str) -> SerializationResult<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b),
        _ => Err(unexpected(what, "byte string")),
    }
}

/// Take a byte string of exactly `N` bytes.
///
/// # Errors
/// Fails if `value` is not a byte string of length `N`.
pub fn bytes_fixed<const N: usize>(value: Value, what: &'static str) -> SerializationResult<[u8; N]> {
    let raw = bytes(value, what)?;
    <[u8; N]>::try_from(raw.as_slice()).map_err(|_| SerializationError::WrongLength {
        what,
        expected: N,
        actual: raw.len(),
    })
}

/// Take a text string.
///
/// # Errors
/// Fails if `value` is not a text string.
pub fn text(value: Value, what: &'static str) -> SerializationResult<String> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(unexpected(what, "text string")),
    }
}

/// Take a boolean.
///
/// # Errors
/// Fails if `value` is not a boolean.
pub fn boolean(value: Value, what: &'static str) -> SerializationResult<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        _ => Err(unexpected(what, "bool")),
    }
}

/// Take any integer as `i128`.
///
/// # Errors
/// Fails if `value` is not an integer.
pub fn integer(value: &Value, what: &'static str) -> SerializationResult<i128> {
    match value {
        Value::Integer(i) => Ok(i128::from(*i)),
        _ => Err(unexpected(what, "integer")),
    }
}

/// Take an integer that fits `T`.
///
/// # Errors
/// Fails if `value` is not an integer or is out of range for `T`.
pub fn int<T: TryFrom<i128>>(value: &Value, what: &'static str) -> SerializationResult<T> {
    T::try_from(integer(value, what)?)
        .map_err(|_| SerializationError::IntegerOutOfRange { what })
}

/// `None` for CBOR null, the value otherwise.
#[must_use]
pub fn optional(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

/// Look up an integer-keyed entry in a map.
#[must_use]
pub fn map_get(entries: &[(Value, Value)], label: i64) -> Option<&Value> {
    entries.iter().find_map(|(k, v)| match k {
        Value::Integer(i) if i128::from(*i) == i128::from(label) => Some(v),
        _ => None,
    })
}

/// Integer value constructor.
#[must_use]
pub fn uint(v: u64) -> Value {
    Value::Integer(v.into())
}

/// Signed integer value constructor.
#[must_use]
pub fn sint(v: i64) -> Value {
    Value::Integer(v.into())
}

/// Byte string value constructor.
#[must_use]
pub fn bstr(v: impl Into<Vec<u8>>) -> Value {
    Value::Bytes(v.into())
}

/// Text string value constructor.
#[must_use]
pub fn tstr(v: impl Into<String>) -> Value {
    Value::Text(v.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_destructures_exact_arrays() {
        let v = Value::Array(vec![uint(1), bstr(vec![2]), tstr("x")]);
        let [a, b, c] = fields::<3>(v, "triple").unwrap();
        assert_eq!(int::<u8>(&a, "a").unwrap(), 1);
        assert_eq!(bytes(b, "b").unwrap(), vec![2]);
        assert_eq!(text(c, "c").unwrap(), "x");
    }

    #[test]
    fn wrong_arity_names_the_field() {
        let v = Value::Array(vec![uint(1)]);
        let err = fields::<2>(v, "HelloDevice").unwrap_err();
        assert_eq!(
            err.to_string(),
            "HelloDevice: expected length 2, got 1"
        );
    }

    #[test]
    fn int_range_checked() {
        assert!(int::<u8>(&uint(256), "byte").is_err());
        assert_eq!(int::<i32>(&sint(-7), "alg").unwrap(), -7);
        assert!(int::<u16>(&sint(-1), "port").is_err());
    }

    #[test]
    fn fixed_bytes_length_checked() {
        assert!(bytes_fixed::<16>(bstr(vec![0; 16]), "guid").is_ok());
        assert!(matches!(
            bytes_fixed::<16>(bstr(vec![0; 17]), "guid"),
            Err(SerializationError::WrongLength { actual: 17, .. })
        ));
    }

    #[test]
    fn map_lookup_by_int_label() {
        let entries = vec![(sint(-257), bstr(vec![1])), (uint(10), bstr(vec![2]))];
        assert_eq!(map_get(&entries, 10), Some(&bstr(vec![2])));
        assert_eq!(map_get(&entries, -257), Some(&bstr(vec![1])));
        assert_eq!(map_get(&entries, 11), None);
    }

    #[test]
    fn null_is_none() {
        assert_eq!(optional(Value::Null), None);
        assert_eq!(optional(uint(0)), Some(uint(0)));
    }
}
