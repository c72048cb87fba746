//! Serde adapter for variable-length byte fields (encoded messages, keys).

use serde::{Deserializer, Serializer};

/// Serialize a byte vector.
///
/// # Errors
/// Propagates serializer errors.
#[allow(clippy::ptr_arg)]
pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
    crate::hex_or_bytes::write_bytes(bytes, serializer)
}

/// Deserialize a byte vector.
///
/// # Errors
/// Fails on bad hex or an error from the underlying format.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    crate::hex_or_bytes::read_bytes(deserializer)
}

/// Same encoding for `Option<Vec<u8>>`; `None` maps to null.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    /// Propagates serializer errors.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => crate::hex_or_bytes::write_bytes(b, serializer),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    /// Fails on bad hex or an error from the underlying format.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "crate::hex_or_bytes_vec")] Vec<u8>);

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        #[serde(with = "crate::hex_or_bytes_vec")]
        data: Vec<u8>,
        #[serde(with = "crate::hex_or_bytes_vec::option", default)]
        extra: Option<Vec<u8>>,
    }

    #[test]
    fn optional_bytes_roundtrip_through_cbor() {
        for extra in [None, Some(vec![9, 9])] {
            let blob = Blob {
                data: vec![1, 2, 3],
                extra,
            };
            let bytes = crate::to_vec(&blob).unwrap();
            assert_eq!(crate::from_slice::<Blob>(&bytes).unwrap(), blob);
        }
    }

    #[test]
    fn empty_vec_is_empty_string_in_json() {
        let blob = Blob {
            data: Vec::new(),
            extra: None,
        };
        let json = serde_json::to_string(&blob).unwrap();
        assert_eq!(json, r#"{"data":"","extra":null}"#);
    }
}
