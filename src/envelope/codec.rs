//! Envelope codec
//!
//! Maps caller key/value types to envelopes and back.
//!
//! Two encodings, chosen at compile time by the type:
//! - raw bytes (`Bytes`, `Vec<u8>`): the payload *is* the value
//! - everything else: UTF-8 JSON via serde_json
//!
//! Arbitrary serde types opt in through the [`Json`] wrapper.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DictError, Result};

use super::Envelope;

/// Conversion between a logical key/value type and its envelope
///
/// `decode(encode(v)) == v` must hold for every value `encode` accepts.
/// Keys are compared by their encoded bytes, so a key type must always
/// encode equal values to identical bytes.
pub trait Codec: Sized + Send + 'static {
    fn encode(&self) -> Result<Envelope>;

    fn decode(envelope: &Envelope) -> Result<Self>;
}

// =============================================================================
// Raw Bytes
// =============================================================================

impl Codec for Bytes {
    fn encode(&self) -> Result<Envelope> {
        // Refcount bump, no copy
        Envelope::new(self.clone())
    }

    fn decode(envelope: &Envelope) -> Result<Self> {
        Ok(envelope.payload().clone())
    }
}

impl Codec for Vec<u8> {
    fn encode(&self) -> Result<Envelope> {
        Envelope::new(Bytes::copy_from_slice(self))
    }

    fn decode(envelope: &Envelope) -> Result<Self> {
        Ok(envelope.payload().to_vec())
    }
}

// =============================================================================
// JSON
// =============================================================================

fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Envelope> {
    Envelope::new(serde_json::to_vec(value)?)
}

fn decode_json<T: DeserializeOwned>(envelope: &Envelope) -> Result<T> {
    Ok(serde_json::from_slice(envelope.payload())?)
}

macro_rules! json_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Codec for $ty {
                fn encode(&self) -> Result<Envelope> {
                    encode_json(self)
                }

                fn decode(envelope: &Envelope) -> Result<Self> {
                    decode_json(envelope)
                }
            }
        )*
    };
}

json_codec!(
    String, bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize,
);

// JSON has no NaN or infinities; serde_json would write them as `null`
macro_rules! float_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Codec for $ty {
                fn encode(&self) -> Result<Envelope> {
                    if !self.is_finite() {
                        return Err(DictError::Serialization(format!(
                            "non-finite {} cannot be encoded: {}",
                            stringify!($ty),
                            self
                        )));
                    }
                    encode_json(self)
                }

                fn decode(envelope: &Envelope) -> Result<Self> {
                    decode_json(envelope)
                }
            }
        )*
    };
}

float_codec!(f32, f64);

/// JSON-encoded wrapper for any serde type
///
/// ```
/// use logdict::envelope::{Codec, Json};
///
/// #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
/// struct Point { x: i32, y: i32 }
///
/// let envelope = Json(Point { x: 1, y: 2 }).encode().unwrap();
/// let Json(point) = Json::<Point>::decode(&envelope).unwrap();
/// assert_eq!(point, Point { x: 1, y: 2 });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Codec for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self) -> Result<Envelope> {
        encode_json(&self.0)
    }

    fn decode(envelope: &Envelope) -> Result<Self> {
        decode_json(envelope).map(Json)
    }
}
