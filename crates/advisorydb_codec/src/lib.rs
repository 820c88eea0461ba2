//! # AdvisoryDB Codec
//!
//! Canonical CBOR encoding for every value the advisory database stores.
//!
//! Record types derive `serde` traits; this crate lowers them through
//! [`ciborium`] and writes the result deterministically:
//! - Identical inputs produce identical bytes, whatever the map iteration order
//! - Integers use the shortest encoding
//! - Map keys are sorted length-first, then bytewise
//! - Floats are written as 64-bit values and NaN is rejected
//!
//! ## Usage
//!
//! ```
//! use advisorydb_codec::{Decode, Encode};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Advisory {
//!     fixed_version: String,
//! }
//!
//! let advisory = Advisory { fixed_version: "1.2.3".into() };
//! let bytes = advisory.encode().unwrap();
//! assert_eq!(Advisory::decode(&bytes).unwrap(), advisory);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;

pub use decoder::{from_cbor, from_cbor_value};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl<T: Serialize + ?Sized> Encode for T {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl<T: DeserializeOwned> Decode for T {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
