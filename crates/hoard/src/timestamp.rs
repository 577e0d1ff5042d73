// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Timestamp suffix packing for the expiration path.
//!
//! When a group is configured with an expiration, cached values carry an
//! 8-byte little-endian Unix-seconds timestamp appended to the payload.
//! Getters produce it through [`Sink::set_timestamp_bytes`][crate::Sink],
//! and callers strip it with [`unpack_timestamp`] after a `get`.

use crate::{ByteView, Error, Result};

/// Appends `timestamp` to `b` as 8 little-endian bytes.
#[must_use]
pub fn pack_timestamp(mut b: Vec<u8>, timestamp: i64) -> Vec<u8> {
    b.extend_from_slice(&timestamp.to_le_bytes());
    b
}

/// Splits a packed value into its payload and timestamp.
///
/// Inputs shorter than 8 bytes cannot carry a suffix and are returned whole
/// with timestamp 0.
#[must_use]
pub fn unpack_timestamp(b: &[u8]) -> (&[u8], i64) {
    if b.len() < 8 {
        return (b, 0);
    }
    let (payload, suffix) = b.split_at(b.len() - 8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(suffix);
    (payload, i64::from_le_bytes(raw))
}

/// Reads the timestamp suffix of a cached view.
///
/// Unlike [`unpack_timestamp`], a view too short to carry a suffix is an
/// error: the expiration path cannot decide freshness without one.
pub fn view_timestamp(view: &ByteView) -> Result<i64> {
    if view.len() < 8 {
        return Err(Error::MissingTimestamp);
    }
    let suffix = view.slice_from(view.len() - 8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(suffix.as_bytes());
    Ok(i64::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let packed = pack_timestamp(b"payload".to_vec(), 1_234_567_890);
        let (payload, timestamp) = unpack_timestamp(&packed);
        assert_eq!(payload, b"payload");
        assert_eq!(timestamp, 1_234_567_890);
    }

    #[test]
    fn round_trip_empty_payload() {
        let packed = pack_timestamp(Vec::new(), -7);
        assert_eq!(packed.len(), 8);
        let (payload, timestamp) = unpack_timestamp(&packed);
        assert!(payload.is_empty());
        assert_eq!(timestamp, -7);
    }

    #[test]
    fn short_input_unpacks_whole() {
        let (payload, timestamp) = unpack_timestamp(b"tiny");
        assert_eq!(payload, b"tiny");
        assert_eq!(timestamp, 0);
    }

    #[test]
    fn view_timestamp_reads_the_suffix() {
        let packed = pack_timestamp(b"v1".to_vec(), 100);
        let view = ByteView::from(packed);
        assert_eq!(view_timestamp(&view).unwrap(), 100);
    }

    #[test]
    fn view_timestamp_requires_a_suffix() {
        let view = ByteView::from("v1");
        assert!(matches!(view_timestamp(&view), Err(Error::MissingTimestamp)));
    }
}
