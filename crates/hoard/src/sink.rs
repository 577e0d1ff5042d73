// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Write-once destinations for retrieved values.
//!
//! A [`Sink`] receives exactly one value: the caller picks the shape it
//! wants the bytes in (a `String`, an owned `Vec<u8>`, a preallocated
//! buffer, a [`ByteView`]), hands the sink to [`Group::get`][crate::Group],
//! and reads the destination afterwards. Every sink also retains a
//! [`ByteView`] of what was written so the engine can cache the value
//! without another copy.

use crate::{ByteView, Error, Result, timestamp};

/// A destination for a single retrieved value.
///
/// `set_view` is the engine's zero-copy path; the other setters serve
/// user-supplied getters. `set_timestamp_bytes` appends the 8-byte
/// timestamp suffix used by the expiration machinery and is only supported
/// by byte-oriented sinks.
pub trait Sink: Send {
    /// Sets the value to a string.
    fn set_string(&mut self, s: &str) -> Result<()>;

    /// Sets the value to a copy of `b`.
    fn set_bytes(&mut self, b: &[u8]) -> Result<()>;

    /// Sets the value to `b` with `timestamp` packed onto the end.
    fn set_timestamp_bytes(&mut self, b: &[u8], timestamp: i64) -> Result<()>;

    /// Sets the value to a view, sharing its backing store where possible.
    fn set_view(&mut self, view: ByteView) -> Result<()>;

    /// Returns a view of what was written (empty if nothing was).
    fn view(&self) -> ByteView;
}

/// A sink that materializes the value into a `String`.
///
/// Byte values are converted lossily rather than rejected; cached values
/// are opaque bytes and a string destination does not get to veto them.
/// Timestamp packing is unsupported because the suffix is not text; use a
/// byte-oriented sink with expiration.
#[derive(Debug)]
pub struct StringSink<'a> {
    dst: &'a mut String,
    v: ByteView,
}

impl<'a> StringSink<'a> {
    /// Creates a sink writing into `dst`.
    pub fn new(dst: &'a mut String) -> Self {
        Self {
            dst,
            v: ByteView::default(),
        }
    }
}

impl Sink for StringSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<()> {
        self.v = ByteView::from(s);
        *self.dst = s.to_owned();
        Ok(())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.v = ByteView::from(b);
        *self.dst = String::from_utf8_lossy(b).into_owned();
        Ok(())
    }

    fn set_timestamp_bytes(&mut self, _b: &[u8], _timestamp: i64) -> Result<()> {
        Err(Error::UnsupportedSink("StringSink"))
    }

    fn set_view(&mut self, view: ByteView) -> Result<()> {
        *self.dst = view.to_string_lossy();
        self.v = view;
        Ok(())
    }

    fn view(&self) -> ByteView {
        self.v.clone()
    }
}

/// A sink that allocates an owned byte vector for the value.
#[derive(Debug)]
pub struct AllocatingByteSliceSink<'a> {
    dst: &'a mut Vec<u8>,
    v: ByteView,
}

impl<'a> AllocatingByteSliceSink<'a> {
    /// Creates a sink writing into `dst`.
    pub fn new(dst: &'a mut Vec<u8>) -> Self {
        Self {
            dst,
            v: ByteView::default(),
        }
    }
}

impl Sink for AllocatingByteSliceSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<()> {
        self.set_bytes(s.as_bytes())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.v = ByteView::from(b);
        *self.dst = self.v.to_vec();
        Ok(())
    }

    fn set_timestamp_bytes(&mut self, b: &[u8], timestamp: i64) -> Result<()> {
        let packed = timestamp::pack_timestamp(b.to_vec(), timestamp);
        *self.dst = packed.clone();
        self.v = ByteView::from(packed);
        Ok(())
    }

    fn set_view(&mut self, view: ByteView) -> Result<()> {
        *self.dst = view.to_vec();
        self.v = view;
        Ok(())
    }

    fn view(&self) -> ByteView {
        self.v.clone()
    }
}

/// A sink that copies the value into a caller-provided buffer, dropping
/// whatever does not fit. [`bytes_written`][Self::bytes_written] reports the
/// copied length; [`Sink::view`] still exposes the full value.
#[derive(Debug)]
pub struct TruncatingByteSliceSink<'a> {
    dst: &'a mut [u8],
    written: usize,
    v: ByteView,
}

impl<'a> TruncatingByteSliceSink<'a> {
    /// Creates a sink copying into `dst`.
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self {
            dst,
            written: 0,
            v: ByteView::default(),
        }
    }

    /// Returns how many bytes were copied into the buffer.
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.written
    }
}

impl Sink for TruncatingByteSliceSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<()> {
        self.set_bytes(s.as_bytes())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<()> {
        let n = b.len().min(self.dst.len());
        self.dst[..n].copy_from_slice(&b[..n]);
        self.written = n;
        self.v = ByteView::from(b);
        Ok(())
    }

    fn set_timestamp_bytes(&mut self, _b: &[u8], _timestamp: i64) -> Result<()> {
        Err(Error::UnsupportedSink("TruncatingByteSliceSink"))
    }

    fn set_view(&mut self, view: ByteView) -> Result<()> {
        let n = view.len().min(self.dst.len());
        self.dst[..n].copy_from_slice(&view.as_bytes()[..n]);
        self.written = n;
        self.v = view;
        Ok(())
    }

    fn view(&self) -> ByteView {
        self.v.clone()
    }
}

/// A sink that stores the value as a [`ByteView`] without copying.
///
/// This is the cheapest destination and the one the engine uses internally
/// to capture getter output for caching.
#[derive(Debug)]
pub struct ByteViewSink<'a> {
    dst: &'a mut ByteView,
}

impl<'a> ByteViewSink<'a> {
    /// Creates a sink writing into `dst`.
    pub fn new(dst: &'a mut ByteView) -> Self {
        Self { dst }
    }
}

impl Sink for ByteViewSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<()> {
        *self.dst = ByteView::from(s);
        Ok(())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<()> {
        *self.dst = ByteView::from(b);
        Ok(())
    }

    fn set_timestamp_bytes(&mut self, b: &[u8], timestamp: i64) -> Result<()> {
        *self.dst = ByteView::from(timestamp::pack_timestamp(b.to_vec(), timestamp));
        Ok(())
    }

    fn set_view(&mut self, view: ByteView) -> Result<()> {
        *self.dst = view;
        Ok(())
    }

    fn view(&self) -> ByteView {
        self.dst.clone()
    }
}
