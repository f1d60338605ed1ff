// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory channel.
//!
//! The publisher creates a POSIX segment and is its only writer. Subscribers map it read-only
//! and poll a sequence counter. Layout:
//!
//! ```text
//! offset 0   sequence  (u64, odd while a write is in progress)
//! offset 8   length    (u64, payload bytes of the last message)
//! offset 64  payload   (size - 64 bytes)
//! ```
//!
//! There is no connection, so [`ShmChannel::is_connected`] is always true. A reader only sees
//! the latest message; slow readers skip intermediate ones.

use super::buffer::{ChannelBuffer, ChannelSettings};
use super::def::{ChannelDef, ShmEndpoint, ShmMode};
use crate::error::{Error, Result};
use std::time::Duration;

/// Bytes reserved for the header.
pub const HEADER_SIZE: usize = 64;

/// Reader polling period.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct ShmChannel {
    segment: segment::ShmSegment,
    mode: ShmMode,
    send_buffer: ChannelBuffer,
    receive_buffer: ChannelBuffer,
    last_sequence: u64,
}

impl ShmChannel {
    /// Creates a fresh segment of `settings.shm_size` bytes; returns the writer and its
    /// descriptor (advertised read-only to subscribers).
    pub fn create(settings: &ChannelSettings) -> Result<(Self, ChannelDef)> {
        if settings.shm_size <= HEADER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "shared memory size {} leaves no room for payload",
                settings.shm_size
            )));
        }
        let guid = uuid::Uuid::new_v4();
        let name = format!("/rdv_{}", guid.simple());
        let segment = segment::ShmSegment::create(&name, settings.shm_size)?;
        let def = ChannelDef::Shm(ShmEndpoint {
            mode: ShmMode::ReadOnly,
            size: settings.shm_size as u64,
            guid: guid.to_string(),
            handle: Some(name),
        });
        let channel = Self {
            segment,
            mode: ShmMode::Writable,
            send_buffer: ChannelBuffer::new(settings.send_buffer),
            receive_buffer: ChannelBuffer::new(settings.receive_buffer),
            last_sequence: 0,
        };
        Ok((channel, def))
    }

    /// Maps the segment described by `endpoint`.
    pub fn open(endpoint: &ShmEndpoint, settings: &ChannelSettings) -> Result<Self> {
        let name = endpoint.handle.as_deref().ok_or_else(|| {
            Error::InvalidArgument("shared memory descriptor has no handle".into())
        })?;
        let size = usize::try_from(endpoint.size)
            .map_err(|_| Error::InvalidArgument("shared memory size overflow".into()))?;
        if size <= HEADER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "shared memory size {} leaves no room for payload",
                size
            )));
        }
        let segment = segment::ShmSegment::open(name, size, endpoint.mode)?;
        // Start after whatever was written before we attached.
        let last_sequence = segment.sequence() & !1;
        Ok(Self {
            segment,
            mode: endpoint.mode,
            send_buffer: ChannelBuffer::new(settings.send_buffer),
            receive_buffer: ChannelBuffer::new(settings.receive_buffer),
            last_sequence,
        })
    }

    pub fn is_connected(&self) -> bool {
        true
    }

    pub fn payload_capacity(&self) -> usize {
        self.segment.size() - HEADER_SIZE
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.mode != ShmMode::Writable {
            return Err(Error::Aborted("shared memory channel is read-only".into()));
        }
        self.send_buffer.reserve(payload.len())?;
        if payload.len() > self.payload_capacity() {
            return Err(Error::not_enough_buffer(
                payload.len(),
                self.payload_capacity(),
            ));
        }
        self.segment.write(payload);
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.segment.read_after(self.last_sequence)? {
                Some((sequence, len)) => {
                    if let Err(e) = self.receive_buffer.reserve(len) {
                        self.last_sequence = sequence;
                        return Err(e);
                    }
                    if let Some(payload) = self.segment.copy_payload(sequence, len) {
                        self.last_sequence = sequence;
                        return Ok(payload);
                    }
                }
                None => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod segment {
    use super::HEADER_SIZE;
    use crate::channel::def::ShmMode;
    use crate::error::{Error, Result};
    use std::ffi::CString;
    use std::io;
    use std::ptr;
    use std::sync::atomic::{fence, AtomicU64, Ordering};

    /// Mapped POSIX segment. The creator unlinks it on drop.
    #[derive(Debug)]
    pub(super) struct ShmSegment {
        ptr: *mut u8,
        size: usize,
        name: String,
        owner: bool,
    }

    // SAFETY: the mapping is process-shared memory; header fields are only touched through
    // atomics and payload access is guarded by the sequence counter.
    unsafe impl Send for ShmSegment {}
    unsafe impl Sync for ShmSegment {}

    fn c_name(name: &str) -> Result<CString> {
        if !name.starts_with('/') || name[1..].contains('/') || name.len() > 255 {
            return Err(Error::InvalidArgument(format!(
                "invalid shared memory name '{}'",
                name
            )));
        }
        CString::new(name)
            .map_err(|_| Error::InvalidArgument(format!("invalid shared memory name '{}'", name)))
    }

    impl ShmSegment {
        pub(super) fn create(name: &str, size: usize) -> Result<Self> {
            let c_name = c_name(name)?;

            // SAFETY: c_name is a valid NUL-terminated string; shm_open returns -1 on error,
            // checked below.
            let fd = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                    0o600,
                )
            };
            if fd < 0 {
                return Err(Error::Network(format!(
                    "shm_open {}: {}",
                    name,
                    io::Error::last_os_error()
                )));
            }

            // SAFETY: fd is a valid descriptor from shm_open.
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
                let err = io::Error::last_os_error();
                // SAFETY: fd is valid and not used afterwards; the name is ours to remove.
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(Error::Network(format!("ftruncate {}: {}", name, err)));
            }

            let ptr = map(fd, size, libc::PROT_READ | libc::PROT_WRITE);
            let ptr = match ptr {
                Ok(ptr) => ptr,
                Err(e) => {
                    // SAFETY: as above.
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                    return Err(e);
                }
            };

            // SAFETY: ptr maps exactly `size` writable bytes nobody else has seen yet.
            unsafe { ptr::write_bytes(ptr, 0, size) };

            Ok(Self {
                ptr,
                size,
                name: name.to_string(),
                owner: true,
            })
        }

        pub(super) fn open(name: &str, size: usize, mode: ShmMode) -> Result<Self> {
            let c_name = c_name(name)?;
            let (flags, prot) = match mode {
                ShmMode::ReadOnly => (libc::O_RDONLY, libc::PROT_READ),
                ShmMode::Writable => (libc::O_RDWR, libc::PROT_READ | libc::PROT_WRITE),
            };

            // SAFETY: c_name is a valid NUL-terminated string; mode is ignored without O_CREAT.
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, 0) };
            if fd < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::NotFound {
                    return Err(Error::NotFound(format!("shared memory segment {}", name)));
                }
                return Err(Error::Network(format!("shm_open {}: {}", name, err)));
            }

            let ptr = map(fd, size, prot)?;
            Ok(Self {
                ptr,
                size,
                name: name.to_string(),
                owner: false,
            })
        }

        pub(super) fn size(&self) -> usize {
            self.size
        }

        fn sequence_cell(&self) -> &AtomicU64 {
            // SAFETY: the mapping is page aligned and at least HEADER_SIZE bytes long.
            unsafe { &*(self.ptr as *const AtomicU64) }
        }

        fn length_cell(&self) -> &AtomicU64 {
            // SAFETY: offset 8 is 8-byte aligned and inside the header.
            unsafe { &*(self.ptr.add(8) as *const AtomicU64) }
        }

        pub(super) fn sequence(&self) -> u64 {
            self.sequence_cell().load(Ordering::Acquire)
        }

        /// Single writer: bump to odd, copy, publish length, bump to even.
        pub(super) fn write(&self, payload: &[u8]) {
            let sequence = self.sequence_cell().load(Ordering::Relaxed);
            self.sequence_cell()
                .store(sequence.wrapping_add(1), Ordering::Relaxed);
            fence(Ordering::Release);

            // SAFETY: the caller checked payload.len() <= size - HEADER_SIZE and the segment
            // was mapped writable by `create`.
            unsafe {
                ptr::copy_nonoverlapping(
                    payload.as_ptr(),
                    self.ptr.add(HEADER_SIZE),
                    payload.len(),
                );
            }
            self.length_cell()
                .store(payload.len() as u64, Ordering::Relaxed);
            self.sequence_cell()
                .store(sequence.wrapping_add(2), Ordering::Release);
        }

        /// `Some((sequence, length))` when a complete message newer than `last` is available.
        pub(super) fn read_after(&self, last: u64) -> Result<Option<(u64, usize)>> {
            let sequence = self.sequence();
            if sequence & 1 == 1 || sequence == last {
                return Ok(None);
            }
            let len = self.length_cell().load(Ordering::Relaxed) as usize;
            if len > self.size - HEADER_SIZE {
                return Err(Error::DataLoss(format!(
                    "shared memory length {} exceeds segment",
                    len
                )));
            }
            Ok(Some((sequence, len)))
        }

        /// Copies the payload; `None` when the writer raced the copy.
        pub(super) fn copy_payload(&self, sequence: u64, len: usize) -> Option<Vec<u8>> {
            let mut payload = vec![0u8; len];
            // SAFETY: len was bounds-checked in read_after; a concurrent write is detected by
            // the sequence check below and the copy discarded.
            unsafe {
                ptr::copy_nonoverlapping(self.ptr.add(HEADER_SIZE), payload.as_mut_ptr(), len);
            }
            fence(Ordering::Acquire);
            if self.sequence_cell().load(Ordering::Relaxed) != sequence {
                return None;
            }
            Some(payload)
        }
    }

    fn map(fd: libc::c_int, size: usize, prot: libc::c_int) -> Result<*mut u8> {
        // SAFETY: fd is a valid shm descriptor; a null hint lets the kernel choose the address;
        // MAP_FAILED is checked below.
        let ptr = unsafe { libc::mmap(ptr::null_mut(), size, prot, libc::MAP_SHARED, fd, 0) };
        // SAFETY: the mapping keeps its own reference to the object.
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Network(format!(
                "mmap: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(ptr as *mut u8)
    }

    impl Drop for ShmSegment {
        fn drop(&mut self) {
            // SAFETY: ptr/size come from a successful mmap and are unmapped exactly once.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
            if self.owner {
                if let Ok(c_name) = CString::new(self.name.as_str()) {
                    // SAFETY: c_name is a valid NUL-terminated string.
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                }
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod segment {
    use crate::channel::def::ShmMode;
    use crate::error::{Error, Result};

    #[derive(Debug)]
    pub(super) struct ShmSegment;

    fn unsupported() -> Error {
        Error::Unavailable("shared memory channels are only supported on linux".into())
    }

    impl ShmSegment {
        pub(super) fn create(_name: &str, _size: usize) -> Result<Self> {
            Err(unsupported())
        }

        pub(super) fn open(_name: &str, _size: usize, _mode: ShmMode) -> Result<Self> {
            Err(unsupported())
        }

        pub(super) fn size(&self) -> usize {
            0
        }

        pub(super) fn sequence(&self) -> u64 {
            0
        }

        pub(super) fn write(&self, _payload: &[u8]) {}

        pub(super) fn read_after(&self, _last: u64) -> Result<Option<(u64, usize)>> {
            Err(unsupported())
        }

        pub(super) fn copy_payload(&self, _sequence: u64, _len: usize) -> Option<Vec<u8>> {
            None
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::channel::buffer::BufferPolicy;

    fn small_settings() -> ChannelSettings {
        ChannelSettings {
            shm_size: 4096,
            ..ChannelSettings::default()
        }
    }

    fn endpoint(def: &ChannelDef) -> ShmEndpoint {
        match def {
            ChannelDef::Shm(ep) => ep.clone(),
            other => panic!("unexpected def {}", other),
        }
    }

    #[tokio::test]
    async fn test_writer_to_reader() {
        let settings = small_settings();
        let (mut writer, def) = ShmChannel::create(&settings).unwrap();
        assert!(def.is_valid());
        let mut reader = ShmChannel::open(&endpoint(&def), &settings).unwrap();

        writer.send(b"first frame").await.unwrap();
        assert_eq!(reader.receive().await.unwrap(), b"first frame");
        writer.send(b"second").await.unwrap();
        assert_eq!(reader.receive().await.unwrap(), b"second");
        assert!(reader.is_connected());
    }

    #[tokio::test]
    async fn test_reader_cannot_write() {
        let settings = small_settings();
        let (_writer, def) = ShmChannel::create(&settings).unwrap();
        let mut reader = ShmChannel::open(&endpoint(&def), &settings).unwrap();
        assert!(matches!(reader.send(b"x").await, Err(Error::Aborted(_))));
    }

    #[tokio::test]
    async fn test_payload_larger_than_segment() {
        let settings = ChannelSettings {
            send_buffer: BufferPolicy::dynamic(16),
            ..small_settings()
        };
        let (mut writer, _def) = ShmChannel::create(&settings).unwrap();
        let payload = vec![0u8; writer.payload_capacity() + 1];
        assert!(writer.send(&payload).await.unwrap_err().is_not_enough_buffer());
    }

    #[test]
    fn test_segment_is_unlinked_by_creator() {
        let settings = small_settings();
        let (writer, def) = ShmChannel::create(&settings).unwrap();
        let ep = endpoint(&def);
        drop(writer);
        assert!(matches!(
            ShmChannel::open(&ep, &settings),
            Err(Error::NotFound(_))
        ));
    }
}
