//! Boundary envelopes: fixed-layout byte, string and 2D byte views exchanged with the native engine.
//!
//! Layouts (all `#[repr(C)]`):
//! - byte envelope: `{ len: usize, buff: *const u8 }`
//! - string envelope: byte envelope over UTF-8
//! - 2D envelope: `{ len: usize, buff: [byte envelope; MAX_ROWS] }`
//!
//! Outbound envelopes borrow from an [`Arena`]; the arena must outlive the native call.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::slice;

/// Row capacity of a 2D envelope. The native struct holds an inline array of this size.
pub const MAX_ROWS: usize = 32;

/// Size of one serialized group member record (16 byte user id + 65 byte member id).
pub const GROUP_MEMBER_RECORD_LEN: usize = 81;

/// Error building or reading a boundary envelope.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("{0} rows exceed envelope capacity of {MAX_ROWS}")]
    TooManyRows(usize),
    #[error("null buffer with length {0}")]
    NullBuffer(usize),
    #[error("{needed} bytes exceed buffer capacity {capacity}")]
    Overflow { needed: usize, capacity: usize },
    #[error("string contains an interior NUL byte")]
    InteriorNul,
    #[error("string envelope is not valid UTF-8")]
    InvalidUtf8,
    #[error("group member info length {0} is not a multiple of {GROUP_MEMBER_RECORD_LEN}")]
    MemberInfoLength(usize),
}

/// Byte envelope. Points at `len` readable bytes for `'a`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ByteArray<'a> {
    len: usize,
    buff: *const u8,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> ByteArray<'a> {
    /// Zero-length envelope with a dangling, non-null pointer.
    pub fn empty() -> Self {
        Self {
            len: 0,
            buff: NonNull::<u8>::dangling().as_ptr(),
            _marker: PhantomData,
        }
    }

    /// Envelope over a borrowed slice.
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        Self {
            len: bytes.len(),
            buff: bytes.as_ptr(),
            _marker: PhantomData,
        }
    }

    /// Wrap a native-owned buffer.
    ///
    /// # Safety
    /// If `buff` is non-null it must point at `len` bytes that stay readable for `'a`.
    pub unsafe fn from_raw(buff: *const u8, len: usize) -> Self {
        Self {
            len,
            buff,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.buff
    }

    /// Borrow the bytes. Null with a non-zero length is rejected.
    pub fn as_slice(&self) -> Result<&'a [u8], MarshalError> {
        if self.len == 0 {
            return Ok(&[]);
        }
        if self.buff.is_null() {
            return Err(MarshalError::NullBuffer(self.len));
        }
        // SAFETY: constructors guarantee `len` readable bytes for 'a.
        Ok(unsafe { slice::from_raw_parts(self.buff, self.len) })
    }

    /// Copy the bytes out of boundary memory.
    pub fn to_vec(&self) -> Result<Vec<u8>, MarshalError> {
        self.as_slice().map(<[u8]>::to_vec)
    }
}

/// String envelope: same layout as [`ByteArray`], always UTF-8.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PString<'a> {
    len: usize,
    buff: *const u8,
    _marker: PhantomData<&'a str>,
}

impl<'a> PString<'a> {
    pub fn borrowed(s: &'a str) -> Self {
        Self {
            len: s.len(),
            buff: s.as_ptr(),
            _marker: PhantomData,
        }
    }

    /// Wrap a native-owned UTF-8 buffer.
    ///
    /// # Safety
    /// Same contract as [`ByteArray::from_raw`].
    pub unsafe fn from_raw(buff: *const u8, len: usize) -> Self {
        Self {
            len,
            buff,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decode into an owned string.
    pub fn to_utf8(&self) -> Result<String, MarshalError> {
        // SAFETY: identical layout and contract to ByteArray.
        let bytes = unsafe { ByteArray::from_raw(self.buff, self.len) }.as_slice()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| MarshalError::InvalidUtf8)
    }
}

/// 2D envelope: row count plus a fixed inline table of row envelopes.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ByteArray2D<'a> {
    len: usize,
    buff: [ByteArray<'a>; MAX_ROWS],
}

impl<'a> ByteArray2D<'a> {
    /// Build from row envelopes; unused slots hold empty envelopes.
    pub fn from_rows(rows: &[ByteArray<'a>]) -> Result<Self, MarshalError> {
        if rows.len() > MAX_ROWS {
            return Err(MarshalError::TooManyRows(rows.len()));
        }
        let mut buff = [ByteArray::empty(); MAX_ROWS];
        buff[..rows.len()].copy_from_slice(rows);
        Ok(Self {
            len: rows.len(),
            buff,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy every row out of boundary memory.
    pub fn to_rows(&self) -> Result<Vec<Vec<u8>>, MarshalError> {
        if self.len > MAX_ROWS {
            return Err(MarshalError::TooManyRows(self.len));
        }
        self.buff[..self.len].iter().map(ByteArray::to_vec).collect()
    }
}

/// Owns the backing buffers of outbound envelopes.
///
/// Create one per native call and drop it when the call returns. Buffers are boxed so their
/// addresses stay fixed while the arena grows.
#[derive(Default)]
pub struct Arena {
    buffers: RefCell<Vec<Box<[u8]>>>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    fn hold(&self, bytes: &[u8]) -> (*const u8, usize) {
        let boxed: Box<[u8]> = bytes.into();
        let out = (boxed.as_ptr(), boxed.len());
        self.buffers.borrow_mut().push(boxed);
        out
    }

    /// Copy `bytes` into the arena and return an envelope over the copy.
    pub fn bytes(&self, bytes: &[u8]) -> ByteArray<'_> {
        let (buff, len) = self.hold(bytes);
        // SAFETY: the boxed copy lives as long as the arena borrow.
        unsafe { ByteArray::from_raw(buff, len) }
    }

    /// Copy the UTF-8 encoding of `s` into the arena.
    pub fn string(&self, s: &str) -> PString<'_> {
        let (buff, len) = self.hold(s.as_bytes());
        // SAFETY: as above.
        unsafe { PString::from_raw(buff, len) }
    }

    /// Copy each row independently and build a 2D envelope over them.
    pub fn rows<R: AsRef<[u8]>>(&self, rows: &[R]) -> Result<ByteArray2D<'_>, MarshalError> {
        if rows.len() > MAX_ROWS {
            return Err(MarshalError::TooManyRows(rows.len()));
        }
        let envelopes: Vec<ByteArray<'_>> = rows.iter().map(|r| self.bytes(r.as_ref())).collect();
        ByteArray2D::from_rows(&envelopes)
    }

    /// Total bytes held.
    pub fn allocated(&self) -> usize {
        self.buffers.borrow().iter().map(|b| b.len()).sum()
    }
}

/// Reject member info blobs the native engine cannot split into records.
pub fn check_member_info(bytes: &[u8]) -> Result<(), MarshalError> {
    if bytes.len() % GROUP_MEMBER_RECORD_LEN != 0 {
        return Err(MarshalError::MemberInfoLength(bytes.len()));
    }
    Ok(())
}
