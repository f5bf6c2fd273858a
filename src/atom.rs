//! Construction and inspection of the few atoms the host itself emits.
//!
//! Atoms are built directly as native-endian bytes into caller-provided
//! storage, so the process cycle can forge a transport position object on
//! the stack without touching the allocator.
//!
//! Layout of an object atom:
//!
//! ```text
//! [0..4]   atom size (bytes following the 8 byte atom header)
//! [4..8]   atom type (atom:Object)
//! [8..12]  object id (0 here)
//! [12..16] object otype
//! [16..]   properties: {key u32, context u32, value atom}, each value
//!          body padded so the next property starts on an 8 byte boundary
//! ```

use crate::lv2::LV2Urid;

/// Size of the `{u32 size, u32 type}` atom header.
pub const ATOM_HEADER_SIZE: usize = 8;

/// Round up to the next 8 byte boundary.
pub fn pad_size(size: u32) -> u32 {
    (size + 7) & !7
}

/// Split `bytes` into an atom's (type, body). Returns `None` when the
/// header is incomplete or the declared size overruns the slice.
pub fn split_atom(bytes: &[u8]) -> Option<(LV2Urid, &[u8])> {
    if bytes.len() < ATOM_HEADER_SIZE {
        return None;
    }
    let size = u32::from_ne_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let typ = u32::from_ne_bytes(bytes[4..8].try_into().unwrap());
    let body = bytes.get(ATOM_HEADER_SIZE..ATOM_HEADER_SIZE + size)?;
    Some((typ, body))
}

/// Write an atom header in front of a body of `size` bytes.
pub fn write_atom_header(buf: &mut [u8], size: u32, typ: LV2Urid) {
    buf[0..4].copy_from_slice(&size.to_ne_bytes());
    buf[4..8].copy_from_slice(&typ.to_ne_bytes());
}

/// Incremental writer for an object atom backed by a fixed byte buffer.
/// Running out of room poisons the writer and `finish` reports it; nothing
/// is ever written past the buffer.
pub struct ObjectWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> ObjectWriter<'a> {
    /// Start an object of class `otype`. `object_type` is the URID of
    /// atom:Object itself.
    pub fn new(buf: &'a mut [u8], object_type: LV2Urid, otype: LV2Urid) -> Self {
        let mut writer = ObjectWriter {
            buf,
            len: 0,
            truncated: false,
        };
        writer.put(&0u32.to_ne_bytes()); // atom size, patched in finish()
        writer.put(&object_type.to_ne_bytes());
        writer.put(&0u32.to_ne_bytes()); // object id
        writer.put(&otype.to_ne_bytes());
        writer
    }

    fn put(&mut self, bytes: &[u8]) {
        if self.truncated || self.len + bytes.len() > self.buf.len() {
            self.truncated = true;
            return;
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    fn property_header(&mut self, key: LV2Urid, size: u32, typ: LV2Urid) {
        self.put(&key.to_ne_bytes());
        self.put(&0u32.to_ne_bytes()); // context
        self.put(&size.to_ne_bytes());
        self.put(&typ.to_ne_bytes());
    }

    fn pad_to_boundary(&mut self) {
        while self.len % 8 != 0 && !self.truncated {
            self.put(&[0u8]);
        }
    }

    pub fn property_long(&mut self, key: LV2Urid, typ: LV2Urid, value: i64) {
        self.property_header(key, 8, typ);
        self.put(&value.to_ne_bytes());
    }

    pub fn property_float(&mut self, key: LV2Urid, typ: LV2Urid, value: f32) {
        self.property_header(key, 4, typ);
        self.put(&value.to_ne_bytes());
        self.pad_to_boundary();
    }

    pub fn property_int(&mut self, key: LV2Urid, typ: LV2Urid, value: i32) {
        self.property_header(key, 4, typ);
        self.put(&value.to_ne_bytes());
        self.pad_to_boundary();
    }

    /// Patch the atom size and return the finished atom, header included.
    /// `None` when the buffer was too small; the contents are unspecified
    /// in that case but still within bounds.
    pub fn finish(self) -> Option<&'a [u8]> {
        if self.truncated {
            return None;
        }
        let body_size = (self.len - ATOM_HEADER_SIZE) as u32;
        self.buf[0..4].copy_from_slice(&body_size.to_ne_bytes());
        Some(&self.buf[..self.len])
    }
}
