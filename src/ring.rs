//! Lock-free single-producer single-consumer byte rings with whole-record
//! framing.
//!
//! Two framings share the transport: control-change records exchanged with
//! the UI thread (`{port index, protocol, size, payload}`) and raw length
//! prefixed blobs for the worker. Writers never block and never split a
//! record: one that does not fit is dropped whole and reported to the
//! caller. A reader that finds fewer bytes than a header claims treats the
//! ring as corrupt for this cycle and stops reading.

use rtrb::{Consumer, Producer, RingBuffer};

/// Byte count of the control-change record header.
pub const CONTROL_HEADER_SIZE: usize = 12;

/// Protocol tag for a plain 32 bit float control value.
pub const PROTOCOL_FLOAT: u32 = 0;

struct ByteSender {
    producer: Producer<u8>,
}

struct ByteReceiver {
    consumer: Consumer<u8>,
}

fn byte_ring(capacity: usize) -> (ByteSender, ByteReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (ByteSender { producer }, ByteReceiver { consumer })
}

impl ByteSender {
    /// Write all parts as one contiguous record, or nothing at all.
    fn write_vectored(&mut self, parts: &[&[u8]]) -> bool {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        if self.producer.slots() < total {
            return false;
        }
        match self.producer.write_chunk_uninit(total) {
            Ok(chunk) => {
                let written = chunk.fill_from_iter(parts.iter().flat_map(|p| p.iter().copied()));
                debug_assert_eq!(written, total);
                true
            }
            Err(_) => false,
        }
    }
}

impl ByteReceiver {
    fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Copy `buf.len()` bytes out without consuming them.
    fn peek(&mut self, buf: &mut [u8]) -> bool {
        match self.consumer.read_chunk(buf.len()) {
            Ok(chunk) => {
                let (a, b) = chunk.as_slices();
                let split = a.len().min(buf.len());
                buf[..split].copy_from_slice(&a[..split]);
                buf[split..].copy_from_slice(&b[..buf.len() - split]);
                // Dropping the chunk without committing leaves the bytes in
                // the ring.
                true
            }
            Err(_) => false,
        }
    }

    /// Copy and consume exactly `buf.len()` bytes.
    fn read_exact(&mut self, buf: &mut [u8]) -> bool {
        match self.consumer.read_chunk(buf.len()) {
            Ok(chunk) => {
                let (a, b) = chunk.as_slices();
                let split = a.len().min(buf.len());
                buf[..split].copy_from_slice(&a[..split]);
                buf[split..].copy_from_slice(&b[..buf.len() - split]);
                chunk.commit_all();
                true
            }
            Err(_) => false,
        }
    }
}

/// Header of a control-change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub index: u32,
    pub protocol: u32,
    pub size: u32,
}

impl ControlHeader {
    fn to_bytes(self) -> [u8; CONTROL_HEADER_SIZE] {
        let mut bytes = [0u8; CONTROL_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.index.to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.protocol.to_ne_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_ne_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; CONTROL_HEADER_SIZE]) -> Self {
        ControlHeader {
            index: u32::from_ne_bytes(bytes[0..4].try_into().unwrap()),
            protocol: u32::from_ne_bytes(bytes[4..8].try_into().unwrap()),
            size: u32::from_ne_bytes(bytes[8..12].try_into().unwrap()),
        }
    }
}

/// Outcome of one read attempt on a control ring.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlRecv {
    /// Nothing to read.
    Empty,
    /// One record was copied out; the header and its body length in the
    /// caller's buffer.
    Record(ControlHeader),
    /// The ring held fewer bytes than the header claimed, or the record
    /// does not fit the caller's buffer. The cycle should stop reading.
    Malformed,
}

pub struct ControlSender {
    ring: ByteSender,
}

impl ControlSender {
    /// Send a record whose payload is split over `head` and `tail`. Either
    /// may be empty. Returns false when the record was dropped.
    pub fn send_split(&mut self, index: u32, protocol: u32, head: &[u8], tail: &[u8]) -> bool {
        let header = ControlHeader {
            index,
            protocol,
            size: (head.len() + tail.len()) as u32,
        };
        self.ring.write_vectored(&[&header.to_bytes(), head, tail])
    }

    pub fn send(&mut self, index: u32, protocol: u32, body: &[u8]) -> bool {
        self.send_split(index, protocol, body, &[])
    }

    pub fn send_float(&mut self, index: u32, value: f32) -> bool {
        self.send(index, PROTOCOL_FLOAT, &value.to_ne_bytes())
    }
}

pub struct ControlReceiver {
    ring: ByteReceiver,
}

impl ControlReceiver {
    /// Read one whole record, copying the body into `body`.
    pub fn recv(&mut self, body: &mut [u8]) -> ControlRecv {
        if self.ring.available() < CONTROL_HEADER_SIZE {
            return ControlRecv::Empty;
        }

        let mut header_bytes = [0u8; CONTROL_HEADER_SIZE];
        if !self.ring.peek(&mut header_bytes) {
            return ControlRecv::Empty;
        }
        let header = ControlHeader::from_bytes(&header_bytes);
        let size = header.size as usize;

        if size > body.len() || self.ring.available() < CONTROL_HEADER_SIZE + size {
            return ControlRecv::Malformed;
        }

        if !self.ring.read_exact(&mut header_bytes) || !self.ring.read_exact(&mut body[..size]) {
            return ControlRecv::Malformed;
        }
        ControlRecv::Record(header)
    }
}

/// A ring carrying control-change records, split into its two ends.
pub fn control_channel(capacity: usize) -> (ControlSender, ControlReceiver) {
    let (tx, rx) = byte_ring(capacity);
    (ControlSender { ring: tx }, ControlReceiver { ring: rx })
}

pub struct BlobSender {
    ring: ByteSender,
}

impl BlobSender {
    pub fn send(&mut self, data: &[u8]) -> bool {
        let size = data.len() as u32;
        self.ring.write_vectored(&[&size.to_ne_bytes(), data])
    }
}

pub struct BlobReceiver {
    ring: ByteReceiver,
}

impl BlobReceiver {
    /// Read one blob into a fixed buffer. `None` when the ring is empty;
    /// a blob larger than `buf` is consumed and discarded, reported as
    /// `Some(Err(len))` so the caller can log it.
    pub fn recv(&mut self, buf: &mut [u8]) -> Option<Result<usize, usize>> {
        let mut size_bytes = [0u8; 4];
        if self.ring.available() < size_bytes.len() || !self.ring.peek(&mut size_bytes) {
            return None;
        }
        let size = u32::from_ne_bytes(size_bytes) as usize;
        if self.ring.available() < 4 + size {
            return None;
        }

        self.ring.read_exact(&mut size_bytes);
        if size > buf.len() {
            // Discard in pieces through the caller's buffer.
            let mut remaining = size;
            while remaining > 0 {
                let step = remaining.min(buf.len());
                if !self.ring.read_exact(&mut buf[..step]) {
                    break;
                }
                remaining -= step;
            }
            return Some(Err(size));
        }
        if !self.ring.read_exact(&mut buf[..size]) {
            return None;
        }
        Some(Ok(size))
    }

    /// Read one blob into a growable buffer. For non-realtime readers.
    pub fn recv_vec(&mut self, buf: &mut Vec<u8>) -> Option<usize> {
        let mut size_bytes = [0u8; 4];
        if self.ring.available() < size_bytes.len() || !self.ring.peek(&mut size_bytes) {
            return None;
        }
        let size = u32::from_ne_bytes(size_bytes) as usize;
        if self.ring.available() < 4 + size {
            return None;
        }
        if buf.len() < size {
            buf.resize(size, 0);
        }
        self.ring.read_exact(&mut size_bytes);
        self.ring.read_exact(&mut buf[..size]);
        Some(size)
    }
}

/// A ring carrying length prefixed blobs, split into its two ends.
pub fn blob_channel(capacity: usize) -> (BlobSender, BlobReceiver) {
    let (tx, rx) = byte_ring(capacity);
    (BlobSender { ring: tx }, BlobReceiver { ring: rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_records_roundtrip_in_order() {
        let (mut tx, mut rx) = control_channel(256);
        assert!(tx.send_float(3, 0.25));
        assert!(tx.send(7, 42, &[1, 2, 3, 4, 5]));

        let mut body = [0u8; 64];
        match rx.recv(&mut body) {
            ControlRecv::Record(header) => {
                assert_eq!(header.index, 3);
                assert_eq!(header.protocol, PROTOCOL_FLOAT);
                assert_eq!(header.size, 4);
                assert_eq!(f32::from_ne_bytes(body[0..4].try_into().unwrap()), 0.25);
            }
            other => panic!("unexpected {other:?}"),
        }
        match rx.recv(&mut body) {
            ControlRecv::Record(header) => {
                assert_eq!(header.index, 7);
                assert_eq!(header.protocol, 42);
                assert_eq!(&body[..5], &[1, 2, 3, 4, 5]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.recv(&mut body), ControlRecv::Empty);
    }

    #[test]
    fn split_payloads_arrive_contiguously() {
        let (mut tx, mut rx) = control_channel(256);
        assert!(tx.send_split(0, 9, &[0xaa, 0xbb], &[0xcc, 0xdd, 0xee]));

        let mut body = [0u8; 16];
        match rx.recv(&mut body) {
            ControlRecv::Record(header) => {
                assert_eq!(header.size, 5);
                assert_eq!(&body[..5], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overflowing_record_is_dropped_whole() {
        // Room for exactly two float records of 16 bytes each.
        let (mut tx, mut rx) = control_channel(32);
        assert!(tx.send_float(0, 1.0));
        assert!(tx.send_float(0, 2.0));
        assert!(!tx.send_float(0, 3.0));

        // The first two arrive intact and in order.
        let mut body = [0u8; 8];
        for expected in [1.0f32, 2.0f32] {
            match rx.recv(&mut body) {
                ControlRecv::Record(header) => {
                    assert_eq!(header.size, 4);
                    let value = f32::from_ne_bytes(body[0..4].try_into().unwrap());
                    assert_eq!(value, expected);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(rx.recv(&mut body), ControlRecv::Empty);

        // Once drained there is room again.
        assert!(tx.send_float(0, 3.0));
    }

    #[test]
    fn record_larger_than_read_buffer_is_malformed() {
        let (mut tx, mut rx) = control_channel(256);
        assert!(tx.send(0, 1, &[0; 32]));
        let mut body = [0u8; 8];
        assert_eq!(rx.recv(&mut body), ControlRecv::Malformed);
    }

    #[test]
    fn blobs_roundtrip() {
        let (mut tx, mut rx) = blob_channel(128);
        assert!(tx.send(&[1, 2, 3]));
        assert!(tx.send(&[]));

        let mut buf = [0u8; 16];
        assert_eq!(rx.recv(&mut buf), Some(Ok(3)));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(rx.recv(&mut buf), Some(Ok(0)));
        assert_eq!(rx.recv(&mut buf), None);
    }

    #[test]
    fn oversized_blob_is_discarded_and_reported() {
        let (mut tx, mut rx) = blob_channel(128);
        assert!(tx.send(&[7; 20]));
        assert!(tx.send(&[8; 4]));

        let mut buf = [0u8; 8];
        assert_eq!(rx.recv(&mut buf), Some(Err(20)));
        // The following blob is still readable.
        assert_eq!(rx.recv(&mut buf), Some(Ok(4)));
        assert_eq!(&buf[..4], &[8; 4]);
    }

    #[test]
    fn producer_and_consumer_work_across_threads() {
        let (mut tx, mut rx) = control_channel(4096);
        let writer = std::thread::spawn(move || {
            for i in 0..200u32 {
                while !tx.send_float(i, i as f32) {
                    std::thread::yield_now();
                }
            }
        });

        let mut body = [0u8; 8];
        let mut seen = 0u32;
        while seen < 200 {
            match rx.recv(&mut body) {
                ControlRecv::Record(header) => {
                    assert_eq!(header.index, seen);
                    seen += 1;
                }
                ControlRecv::Empty => std::thread::yield_now(),
                ControlRecv::Malformed => panic!("malformed record"),
            }
        }
        writer.join().unwrap();
    }
}
