use crate::error::PaddingError;

/// Number of frames, per direction, that carry padding before a padded
/// stream falls back to raw pass-through. Chosen to cover the handshake and
/// the first few response packets of a typical TLS/HTTP exchange without
/// taxing long-lived bulk transfers.
pub const DEFAULT_MAX_PADDED_FRAMES: u8 = 8;

const HEADER_LEN: usize = 3;

/// Write-side half of the padding codec: wraps outgoing payloads in the
/// three-byte `len(u16 BE) | pad_len(u8)` header followed by the payload and
/// `pad_len` bytes of random padding, for the first `max_frames` calls, then
/// passes bytes through unchanged.
#[derive(Debug)]
pub struct PaddingWriteState {
    frames_written: u8,
    max_frames: u8,
}

impl PaddingWriteState {
    pub fn new() -> Self {
        Self::with_max_frames(DEFAULT_MAX_PADDED_FRAMES)
    }

    pub fn with_max_frames(max_frames: u8) -> Self {
        Self {
            frames_written: 0,
            max_frames,
        }
    }

    pub fn is_padding(&self) -> bool {
        self.frames_written < self.max_frames
    }

    /// Wraps `payload` for the wire. `payload` must be non-empty and at most
    /// 65535 bytes, the limits the three-byte header can express.
    pub fn wrap(&mut self, payload: &[u8]) -> Result<Vec<u8>, PaddingError> {
        if payload.is_empty() {
            return Err(PaddingError::ZeroLengthPayload);
        }
        if payload.len() > u16::MAX as usize {
            return Err(PaddingError::PayloadTooLarge(payload.len()));
        }

        if !self.is_padding() {
            return Ok(payload.to_vec());
        }

        let pad_len = fastrand::u8(..);
        let mut framed = Vec::with_capacity(HEADER_LEN + payload.len() + pad_len as usize);
        framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        framed.push(pad_len);
        framed.extend_from_slice(payload);
        framed.extend(std::iter::repeat_with(|| fastrand::u8(..)).take(pad_len as usize));

        self.frames_written += 1;
        Ok(framed)
    }
}

impl Default for PaddingWriteState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum ReadMode {
    Len1,
    Len2 { len_hi: u8 },
    PadLen { payload_len: u16 },
    Payload { payload_len: u16, pad_len: u8, buf: Vec<u8> },
    Pad { buf: Vec<u8>, remaining: u8 },
    PassThrough,
}

/// Read-side half of the padding codec: parses the same three-byte-header
/// framing back out of a byte stream, strips the padding, and emits the
/// original payload bytes. Switches to pass-through once `max_frames` full
/// frames have been decoded.
#[derive(Debug)]
pub struct PaddingReadState {
    frames_read: u8,
    max_frames: u8,
    mode: ReadMode,
}

impl PaddingReadState {
    pub fn new() -> Self {
        Self::with_max_frames(DEFAULT_MAX_PADDED_FRAMES)
    }

    pub fn with_max_frames(max_frames: u8) -> Self {
        Self {
            frames_read: 0,
            max_frames,
            mode: ReadMode::Len1,
        }
    }

    pub fn is_padding(&self) -> bool {
        !matches!(self.mode, ReadMode::PassThrough)
    }

    /// Feeds a chunk read from the wire. Returns the payload bytes decoded
    /// so far; an empty result means the chunk only completed a partial
    /// frame and the caller should read more before there is anything to
    /// deliver upstream.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<u8>, PaddingError> {
        if let ReadMode::PassThrough = self.mode {
            return Ok(chunk.to_vec());
        }

        let mut out = Vec::new();
        let mut cursor = 0usize;

        while cursor < chunk.len() {
            match &mut self.mode {
                ReadMode::Len1 => {
                    self.mode = ReadMode::Len2 {
                        len_hi: chunk[cursor],
                    };
                    cursor += 1;
                }
                ReadMode::Len2 { len_hi } => {
                    let payload_len = u16::from_be_bytes([*len_hi, chunk[cursor]]);
                    cursor += 1;
                    if payload_len == 0 {
                        return Err(PaddingError::ZeroLengthPayload);
                    }
                    self.mode = ReadMode::PadLen { payload_len };
                }
                ReadMode::PadLen { payload_len } => {
                    let payload_len = *payload_len;
                    let pad_len = chunk[cursor];
                    cursor += 1;
                    self.mode = ReadMode::Payload {
                        payload_len,
                        pad_len,
                        buf: Vec::with_capacity(payload_len as usize),
                    };
                }
                ReadMode::Payload {
                    payload_len,
                    pad_len,
                    buf,
                } => {
                    let want = *payload_len as usize - buf.len();
                    let take = want.min(chunk.len() - cursor);
                    buf.extend_from_slice(&chunk[cursor..cursor + take]);
                    cursor += take;

                    if buf.len() == *payload_len as usize {
                        let pad_len = *pad_len;
                        let buf = std::mem::take(buf);
                        if pad_len == 0 {
                            self.complete_frame(buf, &mut out);
                        } else {
                            self.mode = ReadMode::Pad {
                                buf,
                                remaining: pad_len,
                            };
                        }
                    }
                }
                ReadMode::Pad { buf, remaining } => {
                    let take = (*remaining as usize).min(chunk.len() - cursor);
                    cursor += take;
                    *remaining -= take as u8;

                    if *remaining == 0 {
                        let buf = std::mem::take(buf);
                        self.complete_frame(buf, &mut out);
                    }
                }
                ReadMode::PassThrough => {
                    out.extend_from_slice(&chunk[cursor..]);
                    cursor = chunk.len();
                }
            }
        }

        Ok(out)
    }

    fn complete_frame(&mut self, payload: Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(&payload);
        self.frames_read += 1;
        self.mode = if self.frames_read >= self.max_frames {
            ReadMode::PassThrough
        } else {
            ReadMode::Len1
        };
    }
}

impl Default for PaddingReadState {
    fn default() -> Self {
        Self::new()
    }
}

/// A whole padded connection leg: read and write halves, independently
/// tracking how many padded frames have passed in each direction.
#[derive(Debug, Default)]
pub struct PaddingCodec {
    pub write: PaddingWriteState,
    pub read: PaddingReadState,
}

impl PaddingCodec {
    pub fn new() -> Self {
        Self {
            write: PaddingWriteState::new(),
            read: PaddingReadState::new(),
        }
    }

    pub fn with_max_frames(max_frames: u8) -> Self {
        Self {
            write: PaddingWriteState::with_max_frames(max_frames),
            read: PaddingReadState::with_max_frames(max_frames),
        }
    }

    /// Splits into independently-borrowable halves so the two pump futures
    /// of the connection orchestrator can each hold a disjoint `&mut`
    /// without a lock.
    pub fn split_mut(&mut self) -> (&mut PaddingWriteState, &mut PaddingReadState) {
        (&mut self.write, &mut self.read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_and_unwraps_a_single_frame() {
        let mut write = PaddingWriteState::new();
        let mut read = PaddingReadState::new();

        let framed = write.wrap(b"hello").unwrap();
        assert!(framed.len() >= HEADER_LEN + 5);

        let decoded = read.feed(&framed).unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn switches_to_pass_through_after_max_frames() {
        let mut write = PaddingWriteState::with_max_frames(2);
        let mut read = PaddingReadState::with_max_frames(2);

        let mut stream = Vec::new();
        for _ in 0..2 {
            stream.extend(write.wrap(b"x").unwrap());
        }
        assert!(!write.is_padding());

        // A third write is no longer framed.
        let raw = write.wrap(b"unframed").unwrap();
        assert_eq!(raw, b"unframed");

        let decoded = read.feed(&stream).unwrap();
        assert_eq!(decoded, b"xx");
        assert!(read.is_padding());

        // Feeding raw bytes once pass-through kicks in returns them as-is.
        let passthrough = read.feed(b"xx").unwrap();
        assert_eq!(passthrough, b"xx");
        assert!(!read.is_padding());
    }

    #[test]
    fn rejects_zero_length_payload() {
        let mut write = PaddingWriteState::new();
        assert!(matches!(
            write.wrap(b""),
            Err(PaddingError::ZeroLengthPayload)
        ));
    }

    #[test]
    fn decodes_a_frame_split_across_many_small_chunks() {
        let mut write = PaddingWriteState::with_max_frames(1);
        let mut read = PaddingReadState::with_max_frames(1);

        let framed = write.wrap(b"split me").unwrap();
        let mut decoded = Vec::new();
        for byte in &framed {
            decoded.extend(read.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(decoded, b"split me");
    }

    #[test]
    fn decodes_multiple_frames_delivered_in_one_chunk() {
        let mut write = PaddingWriteState::with_max_frames(4);
        let mut read = PaddingReadState::with_max_frames(4);

        let mut stream = Vec::new();
        stream.extend(write.wrap(b"one").unwrap());
        stream.extend(write.wrap(b"two").unwrap());

        let decoded = read.feed(&stream).unwrap();
        assert_eq!(decoded, b"onetwo");
    }
}
