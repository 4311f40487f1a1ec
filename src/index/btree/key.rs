use byteorder::{ByteOrder, LittleEndian};

/// Fixed-width key codec for B+tree pages.
///
/// Keys are stored inline in the node's pair array, so the encoded length
/// must be a compile-time constant. Comparison happens on the decoded
/// value, not the encoding.
pub trait KeyCodec: Copy + Ord + Default + std::fmt::Debug + Send + Sync + 'static {
    const ENCODED_LEN: usize;

    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Self;
}

impl KeyCodec for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(&mut buf[..8], *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(&buf[..8])
    }
}

impl KeyCodec for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[..4], *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(&buf[..4])
    }
}
