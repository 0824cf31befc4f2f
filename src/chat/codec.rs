/// Line framing for the chat wire: splits the inbound byte stream on `\n`
/// boundaries and serializes outgoing JSON compactly with a trailing `\n`.
///
/// The decoder yields raw line bytes, not parsed JSON: a `Framed` stream
/// terminates after any decoder error, so per-frame recovery from bad JSON
/// has to happen above the codec, where the frame has already been yielded.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::Outgoing;

/// Hard cap on a single buffered line (delimiter included). The desktop
/// client sends frames of a few hundred bytes; anything near this cap is a
/// runaway or hostile peer.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Codec error. All of these are fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames chat messages on `\n` boundaries.
#[derive(Debug, Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = BytesMut;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                // The whole over-cap line can land in one read chunk,
                // delimiter included; the cap applies here too.
                if pos + 1 > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                // Extract the line (without \n), advance the buffer.
                let line = src.split_to(pos);
                src.advance(1); // skip \n
                Ok(Some(line))
            }
            None => {
                // No complete line yet. Check if buffer is getting too large.
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Outgoing> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Outgoing, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
