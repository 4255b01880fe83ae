use std::fmt;
use std::io::Error;
use std::sync::{Arc, RwLock};

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use twoway::find_bytes;

use crate::wire::{self, CodecContext, Message, Notify};

pub type MessageProtocol = Framed<TcpStream, MessageCodec>;

#[derive(Debug)]
pub enum CodecError {
    Io(Error),
    Notify(Notify),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::Io(err) => write!(f, "{}", err),
            CodecError::Notify(notify) => write!(f, "{}", notify),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<Error> for CodecError {
    fn from(error: Error) -> Self {
        CodecError::Io(error)
    }
}

/// A decoded message plus its raw header/body bytes, kept around for
/// packet-level API subscribers.
#[derive(Debug)]
pub struct ReceivedMessage {
    pub message: Message,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

/// Frame-at-a-time BGP codec. The shared context starts at the defaults
/// and is written exactly once, when the OPEN exchange completes; from then
/// on every pack/unpack sees the negotiated AddPath/ASN4/message-size state.
pub struct MessageCodec {
    ctx: Arc<RwLock<CodecContext>>,
    registry: wire::nlri::Registry,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            ctx: Arc::new(RwLock::new(CodecContext::default())),
            registry: wire::nlri::Registry::default(),
        }
    }

    /// Handle shared with the session, used to install the negotiated
    /// context during OpenConfirm.
    pub fn context(&self) -> Arc<RwLock<CodecContext>> {
        Arc::clone(&self.ctx)
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = ReceivedMessage;
    type Error = CodecError;

    // Look for one full BGP message (marker + length); partial reads leave
    // the buffer untouched and yield None so the reactor never blocks here.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, CodecError> {
        let start = match find_bytes(buf, &wire::MARKER) {
            Some(start) => start,
            None => return Ok(None),
        };
        if buf.len() < start + wire::HEADER_LEN as usize {
            return Ok(None);
        }
        let ctx = self.ctx.read().expect("codec context lock").clone();
        let (length, kind) =
            wire::check_header(&buf[start..], &ctx).map_err(CodecError::Notify)?;
        if buf.len() < start + length as usize {
            return Ok(None);
        }
        buf.advance(start);
        let frame = buf.split_to(length as usize);
        let header = frame[..wire::HEADER_LEN as usize].to_vec();
        let body = frame[wire::HEADER_LEN as usize..].to_vec();
        let message =
            wire::unpack(kind, &body, &ctx, &self.registry).map_err(CodecError::Notify)?;
        Ok(Some(ReceivedMessage {
            message,
            header,
            body,
        }))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), CodecError> {
        let ctx = self.ctx.read().expect("codec context lock").clone();
        buf.extend_from_slice(&wire::pack(&message, &ctx));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keepalive() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        let received = codec.decode(&mut buf).unwrap().unwrap();
        match received.message {
            Message::KeepAlive => (),
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(received.header.len(), 19);
        assert!(received.body.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_read_yields_none() {
        let mut codec = MessageCodec::new();
        let mut full = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut full).unwrap();
        let mut partial = BytesMut::from(&full[..10]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        // bytes stay buffered until the rest arrives
        assert_eq!(partial.len(), 10);
    }

    #[test]
    fn test_no_marker_yields_none() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0u8, 1, 2, 3][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_two_messages_in_one_buffer() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversize_frame_raises_notify() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::KeepAlive, &mut buf).unwrap();
        buf[16] = 0xff;
        buf[17] = 0xff;
        match codec.decode(&mut buf) {
            Err(CodecError::Notify(notify)) => {
                assert_eq!((notify.code, notify.subcode), (1, 2));
            }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }
}
