//! BGP-4 message codec: `pack`/`unpack` for every message type, path
//! attribute, and NLRI family this daemon speaks.
//!
//! Decoding errors surface as [`Notify`] values carrying the RFC-assigned
//! (code, subcode) so the session layer can put them on the wire before
//! tearing the connection down.

pub mod attribute;
pub mod capability;
mod error;
pub mod family;
pub mod nlri;
pub mod notification;
pub mod open;
pub mod operational;
mod reader;
pub mod refresh;
pub mod update;

pub use attribute::{Attribute, AttributeCollection, Origin};
pub use error::Notify;
pub use family::{Afi, Family, Safi};
pub use nlri::Nlri;
pub use notification::Notification;
pub use open::Open;
pub use operational::Operational;
pub use refresh::RouteRefresh;
pub use update::Update;

pub(crate) use reader::{Reader, Truncated};

use std::collections::HashSet;

use bytes::{BufMut, BytesMut};

pub const MARKER: [u8; 16] = [0xff; 16];
pub const HEADER_LEN: u16 = 19;
pub const MAX_MESSAGE: u16 = 4096;
pub const MAX_EXTENDED_MESSAGE: u16 = 65535;

/// The slice of negotiated session state the codec consults on every
/// pack/unpack. Built from `session::Negotiated` once the OPENs have been
/// exchanged; before that, `CodecContext::default()` applies (no AddPath,
/// 2-byte AS_PATH encoding, 4096-byte messages).
#[derive(Clone, Debug)]
pub struct CodecContext {
    pub asn4: bool,
    pub local_asn: u32,
    pub peer_asn: u32,
    pub max_message_size: u16,
    pub addpath_send: HashSet<Family>,
    pub addpath_receive: HashSet<Family>,
}

impl Default for CodecContext {
    fn default() -> Self {
        Self {
            asn4: false,
            local_asn: 0,
            peer_asn: 0,
            max_message_size: MAX_MESSAGE,
            addpath_send: HashSet::new(),
            addpath_receive: HashSet::new(),
        }
    }
}

impl CodecContext {
    pub fn is_ebgp(&self) -> bool {
        self.local_asn != self.peer_asn
    }

    /// Do we prepend a path-id when packing NLRI of this family?
    pub fn sends_addpath(&self, family: Family) -> bool {
        self.addpath_send.contains(&family)
    }

    /// Do we expect a path-id when unpacking NLRI of this family?
    pub fn receives_addpath(&self, family: Family) -> bool {
        self.addpath_receive.contains(&family)
    }
}

#[derive(Clone, Debug)]
pub enum Message {
    Open(Open),
    Update(Update),
    Notification(Notification),
    KeepAlive,
    RouteRefresh(RouteRefresh),
    Operational(Operational),
}

impl Message {
    pub fn kind(&self) -> u8 {
        match self {
            Message::Open(_) => 1,
            Message::Update(_) => 2,
            Message::Notification(_) => 3,
            Message::KeepAlive => 4,
            Message::RouteRefresh(_) => 5,
            Message::Operational(_) => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Message::Open(_) => "OPEN",
            Message::Update(_) => "UPDATE",
            Message::Notification(_) => "NOTIFICATION",
            Message::KeepAlive => "KEEPALIVE",
            Message::RouteRefresh(_) => "ROUTEREFRESH",
            Message::Operational(_) => "OPERATIONAL",
        }
    }
}

/// Serialize a message with the 19-byte header.
pub fn pack(message: &Message, ctx: &CodecContext) -> BytesMut {
    let payload = match message {
        Message::Open(open) => open.pack(),
        Message::Update(update) => update.pack(ctx),
        Message::Notification(notification) => notification.pack(),
        Message::KeepAlive => Vec::new(),
        Message::RouteRefresh(refresh) => refresh.pack(),
        Message::Operational(operational) => operational.pack(),
    };
    let mut buf = BytesMut::with_capacity(HEADER_LEN as usize + payload.len());
    buf.put_slice(&MARKER);
    buf.put_u16(HEADER_LEN + payload.len() as u16);
    buf.put_u8(message.kind());
    buf.put_slice(&payload);
    buf
}

/// Deserialize a message payload (header already validated and stripped).
pub fn unpack(
    kind: u8,
    payload: &[u8],
    ctx: &CodecContext,
    registry: &nlri::Registry,
) -> Result<Message, Notify> {
    match kind {
        1 => Open::unpack(payload).map(Message::Open),
        2 => Update::unpack(payload, ctx, registry).map(Message::Update),
        3 => Notification::unpack(payload).map(Message::Notification),
        4 => {
            if payload.is_empty() {
                Ok(Message::KeepAlive)
            } else {
                // KEEPALIVE must be exactly 19 bytes
                Err(Notify::with_data(
                    1,
                    2,
                    (HEADER_LEN + payload.len() as u16).to_be_bytes().to_vec(),
                ))
            }
        }
        5 => RouteRefresh::unpack(payload).map(Message::RouteRefresh),
        6 => Operational::unpack(payload).map(Message::Operational),
        _ => Err(Notify::with_data(1, 3, vec![kind])),
    }
}

/// Validate a message header: marker, length bounds, known type.
/// Returns (length, type) on success.
pub fn check_header(header: &[u8], ctx: &CodecContext) -> Result<(u16, u8), Notify> {
    if header.len() < HEADER_LEN as usize {
        return Err(Notify::new(1, 2));
    }
    if header[..16] != MARKER {
        return Err(Notify::new(1, 1));
    }
    let length = u16::from_be_bytes([header[16], header[17]]);
    if length < HEADER_LEN || length > ctx.max_message_size {
        return Err(Notify::with_data(1, 2, length.to_be_bytes().to_vec()));
    }
    Ok((length, header[18]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_roundtrip() {
        let ctx = CodecContext::default();
        let buf = pack(&Message::KeepAlive, &ctx);
        assert_eq!(buf.len(), 19);
        let (length, kind) = check_header(&buf, &ctx).unwrap();
        assert_eq!((length, kind), (19, 4));
        let registry = nlri::Registry::default();
        match unpack(4, &buf[19..], &ctx, &registry).unwrap() {
            Message::KeepAlive => (),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_marker() {
        let ctx = CodecContext::default();
        let mut buf = pack(&Message::KeepAlive, &ctx);
        buf[3] = 0x00;
        assert_eq!(check_header(&buf, &ctx).unwrap_err(), Notify::new(1, 1));
    }

    #[test]
    fn test_bad_length() {
        let ctx = CodecContext::default();
        let mut buf = pack(&Message::KeepAlive, &ctx);
        buf[16] = 0xff;
        buf[17] = 0xff;
        let err = check_header(&buf, &ctx).unwrap_err();
        assert_eq!(err.code, 1);
        assert_eq!(err.subcode, 2);
        // the offending length travels in the notification data
        assert_eq!(err.data, vec![0xff, 0xff]);
    }

    #[test]
    fn test_extended_message_ceiling() {
        let mut ctx = CodecContext::default();
        ctx.max_message_size = MAX_EXTENDED_MESSAGE;
        let mut buf = pack(&Message::KeepAlive, &ctx);
        buf[16] = 0x20;
        buf[17] = 0x00;
        assert!(check_header(&buf, &ctx).is_ok());
    }
}
