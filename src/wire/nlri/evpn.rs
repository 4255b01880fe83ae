//! EVPN NLRI (RFC 7432). The route-type header and route distinguisher are
//! decoded; the type-specific tail is preserved verbatim so every route type
//! (including ones newer than this daemon) re-encodes byte-identically.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde_json::json;

use crate::wire::nlri::label::RouteDistinguisher;
use crate::wire::{Reader, Truncated};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EvpnNlri {
    pub route_type: u8,
    pub rd: RouteDistinguisher,
    /// Route-type specific bytes following the RD
    pub payload: Vec<u8>,
}

impl EvpnNlri {
    pub fn route_type_name(&self) -> &'static str {
        match self.route_type {
            1 => "ethernet-ad",
            2 => "mac-advertisement",
            3 => "inclusive-multicast",
            4 => "ethernet-segment",
            5 => "ip-prefix",
            _ => "unknown",
        }
    }

    pub fn read(reader: &mut Reader) -> Result<Self, Truncated> {
        let route_type = reader.u8()?;
        let length = usize::from(reader.u8()?);
        if length < 8 {
            return Err(Truncated);
        }
        let body = reader.take(length)?;
        let mut inner = Reader::new(body);
        let rd = RouteDistinguisher::read(&mut inner)?;
        Ok(Self {
            route_type,
            rd,
            payload: inner.rest().to_vec(),
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.route_type);
        buf.put_u8((8 + self.payload.len()) as u8);
        self.rd.write(buf);
        buf.put_slice(&self.payload);
    }

    pub fn json(&self) -> serde_json::Value {
        json!({
            "code": self.route_type,
            "name": self.route_type_name(),
            "rd": self.rd.to_string(),
            "raw": hex::encode(&self.payload),
        })
    }
}

impl fmt::Display for EvpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "evpn:{}:{}:{}",
            self.route_type_name(),
            self.rd,
            hex::encode(&self.payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let nlri = EvpnNlri {
            route_type: 3,
            rd: "65000:2".parse().unwrap(),
            payload: vec![0x20, 0x0a, 0x00, 0x00, 0x01],
        };
        let mut buf = BytesMut::new();
        nlri.write(&mut buf);
        assert_eq!(buf[0], 3);
        assert_eq!(buf[1], 13);
        let mut reader = Reader::new(&buf);
        let decoded = EvpnNlri::read(&mut reader).unwrap();
        assert_eq!(decoded, nlri);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_short_body_rejected() {
        let mut reader = Reader::new(&[2, 4, 0, 0, 0, 0]);
        assert!(EvpnNlri::read(&mut reader).is_err());
    }
}
