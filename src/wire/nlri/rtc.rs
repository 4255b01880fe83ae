//! Route-target constraint NLRI (RFC 4684): origin AS plus a prefix of a
//! route-target extended community. The zero-length default NLRI asks for
//! everything.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde_json::json;

use crate::wire::{Reader, Truncated};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RtcNlri {
    /// None is the default route (match all route targets)
    pub origin_as: Option<u32>,
    /// 0..=64 bits of route-target, packed
    pub target: Vec<u8>,
    pub mask: u8,
}

impl RtcNlri {
    pub fn default_route() -> Self {
        Self {
            origin_as: None,
            target: Vec::new(),
            mask: 0,
        }
    }

    pub fn new(origin_as: u32, target: Vec<u8>) -> Self {
        let mask = 32 + (target.len() * 8) as u8;
        Self {
            origin_as: Some(origin_as),
            target,
            mask,
        }
    }

    pub fn read(reader: &mut Reader) -> Result<Self, Truncated> {
        let mask = reader.u8()?;
        if mask == 0 {
            return Ok(Self::default_route());
        }
        if !(32..=96).contains(&mask) {
            return Err(Truncated);
        }
        let origin_as = reader.u32()?;
        let target = reader.take(((usize::from(mask) - 32) + 7) / 8)?.to_vec();
        Ok(Self {
            origin_as: Some(origin_as),
            target,
            mask,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.mask);
        if let Some(origin_as) = self.origin_as {
            buf.put_u32(origin_as);
            buf.put_slice(&self.target);
        }
    }

    pub fn json(&self) -> serde_json::Value {
        match self.origin_as {
            None => json!({ "rtc": "all" }),
            Some(asn) => json!({
                "origin-as": asn,
                "route-target": hex::encode(&self.target),
                "length": self.mask,
            }),
        }
    }
}

impl fmt::Display for RtcNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.origin_as {
            None => write!(f, "rtc:all"),
            Some(asn) => write!(f, "rtc:{}:{}/{}", asn, hex::encode(&self.target), self.mask),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_route() {
        let mut buf = BytesMut::new();
        RtcNlri::default_route().write(&mut buf);
        assert_eq!(&buf[..], &[0]);
        let mut reader = Reader::new(&buf);
        assert_eq!(
            RtcNlri::read(&mut reader).unwrap(),
            RtcNlri::default_route()
        );
    }

    #[test]
    fn test_roundtrip() {
        let nlri = RtcNlri::new(65000, vec![0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x64]);
        assert_eq!(nlri.mask, 96);
        let mut buf = BytesMut::new();
        nlri.write(&mut buf);
        let mut reader = Reader::new(&buf);
        assert_eq!(RtcNlri::read(&mut reader).unwrap(), nlri);
        assert!(reader.is_empty());
    }
}
