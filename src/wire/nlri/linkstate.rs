//! BGP-LS NLRI (RFC 7752) and the typed-but-opaque carriers for the sparse
//! SAFIs (mcast-vpn, mup). Descriptor TLVs are preserved verbatim and
//! re-encoded byte-identically.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde_json::json;

use crate::wire::family::{Family, Safi};
use crate::wire::{Reader, Truncated};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LinkStateNlri {
    pub nlri_type: u16,
    /// Protocol-ID, identifier and descriptor TLVs, verbatim
    pub payload: Vec<u8>,
}

impl LinkStateNlri {
    pub fn type_name(&self) -> &'static str {
        match self.nlri_type {
            1 => "node",
            2 => "link",
            3 => "ipv4-topology-prefix",
            4 => "ipv6-topology-prefix",
            _ => "unknown",
        }
    }

    pub fn read(reader: &mut Reader) -> Result<Self, Truncated> {
        let nlri_type = reader.u16()?;
        let length = usize::from(reader.u16()?);
        Ok(Self {
            nlri_type,
            payload: reader.take(length)?.to_vec(),
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.nlri_type);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    pub fn json(&self) -> serde_json::Value {
        json!({
            "code": self.nlri_type,
            "name": self.type_name(),
            "raw": hex::encode(&self.payload),
        })
    }
}

impl fmt::Display for LinkStateNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "bgp-ls:{}:{}",
            self.type_name(),
            hex::encode(&self.payload)
        )
    }
}

/// mcast-vpn and mup NLRIs: the length-bearing header is decoded so the
/// stream stays in sync, the value bytes stay opaque.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct OpaqueNlri {
    pub family: Family,
    /// Header bytes ahead of the length octet (route type, architecture)
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

impl OpaqueNlri {
    pub fn read(reader: &mut Reader, family: Family) -> Result<Self, Truncated> {
        let header = match family.safi {
            // route-type
            Safi::McastVpn => reader.take(1)?.to_vec(),
            // architecture-type + route-type
            Safi::Mup => reader.take(3)?.to_vec(),
            _ => Vec::new(),
        };
        let length = usize::from(reader.u8()?);
        Ok(Self {
            family,
            header,
            payload: reader.take(length)?.to_vec(),
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.header);
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
    }

    pub fn json(&self) -> serde_json::Value {
        json!({
            "family": self.family.to_string(),
            "header": hex::encode(&self.header),
            "raw": hex::encode(&self.payload),
        })
    }
}

impl fmt::Display for OpaqueNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}{}",
            self.family.safi,
            hex::encode(&self.header),
            hex::encode(&self.payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::family::Afi;

    #[test]
    fn test_linkstate_roundtrip() {
        let nlri = LinkStateNlri {
            nlri_type: 1,
            payload: vec![0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01],
        };
        let mut buf = BytesMut::new();
        nlri.write(&mut buf);
        let mut reader = Reader::new(&buf);
        assert_eq!(LinkStateNlri::read(&mut reader).unwrap(), nlri);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_opaque_mcast_vpn_roundtrip() {
        let family = Family::new(Afi::Ipv4, Safi::McastVpn);
        let nlri = OpaqueNlri {
            family,
            header: vec![5],
            payload: vec![1, 2, 3, 4],
        };
        let mut buf = BytesMut::new();
        nlri.write(&mut buf);
        assert_eq!(&buf[..], &[5, 4, 1, 2, 3, 4]);
        let mut reader = Reader::new(&buf);
        assert_eq!(OpaqueNlri::read(&mut reader, family).unwrap(), nlri);
    }
}
