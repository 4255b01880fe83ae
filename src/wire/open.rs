use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use crate::wire::capability::Capability;
use crate::wire::{Notify, Reader};

const PARAM_AUTHENTICATION: u8 = 1;
const PARAM_CAPABILITIES: u8 = 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Open {
    pub version: u8,
    /// 2-byte field; AS_TRANS when the real ASN needs the ASN4 capability
    pub asn: u16,
    pub hold_time: u16,
    pub router_id: Ipv4Addr,
    pub capabilities: Vec<Capability>,
}

impl Open {
    pub fn new(asn: u16, hold_time: u16, router_id: Ipv4Addr, capabilities: Vec<Capability>) -> Self {
        Self {
            version: 4,
            asn,
            hold_time,
            router_id,
            capabilities,
        }
    }

    /// The 4-byte ASN from the capability, falling back to the 2-byte field
    pub fn asn4(&self) -> u32 {
        self.capabilities
            .iter()
            .find_map(|capability| match capability {
                Capability::Asn4(asn) => Some(*asn),
                _ => None,
            })
            .unwrap_or_else(|| u32::from(self.asn))
    }

    pub fn find(&self, code: u8) -> Option<&Capability> {
        self.capabilities
            .iter()
            .find(|capability| capability.code() == code)
    }

    pub fn multiprotocol_families(&self) -> Vec<crate::wire::Family> {
        self.capabilities
            .iter()
            .filter_map(|capability| match capability {
                Capability::Multiprotocol(family) => Some(*family),
                _ => None,
            })
            .collect()
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut params = BytesMut::new();
        if !self.capabilities.is_empty() {
            let mut caps = BytesMut::new();
            for capability in &self.capabilities {
                capability.write(&mut caps);
            }
            params.put_u8(PARAM_CAPABILITIES);
            params.put_u8(caps.len() as u8);
            params.put_slice(&caps);
        }

        let mut buf = BytesMut::with_capacity(10 + params.len());
        buf.put_u8(self.version);
        buf.put_u16(self.asn);
        buf.put_u16(self.hold_time);
        buf.put_slice(&self.router_id.octets());
        buf.put_u8(params.len() as u8);
        buf.put_slice(&params);
        buf.to_vec()
    }

    pub fn unpack(payload: &[u8]) -> Result<Self, Notify> {
        let mut reader = Reader::new(payload);
        let version = reader.u8().map_err(|_| Notify::new(2, 1))?;
        if version != 4 {
            // include the version we do support
            return Err(Notify::with_data(2, 1, vec![0, 4]));
        }
        let asn = reader.u16().map_err(|_| Notify::new(2, 2))?;
        let hold_time = reader.u16().map_err(|_| Notify::new(2, 6))?;
        if hold_time != 0 && hold_time < 3 {
            return Err(Notify::with_data(2, 6, hold_time.to_be_bytes().to_vec()));
        }
        let id = reader.take(4).map_err(|_| Notify::new(2, 3))?;
        let router_id = Ipv4Addr::new(id[0], id[1], id[2], id[3]);
        let params_len = usize::from(reader.u8().map_err(|_| Notify::new(2, 4))?);
        let params = reader.take(params_len).map_err(|_| Notify::new(2, 4))?;

        let mut capabilities = Vec::with_capacity(8);
        let mut outer = Reader::new(params);
        while !outer.is_empty() {
            let param_type = outer.u8().map_err(|_| Notify::new(2, 4))?;
            let param_len = usize::from(outer.u8().map_err(|_| Notify::new(2, 4))?);
            let value = outer.take(param_len).map_err(|_| Notify::new(2, 4))?;
            match param_type {
                // deprecated; RFC 5492 forbids it
                PARAM_AUTHENTICATION => return Err(Notify::new(2, 5)),
                PARAM_CAPABILITIES => {
                    let mut inner = Reader::new(value);
                    while !inner.is_empty() {
                        capabilities.push(Capability::read(&mut inner)?);
                    }
                }
                _ => return Err(Notify::with_data(2, 4, vec![param_type])),
            }
        }

        Ok(Self {
            version,
            asn,
            hold_time,
            router_id,
            capabilities,
        })
    }
}

impl fmt::Display for Open {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Open asn={} hold-time={} router-id={} capabilities={}>",
            self.asn4(),
            self.hold_time,
            self.router_id,
            self.capabilities.len()
        )
    }
}

/// The ASN value for the 2-byte OPEN field (RFC 6793 §4.2.3)
pub fn two_byte_asn(asn: u32) -> u16 {
    if asn > u32::from(u16::MAX) {
        crate::wire::attribute::AS_TRANS as u16
    } else {
        asn as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::family::Family;

    fn sample() -> Open {
        Open::new(
            65000,
            90,
            Ipv4Addr::new(1, 1, 1, 1),
            vec![
                Capability::Multiprotocol(Family::IPV4_UNICAST),
                Capability::Asn4(65000),
                Capability::RouteRefresh,
            ],
        )
    }

    #[test]
    fn test_roundtrip() {
        let open = sample();
        let decoded = Open::unpack(&open.pack()).unwrap();
        assert_eq!(decoded, open);
        assert_eq!(decoded.asn4(), 65000);
    }

    #[test]
    fn test_bad_version() {
        let mut payload = sample().pack();
        payload[0] = 3;
        let err = Open::unpack(&payload).unwrap_err();
        assert_eq!((err.code, err.subcode), (2, 1));
        assert_eq!(err.data, vec![0, 4]);
    }

    #[test]
    fn test_bad_hold_time() {
        let mut payload = sample().pack();
        payload[3] = 0;
        payload[4] = 2;
        let err = Open::unpack(&payload).unwrap_err();
        assert_eq!((err.code, err.subcode), (2, 6));
    }

    #[test]
    fn test_authentication_parameter_rejected() {
        let open = Open::new(65000, 90, Ipv4Addr::new(1, 1, 1, 1), vec![]);
        let mut payload = open.pack();
        // append an authentication-info TLV
        payload.extend_from_slice(&[PARAM_AUTHENTICATION, 1, 0]);
        let idx = 9;
        payload[idx] = 3;
        let err = Open::unpack(&payload).unwrap_err();
        assert_eq!((err.code, err.subcode), (2, 5));
    }

    #[test]
    fn test_as_trans_in_two_byte_field() {
        assert_eq!(two_byte_asn(65000), 65000);
        assert_eq!(two_byte_asn(4_200_000_001), 23456);
    }
}
