//! OPERATIONAL messages (draft-ietf-idr-operational-message): advisories a
//! peer can send without affecting routing. Only exchanged when both OPENs
//! carried the operational capability.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use crate::wire::family::Family;
use crate::wire::{Notify, Reader};

pub const ADM: u16 = 0x01;
pub const ASM: u16 = 0x02;
pub const RPCQ: u16 = 0x03;
pub const RPCP: u16 = 0x04;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operational {
    /// Advisory Demand Message: free-form text, deliver to the operator
    Adm { family: Family, advisory: String },
    /// Advisory Static Message: text that should be retained
    Asm { family: Family, advisory: String },
    /// Reachable prefix count query/reply
    Query {
        what: u16,
        family: Family,
        router_id: Ipv4Addr,
        sequence: u32,
    },
    Counter {
        what: u16,
        family: Family,
        router_id: Ipv4Addr,
        sequence: u32,
        counter: u32,
    },
    /// Unrecognized subtype, held opaque
    Unknown { what: u16, payload: Vec<u8> },
}

impl Operational {
    pub fn what(&self) -> u16 {
        match self {
            Operational::Adm { .. } => ADM,
            Operational::Asm { .. } => ASM,
            Operational::Query { what, .. } | Operational::Counter { what, .. } => *what,
            Operational::Unknown { what, .. } => *what,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Operational::Adm { .. } | Operational::Asm { .. } => "advisory",
            Operational::Query { .. } => "query",
            Operational::Counter { .. } => "counter",
            Operational::Unknown { .. } => "unknown",
        }
    }

    pub fn name(&self) -> &'static str {
        match self.what() {
            ADM => "ADM",
            ASM => "ASM",
            RPCQ => "RPCQ",
            RPCP => "RPCP",
            _ => "UNKNOWN",
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut body = BytesMut::new();
        match self {
            Operational::Adm { family, advisory } | Operational::Asm { family, advisory } => {
                body.put_u16(family.afi.code());
                body.put_u8(family.safi.code());
                body.put_slice(advisory.as_bytes());
            }
            Operational::Query {
                family,
                router_id,
                sequence,
                ..
            } => {
                body.put_u16(family.afi.code());
                body.put_u8(family.safi.code());
                body.put_slice(&router_id.octets());
                body.put_u32(*sequence);
            }
            Operational::Counter {
                family,
                router_id,
                sequence,
                counter,
                ..
            } => {
                body.put_u16(family.afi.code());
                body.put_u8(family.safi.code());
                body.put_slice(&router_id.octets());
                body.put_u32(*sequence);
                body.put_u32(*counter);
            }
            Operational::Unknown { payload, .. } => body.put_slice(payload),
        }

        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u16(self.what());
        buf.put_u16(body.len() as u16);
        buf.put_slice(&body);
        buf.to_vec()
    }

    pub fn unpack(payload: &[u8]) -> Result<Self, Notify> {
        let mut reader = Reader::new(payload);
        let what = reader.u16().map_err(|_| Notify::new(1, 2))?;
        let length = usize::from(reader.u16().map_err(|_| Notify::new(1, 2))?);
        let body = reader.take(length).map_err(|_| Notify::new(1, 2))?;
        let mut inner = Reader::new(body);

        match what {
            ADM | ASM => {
                let afi = inner.u16().map_err(|_| Notify::new(1, 2))?;
                let safi = inner.u8().map_err(|_| Notify::new(1, 2))?;
                let family =
                    Family::from_codes(afi, safi).ok_or_else(|| Notify::new(1, 2))?;
                let advisory = String::from_utf8_lossy(inner.rest()).to_string();
                if what == ADM {
                    Ok(Operational::Adm { family, advisory })
                } else {
                    Ok(Operational::Asm { family, advisory })
                }
            }
            RPCQ => {
                let afi = inner.u16().map_err(|_| Notify::new(1, 2))?;
                let safi = inner.u8().map_err(|_| Notify::new(1, 2))?;
                let family =
                    Family::from_codes(afi, safi).ok_or_else(|| Notify::new(1, 2))?;
                let id = inner.take(4).map_err(|_| Notify::new(1, 2))?;
                let sequence = inner.u32().map_err(|_| Notify::new(1, 2))?;
                Ok(Operational::Query {
                    what,
                    family,
                    router_id: Ipv4Addr::new(id[0], id[1], id[2], id[3]),
                    sequence,
                })
            }
            RPCP => {
                let afi = inner.u16().map_err(|_| Notify::new(1, 2))?;
                let safi = inner.u8().map_err(|_| Notify::new(1, 2))?;
                let family =
                    Family::from_codes(afi, safi).ok_or_else(|| Notify::new(1, 2))?;
                let id = inner.take(4).map_err(|_| Notify::new(1, 2))?;
                let sequence = inner.u32().map_err(|_| Notify::new(1, 2))?;
                let counter = inner.u32().map_err(|_| Notify::new(1, 2))?;
                Ok(Operational::Counter {
                    what,
                    family,
                    router_id: Ipv4Addr::new(id[0], id[1], id[2], id[3]),
                    sequence,
                    counter,
                })
            }
            _ => Ok(Operational::Unknown {
                what,
                payload: body.to_vec(),
            }),
        }
    }
}

impl fmt::Display for Operational {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "operational {}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adm_roundtrip() {
        let operational = Operational::Adm {
            family: Family::IPV4_UNICAST,
            advisory: "maintenance at 02:00".to_string(),
        };
        let decoded = Operational::unpack(&operational.pack()).unwrap();
        assert_eq!(decoded, operational);
        assert_eq!(decoded.category(), "advisory");
    }

    #[test]
    fn test_counter_roundtrip() {
        let operational = Operational::Counter {
            what: RPCP,
            family: Family::IPV4_UNICAST,
            router_id: Ipv4Addr::new(1, 1, 1, 1),
            sequence: 7,
            counter: 1000,
        };
        assert_eq!(Operational::unpack(&operational.pack()).unwrap(), operational);
    }

    #[test]
    fn test_unknown_kept_opaque() {
        let operational = Operational::Unknown {
            what: 0x0a,
            payload: vec![1, 2, 3],
        };
        assert_eq!(Operational::unpack(&operational.pack()).unwrap(), operational);
    }
}
