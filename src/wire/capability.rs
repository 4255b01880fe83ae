//! OPEN capabilities (RFC 5492 and friends). Unknown capabilities are
//! preserved as opaque bytes and echoed back on re-encode.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::wire::family::Family;
use crate::wire::{Notify, Reader};

pub const MULTIPROTOCOL: u8 = 1;
pub const ROUTE_REFRESH: u8 = 2;
pub const EXTENDED_NEXTHOP: u8 = 5;
pub const EXTENDED_MESSAGE: u8 = 6;
pub const GRACEFUL_RESTART: u8 = 64;
pub const ASN4: u8 = 65;
pub const ADD_PATH: u8 = 69;
pub const ENHANCED_ROUTE_REFRESH: u8 = 70;
pub const HOSTNAME: u8 = 73;
pub const CISCO_ROUTE_REFRESH: u8 = 128;
pub const OPERATIONAL: u8 = 0xb9;

/// Restart flag bit in the graceful-restart capability header
pub const GR_RESTART_FLAG: u8 = 0x08;
/// Forwarding-state-preserved bit in a per-family graceful-restart entry
pub const GR_FORWARDING_FLAG: u8 = 0x80;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AddPathDirection {
    Receive,
    Send,
    SendReceive,
}

impl AddPathDirection {
    pub fn code(self) -> u8 {
        match self {
            AddPathDirection::Receive => 1,
            AddPathDirection::Send => 2,
            AddPathDirection::SendReceive => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AddPathDirection::Receive),
            2 => Some(AddPathDirection::Send),
            3 => Some(AddPathDirection::SendReceive),
            _ => None,
        }
    }

    pub fn sends(self) -> bool {
        matches!(self, AddPathDirection::Send | AddPathDirection::SendReceive)
    }

    pub fn receives(self) -> bool {
        matches!(
            self,
            AddPathDirection::Receive | AddPathDirection::SendReceive
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Capability {
    Multiprotocol(Family),
    RouteRefresh,
    CiscoRouteRefresh,
    EnhancedRouteRefresh,
    ExtendedNexthop(Vec<(Family, u16)>),
    ExtendedMessage,
    GracefulRestart {
        restart_flags: u8,
        restart_time: u16,
        families: Vec<(Family, u8)>,
    },
    Asn4(u32),
    AddPath(Vec<(Family, AddPathDirection)>),
    Hostname {
        hostname: String,
        domainname: String,
    },
    Operational,
    Unknown {
        code: u8,
        data: Vec<u8>,
    },
}

impl Capability {
    pub fn code(&self) -> u8 {
        use Capability::*;
        match self {
            Multiprotocol(_) => MULTIPROTOCOL,
            RouteRefresh => ROUTE_REFRESH,
            CiscoRouteRefresh => CISCO_ROUTE_REFRESH,
            EnhancedRouteRefresh => ENHANCED_ROUTE_REFRESH,
            ExtendedNexthop(_) => EXTENDED_NEXTHOP,
            ExtendedMessage => EXTENDED_MESSAGE,
            GracefulRestart { .. } => GRACEFUL_RESTART,
            Asn4(_) => ASN4,
            AddPath(_) => ADD_PATH,
            Hostname { .. } => HOSTNAME,
            Operational => OPERATIONAL,
            Unknown { code, .. } => *code,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        match self {
            Capability::Multiprotocol(family) => {
                buf.put_u16(family.afi.code());
                buf.put_u8(0);
                buf.put_u8(family.safi.code());
            }
            Capability::RouteRefresh
            | Capability::CiscoRouteRefresh
            | Capability::EnhancedRouteRefresh
            | Capability::ExtendedMessage
            | Capability::Operational => (),
            Capability::ExtendedNexthop(entries) => {
                for (family, nexthop_afi) in entries {
                    buf.put_u16(family.afi.code());
                    buf.put_u16(u16::from(family.safi.code()));
                    buf.put_u16(*nexthop_afi);
                }
            }
            Capability::GracefulRestart {
                restart_flags,
                restart_time,
                families,
            } => {
                buf.put_u16((u16::from(*restart_flags) << 12) | (restart_time & 0x0fff));
                for (family, flags) in families {
                    buf.put_u16(family.afi.code());
                    buf.put_u8(family.safi.code());
                    buf.put_u8(*flags);
                }
            }
            Capability::Asn4(asn) => buf.put_u32(*asn),
            Capability::AddPath(entries) => {
                for (family, direction) in entries {
                    buf.put_u16(family.afi.code());
                    buf.put_u8(family.safi.code());
                    buf.put_u8(direction.code());
                }
            }
            Capability::Hostname {
                hostname,
                domainname,
            } => {
                buf.put_u8(hostname.len() as u8);
                buf.put_slice(hostname.as_bytes());
                buf.put_u8(domainname.len() as u8);
                buf.put_slice(domainname.as_bytes());
            }
            Capability::Unknown { data, .. } => buf.put_slice(data),
        }
        buf.to_vec()
    }

    /// code + length + value
    pub fn write(&self, buf: &mut BytesMut) {
        let payload = self.payload();
        buf.put_u8(self.code());
        buf.put_u8(payload.len() as u8);
        buf.put_slice(&payload);
    }

    pub fn read(reader: &mut Reader) -> Result<Self, Notify> {
        let code = reader.u8().map_err(|_| Notify::new(2, 4))?;
        let length = usize::from(reader.u8().map_err(|_| Notify::new(2, 4))?);
        let payload = reader.take(length).map_err(|_| Notify::new(2, 4))?;
        let mut inner = Reader::new(payload);

        let capability = match code {
            MULTIPROTOCOL => {
                let afi = inner.u16().map_err(|_| Notify::new(2, 4))?;
                let _reserved = inner.u8().map_err(|_| Notify::new(2, 4))?;
                let safi = inner.u8().map_err(|_| Notify::new(2, 4))?;
                match Family::from_codes(afi, safi) {
                    Some(family) => Capability::Multiprotocol(family),
                    None => Capability::Unknown {
                        code,
                        data: payload.to_vec(),
                    },
                }
            }
            ROUTE_REFRESH => Capability::RouteRefresh,
            CISCO_ROUTE_REFRESH => Capability::CiscoRouteRefresh,
            ENHANCED_ROUTE_REFRESH => Capability::EnhancedRouteRefresh,
            EXTENDED_MESSAGE => Capability::ExtendedMessage,
            OPERATIONAL => Capability::Operational,
            EXTENDED_NEXTHOP => {
                let mut entries = Vec::with_capacity(length / 6);
                while !inner.is_empty() {
                    let afi = inner.u16().map_err(|_| Notify::new(2, 4))?;
                    let safi = inner.u16().map_err(|_| Notify::new(2, 4))?;
                    let nexthop_afi = inner.u16().map_err(|_| Notify::new(2, 4))?;
                    if let Some(family) = Family::from_codes(afi, safi as u8) {
                        entries.push((family, nexthop_afi));
                    }
                }
                Capability::ExtendedNexthop(entries)
            }
            GRACEFUL_RESTART => {
                let head = inner.u16().map_err(|_| Notify::new(2, 4))?;
                let restart_flags = (head >> 12) as u8;
                let restart_time = head & 0x0fff;
                let mut families = Vec::with_capacity(length / 4);
                while !inner.is_empty() {
                    let afi = inner.u16().map_err(|_| Notify::new(2, 4))?;
                    let safi = inner.u8().map_err(|_| Notify::new(2, 4))?;
                    let flags = inner.u8().map_err(|_| Notify::new(2, 4))?;
                    if let Some(family) = Family::from_codes(afi, safi) {
                        families.push((family, flags));
                    }
                }
                Capability::GracefulRestart {
                    restart_flags,
                    restart_time,
                    families,
                }
            }
            ASN4 => Capability::Asn4(inner.u32().map_err(|_| Notify::new(2, 4))?),
            ADD_PATH => {
                let mut entries = Vec::with_capacity(length / 4);
                while !inner.is_empty() {
                    let afi = inner.u16().map_err(|_| Notify::new(2, 4))?;
                    let safi = inner.u8().map_err(|_| Notify::new(2, 4))?;
                    let direction = inner.u8().map_err(|_| Notify::new(2, 4))?;
                    match (
                        Family::from_codes(afi, safi),
                        AddPathDirection::from_code(direction),
                    ) {
                        (Some(family), Some(direction)) => entries.push((family, direction)),
                        _ => continue,
                    }
                }
                Capability::AddPath(entries)
            }
            HOSTNAME => {
                let host_len = usize::from(inner.u8().map_err(|_| Notify::new(2, 4))?);
                let hostname = inner.take(host_len).map_err(|_| Notify::new(2, 4))?;
                let domain_len = usize::from(inner.u8().map_err(|_| Notify::new(2, 4))?);
                let domainname = inner.take(domain_len).map_err(|_| Notify::new(2, 4))?;
                Capability::Hostname {
                    hostname: String::from_utf8_lossy(hostname).to_string(),
                    domainname: String::from_utf8_lossy(domainname).to_string(),
                }
            }
            _ => Capability::Unknown {
                code,
                data: payload.to_vec(),
            },
        };
        Ok(capability)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Capability::Multiprotocol(family) => write!(f, "multiprotocol {}", family),
            Capability::RouteRefresh => write!(f, "route-refresh"),
            Capability::CiscoRouteRefresh => write!(f, "cisco-route-refresh"),
            Capability::EnhancedRouteRefresh => write!(f, "enhanced-route-refresh"),
            Capability::ExtendedNexthop(_) => write!(f, "extended-nexthop"),
            Capability::ExtendedMessage => write!(f, "extended-message"),
            Capability::GracefulRestart { restart_time, .. } => {
                write!(f, "graceful-restart {}s", restart_time)
            }
            Capability::Asn4(asn) => write!(f, "asn4 {}", asn),
            Capability::AddPath(entries) => write!(f, "add-path ({} families)", entries.len()),
            Capability::Hostname { hostname, .. } => write!(f, "hostname {}", hostname),
            Capability::Operational => write!(f, "operational"),
            Capability::Unknown { code, .. } => write!(f, "unknown-capability {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::family::{Afi, Safi};

    fn roundtrip(capability: Capability) -> Capability {
        let mut buf = BytesMut::new();
        capability.write(&mut buf);
        let mut reader = Reader::new(&buf);
        let decoded = Capability::read(&mut reader).unwrap();
        assert!(reader.is_empty());
        decoded
    }

    #[test]
    fn test_multiprotocol() {
        let capability = Capability::Multiprotocol(Family::IPV4_UNICAST);
        assert_eq!(roundtrip(capability.clone()), capability);
    }

    #[test]
    fn test_asn4() {
        let capability = Capability::Asn4(4_200_000_001);
        assert_eq!(roundtrip(capability.clone()), capability);
    }

    #[test]
    fn test_graceful_restart() {
        let capability = Capability::GracefulRestart {
            restart_flags: GR_RESTART_FLAG,
            restart_time: 120,
            families: vec![(Family::IPV4_UNICAST, GR_FORWARDING_FLAG)],
        };
        assert_eq!(roundtrip(capability.clone()), capability);
    }

    #[test]
    fn test_add_path() {
        let capability = Capability::AddPath(vec![
            (Family::IPV4_UNICAST, AddPathDirection::SendReceive),
            (
                Family::new(Afi::Ipv6, Safi::Unicast),
                AddPathDirection::Receive,
            ),
        ]);
        assert_eq!(roundtrip(capability.clone()), capability);
    }

    #[test]
    fn test_unknown_preserved() {
        let capability = Capability::Unknown {
            code: 77,
            data: vec![1, 2, 3],
        };
        assert_eq!(roundtrip(capability.clone()), capability);
    }

    #[test]
    fn test_hostname() {
        let capability = Capability::Hostname {
            hostname: "rtr1".to_string(),
            domainname: "example.net".to_string(),
        };
        assert_eq!(roundtrip(capability.clone()), capability);
    }
}
