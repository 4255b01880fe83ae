//! NLRI families and their codecs. Decoding is dispatched through an
//! explicit [`Registry`] table from (AFI, SAFI) to a decoder function,
//! built once before the reactor starts.

pub mod cidr;
pub mod evpn;
pub mod flow;
pub mod label;
pub mod linkstate;
pub mod rtc;

pub use cidr::Cidr;
pub use evpn::EvpnNlri;
pub use flow::{FlowComponent, FlowNlri, FlowOp};
pub use label::{LabelStack, RouteDistinguisher, WITHDRAW_LABEL};
pub use linkstate::{LinkStateNlri, OpaqueNlri};
pub use rtc::RtcNlri;

use std::collections::HashMap;
use std::fmt;

use bytes::{BufMut, BytesMut};
use serde_json::json;

use crate::wire::family::{Afi, Family, Safi};
use crate::wire::{Notify, Reader, Truncated};

/// Plain unicast/multicast prefix, optionally AddPath-tagged
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PrefixNlri {
    pub family: Family,
    pub cidr: Cidr,
    pub path_id: Option<u32>,
}

/// Labeled unicast (RFC 3107 / RFC 8277)
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LabeledNlri {
    pub family: Family,
    pub cidr: Cidr,
    pub labels: LabelStack,
    pub path_id: Option<u32>,
}

/// L3VPN prefix (RFC 4364 / RFC 4659)
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VpnNlri {
    pub family: Family,
    pub rd: RouteDistinguisher,
    pub labels: LabelStack,
    pub cidr: Cidr,
    pub path_id: Option<u32>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Nlri {
    Prefix(PrefixNlri),
    Labeled(LabeledNlri),
    Vpn(VpnNlri),
    Flow(FlowNlri),
    Evpn(EvpnNlri),
    Rtc(RtcNlri),
    LinkState(LinkStateNlri),
    Opaque(OpaqueNlri),
}

impl Nlri {
    pub fn unicast(cidr: Cidr, path_id: Option<u32>) -> Self {
        let family = Family::new(cidr.afi(), Safi::Unicast);
        Nlri::Prefix(PrefixNlri {
            family,
            cidr,
            path_id,
        })
    }

    pub fn family(&self) -> Family {
        match self {
            Nlri::Prefix(nlri) => nlri.family,
            Nlri::Labeled(nlri) => nlri.family,
            Nlri::Vpn(nlri) => nlri.family,
            Nlri::Flow(nlri) => nlri.family,
            Nlri::Evpn(_) => Family::new(Afi::L2vpn, Safi::Evpn),
            Nlri::Rtc(_) => Family::new(Afi::Ipv4, Safi::Rtc),
            Nlri::LinkState(_) => Family::new(Afi::BgpLs, Safi::BgpLs),
            Nlri::Opaque(nlri) => nlri.family,
        }
    }

    pub fn path_id(&self) -> Option<u32> {
        match self {
            Nlri::Prefix(nlri) => nlri.path_id,
            Nlri::Labeled(nlri) => nlri.path_id,
            Nlri::Vpn(nlri) => nlri.path_id,
            _ => None,
        }
    }

    /// Serialize; `addpath` reflects the negotiated send state for this
    /// family (a route without an explicit path-id is sent as id 0).
    pub fn write(&self, buf: &mut BytesMut, addpath: bool) {
        if addpath {
            buf.put_u32(self.path_id().unwrap_or(0));
        }
        match self {
            Nlri::Prefix(nlri) => nlri.cidr.write(buf),
            Nlri::Labeled(nlri) => {
                buf.put_u8(nlri.cidr.mask() + nlri.labels.bit_length());
                nlri.labels.write(buf);
                nlri.cidr.write_packed(buf);
            }
            Nlri::Vpn(nlri) => {
                buf.put_u8(nlri.cidr.mask() + nlri.labels.bit_length() + 64);
                nlri.labels.write(buf);
                nlri.rd.write(buf);
                nlri.cidr.write_packed(buf);
            }
            Nlri::Flow(nlri) => nlri.write(buf),
            Nlri::Evpn(nlri) => nlri.write(buf),
            Nlri::Rtc(nlri) => nlri.write(buf),
            Nlri::LinkState(nlri) => nlri.write(buf),
            Nlri::Opaque(nlri) => nlri.write(buf),
        }
    }

    /// Unique key within a peer's RIB: family codes, path-id, wire bytes.
    pub fn index(&self) -> Vec<u8> {
        let family = self.family();
        let mut buf = BytesMut::new();
        buf.put_u16(family.afi.code());
        buf.put_u8(family.safi.code());
        self.write(&mut buf, self.path_id().is_some());
        buf.to_vec()
    }

    pub fn json(&self) -> serde_json::Value {
        match self {
            Nlri::Prefix(nlri) => {
                let mut obj = serde_json::Map::new();
                obj.insert("nlri".to_string(), json!(nlri.cidr.to_string()));
                if let Some(path_id) = nlri.path_id {
                    obj.insert("path-information".to_string(), json!(path_id));
                }
                serde_json::Value::Object(obj)
            }
            Nlri::Labeled(nlri) => {
                let mut obj = serde_json::Map::new();
                obj.insert("nlri".to_string(), json!(nlri.cidr.to_string()));
                obj.insert("label".to_string(), json!(nlri.labels.values()));
                if let Some(path_id) = nlri.path_id {
                    obj.insert("path-information".to_string(), json!(path_id));
                }
                serde_json::Value::Object(obj)
            }
            Nlri::Vpn(nlri) => {
                let mut obj = serde_json::Map::new();
                obj.insert("nlri".to_string(), json!(nlri.cidr.to_string()));
                obj.insert("rd".to_string(), json!(nlri.rd.to_string()));
                obj.insert("label".to_string(), json!(nlri.labels.values()));
                if let Some(path_id) = nlri.path_id {
                    obj.insert("path-information".to_string(), json!(path_id));
                }
                serde_json::Value::Object(obj)
            }
            Nlri::Flow(nlri) => nlri.json(),
            Nlri::Evpn(nlri) => nlri.json(),
            Nlri::Rtc(nlri) => nlri.json(),
            Nlri::LinkState(nlri) => nlri.json(),
            Nlri::Opaque(nlri) => nlri.json(),
        }
    }
}

impl fmt::Display for Nlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Nlri::Prefix(nlri) => write!(f, "{}", nlri.cidr),
            Nlri::Labeled(nlri) => write!(f, "{} label {}", nlri.cidr, nlri.labels),
            Nlri::Vpn(nlri) => {
                write!(f, "{} rd {} label {}", nlri.cidr, nlri.rd, nlri.labels)
            }
            Nlri::Flow(nlri) => write!(f, "{}", nlri),
            Nlri::Evpn(nlri) => write!(f, "{}", nlri),
            Nlri::Rtc(nlri) => write!(f, "{}", nlri),
            Nlri::LinkState(nlri) => write!(f, "{}", nlri),
            Nlri::Opaque(nlri) => write!(f, "{}", nlri),
        }
    }
}

type Decoder = fn(&mut Reader, Family, bool) -> Result<Nlri, Truncated>;

/// (AFI, SAFI) → decoder table, populated before the reactor starts.
pub struct Registry(HashMap<(Afi, Safi), Decoder>);

impl Default for Registry {
    fn default() -> Self {
        let mut table: HashMap<(Afi, Safi), Decoder> = HashMap::new();
        for afi in [Afi::Ipv4, Afi::Ipv6] {
            table.insert((afi, Safi::Unicast), decode_prefix);
            table.insert((afi, Safi::Multicast), decode_prefix);
            table.insert((afi, Safi::NlriMpls), decode_labeled);
            table.insert((afi, Safi::MplsVpn), decode_vpn);
            table.insert((afi, Safi::Flow), decode_flow);
            table.insert((afi, Safi::FlowVpn), decode_flow);
            table.insert((afi, Safi::McastVpn), decode_opaque);
            table.insert((afi, Safi::Mup), decode_opaque);
        }
        table.insert((Afi::Ipv4, Safi::Rtc), decode_rtc);
        table.insert((Afi::L2vpn, Safi::Evpn), decode_evpn);
        table.insert((Afi::BgpLs, Safi::BgpLs), decode_linkstate);
        Self(table)
    }
}

impl Registry {
    pub fn supports(&self, family: Family) -> bool {
        self.0.contains_key(&(family.afi, family.safi))
    }

    /// Consume every NLRI remaining in `bytes`.
    pub fn decode_all(
        &self,
        family: Family,
        bytes: &[u8],
        addpath: bool,
    ) -> Result<Vec<Nlri>, Notify> {
        let decoder = self
            .0
            .get(&(family.afi, family.safi))
            .ok_or_else(|| Notify::new(3, 10))?;
        let mut reader = Reader::new(bytes);
        let mut nlris = Vec::with_capacity(4);
        while !reader.is_empty() {
            let nlri = decoder(&mut reader, family, addpath).map_err(|_| Notify::new(3, 10))?;
            nlris.push(nlri);
        }
        Ok(nlris)
    }
}

fn read_path_id(reader: &mut Reader, addpath: bool) -> Result<Option<u32>, Truncated> {
    if addpath {
        Ok(Some(reader.u32()?))
    } else {
        Ok(None)
    }
}

fn decode_prefix(reader: &mut Reader, family: Family, addpath: bool) -> Result<Nlri, Truncated> {
    let path_id = read_path_id(reader, addpath)?;
    let cidr = Cidr::read(reader, family.afi)?;
    Ok(Nlri::Prefix(PrefixNlri {
        family,
        cidr,
        path_id,
    }))
}

fn decode_labeled(reader: &mut Reader, family: Family, addpath: bool) -> Result<Nlri, Truncated> {
    let path_id = read_path_id(reader, addpath)?;
    let mask = reader.u8()?;
    let labels = LabelStack::read(reader)?;
    let prefix_bits = mask.checked_sub(labels.bit_length()).ok_or(Truncated)?;
    let cidr = Cidr::read_masked(reader, family.afi, prefix_bits)?;
    Ok(Nlri::Labeled(LabeledNlri {
        family,
        cidr,
        labels,
        path_id,
    }))
}

fn decode_vpn(reader: &mut Reader, family: Family, addpath: bool) -> Result<Nlri, Truncated> {
    let path_id = read_path_id(reader, addpath)?;
    let mask = reader.u8()?;
    let labels = LabelStack::read(reader)?;
    let rd = RouteDistinguisher::read(reader)?;
    let prefix_bits = mask
        .checked_sub(labels.bit_length())
        .and_then(|bits| bits.checked_sub(64))
        .ok_or(Truncated)?;
    let cidr = Cidr::read_masked(reader, family.afi, prefix_bits)?;
    Ok(Nlri::Vpn(VpnNlri {
        family,
        rd,
        labels,
        cidr,
        path_id,
    }))
}

fn decode_flow(reader: &mut Reader, family: Family, _addpath: bool) -> Result<Nlri, Truncated> {
    FlowNlri::read(reader, family).map(Nlri::Flow)
}

fn decode_evpn(reader: &mut Reader, _family: Family, _addpath: bool) -> Result<Nlri, Truncated> {
    EvpnNlri::read(reader).map(Nlri::Evpn)
}

fn decode_rtc(reader: &mut Reader, _family: Family, _addpath: bool) -> Result<Nlri, Truncated> {
    RtcNlri::read(reader).map(Nlri::Rtc)
}

fn decode_linkstate(
    reader: &mut Reader,
    _family: Family,
    _addpath: bool,
) -> Result<Nlri, Truncated> {
    LinkStateNlri::read(reader).map(Nlri::LinkState)
}

fn decode_opaque(reader: &mut Reader, family: Family, _addpath: bool) -> Result<Nlri, Truncated> {
    OpaqueNlri::read(reader, family).map(Nlri::Opaque)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_roundtrip() {
        let registry = Registry::default();
        let nlri = Nlri::unicast(Cidr::from_ip("192.0.2.0".parse().unwrap(), 24), None);
        let mut buf = BytesMut::new();
        nlri.write(&mut buf, false);
        assert_eq!(&buf[..], &[24, 192, 0, 2]);

        let decoded = registry
            .decode_all(Family::IPV4_UNICAST, &buf, false)
            .unwrap();
        assert_eq!(decoded, vec![nlri]);
    }

    #[test]
    fn test_addpath_roundtrip() {
        let registry = Registry::default();
        let nlri = Nlri::unicast(Cidr::from_ip("10.1.0.0".parse().unwrap(), 16), Some(7));
        let mut buf = BytesMut::new();
        nlri.write(&mut buf, true);
        assert_eq!(&buf[..], &[0, 0, 0, 7, 16, 10, 1]);

        let decoded = registry
            .decode_all(Family::IPV4_UNICAST, &buf, true)
            .unwrap();
        assert_eq!(decoded[0].path_id(), Some(7));
    }

    #[test]
    fn test_labeled_roundtrip() {
        let registry = Registry::default();
        let family = Family::new(Afi::Ipv4, Safi::NlriMpls);
        let nlri = Nlri::Labeled(LabeledNlri {
            family,
            cidr: Cidr::from_ip("203.0.113.0".parse().unwrap(), 24),
            labels: LabelStack::new(vec![800000]),
            path_id: None,
        });
        let mut buf = BytesMut::new();
        nlri.write(&mut buf, false);
        // mask covers prefix bits plus one 24-bit label
        assert_eq!(buf[0], 48);

        let decoded = registry.decode_all(family, &buf, false).unwrap();
        assert_eq!(decoded, vec![nlri]);
    }

    #[test]
    fn test_vpn_roundtrip() {
        let registry = Registry::default();
        let family = Family::new(Afi::Ipv4, Safi::MplsVpn);
        let nlri = Nlri::Vpn(VpnNlri {
            family,
            rd: "65000:1".parse().unwrap(),
            labels: LabelStack::new(vec![100]),
            cidr: Cidr::from_ip("10.2.0.0".parse().unwrap(), 16),
            path_id: None,
        });
        let mut buf = BytesMut::new();
        nlri.write(&mut buf, false);
        assert_eq!(buf[0], 16 + 24 + 64);

        let decoded = registry.decode_all(family, &buf, false).unwrap();
        assert_eq!(decoded, vec![nlri]);
    }

    #[test]
    fn test_many_prefixes() {
        let registry = Registry::default();
        let mut buf = BytesMut::new();
        for i in 0..10u8 {
            let nlri = Nlri::unicast(
                Cidr::from_ip(format!("10.{}.0.0", i).parse().unwrap(), 16),
                None,
            );
            nlri.write(&mut buf, false);
        }
        let decoded = registry
            .decode_all(Family::IPV4_UNICAST, &buf, false)
            .unwrap();
        assert_eq!(decoded.len(), 10);
    }

    #[test]
    fn test_unknown_family() {
        let registry = Registry::default();
        let family = Family::new(Afi::L2vpn, Safi::Unicast);
        assert!(!registry.supports(family));
        assert!(registry.decode_all(family, &[0], false).is_err());
    }

    #[test]
    fn test_index_distinguishes_path_id() {
        let a = Nlri::unicast(Cidr::from_ip("10.0.0.0".parse().unwrap(), 8), Some(1));
        let b = Nlri::unicast(Cidr::from_ip("10.0.0.0".parse().unwrap(), 8), Some(2));
        assert_ne!(a.index(), b.index());
    }
}
