//! Path attributes: a tagged sum per kind plus [`AttributeCollection`], a
//! canonically-ordered map whose wire form is deterministic so identical
//! collections hash to identical fingerprints (the basis of outbound update
//! grouping).

pub mod aspath;

pub use aspath::{AsPath, Segment, AS_TRANS};

use std::collections::hash_map::DefaultHasher;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use log::{debug, warn};

use crate::wire::family::{Family, Safi};
use crate::wire::nlri::{self, Nlri};
use crate::wire::{CodecContext, Notify, Reader};

pub const FLAG_OPTIONAL: u8 = 0x80;
pub const FLAG_TRANSITIVE: u8 = 0x40;
pub const FLAG_PARTIAL: u8 = 0x20;
pub const FLAG_EXTENDED: u8 = 0x10;

pub mod code {
    pub const ORIGIN: u8 = 1;
    pub const AS_PATH: u8 = 2;
    pub const NEXT_HOP: u8 = 3;
    pub const MED: u8 = 4;
    pub const LOCAL_PREF: u8 = 5;
    pub const ATOMIC_AGGREGATE: u8 = 6;
    pub const AGGREGATOR: u8 = 7;
    pub const COMMUNITIES: u8 = 8;
    pub const ORIGINATOR_ID: u8 = 9;
    pub const CLUSTER_LIST: u8 = 10;
    pub const MP_REACH: u8 = 14;
    pub const MP_UNREACH: u8 = 15;
    pub const EXTENDED_COMMUNITIES: u8 = 16;
    pub const AS4_PATH: u8 = 17;
    pub const AS4_AGGREGATOR: u8 = 18;
    pub const PMSI_TUNNEL: u8 = 22;
    pub const AIGP: u8 = 26;
    pub const LINK_STATE: u8 = 29;
    pub const LARGE_COMMUNITIES: u8 = 32;
    pub const PREFIX_SID: u8 = 40;
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

impl Origin {
    pub fn code(self) -> u8 {
        match self {
            Origin::Igp => 0,
            Origin::Egp => 1,
            Origin::Incomplete => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Origin::Igp),
            1 => Some(Origin::Egp),
            2 => Some(Origin::Incomplete),
            _ => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Origin::Igp => "igp",
            Origin::Egp => "egp",
            Origin::Incomplete => "incomplete",
        };
        write!(f, "{}", name)
    }
}

/// Multi-protocol announce carrier (RFC 4760). Lives in a collection only
/// while a message is being packed or unpacked; the RIB stores family-free
/// collections with the next-hop folded into [`Attribute::NextHop`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MpReach {
    pub family: Family,
    pub next_hop: Vec<u8>,
    pub nlris: Vec<Nlri>,
}

impl MpReach {
    /// Primary next-hop address (a VPN next-hop sheds its zero RD, an IPv6
    /// next-hop with a link-local second address keeps the global one).
    pub fn next_hop_addr(&self) -> Option<IpAddr> {
        decode_next_hop(&self.next_hop)
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MpUnreach {
    pub family: Family,
    pub nlris: Vec<Nlri>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Attribute {
    Origin(Origin),
    AsPath(AsPath),
    NextHop(IpAddr),
    Med(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator { asn: u32, speaker: Ipv4Addr },
    Communities(Vec<u32>),
    OriginatorId(Ipv4Addr),
    ClusterList(Vec<Ipv4Addr>),
    MpReach(MpReach),
    MpUnreach(MpUnreach),
    ExtendedCommunities(Vec<u64>),
    As4Path(AsPath),
    As4Aggregator { asn: u32, speaker: Ipv4Addr },
    PmsiTunnel(Vec<u8>),
    Aigp(u64),
    LinkState(Vec<u8>),
    LargeCommunities(Vec<(u32, u32, u32)>),
    PrefixSid(Vec<u8>),
    /// Unknown transitive attribute, retained opaque and re-advertised
    /// with the PARTIAL flag
    Unknown { code: u8, flags: u8, data: Vec<u8> },
}

impl Attribute {
    pub fn code(&self) -> u8 {
        use Attribute::*;
        match self {
            Origin(_) => code::ORIGIN,
            AsPath(_) => code::AS_PATH,
            NextHop(_) => code::NEXT_HOP,
            Med(_) => code::MED,
            LocalPref(_) => code::LOCAL_PREF,
            AtomicAggregate => code::ATOMIC_AGGREGATE,
            Aggregator { .. } => code::AGGREGATOR,
            Communities(_) => code::COMMUNITIES,
            OriginatorId(_) => code::ORIGINATOR_ID,
            ClusterList(_) => code::CLUSTER_LIST,
            MpReach(_) => code::MP_REACH,
            MpUnreach(_) => code::MP_UNREACH,
            ExtendedCommunities(_) => code::EXTENDED_COMMUNITIES,
            As4Path(_) => code::AS4_PATH,
            As4Aggregator { .. } => code::AS4_AGGREGATOR,
            PmsiTunnel(_) => code::PMSI_TUNNEL,
            Aigp(_) => code::AIGP,
            LinkState(_) => code::LINK_STATE,
            LargeCommunities(_) => code::LARGE_COMMUNITIES,
            PrefixSid(_) => code::PREFIX_SID,
            Unknown { code, .. } => *code,
        }
    }

    /// IANA-registered flag byte (before the extended-length bit)
    fn flags(&self) -> u8 {
        use Attribute::*;
        match self {
            Origin(_) | AsPath(_) | NextHop(_) | LocalPref(_) | AtomicAggregate => FLAG_TRANSITIVE,
            Med(_) | OriginatorId(_) | ClusterList(_) | MpReach(_) | MpUnreach(_) | Aigp(_)
            | LinkState(_) => FLAG_OPTIONAL,
            Aggregator { .. } | Communities(_) | ExtendedCommunities(_) | As4Path(_)
            | As4Aggregator { .. } | PmsiTunnel(_) | LargeCommunities(_) | PrefixSid(_) => {
                FLAG_OPTIONAL | FLAG_TRANSITIVE
            }
            Unknown { flags, .. } => *flags | FLAG_PARTIAL,
        }
    }

    fn payload(&self, ctx: &CodecContext) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        match self {
            Attribute::Origin(origin) => buf.put_u8(origin.code()),
            Attribute::AsPath(path) => path.write(&mut buf, ctx.asn4),
            Attribute::NextHop(addr) => match addr {
                IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
                IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
            },
            Attribute::Med(value) | Attribute::LocalPref(value) => buf.put_u32(*value),
            Attribute::AtomicAggregate => (),
            Attribute::Aggregator { asn, speaker } => {
                if ctx.asn4 {
                    buf.put_u32(*asn);
                } else if *asn > u32::from(u16::MAX) {
                    buf.put_u16(AS_TRANS as u16);
                } else {
                    buf.put_u16(*asn as u16);
                }
                buf.put_slice(&speaker.octets());
            }
            Attribute::Communities(communities) => {
                for community in communities {
                    buf.put_u32(*community);
                }
            }
            Attribute::OriginatorId(id) => buf.put_slice(&id.octets()),
            Attribute::ClusterList(clusters) => {
                for cluster in clusters {
                    buf.put_slice(&cluster.octets());
                }
            }
            Attribute::MpReach(reach) => {
                buf.put_u16(reach.family.afi.code());
                buf.put_u8(reach.family.safi.code());
                buf.put_u8(reach.next_hop.len() as u8);
                buf.put_slice(&reach.next_hop);
                buf.put_u8(0);
                let addpath = ctx.sends_addpath(reach.family);
                for nlri in &reach.nlris {
                    nlri.write(&mut buf, addpath);
                }
            }
            Attribute::MpUnreach(unreach) => {
                buf.put_u16(unreach.family.afi.code());
                buf.put_u8(unreach.family.safi.code());
                let addpath = ctx.sends_addpath(unreach.family);
                for nlri in &unreach.nlris {
                    nlri.write(&mut buf, addpath);
                }
            }
            Attribute::ExtendedCommunities(communities) => {
                for community in communities {
                    buf.put_u64(*community);
                }
            }
            Attribute::As4Path(path) => path.write(&mut buf, true),
            Attribute::As4Aggregator { asn, speaker } => {
                buf.put_u32(*asn);
                buf.put_slice(&speaker.octets());
            }
            Attribute::PmsiTunnel(data)
            | Attribute::LinkState(data)
            | Attribute::PrefixSid(data) => buf.put_slice(data),
            Attribute::Aigp(metric) => {
                buf.put_u8(1);
                buf.put_u16(11);
                buf.put_u64(*metric);
            }
            Attribute::LargeCommunities(communities) => {
                for (global, local1, local2) in communities {
                    buf.put_u32(*global);
                    buf.put_u32(*local1);
                    buf.put_u32(*local2);
                }
            }
            Attribute::Unknown { data, .. } => buf.put_slice(data),
        }
        buf.to_vec()
    }

    /// Full flag/type/length/payload image. The extended-length flag is
    /// computed from the actual payload size.
    pub fn encode_into(&self, buf: &mut BytesMut, ctx: &CodecContext) {
        let payload = self.payload(ctx);
        let mut flags = self.flags();
        if payload.len() > 0xff {
            flags |= FLAG_EXTENDED;
        }
        buf.put_u8(flags);
        buf.put_u8(self.code());
        if payload.len() > 0xff {
            buf.put_u16(payload.len() as u16);
        } else {
            buf.put_u8(payload.len() as u8);
        }
        buf.put_slice(&payload);
    }
}

/// One attribute of each kind, iterated in canonical (ascending type code)
/// order. MP_REACH/MP_UNREACH are present only during message pack/unpack.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttributeCollection(BTreeMap<u8, Attribute>);

impl AttributeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attribute: Attribute) -> Option<Attribute> {
        self.0.insert(attribute.code(), attribute)
    }

    pub fn remove(&mut self, code: u8) -> Option<Attribute> {
        self.0.remove(&code)
    }

    pub fn get(&self, code: u8) -> Option<&Attribute> {
        self.0.get(&code)
    }

    pub fn contains(&self, code: u8) -> bool {
        self.0.contains_key(&code)
    }

    pub fn iter(&self) -> btree_map::Values<u8, Attribute> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn origin(&self) -> Option<Origin> {
        match self.get(code::ORIGIN) {
            Some(Attribute::Origin(origin)) => Some(*origin),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&AsPath> {
        match self.get(code::AS_PATH) {
            Some(Attribute::AsPath(path)) => Some(path),
            _ => None,
        }
    }

    pub fn next_hop(&self) -> Option<IpAddr> {
        match self.get(code::NEXT_HOP) {
            Some(Attribute::NextHop(addr)) => Some(*addr),
            _ => None,
        }
    }

    pub fn local_pref(&self) -> Option<u32> {
        match self.get(code::LOCAL_PREF) {
            Some(Attribute::LocalPref(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn med(&self) -> Option<u32> {
        match self.get(code::MED) {
            Some(Attribute::Med(value)) => Some(*value),
            _ => None,
        }
    }

    /// Canonical wire image of every attribute present
    pub fn encode(&self, buf: &mut BytesMut, ctx: &CodecContext) {
        for attribute in self.0.values() {
            attribute.encode_into(buf, ctx);
        }
    }

    /// Grouping fingerprint: hash of the canonical encoding, excluding the
    /// NLRI-family qualifiers (MP_REACH carries only its family + next-hop
    /// into the hash, MP_UNREACH is skipped).
    pub fn fingerprint(&self) -> u64 {
        let ctx = CodecContext::default();
        let mut hasher = DefaultHasher::new();
        for attribute in self.0.values() {
            match attribute {
                Attribute::MpUnreach(_) => continue,
                Attribute::MpReach(reach) => {
                    hasher.write_u8(code::MP_REACH);
                    hasher.write_u16(reach.family.afi.code());
                    hasher.write_u8(reach.family.safi.code());
                    hasher.write(&reach.next_hop);
                }
                attribute => {
                    hasher.write_u8(attribute.code());
                    hasher.write(&attribute.payload(&ctx));
                }
            }
        }
        hasher.finish()
    }
}

impl fmt::Display for AttributeCollection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for attribute in self.0.values() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            match attribute {
                Attribute::Origin(origin) => write!(f, "origin {}", origin)?,
                Attribute::AsPath(path) => write!(f, "as-path [ {} ]", path)?,
                Attribute::NextHop(addr) => write!(f, "next-hop {}", addr)?,
                Attribute::Med(value) => write!(f, "med {}", value)?,
                Attribute::LocalPref(value) => write!(f, "local-preference {}", value)?,
                other => write!(f, "attribute [ 0x{:02x} ]", other.code())?,
            }
        }
        Ok(())
    }
}

/// Walk an UPDATE's attribute section. Returns the collection with the AS4
/// merge already applied; MP_REACH/MP_UNREACH stay in the collection for
/// the UPDATE decoder to extract.
pub fn parse_all(
    data: &[u8],
    ctx: &CodecContext,
    registry: &nlri::Registry,
) -> Result<AttributeCollection, Notify> {
    let mut collection = AttributeCollection::new();
    let mut reader = Reader::new(data);

    while !reader.is_empty() {
        let flags = reader.u8().map_err(|_| Notify::new(3, 1))?;
        let code = reader.u8().map_err(|_| Notify::new(3, 1))?;
        let length = if flags & FLAG_EXTENDED != 0 {
            usize::from(reader.u16().map_err(|_| Notify::new(3, 1))?)
        } else {
            usize::from(reader.u8().map_err(|_| Notify::new(3, 1))?)
        };
        let payload = reader.take(length).map_err(|_| Notify::new(3, 1))?;

        let attribute = match decode_attribute(code, flags, payload, ctx, registry)? {
            Some(attribute) => attribute,
            None => continue,
        };

        // at most one of each kind; the MULTIPLE-marked MP attributes
        // accumulate their NLRI lists instead
        match (collection.remove(code), attribute) {
            (Some(Attribute::MpReach(mut existing)), Attribute::MpReach(update)) => {
                existing.nlris.extend(update.nlris);
                collection.insert(Attribute::MpReach(existing));
            }
            (Some(Attribute::MpUnreach(mut existing)), Attribute::MpUnreach(update)) => {
                existing.nlris.extend(update.nlris);
                collection.insert(Attribute::MpUnreach(existing));
            }
            (Some(_), _) => {
                return Err(Notify::with_data(3, 1, vec![code]));
            }
            (None, attribute) => {
                collection.insert(attribute);
            }
        }
    }

    merge_as4(&mut collection);
    Ok(collection)
}

fn decode_attribute(
    attr_code: u8,
    flags: u8,
    payload: &[u8],
    ctx: &CodecContext,
    registry: &nlri::Registry,
) -> Result<Option<Attribute>, Notify> {
    let mut reader = Reader::new(payload);
    let attribute = match attr_code {
        code::ORIGIN => {
            let raw = reader.u8().map_err(|_| Notify::new(3, 5))?;
            let origin =
                Origin::from_code(raw).ok_or_else(|| Notify::with_data(3, 6, vec![raw]))?;
            Attribute::Origin(origin)
        }
        code::AS_PATH => {
            let path = AsPath::read(&mut reader, ctx.asn4).map_err(|_| Notify::new(3, 11))?;
            Attribute::AsPath(path)
        }
        code::NEXT_HOP => {
            if payload.len() != 4 {
                return Err(Notify::with_data(3, 8, payload.to_vec()));
            }
            Attribute::NextHop(IpAddr::V4(Ipv4Addr::new(
                payload[0], payload[1], payload[2], payload[3],
            )))
        }
        code::MED => Attribute::Med(reader.u32().map_err(|_| Notify::new(3, 5))?),
        code::LOCAL_PREF => Attribute::LocalPref(reader.u32().map_err(|_| Notify::new(3, 5))?),
        code::ATOMIC_AGGREGATE => Attribute::AtomicAggregate,
        code::AGGREGATOR => {
            let asn = if ctx.asn4 {
                reader.u32().map_err(|_| Notify::new(3, 5))?
            } else {
                u32::from(reader.u16().map_err(|_| Notify::new(3, 5))?)
            };
            let octets = reader.take(4).map_err(|_| Notify::new(3, 5))?;
            Attribute::Aggregator {
                asn,
                speaker: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
            }
        }
        code::COMMUNITIES => {
            let mut communities = Vec::with_capacity(payload.len() / 4);
            while !reader.is_empty() {
                communities.push(reader.u32().map_err(|_| Notify::new(3, 5))?);
            }
            Attribute::Communities(communities)
        }
        code::ORIGINATOR_ID => {
            let octets = reader.take(4).map_err(|_| Notify::new(3, 5))?;
            Attribute::OriginatorId(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
        }
        code::CLUSTER_LIST => {
            let mut clusters = Vec::with_capacity(payload.len() / 4);
            while !reader.is_empty() {
                let octets = reader.take(4).map_err(|_| Notify::new(3, 5))?;
                clusters.push(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]));
            }
            Attribute::ClusterList(clusters)
        }
        code::MP_REACH => {
            let afi = reader.u16().map_err(|_| Notify::new(3, 9))?;
            let safi = reader.u8().map_err(|_| Notify::new(3, 9))?;
            let family = match Family::from_codes(afi, safi) {
                Some(family) if registry.supports(family) => family,
                _ => {
                    warn!("MP_REACH for unsupported family {}/{}, ignoring", afi, safi);
                    return Ok(None);
                }
            };
            let nh_len = usize::from(reader.u8().map_err(|_| Notify::new(3, 9))?);
            let next_hop = reader.take(nh_len).map_err(|_| Notify::new(3, 9))?.to_vec();
            if family.safi == Safi::Unicast && next_hop.is_empty() {
                return Err(Notify::new(3, 8));
            }
            let _reserved = reader.u8().map_err(|_| Notify::new(3, 9))?;
            let nlris = registry.decode_all(family, reader.rest(), ctx.receives_addpath(family))?;
            Attribute::MpReach(MpReach {
                family,
                next_hop,
                nlris,
            })
        }
        code::MP_UNREACH => {
            let afi = reader.u16().map_err(|_| Notify::new(3, 9))?;
            let safi = reader.u8().map_err(|_| Notify::new(3, 9))?;
            let family = match Family::from_codes(afi, safi) {
                Some(family) if registry.supports(family) => family,
                _ => {
                    warn!(
                        "MP_UNREACH for unsupported family {}/{}, ignoring",
                        afi, safi
                    );
                    return Ok(None);
                }
            };
            let nlris = registry.decode_all(family, reader.rest(), ctx.receives_addpath(family))?;
            Attribute::MpUnreach(MpUnreach { family, nlris })
        }
        code::EXTENDED_COMMUNITIES => {
            let mut communities = Vec::with_capacity(payload.len() / 8);
            while !reader.is_empty() {
                communities.push(reader.u64().map_err(|_| Notify::new(3, 5))?);
            }
            Attribute::ExtendedCommunities(communities)
        }
        code::AS4_PATH => {
            let path = AsPath::read(&mut reader, true).map_err(|_| Notify::new(3, 9))?;
            Attribute::As4Path(path)
        }
        code::AS4_AGGREGATOR => {
            let asn = reader.u32().map_err(|_| Notify::new(3, 9))?;
            let octets = reader.take(4).map_err(|_| Notify::new(3, 9))?;
            Attribute::As4Aggregator {
                asn,
                speaker: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
            }
        }
        code::PMSI_TUNNEL => Attribute::PmsiTunnel(payload.to_vec()),
        code::AIGP => {
            // TLV type 1: accumulated metric
            let kind = reader.u8().map_err(|_| Notify::new(3, 5))?;
            let _length = reader.u16().map_err(|_| Notify::new(3, 5))?;
            if kind != 1 {
                debug!("AIGP TLV type {} ignored", kind);
                return Ok(None);
            }
            Attribute::Aigp(reader.u64().map_err(|_| Notify::new(3, 5))?)
        }
        code::LINK_STATE => Attribute::LinkState(payload.to_vec()),
        code::LARGE_COMMUNITIES => {
            let mut communities = Vec::with_capacity(payload.len() / 12);
            while !reader.is_empty() {
                let global = reader.u32().map_err(|_| Notify::new(3, 5))?;
                let local1 = reader.u32().map_err(|_| Notify::new(3, 5))?;
                let local2 = reader.u32().map_err(|_| Notify::new(3, 5))?;
                communities.push((global, local1, local2));
            }
            Attribute::LargeCommunities(communities)
        }
        code::PREFIX_SID => Attribute::PrefixSid(payload.to_vec()),
        _ => {
            if flags & FLAG_OPTIONAL == 0 {
                // unrecognized well-known attribute
                return Err(Notify::with_data(3, 2, vec![attr_code]));
            }
            if flags & FLAG_TRANSITIVE == 0 {
                debug!("dropping unknown non-transitive attribute {}", attr_code);
                return Ok(None);
            }
            return Ok(Some(Attribute::Unknown {
                code: attr_code,
                flags,
                data: payload.to_vec(),
            }));
        }
    };

    // flags that contradict the IANA registration: log and drop
    let expected = attribute.flags() & (FLAG_OPTIONAL | FLAG_TRANSITIVE);
    if flags & (FLAG_OPTIONAL | FLAG_TRANSITIVE) != expected {
        warn!(
            "attribute {} carried flags 0x{:02x} (expected 0x{:02x}), dropping",
            attr_code, flags, expected
        );
        return Ok(None);
    }
    Ok(Some(attribute))
}

/// RFC 4893 §4.2.3: fold AS4_PATH/AS4_AGGREGATOR into their 2-byte
/// counterparts; neither survives in the collection.
fn merge_as4(collection: &mut AttributeCollection) {
    if let Some(Attribute::As4Path(as4)) = collection.remove(code::AS4_PATH) {
        if let Some(Attribute::AsPath(as2)) = collection.remove(code::AS_PATH) {
            collection.insert(Attribute::AsPath(AsPath::merge_as4(&as2, &as4)));
        }
    }
    if let Some(Attribute::As4Aggregator { asn, speaker }) =
        collection.remove(code::AS4_AGGREGATOR)
    {
        if collection.remove(code::AGGREGATOR).is_some() {
            collection.insert(Attribute::Aggregator { asn, speaker });
        }
    }
}

/// Decode an MP next-hop field to its primary address.
pub fn decode_next_hop(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => Some(IpAddr::V4(Ipv4Addr::new(
            bytes[0], bytes[1], bytes[2], bytes[3],
        ))),
        // RD-prefixed VPN next-hop
        12 => decode_next_hop(&bytes[8..]),
        16 | 32 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        24 => decode_next_hop(&bytes[8..]),
        _ => None,
    }
}

/// Wire form of a next-hop for an MP_REACH of the given family.
pub fn encode_next_hop(addr: IpAddr, family: Family) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(24);
    if let Safi::MplsVpn = family.safi {
        bytes.extend_from_slice(&[0u8; 8]);
    }
    match addr {
        IpAddr::V4(v4) => bytes.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => bytes.extend_from_slice(&v6.octets()),
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::family::Afi;
    use crate::wire::nlri::Cidr;

    fn encode_one(attribute: &Attribute, ctx: &CodecContext) -> Vec<u8> {
        let mut buf = BytesMut::new();
        attribute.encode_into(&mut buf, ctx);
        buf.to_vec()
    }

    #[test]
    fn test_origin_wire_image() {
        let ctx = CodecContext::default();
        assert_eq!(
            encode_one(&Attribute::Origin(Origin::Igp), &ctx),
            vec![0x40, 1, 1, 0]
        );
    }

    #[test]
    fn test_roundtrip_collection() {
        let mut ctx = CodecContext::default();
        ctx.asn4 = true;
        let registry = nlri::Registry::default();

        let mut collection = AttributeCollection::new();
        collection.insert(Attribute::Origin(Origin::Igp));
        collection.insert(Attribute::AsPath(AsPath::sequence(vec![65000, 65001])));
        collection.insert(Attribute::NextHop("10.0.0.2".parse().unwrap()));
        collection.insert(Attribute::Med(50));
        collection.insert(Attribute::LocalPref(200));
        collection.insert(Attribute::Communities(vec![0xfde8_0064]));
        collection.insert(Attribute::LargeCommunities(vec![(65000, 1, 2)]));

        let mut buf = BytesMut::new();
        collection.encode(&mut buf, &ctx);
        let decoded = parse_all(&buf, &ctx, &registry).unwrap();
        assert_eq!(decoded, collection);
    }

    #[test]
    fn test_canonical_order_is_insertion_invariant() {
        let ctx = CodecContext::default();
        let mut a = AttributeCollection::new();
        a.insert(Attribute::Med(10));
        a.insert(Attribute::Origin(Origin::Egp));
        let mut b = AttributeCollection::new();
        b.insert(Attribute::Origin(Origin::Egp));
        b.insert(Attribute::Med(10));

        let mut buf_a = BytesMut::new();
        let mut buf_b = BytesMut::new();
        a.encode(&mut buf_a, &ctx);
        b.encode(&mut buf_b, &ctx);
        assert_eq!(buf_a, buf_b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let ctx = CodecContext::default();
        let registry = nlri::Registry::default();
        let one = encode_one(&Attribute::Med(1), &ctx);
        let two = encode_one(&Attribute::Med(2), &ctx);
        let both: Vec<u8> = one.into_iter().chain(two.into_iter()).collect();
        let err = parse_all(&both, &ctx, &registry).unwrap_err();
        assert_eq!((err.code, err.subcode), (3, 1));
    }

    #[test]
    fn test_unknown_transitive_retained_with_partial() {
        let ctx = CodecContext::default();
        let registry = nlri::Registry::default();
        let raw = vec![FLAG_OPTIONAL | FLAG_TRANSITIVE, 99, 2, 0xaa, 0xbb];
        let collection = parse_all(&raw, &ctx, &registry).unwrap();
        match collection.get(99) {
            Some(Attribute::Unknown { flags, data, .. }) => {
                assert_eq!(data, &vec![0xaa, 0xbb]);
                assert_eq!(*flags & FLAG_TRANSITIVE, FLAG_TRANSITIVE);
            }
            other => panic!("unexpected: {:?}", other),
        }
        // and it re-encodes with PARTIAL set
        let reencoded = encode_one(collection.get(99).unwrap(), &ctx);
        assert_eq!(reencoded[0] & FLAG_PARTIAL, FLAG_PARTIAL);
    }

    #[test]
    fn test_unknown_non_transitive_dropped() {
        let ctx = CodecContext::default();
        let registry = nlri::Registry::default();
        let raw = vec![FLAG_OPTIONAL, 99, 1, 0xaa];
        let collection = parse_all(&raw, &ctx, &registry).unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_flag_violation_dropped() {
        let ctx = CodecContext::default();
        let registry = nlri::Registry::default();
        // ORIGIN marked optional: registration violation
        let raw = vec![FLAG_OPTIONAL, 1, 1, 0];
        let collection = parse_all(&raw, &ctx, &registry).unwrap();
        assert!(collection.get(code::ORIGIN).is_none());
    }

    #[test]
    fn test_as4_merge_applied() {
        let ctx = CodecContext::default();
        let registry = nlri::Registry::default();

        let mut buf = BytesMut::new();
        Attribute::AsPath(AsPath::sequence(vec![23456, 23456, 65001])).encode_into(&mut buf, &ctx);
        Attribute::As4Path(AsPath::sequence(vec![4_200_000_001, 65001]))
            .encode_into(&mut buf, &ctx);

        let collection = parse_all(&buf, &ctx, &registry).unwrap();
        assert!(collection.get(code::AS4_PATH).is_none());
        assert_eq!(
            collection.as_path().unwrap().asns(),
            vec![23456, 4_200_000_001, 65001]
        );
    }

    #[test]
    fn test_mp_reach_roundtrip() {
        let ctx = CodecContext::default();
        let registry = nlri::Registry::default();
        let family = Family::new(Afi::Ipv6, Safi::Unicast);
        let reach = MpReach {
            family,
            next_hop: encode_next_hop("2001:db8::1".parse().unwrap(), family),
            nlris: vec![Nlri::Prefix(crate::wire::nlri::PrefixNlri {
                family,
                cidr: Cidr::from_ip("2001:db8:1::".parse().unwrap(), 48),
                path_id: None,
            })],
        };
        let raw = encode_one(&Attribute::MpReach(reach.clone()), &ctx);
        let collection = parse_all(&raw, &ctx, &registry).unwrap();
        match collection.get(code::MP_REACH) {
            Some(Attribute::MpReach(decoded)) => {
                assert_eq!(decoded, &reach);
                assert_eq!(
                    decoded.next_hop_addr(),
                    Some("2001:db8::1".parse().unwrap())
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_ignores_mp_nlri_list() {
        let family = Family::new(Afi::Ipv6, Safi::Unicast);
        let next_hop = encode_next_hop("2001:db8::1".parse().unwrap(), family);
        let nlri = |prefix: &str| {
            Nlri::Prefix(crate::wire::nlri::PrefixNlri {
                family,
                cidr: Cidr::from_ip(prefix.parse().unwrap(), 48),
                path_id: None,
            })
        };
        let mut a = AttributeCollection::new();
        a.insert(Attribute::MpReach(MpReach {
            family,
            next_hop: next_hop.clone(),
            nlris: vec![nlri("2001:db8:1::")],
        }));
        let mut b = AttributeCollection::new();
        b.insert(Attribute::MpReach(MpReach {
            family,
            next_hop,
            nlris: vec![nlri("2001:db8:2::"), nlri("2001:db8:3::")],
        }));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
