//! UPDATE messages. On the wire: withdrawn IPv4-unicast prefixes,
//! attributes, then to-end IPv4-unicast announcements; every other family
//! travels inside MP_REACH_NLRI / MP_UNREACH_NLRI. The in-memory form keeps
//! one flat announce/withdraw list regardless of family, with the next-hop
//! folded into the attribute collection.

use std::fmt;
use std::net::IpAddr;

use bytes::{BufMut, BytesMut};
use itertools::Itertools;

use crate::wire::attribute::{
    self, code, Attribute, AttributeCollection, MpReach, MpUnreach,
};
use crate::wire::family::{Afi, Family, Safi};
use crate::wire::nlri::{self, Nlri};
use crate::wire::{CodecContext, Notify, Reader};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub attributes: AttributeCollection,
    pub announced: Vec<Nlri>,
    pub withdrawn: Vec<Nlri>,
    /// Set when this UPDATE is an End-of-RIB marker
    pub eor: Option<Family>,
}

impl Update {
    pub fn new(
        attributes: AttributeCollection,
        announced: Vec<Nlri>,
        withdrawn: Vec<Nlri>,
    ) -> Self {
        Self {
            attributes,
            announced,
            withdrawn,
            eor: None,
        }
    }

    pub fn eor(family: Family) -> Self {
        Self {
            eor: Some(family),
            ..Default::default()
        }
    }

    pub fn is_eor(&self) -> bool {
        self.eor.is_some()
    }

    pub fn next_hop(&self) -> Option<IpAddr> {
        self.attributes.next_hop()
    }

    /// Serialize the payload. All announced NLRIs must share one family;
    /// the RIB drain constructs updates that way.
    pub fn pack(&self, ctx: &CodecContext) -> Vec<u8> {
        if let Some(family) = self.eor {
            return pack_eor(family);
        }

        let mut working = self.attributes.clone();
        let family = self
            .announced
            .first()
            .map(|nlri| nlri.family())
            .unwrap_or(Family::IPV4_UNICAST);

        let mut plain_announce = BytesMut::new();
        let mut plain_withdraw = BytesMut::new();

        if !self.announced.is_empty() {
            apply_attribute_defaults(&mut working, ctx);
            if family == Family::IPV4_UNICAST
                || family == Family::new(Afi::Ipv4, Safi::Multicast)
            {
                // NEXT_HOP attribute + to-end NLRI encoding
                let addpath = ctx.sends_addpath(family);
                for nlri in &self.announced {
                    nlri.write(&mut plain_announce, addpath);
                }
            } else {
                let next_hop = working
                    .remove(code::NEXT_HOP)
                    .and_then(|attr| match attr {
                        Attribute::NextHop(addr) => Some(addr),
                        _ => None,
                    });
                let next_hop = next_hop
                    .map(|addr| attribute::encode_next_hop(addr, family))
                    .unwrap_or_default();
                working.insert(Attribute::MpReach(MpReach {
                    family,
                    next_hop,
                    nlris: self.announced.clone(),
                }));
            }
        } else {
            // a pure-withdraw UPDATE carries no attributes
            working = AttributeCollection::new();
        }

        let withdrawn_groups = self.withdrawn.iter().group_by(|nlri| nlri.family());
        for (family, nlris) in &withdrawn_groups {
            if family == Family::IPV4_UNICAST {
                let addpath = ctx.sends_addpath(family);
                for nlri in nlris {
                    nlri.write(&mut plain_withdraw, addpath);
                }
            } else {
                working.insert(Attribute::MpUnreach(MpUnreach {
                    family,
                    nlris: nlris.cloned().collect(),
                }));
            }
        }

        let mut attrs = BytesMut::new();
        working.encode(&mut attrs, ctx);

        let mut buf = BytesMut::with_capacity(4 + plain_withdraw.len() + attrs.len());
        buf.put_u16(plain_withdraw.len() as u16);
        buf.put_slice(&plain_withdraw);
        buf.put_u16(attrs.len() as u16);
        buf.put_slice(&attrs);
        buf.put_slice(&plain_announce);
        buf.to_vec()
    }

    pub fn unpack(
        payload: &[u8],
        ctx: &CodecContext,
        registry: &nlri::Registry,
    ) -> Result<Self, Notify> {
        let mut reader = Reader::new(payload);
        let withdrawn_len = usize::from(reader.u16().map_err(|_| Notify::new(3, 1))?);
        let withdrawn_bytes = reader.take(withdrawn_len).map_err(|_| Notify::new(3, 1))?;
        let attrs_len = usize::from(reader.u16().map_err(|_| Notify::new(3, 1))?);
        let attrs_bytes = reader.take(attrs_len).map_err(|_| Notify::new(3, 1))?;
        let announce_bytes = reader.rest();
        // wire bookkeeping: the three sections plus their length fields
        // must cover the whole payload exactly
        if withdrawn_len + attrs_len + 4 + announce_bytes.len() != payload.len() {
            return Err(Notify::new(3, 1));
        }

        let v4_addpath = ctx.receives_addpath(Family::IPV4_UNICAST);
        let mut withdrawn =
            registry.decode_all(Family::IPV4_UNICAST, withdrawn_bytes, v4_addpath)?;
        let mut announced =
            registry.decode_all(Family::IPV4_UNICAST, announce_bytes, v4_addpath)?;

        let mut attributes = attribute::parse_all(attrs_bytes, ctx, registry)?;

        // ipv4-unicast EOR: completely empty payload
        if withdrawn.is_empty() && announced.is_empty() && attributes.is_empty() {
            return Ok(Update::eor(Family::IPV4_UNICAST));
        }

        if let Some(Attribute::MpReach(reach)) = attributes.remove(code::MP_REACH) {
            if let Some(addr) = reach.next_hop_addr() {
                attributes.insert(Attribute::NextHop(addr));
            }
            announced.extend(reach.nlris);
        }
        if let Some(Attribute::MpUnreach(unreach)) = attributes.remove(code::MP_UNREACH) {
            // family EOR: an MP_UNREACH with no NLRIs and nothing else
            if unreach.nlris.is_empty()
                && announced.is_empty()
                && withdrawn.is_empty()
                && attributes.is_empty()
            {
                return Ok(Update::eor(unreach.family));
            }
            withdrawn.extend(unreach.nlris);
        }

        Ok(Update::new(attributes, announced, withdrawn))
    }
}

fn pack_eor(family: Family) -> Vec<u8> {
    if family == Family::IPV4_UNICAST {
        return vec![0, 0, 0, 0];
    }
    let mut buf = BytesMut::with_capacity(11);
    buf.put_u16(0);
    // one empty MP_UNREACH attribute
    buf.put_u16(6);
    buf.put_u8(attribute::FLAG_OPTIONAL);
    buf.put_u8(code::MP_UNREACH);
    buf.put_u8(3);
    buf.put_u16(family.afi.code());
    buf.put_u8(family.safi.code());
    buf.to_vec()
}

/// Inject the per-session defaults: ORIGIN, AS_PATH and (for iBGP)
/// LOCAL_PREF. LOCAL_PREF is stripped toward eBGP peers.
fn apply_attribute_defaults(attributes: &mut AttributeCollection, ctx: &CodecContext) {
    if !attributes.contains(code::ORIGIN) {
        attributes.insert(Attribute::Origin(attribute::Origin::Igp));
    }
    if !attributes.contains(code::AS_PATH) {
        let path = if ctx.is_ebgp() {
            attribute::AsPath::sequence(vec![ctx.local_asn])
        } else {
            attribute::AsPath::empty()
        };
        attributes.insert(Attribute::AsPath(path));
    }
    if ctx.is_ebgp() {
        attributes.remove(code::LOCAL_PREF);
    } else if !attributes.contains(code::LOCAL_PREF) {
        attributes.insert(Attribute::LocalPref(100));
    }
    // a 4-byte path toward a 2-byte peer needs the AS4_PATH shadow
    if !ctx.asn4 {
        if let Some(path) = attributes.as_path() {
            if path.has_four_byte_asn() {
                let shadow = path.clone();
                attributes.insert(Attribute::As4Path(shadow));
            }
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(family) = self.eor {
            return write!(f, "<Update eor {}>", family);
        }
        write!(
            f,
            "<Update announced={} withdrawn={}>",
            self.announced.len(),
            self.withdrawn.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::attribute::{AsPath, Origin};
    use crate::wire::nlri::Cidr;

    fn ebgp_ctx() -> CodecContext {
        CodecContext {
            asn4: true,
            local_asn: 65000,
            peer_asn: 65001,
            ..Default::default()
        }
    }

    fn ibgp_ctx() -> CodecContext {
        CodecContext {
            asn4: true,
            local_asn: 65000,
            peer_asn: 65000,
            ..Default::default()
        }
    }

    fn v4_route(prefix: &str, mask: u8) -> Nlri {
        Nlri::unicast(Cidr::from_ip(prefix.parse().unwrap(), mask), None)
    }

    #[test]
    fn test_announce_wire_image() {
        // announce with next-hop and local-pref on iBGP
        let ctx = ibgp_ctx();
        let registry = nlri::Registry::default();
        let mut attributes = AttributeCollection::new();
        attributes.insert(Attribute::NextHop("10.0.0.2".parse().unwrap()));
        attributes.insert(Attribute::LocalPref(200));
        let update = Update::new(attributes, vec![v4_route("192.0.2.0", 24)], vec![]);

        let payload = update.pack(&ctx);
        // withdrawn-length == 0
        assert_eq!(&payload[..2], &[0, 0]);

        let decoded = Update::unpack(&payload, &ctx, &registry).unwrap();
        assert_eq!(decoded.announced, vec![v4_route("192.0.2.0", 24)]);
        assert_eq!(decoded.attributes.origin(), Some(Origin::Igp));
        assert!(decoded.attributes.as_path().unwrap().is_empty());
        assert_eq!(
            decoded.attributes.next_hop(),
            Some("10.0.0.2".parse().unwrap())
        );
        assert_eq!(decoded.attributes.local_pref(), Some(200));
    }

    #[test]
    fn test_ebgp_defaults() {
        let ctx = ebgp_ctx();
        let registry = nlri::Registry::default();
        let mut attributes = AttributeCollection::new();
        attributes.insert(Attribute::NextHop("10.0.0.2".parse().unwrap()));
        attributes.insert(Attribute::LocalPref(200));
        let update = Update::new(attributes, vec![v4_route("192.0.2.0", 24)], vec![]);

        let decoded = Update::unpack(&update.pack(&ctx), &ctx, &registry).unwrap();
        // AS_PATH defaults to [local-asn], LOCAL_PREF is not sent to eBGP
        assert_eq!(decoded.attributes.as_path().unwrap().asns(), vec![65000]);
        assert_eq!(decoded.attributes.local_pref(), None);
    }

    #[test]
    fn test_withdraw_wire_image() {
        let ctx = ibgp_ctx();
        let registry = nlri::Registry::default();
        let update = Update::new(
            AttributeCollection::new(),
            vec![],
            vec![v4_route("192.0.2.0", 24)],
        );
        let payload = update.pack(&ctx);
        // withdrawn-length 4, attributes-length 0
        assert_eq!(&payload[..2], &[0, 4]);
        assert_eq!(&payload[6..8], &[0, 0]);

        let decoded = Update::unpack(&payload, &ctx, &registry).unwrap();
        assert_eq!(decoded.withdrawn, vec![v4_route("192.0.2.0", 24)]);
        assert!(decoded.attributes.is_empty());
    }

    #[test]
    fn test_length_bookkeeping_violation() {
        let ctx = ibgp_ctx();
        let registry = nlri::Registry::default();
        // attributes-length claims more bytes than the payload holds
        let payload = vec![0, 0, 0, 9, 0];
        let err = Update::unpack(&payload, &ctx, &registry).unwrap_err();
        assert_eq!((err.code, err.subcode), (3, 1));
    }

    #[test]
    fn test_eor_ipv4() {
        let ctx = ibgp_ctx();
        let registry = nlri::Registry::default();
        let payload = Update::eor(Family::IPV4_UNICAST).pack(&ctx);
        assert_eq!(payload, vec![0, 0, 0, 0]);
        let decoded = Update::unpack(&payload, &ctx, &registry).unwrap();
        assert_eq!(decoded.eor, Some(Family::IPV4_UNICAST));
    }

    #[test]
    fn test_eor_mp_family() {
        let ctx = ibgp_ctx();
        let registry = nlri::Registry::default();
        let family = Family::new(Afi::Ipv6, Safi::Unicast);
        let payload = Update::eor(family).pack(&ctx);
        let decoded = Update::unpack(&payload, &ctx, &registry).unwrap();
        assert_eq!(decoded.eor, Some(family));
    }

    #[test]
    fn test_ipv6_travels_in_mp_reach() {
        let ctx = ibgp_ctx();
        let registry = nlri::Registry::default();
        let family = Family::new(Afi::Ipv6, Safi::Unicast);
        let nlri = Nlri::Prefix(crate::wire::nlri::PrefixNlri {
            family,
            cidr: Cidr::from_ip("2001:db8::".parse().unwrap(), 32),
            path_id: None,
        });
        let mut attributes = AttributeCollection::new();
        attributes.insert(Attribute::NextHop("2001:db8::1".parse().unwrap()));
        let update = Update::new(attributes, vec![nlri.clone()], vec![]);

        let payload = update.pack(&ctx);
        let decoded = Update::unpack(&payload, &ctx, &registry).unwrap();
        assert_eq!(decoded.announced, vec![nlri]);
        assert_eq!(
            decoded.attributes.next_hop(),
            Some("2001:db8::1".parse().unwrap())
        );
        // nothing in the to-end IPv4 section
        let attrs_len = usize::from(u16::from_be_bytes([payload[2], payload[3]]));
        assert_eq!(payload.len(), 4 + attrs_len);
    }

    #[test]
    fn test_as4_shadow_toward_two_byte_peer() {
        let mut ctx = ebgp_ctx();
        ctx.asn4 = false;
        let registry = nlri::Registry::default();
        let mut attributes = AttributeCollection::new();
        attributes.insert(Attribute::NextHop("10.0.0.2".parse().unwrap()));
        attributes.insert(Attribute::AsPath(AsPath::sequence(vec![
            4_200_000_001,
            65001,
        ])));
        let update = Update::new(attributes, vec![v4_route("192.0.2.0", 24)], vec![]);
        let payload = update.pack(&ctx);

        // the receiving side (also 2-byte) merges AS4_PATH back
        let decoded = Update::unpack(&payload, &ctx, &registry).unwrap();
        assert_eq!(
            decoded.attributes.as_path().unwrap().asns(),
            vec![4_200_000_001, 65001]
        );
    }
}
