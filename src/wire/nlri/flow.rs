//! Flowspec NLRI (RFC 5575 / RFC 8955): an ordered list of traffic-match
//! components. The action travels separately as extended communities.

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde_json::json;

use crate::wire::family::{Afi, Family, Safi};
use crate::wire::nlri::cidr::Cidr;
use crate::wire::nlri::label::RouteDistinguisher;
use crate::wire::{Reader, Truncated};

const OP_END: u8 = 0x80;
const OP_AND: u8 = 0x40;
const OP_LEN_MASK: u8 = 0x30;

pub const NUM_LT: u8 = 0x04;
pub const NUM_GT: u8 = 0x02;
pub const NUM_EQ: u8 = 0x01;
pub const BIN_NOT: u8 = 0x02;
pub const BIN_MATCH: u8 = 0x01;

/// One (operator, value) pair of a flowspec component. `flags` holds the
/// AND bit plus the comparison/bitmask bits; the end-of-list bit and the
/// value length are computed at pack time.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FlowOp {
    pub flags: u8,
    pub value: u64,
}

impl FlowOp {
    pub fn numeric(flags: u8, value: u64) -> Self {
        Self {
            flags: flags & (OP_AND | NUM_LT | NUM_GT | NUM_EQ),
            value,
        }
    }

    pub fn binary(flags: u8, value: u64) -> Self {
        Self {
            flags: flags & (OP_AND | BIN_NOT | BIN_MATCH),
            value,
        }
    }

    fn value_length(&self) -> u8 {
        match self.value {
            v if v <= 0xff => 0,
            v if v <= 0xffff => 1,
            v if v <= 0xffff_ffff => 2,
            _ => 3,
        }
    }

    fn write(&self, buf: &mut BytesMut, last: bool) {
        let len_code = self.value_length();
        let mut op = (self.flags & !OP_LEN_MASK & !OP_END) | (len_code << 4);
        if last {
            op |= OP_END;
        }
        buf.put_u8(op);
        let width = 1usize << len_code;
        buf.put_slice(&self.value.to_be_bytes()[8 - width..]);
    }

    fn read(reader: &mut Reader) -> Result<(Self, bool), Truncated> {
        let op = reader.u8()?;
        let width = 1usize << ((op & OP_LEN_MASK) >> 4);
        let bytes = reader.take(width)?;
        let mut value = 0u64;
        for b in bytes {
            value = (value << 8) | u64::from(*b);
        }
        Ok((
            Self {
                flags: op & !(OP_END | OP_LEN_MASK),
                value,
            },
            op & OP_END != 0,
        ))
    }

    fn numeric_display(&self) -> String {
        let mut out = String::new();
        if self.flags & OP_AND != 0 {
            out.push('&');
        }
        if self.flags & NUM_LT != 0 {
            out.push('<');
        }
        if self.flags & NUM_GT != 0 {
            out.push('>');
        }
        if self.flags & NUM_EQ != 0 {
            out.push('=');
        }
        out.push_str(&self.value.to_string());
        out
    }

    fn binary_display(&self) -> String {
        let mut out = String::new();
        if self.flags & OP_AND != 0 {
            out.push('&');
        }
        if self.flags & BIN_NOT != 0 {
            out.push('!');
        }
        if self.flags & BIN_MATCH != 0 {
            out.push('=');
        }
        out.push_str(&self.value.to_string());
        out
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum FlowComponent {
    DestinationPrefix(Cidr),
    SourcePrefix(Cidr),
    IpProtocol(Vec<FlowOp>),
    Port(Vec<FlowOp>),
    DestinationPort(Vec<FlowOp>),
    SourcePort(Vec<FlowOp>),
    IcmpType(Vec<FlowOp>),
    IcmpCode(Vec<FlowOp>),
    TcpFlags(Vec<FlowOp>),
    PacketLength(Vec<FlowOp>),
    Dscp(Vec<FlowOp>),
    Fragment(Vec<FlowOp>),
    /// IPv6 only (RFC 8956)
    FlowLabel(Vec<FlowOp>),
}

impl FlowComponent {
    pub fn kind(&self) -> u8 {
        use FlowComponent::*;
        match self {
            DestinationPrefix(_) => 1,
            SourcePrefix(_) => 2,
            IpProtocol(_) => 3,
            Port(_) => 4,
            DestinationPort(_) => 5,
            SourcePort(_) => 6,
            IcmpType(_) => 7,
            IcmpCode(_) => 8,
            TcpFlags(_) => 9,
            PacketLength(_) => 10,
            Dscp(_) => 11,
            Fragment(_) => 12,
            FlowLabel(_) => 13,
        }
    }

    pub fn name(&self) -> &'static str {
        use FlowComponent::*;
        match self {
            DestinationPrefix(_) => "destination",
            SourcePrefix(_) => "source",
            IpProtocol(_) => "protocol",
            Port(_) => "port",
            DestinationPort(_) => "destination-port",
            SourcePort(_) => "source-port",
            IcmpType(_) => "icmp-type",
            IcmpCode(_) => "icmp-code",
            TcpFlags(_) => "tcp-flags",
            PacketLength(_) => "packet-length",
            Dscp(_) => "dscp",
            Fragment(_) => "fragment",
            FlowLabel(_) => "flow-label",
        }
    }

    fn ops(&self) -> Option<&[FlowOp]> {
        use FlowComponent::*;
        match self {
            DestinationPrefix(_) | SourcePrefix(_) => None,
            IpProtocol(ops) | Port(ops) | DestinationPort(ops) | SourcePort(ops)
            | IcmpType(ops) | IcmpCode(ops) | TcpFlags(ops) | PacketLength(ops) | Dscp(ops)
            | Fragment(ops) | FlowLabel(ops) => Some(ops),
        }
    }

    fn is_binary(&self) -> bool {
        matches!(self, FlowComponent::TcpFlags(_) | FlowComponent::Fragment(_))
    }

    fn write(&self, buf: &mut BytesMut, afi: Afi) {
        buf.put_u8(self.kind());
        match self {
            FlowComponent::DestinationPrefix(cidr) | FlowComponent::SourcePrefix(cidr) => {
                buf.put_u8(cidr.mask());
                if afi == Afi::Ipv6 {
                    // pattern offset, always zero here
                    buf.put_u8(0);
                }
                cidr.write_packed(buf);
            }
            _ => {
                let ops = self.ops().expect("operator component");
                let last = ops.len().saturating_sub(1);
                for (i, op) in ops.iter().enumerate() {
                    op.write(buf, i == last);
                }
            }
        }
    }

    fn read(reader: &mut Reader, afi: Afi) -> Result<Self, Truncated> {
        let kind = reader.u8()?;
        if let 1 | 2 = kind {
            let mask = reader.u8()?;
            if afi == Afi::Ipv6 {
                let _offset = reader.u8()?;
            }
            let cidr = Cidr::read_masked(reader, afi, mask)?;
            return Ok(if kind == 1 {
                FlowComponent::DestinationPrefix(cidr)
            } else {
                FlowComponent::SourcePrefix(cidr)
            });
        }
        let mut ops = Vec::with_capacity(1);
        loop {
            let (op, end) = FlowOp::read(reader)?;
            ops.push(op);
            if end {
                break;
            }
        }
        match kind {
            3 => Ok(FlowComponent::IpProtocol(ops)),
            4 => Ok(FlowComponent::Port(ops)),
            5 => Ok(FlowComponent::DestinationPort(ops)),
            6 => Ok(FlowComponent::SourcePort(ops)),
            7 => Ok(FlowComponent::IcmpType(ops)),
            8 => Ok(FlowComponent::IcmpCode(ops)),
            9 => Ok(FlowComponent::TcpFlags(ops)),
            10 => Ok(FlowComponent::PacketLength(ops)),
            11 => Ok(FlowComponent::Dscp(ops)),
            12 => Ok(FlowComponent::Fragment(ops)),
            13 => Ok(FlowComponent::FlowLabel(ops)),
            _ => Err(Truncated),
        }
    }

    fn display_value(&self) -> String {
        match self {
            FlowComponent::DestinationPrefix(cidr) | FlowComponent::SourcePrefix(cidr) => {
                cidr.to_string()
            }
            _ => {
                let ops = self.ops().expect("operator component");
                let rendered: Vec<String> = ops
                    .iter()
                    .map(|op| {
                        if self.is_binary() {
                            op.binary_display()
                        } else {
                            op.numeric_display()
                        }
                    })
                    .collect();
                rendered.join(" ")
            }
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FlowNlri {
    pub family: Family,
    pub rd: Option<RouteDistinguisher>,
    pub components: Vec<FlowComponent>,
}

impl FlowNlri {
    pub fn new(afi: Afi, components: Vec<FlowComponent>) -> Self {
        Self {
            family: Family::new(afi, Safi::Flow),
            rd: None,
            components,
        }
    }

    pub fn with_rd(afi: Afi, rd: RouteDistinguisher, components: Vec<FlowComponent>) -> Self {
        Self {
            family: Family::new(afi, Safi::FlowVpn),
            rd: Some(rd),
            components,
        }
    }

    pub fn write(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        if let Some(rd) = &self.rd {
            rd.write(&mut body);
        }
        for component in &self.components {
            component.write(&mut body, self.family.afi);
        }
        if body.len() < 0xf0 {
            buf.put_u8(body.len() as u8);
        } else {
            buf.put_u16(0xf000 | body.len() as u16);
        }
        buf.put_slice(&body);
    }

    pub fn read(reader: &mut Reader, family: Family) -> Result<Self, Truncated> {
        let first = reader.u8()?;
        let length = if first >= 0xf0 {
            (usize::from(first & 0x0f) << 8) | usize::from(reader.u8()?)
        } else {
            usize::from(first)
        };
        let body = reader.take(length)?;
        let mut inner = Reader::new(body);
        let rd = if family.safi == Safi::FlowVpn {
            Some(RouteDistinguisher::read(&mut inner)?)
        } else {
            None
        };
        let mut components = Vec::with_capacity(2);
        while !inner.is_empty() {
            components.push(FlowComponent::read(&mut inner, family.afi)?);
        }
        Ok(Self {
            family,
            rd,
            components,
        })
    }

    pub fn json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(rd) = &self.rd {
            obj.insert("rd".to_string(), json!(rd.to_string()));
        }
        for component in &self.components {
            obj.insert(
                component.name().to_string(),
                json!(component.display_value()),
            );
        }
        serde_json::Value::Object(obj)
    }
}

impl fmt::Display for FlowNlri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "flow")?;
        if let Some(rd) = &self.rd {
            write!(f, " rd {}", rd)?;
        }
        for component in &self.components {
            write!(f, " {} {}", component.name(), component.display_value())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlowNlri {
        FlowNlri::new(
            Afi::Ipv4,
            vec![
                FlowComponent::DestinationPrefix(Cidr::from_ip("192.0.2.0".parse().unwrap(), 24)),
                FlowComponent::SourcePort(vec![FlowOp::numeric(NUM_EQ, 80)]),
            ],
        )
    }

    #[test]
    fn test_wire_image() {
        let mut buf = BytesMut::new();
        sample().write(&mut buf);
        // length, dst-prefix(1) /24 192.0.2, src-port(6) end|eq 80
        assert_eq!(
            &buf[..],
            &[0x08, 0x01, 0x18, 0xc0, 0x00, 0x02, 0x06, 0x81, 0x50]
        );
    }

    #[test]
    fn test_roundtrip() {
        let nlri = sample();
        let mut buf = BytesMut::new();
        nlri.write(&mut buf);
        let mut reader = Reader::new(&buf);
        let decoded = FlowNlri::read(&mut reader, Family::new(Afi::Ipv4, Safi::Flow)).unwrap();
        assert_eq!(decoded, nlri);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            sample().to_string(),
            "flow destination 192.0.2.0/24 source-port =80"
        );
    }

    #[test]
    fn test_two_byte_operator_value() {
        let nlri = FlowNlri::new(
            Afi::Ipv4,
            vec![FlowComponent::DestinationPort(vec![
                FlowOp::numeric(NUM_GT, 8000),
                FlowOp::numeric(OP_AND | NUM_LT | NUM_EQ, 8080),
            ])],
        );
        let mut buf = BytesMut::new();
        nlri.write(&mut buf);
        let mut reader = Reader::new(&buf);
        let decoded = FlowNlri::read(&mut reader, Family::new(Afi::Ipv4, Safi::Flow)).unwrap();
        assert_eq!(decoded, nlri);
    }

    #[test]
    fn test_vpn_rd_roundtrip() {
        let nlri = FlowNlri::with_rd(
            Afi::Ipv4,
            "65000:1".parse().unwrap(),
            vec![FlowComponent::IpProtocol(vec![FlowOp::numeric(NUM_EQ, 6)])],
        );
        let mut buf = BytesMut::new();
        nlri.write(&mut buf);
        let mut reader = Reader::new(&buf);
        let decoded = FlowNlri::read(&mut reader, Family::new(Afi::Ipv4, Safi::FlowVpn)).unwrap();
        assert_eq!(decoded, nlri);
    }
}
