use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::wire::{Reader, Truncated};

/// The 3-byte label value that withdraws a labeled route (RFC 3107 §3)
pub const WITHDRAW_LABEL: u32 = 0x800000;
const BOTTOM_OF_STACK: u32 = 0x000001;

/// An ordered MPLS label stack. Values are stored as raw 24-bit wire words
/// (20-bit label, 3 experimental bits, bottom-of-stack bit).
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct LabelStack(Vec<u32>);

impl LabelStack {
    pub fn new(labels: Vec<u32>) -> Self {
        // store 20-bit label values shifted into wire position
        Self(labels.into_iter().map(|l| (l & 0xfffff) << 4).collect())
    }

    pub fn withdraw() -> Self {
        Self(vec![WITHDRAW_LABEL])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 20-bit label values, top of stack first
    pub fn values(&self) -> Vec<u32> {
        self.0.iter().map(|raw| raw >> 4).collect()
    }

    pub fn bit_length(&self) -> u8 {
        (self.0.len() * 24) as u8
    }

    /// Read 3-byte label entries until the bottom-of-stack bit (or the
    /// withdraw label, which always stands alone). A prefix's mask-bit
    /// budget caps a real stack well below 10 entries.
    pub fn read(reader: &mut Reader) -> Result<Self, Truncated> {
        let mut labels = Vec::with_capacity(1);
        loop {
            if labels.len() == 10 {
                return Err(Truncated);
            }
            let bytes = reader.take(3)?;
            let raw = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
            labels.push(raw);
            if raw == WITHDRAW_LABEL || raw & BOTTOM_OF_STACK != 0 {
                break;
            }
        }
        Ok(Self(labels))
    }

    pub fn write(&self, buf: &mut BytesMut) {
        let last = self.0.len().saturating_sub(1);
        for (i, raw) in self.0.iter().enumerate() {
            let mut word = *raw;
            if word != WITHDRAW_LABEL && i == last {
                word |= BOTTOM_OF_STACK;
            }
            buf.put_slice(&word.to_be_bytes()[1..]);
        }
    }
}

impl fmt::Display for LabelStack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let labels: Vec<String> = self.values().iter().map(|l| l.to_string()).collect();
        write!(f, "[ {} ]", labels.join(", "))
    }
}

/// 8-byte route distinguisher; three encodings (RFC 4364 §4.2)
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RouteDistinguisher([u8; 8]);

impl RouteDistinguisher {
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn from_asn(asn: u16, assigned: u32) -> Self {
        let mut bytes = [0u8; 8];
        bytes[2..4].copy_from_slice(&asn.to_be_bytes());
        bytes[4..8].copy_from_slice(&assigned.to_be_bytes());
        Self(bytes)
    }

    pub fn from_ip(ip: Ipv4Addr, assigned: u16) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0..2].copy_from_slice(&1u16.to_be_bytes());
        bytes[2..6].copy_from_slice(&ip.octets());
        bytes[6..8].copy_from_slice(&assigned.to_be_bytes());
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn read(reader: &mut Reader) -> Result<Self, Truncated> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(reader.take(8)?);
        Ok(Self(bytes))
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

// Three RD encodings share one display shape: "<admin>:<assigned>"
impl fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = u16::from_be_bytes([self.0[0], self.0[1]]);
        match kind {
            0 => {
                let asn = u16::from_be_bytes([self.0[2], self.0[3]]);
                let assigned = u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]]);
                write!(f, "{}:{}", asn, assigned)
            }
            1 => {
                let ip = Ipv4Addr::new(self.0[2], self.0[3], self.0[4], self.0[5]);
                let assigned = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "{}:{}", ip, assigned)
            }
            _ => {
                let asn = u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]]);
                let assigned = u16::from_be_bytes([self.0[6], self.0[7]]);
                write!(f, "{}:{}", asn, assigned)
            }
        }
    }
}

impl FromStr for RouteDistinguisher {
    type Err = String;

    /// "<asn>:<assigned>" or "<ipv4>:<assigned>"
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.rsplitn(2, ':');
        let assigned = parts
            .next()
            .ok_or_else(|| format!("invalid route-distinguisher '{}'", value))?;
        let admin = parts
            .next()
            .ok_or_else(|| format!("invalid route-distinguisher '{}'", value))?;
        if let Ok(ip) = admin.parse::<Ipv4Addr>() {
            let assigned: u16 = assigned
                .parse()
                .map_err(|_| format!("invalid route-distinguisher '{}'", value))?;
            return Ok(Self::from_ip(ip, assigned));
        }
        let asn: u32 = admin
            .parse()
            .map_err(|_| format!("invalid route-distinguisher '{}'", value))?;
        if asn > u32::from(u16::MAX) {
            // type 2: 4-byte ASN administrator
            let mut bytes = [0u8; 8];
            bytes[0..2].copy_from_slice(&2u16.to_be_bytes());
            bytes[2..6].copy_from_slice(&asn.to_be_bytes());
            let assigned: u16 = assigned
                .parse()
                .map_err(|_| format!("invalid route-distinguisher '{}'", value))?;
            bytes[6..8].copy_from_slice(&assigned.to_be_bytes());
            return Ok(Self(bytes));
        }
        let assigned: u32 = assigned
            .parse()
            .map_err(|_| format!("invalid route-distinguisher '{}'", value))?;
        Ok(Self::from_asn(asn as u16, assigned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_stack_roundtrip() {
        let stack = LabelStack::new(vec![100, 200]);
        let mut buf = BytesMut::new();
        stack.write(&mut buf);
        assert_eq!(buf.len(), 6);
        // bottom-of-stack bit set only on the last entry
        assert_eq!(buf[2] & 0x01, 0);
        assert_eq!(buf[5] & 0x01, 1);

        let mut reader = Reader::new(&buf);
        let decoded = LabelStack::read(&mut reader).unwrap();
        assert_eq!(decoded.values(), vec![100, 200]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_withdraw_label() {
        let mut buf = BytesMut::new();
        LabelStack::withdraw().write(&mut buf);
        assert_eq!(&buf[..], &[0x80, 0x00, 0x00]);
        let mut reader = Reader::new(&buf);
        let decoded = LabelStack::read(&mut reader).unwrap();
        assert_eq!(decoded.0, vec![WITHDRAW_LABEL]);
    }

    #[test]
    fn test_rd_parse_display() {
        let rd: RouteDistinguisher = "65000:100".parse().unwrap();
        assert_eq!(rd.to_string(), "65000:100");
        assert_eq!(&rd.bytes()[..2], &[0, 0]);

        let rd: RouteDistinguisher = "10.0.0.1:5".parse().unwrap();
        assert_eq!(rd.to_string(), "10.0.0.1:5");
        assert_eq!(&rd.bytes()[..2], &[0, 1]);

        let rd: RouteDistinguisher = "4200000000:1".parse().unwrap();
        assert_eq!(rd.to_string(), "4200000000:1");
        assert_eq!(&rd.bytes()[..2], &[0, 2]);
    }
}
