use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::wire::{Reader, Truncated};

pub const AS_TRANS: u32 = 23456;

const SEGMENT_SET: u8 = 1;
const SEGMENT_SEQUENCE: u8 = 2;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Segment {
    Set(Vec<u32>),
    Sequence(Vec<u32>),
}

impl Segment {
    fn kind(&self) -> u8 {
        match self {
            Segment::Set(_) => SEGMENT_SET,
            Segment::Sequence(_) => SEGMENT_SEQUENCE,
        }
    }

    fn asns(&self) -> &[u32] {
        match self {
            Segment::Set(asns) | Segment::Sequence(asns) => asns,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct AsPath {
    pub segments: Vec<Segment>,
}

impl AsPath {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn sequence(asns: Vec<u32>) -> Self {
        if asns.is_empty() {
            return Self::empty();
        }
        Self {
            segments: vec![Segment::Sequence(asns)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// All ASNs in wire order, sets flattened
    pub fn asns(&self) -> Vec<u32> {
        self.segments
            .iter()
            .flat_map(|segment| segment.asns().iter().copied())
            .collect()
    }

    /// Does packing this path toward a 2-byte peer lose information?
    pub fn has_four_byte_asn(&self) -> bool {
        self.asns().iter().any(|asn| *asn > u32::from(u16::MAX))
    }

    pub fn read(reader: &mut Reader, asn4: bool) -> Result<Self, Truncated> {
        let mut segments = Vec::with_capacity(1);
        while !reader.is_empty() {
            let kind = reader.u8()?;
            let count = usize::from(reader.u8()?);
            let mut asns = Vec::with_capacity(count);
            for _ in 0..count {
                let asn = if asn4 {
                    reader.u32()?
                } else {
                    u32::from(reader.u16()?)
                };
                asns.push(asn);
            }
            match kind {
                SEGMENT_SET => segments.push(Segment::Set(asns)),
                SEGMENT_SEQUENCE => segments.push(Segment::Sequence(asns)),
                _ => return Err(Truncated),
            }
        }
        Ok(Self { segments })
    }

    /// Pack with 4-byte ASNs, or 2-byte with AS_TRANS substitution
    pub fn write(&self, buf: &mut BytesMut, asn4: bool) {
        for segment in &self.segments {
            buf.put_u8(segment.kind());
            buf.put_u8(segment.asns().len() as u8);
            for asn in segment.asns() {
                if asn4 {
                    buf.put_u32(*asn);
                } else if *asn > u32::from(u16::MAX) {
                    buf.put_u16(AS_TRANS as u16);
                } else {
                    buf.put_u16(*asn as u16);
                }
            }
        }
    }

    /// RFC 4893 §4.2.3: reconstruct the real path from AS_PATH (2-byte,
    /// AS_TRANS-mangled) and AS4_PATH. When the AS2 path is shorter than
    /// AS4_PATH the AS2 path is kept as-is; otherwise the trailing
    /// `len(AS4_PATH)` ASNs are replaced by the AS4 path.
    pub fn merge_as4(as2: &AsPath, as4: &AsPath) -> AsPath {
        let as2_asns = as2.asns();
        let as4_asns = as4.asns();
        if as2_asns.len() < as4_asns.len() {
            return as2.clone();
        }
        let keep = as2_asns.len() - as4_asns.len();
        let merged: Vec<u32> = as2_asns[..keep]
            .iter()
            .copied()
            .chain(as4_asns.into_iter())
            .collect();
        AsPath::sequence(merged)
    }
}

impl fmt::Display for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            let asns: Vec<String> = segment.asns().iter().map(|a| a.to_string()).collect();
            match segment {
                Segment::Sequence(_) => write!(f, "{}", asns.join(" "))?,
                Segment::Set(_) => write!(f, "( {} )", asns.join(" "))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_two_byte() {
        let path = AsPath::sequence(vec![65000, 65001]);
        let mut buf = BytesMut::new();
        path.write(&mut buf, false);
        assert_eq!(&buf[..], &[2, 2, 0xfd, 0xe8, 0xfd, 0xe9]);
        let mut reader = Reader::new(&buf);
        assert_eq!(AsPath::read(&mut reader, false).unwrap(), path);
    }

    #[test]
    fn test_as_trans_substitution() {
        let path = AsPath::sequence(vec![4_200_000_001, 65001]);
        let mut buf = BytesMut::new();
        path.write(&mut buf, false);
        let mut reader = Reader::new(&buf);
        let reread = AsPath::read(&mut reader, false).unwrap();
        assert_eq!(reread.asns(), vec![AS_TRANS, 65001]);

        let mut buf = BytesMut::new();
        path.write(&mut buf, true);
        let mut reader = Reader::new(&buf);
        let reread = AsPath::read(&mut reader, true).unwrap();
        assert_eq!(reread, path);
    }

    #[test]
    fn test_merge_as4() {
        // RFC 4893 example: AS_PATH=[23456, 23456, 65001], AS4_PATH=[4200000001, 65001]
        let as2 = AsPath::sequence(vec![23456, 23456, 65001]);
        let as4 = AsPath::sequence(vec![4_200_000_001, 65001]);
        let merged = AsPath::merge_as4(&as2, &as4);
        assert_eq!(merged.asns(), vec![23456, 4_200_000_001, 65001]);

        // AS2 shorter than AS4: keep AS2
        let as2 = AsPath::sequence(vec![23456]);
        let merged = AsPath::merge_as4(&as2, &as4);
        assert_eq!(merged.asns(), vec![23456]);

        // equal length: AS4 wins entirely
        let as2 = AsPath::sequence(vec![23456, 23456]);
        let merged = AsPath::merge_as4(&as2, &as4);
        assert_eq!(merged.asns(), vec![4_200_000_001, 65001]);
    }

    #[test]
    fn test_display() {
        let path = AsPath {
            segments: vec![
                Segment::Sequence(vec![65000, 65001]),
                Segment::Set(vec![65100, 65101]),
            ],
        };
        assert_eq!(path.to_string(), "65000 65001 ( 65100 65101 )");
    }
}
