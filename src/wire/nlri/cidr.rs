use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

use crate::wire::family::Afi;
use crate::wire::{Reader, Truncated};

/// A packed prefix: address family, mask length in bits, and exactly
/// `ceil(mask / 8)` bytes of prefix. Immutable once built.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Cidr {
    afi: Afi,
    mask: u8,
    packed: Vec<u8>,
}

impl Cidr {
    pub fn new(afi: Afi, mask: u8, mut packed: Vec<u8>) -> Self {
        packed.truncate(Self::byte_length(mask));
        Self { afi, mask, packed }
    }

    pub fn from_ip(ip: IpAddr, mask: u8) -> Self {
        let (afi, octets) = match ip {
            IpAddr::V4(v4) => (Afi::Ipv4, v4.octets().to_vec()),
            IpAddr::V6(v6) => (Afi::Ipv6, v6.octets().to_vec()),
        };
        Self::new(afi, mask, octets)
    }

    fn byte_length(mask: u8) -> usize {
        (usize::from(mask) + 7) / 8
    }

    pub fn afi(&self) -> Afi {
        self.afi
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    /// Address form with the host bits zeroed
    pub fn ip(&self) -> IpAddr {
        match self.afi {
            Afi::Ipv4 => {
                let mut octets = [0u8; 4];
                octets[..self.packed.len().min(4)]
                    .copy_from_slice(&self.packed[..self.packed.len().min(4)]);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            _ => {
                let mut octets = [0u8; 16];
                octets[..self.packed.len().min(16)]
                    .copy_from_slice(&self.packed[..self.packed.len().min(16)]);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
        }
    }

    /// Read mask byte + packed prefix bytes
    pub fn read(reader: &mut Reader, afi: Afi) -> Result<Self, Truncated> {
        let mask = reader.u8()?;
        let max_bits = match afi {
            Afi::Ipv4 => 32,
            _ => 128,
        };
        if mask > max_bits {
            return Err(Truncated);
        }
        let packed = reader.take(Self::byte_length(mask))?.to_vec();
        Ok(Self { afi, mask, packed })
    }

    /// Read packed prefix bytes for an already-consumed mask (labeled and
    /// VPN NLRIs burn part of the mask-bit budget on labels/RD).
    pub fn read_masked(reader: &mut Reader, afi: Afi, mask: u8) -> Result<Self, Truncated> {
        let packed = reader.take(Self::byte_length(mask))?.to_vec();
        Ok(Self { afi, mask, packed })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.mask);
        buf.put_slice(&self.packed);
    }

    /// Packed prefix bytes without the leading mask octet
    pub fn write_packed(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.packed);
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip(), self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_to_mask() {
        let cidr = Cidr::from_ip("192.168.10.1".parse().unwrap(), 24);
        assert_eq!(cidr.packed(), &[192, 168, 10]);
        assert_eq!(cidr.to_string(), "192.168.10.1/24");

        let cidr = Cidr::from_ip("2001:db8::".parse().unwrap(), 32);
        assert_eq!(cidr.packed(), &[0x20, 0x01, 0x0d, 0xb8]);
    }

    #[test]
    fn test_read_write() {
        let cidr = Cidr::from_ip("10.0.0.0".parse().unwrap(), 9);
        let mut buf = BytesMut::new();
        cidr.write(&mut buf);
        assert_eq!(&buf[..], &[9, 10, 0]);

        let mut reader = Reader::new(&buf);
        let decoded = Cidr::read(&mut reader, Afi::Ipv4).unwrap();
        assert_eq!(decoded, cidr);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_invalid_mask() {
        let mut reader = Reader::new(&[42, 10, 0, 0, 0, 0, 0]);
        assert!(Cidr::read(&mut reader, Afi::Ipv4).is_err());
    }
}
