use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::wire::family::Family;
use crate::wire::{Notify, Reader};

/// Enhanced route-refresh subtypes (RFC 7313)
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshSubtype {
    Request,
    Begin,
    End,
}

impl RefreshSubtype {
    fn code(self) -> u8 {
        match self {
            RefreshSubtype::Request => 0,
            RefreshSubtype::Begin => 1,
            RefreshSubtype::End => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RefreshSubtype::Request),
            1 => Some(RefreshSubtype::Begin),
            2 => Some(RefreshSubtype::End),
            _ => None,
        }
    }
}

impl fmt::Display for RefreshSubtype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RefreshSubtype::Request => "request",
            RefreshSubtype::Begin => "begin",
            RefreshSubtype::End => "end",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RouteRefresh {
    pub family: Family,
    pub subtype: RefreshSubtype,
}

impl RouteRefresh {
    pub fn request(family: Family) -> Self {
        Self {
            family,
            subtype: RefreshSubtype::Request,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u16(self.family.afi.code());
        buf.put_u8(self.subtype.code());
        buf.put_u8(self.family.safi.code());
        buf.to_vec()
    }

    pub fn unpack(payload: &[u8]) -> Result<Self, Notify> {
        let mut reader = Reader::new(payload);
        let afi = reader.u16().map_err(|_| Notify::new(7, 1))?;
        let subtype = reader.u8().map_err(|_| Notify::new(7, 1))?;
        let safi = reader.u8().map_err(|_| Notify::new(7, 1))?;
        let family = Family::from_codes(afi, safi).ok_or_else(|| Notify::new(7, 1))?;
        let subtype = RefreshSubtype::from_code(subtype).ok_or_else(|| Notify::new(7, 1))?;
        Ok(Self { family, subtype })
    }
}

impl fmt::Display for RouteRefresh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<RouteRefresh {} {}>", self.family, self.subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let refresh = RouteRefresh::request(Family::IPV4_UNICAST);
        assert_eq!(refresh.pack(), vec![0, 1, 0, 1]);
        assert_eq!(RouteRefresh::unpack(&refresh.pack()).unwrap(), refresh);
    }

    #[test]
    fn test_unknown_family() {
        assert!(RouteRefresh::unpack(&[0, 9, 0, 1]).is_err());
    }
}
