use std::fmt;

use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

/// Address Family Identifier (RFC 4760)
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Afi {
    Ipv4,
    Ipv6,
    L2vpn,
    BgpLs,
}

impl Afi {
    pub const fn code(self) -> u16 {
        match self {
            Afi::Ipv4 => 1,
            Afi::Ipv6 => 2,
            Afi::L2vpn => 25,
            Afi::BgpLs => 16388,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Afi::Ipv4),
            2 => Some(Afi::Ipv6),
            25 => Some(Afi::L2vpn),
            16388 => Some(Afi::BgpLs),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ipv4" => Some(Afi::Ipv4),
            "ipv6" => Some(Afi::Ipv6),
            "l2vpn" => Some(Afi::L2vpn),
            "bgp-ls" => Some(Afi::BgpLs),
            _ => None,
        }
    }
}

impl fmt::Display for Afi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Afi::Ipv4 => "ipv4",
            Afi::Ipv6 => "ipv6",
            Afi::L2vpn => "l2vpn",
            Afi::BgpLs => "bgp-ls",
        };
        write!(f, "{}", name)
    }
}

/// Subsequent Address Family Identifier
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Safi {
    Unicast,
    Multicast,
    /// Labeled unicast (RFC 3107 / RFC 8277)
    NlriMpls,
    McastVpn,
    Evpn,
    BgpLs,
    Mup,
    MplsVpn,
    /// Route-target constraint (RFC 4684)
    Rtc,
    Flow,
    FlowVpn,
}

impl Safi {
    pub const fn code(self) -> u8 {
        match self {
            Safi::Unicast => 1,
            Safi::Multicast => 2,
            Safi::NlriMpls => 4,
            Safi::McastVpn => 5,
            Safi::Evpn => 70,
            Safi::BgpLs => 71,
            Safi::Mup => 85,
            Safi::MplsVpn => 128,
            Safi::Rtc => 132,
            Safi::Flow => 133,
            Safi::FlowVpn => 134,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Safi::Unicast),
            2 => Some(Safi::Multicast),
            4 => Some(Safi::NlriMpls),
            5 => Some(Safi::McastVpn),
            70 => Some(Safi::Evpn),
            71 => Some(Safi::BgpLs),
            85 => Some(Safi::Mup),
            128 => Some(Safi::MplsVpn),
            132 => Some(Safi::Rtc),
            133 => Some(Safi::Flow),
            134 => Some(Safi::FlowVpn),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unicast" => Some(Safi::Unicast),
            "multicast" => Some(Safi::Multicast),
            "nlri-mpls" | "labeled-unicast" => Some(Safi::NlriMpls),
            "mcast-vpn" => Some(Safi::McastVpn),
            "evpn" => Some(Safi::Evpn),
            "bgp-ls" => Some(Safi::BgpLs),
            "mup" => Some(Safi::Mup),
            "mpls-vpn" => Some(Safi::MplsVpn),
            "rtc" | "route-target" => Some(Safi::Rtc),
            "flow" => Some(Safi::Flow),
            "flow-vpn" => Some(Safi::FlowVpn),
            _ => None,
        }
    }
}

impl fmt::Display for Safi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Safi::Unicast => "unicast",
            Safi::Multicast => "multicast",
            Safi::NlriMpls => "nlri-mpls",
            Safi::McastVpn => "mcast-vpn",
            Safi::Evpn => "evpn",
            Safi::BgpLs => "bgp-ls",
            Safi::Mup => "mup",
            Safi::MplsVpn => "mpls-vpn",
            Safi::Rtc => "rtc",
            Safi::Flow => "flow",
            Safi::FlowVpn => "flow-vpn",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Family {
    pub afi: Afi,
    pub safi: Safi,
}

impl Family {
    pub const IPV4_UNICAST: Family = Family {
        afi: Afi::Ipv4,
        safi: Safi::Unicast,
    };

    pub fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, safi }
    }

    pub fn from_codes(afi: u16, safi: u8) -> Option<Self> {
        Some(Self::new(Afi::from_code(afi)?, Safi::from_code(safi)?))
    }

    /// Parse "<afi> <safi>" or "<afi>-<safi>"
    pub fn from_name(name: &str) -> Option<Self> {
        let mut parts = name.splitn(2, |c| c == ' ' || c == '-');
        // "bgp-ls bgp-ls" contains a dash in the afi itself
        let text = name.trim();
        if let Some(rest) = text.strip_prefix("bgp-ls") {
            let safi = Safi::from_name(rest.trim().trim_start_matches('-').trim())?;
            return Some(Self::new(Afi::BgpLs, safi));
        }
        let afi = Afi::from_name(parts.next()?.trim())?;
        let safi = Safi::from_name(parts.next()?.trim())?;
        Some(Self::new(afi, safi))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.afi, self.safi)
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D>(deserializer: D) -> Result<Family, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Family::from_name(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("Unsupported family: '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error, StrDeserializer};
    use serde::de::IntoDeserializer;

    #[test]
    fn test_family_codes() {
        assert_eq!(Family::from_codes(1, 1), Some(Family::IPV4_UNICAST));
        assert_eq!(
            Family::from_codes(2, 133),
            Some(Family::new(Afi::Ipv6, Safi::Flow))
        );
        assert_eq!(Family::from_codes(3, 1), None);
        assert_eq!(
            Family::from_codes(16388, 71),
            Some(Family::new(Afi::BgpLs, Safi::BgpLs))
        );
    }

    #[test]
    fn test_family_names() {
        assert_eq!(
            Family::from_name("ipv4 unicast"),
            Some(Family::IPV4_UNICAST)
        );
        assert_eq!(
            Family::from_name("ipv4-labeled-unicast"),
            Some(Family::new(Afi::Ipv4, Safi::NlriMpls))
        );
        assert_eq!(
            Family::from_name("bgp-ls bgp-ls"),
            Some(Family::new(Afi::BgpLs, Safi::BgpLs))
        );
        assert_eq!(Family::IPV4_UNICAST.to_string(), "ipv4 unicast");
    }

    #[test]
    fn test_deserialize_family() {
        let deserializer: StrDeserializer<Error> = "ipv6 unicast".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::new(Afi::Ipv6, Safi::Unicast));

        let deserializer: StrDeserializer<Error> = "ipv4 flow".into_deserializer();
        let family = Family::deserialize(deserializer).unwrap();
        assert_eq!(family, Family::new(Afi::Ipv4, Safi::Flow));
    }
}
