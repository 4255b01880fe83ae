//! Standard, extended and large community values with the operator-facing
//! text forms used by both the configuration and the API route parser.

use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::slice::Iter;

use serde::Serialize;

use crate::utils::u32_to_dotted;

const NO_EXPORT: u32 = 0xffff_ff01;
const NO_ADVERTISE: u32 = 0xffff_ff02;
const NO_EXPORT_SUBCONFED: u32 = 0xffff_ff03;

#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Community {
    Standard(u32),
    Extended(u64),
    Large((u32, u32, u32)),
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Community::Standard(NO_EXPORT) => write!(f, "no-export"),
            Community::Standard(NO_ADVERTISE) => write!(f, "no-advertise"),
            Community::Standard(value) => write!(f, "{}", u32_to_dotted(*value, ':')),
            Community::Extended(value) => write!(f, "{}", ext_community_to_display(*value)),
            Community::Large((global, local1, local2)) => {
                write!(f, "{}:{}:{}", global, local1, local2)
            }
        }
    }
}

impl TryFrom<&str> for Community {
    type Error = io::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid =
            |value: &str| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid community '{}'", value));

        match value {
            "no-export" => return Ok(Community::Standard(NO_EXPORT)),
            "no-advertise" => return Ok(Community::Standard(NO_ADVERTISE)),
            "no-export-subconfed" => return Ok(Community::Standard(NO_EXPORT_SUBCONFED)),
            _ => (),
        }
        if let Some(hex) = value.strip_prefix("0x") {
            let raw = u64::from_str_radix(hex, 16).map_err(|_| invalid(value))?;
            return Ok(Community::Extended(raw));
        }
        // named extended communities: target:asn:value, origin:asn:value,
        // redirect:asn:value
        let chunks: Vec<_> = value.split(':').collect();
        match chunks.len() {
            1 => chunks[0]
                .parse()
                .map(Community::Standard)
                .map_err(|_| invalid(value)),
            2 => {
                let a: u32 = chunks[0].parse().map_err(|_| invalid(value))?;
                let b: u32 = chunks[1].parse().map_err(|_| invalid(value))?;
                if a > u32::from(u16::MAX) || b > u32::from(u16::MAX) {
                    return Err(invalid(value));
                }
                Ok(Community::Standard((a << 16) + b))
            }
            3 => {
                if let Ok(global) = chunks[0].parse::<u32>() {
                    let local1: u32 = chunks[1].parse().map_err(|_| invalid(value))?;
                    let local2: u32 = chunks[2].parse().map_err(|_| invalid(value))?;
                    return Ok(Community::Large((global, local1, local2)));
                }
                let subtype: u8 = match chunks[0] {
                    "target" => 0x02,
                    "origin" => 0x03,
                    "redirect" => 0x08,
                    _ => return Err(invalid(value)),
                };
                let assigned: u32 = chunks[2].parse().map_err(|_| invalid(value))?;
                if let Ok(ip) = chunks[1].parse::<Ipv4Addr>() {
                    let mut bytes = [0u8; 8];
                    bytes[0] = 0x01;
                    bytes[1] = subtype;
                    bytes[2..6].copy_from_slice(&ip.octets());
                    bytes[6..8].copy_from_slice(&(assigned as u16).to_be_bytes());
                    return Ok(Community::Extended(u64::from_be_bytes(bytes)));
                }
                let asn: u32 = chunks[1].parse().map_err(|_| invalid(value))?;
                let mut bytes = [0u8; 8];
                if subtype == 0x08 {
                    bytes[0] = 0x80;
                } else {
                    bytes[0] = 0x00;
                }
                bytes[1] = subtype;
                bytes[2..4].copy_from_slice(&(asn as u16).to_be_bytes());
                bytes[4..8].copy_from_slice(&assigned.to_be_bytes());
                Ok(Community::Extended(u64::from_be_bytes(bytes)))
            }
            _ => Err(invalid(value)),
        }
    }
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct CommunityList(pub Vec<Community>);

impl CommunityList {
    pub fn iter(&self) -> Iter<Community> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn standard(&self) -> Vec<u32> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::Standard(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }

    pub fn extended(&self) -> Vec<u64> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::Extended(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }

    pub fn large(&self) -> Vec<(u32, u32, u32)> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Community::Large(comm) => Some(*comm),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for CommunityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let communities = self
            .0
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<String>>()
            .join(" ");
        write!(f, "{}", communities)
    }
}

pub fn ext_community_to_display(value: u64) -> String {
    let c_type: u16 = ((value >> 48) & 0xffff) as u16;
    match c_type {
        // 2-octet AS specific (RFC 4360)
        0x0002 => {
            let asn: u16 = ((value >> 32) & 0xffff) as u16;
            let assigned: u32 = (value & 0xffff_ffff) as u32;
            format!("target:{}:{}", asn, assigned)
        }
        0x0003 => {
            let asn: u16 = ((value >> 32) & 0xffff) as u16;
            let assigned: u32 = (value & 0xffff_ffff) as u32;
            format!("origin:{}:{}", asn, assigned)
        }
        // IPv4 address specific
        0x0102 => {
            let addr: u32 = ((value >> 16) & 0xffff_ffff) as u32;
            let assigned: u16 = (value & 0xffff) as u16;
            format!("target:{}:{}", IpAddr::from(addr.to_be_bytes()), assigned)
        }
        // flowspec traffic-rate
        0x8006 => {
            let asn: u16 = ((value >> 32) & 0xffff) as u16;
            let rate = f32::from_bits((value & 0xffff_ffff) as u32);
            format!("rate-limit:{}:{}", asn, rate)
        }
        // flowspec traffic-action
        0x8007 => {
            let action: u32 = (value & 0xffff_ffff) as u32;
            let sample = action & 0b10 != 0;
            let terminal = action & 0b01 != 0;
            format!("action:sample={}:terminal={}", sample, terminal)
        }
        // flowspec redirect
        0x8008 => {
            let asn: u16 = ((value >> 32) & 0xffff) as u16;
            let assigned: u32 = (value & 0xffff_ffff) as u32;
            format!("redirect:{}:{}", asn, assigned)
        }
        // flowspec mark
        0x8009 => {
            let dscp: u8 = (value & 0xff) as u8;
            format!("mark:{}", dscp)
        }
        _ => format!("0x{:016x}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_parse_display() {
        let comm = Community::try_from("65000:100").unwrap();
        assert_eq!(comm, Community::Standard(0xfde8_0064));
        assert_eq!(comm.to_string(), "65000:100");

        assert_eq!(
            Community::try_from("no-export").unwrap(),
            Community::Standard(0xffff_ff01)
        );
        assert_eq!(Community::Standard(0xffff_ff01).to_string(), "no-export");
    }

    #[test]
    fn test_large_parse() {
        let comm = Community::try_from("4200000000:1:2").unwrap();
        assert_eq!(comm, Community::Large((4_200_000_000, 1, 2)));
        assert_eq!(comm.to_string(), "4200000000:1:2");
    }

    #[test]
    fn test_target_parse_display() {
        let comm = Community::try_from("target:65000:100").unwrap();
        match comm {
            Community::Extended(value) => {
                assert_eq!(
                    value.to_be_bytes(),
                    [0x00, 0x02, 0xfd, 0xe8, 0x00, 0x00, 0x00, 0x64]
                );
                assert_eq!(ext_community_to_display(value), "target:65000:100");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_hex_extended() {
        let comm = Community::try_from("0x8006000000000000").unwrap();
        assert_eq!(comm, Community::Extended(0x8006_0000_0000_0000));
    }

    #[test]
    fn test_redirect() {
        let comm = Community::try_from("redirect:65000:302").unwrap();
        match comm {
            Community::Extended(value) => {
                assert_eq!((value >> 48) as u16, 0x8008);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid() {
        assert!(Community::try_from("not-a-community").is_err());
        assert!(Community::try_from("70000:1").is_err());
    }
}
