//! Text parsing for route bodies as they appear on the API and in static
//! configuration: `route <prefix> next-hop <ip> …`, flowspec match/then
//! clauses, and the shared attribute expressions.

use std::convert::TryFrom;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::rib::Change;
use crate::utils::community::{Community, CommunityList};
use crate::wire::attribute::{AsPath, Attribute, AttributeCollection, Origin};
use crate::wire::family::{Afi, Family, Safi};
use crate::wire::nlri::{
    Cidr, FlowComponent, FlowNlri, FlowOp, LabeledNlri, LabelStack, Nlri, PrefixNlri,
    RouteDistinguisher, VpnNlri,
};
use crate::wire::nlri::flow::{BIN_MATCH, BIN_NOT, NUM_EQ, NUM_GT, NUM_LT};

/// Cap on `split` expansion so a typo cannot produce millions of routes
const MAX_SPLIT_ROUTES: usize = 4096;

#[derive(Debug, Error)]
#[error("ParseError: {reason}")]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        ParseError {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ParseError {
    fn from(error: std::io::Error) -> Self {
        ParseError::new(error.to_string())
    }
}

/// The routes produced by one `route …` body. `split` can expand a single
/// body into many changes; `withdraw` bodies start with their watchdog
/// held down.
#[derive(Debug)]
pub struct ParsedRoutes {
    pub changes: Vec<Change>,
    pub start_down_watchdogs: Vec<String>,
}

/// Convert an ASN string to a u32
/// E.g. "65000.100" -> 4259840100
pub fn asn_from_dotted(value: &str) -> Result<u32, ParseError> {
    let mut chunks = [0u32; 2];
    let check_for_overflow = value.contains('.');
    for (i, chunk) in value
        .splitn(2, '.')
        .collect::<Vec<&str>>()
        .into_iter()
        .rev()
        .enumerate()
    {
        let chunk: u32 = chunk
            .parse()
            .map_err(|err| ParseError::new(format!("{} '{}'", err, value)))?;
        if check_for_overflow && chunk > u32::from(u16::MAX) {
            return Err(ParseError::new(format!("Unsupported ASN '{}'", value)));
        }
        chunks[i] = chunk;
    }
    Ok((chunks[1] << 16) + chunks[0])
}

/// Convert a CIDR string (E.g. "192.168.0.0/24") to a packed prefix
pub fn cidr_from_str(prefix: &str) -> Result<Cidr, ParseError> {
    let (addr, mask) = match prefix.find('/') {
        Some(i) => {
            let (addr, mask) = prefix.split_at(i);
            (addr, &mask[1..])
        }
        None => return Err(ParseError::new(format!("Not a valid prefix: '{}'", prefix))),
    };
    let addr: IpAddr = addr
        .parse()
        .map_err(|err| ParseError::new(format!("{} '{}'", err, prefix)))?;
    let mask: u8 = mask
        .parse()
        .map_err(|err| ParseError::new(format!("{} '{}'", err, prefix)))?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if mask > max {
        return Err(ParseError::new(format!("Mask too long: '{}'", prefix)));
    }
    Ok(Cidr::from_ip(addr, mask))
}

/// "<afi> <safi>" out of two command words
pub fn family_from_words(words: &[&str]) -> Result<Family, ParseError> {
    if words.len() < 2 {
        return Err(ParseError::new("expected '<afi> <safi>'"));
    }
    Family::from_name(&format!("{} {}", words[0], words[1]))
        .ok_or_else(|| ParseError::new(format!("Unsupported family '{} {}'", words[0], words[1])))
}

struct RouteBody {
    attributes: AttributeCollection,
    labels: Option<LabelStack>,
    rd: Option<RouteDistinguisher>,
    path_id: Option<u32>,
    watchdog: Option<String>,
    start_withdrawn: bool,
    split: Option<u8>,
}

/// Parse a route body: `<prefix> [next-hop <ip>] [local-preference <n>] …`
/// The leading `route` keyword must already be consumed.
pub fn parse_route_body(body: &str, announce: bool) -> Result<ParsedRoutes, ParseError> {
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.is_empty() {
        return Err(ParseError::new("route body is empty"));
    }
    let cidr = cidr_from_str(words[0])?;
    let parsed = parse_route_attributes(&words[1..])?;

    let cidrs = match parsed.split {
        Some(new_mask) => split_cidr(&cidr, new_mask)?,
        None => vec![cidr],
    };

    let attributes = Arc::new(parsed.attributes);
    let labels = parsed.labels.clone();
    let rd = parsed.rd.clone();
    let path_id = parsed.path_id;
    let watchdog = parsed.watchdog.clone();
    let changes = cidrs
        .into_iter()
        .map(|cidr| {
            let nlri = build_nlri(cidr, &labels, &rd, path_id);
            if announce {
                Change::announce(nlri, attributes.clone()).with_watchdog(watchdog.clone())
            } else {
                Change::withdraw(nlri)
            }
        })
        .collect();

    let start_down_watchdogs = match (&parsed.watchdog, parsed.start_withdrawn) {
        (Some(name), true) => vec![name.clone()],
        _ => Vec::new(),
    };
    Ok(ParsedRoutes {
        changes,
        start_down_watchdogs,
    })
}

/// Parse `attributes <attrs> nlri <prefix> <prefix> …` into one change per
/// prefix, all sharing the attribute collection.
pub fn parse_attributes_body(body: &str, announce: bool) -> Result<ParsedRoutes, ParseError> {
    let (attr_part, nlri_part) = match body.find(" nlri ") {
        Some(i) => (&body[..i], &body[i + 6..]),
        None => return Err(ParseError::new("missing 'nlri' section")),
    };
    let words: Vec<&str> = attr_part.split_whitespace().collect();
    let parsed = parse_route_attributes(&words)?;
    let attributes = Arc::new(parsed.attributes);

    let mut changes = Vec::new();
    for prefix in nlri_part.split_whitespace() {
        let cidr = cidr_from_str(prefix)?;
        let nlri = build_nlri(cidr, &parsed.labels, &parsed.rd, parsed.path_id);
        changes.push(if announce {
            Change::announce(nlri, attributes.clone()).with_watchdog(parsed.watchdog.clone())
        } else {
            Change::withdraw(nlri)
        });
    }
    if changes.is_empty() {
        return Err(ParseError::new("empty nlri section"));
    }
    Ok(ParsedRoutes {
        changes,
        start_down_watchdogs: Vec::new(),
    })
}

fn build_nlri(
    cidr: Cidr,
    labels: &Option<LabelStack>,
    rd: &Option<RouteDistinguisher>,
    path_id: Option<u32>,
) -> Nlri {
    let afi = cidr.afi();
    match (labels, rd) {
        (Some(labels), Some(rd)) => Nlri::Vpn(VpnNlri {
            family: Family::new(afi, Safi::MplsVpn),
            rd: *rd,
            labels: labels.clone(),
            cidr,
            path_id,
        }),
        (Some(labels), None) => Nlri::Labeled(LabeledNlri {
            family: Family::new(afi, Safi::NlriMpls),
            cidr,
            labels: labels.clone(),
            path_id,
        }),
        _ => Nlri::Prefix(PrefixNlri {
            family: Family::new(afi, Safi::Unicast),
            cidr,
            path_id,
        }),
    }
}

fn parse_route_attributes(words: &[&str]) -> Result<RouteBody, ParseError> {
    let mut body = RouteBody {
        attributes: AttributeCollection::new(),
        labels: None,
        rd: None,
        path_id: None,
        watchdog: None,
        start_withdrawn: false,
        split: None,
    };
    let mut communities = CommunityList::default();
    let mut i = 0usize;

    let value_of = |words: &[&str], i: usize, keyword: &str| -> Result<String, ParseError> {
        words
            .get(i + 1)
            .map(|w| w.to_string())
            .ok_or_else(|| ParseError::new(format!("'{}' requires a value", keyword)))
    };

    while i < words.len() {
        match words[i] {
            "next-hop" => {
                let value = value_of(words, i, "next-hop")?;
                if value == "self" {
                    // resolved against the session's local address at
                    // announce time; reject here, the caller substitutes
                    return Err(ParseError::new("next-hop self not resolved"));
                }
                let addr: IpAddr = value
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid next-hop '{}'", value)))?;
                body.attributes.insert(Attribute::NextHop(addr));
                i += 2;
            }
            "origin" => {
                let value = value_of(words, i, "origin")?;
                let origin = match value.to_lowercase().as_str() {
                    "igp" => Origin::Igp,
                    "egp" => Origin::Egp,
                    "incomplete" => Origin::Incomplete,
                    other => return Err(ParseError::new(format!("Invalid origin '{}'", other))),
                };
                body.attributes.insert(Attribute::Origin(origin));
                i += 2;
            }
            "med" | "metric" => {
                let value = value_of(words, i, "med")?;
                body.attributes.insert(Attribute::Med(
                    value
                        .parse()
                        .map_err(|_| ParseError::new(format!("Invalid med '{}'", value)))?,
                ));
                i += 2;
            }
            "aigp" => {
                let value = value_of(words, i, "aigp")?;
                body.attributes.insert(Attribute::Aigp(
                    value
                        .parse()
                        .map_err(|_| ParseError::new(format!("Invalid aigp '{}'", value)))?,
                ));
                i += 2;
            }
            "local-preference" => {
                let value = value_of(words, i, "local-preference")?;
                body.attributes.insert(Attribute::LocalPref(value.parse().map_err(
                    |_| ParseError::new(format!("Invalid local-preference '{}'", value)),
                )?));
                i += 2;
            }
            "as-path" => {
                let (values, next) = bracketed_values(words, i + 1)?;
                let mut asns = Vec::with_capacity(values.len());
                for asn in &values {
                    asns.push(asn_from_dotted(asn)?);
                }
                body.attributes.insert(Attribute::AsPath(AsPath::sequence(asns)));
                i = next;
            }
            "community" | "extended-community" | "large-community" => {
                let (values, next) = bracketed_values(words, i + 1)?;
                for value in &values {
                    communities.0.push(Community::try_from(value.as_str())?);
                }
                i = next;
            }
            "label" => {
                let (values, next) = bracketed_values(words, i + 1)?;
                let mut labels = Vec::with_capacity(values.len());
                for label in &values {
                    labels.push(
                        label
                            .parse()
                            .map_err(|_| ParseError::new(format!("Invalid label '{}'", label)))?,
                    );
                }
                body.labels = Some(LabelStack::new(labels));
                i = next;
            }
            "rd" | "route-distinguisher" => {
                let value = value_of(words, i, "rd")?;
                body.rd = Some(value.parse().map_err(ParseError::new)?);
                i += 2;
            }
            "path-information" => {
                let value = value_of(words, i, "path-information")?;
                let path_id = if let Ok(id) = value.parse::<u32>() {
                    id
                } else {
                    let addr: std::net::Ipv4Addr = value.parse().map_err(|_| {
                        ParseError::new(format!("Invalid path-information '{}'", value))
                    })?;
                    u32::from_be_bytes(addr.octets())
                };
                body.path_id = Some(path_id);
                i += 2;
            }
            "watchdog" => {
                body.watchdog = Some(value_of(words, i, "watchdog")?);
                i += 2;
            }
            "withdraw" | "withdrawn" => {
                body.start_withdrawn = true;
                i += 1;
            }
            "name" => {
                // route label for operator display; nothing on the wire
                let _ = value_of(words, i, "name")?;
                i += 2;
            }
            "split" => {
                let value = value_of(words, i, "split")?;
                let mask: u8 = value
                    .trim_start_matches('/')
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid split '{}'", value)))?;
                body.split = Some(mask);
                i += 2;
            }
            "attribute" => {
                let (values, next) = bracketed_values(words, i + 1)?;
                if values.len() != 3 {
                    return Err(ParseError::new(
                        "generic attribute needs [ 0xTYPE 0xFLAG 0xDATA ]",
                    ));
                }
                let parse_hex = |value: &str| -> Result<Vec<u8>, ParseError> {
                    let trimmed = value.trim_start_matches("0x");
                    let padded = if trimmed.len() % 2 == 1 {
                        format!("0{}", trimmed)
                    } else {
                        trimmed.to_string()
                    };
                    hex::decode(&padded)
                        .map_err(|_| ParseError::new(format!("Invalid hex '{}'", value)))
                };
                let code = *parse_hex(&values[0])?
                    .last()
                    .ok_or_else(|| ParseError::new("empty attribute code"))?;
                let flags = *parse_hex(&values[1])?
                    .last()
                    .ok_or_else(|| ParseError::new("empty attribute flags"))?;
                let data = parse_hex(&values[2])?;
                body.attributes.insert(Attribute::Unknown { code, flags, data });
                i = next;
            }
            other => {
                return Err(ParseError::new(format!("Unknown route token '{}'", other)));
            }
        }
    }

    let standard = communities.standard();
    if !standard.is_empty() {
        body.attributes.insert(Attribute::Communities(standard));
    }
    let extended = communities.extended();
    if !extended.is_empty() {
        body.attributes
            .insert(Attribute::ExtendedCommunities(extended));
    }
    let large = communities.large();
    if !large.is_empty() {
        body.attributes.insert(Attribute::LargeCommunities(large));
    }
    Ok(body)
}

/// `[ a b c ]` starting at `start`; also accepts a single unbracketed value
fn bracketed_values(words: &[&str], start: usize) -> Result<(Vec<String>, usize), ParseError> {
    match words.get(start) {
        Some(&"[") => {
            let mut values = Vec::new();
            let mut i = start + 1;
            loop {
                match words.get(i) {
                    Some(&"]") => return Ok((values, i + 1)),
                    Some(word) => {
                        values.push(word.to_string());
                        i += 1;
                    }
                    None => return Err(ParseError::new("unterminated '[' list")),
                }
            }
        }
        Some(word) => Ok((vec![word.to_string()], start + 1)),
        None => Err(ParseError::new("expected a value or '[' list")),
    }
}

fn split_cidr(cidr: &Cidr, new_mask: u8) -> Result<Vec<Cidr>, ParseError> {
    let max = match cidr.afi() {
        Afi::Ipv4 => 32u8,
        _ => 128u8,
    };
    if new_mask <= cidr.mask() || new_mask > max {
        return Err(ParseError::new(format!(
            "split /{} does not refine /{}",
            new_mask,
            cidr.mask()
        )));
    }
    let count = 1usize << (new_mask - cidr.mask()).min(63);
    if count > MAX_SPLIT_ROUTES {
        return Err(ParseError::new(format!(
            "split /{} would expand to {} routes",
            new_mask, count
        )));
    }

    let base: u128 = match cidr.ip() {
        IpAddr::V4(v4) => u128::from(u32::from_be_bytes(v4.octets())) << 96,
        IpAddr::V6(v6) => u128::from_be_bytes(v6.octets()),
    };
    let step_shift = 128 - u32::from(new_mask) - if cidr.afi() == Afi::Ipv4 { 96 } else { 0 };
    let mut cidrs = Vec::with_capacity(count);
    for i in 0..count as u128 {
        let addr = base + (i << (step_shift + if cidr.afi() == Afi::Ipv4 { 96 } else { 0 }));
        let ip = match cidr.afi() {
            Afi::Ipv4 => IpAddr::from(((addr >> 96) as u32).to_be_bytes()),
            _ => IpAddr::from(addr.to_be_bytes()),
        };
        cidrs.push(Cidr::from_ip(ip, new_mask));
    }
    Ok(cidrs)
}

/// Parse a flow body: `[rd <rd>] <match>… then <action>…`
/// The leading `flow route` keywords must already be consumed.
pub fn parse_flow_body(body: &str) -> Result<Change, ParseError> {
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.is_empty() {
        return Err(ParseError::new("flow body is empty"));
    }

    let mut rd: Option<RouteDistinguisher> = None;
    let mut afi = Afi::Ipv4;
    let mut components: Vec<FlowComponent> = Vec::new();
    let mut attributes = AttributeCollection::new();
    let mut extended: Vec<u64> = Vec::new();
    let mut i = 0usize;
    let mut then_at: Option<usize> = None;

    while i < words.len() {
        let keyword = words[i];
        if keyword == "then" {
            then_at = Some(i + 1);
            break;
        }
        let (values, next) = flow_values(&words, i + 1);
        match keyword {
            "rd" | "route-distinguisher" => {
                let value = values
                    .first()
                    .ok_or_else(|| ParseError::new("'rd' requires a value"))?;
                rd = Some(value.parse().map_err(ParseError::new)?);
            }
            "destination" | "source" => {
                let value = values
                    .first()
                    .ok_or_else(|| ParseError::new(format!("'{}' requires a prefix", keyword)))?;
                let cidr = cidr_from_str(value)?;
                afi = cidr.afi();
                components.push(if keyword == "destination" {
                    FlowComponent::DestinationPrefix(cidr)
                } else {
                    FlowComponent::SourcePrefix(cidr)
                });
            }
            "protocol" => components.push(FlowComponent::IpProtocol(numeric_ops(&values)?)),
            "port" => components.push(FlowComponent::Port(numeric_ops(&values)?)),
            "destination-port" => {
                components.push(FlowComponent::DestinationPort(numeric_ops(&values)?))
            }
            "source-port" => components.push(FlowComponent::SourcePort(numeric_ops(&values)?)),
            "icmp-type" => components.push(FlowComponent::IcmpType(numeric_ops(&values)?)),
            "icmp-code" => components.push(FlowComponent::IcmpCode(numeric_ops(&values)?)),
            "tcp-flags" => components.push(FlowComponent::TcpFlags(binary_ops(&values)?)),
            "packet-length" => components.push(FlowComponent::PacketLength(numeric_ops(&values)?)),
            "dscp" => components.push(FlowComponent::Dscp(numeric_ops(&values)?)),
            "fragment" => components.push(FlowComponent::Fragment(fragment_ops(&values)?)),
            "flow-label" => components.push(FlowComponent::FlowLabel(numeric_ops(&values)?)),
            other => return Err(ParseError::new(format!("Unknown flow match '{}'", other))),
        }
        i = next;
    }

    if components.is_empty() {
        return Err(ParseError::new("flow route has no match components"));
    }
    let then_at = then_at.ok_or_else(|| ParseError::new("flow route missing 'then' clause"))?;

    let mut j = then_at;
    while j < words.len() {
        match words[j] {
            "discard" => {
                extended.push(traffic_rate(0.0));
                j += 1;
            }
            "accept" => {
                j += 1;
            }
            "rate-limit" => {
                let value = words
                    .get(j + 1)
                    .ok_or_else(|| ParseError::new("'rate-limit' requires bytes/sec"))?;
                let rate: f32 = value
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid rate '{}'", value)))?;
                extended.push(traffic_rate(rate));
                j += 2;
            }
            "redirect" => {
                let value = words
                    .get(j + 1)
                    .ok_or_else(|| ParseError::new("'redirect' requires a target"))?;
                match Community::try_from(format!("redirect:{}", value).as_str()) {
                    Ok(Community::Extended(raw)) => extended.push(raw),
                    _ => {
                        return Err(ParseError::new(format!(
                            "Invalid redirect target '{}'",
                            value
                        )))
                    }
                }
                j += 2;
            }
            "mark" => {
                let value = words
                    .get(j + 1)
                    .ok_or_else(|| ParseError::new("'mark' requires a DSCP value"))?;
                let dscp: u8 = value
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid DSCP '{}'", value)))?;
                if dscp > 63 {
                    return Err(ParseError::new(format!("Not a valid DSCP value '{}'", dscp)));
                }
                extended.push(0x8009_0000_0000_0000 | u64::from(dscp));
                j += 2;
            }
            "action" => {
                let value = words
                    .get(j + 1)
                    .ok_or_else(|| ParseError::new("'action' requires a value"))?;
                let bits = match *value {
                    "sample" => 0b10u64,
                    "terminal" => 0b01,
                    "sample-terminal" => 0b11,
                    other => {
                        return Err(ParseError::new(format!("Invalid action '{}'", other)))
                    }
                };
                extended.push(0x8007_0000_0000_0000 | bits);
                j += 2;
            }
            "next-hop" => {
                let value = words
                    .get(j + 1)
                    .ok_or_else(|| ParseError::new("'next-hop' requires an address"))?;
                let addr: IpAddr = value
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid next-hop '{}'", value)))?;
                attributes.insert(Attribute::NextHop(addr));
                j += 2;
            }
            "community" | "extended-community" => {
                let remaining: Vec<&str> = words[j + 1..].to_vec();
                let (values, consumed) = bracketed_values(&remaining, 0)?;
                for value in &values {
                    match Community::try_from(value.as_str())? {
                        Community::Extended(raw) => extended.push(raw),
                        Community::Standard(raw) => match attributes.remove(8) {
                            Some(Attribute::Communities(mut list)) => {
                                list.push(raw);
                                attributes.insert(Attribute::Communities(list));
                            }
                            _ => {
                                attributes.insert(Attribute::Communities(vec![raw]));
                            }
                        },
                        Community::Large(_) => {
                            return Err(ParseError::new(
                                "large communities not valid in flow actions",
                            ))
                        }
                    }
                }
                j += 1 + consumed;
            }
            other => return Err(ParseError::new(format!("Unknown flow action '{}'", other))),
        }
    }

    if extended.is_empty() && attributes.next_hop().is_none() {
        return Err(ParseError::new("flow route has no action"));
    }
    if !extended.is_empty() {
        attributes.insert(Attribute::ExtendedCommunities(extended));
    }

    let nlri = match rd {
        Some(rd) => FlowNlri::with_rd(afi, rd, components),
        None => FlowNlri::new(afi, components),
    };
    Ok(Change::announce(Nlri::Flow(nlri), Arc::new(attributes)))
}

/// RFC 8955 traffic-rate extended community (rate 0 = discard)
fn traffic_rate(rate: f32) -> u64 {
    0x8006_0000_0000_0000 | u64::from(rate.to_bits())
}

// Values for a flow match: everything until the next keyword
fn flow_values(words: &[&str], start: usize) -> (Vec<String>, usize) {
    const KEYWORDS: &[&str] = &[
        "rd",
        "route-distinguisher",
        "destination",
        "source",
        "protocol",
        "port",
        "destination-port",
        "source-port",
        "icmp-type",
        "icmp-code",
        "tcp-flags",
        "packet-length",
        "dscp",
        "fragment",
        "flow-label",
        "then",
    ];
    let mut values = Vec::new();
    let mut i = start;
    while let Some(word) = words.get(i) {
        if KEYWORDS.contains(word) {
            break;
        }
        values.push(word.to_string());
        i += 1;
    }
    (values, i)
}

fn numeric_ops(values: &[String]) -> Result<Vec<FlowOp>, ParseError> {
    if values.is_empty() {
        return Err(ParseError::new("operator list is empty"));
    }
    values
        .iter()
        .enumerate()
        .map(|(index, word)| parse_numeric_op(word, index))
        .collect()
}

fn parse_numeric_op(word: &str, index: usize) -> Result<FlowOp, ParseError> {
    let mut flags = 0u8;
    let mut pos = 0usize;
    for (i, chr) in word.char_indices() {
        match chr {
            '&' => flags |= 0x40,
            '>' => flags |= NUM_GT,
            '<' => flags |= NUM_LT,
            '=' => flags |= NUM_EQ,
            _ => {
                pos = i;
                break;
            }
        }
        pos = i + 1;
    }
    let value: u64 = word[pos..]
        .parse()
        .map_err(|_| ParseError::new(format!("Unable to parse '{}'", word)))?;
    // bare "8080" means "=8080"
    if flags & (NUM_LT | NUM_GT | NUM_EQ) == 0 {
        flags |= NUM_EQ;
    }
    // subsequent items of the same component AND together
    if index > 0 {
        flags |= 0x40;
    }
    Ok(FlowOp::numeric(flags, value))
}

fn binary_ops(values: &[String]) -> Result<Vec<FlowOp>, ParseError> {
    if values.is_empty() {
        return Err(ParseError::new("operator list is empty"));
    }
    values
        .iter()
        .enumerate()
        .map(|(index, word)| {
            let mut flags = BIN_MATCH;
            let mut name = word.as_str();
            if let Some(stripped) = name.strip_prefix('!') {
                flags |= BIN_NOT;
                name = stripped;
            }
            let value = match name {
                "fin" => 0x01u64,
                "syn" => 0x02,
                "rst" => 0x04,
                "push" => 0x08,
                "ack" => 0x10,
                "urgent" => 0x20,
                other => other
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid tcp flag '{}'", other)))?,
            };
            if index > 0 {
                flags |= 0x40;
            }
            Ok(FlowOp::binary(flags, value))
        })
        .collect()
}

fn fragment_ops(values: &[String]) -> Result<Vec<FlowOp>, ParseError> {
    if values.is_empty() {
        return Err(ParseError::new("operator list is empty"));
    }
    values
        .iter()
        .enumerate()
        .map(|(index, word)| {
            let mut flags = BIN_MATCH;
            let value = match word.as_str() {
                "not-a-fragment" => 0x01u64,
                "dont-fragment" => 0x01,
                "is-fragment" => 0x02,
                "first-fragment" => 0x04,
                "last-fragment" => 0x08,
                other => other
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid fragment '{}'", other)))?,
            };
            if index > 0 {
                flags |= 0x40;
            }
            Ok(FlowOp::binary(flags, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::Action;

    #[test]
    fn test_asn_from_dotted() {
        assert_eq!(asn_from_dotted("100").unwrap(), 100);
        assert_eq!(asn_from_dotted("65000.100").unwrap(), 4259840100);
        assert_eq!(asn_from_dotted("4259840100").unwrap(), 4259840100);
        assert!(asn_from_dotted("200.4259840100").is_err());
        assert!(asn_from_dotted("test").is_err());
    }

    #[test]
    fn test_cidr_from_str() {
        let cidr = cidr_from_str("1.1.1.0/24").unwrap();
        assert_eq!(cidr.mask(), 24);
        assert_eq!(cidr.packed(), &[1, 1, 1]);
        assert!(cidr_from_str("1.1.1.0").is_err());
        assert!(cidr_from_str("1.1.1.0/33").is_err());
    }

    #[test]
    fn test_parse_route_body() {

        let parsed = parse_route_body(
            "192.0.2.0/24 next-hop 10.0.0.2 local-preference 200",
            true,
        )
        .unwrap();
        assert_eq!(parsed.changes.len(), 1);
        let change = &parsed.changes[0];
        assert_eq!(change.action, Action::Announce);
        assert_eq!(change.nlri.to_string(), "192.0.2.0/24");
        assert_eq!(
            change.attributes.next_hop(),
            Some("10.0.0.2".parse().unwrap())
        );
        assert_eq!(change.attributes.local_pref(), Some(200));
    }

    #[test]
    fn test_parse_route_with_lists() {
        let parsed = parse_route_body(
            "10.0.0.0/16 next-hop 10.0.0.2 as-path [ 65000 65001 ] community [ 65000:1 no-export ]",
            true,
        )
        .unwrap();
        let attrs = &parsed.changes[0].attributes;
        assert_eq!(attrs.as_path().unwrap().asns(), vec![65000, 65001]);
        match attrs.get(8) {
            Some(Attribute::Communities(list)) => assert_eq!(list.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_labeled_vpn_route() {
        let parsed = parse_route_body(
            "10.0.0.0/24 rd 65000:1 label [ 100 ] next-hop 10.0.0.2",
            true,
        )
        .unwrap();
        match &parsed.changes[0].nlri {
            Nlri::Vpn(vpn) => {
                assert_eq!(vpn.rd.to_string(), "65000:1");
                assert_eq!(vpn.labels.values(), vec![100]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_split() {
        let parsed = parse_route_body("10.0.0.0/22 next-hop 10.0.0.2 split /24", true).unwrap();
        let prefixes: Vec<String> = parsed
            .changes
            .iter()
            .map(|change| change.nlri.to_string())
            .collect();
        assert_eq!(
            prefixes,
            vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24", "10.0.3.0/24"]
        );
    }

    #[test]
    fn test_parse_watchdog_withdraw() {
        let parsed = parse_route_body(
            "10.0.0.0/16 next-hop 10.0.0.2 watchdog dns withdraw",
            true,
        )
        .unwrap();
        assert_eq!(parsed.changes[0].watchdog.as_deref(), Some("dns"));
        assert_eq!(parsed.start_down_watchdogs, vec!["dns".to_string()]);
    }

    #[test]
    fn test_parse_withdraw_body() {
        let parsed = parse_route_body("192.0.2.0/24", false).unwrap();
        assert_eq!(parsed.changes[0].action, Action::Withdraw);
    }

    #[test]
    fn test_parse_attributes_body() {
        let parsed = parse_attributes_body(
            "next-hop 10.0.0.2 med 50 nlri 10.0.0.0/24 10.0.1.0/24",
            true,
        )
        .unwrap();
        assert_eq!(parsed.changes.len(), 2);
        assert!(parsed
            .changes
            .iter()
            .all(|change| change.attributes.med() == Some(50)));
    }

    #[test]
    fn test_parse_flow_body() {

        let change =
            parse_flow_body("destination 192.0.2.0/24 source-port =80 then discard").unwrap();
        match &change.nlri {
            Nlri::Flow(flow) => {
                assert_eq!(flow.components.len(), 2);
                assert_eq!(
                    flow.to_string(),
                    "flow destination 192.0.2.0/24 source-port =80"
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        match change.attributes.get(16) {
            Some(Attribute::ExtendedCommunities(list)) => {
                // traffic-rate 0 = discard
                assert_eq!(list, &vec![0x8006_0000_0000_0000]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_flow_port_range_and_redirect() {
        let change = parse_flow_body(
            "destination 10.0.0.0/24 destination-port >8000 <=8080 then redirect 65000:302",
        )
        .unwrap();
        match &change.nlri {
            Nlri::Flow(flow) => match &flow.components[1] {
                FlowComponent::DestinationPort(ops) => {
                    assert_eq!(ops.len(), 2);
                    assert_eq!(ops[0].value, 8000);
                    assert_eq!(ops[1].value, 8080);
                    // second op carries the AND bit
                    assert_ne!(ops[1].flags & 0x40, 0);
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_flow_requires_then() {
        assert!(parse_flow_body("destination 10.0.0.0/24").is_err());
    }

    #[test]
    fn test_family_from_words() {
        assert_eq!(
            family_from_words(&["ipv4", "unicast"]).unwrap(),
            Family::IPV4_UNICAST
        );
        assert!(family_from_words(&["ipv9", "unicast"]).is_err());
    }
}
