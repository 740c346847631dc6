//! Typed views of the link, address and qdisc messages the kernel returns.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use zerocopy::IntoBytes;

use super::parse::{
    FromNetlink, PResult, cut, header, next_attr, parse_string_from_bytes, parse_u32_ne,
};
use super::types::{IfAddrMsg, IfInfoMsg, IfaAttr, IflaAttr, TcMsg, TcaAttr};

/// A link as reported by RTM_NEWLINK.
#[derive(Debug, Clone, Default)]
pub struct LinkMessage {
    pub header: IfInfoMsg,
    pub name: Option<String>,
    pub mtu: Option<u32>,
    pub address: Option<Vec<u8>>,
}

impl LinkMessage {
    pub fn index(&self) -> u32 {
        self.header.ifi_index as u32
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl FromNetlink for LinkMessage {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let raw = header(input, std::mem::size_of::<IfInfoMsg>())?;
        let Ok(header) = IfInfoMsg::from_bytes(raw) else {
            return cut();
        };

        let mut msg = LinkMessage {
            header: *header,
            ..Default::default()
        };

        while let Some((kind, data)) = next_attr(input)? {
            match kind {
                k if k == IflaAttr::Ifname as u16 => msg.name = Some(parse_string_from_bytes(data)),
                k if k == IflaAttr::Mtu as u16 => msg.mtu = parse_u32_ne(data),
                k if k == IflaAttr::Address as u16 => msg.address = Some(data.to_vec()),
                _ => {}
            }
        }

        Ok(msg)
    }

    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(IfInfoMsg::new().as_bytes());
    }
}

/// An interface address as reported by RTM_NEWADDR.
#[derive(Debug, Clone, Default)]
pub struct AddressMessage {
    pub header: IfAddrMsg,
    /// IFA_ADDRESS; the peer address on point-to-point links.
    pub address: Option<IpAddr>,
    /// IFA_LOCAL; the interface's own address when present.
    pub local: Option<IpAddr>,
}

impl AddressMessage {
    pub fn index(&self) -> u32 {
        self.header.ifa_index
    }

    pub fn prefix_len(&self) -> u8 {
        self.header.ifa_prefixlen
    }

    /// The interface's own address, preferring IFA_LOCAL.
    pub fn primary(&self) -> Option<IpAddr> {
        self.local.or(self.address)
    }
}

fn parse_ip(family: u8, data: &[u8]) -> Option<IpAddr> {
    match family as i32 {
        libc::AF_INET => {
            let octets: [u8; 4] = data.get(..4)?.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        libc::AF_INET6 => {
            let octets: [u8; 16] = data.get(..16)?.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

impl FromNetlink for AddressMessage {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let raw = header(input, std::mem::size_of::<IfAddrMsg>())?;
        let Ok(header) = IfAddrMsg::from_bytes(raw) else {
            return cut();
        };

        let mut msg = AddressMessage {
            header: *header,
            ..Default::default()
        };

        while let Some((kind, data)) = next_attr(input)? {
            match kind {
                k if k == IfaAttr::Address as u16 => {
                    msg.address = parse_ip(msg.header.ifa_family, data)
                }
                k if k == IfaAttr::Local as u16 => {
                    msg.local = parse_ip(msg.header.ifa_family, data)
                }
                _ => {}
            }
        }

        Ok(msg)
    }

    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(IfAddrMsg::default().as_bytes());
    }
}

/// A queueing discipline as reported by RTM_NEWQDISC.
#[derive(Debug, Clone, Default)]
pub struct TcMessage {
    pub header: TcMsg,
    pub kind: Option<String>,
}

impl TcMessage {
    pub fn ifindex(&self) -> u32 {
        self.header.tcm_ifindex as u32
    }

    pub fn handle(&self) -> u32 {
        self.header.tcm_handle
    }

    pub fn parent(&self) -> u32 {
        self.header.tcm_parent
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }
}

impl FromNetlink for TcMessage {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let raw = header(input, std::mem::size_of::<TcMsg>())?;
        let Ok(header) = TcMsg::from_bytes(raw) else {
            return cut();
        };

        let mut msg = TcMessage {
            header: *header,
            ..Default::default()
        };

        while let Some((kind, data)) = next_attr(input)? {
            if kind == TcaAttr::Kind as u16 {
                msg.kind = Some(parse_string_from_bytes(data));
            }
        }

        Ok(msg)
    }

    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(TcMsg::new().as_bytes());
    }
}
