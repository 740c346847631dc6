//! Interface address listing and assignment.

use std::net::{IpAddr, Ipv4Addr};

use super::builder::MessageBuilder;
use super::connection::{Connection, ack_request, create_request};
use super::message::NlMsgType;
use super::messages::AddressMessage;
use super::types::{IfAddrMsg, IfaAttr};
use crate::error::Result;

/// Directed broadcast for an IPv4 network, if it has one.
///
/// /31 and /32 networks have no broadcast address.
fn broadcast(addr: Ipv4Addr, prefix_len: u8) -> Option<Ipv4Addr> {
    if prefix_len >= 31 {
        return None;
    }
    let host_mask = u32::MAX >> prefix_len;
    Some(Ipv4Addr::from(u32::from(addr) | host_mask))
}

fn address_message(
    mut builder: MessageBuilder,
    index: u32,
    addr: IpAddr,
    prefix_len: u8,
) -> MessageBuilder {
    let family = match addr {
        IpAddr::V4(_) => libc::AF_INET,
        IpAddr::V6(_) => libc::AF_INET6,
    };
    builder.append(&IfAddrMsg {
        ifa_family: family as u8,
        ifa_prefixlen: prefix_len,
        ifa_index: index,
        ..Default::default()
    });

    match addr {
        IpAddr::V4(v4) => {
            builder.append_attr(IfaAttr::Local as u16, &v4.octets());
            builder.append_attr(IfaAttr::Address as u16, &v4.octets());
        }
        IpAddr::V6(v6) => {
            builder.append_attr(IfaAttr::Address as u16, &v6.octets());
        }
    }
    builder
}

impl Connection {
    /// All addresses on the link with `index`.
    pub async fn get_addresses_by_index(&self, index: u32) -> Result<Vec<AddressMessage>> {
        let addrs: Vec<AddressMessage> = self.dump_typed(NlMsgType::RTM_GETADDR).await?;
        Ok(addrs.into_iter().filter(|a| a.index() == index).collect())
    }

    pub async fn add_address_by_index(
        &self,
        index: u32,
        addr: IpAddr,
        prefix_len: u8,
    ) -> Result<()> {
        tracing::debug!(index, address = %addr, prefix_len, "RTM_NEWADDR");
        let mut builder = address_message(
            create_request(NlMsgType::RTM_NEWADDR),
            index,
            addr,
            prefix_len,
        );
        if let IpAddr::V4(v4) = addr
            && let Some(brd) = broadcast(v4, prefix_len)
        {
            builder.append_attr(IfaAttr::Broadcast as u16, &brd.octets());
        }
        self.request_ack(builder).await
    }

    pub async fn del_address_by_index(
        &self,
        index: u32,
        addr: IpAddr,
        prefix_len: u8,
    ) -> Result<()> {
        tracing::debug!(index, address = %addr, prefix_len, "RTM_DELADDR");
        let builder =
            address_message(ack_request(NlMsgType::RTM_DELADDR), index, addr, prefix_len);
        self.request_ack(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::AttrIter;
    use crate::netlink::message::NLMSG_HDRLEN;

    #[test]
    fn test_broadcast() {
        let addr: Ipv4Addr = "10.1.2.3".parse().unwrap();
        assert_eq!(broadcast(addr, 24), Some("10.1.2.255".parse().unwrap()));
        assert_eq!(broadcast(addr, 0), Some(Ipv4Addr::BROADCAST));
        assert_eq!(broadcast(addr, 31), None);
        assert_eq!(broadcast(addr, 32), None);
    }

    #[test]
    fn test_v6_address_message() {
        let ip: IpAddr = "fd00::1".parse().unwrap();
        let msg = address_message(ack_request(NlMsgType::RTM_DELADDR), 9, ip, 64).finish();

        let hdr = IfAddrMsg::from_bytes(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(hdr.ifa_family, libc::AF_INET6 as u8);
        assert_eq!(hdr.ifa_prefixlen, 64);
        assert_eq!(hdr.ifa_index, 9);

        let attrs: Vec<_> =
            AttrIter::new(&msg[NLMSG_HDRLEN + std::mem::size_of::<IfAddrMsg>()..]).collect();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].0, IfaAttr::Address as u16);
    }
}
