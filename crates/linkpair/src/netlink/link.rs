//! Link creation, lookup and configuration.

use std::os::unix::io::RawFd;

use super::builder::MessageBuilder;
use super::connection::{Connection, ack_request, create_request};
use super::message::NlMsgType;
use super::messages::LinkMessage;
use super::types::veth::VETH_INFO_PEER;
use super::types::{IfInfoMsg, IflaAttr, IflaInfo, iff};
use crate::error::{Error, Result};

/// A veth pair to create with one RTM_NEWLINK request.
#[derive(Debug, Clone)]
pub struct VethLink {
    name: String,
    peer_name: String,
    mtu: Option<u32>,
    address: Option<[u8; 6]>,
    peer_address: Option<[u8; 6]>,
    peer_netns_fd: Option<RawFd>,
}

impl VethLink {
    pub fn new(name: impl Into<String>, peer_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            peer_name: peer_name.into(),
            mtu: None,
            address: None,
            peer_address: None,
            peer_netns_fd: None,
        }
    }

    /// MTU for both ends.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn address(mut self, addr: [u8; 6]) -> Self {
        self.address = Some(addr);
        self
    }

    pub fn peer_address(mut self, addr: [u8; 6]) -> Self {
        self.peer_address = Some(addr);
        self
    }

    /// Place the peer end in the namespace behind `fd`.
    ///
    /// The fd must stay open until the request has been acknowledged.
    pub fn peer_netns_fd(mut self, fd: RawFd) -> Self {
        self.peer_netns_fd = Some(fd);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> MessageBuilder {
        let mut builder = create_request(NlMsgType::RTM_NEWLINK);
        builder.append(&IfInfoMsg::new());
        builder.append_attr_str(IflaAttr::Ifname as u16, &self.name);

        if let Some(mtu) = self.mtu {
            builder.append_attr_u32(IflaAttr::Mtu as u16, mtu);
        }
        if let Some(ref addr) = self.address {
            builder.append_attr(IflaAttr::Address as u16, addr);
        }

        let linkinfo = builder.nest_start(IflaAttr::Linkinfo as u16);
        builder.append_attr_str(IflaInfo::Kind as u16, "veth");

        let data = builder.nest_start(IflaInfo::Data as u16);
        let peer = builder.nest_start(VETH_INFO_PEER);

        builder.append(&IfInfoMsg::new());
        builder.append_attr_str(IflaAttr::Ifname as u16, &self.peer_name);
        if let Some(mtu) = self.mtu {
            builder.append_attr_u32(IflaAttr::Mtu as u16, mtu);
        }
        if let Some(ref addr) = self.peer_address {
            builder.append_attr(IflaAttr::Address as u16, addr);
        }
        if let Some(fd) = self.peer_netns_fd {
            builder.append_attr_u32(IflaAttr::NetNsFd as u16, fd as u32);
        }

        builder.nest_end(peer);
        builder.nest_end(data);
        builder.nest_end(linkinfo);

        builder
    }
}

fn setlink_request(index: u32) -> MessageBuilder {
    let mut builder = ack_request(NlMsgType::RTM_SETLINK);
    builder.append(&IfInfoMsg::new().with_index(index as i32));
    builder
}

impl Connection {
    /// Create a veth pair.
    pub async fn add_veth(&self, veth: &VethLink) -> Result<()> {
        tracing::debug!(link = %veth.name, peer = %veth.peer_name, "RTM_NEWLINK veth");
        self.request_ack(veth.build()).await
    }

    pub async fn get_links(&self) -> Result<Vec<LinkMessage>> {
        self.dump_typed(NlMsgType::RTM_GETLINK).await
    }

    /// Look up a link by name, or [`Error::LinkNotFound`].
    pub async fn get_link_by_name(&self, name: &str) -> Result<LinkMessage> {
        self.get_links()
            .await?
            .into_iter()
            .find(|l| l.name() == Some(name))
            .ok_or_else(|| Error::LinkNotFound {
                name: name.to_string(),
            })
    }

    /// Look up a link by index, or `None` if it no longer exists.
    pub async fn get_link_by_index(&self, index: u32) -> Result<Option<LinkMessage>> {
        Ok(self
            .get_links()
            .await?
            .into_iter()
            .find(|l| l.index() == index))
    }

    pub async fn del_link_by_index(&self, index: u32) -> Result<()> {
        tracing::debug!(index, "RTM_DELLINK");
        let mut builder = ack_request(NlMsgType::RTM_DELLINK);
        builder.append(&IfInfoMsg::new().with_index(index as i32));
        self.request_ack(builder).await
    }

    pub async fn set_link_up_by_index(&self, index: u32) -> Result<()> {
        tracing::debug!(index, "RTM_SETLINK up");
        let mut builder = ack_request(NlMsgType::RTM_SETLINK);
        builder.append(
            &IfInfoMsg::new()
                .with_index(index as i32)
                .with_flags(iff::UP, iff::UP),
        );
        self.request_ack(builder).await
    }

    pub async fn set_link_mtu_by_index(&self, index: u32, mtu: u32) -> Result<()> {
        tracing::debug!(index, mtu, "RTM_SETLINK mtu");
        let mut builder = setlink_request(index);
        builder.append_attr_u32(IflaAttr::Mtu as u16, mtu);
        self.request_ack(builder).await
    }

    pub async fn set_link_address_by_index(&self, index: u32, address: [u8; 6]) -> Result<()> {
        tracing::debug!(index, "RTM_SETLINK address");
        let mut builder = setlink_request(index);
        builder.append_attr(IflaAttr::Address as u16, &address);
        self.request_ack(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::AttrIter;
    use crate::netlink::message::{NLM_F_CREATE, NLM_F_EXCL, NLMSG_HDRLEN, NlMsgHdr};
    use crate::netlink::parse::parse_string_from_bytes;

    const IFINFO_LEN: usize = std::mem::size_of::<IfInfoMsg>();

    #[test]
    fn test_veth_request_layout() {
        let msg = VethLink::new("veth-l", "veth-p")
            .mtu(1400)
            .peer_address([2, 0, 0, 0, 0, 9])
            .peer_netns_fd(12)
            .build()
            .finish();

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_type, NlMsgType::RTM_NEWLINK);
        assert_eq!(
            header.nlmsg_flags & (NLM_F_CREATE | NLM_F_EXCL),
            NLM_F_CREATE | NLM_F_EXCL
        );

        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN + IFINFO_LEN..]).collect();
        assert_eq!(attrs[0], (IflaAttr::Ifname as u16, &b"veth-l\0"[..]));
        assert_eq!(attrs[1], (IflaAttr::Mtu as u16, &1400u32.to_ne_bytes()[..]));

        let (kind, linkinfo) = attrs[2];
        assert_eq!(kind, IflaAttr::Linkinfo as u16);
        let info: Vec<_> = AttrIter::new(linkinfo).collect();
        assert_eq!(parse_string_from_bytes(info[0].1), "veth");

        let data: Vec<_> = AttrIter::new(info[1].1).collect();
        assert_eq!(data[0].0, VETH_INFO_PEER);
        let peer: Vec<_> = AttrIter::new(&data[0].1[IFINFO_LEN..]).collect();
        assert_eq!(parse_string_from_bytes(peer[0].1), "veth-p");
        assert_eq!(peer[1].1, &1400u32.to_ne_bytes());
        assert_eq!(peer[2].1, &[2, 0, 0, 0, 0, 9]);
        assert_eq!(peer[3], (IflaAttr::NetNsFd as u16, &12u32.to_ne_bytes()[..]));
    }

    #[test]
    fn test_setlink_targets_index() {
        let msg = setlink_request(42).finish();
        let info = IfInfoMsg::from_bytes(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(info.ifi_index, 42);
        assert_eq!(info.ifi_change, 0);
    }
}
