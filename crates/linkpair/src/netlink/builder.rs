//! Request builder for route netlink messages.

use zerocopy::{Immutable, IntoBytes};

use super::attr::{NLA_F_NESTED, NlAttr, nla_align};
use super::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align};

/// Marks the start of a nested attribute so its length can be patched.
#[derive(Debug, Clone, Copy)]
pub struct NestToken {
    offset: usize,
}

/// Builds one netlink request in a contiguous buffer.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    /// Start a message of `msg_type` with `flags`.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        let header = NlMsgHdr::new(msg_type, flags);
        let mut buf = vec![0u8; NLMSG_HDRLEN];
        buf[..std::mem::size_of::<NlMsgHdr>()].copy_from_slice(header.as_bytes());
        Self { buf }
    }

    /// Append raw bytes, padded to message alignment.
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.buf.resize(nlmsg_align(self.buf.len()), 0);
    }

    /// Append a fixed-layout kernel struct.
    pub fn append<T: IntoBytes + Immutable>(&mut self, data: &T) {
        self.append_bytes(data.as_bytes());
    }

    /// Append an attribute with the given type and payload.
    pub fn append_attr(&mut self, attr_type: u16, data: &[u8]) {
        let attr = NlAttr::new(attr_type, data.len());
        self.buf.extend_from_slice(attr.as_bytes());
        self.buf.extend_from_slice(data);
        self.buf.resize(nla_align(self.buf.len()), 0);
    }

    /// Append a fixed-layout struct as the payload of an attribute.
    pub fn append_attr_struct<T: IntoBytes + Immutable>(&mut self, attr_type: u16, data: &T) {
        self.append_attr(attr_type, data.as_bytes());
    }

    pub fn append_attr_u32(&mut self, attr_type: u16, value: u32) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    pub fn append_attr_u64(&mut self, attr_type: u16, value: u64) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    pub fn append_attr_i64(&mut self, attr_type: u16, value: i64) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append a NUL-terminated string attribute.
    pub fn append_attr_str(&mut self, attr_type: u16, value: &str) {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        self.append_attr(attr_type, &data);
    }

    /// Open a nested attribute; close it with [`nest_end`](Self::nest_end).
    pub fn nest_start(&mut self, attr_type: u16) -> NestToken {
        let offset = self.buf.len();
        let attr = NlAttr::new(attr_type | NLA_F_NESTED, 0);
        self.buf.extend_from_slice(attr.as_bytes());
        NestToken { offset }
    }

    /// Close a nested attribute, patching its length.
    pub fn nest_end(&mut self, token: NestToken) {
        let len = (self.buf.len() - token.offset) as u16;
        self.buf[token.offset..token.offset + 2].copy_from_slice(&len.to_ne_bytes());
        self.buf.resize(nla_align(self.buf.len()), 0);
    }

    pub fn set_seq(&mut self, seq: u32) {
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
    }

    pub fn set_pid(&mut self, pid: u32) {
        self.buf[12..16].copy_from_slice(&pid.to_ne_bytes());
    }

    /// Patch the total length into the header and return the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }

    /// The message built so far, without the length patched.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{AttrIter, NLA_HDRLEN};
    use crate::netlink::message::{NLM_F_REQUEST, NlMsgType};

    #[test]
    fn test_header_only() {
        let msg = MessageBuilder::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST).finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN);

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_len as usize, NLMSG_HDRLEN);
        assert_eq!(header.nlmsg_type, NlMsgType::RTM_GETLINK);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
    }

    #[test]
    fn test_string_attribute_is_padded() {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWLINK, NLM_F_REQUEST);
        builder.append_attr_str(3, "veth0");
        let msg = builder.finish();

        // "veth0\0" is 6 bytes, padded to 8
        assert_eq!(msg.len(), NLMSG_HDRLEN + NLA_HDRLEN + 8);
        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN..]).collect();
        assert_eq!(attrs, vec![(3, &b"veth0\0"[..])]);
    }

    #[test]
    fn test_nested_attribute() {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWLINK, NLM_F_REQUEST);
        let outer = builder.nest_start(18);
        builder.append_attr_str(1, "veth");
        let inner = builder.nest_start(2);
        builder.append_attr_u32(4, 1500);
        builder.nest_end(inner);
        builder.nest_end(outer);
        let msg = builder.finish();

        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN..]).collect();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].0, 18);

        let nested: Vec<_> = AttrIter::new(attrs[0].1).collect();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0], (1, &b"veth\0"[..]));
        let innermost: Vec<_> = AttrIter::new(nested[1].1).collect();
        assert_eq!(innermost, vec![(4, &1500u32.to_ne_bytes()[..])]);
    }

    #[test]
    fn test_seq_and_pid() {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_GETQDISC, NLM_F_REQUEST);
        builder.set_seq(7);
        builder.set_pid(99);
        let msg = builder.finish();
        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_seq, 7);
        assert_eq!(header.nlmsg_pid, 99);
    }
}
