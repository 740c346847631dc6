//! Netlink message header and iteration.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::AttrIter;
use crate::error::{Error, Result};

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netlink message header (mirrors struct nlmsghdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: u32,
    /// Message type.
    pub nlmsg_type: u16,
    /// Additional flags.
    pub nlmsg_flags: u16,
    /// Sequence number.
    pub nlmsg_seq: u32,
    /// Sending process port ID.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// Create a new message header.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        }
    }

    /// Check if this is an error message.
    pub fn is_error(&self) -> bool {
        self.nlmsg_type == NlMsgType::ERROR
    }

    /// Check if this is a done message.
    pub fn is_done(&self) -> bool {
        self.nlmsg_type == NlMsgType::DONE
    }

    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Message types used by this crate.
pub struct NlMsgType;

impl NlMsgType {
    /// Error message or ACK.
    pub const ERROR: u16 = 2;
    /// End of multipart message.
    pub const DONE: u16 = 3;

    pub const RTM_NEWLINK: u16 = 16;
    pub const RTM_DELLINK: u16 = 17;
    pub const RTM_GETLINK: u16 = 18;
    pub const RTM_SETLINK: u16 = 19;

    pub const RTM_NEWADDR: u16 = 20;
    pub const RTM_DELADDR: u16 = 21;
    pub const RTM_GETADDR: u16 = 22;

    pub const RTM_NEWQDISC: u16 = 36;
    pub const RTM_DELQDISC: u16 = 37;
    pub const RTM_GETQDISC: u16 = 38;
}

/// Netlink message flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;

// Modifiers to GET request
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW request
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;

// Flags on an NLMSG_ERROR reply
pub const NLM_F_CAPPED: u16 = 0x100;
pub const NLM_F_ACK_TLVS: u16 = 0x200;

/// Extended ACK attribute carrying the kernel's error string.
pub const NLMSGERR_ATTR_MSG: u16 = 1;

/// Iterator over netlink messages in a buffer.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    /// Create a new message iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    /// Yields the header, the payload, and the whole message including header.
    type Item = Result<(&'a NlMsgHdr, &'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLMSG_HDRLEN {
            return None;
        }

        let header = match NlMsgHdr::from_bytes(self.data) {
            Ok(h) => h,
            Err(e) => return Some(Err(e)),
        };

        let msg_len = header.nlmsg_len as usize;
        if msg_len < NLMSG_HDRLEN || msg_len > self.data.len() {
            self.data = &[];
            return Some(Err(Error::InvalidMessage(format!(
                "invalid message length: {}",
                msg_len
            ))));
        }

        let whole = &self.data[..msg_len];
        let payload = &whole[NLMSG_HDRLEN..];
        self.data = self.data.get(nlmsg_align(msg_len)..).unwrap_or_default();

        Some(Ok((header, payload, whole)))
    }
}

/// Netlink error message payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct NlMsgError {
    /// Error code (negative errno or 0 for ACK).
    pub error: i32,
    /// Original message header that caused the error.
    pub msg: NlMsgHdr,
}

impl NlMsgError {
    /// Parse error message from payload.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }

    /// Check if this is an ACK (no error).
    pub fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// Convert into a result, using the extended ACK text when the kernel sent one.
    ///
    /// `flags` are the flags of the enclosing NLMSG_ERROR header and `payload`
    /// is its full payload.
    pub fn into_result(&self, flags: u16, payload: &[u8]) -> Result<()> {
        if self.is_ack() {
            return Ok(());
        }

        let mut err = Error::from_errno(self.error);
        if flags & NLM_F_ACK_TLVS != 0 {
            // Without NLM_F_CAPPED the original request is echoed back in full.
            let offset = if flags & NLM_F_CAPPED != 0 {
                std::mem::size_of::<Self>()
            } else {
                std::mem::size_of::<i32>() + self.msg.nlmsg_len as usize
            };
            let text = AttrIter::new(payload.get(offset..).unwrap_or_default())
                .find(|(kind, _)| *kind == NLMSGERR_ATTR_MSG)
                .map(|(_, data)| super::parse::parse_string_from_bytes(data));
            if let (Some(text), Error::Kernel { message, .. }) = (text, &mut err) {
                message.push_str(": ");
                message.push_str(&text);
            }
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::NlAttr;

    fn error_reply(errno: i32, flags: u16, ext: Option<&str>) -> (u16, Vec<u8>) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-errno).to_ne_bytes());
        payload.extend_from_slice(NlMsgHdr::new(NlMsgType::RTM_NEWLINK, 0).as_bytes());
        if let Some(text) = ext {
            let mut data = text.as_bytes().to_vec();
            data.push(0);
            payload.extend_from_slice(NlAttr::new(NLMSGERR_ATTR_MSG, data.len()).as_bytes());
            payload.extend_from_slice(&data);
        }
        (flags, payload)
    }

    #[test]
    fn test_message_iter() {
        let mut buf = Vec::new();
        let mut first = NlMsgHdr::new(NlMsgType::RTM_NEWLINK, NLM_F_MULTI);
        first.nlmsg_len = (NLMSG_HDRLEN + 4) as u32;
        buf.extend_from_slice(first.as_bytes());
        buf.extend_from_slice(&[1, 2, 3, 4]);
        buf.extend_from_slice(NlMsgHdr::new(NlMsgType::DONE, NLM_F_MULTI).as_bytes());

        let msgs: Vec<_> = MessageIter::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].1, &[1, 2, 3, 4]);
        assert_eq!(msgs[0].2.len(), NLMSG_HDRLEN + 4);
        assert!(msgs[1].0.is_done());
    }

    #[test]
    fn test_message_iter_bad_length() {
        let mut header = NlMsgHdr::new(NlMsgType::RTM_NEWLINK, 0);
        header.nlmsg_len = 4096;
        let buf = header.as_bytes().to_vec();
        let mut iter = MessageIter::new(&buf);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_ack() {
        let (flags, payload) = error_reply(0, 0, None);
        let err = NlMsgError::from_bytes(&payload).unwrap();
        assert!(err.into_result(flags, &payload).is_ok());
    }

    #[test]
    fn test_error_with_ext_ack() {
        let (flags, payload) = error_reply(
            libc::EEXIST,
            NLM_F_ACK_TLVS | NLM_F_CAPPED,
            Some("File exists"),
        );
        let err = NlMsgError::from_bytes(&payload).unwrap();
        let err = err.into_result(flags, &payload).unwrap_err();
        assert!(err.is_already_exists());
        assert!(err.to_string().ends_with(": File exists (errno 17)"));
    }
}
