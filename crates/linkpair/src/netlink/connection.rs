//! Request/response handling over a route netlink socket.

use super::builder::MessageBuilder;
use super::message::{
    MessageIter, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST, NlMsgError,
};
use super::namespace::NamespaceFd;
use super::parse::FromNetlink;
use super::socket::NetlinkSocket;
use crate::error::Result;

/// A route netlink connection bound to one network namespace.
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    /// Connect in the calling thread's namespace.
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }

    /// Connect inside the namespace behind `ns`.
    ///
    /// All later requests on this connection operate in that namespace,
    /// regardless of which thread issues them.
    pub fn new_in_namespace(ns: &NamespaceFd) -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new_in_namespace(ns)?,
        })
    }

    pub fn socket(&self) -> &NetlinkSocket {
        &self.socket
    }

    async fn send(&self, mut builder: MessageBuilder) -> Result<u32> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;
        Ok(seq)
    }

    /// Send a request that expects only an ACK.
    pub async fn request_ack(&self, builder: MessageBuilder) -> Result<()> {
        let seq = self.send(builder).await?;

        loop {
            let data = self.socket.recv_msg().await?;
            for result in MessageIter::new(&data) {
                let (header, payload, _) = result?;

                if header.nlmsg_seq != seq {
                    continue;
                }

                if header.is_error() {
                    let err = NlMsgError::from_bytes(payload)?;
                    return err.into_result(header.nlmsg_flags, payload);
                }
            }
        }
    }

    /// Send a dump request and collect every reply message, headers included.
    pub async fn dump(&self, builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.send(builder).await?;
        let mut responses = Vec::new();

        loop {
            let data = self.socket.recv_msg().await?;

            for result in MessageIter::new(&data) {
                let (header, payload, whole) = result?;

                if header.nlmsg_seq != seq {
                    continue;
                }

                if header.is_error() {
                    let err = NlMsgError::from_bytes(payload)?;
                    err.into_result(header.nlmsg_flags, payload)?;
                    continue;
                }

                if header.is_done() {
                    return Ok(responses);
                }

                responses.push(whole.to_vec());
            }
        }
    }

    /// Dump every object of type `T`.
    ///
    /// Messages that fail to parse are skipped.
    pub async fn dump_typed<T: FromNetlink>(&self, msg_type: u16) -> Result<Vec<T>> {
        let mut builder = dump_request(msg_type);

        let mut header_buf = Vec::new();
        T::write_dump_header(&mut header_buf);
        builder.append_bytes(&header_buf);

        let responses = self.dump(builder).await?;

        let mut parsed = Vec::with_capacity(responses.len());
        for response in responses {
            let Some(payload) = response.get(super::message::NLMSG_HDRLEN..) else {
                continue;
            };
            match T::from_bytes(payload) {
                Ok(msg) => parsed.push(msg),
                Err(e) => tracing::debug!(error = %e, "skipping unparseable dump message"),
            }
        }

        Ok(parsed)
    }
}

/// Build a dump request.
pub fn dump_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP)
}

/// Build a request expecting an ACK.
pub fn ack_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK)
}

/// Build a create request that fails if the object already exists.
pub fn create_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL)
}
