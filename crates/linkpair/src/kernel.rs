//! rtnetlink implementation of the link control services.

use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use crate::control::{
    HardwareAddr, IpNetwork, LinkControl, LinkHandle, NamespaceResolver, QdiscEntry, VethRequest,
};
use crate::error::{Error, Result};
use crate::netlink::Connection;
use crate::netlink::link::VethLink;
use crate::netlink::messages::LinkMessage;
use crate::netlink::namespace::{self, NamespaceFd};
use crate::qdisc::Qdisc;

const PROC_SYS: &str = "/proc/sys";

/// Resolves namespace identifiers to kernel sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelNamespaces;

impl KernelNamespaces {
    pub fn new() -> Self {
        Self
    }
}

impl NamespaceResolver for KernelNamespaces {
    type Session = KernelSession;

    async fn enter(&self, namespace: &str) -> Result<KernelSession> {
        KernelSession::open(namespace)
    }
}

/// A route netlink connection bound to one namespace.
///
/// The namespace file stays open for the session's lifetime so blocking
/// work such as sysctl writes can enter the same namespace.
pub struct KernelSession {
    conn: Connection,
    namespace: Option<Arc<NamespaceFd>>,
}

impl KernelSession {
    /// Open a session in `namespace`, or the current namespace when empty.
    pub fn open(namespace: &str) -> Result<Self> {
        if namespace.is_empty() {
            return Ok(Self {
                conn: Connection::new()?,
                namespace: None,
            });
        }

        let fd = namespace::open(namespace)?;
        let conn = Connection::new_in_namespace(&fd)?;
        tracing::trace!(namespace = %fd.label(), "opened namespace session");
        Ok(Self {
            conn,
            namespace: Some(Arc::new(fd)),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn handle_of(link: LinkMessage) -> LinkHandle {
    LinkHandle {
        index: link.index(),
        name: link.name.unwrap_or_default(),
    }
}

impl LinkControl for KernelSession {
    async fn create_veth(&self, request: &VethRequest) -> Result<()> {
        let mut veth = VethLink::new(&request.name, &request.peer_name);
        if let Some(mtu) = request.mtu {
            veth = veth.mtu(mtu);
        }
        if let Some(addr) = request.address {
            veth = veth.address(addr.0);
        }
        if let Some(addr) = request.peer_address {
            veth = veth.peer_address(addr.0);
        }

        // Held until the kernel has acknowledged the request.
        let peer_ns = request
            .peer_namespace
            .as_deref()
            .map(namespace::open)
            .transpose()?;
        if let Some(ref ns) = peer_ns {
            veth = veth.peer_netns_fd(ns.as_raw_fd());
        }

        self.conn.add_veth(&veth).await
    }

    async fn link_by_name(&self, name: &str) -> Result<LinkHandle> {
        self.conn.get_link_by_name(name).await.map(handle_of)
    }

    async fn link_by_index(&self, index: u32) -> Result<Option<LinkHandle>> {
        Ok(self.conn.get_link_by_index(index).await?.map(handle_of))
    }

    async fn delete_link(&self, link: &LinkHandle) -> Result<()> {
        self.conn.del_link_by_index(link.index).await
    }

    async fn set_link_up(&self, link: &LinkHandle) -> Result<()> {
        self.conn.set_link_up_by_index(link.index).await
    }

    async fn set_mtu(&self, link: &LinkHandle, mtu: u32) -> Result<()> {
        self.conn.set_link_mtu_by_index(link.index, mtu).await
    }

    async fn set_hardware_address(&self, link: &LinkHandle, address: HardwareAddr) -> Result<()> {
        self.conn
            .set_link_address_by_index(link.index, address.0)
            .await
    }

    async fn addresses(&self, link: &LinkHandle) -> Result<Vec<IpNetwork>> {
        let addrs = self.conn.get_addresses_by_index(link.index).await?;
        addrs
            .iter()
            .filter_map(|a| a.primary().map(|ip| IpNetwork::new(ip, a.prefix_len())))
            .collect()
    }

    async fn add_address(&self, link: &LinkHandle, network: &IpNetwork) -> Result<()> {
        self.conn
            .add_address_by_index(link.index, network.addr(), network.prefix_len())
            .await
    }

    async fn del_address(&self, link: &LinkHandle, network: &IpNetwork) -> Result<()> {
        self.conn
            .del_address_by_index(link.index, network.addr(), network.prefix_len())
            .await
    }

    async fn write_sysctl(&self, key: &str, value: &str) -> Result<()> {
        let path = format!("{PROC_SYS}/{}", key.trim_start_matches('/'));
        let value = value.to_string();
        let ns = self.namespace.clone();
        tracing::debug!(%path, %value, "writing sysctl");

        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = ns.as_deref().map(namespace::enter_fd).transpose()?;
            std::fs::write(&path, value)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("sysctl task failed: {e}")))?
    }

    async fn qdiscs(&self, link: &LinkHandle) -> Result<Vec<QdiscEntry>> {
        let qdiscs = self.conn.get_qdiscs_by_index(link.index).await?;
        Ok(qdiscs
            .into_iter()
            .map(|q| QdiscEntry {
                link_index: q.ifindex(),
                kind: q.kind().unwrap_or_default().to_string(),
                handle: q.handle(),
                parent: q.parent(),
            })
            .collect())
    }

    async fn add_qdisc(&self, qdisc: &Qdisc) -> Result<()> {
        self.conn.add_qdisc(qdisc).await
    }

    async fn del_qdisc(&self, qdisc: &QdiscEntry) -> Result<()> {
        self.conn
            .del_qdisc_by_index(qdisc.link_index, qdisc.handle, qdisc.parent)
            .await
    }
}
