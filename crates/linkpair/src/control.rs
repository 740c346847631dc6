//! The services the lifecycle manager runs on.
//!
//! [`NamespaceResolver`] turns a namespace identifier into a session, and
//! every session implements [`LinkControl`]. The kernel backend lives in
//! [`crate::kernel`] and an in-memory double in [`crate::mock`].

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::qdisc::Qdisc;

/// A resolved link inside one namespace session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub index: u32,
    pub name: String,
}

/// A 48-bit hardware address, written as colon-separated hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareAddr(pub [u8; 6]);

impl FromStr for HardwareAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid =
            || Error::validation("hardware address", format!("{s:?} is not a MAC address"));

        let sep = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(sep);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for HardwareAddr {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<HardwareAddr> for String {
    fn from(addr: HardwareAddr) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// An interface address with its prefix length, written as `addr/prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(Error::validation(
                "ip address",
                format!("prefix length {prefix_len} exceeds {max} for {addr}"),
            ));
        }
        Ok(Self { addr, prefix_len })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// 169.254.0.0/16 for IPv4, fe80::/10 for IPv6.
    pub fn is_link_local(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => v4.is_link_local(),
            IpAddr::V6(v6) => v6.segments()[0] & 0xffc0 == 0xfe80,
        }
    }
}

impl FromStr for IpNetwork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation("ip address", format!("{s:?} is not addr/prefix"));

        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix_len)
    }
}

impl TryFrom<String> for IpNetwork {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<IpNetwork> for String {
    fn from(net: IpNetwork) -> Self {
        net.to_string()
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// A qdisc as listed on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QdiscEntry {
    pub link_index: u32,
    pub kind: String,
    pub handle: u32,
    pub parent: u32,
}

/// Parameters for creating a veth pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VethRequest {
    pub name: String,
    pub peer_name: String,
    pub mtu: Option<u32>,
    pub address: Option<HardwareAddr>,
    pub peer_address: Option<HardwareAddr>,
    /// Namespace to place the peer in; `None` keeps it beside the local end.
    pub peer_namespace: Option<String>,
}

/// Link operations inside one network namespace.
pub trait LinkControl: Send + Sync {
    fn create_veth(&self, request: &VethRequest) -> impl Future<Output = Result<()>> + Send;

    /// Fails with a not-found error when no link has this name.
    fn link_by_name(&self, name: &str) -> impl Future<Output = Result<LinkHandle>> + Send;

    fn link_by_index(&self, index: u32) -> impl Future<Output = Result<Option<LinkHandle>>> + Send;

    fn delete_link(&self, link: &LinkHandle) -> impl Future<Output = Result<()>> + Send;

    fn set_link_up(&self, link: &LinkHandle) -> impl Future<Output = Result<()>> + Send;

    fn set_mtu(&self, link: &LinkHandle, mtu: u32) -> impl Future<Output = Result<()>> + Send;

    fn set_hardware_address(
        &self,
        link: &LinkHandle,
        address: HardwareAddr,
    ) -> impl Future<Output = Result<()>> + Send;

    fn addresses(&self, link: &LinkHandle) -> impl Future<Output = Result<Vec<IpNetwork>>> + Send;

    fn add_address(
        &self,
        link: &LinkHandle,
        network: &IpNetwork,
    ) -> impl Future<Output = Result<()>> + Send;

    fn del_address(
        &self,
        link: &LinkHandle,
        network: &IpNetwork,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write a sysctl; `key` uses `/` separators, e.g. `net/ipv6/conf/eth0/disable_ipv6`.
    fn write_sysctl(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    fn qdiscs(&self, link: &LinkHandle) -> impl Future<Output = Result<Vec<QdiscEntry>>> + Send;

    fn add_qdisc(&self, qdisc: &Qdisc) -> impl Future<Output = Result<()>> + Send;

    fn del_qdisc(&self, qdisc: &QdiscEntry) -> impl Future<Output = Result<()>> + Send;
}

/// Opens namespace sessions.
///
/// A session stays bound to its namespace until dropped.
pub trait NamespaceResolver: Send + Sync {
    type Session: LinkControl;

    /// Enter `namespace`; an empty identifier is the current namespace.
    fn enter(&self, namespace: &str) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// Sysctl key that enables or disables IPv6 on `link`.
pub fn disable_ipv6_key(link: &str) -> String {
    format!("net/ipv6/conf/{link}/disable_ipv6")
}
