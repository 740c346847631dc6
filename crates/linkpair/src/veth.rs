//! Veth link pairs.

use serde::{Deserialize, Serialize};

use crate::control::{HardwareAddr, IpNetwork, LinkControl, NamespaceResolver, VethRequest};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::manager::LinkManager;
use crate::qdisc::DeviceProperties;

/// MTU used when the configuration leaves it at 0.
pub const DEFAULT_MTU: u32 = 1500;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_NAME_LEN: usize = 15;

/// Configuration for one veth pair, as supplied by an orchestrator.
///
/// ```json
/// {
///   "localName": "veth-a",
///   "peerName": "veth-b",
///   "peerNamespace": "blue",
///   "peerIpAddr": ["10.0.0.2/24"],
///   "peerProps": { "rate": "100mbit", "latency": "20ms" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VethConfig {
    pub local_name: String,
    pub peer_name: String,
    /// Colon-hex MAC; empty keeps the kernel's random address.
    pub local_addr: String,
    pub peer_addr: String,
    pub local_ip_addr: Vec<IpNetwork>,
    pub peer_ip_addr: Vec<IpNetwork>,
    pub local_namespace: String,
    pub peer_namespace: String,
    /// 0 means [`DEFAULT_MTU`].
    pub mtu: u32,
    pub local_props: Option<DeviceProperties>,
    pub peer_props: Option<DeviceProperties>,
}

fn parse_mac(field: &'static str, value: &str) -> Result<Option<HardwareAddr>> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e| match e {
            Error::Validation { reason, .. } => Error::Validation { field, reason },
            other => other,
        })
}

fn check_name(field: &'static str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::validation(
            field,
            format!("{name:?} is longer than {MAX_NAME_LEN} bytes"),
        ));
    }
    if name.contains(['/', ' ']) || name == "." || name == ".." {
        return Err(Error::validation(field, format!("{name:?} is not a valid interface name")));
    }
    Ok(())
}

/// Two devices joined by a veth link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkPair {
    pub local: Device,
    pub peer: Device,
}

impl LinkPair {
    /// Build both devices from `config`. Nothing touches the kernel yet.
    pub fn from_config(config: &VethConfig) -> Result<Self> {
        check_name("local name", &config.local_name)?;
        check_name("peer name", &config.peer_name)?;

        let mtu = if config.mtu == 0 { DEFAULT_MTU } else { config.mtu };

        let mut local = Device::new(&config.local_name, &config.local_namespace);
        local.address = parse_mac("local address", &config.local_addr)?;
        local.networks = config.local_ip_addr.clone();
        local.mtu = mtu;
        local.properties = config.local_props.clone();

        let mut peer = Device::new(&config.peer_name, &config.peer_namespace);
        peer.address = parse_mac("peer address", &config.peer_addr)?;
        peer.networks = config.peer_ip_addr.clone();
        peer.mtu = mtu;
        peer.properties = config.peer_props.clone();

        Ok(Self { local, peer })
    }

    fn request(&self) -> VethRequest {
        VethRequest {
            name: self.local.name.clone(),
            peer_name: self.peer.name.clone(),
            mtu: Some(self.local.mtu),
            address: self.local.address,
            peer_address: self.peer.address,
            peer_namespace: (self.peer.namespace != self.local.namespace)
                .then(|| self.peer.namespace.clone()),
        }
    }

    /// Create the pair from inside the local namespace in one request, then
    /// open the local end.
    pub(crate) async fn create_in<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        {
            let session = self.local.session(resolver).await?;
            session.create_veth(&self.request()).await.map_err(|e| {
                if e.is_already_exists() {
                    Error::NameExists {
                        name: self.local.name.clone(),
                    }
                } else {
                    e.with_context(format!("create veth {}", self.local.name))
                }
            })?;
        }

        tracing::info!(
            link = %self.local.name,
            peer = %self.peer.name,
            namespace = %self.local.namespace,
            peer_namespace = %self.peer.namespace,
            "created link pair"
        );
        self.local.open(resolver).await
    }

    pub(crate) async fn delete_in<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        self.local.delete(resolver).await?;
        match self.peer.delete(resolver).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(link = %self.peer.name, "peer went away with its local end");
                Ok(())
            }
            other => other,
        }
    }

    pub(crate) async fn open_in<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        self.local.open(resolver).await?;
        self.peer.open(resolver).await
    }

    pub(crate) async fn setup_in<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        self.open_in(resolver).await?;
        self.local.set(resolver).await?;
        self.peer.set(resolver).await?;
        self.local.set_properties(resolver).await?;
        self.peer.set_properties(resolver).await
    }

    /// Create the pair, then open the local end.
    pub async fn create<R: NamespaceResolver>(&mut self, manager: &LinkManager<R>) -> Result<()> {
        manager.create_pair(self).await
    }

    /// Delete the local end, then the peer.
    ///
    /// The kernel removes both ends together, so a peer that is already gone
    /// counts as deleted. Any other peer failure leaves it dangling.
    pub async fn delete<R: NamespaceResolver>(&mut self, manager: &LinkManager<R>) -> Result<()> {
        manager.delete_pair(self).await
    }

    /// Open the local end, then the peer.
    pub async fn open<R: NamespaceResolver>(&mut self, manager: &LinkManager<R>) -> Result<()> {
        manager.open_pair(self).await
    }

    /// Open both ends, configure them, then apply their shaping.
    pub async fn setup<R: NamespaceResolver>(&mut self, manager: &LinkManager<R>) -> Result<()> {
        manager.setup_pair(self).await
    }
}
