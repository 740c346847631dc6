//! One end of a link and its namespace-scoped lifecycle.
//!
//! Every operation opens a session in the device's namespace, resolves the
//! link and releases the session before returning, whether it succeeded or
//! not. Nothing is rolled back: a failing step leaves the earlier steps in
//! place.

use crate::control::{
    HardwareAddr, IpNetwork, LinkControl, LinkHandle, NamespaceResolver, disable_ipv6_key,
};
use crate::error::{Error, Result};
use crate::qdisc::{DeviceProperties, handle};

/// A network device inside a namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    pub name: String,
    /// Hardware address to assign; `None` keeps the kernel's choice.
    pub address: Option<HardwareAddr>,
    pub networks: Vec<IpNetwork>,
    /// MTU to apply in [`set`](Self::set); 0 leaves it unchanged.
    pub mtu: u32,
    /// Namespace identifier; empty is the current namespace.
    pub namespace: String,
    pub properties: Option<DeviceProperties>,
    link: Option<LinkHandle>,
}

impl Device {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// The link handle cached by the last operation, if any.
    pub fn link(&self) -> Option<&LinkHandle> {
        self.link.as_ref()
    }

    pub(crate) async fn session<R: NamespaceResolver>(&self, resolver: &R) -> Result<R::Session> {
        resolver.enter(&self.namespace).await
    }

    /// Resolve the link in `session`, reusing the cached index when it still
    /// names this device.
    async fn resolve<S: LinkControl>(&mut self, session: &S) -> Result<LinkHandle> {
        if let Some(cached) = &self.link {
            match session.link_by_index(cached.index).await? {
                Some(link) if link.name == self.name => return Ok(link),
                _ => {
                    tracing::debug!(
                        link = %self.name,
                        index = cached.index,
                        "cached link handle is stale"
                    );
                }
            }
        }

        let link = session
            .link_by_name(&self.name)
            .await
            .map_err(|e| self.wrap("look up link", e))?;
        self.link = Some(link.clone());
        Ok(link)
    }

    fn wrap(&self, operation: &str, err: Error) -> Error {
        match err {
            Error::Kernel { errno, .. } if errno == libc::ENODEV => Error::LinkNotFound {
                name: self.name.clone(),
            },
            err => err.with_context(format!("{operation} {}", self.name)),
        }
    }

    /// Look up the link and cache its handle.
    pub async fn open<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        let session = self.session(resolver).await?;
        self.link = None;
        self.resolve(&session).await?;
        tracing::debug!(link = %self.name, namespace = %self.namespace, "opened device");
        Ok(())
    }

    /// Bring the link up and apply MTU, hardware address and IP networks.
    ///
    /// Addresses already on the link are removed first, except link-local
    /// ones.
    pub async fn set<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        let session = self.session(resolver).await?;
        let link = self.resolve(&session).await?;

        session
            .set_link_up(&link)
            .await
            .map_err(|e| self.wrap("set up", e))?;

        if self.mtu > 0 {
            session
                .set_mtu(&link, self.mtu)
                .await
                .map_err(|e| self.wrap("set mtu on", e))?;
        }

        if let Some(address) = self.address {
            session
                .set_hardware_address(&link, address)
                .await
                .map_err(|e| self.wrap("set hardware address on", e))?;
        }

        let existing = session
            .addresses(&link)
            .await
            .map_err(|e| self.wrap("list addresses on", e))?;
        for network in existing.iter().filter(|n| !n.is_link_local()) {
            session
                .del_address(&link, network)
                .await
                .map_err(|e| self.wrap(&format!("delete address {network} from"), e))?;
        }

        for network in &self.networks {
            if network.is_ipv6() {
                session
                    .write_sysctl(&disable_ipv6_key(&self.name), "0")
                    .await
                    .map_err(|e| self.wrap("enable ipv6 on", e))?;
            }
            session
                .add_address(&link, network)
                .await
                .map_err(|e| self.wrap(&format!("add address {network} to"), e))?;
        }

        tracing::debug!(
            link = %self.name,
            namespace = %self.namespace,
            networks = self.networks.len(),
            "configured device"
        );
        Ok(())
    }

    /// Replace the link's qdiscs with the chain planned from its properties.
    ///
    /// A device without properties ends up with no shaping at all.
    pub async fn set_properties<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        let session = self.session(resolver).await?;
        let link = self.resolve(&session).await?;

        let chain = self
            .properties
            .as_ref()
            .map(|p| p.plan(link.index))
            .transpose()?
            .unwrap_or_default();

        self.clear_in(&session, &link).await?;

        for qdisc in &chain {
            session
                .add_qdisc(qdisc)
                .await
                .map_err(|e| self.wrap(&format!("add {} qdisc to", qdisc.kind.name()), e))?;
        }

        tracing::debug!(
            link = %self.name,
            namespace = %self.namespace,
            qdiscs = chain.len(),
            "applied device properties"
        );
        Ok(())
    }

    /// Remove the link's shaping.
    pub async fn clear_properties<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        let session = self.session(resolver).await?;
        let link = self.resolve(&session).await?;
        self.clear_in(&session, &link).await
    }

    /// Delete every root qdisc with a real handle; children go with their
    /// parent and the default qdisc (handle 0) cannot be deleted.
    async fn clear_in<S: LinkControl>(&self, session: &S, link: &LinkHandle) -> Result<()> {
        let qdiscs = session
            .qdiscs(link)
            .await
            .map_err(|e| self.wrap("list qdiscs on", e))?;

        for qdisc in qdiscs
            .iter()
            .filter(|q| q.parent == handle::ROOT && q.handle != handle::UNSPEC)
        {
            session
                .del_qdisc(qdisc)
                .await
                .map_err(|e| self.wrap(&format!("delete {} qdisc from", qdisc.kind), e))?;
        }
        Ok(())
    }

    /// Delete the link.
    pub async fn delete<R: NamespaceResolver>(&mut self, resolver: &R) -> Result<()> {
        let session = self.session(resolver).await?;
        let link = self.resolve(&session).await?;

        session
            .delete_link(&link)
            .await
            .map_err(|e| self.wrap("delete", e))?;
        self.link = None;

        tracing::info!(link = %self.name, namespace = %self.namespace, "deleted device");
        Ok(())
    }
}
