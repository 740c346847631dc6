//! In-memory link control backend.
//!
//! [`MockNetwork`] models just enough kernel behaviour to exercise the
//! lifecycle code without privileges: veth ends that die together, a
//! default qdisc with handle 0, IPv6 that stays disabled until its sysctl is
//! cleared, and kernel-style errno failures. Failures can also be injected
//! per operation.
//!
//! ```ignore
//! let net = MockNetwork::new();
//! net.add_namespace("blue");
//! let manager = LinkManager::new(net.clone(), ManagerConfig::default())?;
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::control::{
    HardwareAddr, IpNetwork, LinkControl, LinkHandle, NamespaceResolver, QdiscEntry, VethRequest,
    disable_ipv6_key,
};
use crate::error::{Error, Result};
use crate::qdisc::{Qdisc, handle};

const DEFAULT_MTU: u32 = 1500;

/// Snapshot of a link in a mock namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct MockLink {
    pub index: u32,
    pub name: String,
    pub up: bool,
    pub mtu: u32,
    pub address: HardwareAddr,
    pub addresses: Vec<IpNetwork>,
    pub qdiscs: Vec<QdiscEntry>,
    /// Namespace and index of the other veth end.
    pub peer: Option<(String, u32)>,
}

impl MockLink {
    fn new(index: u32, name: &str) -> Self {
        let [.., hi, lo] = index.to_be_bytes();
        Self {
            index,
            name: name.to_string(),
            up: false,
            mtu: DEFAULT_MTU,
            address: HardwareAddr([0x02, 0, 0, 0, hi, lo]),
            addresses: Vec::new(),
            qdiscs: vec![default_qdisc(index)],
            peer: None,
        }
    }

    fn handle(&self) -> LinkHandle {
        LinkHandle {
            index: self.index,
            name: self.name.clone(),
        }
    }

    /// EUI-64 style fe80::/64 address derived from the hardware address.
    fn link_local(&self) -> Result<IpNetwork> {
        let [a, b, c, d, e, f] = self.address.0;
        let ip = Ipv6Addr::from([
            0xfe, 0x80, 0, 0, 0, 0, 0, 0, a ^ 0x02, b, c, 0xff, 0xfe, d, e, f,
        ]);
        IpNetwork::new(IpAddr::V6(ip), 64)
    }
}

fn default_qdisc(index: u32) -> QdiscEntry {
    QdiscEntry {
        link_index: index,
        kind: "noqueue".into(),
        handle: handle::UNSPEC,
        parent: handle::ROOT,
    }
}

fn errno(code: i32) -> Error {
    Error::from_errno(-code)
}

#[derive(Debug, Default)]
struct MockNamespace {
    links: Vec<MockLink>,
    sysctls: HashMap<String, String>,
}

impl MockNamespace {
    fn by_name(&self, name: &str) -> Option<&MockLink> {
        self.links.iter().find(|l| l.name == name)
    }

    fn by_index_mut(&mut self, index: u32) -> Result<&mut MockLink> {
        self.links
            .iter_mut()
            .find(|l| l.index == index)
            .ok_or_else(|| errno(libc::ENODEV))
    }
}

#[derive(Debug)]
struct State {
    namespaces: HashMap<String, MockNamespace>,
    next_index: u32,
    active_sessions: usize,
    peak_sessions: usize,
    failures: HashMap<String, i32>,
    calls: Vec<String>,
}

impl State {
    fn namespace(&mut self, ns: &str) -> Result<&mut MockNamespace> {
        self.namespaces.get_mut(ns).ok_or_else(|| Error::Namespace {
            namespace: ns.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }

    fn alloc_index(&mut self) -> u32 {
        self.next_index += 1;
        self.next_index
    }

    fn insert_link(&mut self, ns: &str, name: &str) -> Result<u32> {
        let index = self.alloc_index();
        let namespace = self.namespace(ns)?;
        if namespace.by_name(name).is_some() {
            return Err(errno(libc::EEXIST));
        }
        namespace.links.push(MockLink::new(index, name));
        namespace
            .sysctls
            .insert(disable_ipv6_key(name), "1".into());
        Ok(index)
    }

    fn remove_link(&mut self, ns: &str, index: u32) -> Result<()> {
        let namespace = self.namespace(ns)?;
        let pos = namespace
            .links
            .iter()
            .position(|l| l.index == index)
            .ok_or_else(|| errno(libc::ENODEV))?;
        let link = namespace.links.remove(pos);
        namespace.sysctls.remove(&disable_ipv6_key(&link.name));

        if let Some((peer_ns, peer_index)) = link.peer
            && let Some(peer) = self.namespaces.get_mut(&peer_ns)
            && let Some(pos) = peer.links.iter().position(|l| l.index == peer_index)
        {
            let peer_link = peer.links.remove(pos);
            peer.sysctls.remove(&disable_ipv6_key(&peer_link.name));
        }
        Ok(())
    }
}

/// A set of in-memory namespaces. Clones share state.
///
/// The current namespace (`""`) always exists.
#[derive(Debug, Clone)]
pub struct MockNetwork {
    state: Arc<Mutex<State>>,
    delay: Option<Duration>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(String::new(), MockNamespace::default());
        Self {
            state: Arc::new(Mutex::new(State {
                namespaces,
                next_index: 1,
                active_sessions: 0,
                peak_sessions: 0,
                failures: HashMap::new(),
                calls: Vec::new(),
            })),
            delay: None,
        }
    }

    /// Make every session operation sleep for `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_namespace(&self, name: &str) {
        self.lock()
            .namespaces
            .entry(name.to_string())
            .or_default();
    }

    /// Add a standalone link, as if created outside this crate.
    pub fn add_link(&self, ns: &str, name: &str) -> Option<u32> {
        self.lock().insert_link(ns, name).ok()
    }

    /// Remove a link behind the manager's back, peer included.
    pub fn delete_link_named(&self, ns: &str, name: &str) {
        let mut state = self.lock();
        let index = state
            .namespaces
            .get(ns)
            .and_then(|n| n.by_name(name))
            .map(|l| l.index);
        if let Some(index) = index {
            let _ = state.remove_link(ns, index);
        }
    }

    pub fn link(&self, ns: &str, name: &str) -> Option<MockLink> {
        self.lock().namespaces.get(ns)?.by_name(name).cloned()
    }

    pub fn links(&self, ns: &str) -> Vec<MockLink> {
        self.lock()
            .namespaces
            .get(ns)
            .map(|n| n.links.clone())
            .unwrap_or_default()
    }

    /// Qdiscs on a link, root first.
    pub fn qdiscs(&self, ns: &str, name: &str) -> Vec<QdiscEntry> {
        self.link(ns, name).map(|l| l.qdiscs).unwrap_or_default()
    }

    pub fn sysctl(&self, ns: &str, key: &str) -> Option<String> {
        self.lock().namespaces.get(ns)?.sysctls.get(key).cloned()
    }

    /// Fail the next call of `operation` (a [`LinkControl`] method name,
    /// or `"enter"`) with `code`.
    pub fn fail_next(&self, operation: &str, code: i32) {
        self.lock().failures.insert(operation.to_string(), code);
    }

    /// Operations performed so far, as `"<namespace>:<operation>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().active_sessions
    }

    /// Most sessions that were ever open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.lock().peak_sessions
    }
}

impl NamespaceResolver for MockNetwork {
    type Session = MockSession;

    async fn enter(&self, namespace: &str) -> Result<MockSession> {
        let mut state = self.lock();
        state.calls.push(format!("{namespace}:enter"));
        if let Some(code) = state.failures.remove("enter") {
            return Err(Error::Namespace {
                namespace: namespace.to_string(),
                source: std::io::Error::from_raw_os_error(code),
            });
        }
        state.namespace(namespace)?;

        state.active_sessions += 1;
        state.peak_sessions = state.peak_sessions.max(state.active_sessions);
        Ok(MockSession {
            network: self.clone(),
            namespace: namespace.to_string(),
        })
    }
}

/// A session in one mock namespace.
#[derive(Debug)]
pub struct MockSession {
    network: MockNetwork,
    namespace: String,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        let mut state = self.network.lock();
        state.active_sessions = state.active_sessions.saturating_sub(1);
    }
}

impl MockSession {
    /// Record `operation`, apply any injected failure, then run `f`.
    async fn op<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut State, &str) -> Result<T>,
    ) -> Result<T> {
        if let Some(delay) = self.network.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.network.lock();
        state.calls.push(format!("{}:{operation}", self.namespace));
        if let Some(code) = state.failures.remove(operation) {
            return Err(errno(code));
        }
        f(&mut state, &self.namespace)
    }

    async fn with_link<T>(
        &self,
        operation: &str,
        link: &LinkHandle,
        f: impl FnOnce(&mut MockLink) -> Result<T>,
    ) -> Result<T> {
        self.op(operation, |state, ns| f(state.namespace(ns)?.by_index_mut(link.index)?))
            .await
    }
}

fn remove_qdisc_tree(qdiscs: &mut Vec<QdiscEntry>, removed: u32) {
    let major = handle::major(removed);
    let children: Vec<u32> = qdiscs
        .iter()
        .filter(|q| q.parent != handle::ROOT && handle::major(q.parent) == major)
        .map(|q| q.handle)
        .collect();
    qdiscs.retain(|q| q.handle != removed);
    for child in children {
        remove_qdisc_tree(qdiscs, child);
    }
}

impl LinkControl for MockSession {
    async fn create_veth(&self, request: &VethRequest) -> Result<()> {
        let request = request.clone();
        self.op("create_veth", move |state, ns| {
            let peer_ns = request.peer_namespace.clone().unwrap_or_else(|| ns.to_string());
            state.namespace(&peer_ns)?;
            if state.namespace(ns)?.by_name(&request.name).is_some()
                || state.namespace(&peer_ns)?.by_name(&request.peer_name).is_some()
                || (peer_ns == ns && request.name == request.peer_name)
            {
                return Err(errno(libc::EEXIST));
            }

            let local = state.insert_link(ns, &request.name)?;
            let peer = state.insert_link(&peer_ns, &request.peer_name)?;
            let mtu = request.mtu.unwrap_or(DEFAULT_MTU);

            let link = state.namespace(ns)?.by_index_mut(local)?;
            link.mtu = mtu;
            link.peer = Some((peer_ns.clone(), peer));
            if let Some(addr) = request.address {
                link.address = addr;
            }

            let link = state.namespace(&peer_ns)?.by_index_mut(peer)?;
            link.mtu = mtu;
            link.peer = Some((ns.to_string(), local));
            if let Some(addr) = request.peer_address {
                link.address = addr;
            }
            Ok(())
        })
        .await
    }

    async fn link_by_name(&self, name: &str) -> Result<LinkHandle> {
        self.op("link_by_name", |state, ns| {
            state
                .namespace(ns)?
                .by_name(name)
                .map(MockLink::handle)
                .ok_or_else(|| Error::LinkNotFound {
                    name: name.to_string(),
                })
        })
        .await
    }

    async fn link_by_index(&self, index: u32) -> Result<Option<LinkHandle>> {
        self.op("link_by_index", |state, ns| {
            Ok(state
                .namespace(ns)?
                .links
                .iter()
                .find(|l| l.index == index)
                .map(MockLink::handle))
        })
        .await
    }

    async fn delete_link(&self, link: &LinkHandle) -> Result<()> {
        self.op("delete_link", |state, ns| state.remove_link(ns, link.index))
            .await
    }

    async fn set_link_up(&self, link: &LinkHandle) -> Result<()> {
        self.with_link("set_link_up", link, |l| {
            l.up = true;
            Ok(())
        })
        .await
    }

    async fn set_mtu(&self, link: &LinkHandle, mtu: u32) -> Result<()> {
        self.with_link("set_mtu", link, |l| {
            if !(68..=65535).contains(&mtu) {
                return Err(errno(libc::EINVAL));
            }
            l.mtu = mtu;
            Ok(())
        })
        .await
    }

    async fn set_hardware_address(&self, link: &LinkHandle, address: HardwareAddr) -> Result<()> {
        self.with_link("set_hardware_address", link, |l| {
            // Multicast addresses are not valid unicast link addresses.
            if address.0[0] & 0x01 != 0 {
                return Err(errno(libc::EADDRNOTAVAIL));
            }
            l.address = address;
            Ok(())
        })
        .await
    }

    async fn addresses(&self, link: &LinkHandle) -> Result<Vec<IpNetwork>> {
        self.with_link("addresses", link, |l| Ok(l.addresses.clone()))
            .await
    }

    async fn add_address(&self, link: &LinkHandle, network: &IpNetwork) -> Result<()> {
        self.op("add_address", |state, ns| {
            let namespace = state.namespace(ns)?;
            let ipv6_disabled = namespace
                .sysctls
                .get(&disable_ipv6_key(&link.name))
                .is_some_and(|v| v == "1");
            let l = namespace.by_index_mut(link.index)?;
            if network.is_ipv6() && ipv6_disabled {
                return Err(errno(libc::EACCES));
            }
            if l.addresses.iter().any(|a| a.addr() == network.addr()) {
                return Err(errno(libc::EEXIST));
            }
            l.addresses.push(*network);
            Ok(())
        })
        .await
    }

    async fn del_address(&self, link: &LinkHandle, network: &IpNetwork) -> Result<()> {
        self.with_link("del_address", link, |l| {
            let before = l.addresses.len();
            l.addresses.retain(|a| a != network);
            if l.addresses.len() == before {
                return Err(errno(libc::EADDRNOTAVAIL));
            }
            Ok(())
        })
        .await
    }

    async fn write_sysctl(&self, key: &str, value: &str) -> Result<()> {
        self.op("write_sysctl", |state, ns| {
            let namespace = state.namespace(ns)?;
            namespace.sysctls.insert(key.to_string(), value.to_string());

            // Enabling IPv6 assigns the link-local address.
            let link_name = key
                .strip_prefix("net/ipv6/conf/")
                .and_then(|rest| rest.strip_suffix("/disable_ipv6"));
            if let Some(name) = link_name
                && value == "0"
                && let Some(link) = namespace.links.iter_mut().find(|l| l.name == name)
            {
                let ll = link.link_local()?;
                if !link.addresses.contains(&ll) {
                    link.addresses.push(ll);
                }
            }
            Ok(())
        })
        .await
    }

    async fn qdiscs(&self, link: &LinkHandle) -> Result<Vec<QdiscEntry>> {
        self.with_link("qdiscs", link, |l| Ok(l.qdiscs.clone()))
            .await
    }

    async fn add_qdisc(&self, qdisc: &Qdisc) -> Result<()> {
        let qdisc = *qdisc;
        self.op("add_qdisc", move |state, ns| {
            let link = state.namespace(ns)?.by_index_mut(qdisc.link_index)?;
            if link.qdiscs.iter().any(|q| q.handle == qdisc.handle) {
                return Err(errno(libc::EEXIST));
            }

            let entry = QdiscEntry {
                link_index: qdisc.link_index,
                kind: qdisc.kind.name().to_string(),
                handle: qdisc.handle,
                parent: qdisc.parent,
            };

            if qdisc.parent == handle::ROOT {
                if link
                    .qdiscs
                    .iter()
                    .any(|q| q.parent == handle::ROOT && q.handle != handle::UNSPEC)
                {
                    return Err(errno(libc::EEXIST));
                }
                link.qdiscs.retain(|q| q.parent != handle::ROOT);
                link.qdiscs.insert(0, entry);
            } else {
                let major = handle::major(qdisc.parent);
                let parent_exists = link
                    .qdiscs
                    .iter()
                    .any(|q| handle::major(q.handle) == major && q.handle != handle::UNSPEC);
                if !parent_exists {
                    return Err(errno(libc::ENOENT));
                }
                link.qdiscs.push(entry);
            }
            Ok(())
        })
        .await
    }

    async fn del_qdisc(&self, qdisc: &QdiscEntry) -> Result<()> {
        let qdisc = qdisc.clone();
        self.op("del_qdisc", move |state, ns| {
            let link = state.namespace(ns)?.by_index_mut(qdisc.link_index)?;
            if qdisc.handle == handle::UNSPEC
                || !link
                    .qdiscs
                    .iter()
                    .any(|q| q.handle == qdisc.handle && q.parent == qdisc.parent)
            {
                return Err(errno(libc::ENOENT));
            }

            remove_qdisc_tree(&mut link.qdiscs, qdisc.handle);
            if qdisc.parent == handle::ROOT {
                link.qdiscs.insert(0, default_qdisc(link.index));
            }
            Ok(())
        })
        .await
    }
}
