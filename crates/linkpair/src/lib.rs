//! Veth link pairs and traffic shaping inside Linux network namespaces.
//!
//! `linkpair` creates, configures and tears down veth pairs whose ends may
//! live in different network namespaces, and shapes their traffic with a
//! `netem` emulator and a `tbf` rate limiter. It is meant to sit under an
//! orchestrator that emulates network conditions between containers.
//!
//! # Layers
//!
//! - [`units`] parses rate, duration and percentage strings
//! - [`qdisc`] plans the qdisc chain for a [`DeviceProperties`]
//! - [`Device`] runs one link's lifecycle inside its namespace
//! - [`LinkPair`] creates, opens, configures and deletes both ends
//! - [`LinkManager`] routes every operation through a [`ConcurrencyGate`]
//!
//! The lifecycle code is generic over [`NamespaceResolver`]. The kernel
//! backend ([`KernelNamespaces`]) speaks rtnetlink through namespace-bound
//! sockets; [`mock::MockNetwork`] is an in-memory stand-in for tests.
//!
//! # Example
//!
//! ```ignore
//! use linkpair::{LinkManager, LinkPair, ManagerConfig, VethConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: VethConfig = serde_json::from_str(r#"{
//!         "localName": "veth-host",
//!         "peerName": "eth0",
//!         "peerNamespace": "blue",
//!         "peerIpAddr": ["10.0.0.2/24"],
//!         "peerProps": {"rate": "100mbit", "latency": "20ms", "loss": 0.5}
//!     }"#)?;
//!
//!     let manager = LinkManager::kernel(ManagerConfig::default())?;
//!     let mut pair = LinkPair::from_config(&config)?;
//!     pair.create(&manager).await?;
//!     pair.setup(&manager).await?;
//!     Ok(())
//! }
//! ```
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod control;
pub mod device;
pub mod error;
pub mod gate;
pub mod kernel;
pub mod manager;
pub mod mock;
pub mod netlink;
pub mod qdisc;
pub mod units;
pub mod veth;

pub use control::{
    HardwareAddr, IpNetwork, LinkControl, LinkHandle, NamespaceResolver, QdiscEntry, VethRequest,
};
pub use device::Device;
pub use error::{Error, Result};
pub use gate::ConcurrencyGate;
pub use kernel::{KernelNamespaces, KernelSession};
pub use manager::{LinkManager, ManagerConfig};
pub use qdisc::{DeviceProperties, Qdisc, QdiscKind};
pub use veth::{LinkPair, VethConfig};
