//! The orchestrator-facing front door.

use serde::{Deserialize, Serialize};

use crate::control::NamespaceResolver;
use crate::device::Device;
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::kernel::KernelNamespaces;
use crate::veth::LinkPair;

/// Default number of lifecycle operations allowed in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Manager settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Gate capacity; must be at least 1.
    pub max_concurrent: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Runs device and pair operations through one concurrency gate.
///
/// Every device or pair operation holds one gate slot for its whole
/// duration, so at most `max_concurrent` namespace sessions are open at once.
///
/// # Example
///
/// ```ignore
/// use linkpair::{LinkManager, LinkPair, ManagerConfig, VethConfig};
///
/// let manager = LinkManager::kernel(ManagerConfig::default())?;
/// let mut pair = LinkPair::from_config(&config)?;
/// pair.create(&manager).await?;
/// pair.setup(&manager).await?;
/// ```
#[derive(Debug, Clone)]
pub struct LinkManager<R> {
    resolver: R,
    gate: ConcurrencyGate,
}

impl LinkManager<KernelNamespaces> {
    /// A manager backed by the running kernel.
    pub fn kernel(config: ManagerConfig) -> Result<Self> {
        Self::new(KernelNamespaces::new(), config)
    }
}

impl<R: NamespaceResolver> LinkManager<R> {
    pub fn new(resolver: R, config: ManagerConfig) -> Result<Self> {
        Ok(Self {
            resolver,
            gate: ConcurrencyGate::new(config.max_concurrent)?,
        })
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub async fn open(&self, device: &mut Device) -> Result<()> {
        self.gate.run(device.open(&self.resolver)).await
    }

    pub async fn set(&self, device: &mut Device) -> Result<()> {
        self.gate.run(device.set(&self.resolver)).await
    }

    pub async fn set_properties(&self, device: &mut Device) -> Result<()> {
        self.gate.run(device.set_properties(&self.resolver)).await
    }

    pub async fn clear_properties(&self, device: &mut Device) -> Result<()> {
        self.gate.run(device.clear_properties(&self.resolver)).await
    }

    pub async fn delete(&self, device: &mut Device) -> Result<()> {
        self.gate.run(device.delete(&self.resolver)).await
    }

    /// Create `pair` and open its local end.
    ///
    /// Pair operations hold a single slot for the whole sequence, so their
    /// device steps are never interleaved with queued work.
    pub async fn create_pair(&self, pair: &mut LinkPair) -> Result<()> {
        self.gate.run(pair.create_in(&self.resolver)).await
    }

    pub async fn open_pair(&self, pair: &mut LinkPair) -> Result<()> {
        self.gate.run(pair.open_in(&self.resolver)).await
    }

    pub async fn delete_pair(&self, pair: &mut LinkPair) -> Result<()> {
        self.gate.run(pair.delete_in(&self.resolver)).await
    }

    pub async fn setup_pair(&self, pair: &mut LinkPair) -> Result<()> {
        self.gate.run(pair.setup_in(&self.resolver)).await
    }
}
