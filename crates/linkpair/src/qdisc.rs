//! Traffic-shaping properties and the qdisc chain planner.
//!
//! [`DeviceProperties::plan`] turns a set of human-readable shaping
//! parameters into at most two queueing disciplines:
//!
//! - a network emulator (`netem`) for delay, jitter, loss, duplication,
//!   reordering and corruption
//! - a token bucket filter (`tbf`) for the bandwidth cap
//!
//! When both are needed the emulator sits at the root and the token bucket
//! hangs off its first class, so impairment happens before shaping:
//!
//! ```text
//! root -> netem 1:0 -> tbf 10:0 (parent 1:1)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use linkpair::qdisc::DeviceProperties;
//!
//! let props = DeviceProperties {
//!     rate: "100mbit".into(),
//!     latency: "20ms".into(),
//!     loss: Percentage(1.0),
//!     ..Default::default()
//! };
//! let chain = props.plan(link.index)?;
//! assert_eq!(chain.len(), 2);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units::{Delay, Percentage, Rate};

/// Smallest burst the token bucket is given, in bytes.
pub const MIN_TBF_BURST: u32 = 5000;

/// Rate divisor for the token bucket burst size.
pub const TBF_BURST_DIVISOR: u64 = 250;

/// Peak-rate bucket size of the token bucket, in bytes.
pub const TBF_MIN_BURST: u32 = 1500;

/// Special handle values.
pub mod handle {
    /// Root qdisc.
    pub const ROOT: u32 = 0xFFFFFFFF;
    /// Unspecified; the kernel's default qdisc reports this handle.
    pub const UNSPEC: u32 = 0;

    /// Make a handle from major:minor.
    pub const fn make(major: u16, minor: u16) -> u32 {
        ((major as u32) << 16) | (minor as u32)
    }

    /// Get the major number from a handle.
    pub const fn major(handle: u32) -> u16 {
        (handle >> 16) as u16
    }

    /// Get the minor number from a handle.
    pub const fn minor(handle: u32) -> u16 {
        (handle & 0xFFFF) as u16
    }

    /// Format a handle the way `tc` prints it.
    pub fn format(handle: u32) -> String {
        match handle {
            ROOT => "root".to_string(),
            UNSPEC => "none".to_string(),
            _ if minor(handle) == 0 => format!("{:x}:", major(handle)),
            _ => format!("{:x}:{:x}", major(handle), minor(handle)),
        }
    }
}

/// Handle of whichever qdisc sits at the root.
pub const ROOT_QDISC_HANDLE: u32 = handle::make(1, 0);

/// Class of the root emulator that the token bucket attaches to.
pub const EMULATOR_CLASS: u32 = handle::make(1, 1);

/// Handle of the token bucket when it is chained under the emulator.
pub const CHAINED_TBF_HANDLE: u32 = handle::make(10, 0);

/// Traffic-shaping configuration for one device.
///
/// Every field is optional: an empty string or a zero percentage means the
/// parameter is not configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceProperties {
    pub rate: Rate,
    pub latency: Delay,
    pub jitter: Delay,
    pub delay_correlation: Percentage,
    pub loss: Percentage,
    pub loss_correlation: Percentage,
    pub duplicate: Percentage,
    pub duplicate_correlation: Percentage,
    pub reorder_probability: Percentage,
    pub reorder_correlation: Percentage,
    pub corrupt_probability: Percentage,
    pub corrupt_correlation: Percentage,
    /// Packets between reorder events.
    pub gap: u32,
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    /// Rate in bits per second.
    pub rate: u64,
    /// Bucket size in bytes.
    pub burst: u32,
    /// Peak-rate bucket size in bytes.
    pub min_burst: u32,
}

impl TokenBucket {
    /// Build a bucket sized for `rate`.
    pub fn for_rate(rate: u64) -> Self {
        let burst = (rate / TBF_BURST_DIVISOR).max(MIN_TBF_BURST as u64);
        Self {
            rate,
            burst: u32::try_from(burst).unwrap_or(u32::MAX),
            min_burst: TBF_MIN_BURST,
        }
    }
}

/// Network emulator parameters. Times are microseconds, the rest are percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Netem {
    pub latency: u32,
    pub jitter: u32,
    pub delay_correlation: f32,
    pub loss: f32,
    pub loss_correlation: f32,
    pub duplicate: f32,
    pub duplicate_correlation: f32,
    pub reorder_probability: f32,
    pub reorder_correlation: f32,
    pub corrupt_probability: f32,
    pub corrupt_correlation: f32,
    pub gap: u32,
}

/// The closed set of qdisc kinds the planner emits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QdiscKind {
    TokenBucket(TokenBucket),
    Netem(Netem),
}

impl QdiscKind {
    /// Kernel name of the qdisc.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenBucket(_) => "tbf",
            Self::Netem(_) => "netem",
        }
    }
}

/// A planned qdisc, wired to its link and position in the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Qdisc {
    pub link_index: u32,
    pub handle: u32,
    pub parent: u32,
    pub kind: QdiscKind,
}

fn field<T>(name: &'static str, parsed: Result<Option<T>>) -> Result<Option<T>> {
    parsed.map_err(|e| match e {
        Error::Validation { reason, .. } => Error::Validation {
            field: name,
            reason,
        },
        other => other,
    })
}

impl DeviceProperties {
    /// Plan the qdisc chain for the link with index `link_index`.
    ///
    /// Returns an empty chain when nothing is configured. The first invalid
    /// field aborts planning; no partial chain is returned.
    pub fn plan(&self, link_index: u32) -> Result<Vec<Qdisc>> {
        let token_bucket = field("rate", self.rate.parse())?.map(TokenBucket::for_rate);

        let latency = field("latency", self.latency.parse())?;
        let jitter = field("jitter", self.jitter.parse())?;
        let percentages = [
            field("delay correlation", self.delay_correlation.parse())?,
            field("loss", self.loss.parse())?,
            field("loss correlation", self.loss_correlation.parse())?,
            field("duplicate", self.duplicate.parse())?,
            field("duplicate correlation", self.duplicate_correlation.parse())?,
            field("reorder probability", self.reorder_probability.parse())?,
            field("reorder correlation", self.reorder_correlation.parse())?,
            field("corrupt probability", self.corrupt_probability.parse())?,
            field("corrupt correlation", self.corrupt_correlation.parse())?,
        ];

        let netem_enabled =
            latency.is_some() || jitter.is_some() || percentages.iter().any(Option::is_some);
        let netem = netem_enabled.then(|| {
            let [
                delay_correlation,
                loss,
                loss_correlation,
                duplicate,
                duplicate_correlation,
                reorder_probability,
                reorder_correlation,
                corrupt_probability,
                corrupt_correlation,
            ] = percentages.map(Option::unwrap_or_default);
            Netem {
                latency: latency.unwrap_or_default(),
                jitter: jitter.unwrap_or_default(),
                delay_correlation,
                loss,
                loss_correlation,
                duplicate,
                duplicate_correlation,
                reorder_probability,
                reorder_correlation,
                corrupt_probability,
                corrupt_correlation,
                gap: self.gap,
            }
        });

        let chain = match (netem, token_bucket) {
            (Some(netem), Some(tbf)) => vec![
                Qdisc {
                    link_index,
                    handle: ROOT_QDISC_HANDLE,
                    parent: handle::ROOT,
                    kind: QdiscKind::Netem(netem),
                },
                Qdisc {
                    link_index,
                    handle: CHAINED_TBF_HANDLE,
                    parent: EMULATOR_CLASS,
                    kind: QdiscKind::TokenBucket(tbf),
                },
            ],
            (Some(netem), None) => vec![Qdisc {
                link_index,
                handle: ROOT_QDISC_HANDLE,
                parent: handle::ROOT,
                kind: QdiscKind::Netem(netem),
            }],
            (None, Some(tbf)) => vec![Qdisc {
                link_index,
                handle: ROOT_QDISC_HANDLE,
                parent: handle::ROOT,
                kind: QdiscKind::TokenBucket(tbf),
            }],
            (None, None) => Vec::new(),
        };

        Ok(chain)
    }
}
