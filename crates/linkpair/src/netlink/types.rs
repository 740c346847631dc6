//! Fixed-layout kernel structures and attribute numbers for the messages
//! this crate speaks.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

fn truncated<T>(data: &[u8]) -> Error {
    Error::Truncated {
        expected: std::mem::size_of::<T>(),
        actual: data.len(),
    }
}

/// Interface info message (struct ifinfomsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfInfoMsg {
    pub ifi_family: u8,
    pub __ifi_pad: u8,
    /// Device type (ARPHRD_*).
    pub ifi_type: u16,
    pub ifi_index: i32,
    /// Device flags (IFF_*).
    pub ifi_flags: u32,
    /// Mask of the flags being changed.
    pub ifi_change: u32,
}

impl IfInfoMsg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: i32) -> Self {
        self.ifi_index = index;
        self
    }

    /// Set `flags` within `change`, leaving other flags alone.
    pub fn with_flags(mut self, flags: u32, change: u32) -> Self {
        self.ifi_flags = flags;
        self.ifi_change = change;
        self
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| truncated::<Self>(data))
    }
}

/// Interface address message (struct ifaddrmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfAddrMsg {
    pub ifa_family: u8,
    pub ifa_prefixlen: u8,
    pub ifa_flags: u8,
    pub ifa_scope: u8,
    pub ifa_index: u32,
}

impl IfAddrMsg {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| truncated::<Self>(data))
    }
}

/// Traffic control message (struct tcmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TcMsg {
    pub tcm_family: u8,
    pub tcm_pad1: u8,
    pub tcm_pad2: u16,
    pub tcm_ifindex: i32,
    pub tcm_handle: u32,
    pub tcm_parent: u32,
    pub tcm_info: u32,
}

impl TcMsg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ifindex(mut self, ifindex: i32) -> Self {
        self.tcm_ifindex = ifindex;
        self
    }

    pub fn with_handle(mut self, handle: u32) -> Self {
        self.tcm_handle = handle;
        self
    }

    pub fn with_parent(mut self, parent: u32) -> Self {
        self.tcm_parent = parent;
        self
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| truncated::<Self>(data))
    }
}

/// Interface flags.
pub mod iff {
    pub const UP: u32 = libc::IFF_UP as u32;
}

/// Link attributes (IFLA_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IflaAttr {
    Address = 1,
    Ifname = 3,
    Mtu = 4,
    Linkinfo = 18,
    NetNsFd = 28,
}

/// Nested IFLA_LINKINFO attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IflaInfo {
    Kind = 1,
    Data = 2,
}

/// Nested IFLA_INFO_DATA attributes for veth.
pub mod veth {
    /// Carries the peer's ifinfomsg followed by its own IFLA_* attributes.
    pub const VETH_INFO_PEER: u16 = 1;
}

/// Address attributes (IFA_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IfaAttr {
    Address = 1,
    Local = 2,
    Broadcast = 4,
}

/// Traffic control attributes (TCA_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TcaAttr {
    Kind = 1,
    Options = 2,
}

/// Rate specification (struct tc_ratespec).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TcRateSpec {
    pub cell_log: u8,
    pub linklayer: u8,
    pub overhead: u16,
    pub cell_align: i16,
    pub mpu: u16,
    /// Bytes per second, saturated at u32::MAX.
    pub rate: u32,
}

/// Link layer types for [`TcRateSpec::linklayer`].
pub mod linklayer {
    pub const ETHERNET: u8 = 1;
}

pub mod tbf {
    use super::*;

    pub const TCA_TBF_PARMS: u16 = 1;
    pub const TCA_TBF_RTAB: u16 = 2;
    pub const TCA_TBF_RATE64: u16 = 4;
    pub const TCA_TBF_BURST: u16 = 6;

    /// struct tc_tbf_qopt
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
    pub struct TcTbfQopt {
        pub rate: TcRateSpec,
        pub peakrate: TcRateSpec,
        /// Queue limit in bytes.
        pub limit: u32,
        /// Bucket size in scheduler ticks.
        pub buffer: u32,
        /// Peak bucket size in scheduler ticks.
        pub mtu: u32,
    }
}

pub mod netem {
    use super::*;

    pub const TCA_NETEM_CORR: u16 = 1;
    pub const TCA_NETEM_REORDER: u16 = 3;
    pub const TCA_NETEM_CORRUPT: u16 = 4;
    pub const TCA_NETEM_LATENCY64: u16 = 10;
    pub const TCA_NETEM_JITTER64: u16 = 11;

    /// Default packet limit used by tc(8).
    pub const DEFAULT_LIMIT: u32 = 1000;

    /// struct tc_netem_qopt
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
    pub struct TcNetemQopt {
        /// Added delay in scheduler ticks.
        pub latency: u32,
        pub limit: u32,
        pub loss: u32,
        /// Re-ordering gap, 0 for none.
        pub gap: u32,
        pub duplicate: u32,
        /// Random jitter in scheduler ticks.
        pub jitter: u32,
    }

    /// struct tc_netem_corr
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
    pub struct TcNetemCorr {
        pub delay_corr: u32,
        pub loss_corr: u32,
        pub dup_corr: u32,
    }

    /// struct tc_netem_reorder
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
    pub struct TcNetemReorder {
        pub probability: u32,
        pub correlation: u32,
    }

    /// struct tc_netem_corrupt
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
    pub struct TcNetemCorrupt {
        pub probability: u32,
        pub correlation: u32,
    }
}
