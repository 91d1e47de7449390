//! Interface identity, flags and capabilities as the host stack sees them.

use std::fmt;

use bitflags::bitflags;
use eui48::MacAddress;

use crate::config::VethConfig;
use crate::mbuf::CsumFlags;

/// Index the host stack assigned to an attached interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IfIndex(pub u16);

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Administrative interface flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct IfFlags: u32 {
        const UP = 0x1;
        const BROADCAST = 0x2;
        const DEBUG = 0x4;
        const LOOPBACK = 0x8;
        const POINTOPOINT = 0x10;
        const NOARP = 0x80;
        const PROMISC = 0x100;
        const ALLMULTI = 0x200;
        const SIMPLEX = 0x800;
        const MULTICAST = 0x8000;

        /// Set by the driver at attach, never by a flags request.
        const CANTCHANGE = Self::BROADCAST.bits()
            | Self::POINTOPOINT.bits()
            | Self::LOOPBACK.bits()
            | Self::SIMPLEX.bits()
            | Self::MULTICAST.bits();
    }
}

bitflags! {
    /// Driver-owned state flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DrvFlags: u32 {
        const RUNNING = 0x40;
        const OACTIVE = 0x400;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct IfCap: u32 {
        const RXCSUM = 0x1;
        const TXCSUM = 0x2;
        const VLAN_MTU = 0x8;
        const VLAN_HWTAGGING = 0x10;
        const TSO4 = 0x100;
        const TSO6 = 0x200;
        const TSO = Self::TSO4.bits() | Self::TSO6.bits();
    }
}

/// Administrative commands addressed to an interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IfCommand {
    /// `SIOCSIFFLAGS`, handled by the driver.
    SetFlags(IfFlags),
    SetMtu(u32),
    AddMulti,
    DelMulti,
    SetCapabilities(IfCap),
}

/// An ethernet interface as registered with the host stack.
#[derive(Clone, Debug)]
pub struct Ifnet {
    name: String,
    mac: MacAddress,
    mtu: u32,
    pub(crate) flags: IfFlags,
    pub(crate) drv_flags: DrvFlags,
    capabilities: IfCap,
    capenable: IfCap,
    hwassist: CsumFlags,
}

impl Ifnet {
    pub const ETHERMTU: u32 = 1500;

    pub(crate) fn new(cfg: &VethConfig) -> Self {
        let mut capabilities = IfCap::empty();
        let mut hwassist = CsumFlags::empty();
        if cfg.hw.rx_csum {
            capabilities |= IfCap::RXCSUM;
        }
        if cfg.hw.tx_csum_ip {
            capabilities |= IfCap::TXCSUM;
            hwassist |= CsumFlags::IP;
        }
        if cfg.hw.tx_csum_l4 {
            hwassist |= CsumFlags::DELAY_DATA;
        }
        if cfg.hw.tx_tso {
            capabilities |= IfCap::TSO;
            hwassist |= CsumFlags::TSO;
        }

        Ifnet {
            name: cfg.name.clone(),
            mac: cfg.mac,
            mtu: Self::ETHERMTU,
            flags: IfFlags::BROADCAST | IfFlags::SIMPLEX | IfFlags::MULTICAST,
            drv_flags: DrvFlags::empty(),
            capabilities,
            capenable: capabilities,
            hwassist,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn set_mtu(&mut self, mtu: u32) {
        self.mtu = mtu;
    }

    pub fn flags(&self) -> IfFlags {
        self.flags
    }

    pub fn drv_flags(&self) -> DrvFlags {
        self.drv_flags
    }

    pub fn is_running(&self) -> bool {
        self.drv_flags.contains(DrvFlags::RUNNING)
    }

    pub fn capabilities(&self) -> IfCap {
        self.capabilities
    }

    pub fn capenable(&self) -> IfCap {
        self.capenable
    }

    /// Enables a subset of the declared capabilities.
    pub fn set_capenable(&mut self, cap: IfCap) {
        self.capenable = cap & self.capabilities;
    }

    /// Checksum work the stack may leave to the hardware.
    pub fn hwassist(&self) -> CsumFlags {
        self.hwassist
    }
}
