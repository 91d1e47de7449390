use std::net::Ipv4Addr;

use crate::api::{HostStack, Result};
use crate::config::VethConfig;
use crate::errors::{ConfigStep, Error};

/// IPv4 alias request (`SIOCAIFADDR`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InAliasReq {
    pub name: String,
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub broadaddr: Ipv4Addr,
}

/// VIPs are always installed as host addresses.
pub const VIP_NETMASK: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Broadcast address installed with a VIP.
///
/// Sets the top byte of the address as a little-endian host holds its
/// network-order `in_addr_t`, which is the last octet: `x.x.x.255`.
pub fn vip_broadcast(addr: Ipv4Addr) -> Ipv4Addr {
    let s_addr = u32::from_le_bytes(addr.octets());
    Ipv4Addr::from((s_addr | 0xFF00_0000).to_le_bytes())
}

pub(crate) fn setaddr<H: HostStack>(host: &H, cfg: &VethConfig) -> Result<()> {
    let fail = |errno| Error::Config(ConfigStep::Addr, errno);
    let req = InAliasReq {
        name: cfg.name.clone(),
        addr: cfg.addr,
        mask: cfg.netmask,
        broadaddr: cfg.broadcast,
    };
    let so = host.socreate(libc::AF_INET).map_err(fail)?;
    host.add_ifaddr(&so, &req).map_err(fail)
}

/// Installs every VIP, stopping at the first one the stack refuses.
pub(crate) fn setvaddr<H: HostStack>(host: &H, cfg: &VethConfig) -> Result<()> {
    let fail = |errno| Error::Config(ConfigStep::Vaddr, errno);
    let name = cfg.vip_ifname.as_deref().unwrap_or(&cfg.name);
    let so = host.socreate(libc::AF_INET).map_err(fail)?;
    for &vip in &cfg.vip {
        let req = InAliasReq {
            name: name.to_owned(),
            addr: vip,
            mask: VIP_NETMASK,
            broadaddr: vip_broadcast(vip),
        };
        host.add_ifaddr(&so, &req).map_err(fail)?;
    }
    Ok(())
}
