use std::net::Ipv6Addr;

use crate::api::{HostStack, Result};
use crate::config::VethConfig;
use crate::errors::{ConfigStep, Error};

pub const ND6_INFINITE_LIFETIME: u32 = 0xffff_ffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifetime6 {
    pub pltime: u32,
    pub vltime: u32,
}

impl Lifetime6 {
    pub const INFINITE: Lifetime6 = Lifetime6 {
        pltime: ND6_INFINITE_LIFETIME,
        vltime: ND6_INFINITE_LIFETIME,
    };
}

/// IPv6 alias request (`SIOCAIFADDR_IN6`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct In6AliasReq {
    pub name: String,
    pub addr: Ipv6Addr,
    pub prefixmask: Ipv6Addr,
    pub lifetime: Lifetime6,
}

/// Netmask with the first `prefix_len` bits set. Lengths above 128 are
/// clamped.
pub fn prefix_mask(prefix_len: u8) -> Ipv6Addr {
    let prefix_len = prefix_len.min(128) as usize;
    let mut mask = [0u8; 16];
    mask[..prefix_len / 8].fill(0xff);
    let rem = prefix_len % 8;
    if rem != 0 {
        mask[prefix_len / 8] = (((1u16 << rem) - 1) << (8 - rem)) as u8;
    }
    Ipv6Addr::from(mask)
}

fn alias_req(name: &str, addr: Ipv6Addr, prefix_len: u8) -> In6AliasReq {
    In6AliasReq {
        name: name.to_owned(),
        addr,
        prefixmask: prefix_mask(prefix_len),
        lifetime: Lifetime6::INFINITE,
    }
}

pub(crate) fn setaddr6<H: HostStack>(host: &H, cfg: &VethConfig, addr: Ipv6Addr) -> Result<()> {
    let fail = |errno| Error::Config(ConfigStep::Addr6, errno);
    let req = alias_req(&cfg.name, addr, cfg.prefix_len);
    let so = host.socreate(libc::AF_INET6).map_err(fail)?;
    host.add_ifaddr6(&so, &req).map_err(fail)
}

/// Installs every IPv6 VIP with the primary prefix length, stopping at the
/// first failure.
pub(crate) fn setvaddr6<H: HostStack>(host: &H, cfg: &VethConfig) -> Result<()> {
    let fail = |errno| Error::Config(ConfigStep::Vaddr6, errno);
    let name = cfg.vip_ifname.as_deref().unwrap_or(&cfg.name);
    let so = host.socreate(libc::AF_INET6).map_err(fail)?;
    for &vip in &cfg.vip6 {
        host.add_ifaddr6(&so, &alias_req(name, vip, cfg.prefix_len))
            .map_err(fail)?;
    }
    Ok(())
}
