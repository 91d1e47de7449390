//! Address and route setup for a freshly attached interface.
//!
//! Steps are best effort and applied in order: primary IPv4 address,
//! default IPv4 route, IPv4 VIPs, primary IPv6 address with its default
//! route, IPv6 VIPs. A failed step is logged and recorded and the next step
//! still runs. Inside a VIP loop the first failure ends that loop. Nothing is
//! rolled back.

mod inet;
mod inet6;
mod route;

use tracing::warn;

use crate::api::{HostStack, Result};
use crate::config::VethConfig;
use crate::errors::Error;
pub use inet::{InAliasReq, VIP_NETMASK, vip_broadcast};
pub use inet6::{In6AliasReq, Lifetime6, ND6_INFINITE_LIFETIME, prefix_mask};
pub use route::{RouteReq, RtFlags};

/// Applies every configured address and route. Returns the failed steps.
pub fn configure<H: HostStack>(host: &H, cfg: &VethConfig) -> Vec<Error> {
    let mut failed = Vec::new();
    let mut check = |res: Result<()>| match res {
        Ok(()) => true,
        Err(err) => {
            warn!(ifname = %cfg.name, %err, "address setup step failed");
            failed.push(err);
            false
        }
    };

    check(inet::setaddr(host, cfg));
    if let Some(gateway) = cfg.gateway {
        check(route::set_gateway(host, gateway));
    }
    if !cfg.vip.is_empty() {
        check(inet::setvaddr(host, cfg));
    }

    if let Some(addr6) = cfg.addr6 {
        if check(inet6::setaddr6(host, cfg, addr6)) {
            if let Some(gateway6) = cfg.gateway6 {
                check(route::set_gateway6(host, gateway6));
            }
        }
    }
    if !cfg.vip6.is_empty() {
        check(inet6::setvaddr6(host, cfg));
    }

    failed
}
