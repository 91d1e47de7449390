use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;

use crate::api::{HostStack, Result};
use crate::errors::{ConfigStep, Error};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RtFlags: u32 {
        const UP = 0x1;
        const GATEWAY = 0x2;
        const HOST = 0x4;
        const STATIC = 0x800;
    }
}

/// Route insertion request for the default FIB.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteReq {
    pub dst: IpAddr,
    pub netmask: IpAddr,
    pub gateway: IpAddr,
    pub flags: RtFlags,
}

impl RouteReq {
    /// Default route (any destination, any mask) through `gateway`.
    pub fn default_via(gateway: IpAddr) -> Self {
        let any = match gateway {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        RouteReq {
            dst: any,
            netmask: any,
            gateway,
            flags: RtFlags::GATEWAY,
        }
    }
}

pub(crate) fn set_gateway<H: HostStack>(host: &H, gateway: Ipv4Addr) -> Result<()> {
    host.rib_add(&RouteReq::default_via(gateway.into()))
        .map_err(|errno| Error::Config(ConfigStep::Gateway, errno))
}

pub(crate) fn set_gateway6<H: HostStack>(host: &H, gateway: Ipv6Addr) -> Result<()> {
    host.rib_add(&RouteReq::default_via(gateway.into()))
        .map_err(|errno| Error::Config(ConfigStep::Gateway6, errno))
}
