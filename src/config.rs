//! Port configuration: the raw TOML form and the validated form an
//! interface is attached with.

use std::fmt;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;

use arrayvec::ArrayVec;
use eui48::MacAddress;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::api::Result;
use crate::errors::Error;

/// Longest interface name the host stack accepts, terminator included.
pub const IFNAMSIZ: usize = 16;

/// Most VIPs a port may carry, per address family.
pub const VIP_MAX_NUM: usize = 64;

/// Offloads the engine's port supports.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HwFeatures {
    pub rx_csum: bool,
    pub tx_csum_ip: bool,
    pub tx_csum_l4: bool,
    pub tx_tso: bool,
}

fn default_prefix_len() -> u8 {
    64
}

/// One port as written in the configuration file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortConfig {
    pub port_id: u16,
    pub ifname: Option<String>,
    pub mac: MacAddress,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub vip_ifname: Option<String>,
    #[serde(default, deserialize_with = "addr_list")]
    pub vip_addr: Vec<Ipv4Addr>,
    pub addr6: Option<Ipv6Addr>,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,
    pub gateway6: Option<Ipv6Addr>,
    #[serde(default, deserialize_with = "addr_list")]
    pub vip_addr6: Vec<Ipv6Addr>,
    #[serde(default)]
    pub hw_features: HwFeatures,
}

/// Accepts either a TOML array or one `;`-separated string.
fn addr_list<'de, D, T>(de: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Joined(String),
        List(Vec<T>),
    }

    match Raw::<T>::deserialize(de)? {
        Raw::Joined(s) => s
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().map_err(D::Error::custom))
            .collect(),
        Raw::List(list) => Ok(list),
    }
}

impl PortConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

/// Validated per-interface configuration, fixed for the interface's
/// lifetime.
#[derive(Clone, Debug)]
pub struct VethConfig {
    pub name: String,
    pub port_id: u16,
    pub mac: MacAddress,
    pub hw: HwFeatures,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    /// Interface the VIPs go on. `None` means `name`.
    pub vip_ifname: Option<String>,
    pub vip: ArrayVec<Ipv4Addr, VIP_MAX_NUM>,
    pub addr6: Option<Ipv6Addr>,
    pub prefix_len: u8,
    pub gateway6: Option<Ipv6Addr>,
    pub vip6: ArrayVec<Ipv6Addr, VIP_MAX_NUM>,
}

fn check_ifname(name: &str) -> Result<()> {
    if name.is_empty() || name.len() >= IFNAMSIZ {
        return Err(Error::InvalidConfig(format!(
            "interface name {name:?} must be 1 to {} bytes",
            IFNAMSIZ - 1
        )));
    }
    Ok(())
}

fn collect_vips<T: Copy>(vips: &[T], family: &str) -> Result<ArrayVec<T, VIP_MAX_NUM>> {
    let mut out = ArrayVec::new();
    for &vip in vips {
        out.try_push(vip).map_err(|_| {
            Error::InvalidConfig(format!(
                "{} {family} VIPs configured, at most {VIP_MAX_NUM} allowed",
                vips.len()
            ))
        })?;
    }
    Ok(out)
}

impl VethConfig {
    pub fn new(port: &PortConfig) -> Result<Self> {
        let name = port
            .ifname
            .clone()
            .unwrap_or_else(|| format!("veth{}", port.port_id));
        check_ifname(&name)?;
        if let Some(vip_ifname) = &port.vip_ifname {
            check_ifname(vip_ifname)?;
        }
        if port.prefix_len > 128 {
            return Err(Error::InvalidConfig(format!(
                "prefix length {} exceeds 128",
                port.prefix_len
            )));
        }

        Ok(VethConfig {
            name,
            port_id: port.port_id,
            mac: port.mac,
            hw: port.hw_features,
            addr: port.addr,
            netmask: port.netmask,
            broadcast: port.broadcast,
            gateway: port.gateway,
            vip_ifname: port.vip_ifname.clone(),
            vip: collect_vips(&port.vip_addr, "IPv4")?,
            addr6: port.addr6,
            prefix_len: port.prefix_len,
            gateway6: port.gateway6,
            vip6: collect_vips(&port.vip_addr6, "IPv6")?,
        })
    }
}

impl TryFrom<&PortConfig> for VethConfig {
    type Error = Error;

    fn try_from(port: &PortConfig) -> Result<Self> {
        VethConfig::new(port)
    }
}
