use std::fmt;
use std::io;

use thiserror::Error;

/// Host stack error number, as returned by ioctl/route calls.
pub type Errno = i32;

/// The address configuration step a [`Error::Config`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigStep {
    Addr,
    Gateway,
    Vaddr,
    Addr6,
    Gateway6,
    Vaddr6,
}

impl fmt::Display for ConfigStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigStep::Addr => "setaddr",
            ConfigStep::Gateway => "set_gateway",
            ConfigStep::Vaddr => "setvaddr",
            ConfigStep::Addr6 => "setaddr6",
            ConfigStep::Gateway6 => "set_gateway6",
            ConfigStep::Vaddr6 => "setvaddr6",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Can't allocate memory")]
    NoMemory,
    #[error("Write of {len} bytes at offset {off} overflows buffer of {cap} bytes")]
    Overflow { off: usize, len: usize, cap: usize },
    #[error("Range {off}+{len} out of packet of {total} bytes")]
    OutOfRange { off: usize, len: usize, total: usize },
    #[error("{ifname}: failed to register interface: {reason}")]
    Attach { ifname: String, reason: String },
    #[error("{0} failed: errno {1}")]
    Config(ConfigStep, Errno),
    #[error("Engine error: {0}")]
    Engine(i32),
    #[error("ioctl failed: errno {0}")]
    Ioctl(Errno),
    #[error("Invalid port config: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
}
