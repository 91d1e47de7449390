//! Seams between the bridge and its external collaborators.

mod buffer;
mod engine;
mod hint;
mod host;
mod metadata;
mod pool;

pub use buffer::ExtHandle;
pub use engine::Engine;
pub(crate) use hint::unlikely;
pub use host::HostStack;
pub use metadata::TxOffload;
pub use pool::Pool;

pub type Result<T> = std::result::Result<T, crate::errors::Error>;
