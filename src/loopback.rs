//! In-process engine, buffer pool and host stack.
//!
//! Nothing here touches a NIC or a kernel. The engine receives frames out of
//! a slab of fixed-size buffers and records what it is asked to send; the
//! host stack records every request it gets and can be told to refuse some
//! of them. The dry-run binary and the tests drive the real bridge,
//! interface and address code against these.

use std::cell::{Cell, RefCell};
use std::net::IpAddr;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use tracing::{debug, warn};

use crate::addr::{In6AliasReq, InAliasReq, RouteReq};
use crate::api::{Engine, ExtHandle, HostStack, Pool, Result, TxOffload};
use crate::config::VethConfig;
use crate::errors::{Errno, Error};
use crate::mbuf::{Bridge, Packet};
use crate::veth::{IfCommand, IfIndex, Ifnet};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-size buffers carved out of one slab, handed out by index.
pub struct SlabPool {
    slab: NonNull<[u8]>,
    buf_size: usize,
    free: Mutex<HeapRb<ExtHandle>>,
    releases: Mutex<Vec<u32>>,
}

// The slab is only reached through buffer pointers whose ownership is
// tracked by the free list.
unsafe impl Send for SlabPool {}
unsafe impl Sync for SlabPool {}

impl SlabPool {
    pub fn new(nbufs: usize, buf_size: usize) -> Arc<Self> {
        let slab = NonNull::from(Box::leak(vec![0u8; nbufs * buf_size].into_boxed_slice()));
        let mut free = HeapRb::new(nbufs.max(1));
        for i in 0..nbufs {
            let pushed = free.try_push(ExtHandle::from(i));
            debug_assert!(pushed.is_ok(), "free list sized for every buffer");
        }
        Arc::new(SlabPool {
            slab,
            buf_size,
            free: Mutex::new(free),
            releases: Mutex::new(vec![0; nbufs]),
        })
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn capacity(&self) -> usize {
        lock(&self.releases).len()
    }

    pub fn alloc(&self) -> Option<ExtHandle> {
        lock(&self.free).try_pop()
    }

    /// Start of the buffer named by `handle`.
    pub fn buffer(&self, handle: ExtHandle) -> NonNull<u8> {
        let idx = usize::from(handle);
        assert!(idx < self.capacity(), "handle {idx} not from this pool");
        // In bounds of the slab, checked above.
        unsafe { self.slab.cast::<u8>().add(idx * self.buf_size) }
    }

    /// Takes a free buffer and copies as much of `bytes` into it as fits.
    ///
    /// Only a buffer just popped off the free list is written, so a buffer
    /// wrapped into a live chain is never touched.
    pub fn alloc_filled(&self, bytes: &[u8]) -> Option<ExtHandle> {
        let handle = self.alloc()?;
        let n = bytes.len().min(self.buf_size);
        let dst = self.buffer(handle);
        // `handle` left the free list above; nobody else can reach it.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), n) };
        Some(handle)
    }

    /// Buffers handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.capacity() - lock(&self.free).occupied_len()
    }

    /// How many times `handle` has come back through [`Pool::release`].
    pub fn release_count(&self, handle: ExtHandle) -> u32 {
        lock(&self.releases)
            .get(usize::from(handle))
            .copied()
            .unwrap_or(0)
    }
}

impl Pool for SlabPool {
    fn release(&self, handle: ExtHandle) {
        if let Some(count) = lock(&self.releases).get_mut(usize::from(handle)) {
            *count += 1;
        }
        if lock(&self.free).try_push(handle).is_err() {
            warn!(%handle, "buffer released twice");
        }
    }
}

impl Drop for SlabPool {
    fn drop(&mut self) {
        // Leaked in `new`, and every chain holding a view keeps the pool
        // alive through its release hook.
        drop(unsafe { Box::from_raw(self.slab.as_ptr()) });
    }
}

/// Registration handed out by [`LoopbackEngine`].
#[derive(Debug)]
pub struct LoopbackHandle {
    id: usize,
    ifname: String,
}

impl LoopbackHandle {
    pub fn ifname(&self) -> &str {
        &self.ifname
    }
}

/// A chain the engine was asked to send, flattened.
#[derive(Clone, Debug)]
pub struct SentFrame {
    pub ifname: String,
    /// Engine buffer at the head of the chain, if it was a received one.
    pub handle: Option<ExtHandle>,
    pub len: usize,
    pub bytes: Vec<u8>,
    pub offload: TxOffload,
    pub vlan: Option<u16>,
}

/// An engine that "receives" caller-supplied frames and records sends.
pub struct LoopbackEngine {
    pool: Arc<SlabPool>,
    next_id: Cell<usize>,
    registered: RefCell<Vec<(usize, String)>>,
    deregistered: Cell<usize>,
    sent: RefCell<Vec<SentFrame>>,
    send_attempts: Cell<usize>,
    fail_register: Cell<bool>,
    fail_send: Cell<Option<i32>>,
}

impl LoopbackEngine {
    pub fn new(pool: Arc<SlabPool>) -> Self {
        LoopbackEngine {
            pool,
            next_id: Cell::new(0),
            registered: RefCell::new(Vec::new()),
            deregistered: Cell::new(0),
            sent: RefCell::new(Vec::new()),
            send_attempts: Cell::new(0),
            fail_register: Cell::new(false),
            fail_send: Cell::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<SlabPool> {
        &self.pool
    }

    fn take_filled(&self, bytes: &[u8]) -> Result<ExtHandle> {
        self.pool.alloc_filled(bytes).ok_or(Error::NoMemory)
    }

    /// Copies `frame` into as many pool buffers as it needs and wraps them
    /// into one chain.
    ///
    /// On failure every buffer taken so far is back in the pool.
    pub fn receive(&self, bridge: &Bridge, frame: &[u8], rx_csum: bool) -> Result<Packet> {
        let mut chunks = frame.chunks(self.pool.buf_size().max(1));
        let first = chunks.next().unwrap_or_default();

        let handle = self.take_filled(first)?;
        let data = self.pool.buffer(handle);
        // `data` holds `first.len()` bytes and is ours until released.
        let res = unsafe { bridge.wrap_header(handle, data, first.len(), frame.len(), rx_csum) };
        let mut pkt = res.inspect_err(|_| self.pool.release(handle))?;

        let mut prev = pkt.head_mut();
        for chunk in chunks {
            let handle = self.take_filled(chunk)?;
            let data = self.pool.buffer(handle);
            let res = unsafe { bridge.append_segment(prev, handle, data, chunk.len()) };
            prev = res.inspect_err(|_| self.pool.release(handle))?;
        }
        Ok(pkt)
    }

    /// Names of the interfaces currently registered.
    pub fn registered(&self) -> Vec<String> {
        self.registered
            .borrow()
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn deregistered(&self) -> usize {
        self.deregistered.get()
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.borrow().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.get()
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.set(fail);
    }

    /// Makes every following send fail with `code`, or succeed with `None`.
    pub fn set_fail_send(&self, code: Option<i32>) {
        self.fail_send.set(code);
    }
}

impl Engine for LoopbackEngine {
    type Handle = LoopbackHandle;

    fn register(&self, ifp: &Ifnet, cfg: &VethConfig) -> Result<LoopbackHandle> {
        if self.fail_register.get() {
            return Err(Error::Engine(-libc::ENODEV));
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.registered.borrow_mut().push((id, ifp.name().to_owned()));
        debug!(ifname = %ifp.name(), port_id = cfg.port_id, "registered with loopback engine");
        Ok(LoopbackHandle {
            id,
            ifname: ifp.name().to_owned(),
        })
    }

    fn deregister(&self, handle: LoopbackHandle) {
        self.registered.borrow_mut().retain(|(id, _)| *id != handle.id);
        self.deregistered.set(self.deregistered.get() + 1);
    }

    fn send(&self, handle: &LoopbackHandle, pkt: Packet, len: usize) -> Result<()> {
        self.send_attempts.set(self.send_attempts.get() + 1);
        if let Some(code) = self.fail_send.get() {
            pkt.free();
            return Err(Error::Engine(code));
        }
        let frame = SentFrame {
            ifname: handle.ifname.clone(),
            handle: pkt.head().ext_handle(),
            len,
            bytes: pkt.segments().flatten().copied().collect(),
            offload: pkt.tx_offload(),
            vlan: pkt.vlan_tag(),
        };
        pkt.free();
        self.sent.borrow_mut().push(frame);
        Ok(())
    }
}

/// A request the host stack received, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Attach(String),
    Detach(IfIndex),
    Ioctl(IfCommand),
    Ifaddr(InAliasReq),
    Ifaddr6(In6AliasReq),
    Route(RouteReq),
}

/// Administrative channel of [`LoopbackStack`]. Closed on drop.
#[derive(Debug)]
pub struct LoopbackChannel {
    family: libc::c_int,
    open: Rc<Cell<usize>>,
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.open.set(self.open.get() - 1);
    }
}

/// A host stack that records requests and queues received chains.
pub struct LoopbackStack {
    requests: RefCell<Vec<Request>>,
    received: RefCell<Vec<(IfIndex, Packet)>>,
    failing: RefCell<Vec<IpAddr>>,
    fail_socreate: Cell<bool>,
    next_index: Cell<u16>,
    open: Rc<Cell<usize>>,
    opened: Cell<usize>,
}

impl Default for LoopbackStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackStack {
    pub fn new() -> Self {
        LoopbackStack {
            requests: RefCell::new(Vec::new()),
            received: RefCell::new(Vec::new()),
            failing: RefCell::new(Vec::new()),
            fail_socreate: Cell::new(false),
            next_index: Cell::new(1),
            open: Rc::new(Cell::new(0)),
            opened: Cell::new(0),
        }
    }

    /// Refuses any alias for `addr` and any route through it.
    pub fn fail_on(&self, addr: IpAddr) {
        self.failing.borrow_mut().push(addr);
    }

    pub fn set_fail_socreate(&self, fail: bool) {
        self.fail_socreate.set(fail);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub fn take_received(&self) -> Vec<(IfIndex, Packet)> {
        self.received.take()
    }

    /// Channels currently open.
    pub fn open_channels(&self) -> usize {
        self.open.get()
    }

    /// Channels opened so far.
    pub fn channels_opened(&self) -> usize {
        self.opened.get()
    }

    fn record(&self, req: Request) {
        self.requests.borrow_mut().push(req);
    }

    fn refuses(&self, addr: IpAddr) -> bool {
        self.failing.borrow().contains(&addr)
    }
}

impl HostStack for LoopbackStack {
    type Channel = LoopbackChannel;

    fn if_attach(&self, ifp: &Ifnet) -> IfIndex {
        let index = IfIndex(self.next_index.get());
        self.next_index.set(index.0 + 1);
        self.record(Request::Attach(ifp.name().to_owned()));
        index
    }

    fn if_detach(&self, index: IfIndex) {
        self.record(Request::Detach(index));
    }

    fn input(&self, index: IfIndex, pkt: Packet) {
        self.received.borrow_mut().push((index, pkt));
    }

    fn ether_ioctl(&self, ifp: &mut Ifnet, cmd: &IfCommand) -> std::result::Result<(), Errno> {
        self.record(Request::Ioctl(cmd.clone()));
        match *cmd {
            IfCommand::SetMtu(mtu) if !(72..=9000).contains(&mtu) => Err(libc::EINVAL),
            IfCommand::SetMtu(mtu) => {
                ifp.set_mtu(mtu);
                Ok(())
            }
            IfCommand::SetCapabilities(cap) => {
                ifp.set_capenable(cap);
                Ok(())
            }
            IfCommand::AddMulti | IfCommand::DelMulti => Ok(()),
            IfCommand::SetFlags(_) => Err(libc::EINVAL),
        }
    }

    fn socreate(&self, family: libc::c_int) -> std::result::Result<LoopbackChannel, Errno> {
        if self.fail_socreate.get() {
            return Err(libc::ENOBUFS);
        }
        if family != libc::AF_INET && family != libc::AF_INET6 {
            return Err(libc::EAFNOSUPPORT);
        }
        self.open.set(self.open.get() + 1);
        self.opened.set(self.opened.get() + 1);
        Ok(LoopbackChannel {
            family,
            open: self.open.clone(),
        })
    }

    fn add_ifaddr(&self, so: &LoopbackChannel, req: &InAliasReq) -> std::result::Result<(), Errno> {
        if so.family != libc::AF_INET {
            return Err(libc::EAFNOSUPPORT);
        }
        self.record(Request::Ifaddr(req.clone()));
        if self.refuses(req.addr.into()) {
            return Err(libc::EEXIST);
        }
        Ok(())
    }

    fn add_ifaddr6(&self, so: &LoopbackChannel, req: &In6AliasReq) -> std::result::Result<(), Errno> {
        if so.family != libc::AF_INET6 {
            return Err(libc::EAFNOSUPPORT);
        }
        self.record(Request::Ifaddr6(req.clone()));
        if self.refuses(req.addr.into()) {
            return Err(libc::EEXIST);
        }
        Ok(())
    }

    fn rib_add(&self, req: &RouteReq) -> std::result::Result<(), Errno> {
        self.record(Request::Route(req.clone()));
        if self.refuses(req.gateway) {
            return Err(libc::ENETUNREACH);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::MbufZone;

    #[test]
    fn test_pool_accounting() {
        let pool = SlabPool::new(2, 32);
        let a = pool.alloc_filled(&[1; 64]).unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        assert!(pool.alloc_filled(b"x").is_none());
        assert_eq!(pool.outstanding(), 2);
        let data = unsafe { std::slice::from_raw_parts(pool.buffer(a).as_ptr(), 32) };
        assert!(data.iter().all(|&byte| byte == 1));
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.release_count(a), 1);
    }

    #[test]
    fn test_receive_failure_returns_buffers() {
        let pool = SlabPool::new(2, 16);
        let bridge = Bridge::new(MbufZone::new(8), pool.clone());
        let engine = LoopbackEngine::new(pool.clone());
        assert!(matches!(
            engine.receive(&bridge, &[0; 40], false),
            Err(Error::NoMemory)
        ));
        assert_eq!(pool.outstanding(), 0);

        let bridge = Bridge::new(MbufZone::new(1), pool.clone());
        assert!(engine.receive(&bridge, &[0; 20], false).is_err());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_filling_never_touches_a_wrapped_buffer() {
        let pool = SlabPool::new(1, 16);
        let bridge = Bridge::new(MbufZone::new(4), pool.clone());
        let engine = LoopbackEngine::new(pool.clone());
        let pkt = engine.receive(&bridge, b"hello", false).unwrap();
        assert!(pool.alloc_filled(b"XXXXX").is_none());
        assert_eq!(pkt.head().data(), b"hello");

        let h = pkt.head().ext_handle().unwrap();
        drop(pkt);
        assert_eq!(pool.alloc_filled(b"XXXXX"), Some(h));
    }

    #[test]
    fn test_channels_close_on_drop() {
        let stack = LoopbackStack::new();
        let so = stack.socreate(libc::AF_INET).unwrap();
        assert_eq!(stack.open_channels(), 1);
        drop(so);
        assert_eq!(stack.open_channels(), 0);
        assert_eq!(stack.channels_opened(), 1);
        assert_eq!(stack.socreate(libc::AF_UNIX).err(), Some(libc::EAFNOSUPPORT));
    }
}
