//! The virtual ethernet interface that sits between the engine and the host
//! stack.
//!
//! A [`Veth`] is created by [`Veth::attach`], which registers it with the
//! host stack and the engine and then applies its addresses. From then on
//! the engine feeds it with [`Veth::input`] and the host stack drives it
//! through [`IfOps`]. [`Veth::detach`] consumes it, so its engine
//! registration is released exactly once.

mod ifnet;

use tracing::{debug, info, warn};
use triomphe::Arc;

use crate::addr;
use crate::api::{Engine, HostStack, Result};
use crate::config::VethConfig;
use crate::errors::Error;
use crate::mbuf::Packet;
pub use ifnet::{DrvFlags, IfCap, IfCommand, IfFlags, IfIndex, Ifnet};

/// Operations the host stack invokes on an interface.
pub trait IfOps {
    /// Marks the interface running.
    fn init(&mut self);

    /// Handles an administrative command.
    fn ioctl(&mut self, cmd: IfCommand) -> Result<()>;

    /// Sends a chain. Not retried on failure.
    fn transmit(&mut self, pkt: Packet) -> Result<()>;

    /// Drops anything queued in the driver.
    fn qflush(&mut self);

    /// Kicks the legacy send queue.
    fn start(&mut self);
}

/// Where an attached interface is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfState {
    /// Registered and addressed, never brought up.
    Attached,
    Up,
    Down,
}

pub struct Veth<E: Engine, H: HostStack> {
    ifp: Ifnet,
    index: IfIndex,
    cfg: VethConfig,
    engine: Arc<E>,
    host: Arc<H>,
    host_ctx: Option<E::Handle>,
    state: IfState,
    setup_errors: Vec<Error>,
}

impl<E: Engine, H: HostStack> Veth<E, H> {
    /// Creates the interface, registers it with the engine and applies its
    /// addresses.
    ///
    /// Fails only if the engine refuses the registration, in which case
    /// the host stack attachment is undone and no address is touched.
    /// Address failures are logged and kept in
    /// [`setup_errors`](Veth::setup_errors).
    pub fn attach(engine: Arc<E>, host: Arc<H>, cfg: VethConfig) -> Result<Self> {
        let ifp = Ifnet::new(&cfg);
        let index = host.if_attach(&ifp);

        let host_ctx = match engine.register(&ifp, &cfg) {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(ifname = %ifp.name(), ?err, "failed to register interface");
                host.if_detach(index);
                return Err(Error::Attach {
                    ifname: ifp.name().to_owned(),
                    reason: err.to_string(),
                });
            }
        };

        let setup_errors = addr::configure(&*host, &cfg);
        info!(
            ifname = %ifp.name(),
            %index,
            mac = %ifp.mac(),
            failed_steps = setup_errors.len(),
            "interface attached"
        );

        Ok(Veth {
            ifp,
            index,
            cfg,
            engine,
            host,
            host_ctx: Some(host_ctx),
            state: IfState::Attached,
            setup_errors,
        })
    }

    /// Deregisters from the engine and removes the interface.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(ctx) = self.host_ctx.take() {
            self.engine.deregister(ctx);
            self.host.if_detach(self.index);
            info!(ifname = %self.ifp.name(), "interface detached");
        }
    }

    /// Receive entry point for the engine.
    pub fn input(&self, mut pkt: Packet) {
        pkt.hdr_mut().rcvif = Some(self.index);
        self.host.input(self.index, pkt);
    }

    /// The engine registration this interface sends through. `None` only
    /// while the interface is being torn down.
    pub fn host_ctx(&self) -> Option<&E::Handle> {
        self.host_ctx.as_ref()
    }

    pub fn ifnet(&self) -> &Ifnet {
        &self.ifp
    }

    pub fn index(&self) -> IfIndex {
        self.index
    }

    pub fn config(&self) -> &VethConfig {
        &self.cfg
    }

    pub fn state(&self) -> IfState {
        self.state
    }

    /// Address steps that failed during attach.
    pub fn setup_errors(&self) -> &[Error] {
        &self.setup_errors
    }

    fn stop(&mut self) {
        self.ifp.drv_flags &= !(DrvFlags::RUNNING | DrvFlags::OACTIVE);
        self.state = IfState::Down;
    }
}

impl<E: Engine, H: HostStack> IfOps for Veth<E, H> {
    fn init(&mut self) {
        self.ifp.drv_flags |= DrvFlags::RUNNING;
        self.ifp.drv_flags &= !DrvFlags::OACTIVE;
        self.state = IfState::Up;
    }

    fn ioctl(&mut self, cmd: IfCommand) -> Result<()> {
        match cmd {
            IfCommand::SetFlags(flags) => {
                self.ifp.flags =
                    (self.ifp.flags & IfFlags::CANTCHANGE) | (flags - IfFlags::CANTCHANGE);
                if flags.contains(IfFlags::UP) {
                    self.init();
                } else {
                    self.stop();
                }
                Ok(())
            }
            cmd => self
                .host
                .ether_ioctl(&mut self.ifp, &cmd)
                .map_err(Error::Ioctl),
        }
    }

    fn transmit(&mut self, pkt: Packet) -> Result<()> {
        let len = pkt.len();
        let Some(ctx) = self.host_ctx.as_ref() else {
            pkt.free();
            return Err(Error::Engine(-libc::ENXIO));
        };
        let res = self.engine.send(ctx, pkt, len);
        if let Err(err) = &res {
            debug!(ifname = %self.ifp.name(), len, ?err, "transmit failed");
        }
        res
    }

    fn qflush(&mut self) {}

    fn start(&mut self) {}
}

impl<E: Engine, H: HostStack> Drop for Veth<E, H> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use etherparse::PacketBuilder;

    use super::*;
    use crate::api::TxOffload;
    use crate::config::PortConfig;
    use crate::loopback::{LoopbackEngine, LoopbackStack, Request, SlabPool};
    use crate::mbuf::{Bridge, CsumFlags, MbufZone};

    const PORT: &str = r#"
        port_id = 0
        mac = "02:00:00:00:00:01"
        addr = "192.168.1.2"
        netmask = "255.255.255.0"
        broadcast = "192.168.1.255"
        gateway = "192.168.1.1"
        vip_addr = "192.168.1.10;192.168.1.11"

        [hw_features]
        rx_csum = true
        tx_csum_ip = true
        tx_csum_l4 = true
        tx_tso = true
    "#;

    struct Fixture {
        pool: std::sync::Arc<SlabPool>,
        bridge: Bridge,
        engine: Arc<LoopbackEngine>,
        host: Arc<LoopbackStack>,
    }

    fn fixture() -> Fixture {
        let pool = SlabPool::new(32, 128);
        let bridge = Bridge::new(MbufZone::new(64), pool.clone());
        Fixture {
            engine: Arc::new(LoopbackEngine::new(pool.clone())),
            host: Arc::new(LoopbackStack::new()),
            pool,
            bridge,
        }
    }

    fn cfg() -> VethConfig {
        VethConfig::new(&PortConfig::from_toml_str(PORT).unwrap()).unwrap()
    }

    fn udp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 9], [2, 0, 0, 0, 0, 1])
            .ipv4([192, 168, 1, 9], [192, 168, 1, 2], 64)
            .udp(4000, 5000);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    #[test]
    fn test_attach_sets_identity_and_capabilities() {
        let fx = fixture();
        let veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        let ifp = veth.ifnet();
        assert_eq!(ifp.name(), "veth0");
        assert_eq!(ifp.mac().to_hex_string(), "02:00:00:00:00:01");
        assert_eq!(
            ifp.flags(),
            IfFlags::BROADCAST | IfFlags::SIMPLEX | IfFlags::MULTICAST
        );
        assert_eq!(ifp.capabilities(), IfCap::RXCSUM | IfCap::TXCSUM | IfCap::TSO);
        assert_eq!(ifp.capenable(), ifp.capabilities());
        assert_eq!(
            ifp.hwassist(),
            CsumFlags::IP | CsumFlags::DELAY_DATA | CsumFlags::TSO
        );
        assert_eq!(veth.state(), IfState::Attached);
        assert!(veth.setup_errors().is_empty());
        assert_eq!(fx.engine.registered(), ["veth0"]);
        assert_eq!(fx.host.requests()[0], Request::Attach("veth0".into()));
        assert_eq!(veth.host_ctx().unwrap().ifname(), "veth0");
    }

    #[test]
    fn test_attach_failure_rolls_back() {
        let fx = fixture();
        fx.engine.set_fail_register(true);
        let err = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).err().unwrap();
        assert!(matches!(err, Error::Attach { ref ifname, .. } if ifname == "veth0"));
        assert_eq!(
            fx.host.requests(),
            [Request::Attach("veth0".into()), Request::Detach(IfIndex(1))]
        );
        assert_eq!(fx.host.channels_opened(), 0);
        assert!(fx.engine.registered().is_empty());
    }

    #[test]
    fn test_address_failures_do_not_fail_attach() {
        let fx = fixture();
        fx.host.fail_on(IpAddr::from(Ipv4Addr::new(192, 168, 1, 2)));
        fx.host.fail_on(IpAddr::from(Ipv4Addr::new(192, 168, 1, 1)));
        let veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        assert_eq!(veth.setup_errors().len(), 2);
        assert_eq!(fx.engine.registered(), ["veth0"]);
    }

    #[test]
    fn test_flags_state_machine() {
        let fx = fixture();
        let mut veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();

        veth.ioctl(IfCommand::SetFlags(IfFlags::UP)).unwrap();
        assert_eq!(veth.state(), IfState::Up);
        assert!(veth.ifnet().is_running());
        assert!(veth.ifnet().flags().contains(IfFlags::UP | IfFlags::BROADCAST));

        veth.ifp.drv_flags |= DrvFlags::OACTIVE;
        veth.ioctl(IfCommand::SetFlags(IfFlags::empty())).unwrap();
        assert_eq!(veth.state(), IfState::Down);
        assert_eq!(veth.ifnet().drv_flags(), DrvFlags::empty());
        assert!(!veth.ifnet().flags().contains(IfFlags::UP));
        assert!(veth.ifnet().flags().contains(IfFlags::SIMPLEX));

        veth.ioctl(IfCommand::SetFlags(IfFlags::UP)).unwrap();
        assert_eq!(veth.state(), IfState::Up);
        assert!(!veth.ifnet().drv_flags().contains(DrvFlags::OACTIVE));
    }

    #[test]
    fn test_other_commands_go_to_link_layer() {
        let fx = fixture();
        let mut veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        veth.ioctl(IfCommand::SetMtu(9000)).unwrap();
        assert_eq!(veth.ifnet().mtu(), 9000);
        let err = veth.ioctl(IfCommand::SetMtu(10)).unwrap_err();
        assert!(matches!(err, Error::Ioctl(e) if e == libc::EINVAL));
        veth.ioctl(IfCommand::SetCapabilities(IfCap::RXCSUM)).unwrap();
        assert_eq!(veth.ifnet().capenable(), IfCap::RXCSUM);
        assert!(fx.host.requests().contains(&Request::Ioctl(IfCommand::SetMtu(9000))));
    }

    #[test]
    fn test_input_delivers_to_host() {
        let fx = fixture();
        let veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        let frame = udp_frame(&[0xab; 300]);
        let pkt = fx.engine.receive(&fx.bridge, &frame, true).unwrap();
        assert!(pkt.segments().count() > 1);
        veth.input(pkt);

        let received = fx.host.take_received();
        assert_eq!(received.len(), 1);
        let (index, pkt) = &received[0];
        assert_eq!(*index, veth.index());
        assert_eq!(pkt.hdr().rcvif, Some(veth.index()));
        assert_eq!(pkt.segments().flatten().copied().collect::<Vec<_>>(), frame);
        drop(received);
        assert_eq!(fx.pool.outstanding(), 0);
    }

    #[test]
    fn test_transmit_hands_chain_to_engine() {
        let fx = fixture();
        let mut veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        let frame = udp_frame(b"ping");
        let mut buf = fx.bridge.allocate_writable(frame.len()).unwrap();
        buf.write(&frame).unwrap();
        let mut pkt = buf.into_packet();
        pkt.hdr_mut().csum_flags = CsumFlags::IP | CsumFlags::UDP;
        pkt.set_vlan_tag(7);
        veth.transmit(pkt).unwrap();

        let sent = fx.engine.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len, frame.len());
        assert_eq!(sent[0].bytes, frame);
        assert_eq!(sent[0].vlan, Some(7));
        assert_eq!(
            sent[0].offload,
            TxOffload {
                ip_csum: true,
                udp_csum: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_transmit_failure_is_reported_once() {
        let fx = fixture();
        let mut veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        fx.engine.set_fail_send(Some(-libc::ENOBUFS));
        let pkt = fx.engine.receive(&fx.bridge, &udp_frame(b"x"), false).unwrap();
        let err = veth.transmit(pkt).unwrap_err();
        assert!(matches!(err, Error::Engine(code) if code == -libc::ENOBUFS));
        assert_eq!(fx.engine.send_attempts(), 1);
        assert!(fx.engine.sent().is_empty());
        assert_eq!(fx.pool.outstanding(), 0);
    }

    #[test]
    fn test_detach_releases_registration_once() {
        let fx = fixture();
        let veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        let index = veth.index();
        veth.detach();
        assert!(fx.engine.registered().is_empty());
        assert_eq!(fx.engine.deregistered(), 1);
        assert_eq!(
            fx.host.requests().last(),
            Some(&Request::Detach(index))
        );
    }

    #[test]
    fn test_drop_detaches() {
        let fx = fixture();
        {
            let _veth = Veth::attach(fx.engine.clone(), fx.host.clone(), cfg()).unwrap();
        }
        assert_eq!(fx.engine.deregistered(), 1);
        assert!(fx.engine.registered().is_empty());
    }
}
