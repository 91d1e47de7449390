use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use etherparse::{NetHeaders, PacketBuilder, PacketHeaders};
use tracing::info;
use tracing_subscriber::EnvFilter;
use triomphe::Arc;

use veth_rs::config::{PortConfig, VethConfig};
use veth_rs::loopback::{LoopbackEngine, LoopbackStack, Request, SlabPool};
use veth_rs::mbuf::{Bridge, CsumFlags, MbufZone, Packet};
use veth_rs::veth::{IfCommand, IfFlags, IfOps, Veth};

/// Dry run of a port configuration against an in-process engine and stack.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Port configuration file (TOML).
    #[clap(short, long)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[clap(short, long)]
    verbose: bool,

    /// Number of sample frames pushed through the receive path.
    #[clap(short, long, default_value_t = 4)]
    frames: usize,
}

fn print_request(req: &Request) {
    match req {
        Request::Attach(name) => println!("  attach {name}"),
        Request::Detach(index) => println!("  detach #{index}"),
        Request::Ioctl(cmd) => println!("  ioctl {cmd:?}"),
        Request::Ifaddr(r) => println!(
            "  inet {} netmask {} broadcast {} on {}",
            r.addr, r.mask, r.broadaddr, r.name
        ),
        Request::Ifaddr6(r) => println!(
            "  inet6 {} prefixmask {} on {}",
            r.addr, r.prefixmask, r.name
        ),
        Request::Route(r) => println!("  route {}/{} via {}", r.dst, r.netmask, r.gateway),
    }
}

/// Source and destination of a received frame.
fn print_addrs(pkt: &Packet) -> Result<String> {
    let mut frame = vec![0u8; pkt.len()];
    pkt.read_range(0, &mut frame)?;
    let headers = PacketHeaders::from_ethernet_slice(&frame)?;
    match headers.net {
        Some(NetHeaders::Ipv4(hdr, _)) => Ok(format!(
            "IP: {} > {}",
            Ipv4Addr::from(hdr.source),
            Ipv4Addr::from(hdr.destination)
        )),
        Some(NetHeaders::Ipv6(hdr, _)) => Ok(format!(
            "IP: {} > {}",
            Ipv6Addr::from(hdr.source),
            Ipv6Addr::from(hdr.destination)
        )),
        _ => bail!("IP header not found"),
    }
}

fn udp_frame(cfg: &VethConfig, seq: usize) -> Result<Vec<u8>> {
    let peer = {
        let mut o = cfg.addr.octets();
        o[3] = o[3].wrapping_add(1);
        o
    };
    let builder = PacketBuilder::ethernet2([0x02, 0, 0, 0, 0xfe, 0xfe], cfg.mac.to_array())
        .ipv4(peer, cfg.addr.octets(), 64)
        .udp(40000, 9);
    let payload = vec![seq as u8; 64 + seq * 100];
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, &payload)?;
    Ok(frame)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let port = PortConfig::load(&args.config)?;
    let cfg = VethConfig::new(&port)?;

    println!("Port {} started with parameters:", cfg.port_id);
    println!("* interface: {}", cfg.name);
    println!("* mac: {}", cfg.mac.to_hex_string());
    println!("* vips: {} IPv4, {} IPv6", cfg.vip.len(), cfg.vip6.len());
    println!("* frames: {}", args.frames);

    let pool = SlabPool::new(256, 512);
    let bridge = Bridge::new(MbufZone::new(1024), pool.clone());
    let engine = Arc::new(LoopbackEngine::new(pool.clone()));
    let host = Arc::new(LoopbackStack::new());

    let mut veth = Veth::attach(engine.clone(), host.clone(), cfg)?;
    println!("Requests issued by attach:");
    host.requests().iter().for_each(print_request);
    for err in veth.setup_errors() {
        println!("  failed: {err}");
    }

    veth.ioctl(IfCommand::SetFlags(IfFlags::UP))?;
    info!(ifname = %veth.ifnet().name(), state = ?veth.state(), "interface up");

    for seq in 0..args.frames {
        let frame = udp_frame(veth.config(), seq)?;
        let rx_csum = veth.config().hw.rx_csum;
        let pkt = engine.receive(&bridge, &frame, rx_csum)?;
        println!(
            "rx #{seq}: {} bytes in {} segments, {}",
            pkt.len(),
            pkt.segments().count(),
            print_addrs(&pkt).unwrap_or_else(|e| e.to_string())
        );
        veth.input(pkt);
    }
    let received = host.take_received();
    println!("Host stack received {} chains", received.len());
    drop(received);

    let reply = udp_frame(veth.config(), 0)?;
    let mut buf = bridge.allocate_writable(reply.len())?;
    buf.write(&reply)?;
    let mut pkt = buf.into_packet();
    pkt.hdr_mut().csum_flags = CsumFlags::IP | CsumFlags::UDP;
    veth.transmit(pkt)?;
    for frame in engine.sent() {
        println!(
            "tx on {}: {} bytes, offload {:?}",
            frame.ifname, frame.len, frame.offload
        );
    }

    veth.detach();
    let outstanding = pool.outstanding();
    println!("Pool buffers outstanding after detach: {outstanding}");
    if outstanding != 0 {
        bail!("{outstanding} engine buffers were never released");
    }
    Ok(())
}
