//! Flotilla transmitter - relays control-surface events to every display node
//!
//! - Picks the MIDI input whose name matches the configured hint, or asks
//! - Polls it continuously and broadcasts each note/knob event over UDP
//! - Best effort only: no acknowledgment, no retry, no ordering

mod broadcast;
mod midi;
mod relay;
mod surface;

use anyhow::{bail, Context, Result};
use broadcast::{broadcast_socket, Broadcaster};
use clap::Parser;
use flotilla_common::{logging, FleetConfig};
use std::io::{BufRead, Write};
use std::time::Duration;
use surface::{find_port, list_ports, ControlSurface, MidiPort, RawMidiInput};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "flotilla-transmitter", about = "Broadcast control-surface events to display nodes")]
struct Args {
    /// Substring of the MIDI input name to use (overrides `broadcast.device_hint`)
    #[arg(long)]
    device: Option<String>,

    /// List MIDI inputs and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");
    let args = Args::parse();
    let cfg = FleetConfig::load();

    let ports = list_ports().context("Failed to enumerate MIDI inputs")?;
    if args.list {
        print_ports(&ports);
        return Ok(());
    }

    let hint = args.device.unwrap_or_else(|| cfg.broadcast.device_hint.clone());
    let port = select_port(&ports, &hint)?;
    info!("connecting to {} ({})", port.name, port.path.display());
    let mut input = RawMidiInput::open(&port)?;

    let socket = broadcast_socket().context("Failed to create broadcast socket")?;
    let broadcaster = Broadcaster::new(socket, &cfg.broadcast.addresses, cfg.broadcast.port)?;
    info!(
        "monitoring {} and broadcasting to port {} via {:?}",
        input.name(),
        cfg.broadcast.port,
        broadcaster.targets()
    );

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };
    relay::run_relay(
        &mut input,
        &broadcaster,
        Duration::from_millis(cfg.broadcast.poll_interval_ms),
        shutdown,
    )
    .await
    .context("Control surface stopped responding")?;

    info!("exiting");
    Ok(())
}

fn print_ports(ports: &[MidiPort]) {
    println!("Available MIDI input ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("{i}: {}", port.name);
    }
}

fn select_port(ports: &[MidiPort], hint: &str) -> Result<MidiPort> {
    if ports.is_empty() {
        return Err(surface::SurfaceError::NoPorts.into());
    }
    if let Some(port) = find_port(ports, hint) {
        return Ok(port.clone());
    }

    print_ports(ports);
    println!("{hint} not found. Select port manually:");
    print!("Enter port number: ");
    std::io::stdout().flush().ok();

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).context("Failed to read port number")?;
    let index: usize = match line.trim().parse() {
        Ok(i) => i,
        Err(_) => bail!("not a port number: {:?}", line.trim()),
    };
    ports
        .get(index)
        .cloned()
        .ok_or_else(|| surface::SurfaceError::BadIndex(index).into())
}
