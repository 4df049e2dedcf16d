use std::io::{BufRead, BufReader, Read, Write};
use std::net::SocketAddr;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use vindkanal_config::VindkanalConfig;
use vindkanal_core::prelude::*;
use vindkanal_mgmt::MgmtServer;
use vindkanal_telemetry::blink::blink_channel;
use vindkanal_telemetry::metrics::MetricsRecorder;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the emulated wire between the configured UDP cables
    Run(RunArgs),
    /// Attach an interactive console to a running emulator
    Console(ConsoleArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Configuration file; defaults to ./vindkanal.yaml when present
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Override the management socket path
    #[arg(long)]
    pub mgmt: Option<PathBuf>,
    /// Override the RNG seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,
    /// Management script replayed before traffic starts
    #[arg(long)]
    pub script: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ConsoleArgs {
    /// Management socket of the target emulator
    pub socket: PathBuf,
}

/// How long the relay loop waits before re-checking for shutdown.
const RELAY_POLL: Duration = Duration::from_millis(250);

pub fn run_emulator(args: RunArgs, metrics: MetricsRecorder) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => VindkanalConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => VindkanalConfig::load().context("loading configuration")?,
    };
    if args.mgmt.is_some() {
        config.control.mgmt_socket = args.mgmt.clone();
    }
    if args.seed.is_some() {
        config.link.seed = args.seed;
    }
    if args.script.is_some() {
        config.control.startup_script = args.script.clone();
    }

    if let Some(pid_file) = &config.control.pid_file {
        std::fs::write(pid_file, format!("{}\n", std::process::id()))
            .with_context(|| format!("writing {}", pid_file.display()))?;
    }

    let left = open_cable(&config.endpoints.left.bind, &config.endpoints.left.peer)
        .context("opening left cable")?;
    let right = open_cable(&config.endpoints.right.bind, &config.endpoints.right.peer)
        .context("opening right cable")?;

    let options = LinkOptions {
        fifo: config.link.fifo,
        seed: config.link.seed,
        transition_period_ms: config.link.transition_period_ms,
        ..LinkOptions::default()
    };
    let (blink_tx, blink_rx) = blink_channel(1024);
    let link = Link::open(Box::new(right), options, Some(blink_tx))?;
    let handle = link.handle();

    info!(
        left = %config.endpoints.left.bind,
        right = %config.endpoints.right.bind,
        fifo = config.link.fifo,
        "wire up"
    );

    if let Some(script) = &config.control.startup_script {
        vindkanal_mgmt::replay_script(&handle, script)
            .with_context(|| format!("replaying {}", script.display()))?;
    }

    let server = match &config.control.mgmt_socket {
        Some(path) => Some(MgmtServer::bind(path, handle.clone()).context("binding console")?),
        None => None,
    };

    let closed = Arc::new(AtomicBool::new(false));
    std::thread::scope(|scope| {
        // Telemetry drain; exits when the link worker drops its sender.
        scope.spawn(|| {
            for event in blink_rx.iter() {
                metrics.record(&event);
            }
        });

        // Impaired right-to-left traffic back onto the left cable.
        {
            let left = &left;
            let link = &link;
            let closed = Arc::clone(&closed);
            scope.spawn(move || {
                loop {
                    match link.recv() {
                        Ok(frame) => {
                            if let Err(err) = left.send(&frame, 0) {
                                warn!(%err, "left cable send failed");
                            }
                        }
                        Err(_) => break,
                    }
                }
                closed.store(true, Ordering::SeqCst);
            });
        }

        // Left cable into the wire, left-to-right.
        let left_rx = left.incoming().clone();
        loop {
            match left_rx.recv_timeout(RELAY_POLL) {
                Ok(frame) => {
                    if frame.is_empty() {
                        continue;
                    }
                    if link.send(&frame, 0).is_err() {
                        break;
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        // Unblocks the right-to-left thread if we got here first.
        handle.shutdown();
        left.close();
    });

    if let Some(server) = server {
        server.stop();
    }
    if let Some(pid_file) = &config.control.pid_file {
        let _ = std::fs::remove_file(pid_file);
    }
    info!("wire down");
    Ok(())
}

fn open_cable(bind: &str, peer: &str) -> anyhow::Result<UdpTransport> {
    let bind: SocketAddr = bind.parse().with_context(|| format!("bad address {bind}"))?;
    let peer: SocketAddr = peer.parse().with_context(|| format!("bad address {peer}"))?;
    Ok(UdpTransport::connect(bind, peer)?)
}

/// Interactive console session: stdin lines to the socket, replies to
/// stdout, until the peer closes or stdin ends.
pub fn run_console(args: ConsoleArgs) -> anyhow::Result<()> {
    let stream = UnixStream::connect(&args.socket)
        .with_context(|| format!("connecting {}", args.socket.display()))?;
    let mut writer = stream.try_clone()?;
    let mut reader = stream;

    let printer = std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut stdout = std::io::stdout();
        while let Ok(n) = reader.read(&mut buf) {
            if n == 0 {
                break;
            }
            if stdout.write_all(&buf[..n]).and_then(|_| stdout.flush()).is_err() {
                break;
            }
        }
    });

    let stdin = std::io::stdin();
    for line in BufReader::new(stdin.lock()).lines() {
        let line = line?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        if line.trim() == "logout" || line.trim() == "shutdown" {
            break;
        }
    }
    let _ = writer.shutdown(std::net::Shutdown::Write);
    let _ = printer.join();
    Ok(())
}
