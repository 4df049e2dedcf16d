//! ## vindkanal-mgmt::server
//! **Unix-socket management console**
//!
//! Accepts line-oriented sessions on a Unix domain socket. Each session
//! runs on its own thread and talks to the link through a cloned
//! [`LinkHandle`], so sessions never touch link state directly.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use vindkanal_core::LinkHandle;

use crate::command::parse_line;
use crate::dispatch::{dispatch, Outcome};
use crate::error::MgmtError;

/// Hard cap on concurrent console sessions.
pub const MAX_SESSIONS: usize = 15;

const BANNER: &str = "VINDKANAL wire emulation management console\n(type help for help)\n\n";
const PROMPT: &str = "Vindkanal$ ";
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Listening management server. Dropping it stops the accept loop and
/// unlinks the socket path.
pub struct MgmtServer {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MgmtServer {
    /// Binds the console socket and starts accepting sessions.
    pub fn bind(path: &Path, handle: LinkHandle) -> Result<MgmtServer, MgmtError> {
        // A stale socket file from a previous run would make bind fail.
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        info!(path = %path.display(), "management console listening");

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("vindkanal-mgmt".into())
                .spawn(move || accept_loop(listener, handle, shutdown))?
        };

        Ok(MgmtServer {
            path: path.to_path_buf(),
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    /// Stops accepting new sessions and waits for the accept loop.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for MgmtServer {
    fn drop(&mut self) {
        if self.accept_thread.is_some() {
            self.stop_inner();
        }
    }
}

fn accept_loop(listener: UnixListener, handle: LinkHandle, shutdown: Arc<AtomicBool>) {
    let sessions = Arc::new(AtomicUsize::new(0));
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if sessions.load(Ordering::SeqCst) >= MAX_SESSIONS {
                    warn!("console session refused, too many connections");
                    drop(stream);
                    continue;
                }
                sessions.fetch_add(1, Ordering::SeqCst);
                let handle = handle.clone();
                let session_count = Arc::clone(&sessions);
                let shutdown = Arc::clone(&shutdown);
                let spawned = std::thread::Builder::new()
                    .name("vindkanal-mgmt-session".into())
                    .spawn(move || {
                        if let Err(err) = run_session(stream, &handle, &shutdown) {
                            warn!(%err, "console session ended with error");
                        }
                        session_count.fetch_sub(1, Ordering::SeqCst);
                    });
                if let Err(err) = spawned {
                    warn!(%err, "failed to spawn console session");
                    sessions.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                warn!(%err, "console accept failed");
                break;
            }
        }
    }
}

fn run_session(
    stream: UnixStream,
    handle: &LinkHandle,
    shutdown: &AtomicBool,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    writer.write_all(BANNER.as_bytes())?;
    loop {
        writer.write_all(PROMPT.as_bytes())?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(()); // peer hung up
        }
        match serve_line(handle, &line) {
            Served::Quiet => {}
            Served::Reply(reply) => {
                writer.write_all(reply.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            Served::Logout(reply) => {
                writer.write_all(reply.as_bytes())?;
                writer.write_all(b"\n")?;
                return Ok(());
            }
            Served::Shutdown(reply) => {
                writer.write_all(reply.as_bytes())?;
                writer.write_all(b"\n")?;
                shutdown.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }
    }
}

enum Served {
    /// Blank line or comment, no status reply.
    Quiet,
    Reply(String),
    Logout(String),
    Shutdown(String),
}

/// Executes one console line and renders the numbered status reply.
fn serve_line(handle: &LinkHandle, line: &str) -> Served {
    let command = match parse_line(line) {
        Ok(Some(command)) => command,
        Ok(None) => return Served::Quiet,
        Err(err) => return Served::Reply(format!("{} {err}", err.code())),
    };
    match dispatch(handle, command) {
        Ok(Outcome::Done(Some(payload))) => Served::Reply(format!("{payload}\n1000 Success")),
        Ok(Outcome::Done(None)) => Served::Reply("1000 Success".to_string()),
        Ok(Outcome::Logout) => Served::Logout("1000 Success".to_string()),
        Ok(Outcome::Shutdown) => Served::Shutdown("1000 Success".to_string()),
        Err(err) => Served::Reply(format!("{} {err}", err.code())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use vindkanal_core::prelude::*;

    fn connect(path: &Path) -> UnixStream {
        // The accept loop polls, give the bind a moment.
        for _ in 0..50 {
            if let Ok(stream) = UnixStream::connect(path) {
                return stream;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("console did not come up");
    }

    fn read_until(reader: &mut impl Read, marker: &str) -> String {
        let mut collected = String::new();
        let mut buf = [0u8; 256];
        while !collected.contains(marker) {
            let n = reader.read(&mut buf).unwrap();
            assert!(n > 0, "console closed before {marker:?}; got {collected:?}");
            collected.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        collected
    }

    fn open_server(dir: &Path) -> (Link, MgmtServer, PathBuf) {
        let (left, _right) = PairTransport::pair();
        let link = Link::open(Box::new(left), LinkOptions::default(), None).unwrap();
        let socket = dir.join("mgmt.sock");
        let server = MgmtServer::bind(&socket, link.handle()).unwrap();
        (link, server, socket)
    }

    #[test]
    fn session_applies_commands_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let (link, server, socket) = open_server(dir.path());

        let mut stream = connect(&socket);
        read_until(&mut stream, PROMPT);

        stream.write_all(b"delay 40+10\n").unwrap();
        let reply = read_until(&mut stream, "\n");
        assert!(reply.contains("1000 Success"), "{reply:?}");

        stream.write_all(b"bogus-command\n").unwrap();
        let reply = read_until(&mut stream, "\n");
        assert!(reply.contains("1038"), "{reply:?}");

        stream.write_all(b"logout\n").unwrap();
        read_until(&mut stream, "1000 Success");

        let info = link.handle().info(None).unwrap();
        assert_eq!(info.values[Metric::Delay.index()][0].base, 40.0);

        server.stop();
        link.close();
    }

    #[test]
    fn show_payload_precedes_the_status_line() {
        let dir = tempfile::tempdir().unwrap();
        let (link, server, socket) = open_server(dir.path());

        let mut stream = connect(&socket);
        read_until(&mut stream, PROMPT);

        stream.write_all(b"showcurrent\n").unwrap();
        let reply = read_until(&mut stream, "1000 Success");
        assert!(reply.contains("current state: 0"), "{reply:?}");

        server.stop();
        link.close();
    }

    #[test]
    fn stop_unlinks_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (link, server, socket) = open_server(dir.path());
        assert!(socket.exists());
        server.stop();
        assert!(!socket.exists());
        link.close();
    }
}
