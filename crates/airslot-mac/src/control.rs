//! # Control Channel
//!
//! TCP request/reply server for schedule updates. A request is one UTF-8
//! text frame (newline- or EOF-terminated): either a schedule update in the
//! `slot,mac,mask#...` wire form, or a `TERMINATE` command.
//!
//! Replies are fixed 2-byte frames: `OK` for an applied update (and for
//! `TERMINATE`), `ER` for a rejected one. Rejection detail goes to the log;
//! the installed schedule is never touched by a rejected update.
//!
//! The server runs in its own named thread with a non-blocking accept loop
//! and stops on its own flag, on scheduler shutdown, or on `TERMINATE`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use airslot_core::wire::{ACK_ERR, ACK_OK, TERMINATE};

use crate::runtime::SchedulerHandle;

/// Longest accepted request frame.
const MAX_REQUEST_LEN: usize = 64 * 1024;

/// The configuration request/reply server.
pub struct ControlServer {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    addr: SocketAddr,
}

impl ControlServer {
    /// Bind and start serving. Returns once the listener is live.
    pub fn start(bind_addr: SocketAddr, scheduler: SchedulerHandle) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("airslot-ctrl".into())
            .spawn(move || serve_loop(listener, scheduler, running_clone))
            .map_err(std::io::Error::other)?;

        info!(%addr, "control channel listening");

        Ok(ControlServer {
            running,
            handle: Some(handle),
            addr,
        })
    }

    /// The address the server is actually listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and join the server thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(listener: TcpListener, scheduler: SchedulerHandle, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) && scheduler.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "control connection");
                handle_request(stream, &scheduler, &running);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                warn!(error = %e, "control accept failed");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
    info!("control channel stopped");
}

fn handle_request(mut stream: TcpStream, scheduler: &SchedulerHandle, running: &AtomicBool) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let Some(msg) = read_request(&mut stream) else {
        return;
    };

    if msg.starts_with(TERMINATE) {
        info!("TERMINATE received, shutting down");
        let _ = stream.write_all(ACK_OK);
        scheduler.request_shutdown();
        running.store(false, Ordering::Relaxed);
        return;
    }

    match scheduler.apply_update(&msg) {
        Ok(()) => {
            let _ = stream.write_all(ACK_OK);
        }
        Err(e) => {
            warn!(error = %e, "schedule update rejected");
            let _ = stream.write_all(ACK_ERR);
        }
    }
}

/// Read one request frame: up to the first newline, EOF, or the size cap.
fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.contains(&b'\n') || buf.len() > MAX_REQUEST_LEN {
                    break;
                }
            }
            Err(_) => return None,
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let line = text.split('\n').next().unwrap_or_default().trim();
    if line.is_empty() && buf.is_empty() {
        return None;
    }
    Some(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::RecordingRadio;
    use crate::runtime::{RuntimeConfig, SchedulerRuntime};
    use airslot_core::clock::ClockConfig;
    use airslot_core::schedule::SlotTable;

    fn start_runtime() -> SchedulerRuntime {
        SchedulerRuntime::start(
            RuntimeConfig {
                interface: "wifi0".into(),
                clock: ClockConfig {
                    slot_duration: Duration::from_millis(5),
                    slots_per_frame: 10,
                    ..ClockConfig::default()
                },
                initial_delay: Some(Duration::from_millis(1)),
            },
            SlotTable::empty(10),
            Box::new(RecordingRadio::new()),
        )
        .unwrap()
    }

    fn request(addr: SocketAddr, msg: &str) -> [u8; 2] {
        let mut stream = TcpStream::connect(addr).expect("connect to control channel");
        stream.write_all(msg.as_bytes()).unwrap();
        stream.write_all(b"\n").unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).unwrap();
        reply
    }

    #[test]
    fn valid_update_is_acked_and_applied() {
        let mut runtime = start_runtime();
        let mut server =
            ControlServer::start("127.0.0.1:0".parse().unwrap(), runtime.handle()).unwrap();

        let reply = request(server.addr(), "0,aa:bb:cc:dd:ee:ff,3#1,11:22:33:44:55:66,1");
        assert_eq!(&reply, b"OK");

        let table = runtime.handle().table();
        assert_eq!(table.slot_text(0), "aa:bb:cc:dd:ee:ff,3");
        assert_eq!(table.slot_text(1), "11:22:33:44:55:66,1");

        server.stop();
        runtime.shutdown();
    }

    #[test]
    fn bad_update_gets_negative_ack_and_changes_nothing() {
        let mut runtime = start_runtime();
        let handle = runtime.handle();
        handle.apply_update("0,aa:bb:cc:dd:ee:ff,3").unwrap();
        let mut server =
            ControlServer::start("127.0.0.1:0".parse().unwrap(), handle.clone()).unwrap();

        let reply = request(server.addr(), "99,11:22:33:44:55:66,1");
        assert_eq!(&reply, b"ER");
        assert_eq!(handle.table().slot_text(0), "aa:bb:cc:dd:ee:ff,3");
        assert_eq!(handle.stats().updates_rejected, 1);

        server.stop();
        runtime.shutdown();
    }

    #[test]
    fn terminate_stops_scheduler_and_server() {
        let mut runtime = start_runtime();
        let mut server =
            ControlServer::start("127.0.0.1:0".parse().unwrap(), runtime.handle()).unwrap();
        let addr = server.addr();

        let reply = request(addr, "TERMINATE");
        assert_eq!(&reply, b"OK");
        assert!(!runtime.handle().is_running());

        // The accept loop winds down; new connections stop being served.
        server.stop();
        assert!(
            TcpStream::connect(addr)
                .map(|mut s| {
                    let _ = s.write_all(b"x\n");
                    let mut b = [0u8; 2];
                    s.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
                    s.read_exact(&mut b).is_err()
                })
                .unwrap_or(true),
            "no replies after shutdown"
        );

        runtime.shutdown();
    }

    #[test]
    fn eof_terminated_request_works_without_newline() {
        let mut runtime = start_runtime();
        let mut server =
            ControlServer::start("127.0.0.1:0".parse().unwrap(), runtime.handle()).unwrap();

        let mut stream = TcpStream::connect(server.addr()).unwrap();
        stream.write_all(b"0,aa:bb:cc:dd:ee:ff,3").unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"OK");

        server.stop();
        runtime.shutdown();
    }
}
