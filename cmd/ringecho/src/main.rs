//! ringecho — TCP echo daemon.
//!
//! Single-threaded echo server driven entirely by io_uring: one accept
//! always outstanding, every receive bounded by a linked idle timeout,
//! each received block echoed back verbatim.
//!
//! Usage:
//!     ringecho [port] [max_conns]
//!
//! Test with:
//!     echo "ping" | nc -q1 localhost 3354
//!
//!     # Idle teardown: connect, send nothing, watch the 5s close
//!     nc localhost 3354

use ringecho_core::error::{Result, RingError};
use ringecho_server::{Server, ServerConfig};
use ringecho_uring::UringRing;

use nix::sys::signal::{self, SigHandler, Signal};

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

const DEFAULT_PORT: u16 = 3354;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn last_os_error() -> RingError {
    RingError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(-1))
}

/// Bound, listening stream socket. Plain syscalls — startup only.
fn setup_listener(port: u16, backlog: i32) -> Result<RawFd> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(last_os_error());
        }

        let opt: i32 = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const _ as *const _,
            std::mem::size_of::<i32>() as libc::socklen_t,
        ) != 0
        {
            libc::close(fd);
            return Err(last_os_error());
        }

        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = libc::INADDR_ANY.to_be();
        addr.sin_port = port.to_be();

        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of_val(&addr) as libc::socklen_t,
        ) != 0
        {
            libc::close(fd);
            return Err(last_os_error());
        }

        if libc::listen(fd, backlog) != 0 {
            libc::close(fd);
            return Err(last_os_error());
        }

        Ok(fd)
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let max_conns: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1024);

    let handler = SigHandler::Handler(handle_signal);
    unsafe {
        let _ = signal::signal(Signal::SIGINT, handler);
        let _ = signal::signal(Signal::SIGTERM, handler);
    }

    let cfg = ServerConfig {
        max_conns,
        ..Default::default()
    };

    let listener = setup_listener(port, cfg.backlog)?;
    let ring = UringRing::new(cfg.sq_entries, cfg.idle_timeout)?;

    eprintln!(
        "ringecho: listening on 0.0.0.0:{} (sq={}, block={}, idle={}s, max {} conns)",
        port,
        cfg.sq_entries,
        cfg.block_size,
        cfg.idle_timeout.as_secs(),
        max_conns,
    );

    let started = std::time::Instant::now();
    let mut server = Server::new(ring, listener, cfg);
    let res = server.run(&RUNNING);

    eprintln!("\nringecho: shutting down...");
    server.stats().print(server.active_conns(), started.elapsed().as_secs_f64());
    unsafe {
        libc::close(listener);
    }
    res?;

    eprintln!("ringecho: done.");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("ringecho: fatal: {}", e);
        std::process::exit(1);
    }
}
