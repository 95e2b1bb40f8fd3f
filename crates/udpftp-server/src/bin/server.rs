//! udpftp server — serves files from a directory over the reliable UDP
//! file-transfer protocol.
//!
//! ```bash
//! udpftp-server 9000
//! udpftp-server 9000 /srv/files
//! ```

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use udpftp_server::Dispatcher;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let socket = match UdpSocket::bind(("0.0.0.0", args.port)) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!(port = args.port, error = %e, "failed to bind");
            std::process::exit(2);
        }
    };
    if let Err(e) = socket.set_read_timeout(Some(Duration::from_millis(200))) {
        tracing::error!(error = %e, "failed to configure socket");
        std::process::exit(2);
    }

    tracing::info!(port = args.port, root = %args.root, "udpftp-server starting");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::handle(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        });
    }

    let dispatcher = Dispatcher::new(socket, args.root);
    match dispatcher.run(&running) {
        Ok(()) => {
            tracing::info!("udpftp-server stopped");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!(error = %e, "udpftp-server failed");
            std::process::exit(1);
        }
    }
}

struct Args {
    port: u16,
    root: String,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown argument: {other}\nRun with --help for usage."));
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let port_str = positional
        .first()
        .cloned()
        .or_else(|| std::env::var("UDPFTP_PORT").ok())
        .ok_or_else(|| "missing required argument: port\nRun with --help for usage.".to_string())?;
    let port: u16 = port_str
        .parse()
        .map_err(|e| format!("invalid port '{port_str}': {e}"))?;

    let root = positional
        .get(1)
        .cloned()
        .or_else(|| std::env::var("UDPFTP_ROOT").ok())
        .unwrap_or_else(|| ".".to_string());

    Ok(Args { port, root })
}

fn print_help() {
    eprintln!(
        r#"udpftp-server — serves files over the reliable UDP file-transfer protocol

USAGE:
  udpftp-server <port> [root]

ARGUMENTS:
  port    UDP port to listen on (1-65535)
  root    Directory to serve files from (default: .)

ENVIRONMENT VARIABLES:
  UDPFTP_PORT   Fallback for the port argument
  UDPFTP_ROOT   Fallback for the root argument
  RUST_LOG      Log level filter (e.g. info, debug, udpftp_server=trace)

EXIT CODES:
  0  clean shutdown
  1  internal error or invalid arguments
  2  failed to bind the listening socket
"#
    );
}

mod ctrlc {
    use std::sync::atomic::{AtomicBool, Ordering};

    static HANDLER_SET: AtomicBool = AtomicBool::new(false);

    pub fn handle(f: impl Fn() + Send + 'static) {
        if HANDLER_SET.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = std::thread::Builder::new()
            .name("signal".into())
            .spawn(move || {
                wait_for_signal();
                f();
            });
    }

    #[cfg(unix)]
    fn wait_for_signal() {
        unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGINT);
            libc::sigaddset(&mut mask, libc::SIGTERM);
            let mut sig: libc::c_int = 0;
            libc::sigwait(&mask, &mut sig);
        }
    }

    #[cfg(not(unix))]
    fn wait_for_signal() {
        loop {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }
}
