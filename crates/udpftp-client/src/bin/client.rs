//! udpftp client — fetches a file from a udpftp server.
//!
//! ```bash
//! udpftp-client GET 127.0.0.1:9000/report.txt
//! udpftp-client GET 127.0.0.1:9000/report.txt --loss 5 --output out.txt
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use udpftp_proto::Error;

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

    tracing::info!(server = %args.server_addr, name = args.name, loss = args.loss_pct, "requesting file");

    match udpftp_client::get(args.server_addr, &args.name, args.loss_pct) {
        Ok(outcome) => {
            tracing::info!(bytes = outcome.data.len(), stats = ?outcome.stats, "transfer complete");
            let output_path = args.output.unwrap_or_else(|| PathBuf::from(&args.name));
            if let Err(e) = std::fs::write(&output_path, &outcome.data) {
                tracing::error!(path = %output_path.display(), error = %e, "failed to write output");
                std::process::exit(1);
            }
            tracing::info!(path = %output_path.display(), "wrote output");
            std::process::exit(0);
        }
        Err(Error::UnknownFile(reason)) => {
            tracing::error!(reason, "server rejected request");
            std::process::exit(4);
        }
        Err(e) => {
            tracing::error!(error = %e, "transfer failed");
            std::process::exit(3);
        }
    }
}

struct Args {
    server_addr: SocketAddr,
    name: String,
    loss_pct: u8,
    output: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 || args[1] != "GET" {
        return Err("usage: udpftp-client GET <host:port/name> [--loss <percent>] [--output <path>]\nRun with --help for usage.".to_string());
    }

    let (host_port, name) = args[2]
        .rsplit_once('/')
        .ok_or_else(|| format!("invalid target '{}': expected host:port/name", args[2]))?;
    if name.is_empty() {
        return Err(format!("invalid target '{}': empty file name", args[2]));
    }

    let server_addr = host_port
        .to_socket_addrs()
        .map_err(|e| format!("invalid server address '{host_port}': {e}"))?
        .next()
        .ok_or_else(|| format!("could not resolve server address '{host_port}'"))?;

    let mut loss_pct: u8 = 0;
    let mut output = None;

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--loss" => {
                i += 1;
                let val = args.get(i).ok_or("--loss requires a value")?;
                loss_pct = val.parse().map_err(|e| format!("invalid loss percent '{val}': {e}"))?;
                if loss_pct > 100 {
                    return Err(format!("invalid loss percent '{val}': must be 0-100"));
                }
            }
            "--output" | "-o" => {
                i += 1;
                let val = args.get(i).ok_or("--output requires a value")?;
                output = Some(PathBuf::from(val));
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}\nRun with --help for usage.")),
        }
        i += 1;
    }

    Ok(Args { server_addr, name: name.to_string(), loss_pct, output })
}

fn print_help() {
    eprintln!(
        r#"udpftp-client — fetches a file over the reliable UDP file-transfer protocol

USAGE:
  udpftp-client GET <host:port/name> [OPTIONS]

OPTIONS:
  --loss <percent>    Artificial receive-side packet loss, 0-100 (default: 0)
  --output, -o <path> Where to write the received file (default: ./<name>)
  --help, -h          Show this help

ENVIRONMENT VARIABLES:
  RUST_LOG   Log level filter (e.g. info, debug, udpftp_client=trace)

EXIT CODES:
  0  success
  1  invalid arguments or local I/O error
  3  transfer failure (stalled, unreachable peer, inconsistent data)
  4  server rejected the request
"#
    );
}
