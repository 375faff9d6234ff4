//! HTTP relay example
//!
//! Run with: cargo run --example relay [OUTPUT_ADDR] [INPUT...]
//!
//! Each INPUT has the form `PATH=PROTO://HOST:PORT/MEDIA`, where PROTO is
//! `tcp` or `udp` and MEDIA one of `flv`, `mpegts`, `ogg`, `txt`. A UDP
//! input on an IPv4 multicast address joins that group.
//!
//! Examples:
//!   cargo run --example relay 0.0.0.0:8000 /live=tcp://0.0.0.0:9000/mpegts
//!   cargo run --example relay 127.0.0.1:8000 /cam=udp://239.1.1.1:5000/flv
//!
//! ## Feeding an input
//!
//! With ffmpeg:
//!   ffmpeg -re -i input.mp4 -c copy -f mpegts tcp://127.0.0.1:9000
//!
//! ## Watching
//!
//! With VLC:
//!   vlc http://127.0.0.1:8000/live

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use http_streamer::{InputDescriptor, MediaType, Protocol, Route, Streamer, StreamerConfig};

/// Parse `PATH=PROTO://HOST:PORT/MEDIA`
fn parse_input(arg: &str) -> Result<InputDescriptor, String> {
    let (path, spec) = arg
        .split_once('=')
        .ok_or_else(|| format!("missing '=' in input '{}'", arg))?;
    let (protocol, rest) = spec
        .split_once("://")
        .ok_or_else(|| format!("missing protocol in input '{}'", arg))?;
    let (endpoint, media) = rest
        .rsplit_once('/')
        .ok_or_else(|| format!("missing media type in input '{}'", arg))?;
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| format!("missing port in input '{}'", arg))?;

    let protocol: Protocol = protocol.parse().map_err(|e| format!("{}", e))?;
    let media_type: MediaType = media.parse().map_err(|e| format!("{}", e))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port '{}' in input '{}'", port, arg))?;

    let mut route = Route::new(host, port, protocol).name(path);
    if protocol == Protocol::Udp
        && host.parse::<Ipv4Addr>().map_or(false, |ip| ip.is_multicast())
    {
        route = route.multicast();
    }

    Ok(InputDescriptor::new(path, route, media_type).name(path))
}

fn print_usage() {
    eprintln!("Usage: relay [OUTPUT_ADDR] [INPUT...]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  OUTPUT_ADDR  Address clients connect to (default: 0.0.0.0:8000)");
    eprintln!("  INPUT        PATH=PROTO://HOST:PORT/MEDIA");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  relay 0.0.0.0:8000 /live=tcp://0.0.0.0:9000/mpegts");
    eprintln!("  relay 127.0.0.1:8000 /cam=udp://239.1.1.1:5000/flv");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = StreamerConfig::default();
    let mut inputs = Vec::new();
    for arg in args.iter().skip(1) {
        if arg.contains('=') {
            match parse_input(arg) {
                Ok(input) => inputs.push(input),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    eprintln!();
                    print_usage();
                    std::process::exit(1);
                }
            }
        } else {
            let addr: SocketAddr = arg
                .replace("localhost", "127.0.0.1")
                .parse()
                .map_err(|_| format!("invalid output address '{}'", arg))?;
            config = config.bind(addr);
        }
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("http_streamer=debug".parse()?)
                .add_directive("relay=debug".parse()?),
        )
        .init();

    let streamer = Streamer::start(config).await?;
    let local_addr = streamer.local_addr().await;
    println!("Serving on {:?}", local_addr);

    for input in inputs {
        let path = input.path.clone();
        let route = input.route.to_string();
        match streamer.register_input(input).await {
            Ok(()) => println!("  {} <- {}", path, route),
            Err(e) => eprintln!("Cannot register {}: {}", path, e),
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for stats in streamer.registry().snapshot().await {
                    println!(
                        "{} [{}] phase={} peer={:?} in={:.0}B/s out={:.0}B/s clients={} broken={}",
                        stats.path,
                        stats.media_type,
                        stats.phase,
                        stats.peer,
                        stats.input_rate,
                        stats.output_rate,
                        stats.connection_count,
                        stats.broken_count,
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    streamer.stop().await;
    Ok(())
}
