use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use httptap::capture::{self, SourceEvent};
use httptap::config;
use httptap::dispatcher;
use httptap::display;
use httptap::{cli, config::Config};

fn main() {
    let args = cli::Cli::parse();

    // Initialize tracing/logging
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // Handle --list-interfaces
    if args.list_interfaces {
        list_interfaces();
        return;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    // Set up Ctrl-C handler
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
        eprintln!("\nInterrupt received, stopping capture...");
    })
    .expect("failed to set Ctrl-C handler");

    if let Err(e) = run(&config, &running) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// List available network interfaces and print them.
fn list_interfaces() {
    match capture::list_interfaces() {
        Ok(devices) => {
            println!("Available network interfaces:");
            println!("{:<20} {:<20} {}", "Name", "Description", "Addresses");
            println!("{}", "-".repeat(70));
            for device in &devices {
                let desc = device.desc.as_deref().unwrap_or("");
                let addrs: Vec<String> = device
                    .addresses
                    .iter()
                    .map(|a| format!("{}", a.addr))
                    .collect();
                println!("{:<20} {:<20} {}", device.name, desc, addrs.join(", "));
            }
            if devices.is_empty() {
                println!("  (no interfaces found — try running with sudo)");
            }
        }
        Err(e) => {
            eprintln!("error listing interfaces: {}", e);
            eprintln!("hint: try running with sudo");
        }
    }
}

/// Capture loop: open the packet source, feed the dispatcher, and print
/// reconstructed messages until interrupted or the source runs out.
fn run(config: &Config, running: &Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let mut source = capture::open_source(&config.capture)?;

    let mut handle = dispatcher::spawn(dispatcher::DispatcherConfig {
        monitored_port: config.capture.port,
        expiration: config.core.expiration_ms as f64 / 1000.0,
        packet_queue_capacity: config.core.packet_queue_capacity,
        message_queue_capacity: config.core.message_queue_capacity,
    });

    // Consumer: print messages as the dispatcher completes them.
    let printer = {
        let messages = handle.messages.clone();
        let output = config.output.clone();
        thread::Builder::new()
            .name("httptap-printer".into())
            .spawn(move || {
                let mut index: u64 = 0;
                for msg in messages.iter() {
                    index += 1;
                    if output.quiet {
                        continue;
                    }
                    if output.hex_dump {
                        display::print_message_detail(index, &msg);
                    } else {
                        display::print_message_summary(index, &msg);
                    }
                }
            })
            .expect("failed to spawn printer thread")
    };

    println!("httptap v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Monitoring TCP port {} via {} engine",
        config.capture.port, config.capture.engine
    );
    println!("Reconstructing HTTP messages (Ctrl-C to stop)...");
    println!();

    let mut source_error: Option<capture::CaptureError> = None;
    while running.load(Ordering::SeqCst) {
        match source.next_event() {
            Ok(SourceEvent::Frame(data)) => handle.feed(data),
            Ok(SourceEvent::Idle) => {}
            Ok(SourceEvent::Eof) => {
                tracing::info!("capture file exhausted");
                break;
            }
            Err(e) => {
                // The dispatcher still drains and flushes what it has.
                tracing::error!(error = %e, "capture error");
                source_error = Some(e);
                break;
            }
        }
    }

    handle.shutdown();
    let _ = printer.join();

    let frames = handle.counters.frames.load(Ordering::Relaxed);
    let decode_errors = handle.counters.decode_errors.load(Ordering::Relaxed);
    let dropped = handle.counters.frames_dropped.load(Ordering::Relaxed);
    let emitted = handle.counters.messages_emitted.load(Ordering::Relaxed);
    let truncated = handle.counters.messages_truncated.load(Ordering::Relaxed);

    println!();
    println!("{}", "=".repeat(50));
    println!("Capture complete.");
    println!("  Frames processed:   {}", frames);
    println!("  Decode errors:      {}", decode_errors);
    println!("  Frames dropped:     {}", dropped);
    println!("  Messages emitted:   {}", emitted);
    println!("  Emitted truncated:  {}", truncated);
    println!("{}", "=".repeat(50));

    match source_error {
        Some(e) => Err(Box::new(e)),
        None => Ok(()),
    }
}

fn load_config(args: &cli::Cli) -> Result<Config, config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(value) = args.port {
        config.capture.port = value;
    }
    if let Some(value) = &args.engine {
        config.capture.engine = value.parse()?;
    }
    if let Some(value) = &args.device {
        config.capture.device = Some(value.clone());
    }
    if let Some(value) = args.expiration_ms {
        config.core.expiration_ms = value;
    }
    if let Some(value) = args.packet_queue {
        config.core.packet_queue_capacity = value;
    }
    if let Some(value) = args.message_queue {
        config.core.message_queue_capacity = value;
    }
    if let Some(value) = args.snaplen {
        config.capture.snaplen = value;
    }
    if let Some(value) = args.timeout_ms {
        config.capture.timeout_ms = value;
    }
    if args.no_promiscuous {
        config.capture.promiscuous = false;
    }
    if args.hex_dump {
        config.output.hex_dump = true;
    }
    if args.quiet {
        config.output.quiet = true;
    }

    if config.core.expiration_ms == 0 {
        return Err(config::ConfigError::Invalid(
            "expiration_ms must be greater than zero".into(),
        ));
    }

    Ok(config)
}
