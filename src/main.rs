//! Palaver chat server
//!
//! Multi-client TCP chat with nickname registration, named channels, and
//! direct messages.
//!
//! Usage:
//!   cargo run -- server                    # Run on the default port
//!   cargo run -- server --port 9000        # Run on a specific port

use std::env;

use palaver::{ChatConfig, ChatServer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(&args).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Palaver - Multi-Client TCP Chat Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --bind <ADDR>       Address to listen on (default: 127.0.0.1)");
    println!("    --port <PORT>       Port to listen on (default: 9000)");
    println!("    --max-conn <NUM>    Maximum connections (default: 1024)");
    println!("    --echo              Echo broadcasts back to their sender");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --bind 0.0.0.0 --port 9000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

async fn run_server(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let host = parse_flag_value(args, "--bind").unwrap_or("127.0.0.1");
    let port: u16 = match parse_flag_value(args, "--port") {
        Some(raw) => raw.parse()?,
        None => 9000,
    };
    let max_connections: usize = match parse_flag_value(args, "--max-conn") {
        Some(raw) => raw.parse()?,
        None => 1024,
    };

    let config = ChatConfig {
        bind_addr: format!("{}:{}", host, port).parse()?,
        max_connections,
        echo_broadcasts: args.iter().any(|a| a == "--echo"),
        ..Default::default()
    };

    info!("Starting chat server");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - Echo broadcasts: {}", config.echo_broadcasts);

    let mut server = ChatServer::new(config);
    server.bind().await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
