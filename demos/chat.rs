//! Interactive chat against a running gateway.
//!
//! Usage:
//!
//! ```text
//! GATEWAY_URL=ws://127.0.0.1:18789 GATEWAY_TOKEN=secret \
//!     cargo run --example chat -- [--debug] [--session <key>]
//! ```
//!
//! Each stdin line is sent as a message; the reply is printed. Streaming
//! chunks are printed as they arrive when the gateway emits them.

// ============================================================================
// Imports
// ============================================================================

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use agent_gateway::{
    ClientIdentity, EventFilter, Gateway, MemorySettings, ParsedEvent, Result, SettingsStore,
    settings::{KEY_AUTH_TOKEN, KEY_GATEWAY_URL},
};

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    session: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            session: args
                .iter()
                .position(|a| a == "--session")
                .and_then(|i| args.get(i + 1).cloned()),
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "agent_gateway=debug"
    } else {
        "agent_gateway=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Settings from `GATEWAY_URL` / `GATEWAY_TOKEN`.
fn settings_from_env() -> MemorySettings {
    let store = MemorySettings::new();
    if let Ok(url) = std::env::var("GATEWAY_URL") {
        store.set(KEY_GATEWAY_URL, &url);
    }
    if let Ok(token) = std::env::var("GATEWAY_TOKEN") {
        store.set(KEY_AUTH_TOKEN, &token);
    }
    store
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let store = settings_from_env();
    let mut builder = Gateway::builder()
        .settings(&store)
        .identity(ClientIdentity::new("chat-demo", env!("CARGO_PKG_VERSION")).with_mode("cli"));
    if let Some(session) = &args.session {
        builder = builder.session_key(session.as_str());
    }
    let gateway = builder.build()?;

    gateway.subscribe(EventFilter::name("chat.chunk"), |event| {
        if let ParsedEvent::ChatChunk { text, .. } = event.parse() {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
    });

    if let Err(e) = gateway.connect_within(gateway.options().connect_timeout).await {
        eprintln!("{}", e.user_message());
        return Err(e);
    }

    if let Some(hello) = gateway.hello() {
        println!(
            "Connected (server {}, session '{}'). Type a message, Ctrl+D to quit.",
            hello.server.as_ref().and_then(|s| s.version.as_deref()).unwrap_or("unknown"),
            gateway.session_key()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match gateway.send(line).await {
            Ok(reply) => println!("\n{reply}\n"),
            Err(e) => eprintln!("{}", e.user_message()),
        }
    }

    gateway.disconnect().await;
    Ok(())
}
