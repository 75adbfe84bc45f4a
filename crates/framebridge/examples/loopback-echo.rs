//! Host page talking to an in-process echo tool.
//!
//! Run with:
//!   cargo run --example loopback-echo --features loopback

use std::sync::Arc;

use framebridge::frame::{TransportVisibility, VisibilityRequirement};
use framebridge::loopback::{install_echo_tool, EchoTool};
use framebridge::peer::{ChannelConfig, OuterBridge, OuterBridgeConfig};
use framebridge::transport::MemoryBus;
use serde_json::json;
use tokio::sync::mpsc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(MemoryBus::new());
    let host = bus.open_window("https://host.example/chat")?;
    let frame = bus.open_frame();

    install_echo_tool(
        &bus,
        host,
        EchoTool {
            display_name: "Pi Calculator".to_string(),
            transport_visibility: TransportVisibility::new(VisibilityRequirement::Hidden),
            ..EchoTool::default()
        },
    );

    let config = OuterBridgeConfig::new(ChannelConfig::allowing(["https://tool.example"]));
    let mut bridge = OuterBridge::new(bus.clone(), host, frame, config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    bridge.set_on_message(move |payload| {
        let _ = tx.send(payload);
    });
    bridge.set_on_close(|| eprintln!("Bridge closed"));

    let setup = bridge.setup("https://tool.example/pi").await?;
    eprintln!(
        "Setup complete: {} (session {}, protocol {})",
        setup.display_name, setup.session_id, setup.protocol_version
    );

    bridge.prepare_to_connect().await?;
    // Queued until the transport handshake completes.
    bridge.send(json!({"jsonrpc": "2.0", "id": 1, "method": "calculate", "params": {"digits": 10}}))?;

    let handshake = bridge.start().await?;
    eprintln!("Connected to {}", handshake.origin);

    if let Some(reply) = rx.recv().await {
        println!("{reply}");
    }

    bridge.close();
    Ok(())
}
