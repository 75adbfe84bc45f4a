//! In-process echo tool for demos and tests.
//!
//! [`install_echo_tool`] turns every navigation on a [`MemoryBus`] into a
//! freshly booted inner document: the setup phase completes with the
//! configured outcome, and the transport phase echoes every payload back.
//! Navigating a window again unloads the document it was showing.
//! Must be installed from within a Tokio runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use framebridge_frame::{Phase, TransportVisibility, VisibilityRequirement};
use framebridge_peer::{InnerBridge, InnerBridgeConfig, SetupRequest};
use framebridge_transport::{MemoryBus, WindowId};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Behaviour of the simulated inner document.
#[derive(Debug, Clone)]
pub struct EchoTool {
    pub display_name: String,
    pub request: SetupRequest,
    pub transport_visibility: TransportVisibility,
    pub ephemeral_message: Option<String>,
    /// Finish setup with this error instead of succeeding.
    pub setup_error: Option<String>,
    pub config: InnerBridgeConfig,
}

impl Default for EchoTool {
    fn default() -> Self {
        Self {
            display_name: "Echo Tool".to_string(),
            request: SetupRequest::default(),
            transport_visibility: TransportVisibility::new(VisibilityRequirement::Optional),
            ephemeral_message: None,
            setup_error: None,
            config: InnerBridgeConfig::default(),
        }
    }
}

/// Boot `tool` in every window navigated on `bus`, talking to `parent`.
pub fn install_echo_tool(bus: &Arc<MemoryBus>, parent: WindowId, tool: EchoTool) {
    let weak = Arc::downgrade(bus);
    let loaded: Mutex<HashMap<WindowId, CancellationToken>> = Mutex::new(HashMap::new());
    bus.set_navigation_observer(move |window, url| {
        let Some(bus) = weak.upgrade() else {
            return;
        };
        let phase = Phase::from_url(url);
        let bridge = InnerBridge::new(bus, window, parent, tool.config.clone());
        let previous = loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(window, bridge.cancel_token());
        if let Some(previous) = previous {
            previous.cancel();
        }
        debug!(window = %window, %phase, "booting echo tool");
        tokio::spawn(run_document(bridge, tool.clone(), phase));
    });
}

async fn run_document(mut bridge: InnerBridge, tool: EchoTool, phase: Phase) {
    match phase {
        Phase::Setup => run_setup(&mut bridge, tool).await,
        Phase::Transport => run_transport(&mut bridge).await,
    }
    bridge.close();
}

async fn run_setup(bridge: &mut InnerBridge, tool: EchoTool) {
    let session = match bridge.begin_setup(&tool.request).await {
        Ok(session) => session,
        Err(err) => {
            warn!("echo tool setup failed: {err}");
            return;
        }
    };
    let finished = match tool.setup_error {
        Some(error) => session.fail(error),
        None => session.complete(
            tool.display_name,
            tool.transport_visibility,
            tool.ephemeral_message,
        ),
    };
    if let Err(err) = finished {
        warn!("echo tool could not finish setup: {err}");
    }
}

async fn run_transport(bridge: &mut InnerBridge) {
    let unloaded = bridge.cancel_token();
    let (tx, mut rx) = mpsc::unbounded_channel();
    bridge.set_on_message(move |payload| {
        let _ = tx.send(payload);
    });
    if let Err(err) = bridge.start().await {
        warn!("echo tool transport failed: {err}");
        return;
    }
    loop {
        let payload = tokio::select! {
            _ = unloaded.cancelled() => break,
            payload = rx.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        if let Err(err) = bridge.send(echo_reply(payload)) {
            debug!("echo tool stopped: {err}");
            break;
        }
    }
}

/// Reply to a JSON-RPC request with its own params, or wrap anything else.
pub fn echo_reply(payload: Value) -> Value {
    match (payload.get("id"), payload.get("method")) {
        (Some(id), Some(_)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": payload.get("params").cloned().unwrap_or(Value::Null),
        }),
        _ => json!({ "echo": payload }),
    }
}
