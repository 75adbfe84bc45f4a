use std::sync::Arc;
use std::time::Duration;

use framebridge::loopback::{install_echo_tool, EchoTool};
use framebridge_frame::{
    PermissionRequirement, ProtocolVersion, TransportVisibility, VisibilityRequirement,
};
use framebridge_peer::{
    ChannelConfig, OuterBridge, OuterBridgeConfig, SafeListApprover, SetupRequest,
};
use framebridge_transport::{origin_of, MemoryBus};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::{parse_timeout, DemoArgs};
use crate::exit::{
    bridge_error, frame_error, io_error, transport_error, CliError, CliResult, DATA_INVALID,
    FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{or_dash, print_fields, print_json, print_raw, schema_id, OutputFormat};

#[derive(Serialize)]
struct DemoOutput {
    schema_id: String,
    url: String,
    origin: String,
    session_id: String,
    protocol_version: String,
    display_name: String,
    granted_permissions: Vec<String>,
    transport_visibility: TransportVisibility,
    ephemeral_message: Option<String>,
    sent: usize,
    replies: Vec<Value>,
}

struct DemoPlan {
    timeout: Duration,
    allowed_origins: Vec<String>,
    messages: Vec<Value>,
    tool: EchoTool,
}

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let plan = plan(&args)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    let out = runtime.block_on(exchange(&args, plan))?;

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => {
            for reply in &out.replies {
                print_raw(&reply.to_string());
            }
        }
        OutputFormat::Table | OutputFormat::Pretty => print_fields(
            format,
            "Bridge Demo",
            &[
                ("Tool", out.display_name.clone()),
                ("Origin", out.origin.clone()),
                ("Session", out.session_id.clone()),
                ("Version", out.protocol_version.clone()),
                ("Permissions", out.granted_permissions.join(", ")),
                (
                    "Visibility",
                    visibility_name(out.transport_visibility.requirement).to_string(),
                ),
                ("Notice", or_dash(out.ephemeral_message.as_deref())),
                ("Sent", out.sent.to_string()),
                ("Replies", out.replies.len().to_string()),
            ],
        ),
    }

    Ok(SUCCESS)
}

fn plan(args: &DemoArgs) -> CliResult<DemoPlan> {
    let timeout = parse_timeout(&args.timeout)?;
    let allowed_origins = if args.allow_origins.is_empty() {
        vec![origin_of(&args.url).map_err(|err| transport_error("invalid --url", err))?]
    } else {
        args.allow_origins.clone()
    };
    let messages = args
        .messages
        .iter()
        .map(|text| {
            serde_json::from_str(text)
                .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --message: {err}")))
        })
        .collect::<CliResult<Vec<Value>>>()?;
    let requested_permissions = args
        .permissions
        .iter()
        .map(|arg| parse_permission(arg))
        .collect::<CliResult<Vec<_>>>()?;

    let request = SetupRequest {
        min_protocol_version: parse_version("--tool-min", &args.tool_min)?,
        max_protocol_version: parse_version("--tool-max", &args.tool_max)?,
        requires_visible_setup: args.visible_setup,
        requested_permissions,
    };
    let mut tool = EchoTool {
        display_name: args.display_name.clone(),
        request,
        setup_error: args.setup_error.clone(),
        ..EchoTool::default()
    };
    tool.config.setup_handshake_timeout = timeout;
    tool.config.transport.handshake_timeout = timeout;

    Ok(DemoPlan {
        timeout,
        allowed_origins,
        messages,
        tool,
    })
}

async fn exchange(args: &DemoArgs, plan: DemoPlan) -> CliResult<DemoOutput> {
    let bus = Arc::new(MemoryBus::new());
    let host = bus
        .open_window(&args.host_url)
        .map_err(|err| transport_error("invalid --host-url", err))?;
    let frame = bus.open_frame();
    install_echo_tool(&bus, host, plan.tool.clone());

    let mut channel = ChannelConfig::allowing(plan.allowed_origins);
    channel.navigation_timeout = plan.timeout;
    let mut config = OuterBridgeConfig::new(channel);
    config.setup.handshake_timeout = plan.timeout;
    config.setup.session_id = args.session_id.clone();
    config.transport.handshake_timeout = plan.timeout;

    let bridge = OuterBridge::new(Arc::clone(&bus), host, frame, config);
    let mut bridge = if args.deny_permissions {
        bridge.with_approver(|_: &PermissionRequirement, _: &str| false)
    } else {
        let names = plan.tool.request.requested_permissions.iter().map(|p| p.name.clone());
        bridge.with_approver(SafeListApprover::new(names))
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    bridge.set_on_message(move |payload| {
        let _ = tx.send(payload);
    });

    let outcome = drive(&mut bridge, &mut rx, args, &plan.messages, plan.timeout).await;
    bridge.close();
    outcome
}

async fn drive(
    bridge: &mut OuterBridge<MemoryBus>,
    replies_rx: &mut mpsc::UnboundedReceiver<Value>,
    args: &DemoArgs,
    messages: &[Value],
    timeout: Duration,
) -> CliResult<DemoOutput> {
    let setup = bridge
        .setup(&args.url)
        .await
        .map_err(|err| bridge_error("setup failed", err))?;
    info!(session_id = %setup.session_id, display_name = %setup.display_name, "setup complete");

    bridge
        .prepare_to_connect()
        .await
        .map_err(|err| bridge_error("transport navigation failed", err))?;
    for message in messages {
        bridge
            .send(message.clone())
            .map_err(|err| bridge_error("send failed", err))?;
    }
    bridge
        .start()
        .await
        .map_err(|err| bridge_error("transport handshake failed", err))?;

    let mut replies = Vec::with_capacity(messages.len());
    while replies.len() < messages.len() {
        match tokio::time::timeout(timeout, replies_rx.recv()).await {
            Ok(Some(reply)) => replies.push(reply),
            Ok(None) => return Err(CliError::new(FAILURE, "bridge closed before replying")),
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply after {} of {}", replies.len(), messages.len()),
                ))
            }
        }
    }

    Ok(DemoOutput {
        schema_id: schema_id("demo-run"),
        url: args.url.clone(),
        origin: setup.origin,
        session_id: setup.session_id,
        protocol_version: setup.protocol_version.to_string(),
        display_name: setup.display_name,
        granted_permissions: setup.granted_permissions,
        transport_visibility: setup.transport_visibility,
        ephemeral_message: setup.ephemeral_message,
        sent: messages.len(),
        replies,
    })
}

fn parse_permission(arg: &str) -> CliResult<PermissionRequirement> {
    let (name, required) = match arg.split_once(':') {
        Some((name, "required")) => (name, true),
        Some((_, flag)) => {
            return Err(CliError::new(
                USAGE,
                format!("unknown permission flag `{flag}` (expected `required`)"),
            ))
        }
        None => (arg, false),
    };
    if name.is_empty() {
        return Err(CliError::new(USAGE, "permission name must not be empty"));
    }
    Ok(PermissionRequirement::new(name, required, "requested by demo"))
}

fn parse_version(flag: &str, text: &str) -> CliResult<ProtocolVersion> {
    text.parse()
        .map_err(|err| frame_error(&format!("invalid {flag}"), err))
}

fn visibility_name(requirement: VisibilityRequirement) -> &'static str {
    match requirement {
        VisibilityRequirement::Required => "required",
        VisibilityRequirement::Optional => "optional",
        VisibilityRequirement::Hidden => "hidden",
    }
}
