//! `device`: act as the device over a live hub session.
//!
//! Every subcommand runs the full agent workflow (credentials, provisioning
//! unless `--hub-host` is given, connect, twin seed) and disconnects when
//! done, whatever the outcome.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use twinview_core::{
    ConnectRequest, CoreError, DeviceAgent, MethodInvocation, MethodResponse, MqttConnector,
    SyncEvent, TwinSynchronizer,
};

use crate::cli::{DeviceArgs, DeviceCommand, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context, args: DeviceArgs, global: &GlobalOpts) -> Result<(), CliError> {
    // Parse input before opening any connection
    let command = Prepared::from_command(args.command)?;

    let supplied = ctx.supplied_credentials(global);
    let request = ConnectRequest {
        device_id: ctx.device_id(global)?,
        scope_id: supplied.scope_id,
        symmetric_key: supplied.symmetric_key,
        hub_host: args.hub_host,
    };

    let agent = DeviceAgent::new(
        ctx.resolver(global)?,
        ctx.provisioning(global, &args.provision)?,
        Arc::new(MqttConnector::new()),
        ctx.session_config(global),
    );

    let sync = agent.connect(&request, &ctx.token_supplier(global)).await?;
    if let Some(host) = sync.session().hub_host().await {
        info!(device_id = %request.device_id, hub = %host, "Device connected");
    }

    let result = run(&sync, command, global).await;
    agent.disconnect().await;
    result
}

/// A device subcommand with its arguments already decoded.
enum Prepared {
    Get,
    Report(Value),
    Telemetry(Value),
    Watch { ack_methods: bool },
}

impl Prepared {
    fn from_command(command: DeviceCommand) -> Result<Self, CliError> {
        Ok(match command {
            DeviceCommand::Get => Self::Get,
            DeviceCommand::Report { patch, from_file } => {
                let raw = match (patch, from_file) {
                    (_, Some(path)) => read_file(&path)?,
                    (Some(patch), None) => patch,
                    (None, None) => {
                        return Err(CliError::Validation {
                            field: "patch".into(),
                            reason: "a patch or --from-file is required".into(),
                        });
                    }
                };
                let patch: Value = serde_json::from_str(&raw)?;
                if !patch.is_object() {
                    return Err(CliError::Validation {
                        field: "patch".into(),
                        reason: "reported patch must be a JSON object".into(),
                    });
                }
                Self::Report(patch)
            }
            DeviceCommand::Telemetry { payload } => Self::Telemetry(serde_json::from_str(&payload)?),
            DeviceCommand::Watch { ack_methods } => Self::Watch { ack_methods },
        })
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|e| CliError::Validation {
        field: "from-file".into(),
        reason: format!("cannot read {}: {e}", path.display()),
    })
}

async fn run(sync: &TwinSynchronizer, command: Prepared, global: &GlobalOpts) -> Result<(), CliError> {
    match command {
        Prepared::Get => output::emit(global.output, &sync.state(), global.quiet),

        Prepared::Report(patch) => {
            let ack = sync.update_twin(patch).await?;
            let out = json!({
                "ack": ack,
                "reported": sync.state().reported,
            });
            output::emit(global.output, &out, global.quiet)
        }

        Prepared::Telemetry(payload) => {
            sync.session().send_telemetry(&payload).await?;
            if !global.quiet {
                eprintln!("Telemetry sent");
            }
            Ok(())
        }

        Prepared::Watch { ack_methods } => watch(sync, ack_methods, global).await,
    }
}

// ── Watch ───────────────────────────────────────────────────────────

async fn watch(sync: &TwinSynchronizer, ack_methods: bool, global: &GlobalOpts) -> Result<(), CliError> {
    let session = sync.session();

    let (method_tx, mut methods) = mpsc::unbounded_channel::<MethodInvocation>();
    session.on_direct_method(move |call| {
        let response = if ack_methods {
            MethodResponse::ok(call.payload.clone())
        } else {
            MethodResponse::not_implemented(&call.name)
        };
        let _ = method_tx.send(call);
        response
    });

    let (closed_tx, mut closed) = mpsc::unbounded_channel::<Option<CoreError>>();
    session.on_disconnect(move |error| {
        let _ = closed_tx.send(error);
    });

    let mut events = sync.events();

    output::emit(global.output, &json!({ "event": "twin", "twin": sync.state() }), global.quiet)?;
    if !global.quiet {
        eprintln!("Watching device twin (Ctrl-C to stop)");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),

            closed = closed.recv() => {
                return match closed.flatten() {
                    Some(error) => Err(error.into()),
                    None => Ok(()),
                };
            }

            Some(call) = methods.recv() => {
                let out = json!({
                    "event": "method",
                    "name": call.name,
                    "payload": call.payload,
                    "acknowledged": ack_methods,
                });
                output::emit(global.output, &out, global.quiet)?;
            }

            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    // Lagged receivers catch up on the next delta
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                };
                let out = match event.as_ref() {
                    SyncEvent::DesiredChanged { version, patch } => json!({
                        "event": "desired",
                        "version": version,
                        "patch": patch,
                    }),
                    SyncEvent::DecodeFailed { error } => json!({
                        "event": "decodeFailed",
                        "error": error.to_string(),
                    }),
                    SyncEvent::RefreshFailed { error } => json!({
                        "event": "refreshFailed",
                        "error": error.to_string(),
                    }),
                    SyncEvent::Refreshed => continue,
                };
                output::emit(global.output, &out, global.quiet)?;
            }
        }
    }
}
