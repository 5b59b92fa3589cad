use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::env;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use courier_db::registry::{ClosePolicy, HandleRegistry, OpenPolicy, RegistryConfig};
use courier_db::sqlite::BatchOp;
use courier_db::{ReadyGate, DEFAULT_BUSY_TIMEOUT_MS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WireCodec {
    Json,
    Msgpack,
}

const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Deserialize)]
struct CallEnvelope {
    id: u64,
    method: String,
    #[serde(default)]
    arguments: JsonValue,
}

#[derive(Debug, Serialize)]
struct ResponseEnvelope {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenArgs {
    path: String,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    single_instance: bool,
}

#[derive(Deserialize)]
struct CloseArgs {
    path: String,
}

#[derive(Deserialize)]
struct ExecuteArgs {
    path: String,
    sql: String,
    #[serde(default)]
    params: Vec<JsonValue>,
}

#[derive(Deserialize)]
struct BatchArgs {
    path: String,
    operations: Vec<BatchOp>,
}

struct DecodedCall {
    envelope: CallEnvelope,
    wire: WireCodec,
}

fn log(message: &str) {
    eprintln!("[sqlcourier-worker] {message}");
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut header) {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(err);
    }
    let size = u32::from_le_bytes(header) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Frame exceeds max size",
        ));
    }
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let size = payload.len() as u32;
    writer.write_all(&size.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

fn decode_call(bytes: &[u8]) -> Result<DecodedCall, String> {
    if let Ok(envelope) = rmp_serde::from_slice::<CallEnvelope>(bytes) {
        return Ok(DecodedCall {
            envelope,
            wire: WireCodec::Msgpack,
        });
    }
    let envelope = serde_json::from_slice::<CallEnvelope>(bytes)
        .map_err(|err| format!("invalid call envelope: {err}"))?;
    Ok(DecodedCall {
        envelope,
        wire: WireCodec::Json,
    })
}

fn encode_response(response: &ResponseEnvelope, wire: WireCodec) -> Result<Vec<u8>, String> {
    match wire {
        WireCodec::Msgpack => rmp_serde::to_vec_named(response).map_err(|err| err.to_string()),
        WireCodec::Json => serde_json::to_vec(response).map_err(|err| err.to_string()),
    }
}

fn decode_args<T: DeserializeOwned>(arguments: &JsonValue) -> Result<T, String> {
    serde_json::from_value(arguments.clone()).map_err(|err| format!("invalid arguments: {err}"))
}

fn handle_call(envelope: &CallEnvelope, registry: &mut HandleRegistry) -> Result<JsonValue, String> {
    match envelope.method.as_str() {
        "openDatabase" => {
            let args: OpenArgs = decode_args(&envelope.arguments)?;
            registry.open(&args.path)?;
            log(&format!(
                "opened database at {} (readOnly: {}, singleInstance: {})",
                args.path, args.read_only, args.single_instance
            ));
            Ok(JsonValue::Bool(true))
        }
        "closeDatabase" => {
            let args: CloseArgs = decode_args(&envelope.arguments)?;
            if registry.close(&args.path)? {
                log(&format!("closed database at {}", args.path));
            }
            Ok(JsonValue::Bool(true))
        }
        "execute" => {
            let args: ExecuteArgs = decode_args(&envelope.arguments)?;
            let handle = registry.get_mut(&args.path)?;
            let result = handle.exec(&args.sql, &args.params)?;
            log(&format!("executed against {}: {}", args.path, args.sql));
            let rows = serde_json::to_value(result).map_err(|err| err.to_string())?;
            Ok(json!({ "rows": rows }))
        }
        "batch" => {
            let args: BatchArgs = decode_args(&envelope.arguments)?;
            let handle = registry.get_mut(&args.path)?;
            let results = handle.run_batch(&args.operations)?;
            log(&format!(
                "executed batch of {} operations against {}",
                args.operations.len(),
                args.path
            ));
            serde_json::to_value(results).map_err(|err| err.to_string())
        }
        other => Err(format!("unsupported method: {other}")),
    }
}

fn error_response(id: u64, message: &str) -> ResponseEnvelope {
    ResponseEnvelope {
        id,
        result: None,
        error: Some(message.to_string()),
    }
}

/// Single dispatch thread: owns the registry outright and executes calls
/// strictly one at a time. Every call waits on the gate; queued calls all
/// resume once the one settlement lands.
fn dispatch_loop(
    call_rx: Receiver<DecodedCall>,
    response_tx: Sender<(WireCodec, ResponseEnvelope)>,
    gate: Arc<ReadyGate>,
    mut registry: HandleRegistry,
) {
    while let Ok(call) = call_rx.recv() {
        let id = call.envelope.id;
        let outcome = match gate.wait() {
            Ok(()) => handle_call(&call.envelope, &mut registry),
            Err(load_err) => Err(load_err),
        };
        let response = match outcome {
            Ok(result) => ResponseEnvelope {
                id,
                result: Some(result),
                error: None,
            },
            Err(err) => {
                log(&format!("error handling call {id}: {err}"));
                error_response(id, &err)
            }
        };
        if response_tx.send((call.wire, response)).is_err() {
            break;
        }
    }
}

fn write_loop(response_rx: Receiver<(WireCodec, ResponseEnvelope)>) {
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    while let Ok((wire, response)) = response_rx.recv() {
        let encoded = match encode_response(&response, wire) {
            Ok(encoded) => encoded,
            Err(err) => {
                log(&format!("failed to encode response: {err}"));
                continue;
            }
        };
        if let Err(err) = write_frame(&mut writer, &encoded) {
            log(&format!("failed to write response: {err}"));
            break;
        }
    }
}

fn probe_engine() -> Result<(), String> {
    let conn = rusqlite::Connection::open_in_memory()
        .map_err(|err| format!("failed to initialize sqlite engine: {err}"))?;
    let version: String = conn
        .query_row("SELECT sqlite_version()", [], |row| row.get(0))
        .map_err(|err| format!("failed to probe sqlite engine: {err}"))?;
    log(&format!("sqlite engine ready (version {version})"));
    Ok(())
}

fn main() -> io::Result<()> {
    let mut max_queue = 64usize;
    let mut open_policy = OpenPolicy::Replace;
    let mut close_policy = ClosePolicy::Idempotent;
    let busy_timeout_ms = env::var("COURIER_BUSY_TIMEOUT_MS")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--strict-open" => open_policy = OpenPolicy::Reject,
            "--strict-close" => close_policy = ClosePolicy::Strict,
            "--max-queue" => {
                if let Some(val) = args.next() {
                    max_queue = val.parse().unwrap_or(64);
                }
            }
            "--stdio" => {}
            _ => {}
        }
    }

    let registry = HandleRegistry::new(RegistryConfig {
        open_policy,
        close_policy,
        busy_timeout: Duration::from_millis(busy_timeout_ms),
    });

    let gate = ReadyGate::new();
    {
        let gate = gate.clone();
        thread::spawn(move || gate.settle(probe_engine()));
    }

    let (call_tx, call_rx) = bounded::<DecodedCall>(max_queue);
    let (response_tx, response_rx) = bounded::<(WireCodec, ResponseEnvelope)>(max_queue);

    let dispatcher = {
        let response_tx = response_tx.clone();
        thread::spawn(move || dispatch_loop(call_rx, response_tx, gate, registry))
    };
    let writer = thread::spawn(move || write_loop(response_rx));

    log("sqlite dispatch worker initialized");

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    loop {
        let frame = match read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                let _ = response_tx.send((WireCodec::Json, error_response(0, &err.to_string())));
                break;
            }
        };
        let decoded = match decode_call(&frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                let _ = response_tx.send((WireCodec::Json, error_response(0, &err)));
                continue;
            }
        };
        match call_tx.try_send(decoded) {
            Ok(()) => {}
            Err(TrySendError::Full(call)) => {
                let _ = response_tx.send((
                    call.wire,
                    error_response(call.envelope.id, "worker queue full"),
                ));
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }

    drop(call_tx);
    drop(response_tx);
    let _ = dispatcher.join();
    let _ = writer.join();
    Ok(())
}
