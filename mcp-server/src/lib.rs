//! SafeExec MCP server: line-delimited JSON-RPC over stdin/stdout.
#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::io::Result as IoResult;

use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::PARSE_ERROR;
use mcp_types::RequestId;
use safeexec_core::Config;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;

mod cli;
mod message_processor;
mod tool_catalog;

pub use crate::cli::Cli;
use crate::message_processor::MessageProcessor;

/// Size of the bounded channels between the reader, processor and writer
/// tasks. Requests are processed one at a time, so a small buffer is
/// plenty.
const CHANNEL_CAPACITY: usize = 128;

pub async fn run_main(config: Config) -> IoResult<()> {
    // Set up channels.
    let (incoming_tx, mut incoming_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);

    // Task: read lines from stdin, decode, push to the processor. Malformed
    // lines get a parse-error response when an id can be recovered and are
    // logged otherwise.
    let stdin_reader_handle = tokio::spawn({
        let incoming_tx = incoming_tx.clone();
        let outgoing_tx = outgoing_tx.clone();
        async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            while let Some(line) = lines.next_line().await.unwrap_or_default() {
                let value = match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("failed to parse request line: {e}");
                        continue;
                    }
                };
                match serde_json::from_value::<JSONRPCMessage>(value.clone()) {
                    Ok(msg) => {
                        if incoming_tx.send(msg).await.is_err() {
                            // Receiver gone; nothing left to do.
                            break;
                        }
                    }
                    Err(e) => {
                        error!("failed to decode JSONRPCMessage: {e}");
                        if let Some(id) = recover_request_id(&value) {
                            let reply = JSONRPCMessage::Error(JSONRPCError {
                                jsonrpc: JSONRPC_VERSION.into(),
                                id,
                                error: JSONRPCErrorError {
                                    code: PARSE_ERROR,
                                    message: format!("invalid request: {e}"),
                                    data: None,
                                },
                            });
                            let _ = outgoing_tx.send(reply).await;
                        }
                    }
                }
            }

            debug!("stdin reader finished (EOF)");
        }
    });

    // Task: process incoming messages, strictly one at a time so responses
    // and audit records follow receipt order.
    let processor_handle = tokio::spawn({
        let mut processor = MessageProcessor::new(outgoing_tx.clone(), config);
        async move {
            while let Some(msg) = incoming_rx.recv().await {
                match msg {
                    JSONRPCMessage::Request(r) => processor.process_request(r).await,
                    JSONRPCMessage::Notification(n) => processor.process_notification(n),
                    JSONRPCMessage::Response(r) => {
                        info!("ignoring response from peer: {r:?}");
                    }
                    JSONRPCMessage::Error(e) => {
                        error!("error from peer: {e:?}");
                    }
                }
            }

            info!("processor task exited (channel closed)");
        }
    });

    // Task: write outgoing messages to stdout, one JSON object per line.
    let stdout_writer_handle = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(msg) = outgoing_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if let Err(e) = stdout.write_all(json.as_bytes()).await {
                        error!("failed to write to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.write_all(b"\n").await {
                        error!("failed to write newline to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.flush().await {
                        error!("failed to flush stdout: {e}");
                        break;
                    }
                }
                Err(e) => error!("failed to serialize JSONRPCMessage: {e}"),
            }
        }

        info!("stdout writer exited (channel closed)");
    });

    // The typical exit path is the stdin reader hitting EOF which, once it
    // drops its senders, propagates shutdown to the processor and then to
    // the stdout task.
    let _ = tokio::join!(stdin_reader_handle, processor_handle, stdout_writer_handle);

    Ok(())
}

fn recover_request_id(value: &serde_json::Value) -> Option<RequestId> {
    let id = value.get("id")?;
    serde_json::from_value::<RequestId>(id.clone()).ok()
}
