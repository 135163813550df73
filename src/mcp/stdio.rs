//! Stdio transport
//!
//! One JSON-RPC message per line. Requests are handled in arrival order; all
//! output goes through a single writer task so progress notifications can be
//! interleaved with a running tool call.

use super::progress::progress_for;
use super::protocol::*;
use super::server::PbixMcpServer;
use bytes::BytesMut;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};

/// Longest accepted message line
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Line codec that yields undecodable lines (bad UTF-8, too long) as items
/// instead of failing the stream. Read errors still surface from the reader.
struct MessageCodec {
    lines: LinesCodec,
}

impl MessageCodec {
    fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn split(result: Result<Option<String>, LinesCodecError>) -> std::io::Result<Option<Result<String, LinesCodecError>>> {
        match result {
            Ok(line) => Ok(line.map(Ok)),
            Err(e) => Ok(Some(Err(e))),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Result<String, LinesCodecError>;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<Self::Item>> {
        Self::split(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<Self::Item>> {
        Self::split(self.lines.decode_eof(buf))
    }
}

/// Serve on the process's stdin/stdout until stdin closes
pub async fn serve_stdio(server: &PbixMcpServer) -> anyhow::Result<()> {
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve on any line-oriented byte stream pair
pub async fn serve<R, W>(server: &PbixMcpServer, reader: R, writer: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing, receiver) = unbounded_channel();
    let writer_task = tokio::spawn(write_messages(writer, receiver));

    let mut lines = FramedRead::new(reader, MessageCodec::new(MAX_LINE_BYTES));
    while let Some(line) = lines.next().await {
        let response = match line? {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => {
                tracing::debug!("Received: {}", line);
                handle_line(server, &line, &outgoing).await
            }
            Err(e) => {
                tracing::warn!("Unreadable line: {}", e);
                Some(JsonRpcResponse::error(None, PARSE_ERROR, &format!("Parse error: {}", e)))
            }
        };

        if let Some(response) = response {
            if outgoing.send(OutgoingMessage::Response(response)).is_err() {
                tracing::warn!("Output closed, stopping");
                break;
            }
        }
    }

    drop(outgoing);
    writer_task.await??;
    tracing::info!("Input closed, shutting down");
    Ok(())
}

async fn write_messages<W>(mut writer: W, mut receiver: UnboundedReceiver<OutgoingMessage>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = receiver.recv().await {
        let json = serde_json::to_string(&message)?;
        tracing::debug!("Sending: {}", json);
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Handle one raw line; `None` when nothing should be sent back
pub async fn handle_line(
    server: &PbixMcpServer,
    line: &str,
    outgoing: &UnboundedSender<OutgoingMessage>,
) -> Option<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Unparseable message: {}", e);
            return Some(JsonRpcResponse::error(
                None,
                PARSE_ERROR,
                &format!("Parse error: {}", e),
            ));
        }
    };

    let notification = request.is_notification();
    let response = handle_request(server, request, outgoing).await;
    if notification {
        None
    } else {
        Some(response)
    }
}

fn to_result<T: Serialize>(id: Option<Value>, result: T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, &format!("Internal error: {}", e)),
    }
}

/// Dispatch a parsed request
pub async fn handle_request(
    server: &PbixMcpServer,
    request: JsonRpcRequest,
    outgoing: &UnboundedSender<OutgoingMessage>,
) -> JsonRpcResponse {
    let id = request.id.clone();

    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid request: jsonrpc must be \"2.0\"");
    }

    match request.method.as_str() {
        "initialize" => to_result(
            id,
            InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: Some(false),
                    }),
                },
                server_info: ServerInfo {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            },
        ),

        "initialized" | "notifications/initialized" | "notifications/cancelled" => {
            JsonRpcResponse::success(id, json!({}))
        }

        "tools/list" => to_result(
            id,
            ListToolsResult {
                tools: server.get_tools(),
            },
        ),

        "tools/call" => {
            let params: CallToolParams = match request.params {
                Some(p) => match serde_json::from_value(p) {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(id, INVALID_PARAMS, &format!("Invalid params: {}", e));
                    }
                },
                None => {
                    return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params");
                }
            };

            let progress = progress_for(params.progress_token(), outgoing);
            let args = params.arguments.unwrap_or_default();
            let result = server.call_tool(&params.name, &args, &progress).await;
            to_result(id, result)
        }

        "ping" => JsonRpcResponse::success(id, json!({})),

        _ => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            &format!("Method not found: {}", request.method),
        ),
    }
}
