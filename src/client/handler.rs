use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::client::Client;
use crate::middleware::logging::{log_command, log_connection, log_disconnection};
use crate::protocol::responses::{OK, URI_TOO_LONG, format_response};
use crate::protocol::{CommandStatus, ProtocolContext, handle_command, parse_command};

/// Serves one control connection until the client quits or the stream ends.
///
/// - Command lines are read from a buffered reader; PUT bodies are read from
///   the same reader so buffered bytes are not lost.
/// - Lines longer than `max_command_length` are rejected and skipped.
pub async fn handle_client(
    stream: TcpStream,
    client_addr: SocketAddr,
    ctx: Arc<ProtocolContext>,
    max_command_length: usize,
) {
    log_connection(&client_addr.to_string());

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut client = Client::new(client_addr);
    let mut line = String::new();

    if let Err(e) = write_half
        .write_all(format_response(OK, "RAX DAV server ready").as_bytes())
        .await
    {
        warn!("Failed to greet {}: {}", client_addr, e);
        return;
    }

    loop {
        line.clear();
        let limit = u64::try_from(max_command_length).unwrap_or(u64::MAX) + 1;
        let read = (&mut reader).take(limit).read_line(&mut line).await;
        match read {
            Ok(0) => {
                info!("Connection closed by client {}", client_addr);
                break;
            }
            Ok(_) => {
                if line.len() > max_command_length && !line.ends_with('\n') {
                    let _ = write_half
                        .write_all(format_response(URI_TOO_LONG, "Command too long").as_bytes())
                        .await;
                    // Skip what is left of the oversized line.
                    let mut rest = Vec::new();
                    if reader.read_until(b'\n', &mut rest).await.is_err() {
                        break;
                    }
                    continue;
                }

                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.trim().is_empty() {
                    continue;
                }
                log_command(&client_addr.to_string(), trimmed);

                let command = parse_command(trimmed);
                let result = handle_command(&mut client, command, &ctx, &mut reader).await;

                if let Some(msg) = &result.message {
                    if let Err(e) = write_half.write_all(msg.as_bytes()).await {
                        error!("Failed to write to {}: {}", client_addr, e);
                        break;
                    }
                }
                if let Some(body) = result.body {
                    // The header announced `len` bytes; anything else breaks framing.
                    let mut content = body.file.take(body.len);
                    match tokio::io::copy(&mut content, &mut write_half).await {
                        Ok(sent) if sent == body.len => {}
                        Ok(sent) => {
                            error!(
                                "Short payload to {}: {} of {} bytes",
                                client_addr, sent, body.len
                            );
                            break;
                        }
                        Err(e) => {
                            error!("Failed to send payload to {}: {}", client_addr, e);
                            break;
                        }
                    }
                }

                if result.status == CommandStatus::CloseConnection {
                    info!("Closing connection to {}", client_addr);
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read from {}: {}", client_addr, e);
                break;
            }
        }
    }

    let _ = write_half.shutdown().await;
    log_disconnection(&client_addr.to_string(), client.user());
}
