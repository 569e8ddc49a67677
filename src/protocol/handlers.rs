//! Command handlers
//!
//! Dispatches parsed commands to the access gate and turns the outcome into
//! response lines. Handlers never touch storage directly.

use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::client::Client;
use crate::error::DavError;
use crate::error::handlers::handle_error;
use crate::gate::AccessGate;
use crate::middleware::ClientFilter;
use crate::protocol::commands::{Command, CommandResult, CommandStatus, FileBody};
use crate::protocol::links::Links;
use crate::protocol::responses::{
    BAD_REQUEST, CREATED, FORBIDDEN, NO_CONTENT, NOT_IMPLEMENTED, OK, UNAUTHORIZED, format_entry,
    format_error, format_quota, format_response,
};

/// Everything a connection needs to serve commands
pub struct ProtocolContext {
    pub gate: Arc<AccessGate>,
    pub links: Links,
    pub filter: ClientFilter,

    /// Include error details in response lines
    pub show_errors: bool,
}

fn success(code: u16, message: &str) -> CommandResult {
    CommandResult {
        status: CommandStatus::Success,
        message: Some(format_response(code, message)),
        body: None,
    }
}

fn failure(code: u16, message: &str) -> CommandResult {
    CommandResult {
        status: CommandStatus::Failure(message.to_string()),
        message: Some(format_response(code, message)),
        body: None,
    }
}

fn from_error(err: DavError, ctx: &ProtocolContext) -> CommandResult {
    handle_error(&err);
    CommandResult {
        status: CommandStatus::Failure(err.to_string()),
        message: Some(format_error(&err, ctx.show_errors)),
        body: None,
    }
}

fn not_logged_in() -> CommandResult {
    failure(UNAUTHORIZED, "Unauthorized: log in with LOGIN or TOKEN first")
}

/// Dispatches a command. `body` supplies the raw bytes that follow a PUT line.
pub async fn handle_command<R>(
    client: &mut Client,
    command: Command,
    ctx: &ProtocolContext,
    body: &mut R,
) -> CommandResult
where
    R: AsyncRead + Unpin,
{
    match command {
        Command::QUIT => handle_cmd_quit(client),
        Command::AGENT(agent) => handle_cmd_agent(client, agent, ctx),
        Command::LOGIN { user, password } => handle_cmd_login(client, &user, &password, ctx).await,
        Command::TOKEN(token) => handle_cmd_token(client, token, ctx).await,
        Command::PUT {
            path,
            len,
            if_match,
        } => handle_cmd_put(client, &path, len, if_match.as_deref(), ctx, body).await,
        Command::INVALID(reason) => failure(BAD_REQUEST, &format!("InvalidCommand: {reason}")),
        Command::UNKNOWN(verb) => failure(NOT_IMPLEMENTED, &format!("Unknown command {verb:?}")),
        command => {
            let Some(token) = client.token().map(str::to_string) else {
                return not_logged_in();
            };
            handle_session_command(client, command, &token, ctx).await
        }
    }
}

/// Commands that only need a session token
async fn handle_session_command(
    client: &mut Client,
    command: Command,
    token: &str,
    ctx: &ProtocolContext,
) -> CommandResult {
    let gate = &ctx.gate;
    let result = match command {
        Command::LOGOUT => handle_cmd_logout(client, token, gate).await,
        Command::STAT(path) => gate.stat(token, &path).await.map(|entry| {
            let href = ctx.links.href(&entry.owner, &entry.path);
            success(OK, &format_entry(&entry, &href))
        }),
        Command::GET(path) => gate.open(token, &path).await.map(|opened| CommandResult {
            status: CommandStatus::Success,
            message: Some(format_response(
                OK,
                &format!("{} {}", opened.len, opened.entry.version),
            )),
            body: Some(FileBody {
                file: opened.file,
                len: opened.len,
            }),
        }),
        Command::MKDIR(path) => gate.mkdir(token, &path).await.map(|entry| {
            success(CREATED, &ctx.links.href(&entry.owner, &entry.path))
        }),
        Command::DELETE { path, if_match } => gate
            .delete(token, &path, if_match.as_deref())
            .await
            .map(|deleted| {
                success(
                    NO_CONTENT,
                    &format!(
                        "Deleted {} entries, {} bytes freed",
                        deleted.removed, deleted.freed_bytes
                    ),
                )
            }),
        Command::MOVE {
            from,
            to,
            overwrite,
        } => match ctx.links.parse_destination(&to) {
            Ok(dest) => gate
                .move_entry(token, &from, &dest, overwrite, None)
                .await
                .map(|moved| {
                    let href = ctx.links.href(&moved.entry.owner, &moved.entry.path);
                    success(CREATED, &format!("{} {}", href, moved.entry.version))
                }),
            Err(e) => Err(e),
        },
        Command::COPY {
            from,
            to,
            overwrite,
        } => match ctx.links.parse_destination(&to) {
            Ok(dest) => gate
                .copy_entry(token, &from, &dest, overwrite)
                .await
                .map(|copied| {
                    let href = ctx.links.href(&copied.entry.owner, &copied.entry.path);
                    success(CREATED, &format!("{} {}", href, copied.entry.version))
                }),
            Err(e) => Err(e),
        },
        Command::LIST(path) => gate.list(token, &path).await.map(|entries| {
            let mut message = format_response(OK, &format!("{} entries", entries.len()));
            for entry in &entries {
                message.push_str(&format_entry(
                    entry,
                    &ctx.links.href(&entry.owner, &entry.path),
                ));
                message.push_str("\r\n");
            }
            CommandResult {
                status: CommandStatus::Success,
                message: Some(message),
                body: None,
            }
        }),
        Command::QUOTA => gate
            .quota(token)
            .await
            .map(|usage| success(OK, &format_quota(&usage))),
        other => Ok(failure(
            BAD_REQUEST,
            &format!("Unexpected command {other:?}"),
        )),
    };

    result.unwrap_or_else(|e| from_error(e, ctx))
}

/// Handles the QUIT command: signals connection close.
fn handle_cmd_quit(client: &mut Client) -> CommandResult {
    client.forget_session();
    CommandResult {
        status: CommandStatus::CloseConnection,
        message: Some(format_response(OK, "Goodbye")),
        body: None,
    }
}

/// Records the client's user agent, refusing blocked clients.
fn handle_cmd_agent(client: &mut Client, agent: String, ctx: &ProtocolContext) -> CommandResult {
    if !ctx.filter.allows(&agent) {
        return CommandResult {
            status: CommandStatus::CloseConnection,
            message: Some(format_response(FORBIDDEN, "Forbidden: client not supported")),
            body: None,
        };
    }
    client.set_user_agent(agent);
    success(OK, "Agent accepted")
}

async fn handle_cmd_login(
    client: &mut Client,
    user: &str,
    password: &str,
    ctx: &ProtocolContext,
) -> CommandResult {
    match ctx.gate.authenticate(user, password).await {
        Ok(session) => {
            info!("Client {} logged in as {}", client.addr(), session.user_id);
            client.set_session(session.token.clone(), session.user_id);
            success(
                OK,
                &format!("{} {}", session.token, session.expires_at.to_rfc3339()),
            )
        }
        Err(e) => from_error(e, ctx),
    }
}

/// Adopts an existing session token.
async fn handle_cmd_token(client: &mut Client, token: String, ctx: &ProtocolContext) -> CommandResult {
    match ctx.gate.authorize(&token).await {
        Ok(user) => {
            let message = format!("Session valid for {user}");
            client.set_session(token, user);
            success(OK, &message)
        }
        Err(e) => {
            client.forget_session();
            from_error(e, ctx)
        }
    }
}

async fn handle_cmd_logout(
    client: &mut Client,
    token: &str,
    gate: &AccessGate,
) -> Result<CommandResult, DavError> {
    client.forget_session();
    gate.logout(token).await?;
    Ok(success(OK, "Logged out"))
}

/// Stores the `len` bytes following the command line.
///
/// The body is consumed even when the write is refused, so the next line is
/// read from the right place.
async fn handle_cmd_put<R>(
    client: &mut Client,
    path: &str,
    len: u64,
    if_match: Option<&str>,
    ctx: &ProtocolContext,
    body: &mut R,
) -> CommandResult
where
    R: AsyncRead + Unpin,
{
    let mut limited = body.take(len);

    let result = match client.token() {
        Some(token) => {
            ctx.gate
                .write(token, path, &mut limited, len, if_match)
                .await
        }
        None => {
            drain(&mut limited).await;
            return not_logged_in();
        }
    };

    if drain(&mut limited).await.is_none() {
        warn!("Client {} went away during upload", client.addr());
        return CommandResult {
            status: CommandStatus::CloseConnection,
            message: None,
            body: None,
        };
    }

    match result {
        Ok(entry) => success(
            CREATED,
            &format!("{} {} {}", entry.version, entry.size, ctx.links.href(&entry.owner, &entry.path)),
        ),
        Err(e) => from_error(e, ctx),
    }
}

/// Reads and discards the rest of a body. `None` when the stream failed.
async fn drain<R>(body: &mut R) -> Option<u64>
where
    R: AsyncRead + Unpin,
{
    tokio::io::copy(body, &mut tokio::io::sink()).await.ok()
}
