//! Module `commands`
//!
//! Control protocol commands and the line parser. One command per line;
//! paths and credentials are percent-encoded so they never contain spaces.

use percent_encoding::percent_decode_str;
use tokio::fs::File;

/// A command parsed from a control line.
///
/// Paths are kept percent-encoded; the path resolver decodes them.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    AGENT(String),
    LOGIN { user: String, password: String },
    TOKEN(String),
    LOGOUT,
    STAT(String),
    GET(String),
    PUT {
        path: String,
        len: u64,
        if_match: Option<String>,
    },
    MKDIR(String),
    DELETE {
        path: String,
        if_match: Option<String>,
    },
    MOVE {
        from: String,
        to: String,
        overwrite: bool,
    },
    COPY {
        from: String,
        to: String,
        overwrite: bool,
    },
    LIST(String),
    QUOTA,
    QUIT,
    /// Known verb with missing or malformed arguments
    INVALID(String),
    UNKNOWN(String),
}

/// Represents the outcome status of executing a command.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure(String),
    CloseConnection,
}

/// File content streamed after the status line
#[derive(Debug)]
pub struct FileBody {
    pub file: File,
    pub len: u64,
}

/// Struct encapsulating the full result of a command execution.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub message: Option<String>,
    pub body: Option<FileBody>,
}

fn decode(arg: &str) -> Option<String> {
    percent_decode_str(arg)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

fn parse_overwrite(flag: Option<&str>) -> Option<bool> {
    match flag {
        None => Some(false),
        Some(f) if f.eq_ignore_ascii_case("overwrite") || f == "T" => Some(true),
        Some("F") => Some(false),
        Some(_) => None,
    }
}

/// Parses a raw control line into a [`Command`].
pub fn parse_command(raw: &str) -> Command {
    let trimmed = raw.trim();
    let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (trimmed, ""),
    };
    let verb = verb.to_ascii_uppercase();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let invalid = |usage: &str| Command::INVALID(format!("usage: {usage}"));

    match (verb.as_str(), args.as_slice()) {
        // The user agent is free text and keeps its spaces.
        ("AGENT", [_, ..]) => Command::AGENT(rest.to_string()),
        ("AGENT", _) => invalid("AGENT <user-agent>"),

        ("LOGIN", [user, password]) => match (decode(user), decode(password)) {
            (Some(user), Some(password)) => Command::LOGIN { user, password },
            _ => Command::INVALID("credentials are not valid UTF-8".into()),
        },
        ("LOGIN", _) => invalid("LOGIN <user> <password>"),

        ("TOKEN", [token]) => Command::TOKEN(token.to_string()),
        ("TOKEN", _) => invalid("TOKEN <token>"),

        ("LOGOUT", []) => Command::LOGOUT,
        ("QUOTA", []) => Command::QUOTA,
        ("QUIT" | "Q", _) => Command::QUIT,

        ("STAT", [path]) => Command::STAT(path.to_string()),
        ("STAT", _) => invalid("STAT <path>"),

        ("GET", [path]) => Command::GET(path.to_string()),
        ("GET", _) => invalid("GET <path>"),

        ("PUT", [path, len] | [path, len, _]) => match len.parse::<u64>() {
            Ok(len) => Command::PUT {
                path: path.to_string(),
                len,
                if_match: args.get(2).map(|s| s.to_string()),
            },
            Err(_) => Command::INVALID(format!("invalid length {len:?}")),
        },
        ("PUT", _) => invalid("PUT <path> <length> [<if-match>]"),

        ("MKDIR", [path]) => Command::MKDIR(path.to_string()),
        ("MKDIR", _) => invalid("MKDIR <path>"),

        ("DELETE", [path] | [path, _]) => Command::DELETE {
            path: path.to_string(),
            if_match: args.get(1).map(|s| s.to_string()),
        },
        ("DELETE", _) => invalid("DELETE <path> [<if-match>]"),

        ("MOVE" | "COPY", [from, to] | [from, to, _]) => {
            let Some(overwrite) = parse_overwrite(args.get(2).copied()) else {
                return invalid(&format!("{verb} <from> <to> [overwrite]"));
            };
            let (from, to) = (from.to_string(), to.to_string());
            if verb == "MOVE" {
                Command::MOVE {
                    from,
                    to,
                    overwrite,
                }
            } else {
                Command::COPY {
                    from,
                    to,
                    overwrite,
                }
            }
        }
        ("MOVE" | "COPY", _) => invalid(&format!("{verb} <from> <to> [overwrite]")),

        ("LIST", []) => Command::LIST("/".to_string()),
        ("LIST", [path]) => Command::LIST(path.to_string()),
        ("LIST", _) => invalid("LIST [<path>]"),

        ("LOGOUT" | "QUOTA", _) => Command::INVALID(format!("{verb} takes no arguments")),
        _ => Command::UNKNOWN(verb),
    }
}
