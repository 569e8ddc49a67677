//! Module `state`
//!
//! Per-connection client state: the peer address, the announced user agent
//! and the session the connection is using.

use std::net::SocketAddr;

/// Represents the state of a connected client.
#[derive(Debug)]
pub struct Client {
    addr: SocketAddr,
    user_agent: Option<String>,
    token: Option<String>,
    user: Option<String>,
}

impl Client {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            user_agent: None,
            token: None,
            user: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Token of the session this connection acts for
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// User the session was opened for, as last confirmed by the gate
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    pub fn set_user_agent(&mut self, agent: String) {
        self.user_agent = Some(agent);
    }

    pub fn set_session(&mut self, token: String, user: String) {
        self.token = Some(token);
        self.user = Some(user);
    }

    /// Drops the session from this connection only; the token stays valid.
    pub fn forget_session(&mut self) {
        self.token = None;
        self.user = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let mut client = Client::new("127.0.0.1:5000".parse().unwrap());
        assert!(!client.is_logged_in());

        client.set_session("tok".into(), "alice".into());
        assert_eq!(client.token(), Some("tok"));
        assert_eq!(client.user(), Some("alice"));

        client.forget_session();
        assert!(!client.is_logged_in());
        assert_eq!(client.user(), None);
    }
}
