//! Resource links
//!
//! Absolute URLs under `root_url` name a user's entries as
//! `<root_url>files/<owner>/<path>`. Move and copy destinations may be given
//! in that form.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::error::{DavError, DavResult};
use crate::gate::Destination;

const FILES_PREFIX: &str = "files/";

/// Characters escaped inside a path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Builds and parses resource links
#[derive(Debug, Clone)]
pub struct Links {
    root_url: String,
}

impl Links {
    /// `root_url` must end with a slash, as the loaded configuration does.
    pub fn new(root_url: &str) -> Self {
        Self {
            root_url: root_url.to_string(),
        }
    }

    /// Absolute link to a user's logical path
    pub fn href(&self, owner: &str, logical: &str) -> String {
        let mut href = format!("{}{}{}", self.root_url, FILES_PREFIX, owner);
        for segment in logical.split('/').filter(|s| !s.is_empty()) {
            href.push('/');
            href.extend(utf8_percent_encode(segment, SEGMENT));
        }
        href
    }

    /// Interprets a move or copy destination.
    ///
    /// Plain paths stay in the caller's tree; links under `root_url` name
    /// their owner explicitly. Links to any other server are refused.
    pub fn parse_destination(&self, raw: &str) -> DavResult<Destination> {
        if let Some(rest) = raw.strip_prefix(&self.root_url) {
            let rest = rest.strip_prefix(FILES_PREFIX).ok_or_else(|| {
                DavError::Forbidden(format!("{raw} is not a file link"))
            })?;
            let (owner, path) = rest.split_once('/').unwrap_or((rest, ""));
            return Ok(Destination::owned_by(owner, format!("/{path}")));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Err(DavError::Forbidden(format!(
                "{raw} is outside {}",
                self.root_url
            )));
        }

        Ok(Destination::local(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn links() -> Links {
        Links::new("http://dav.local/")
    }

    #[test]
    fn href_encodes_segments() {
        assert_eq!(
            links().href("alice", "/My Files/a#1.txt"),
            "http://dav.local/files/alice/My%20Files/a%231.txt"
        );
        assert_eq!(links().href("alice", "/"), "http://dav.local/files/alice");
    }

    #[test]
    fn destinations() {
        assert_eq!(
            links().parse_destination("/b.txt").unwrap(),
            Destination::local("/b.txt")
        );
        assert_eq!(
            links()
                .parse_destination("http://dav.local/files/bob/x/y.txt")
                .unwrap(),
            Destination::owned_by("bob", "/x/y.txt")
        );
        let err = links()
            .parse_destination("http://elsewhere/files/bob/x")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
