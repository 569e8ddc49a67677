//! Gate request and result types

/// Target of a move or copy.
///
/// A destination without an owner lies in the caller's own tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub owner: Option<String>,
    pub path: String,
}

impl Destination {
    /// A path in the caller's own tree
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            owner: None,
            path: path.into(),
        }
    }

    /// A path in a named user's tree
    pub fn owned_by(owner: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            path: path.into(),
        }
    }
}
