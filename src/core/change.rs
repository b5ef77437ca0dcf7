//! Kinds of file change.

use std::fmt;

/// Kind of file change, shared by change detection and the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeAction {
    /// A file appeared.
    Add,
    /// A file's contents changed.
    Modify,
    /// A file disappeared.
    Delete,
}

impl ChangeAction {
    /// Wire spelling of this action.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeAction::Add => "add",
            ChangeAction::Modify => "modify",
            ChangeAction::Delete => "delete",
        }
    }

    /// Whether a payload follows the header.
    pub fn carries_payload(self) -> bool {
        !matches!(self, ChangeAction::Delete)
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
