//! Strongly-typed ID types for domain entities.
//!
//! Every ID is an [`Id`] over a ULID, tagged with a marker [`IdKind`] so a
//! `UserId` can never be passed where a `WorkflowId` is expected. IDs display
//! with the kind's prefix (`wf_01H...`) and serialize as the bare ULID. Parsing
//! accepts either form, but never another kind's prefix.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// The entity an [`Id`] names.
pub trait IdKind {
    /// Display prefix, written before an underscore.
    const PREFIX: &'static str;
    /// Type name used in parse errors.
    const NAME: &'static str;
}

/// A ULID tagged with the entity kind it identifies.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<K> {
    ulid: Ulid,
    #[serde(skip)]
    kind: PhantomData<fn() -> K>,
}

impl<K: IdKind> Id<K> {
    /// Creates a new ID with a randomly generated ULID.
    #[must_use]
    pub fn new() -> Self {
        Self::from_ulid(Ulid::new())
    }

    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            kind: PhantomData,
        }
    }

    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

// Manual impls keep the marker type free of trait bounds.
impl<K> Clone for Id<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Id<K> {}

impl<K> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<K> Eq for Id<K> {}

impl<K> PartialOrd for Id<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Id<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<K> Hash for Id<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<K: IdKind> Default for Id<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: IdKind> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", K::PREFIX, self.ulid)
    }
}

impl<K: IdKind> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<K: IdKind> FromStr for Id<K> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s
            .strip_prefix(K::PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(s);
        Ulid::from_str(bare)
            .map(Self::from_ulid)
            .map_err(|e| ParseIdError {
                id_type: K::NAME,
                reason: e.to_string(),
            })
    }
}

/// Kinds of identified entities.
pub mod kind {
    use super::IdKind;

    /// A workflow owner or test caller.
    #[derive(Debug)]
    pub enum User {}

    impl IdKind for User {
        const PREFIX: &'static str = "usr";
        const NAME: &'static str = "UserId";
    }

    /// A workflow definition.
    #[derive(Debug)]
    pub enum Workflow {}

    impl IdKind for Workflow {
        const PREFIX: &'static str = "wf";
        const NAME: &'static str = "WorkflowId";
    }

    /// An Execution record. Correlation ids are separate and caller-supplied.
    #[derive(Debug)]
    pub enum Execution {}

    impl IdKind for Execution {
        const PREFIX: &'static str = "exec";
        const NAME: &'static str = "ExecutionId";
    }

    #[derive(Debug)]
    pub enum Credential {}

    impl IdKind for Credential {
        const PREFIX: &'static str = "cred";
        const NAME: &'static str = "CredentialId";
    }

    /// A stored conversation turn.
    #[derive(Debug)]
    pub enum Message {}

    impl IdKind for Message {
        const PREFIX: &'static str = "msg";
        const NAME: &'static str = "MessageId";
    }
}

pub type UserId = Id<kind::User>;
pub type WorkflowId = Id<kind::Workflow>;
pub type ExecutionId = Id<kind::Execution>;
pub type CredentialId = Id<kind::Credential>;
pub type MessageId = Id<kind::Message>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn displays_with_kind_prefix() {
        assert!(UserId::new().to_string().starts_with("usr_"));
        assert!(ExecutionId::new().to_string().starts_with("exec_"));
        assert!(CredentialId::new().to_string().starts_with("cred_"));
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = WorkflowId::new();
        assert_eq!(id.to_string().parse::<WorkflowId>().unwrap(), id);
        assert_eq!(id.as_ulid().to_string().parse::<WorkflowId>().unwrap(), id);
    }

    #[test]
    fn parse_errors_name_the_kind() {
        let err = "not_a_ulid".parse::<WorkflowId>().unwrap_err();
        assert_eq!(err.id_type, "WorkflowId");
    }

    #[test]
    fn another_kinds_prefix_is_rejected() {
        let cred = CredentialId::new();
        assert!(cred.to_string().parse::<UserId>().is_err());
    }

    #[test]
    fn prefix_without_separator_is_rejected() {
        let ulid = Ulid::new();
        assert!(format!("wf{ulid}").parse::<WorkflowId>().is_err());
    }

    #[test]
    fn equal_ulids_are_equal_ids() {
        let ulid = Ulid::new();
        assert_eq!(UserId::from_ulid(ulid), UserId::from_ulid(ulid));

        let id = WorkflowId::new();
        let set: HashSet<WorkflowId> = [id, WorkflowId::new(), id].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn debug_matches_display() {
        let id = MessageId::new();
        assert_eq!(format!("{id:?}"), id.to_string());
    }

    #[test]
    fn serde_uses_the_bare_ulid() {
        let id = ExecutionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
        assert_eq!(serde_json::from_str::<ExecutionId>(&json).unwrap(), id);
    }
}
