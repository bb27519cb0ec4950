use std::{collections::BTreeSet, fmt};

/// Remote member id (database id on the bridge side).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub String);

/// Remote group id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub String);

/// Session key handed out by `/auth`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(pub String);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Keep session keys out of logs.
impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(***)")
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A mirrored remote member.
///
/// `groups` is `None` until the member's group set has been loaded from the
/// remote; an unloaded set is never treated as empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub unique_id: String,
    pub groups: Option<BTreeSet<GroupId>>,
}

impl Member {
    pub fn new(id: MemberId, name: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            unique_id: unique_id.into(),
            groups: None,
        }
    }
}

/// A mirrored remote group. Same loading rules as [`Member::groups`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub members: Option<BTreeSet<MemberId>>,
}

impl Group {
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            members: None,
        }
    }
}
