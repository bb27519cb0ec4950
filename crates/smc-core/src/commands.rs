//! Remote command catalogue: endpoints, reserved codes and row shapes.

use std::ops::RangeInclusive;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::{Group, GroupId, Member, MemberId};

pub const AUTH: &str = "/auth";
pub const VERIFY: &str = "/verify";
pub const RELEASE: &str = "/release";

pub const SERVER_INFO: &str = "/{instance}/serverinfo";
pub const MEMBER_LIST: &str = "/{instance}/clientdblist";
pub const MEMBER_INFO: &str = "/{instance}/clientdbinfo";
pub const MEMBER_EDIT: &str = "/{instance}/clientdbedit";
pub const MEMBER_GROUPS: &str = "/{instance}/servergroupsbyclientid";
pub const GROUP_LIST: &str = "/{instance}/servergrouplist";
pub const GROUP_MEMBERS: &str = "/{instance}/servergroupclientlist";
pub const GROUP_ADD_MEMBER: &str = "/{instance}/servergroupaddclient";
pub const GROUP_DEL_MEMBER: &str = "/{instance}/servergroupdelclient";

/// Envelope codes meaning the key or session was rejected.
pub const LOGIN_FAILURE_CODES: RangeInclusive<i64> = 1..=4;
/// Lookup of an unknown member id.
pub const IDENTITY_NOT_FOUND: i64 = 512;
/// Paginated listing ran past the last row.
pub const NO_MORE_DATA: i64 = 1281;

/// Group database type for regular groups (0 = template, 2 = query).
pub const GROUP_TYPE_NORMAL: &str = "1";

#[derive(Debug, Deserialize)]
pub struct MemberRow {
    #[serde(alias = "client_database_id", deserialize_with = "de_id")]
    pub cldbid: String,
    #[serde(default)]
    pub client_unique_identifier: Option<String>,
    #[serde(default)]
    pub client_nickname: String,
}

impl MemberRow {
    pub fn into_member(self) -> Member {
        let unique_id = self
            .client_unique_identifier
            .unwrap_or_else(|| format!("mirai_{}", self.cldbid));
        Member::new(MemberId(self.cldbid), self.client_nickname, unique_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct MemberRefRow {
    #[serde(deserialize_with = "de_id")]
    pub cldbid: String,
}

#[derive(Debug, Deserialize)]
pub struct GroupRow {
    #[serde(deserialize_with = "de_id")]
    pub sgid: String,
    #[serde(default)]
    pub name: String,
    /// Rows without a type are never treated as normal.
    #[serde(rename = "type", default, deserialize_with = "de_opt_id")]
    pub kind: Option<String>,
}

impl GroupRow {
    pub fn is_normal(&self) -> bool {
        self.kind.as_deref() == Some(GROUP_TYPE_NORMAL)
    }

    pub fn into_group(self) -> Group {
        Group::new(GroupId(self.sgid), self.name)
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerInfoRow {
    #[serde(deserialize_with = "de_id")]
    pub virtualserver_default_server_group: String,
}

/// Ids arrive as strings or numbers depending on the bridge version.
fn de_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn de_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ids_accept_numbers_and_strings() {
        let a: MemberRow = serde_json::from_value(json!({
            "cldbid": 42, "client_nickname": "alice", "client_unique_identifier": "u42"
        }))
        .unwrap();
        let b: MemberRow = serde_json::from_value(json!({
            "client_database_id": "42", "client_nickname": "alice"
        }))
        .unwrap();
        assert_eq!(a.cldbid, "42");
        assert_eq!(b.cldbid, "42");
        assert_eq!(b.into_member().unique_id, "mirai_42");
    }

    #[test]
    fn group_type_is_normalised() {
        let numeric: GroupRow =
            serde_json::from_value(json!({ "sgid": 10, "name": "Pilots", "type": 1 })).unwrap();
        let template: GroupRow =
            serde_json::from_value(json!({ "sgid": "12", "name": "T", "type": "0" })).unwrap();
        let untyped: GroupRow =
            serde_json::from_value(json!({ "sgid": "13", "name": "U" })).unwrap();

        assert!(numeric.is_normal());
        assert!(!template.is_normal());
        assert!(!untyped.is_normal());
        let null_typed: GroupRow =
            serde_json::from_value(json!({ "sgid": "14", "name": "N", "type": null })).unwrap();
        assert!(!null_typed.is_normal());
    }

    #[test]
    fn rejects_structured_ids() {
        let res = serde_json::from_value::<MemberRefRow>(json!({ "cldbid": { "x": 1 } }));
        assert!(res.is_err());
    }
}
