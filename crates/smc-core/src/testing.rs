//! In-crate fakes shared by the unit tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::{
    config::{ConnectorSettings, RawSettings},
    transport::{
        port::{Method, Url},
        FetchRequest, FetchResponse, Fetcher,
    },
    Result,
};

pub(crate) const BASE: &str = "http://bridge.test:8080";
pub(crate) const AUTH_KEY: &str = "INITKEY";
pub(crate) const BOT_ID: &str = "10001";

pub(crate) fn raw_settings() -> RawSettings {
    RawSettings {
        api_base_uri: Some(BASE.to_string()),
        api_key: Some(AUTH_KEY.to_string()),
        bot_id: Some(BOT_ID.to_string()),
        instance_id: None,
    }
}

pub(crate) fn settings() -> ConnectorSettings {
    ConnectorSettings::from_raw(raw_settings()).unwrap()
}

pub(crate) fn json_response(status: u16, body: Value) -> FetchResponse {
    FetchResponse {
        status,
        reason: if status == 200 { "OK" } else { "Error" }.to_string(),
        headers: HashMap::new(),
        body: body.to_string(),
    }
}

pub(crate) fn ok(extra: Value) -> FetchResponse {
    let mut body = match extra {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    body.insert("code".to_string(), json!(0));
    json_response(200, Value::Object(body))
}

pub(crate) fn failure(code: i64, message: &str) -> FetchResponse {
    json_response(
        200,
        json!({ "code": code, "status": { "code": code, "message": message } }),
    )
}

type Handler = Box<dyn Fn(&FetchRequest) -> FetchResponse + Send + Sync>;

/// Fetcher answering every request with a closure and recording what it saw.
pub(crate) struct ScriptedFetcher {
    handler: Handler,
    calls: Mutex<Vec<(FetchRequest, Instant)>>,
}

impl ScriptedFetcher {
    pub(crate) fn new(
        handler: impl Fn(&FetchRequest) -> FetchResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<FetchRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub(crate) fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn request(&self, req: FetchRequest) -> Result<FetchResponse> {
        let resp = (self.handler)(&req);
        self.calls.lock().unwrap().push((req, Instant::now()));
        Ok(resp)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RemoteGroup {
    pub(crate) name: String,
    /// `None` leaves `type` out of the listing row.
    pub(crate) kind: Option<u8>,
}

/// State of the fake bridge. Tests poke at it directly through `FakeRemote::state`.
#[derive(Debug)]
pub(crate) struct RemoteState {
    pub(crate) sessions_issued: u32,
    pub(crate) active_sessions: BTreeSet<String>,
    pub(crate) verified: Vec<(String, String)>,
    pub(crate) released: Vec<String>,
    pub(crate) members: BTreeMap<String, (String, String)>,
    pub(crate) groups: BTreeMap<String, RemoteGroup>,
    pub(crate) default_group: String,
    pub(crate) memberships: BTreeSet<(String, String)>,
    pub(crate) page_size: usize,
    /// Path -> (code, message) answered instead of the normal route.
    pub(crate) failures: HashMap<String, (i64, String)>,
    /// Fail the member listing page starting at this offset with this code.
    pub(crate) member_page_failure: Option<(usize, i64)>,
    /// Next request to this path hangs for a minute before being answered.
    pub(crate) stall: Option<String>,
    pub(crate) calls: Vec<(Method, String)>,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            sessions_issued: 0,
            active_sessions: BTreeSet::new(),
            verified: Vec::new(),
            released: Vec::new(),
            members: BTreeMap::new(),
            groups: BTreeMap::new(),
            default_group: "8".to_string(),
            memberships: BTreeSet::new(),
            page_size: 2,
            failures: HashMap::new(),
            member_page_failure: None,
            stall: None,
            calls: Vec::new(),
        }
    }
}

/// Minimal stateful emulation of the bridge's HTTP API.
#[derive(Default)]
pub(crate) struct FakeRemote {
    pub(crate) state: Mutex<RemoteState>,
}

impl FakeRemote {
    /// Five members, groups 8 (default), 10 and 11 (normal), 12 (template).
    pub(crate) fn populated() -> Self {
        let remote = Self::default();
        {
            let mut st = remote.state.lock().unwrap();
            for (id, name) in [("1", "alice"), ("2", "bob"), ("3", "carol"), ("4", "dave"), ("5", "erin")] {
                st.members
                    .insert(id.to_string(), (name.to_string(), format!("mirai_{id}")));
            }
            for (id, name, kind) in [
                ("8", "Guest", 1),
                ("10", "Pilots", 1),
                ("11", "Directors", 1),
                ("12", "Template", 0),
            ] {
                st.groups.insert(
                    id.to_string(),
                    RemoteGroup {
                        name: name.to_string(),
                        kind: Some(kind),
                    },
                );
            }
            for member in ["1", "2", "3", "4", "5"] {
                st.memberships.insert(("8".to_string(), member.to_string()));
            }
            st.memberships.insert(("10".to_string(), "1".to_string()));
            st.memberships.insert(("10".to_string(), "2".to_string()));
        }
        remote
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        let st = self.state.lock().unwrap();
        st.calls.iter().filter(|(_, p)| p == path).count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub(crate) fn fail(&self, path: &str, code: i64, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(path.to_string(), (code, message.to_string()));
    }

    pub(crate) fn stall(&self, path: &str) {
        self.state.lock().unwrap().stall = Some(path.to_string());
    }

    pub(crate) fn heal(&self, path: &str) {
        self.state.lock().unwrap().failures.remove(path);
    }

    fn handle(&self, req: &FetchRequest) -> FetchResponse {
        let params = params_of(req);
        let path = req.url.path().to_string();
        let mut st = self.state.lock().unwrap();
        st.calls.push((req.method.clone(), path.clone()));

        if let Some((code, message)) = st.failures.get(&path) {
            return failure(*code, message);
        }

        let param = |name: &str| params.get(name).map(value_string).unwrap_or_default();

        match path.as_str() {
            "/auth" => {
                if param("authKey") != AUTH_KEY {
                    return failure(1, "Auth Key incorrect");
                }
                st.sessions_issued += 1;
                let session = format!("session-{}", st.sessions_issued);
                st.active_sessions.insert(session.clone());
                return ok(json!({ "session": session }));
            }
            "/release" => {
                let session = param("sessionKey");
                st.active_sessions.remove(&session);
                st.released.push(session);
                return ok(json!({}));
            }
            _ => {}
        }

        if !st.active_sessions.contains(&param("sessionKey")) {
            return failure(3, "Session invalid or not exist");
        }

        match path.as_str() {
            "/verify" => {
                let entry = (param("sessionKey"), param("qq"));
                st.verified.push(entry);
                ok(json!({}))
            }
            "/1/clientdblist" => {
                let start = param("start").parse::<usize>().unwrap_or(0);
                if let Some((at, code)) = st.member_page_failure {
                    if at == start {
                        return failure(code, "listing interrupted");
                    }
                }
                let rows = st
                    .members
                    .iter()
                    .skip(start)
                    .take(st.page_size)
                    .map(|(id, (name, uid))| {
                        json!({ "cldbid": id, "client_nickname": name, "client_unique_identifier": uid })
                    })
                    .collect::<Vec<_>>();
                if rows.is_empty() {
                    return failure(1281, "database empty result set");
                }
                ok(json!({ "data": rows }))
            }
            "/1/clientdbinfo" => {
                let id = param("cldbid");
                match st.members.get(&id) {
                    Some((name, uid)) => ok(json!({
                        "data": [{ "client_database_id": id.parse::<i64>().unwrap_or(0), "client_nickname": name, "client_unique_identifier": uid }]
                    })),
                    None => failure(512, "invalid clientID"),
                }
            }
            "/1/clientdbedit" => {
                let id = param("cldbid");
                let name = param("client_nickname");
                match st.members.get_mut(&id) {
                    Some(entry) => {
                        entry.0 = name;
                        ok(json!({}))
                    }
                    None => failure(512, "invalid clientID"),
                }
            }
            "/1/serverinfo" => ok(json!({
                "data": [{ "virtualserver_default_server_group": st.default_group.parse::<i64>().unwrap_or(0) }]
            })),
            "/1/servergrouplist" => {
                let rows = st
                    .groups
                    .iter()
                    .map(|(id, g)| {
                        let mut row = json!({ "sgid": id, "name": g.name });
                        if let Some(kind) = g.kind {
                            row["type"] = json!(kind.to_string());
                        }
                        row
                    })
                    .collect::<Vec<_>>();
                ok(json!({ "data": rows }))
            }
            "/1/servergroupclientlist" => {
                let sgid = param("sgid");
                let rows = st
                    .memberships
                    .iter()
                    .filter(|(g, _)| *g == sgid)
                    .map(|(_, m)| json!({ "cldbid": m }))
                    .collect::<Vec<_>>();
                ok(json!({ "data": rows }))
            }
            "/1/servergroupsbyclientid" => {
                let cldbid = param("cldbid");
                let rows = st
                    .memberships
                    .iter()
                    .filter(|(_, m)| *m == cldbid)
                    .filter_map(|(g, _)| {
                        st.groups
                            .get(g)
                            .map(|grp| json!({ "sgid": g, "name": grp.name }))
                    })
                    .collect::<Vec<_>>();
                ok(json!({ "data": rows }))
            }
            "/1/servergroupaddclient" => {
                let entry = (param("sgid"), param("cldbid"));
                st.memberships.insert(entry);
                ok(json!({}))
            }
            "/1/servergroupdelclient" => {
                let entry = (param("sgid"), param("cldbid"));
                st.memberships.remove(&entry);
                ok(json!({}))
            }
            _ => json_response(404, json!({})),
        }
    }
}

#[async_trait]
impl Fetcher for FakeRemote {
    async fn request(&self, req: FetchRequest) -> Result<FetchResponse> {
        let stalled = {
            let mut st = self.state.lock().unwrap();
            if st.stall.as_deref() == Some(req.url.path()) {
                st.stall.take()
            } else {
                None
            }
        };
        if stalled.is_some() {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(self.handle(&req))
    }
}

fn params_of(req: &FetchRequest) -> Map<String, Value> {
    if req.method == Method::GET {
        return req
            .query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
    }
    req.body
        .as_deref()
        .and_then(|b| serde_json::from_str::<Map<String, Value>>(b).ok())
        .unwrap_or_default()
}

fn value_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn url(path: &str) -> Url {
    Url::parse(&format!("{BASE}{path}")).unwrap()
}
