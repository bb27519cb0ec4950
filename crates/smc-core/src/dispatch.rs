//! Command dispatch: URI-template expansion, encoding and envelope classification.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    commands::LOGIN_FAILURE_CODES,
    errors::Error,
    transport::{
        port::{Method, Url},
        FetchRequest, Fetcher,
    },
    Result,
};

/// Command parameters. Keys matching a `{placeholder}` go into the path.
pub type Params = Map<String, Value>;

/// Decoded response envelope of a successful call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    pub code: i64,
    /// The whole response object, unchanged.
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Rows under `data`. A missing or null `data` is an empty list and a lone
    /// object is a single row.
    pub fn rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        match self.payload.get("data") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| serde_json::from_value(v.clone()).map_err(Error::from))
                .collect(),
            Some(other) => Ok(vec![serde_json::from_value(other.clone())?]),
        }
    }

    pub fn first<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Ok(self.rows::<T>()?.into_iter().next())
    }
}

pub struct Dispatcher {
    base: String,
    fetcher: Arc<dyn Fetcher>,
}

impl Dispatcher {
    pub fn new(base_uri: &str, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        Url::parse(base_uri)
            .map_err(|e| Error::Config(format!("Parameter api_base_uri is invalid: {e}")))?;
        Ok(Self {
            base: base_uri.trim_end_matches('/').to_string(),
            fetcher,
        })
    }

    /// Issue exactly one HTTP call and classify its envelope.
    pub async fn send(&self, method: Method, template: &str, mut params: Params) -> Result<Envelope> {
        let uri = expand_path(template, &mut params)?;
        let url = Url::parse(&format!("{}/{}", self.base, uri))
            .map_err(|e| Error::Config(format!("invalid request url for /{uri}: {e}")))?;

        let mut req = FetchRequest::new(method.clone(), url);
        let outbound = if method == Method::GET {
            req.query = params
                .iter()
                .map(|(k, v)| (k.clone(), query_value(v)))
                .collect();
            None
        } else {
            let body = serde_json::to_string(&Value::Object(params))?;
            req.body = Some(body.clone());
            Some(body)
        };

        let resp = self.fetcher.request(req).await?;

        match &outbound {
            None => debug!(
                response_body = %redact_session(&resp.body),
                "[seat-connector][mirai] [http {}, {}] {} -> /{}",
                resp.status, resp.reason, method, uri
            ),
            Some(body) => debug!(
                request_body = %redact_session(body),
                response_body = %redact_session(&resp.body),
                "[seat-connector][mirai] [http {}, {}] {} -> /{}",
                resp.status, resp.reason, method, uri
            ),
        }

        if !resp.is_success() {
            let message = if resp.reason.is_empty() {
                resp.body.chars().take(200).collect()
            } else {
                resp.reason.clone()
            };
            return Err(Error::Server {
                status: Some(resp.status),
                message,
            });
        }

        classify(&resp.body)
    }
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid regex"))
}

/// Substitute `{name}` placeholders, consuming the matching params.
///
/// The returned path has no leading slash.
pub fn expand_path(template: &str, params: &mut Params) -> Result<String> {
    let template = template.trim_start_matches('/');
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder().captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = params
            .remove(name.as_str())
            .ok_or_else(|| Error::UnresolvedPathParameter {
                path: format!("/{template}"),
                name: name.as_str().to_string(),
            })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&query_value(&value));
        last = whole.end();
    }
    out.push_str(&template[last..]);

    Ok(out)
}

fn query_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

const SECRET_FIELDS: [&str; 3] = ["sessionKey", "authKey", "session"];

/// Mask credentials in a logged request or response body.
fn redact_session(body: &str) -> String {
    let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    for field in SECRET_FIELDS {
        if let Some(v) = map.get_mut(field) {
            *v = Value::String("***".to_string());
        }
    }
    Value::Object(map).to_string()
}

#[derive(Debug, Default, serde::Deserialize)]
struct Status {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a response body onto success or an error category.
pub fn classify(body: &str) -> Result<Envelope> {
    let payload = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return Err(Error::Command {
                code: -1,
                message: "response body is not a JSON object".to_string(),
            })
        }
        Err(e) => {
            return Err(Error::Command {
                code: -1,
                message: format!("undecodable response body: {e}"),
            })
        }
    };

    let Some(code) = payload.get("code").and_then(Value::as_i64) else {
        return Err(Error::Command {
            code: -1,
            message: "response envelope carries no code".to_string(),
        });
    };

    if code == 0 {
        return Ok(Envelope { code, payload });
    }

    let status = payload
        .get("status")
        .cloned()
        .and_then(|s| serde_json::from_value::<Status>(s).ok())
        .unwrap_or_default();
    let message = status
        .message
        .or_else(|| payload.get("msg").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown error".to_string());
    let status_code = status.code.unwrap_or(code);

    if LOGIN_FAILURE_CODES.contains(&code) {
        return Err(Error::Login {
            code: status_code,
            message,
        });
    }
    Err(Error::Command {
        code: status_code,
        message,
    })
}
