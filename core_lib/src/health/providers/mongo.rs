//! MongoDB replica set and count query checks

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use lazy_static::lazy_static;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::StatusProvider;
use crate::error::CheckError;
use crate::health::checks::{body_from, query_param, Check, CheckResult};
use crate::health::clock::{Clock, SystemClock};

const APP_NAME: &str = "sys-agent";
const DEFAULT_OPLOG_MAX_DELTA: Duration = Duration::from_secs(60);
const CUSTOM_PARAMS: [&str; 5] = ["cron", "oplogMaxDelta", "db", "collection", "count"];

lazy_static! {
    static ref DAY_TEMPLATE: Regex = Regex::new(r"\[\[\.([A-Z0-9]+)\]\]").expect("valid day template regex");
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplSet {
    pub set: String,
    pub status: String,
    pub optime: String,
    pub members: Vec<ReplMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplMember {
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optime: Option<DateTime<Utc>>,
}

pub struct MongoProvider {
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl MongoProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn connect(&self, url: &str) -> Result<Client, CheckError> {
        let mut options = ClientOptions::parse(strip_custom_params(url))
            .await
            .map_err(|e| CheckError::Config(format!("can't parse mongo url: {}", e)))?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(self.timeout);
        options.server_selection_timeout = Some(self.timeout);

        Client::with_options(options).map_err(|e| CheckError::Transport(format!("can't create mongo client: {}", e)))
    }

    async fn repl_status(&self, client: &Client, max_delta: Duration, host: &str) -> Result<Option<ReplSet>, CheckError> {
        match client.database("admin").run_command(doc! {"replSetGetStatus": 1}, None).await {
            Ok(status) => parse_repl_status(&status, max_delta).map(Some),
            Err(e) if is_no_replication(&e) => {
                debug!("mongo at {} is not a replica set", host);
                Ok(None)
            }
            Err(e) => Err(CheckError::Transport(format!("replSetGetStatus failed for {}: {}", host, e))),
        }
    }
}

fn is_no_replication(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => command.code_name == "NoReplicationEnabled" || command.code == 76,
        _ => err.to_string().contains("NoReplicationEnabled"),
    }
}

/// Count query declared on a mongo check.
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    pub db: String,
    pub collection: String,
    pub filter: Document,
}

impl CountQuery {
    pub fn from_check(check: &Check, now: DateTime<Utc>) -> Result<Option<Self>, CheckError> {
        let Some(raw) = check.query_param("count") else {
            return Ok(None);
        };

        let db = check.query_param("db").unwrap_or_default();
        let collection = check.query_param("collection").unwrap_or_default();
        if db.is_empty() || collection.is_empty() {
            return Err(CheckError::Config(
                "collection and db should be provided for count query".to_string(),
            ));
        }

        let expanded = DayTemplate::new(now).expand(&raw);
        let value: Value = serde_json::from_str(&expanded)
            .map_err(|e| CheckError::Parse(format!("can't parse count query {:?}: {}", expanded, e)))?;
        let filter = match Bson::try_from(value) {
            Ok(Bson::Document(filter)) => filter,
            Ok(other) => {
                return Err(CheckError::Parse(format!("count query must be a document, got {}", other)));
            }
            Err(e) => return Err(CheckError::Parse(format!("can't convert count query: {}", e))),
        };

        Ok(Some(Self { db, collection, filter }))
    }
}

/// Substitutes `[[.YYYYMMDD]]`, `[[.YYYYMMDD1]]`..`[[.YYYYMMDD7]]` and
/// `[[.NOW]]` with extended-json dates relative to `now`.
pub struct DayTemplate {
    now: DateTime<Utc>,
}

impl DayTemplate {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn expand(&self, input: &str) -> String {
        DAY_TEMPLATE
            .replace_all(input, |caps: &regex::Captures| {
                let key = &caps[1];
                match self.days_back(key) {
                    Some(days) => date_json(self.now - ChronoDuration::days(days)),
                    None => {
                        warn!("unknown day template {}", &caps[0]);
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn days_back(&self, key: &str) -> Option<i64> {
        match key {
            "NOW" | "YYYYMMDD" => Some(0),
            _ => key
                .strip_prefix("YYYYMMDD")
                .and_then(|n| n.parse::<i64>().ok())
                .filter(|n| (1..=7).contains(n)),
        }
    }
}

fn date_json(t: DateTime<Utc>) -> String {
    format!(
        r#"{{"$date":"{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z"}}"#,
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

/// Connection string without the query parameters only this agent understands.
pub fn strip_custom_params(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            !pair.is_empty() && !CUSTOM_PARAMS.contains(&key)
        })
        .collect();
    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

/// `host[:port]` part of the connection string, used in error messages.
fn host_of(url: &str) -> &str {
    let rest = url.trim_start_matches("mongodb://");
    let rest = rest.rsplit_once('@').map(|(_, hosts)| hosts).unwrap_or(rest);
    rest.split(['/', '?']).next().unwrap_or(rest)
}

pub fn oplog_max_delta(url: &str) -> Result<Duration, CheckError> {
    match query_param(url, "oplogMaxDelta") {
        Some(raw) => humantime::parse_duration(raw.trim()).map_err(|e| {
            CheckError::Parse(format!("can't parse oplogMaxDelta: {}: {}", host_of(url), e))
        }),
        None => Ok(DEFAULT_OPLOG_MAX_DELTA),
    }
}

/// Decodes a `replSetGetStatus` reply and validates member states and lag.
pub fn parse_repl_status(status: &Document, max_delta: Duration) -> Result<ReplSet, CheckError> {
    let members = match status.get("members") {
        Some(Bson::Array(members)) => members,
        other => {
            return Err(CheckError::Parse(format!(
                "mongo replset members can't be extracted: {}",
                describe(other)
            )));
        }
    };
    if members.is_empty() {
        return Err(CheckError::Parse("mongo replset is empty".to_string()));
    }

    let set = match status.get("set") {
        Some(Bson::String(set)) => set.clone(),
        other => {
            return Err(CheckError::Parse(format!(
                "mongo replset set can't be extracted: {}",
                describe(other)
            )));
        }
    };

    let mut parsed = Vec::with_capacity(members.len());
    for member in members {
        parsed.push(parse_member(member)?);
    }

    let reference = parsed
        .iter()
        .find(|m| m.state == "PRIMARY")
        .unwrap_or(&parsed[0])
        .optime;

    let mut repl = ReplSet {
        set,
        status: "ok".to_string(),
        optime: "ok".to_string(),
        members: Vec::new(),
    };

    for member in &parsed {
        if !matches!(member.state.as_str(), "PRIMARY" | "SECONDARY" | "ARBITER") {
            repl.status = format!("failed, invalid state {} for {}", member.state, member.name);
            break;
        }
        if member.state != "SECONDARY" {
            continue;
        }
        if let (Some(reference), Some(optime)) = (reference, member.optime) {
            let lag = reference.signed_duration_since(optime);
            let lag_std = lag.to_std().unwrap_or_default();
            if lag_std > max_delta {
                repl.optime = format!(
                    "failed, optime difference for {} is {}",
                    member.name,
                    humantime::format_duration(lag_std)
                );
                break;
            }
        }
    }

    repl.members = parsed;
    Ok(repl)
}

fn parse_member(member: &Bson) -> Result<ReplMember, CheckError> {
    let Bson::Document(member) = member else {
        return Err(CheckError::Parse(format!("mongo replset member can't be extracted: {}", member)));
    };

    let name = match member.get("name") {
        Some(Bson::String(name)) => name.clone(),
        _ => {
            return Err(CheckError::Parse(format!("mongo replset member name can't be extracted: {}", member)));
        }
    };
    let state = match member.get("stateStr") {
        Some(Bson::String(state)) => state.clone(),
        _ => {
            return Err(CheckError::Parse(format!("mongo replset member state can't be extracted: {}", member)));
        }
    };

    Ok(ReplMember {
        name,
        state,
        optime: member_optime(member.get("optime")),
    })
}

fn member_optime(optime: Option<&Bson>) -> Option<DateTime<Utc>> {
    match optime? {
        Bson::DateTime(dt) => Utc.timestamp_millis_opt(dt.timestamp_millis()).single(),
        Bson::Document(doc) => match doc.get("ts") {
            Some(Bson::Timestamp(ts)) => Utc.timestamp_opt(ts.time as i64, ts.increment).single(),
            _ => None,
        },
        Bson::Timestamp(ts) => Utc.timestamp_opt(ts.time as i64, ts.increment).single(),
        _ => None,
    }
}

fn describe(value: Option<&Bson>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "<nil>".to_string(),
    }
}

#[async_trait::async_trait]
impl StatusProvider for MongoProvider {
    async fn status(&self, check: &Check) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let host = host_of(&check.url).to_string();
        let max_delta = oplog_max_delta(&check.url)?;
        let count_query = CountQuery::from_check(check, self.clock.now().with_timezone(&Utc))?;

        let client = self.connect(&check.url).await?;

        let mut body = json!({"status": "ok"});
        if let Some(repl) = self.repl_status(&client, max_delta, &host).await? {
            body["rs"] = serde_json::to_value(&repl).map_err(|e| CheckError::Parse(e.to_string()))?;
        }

        if let Some(query) = count_query {
            let count = client
                .database(&query.db)
                .collection::<Document>(&query.collection)
                .count_documents(query.filter, None)
                .await
                .map_err(|e| CheckError::Transport(format!("count query failed for {}: {}", host, e)))?;
            body["count"] = json!(count);
        }

        Ok(CheckResult::ok(&check.name)
            .with_body(body_from(body))
            .with_response_time(start.elapsed()))
    }
}
