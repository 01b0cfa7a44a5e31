use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::QueueName;

mod wire_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)?;
        Ok(DateTime::from_utc(naive, Utc))
    }
}

/// Determines how a freshly constructed job obtains its id.
///
/// Mirrors the dotted-path-as-identifier world of the source system, but
/// made explicit: callers pick a strategy instead of relying on a
/// process-wide uniqueness assumption.
pub enum JobId<'a> {
    Auto,
    Prefix(&'a str),
    Value(&'a str),
}

impl<'a> JobId<'a> {
    pub fn make_id(&self) -> String {
        match self {
            JobId::Auto => uuid::Uuid::new_v4().to_string(),
            JobId::Prefix(prefix) => format!("{}:{}", prefix, uuid::Uuid::new_v4()),
            JobId::Value(s) => s.to_string(),
        }
    }
}

/// A unit of work enqueued onto a backend.
///
/// `raw` caches the exact bytes a job was parsed from, so that
/// `to_json(from_json(x)) == x` holds byte-for-byte even across float
/// formatting or field-ordering differences serde might otherwise
/// introduce. Jobs constructed fresh (not parsed) have no cached bytes and
/// serialize normally.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub path: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub timeout: Option<u64>,
    pub sigkill_on_stop: bool,
    pub created_time: DateTime<Utc>,
    raw: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct JobWire {
    path: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    timeout: Option<u64>,
    sigkill_on_stop: bool,
    #[serde(with = "wire_time")]
    created_time: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: JobId<'_>,
        path: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        timeout: Option<u64>,
        sigkill_on_stop: bool,
    ) -> Job {
        Job {
            id: id.make_id(),
            path: path.into(),
            args,
            kwargs,
            timeout,
            sigkill_on_stop,
            created_time: Utc::now(),
            raw: None,
        }
    }

    /// Parses a job from its wire representation, caching the exact bytes
    /// so a later `to_json` reproduces them verbatim.
    pub fn from_json(id: JobId<'_>, bytes: &[u8]) -> Result<Job> {
        let wire: JobWire = serde_json::from_slice(bytes)?;
        Ok(Job {
            id: id.make_id(),
            path: wire.path,
            args: wire.args,
            kwargs: wire.kwargs,
            timeout: wire.timeout,
            sigkill_on_stop: wire.sigkill_on_stop,
            created_time: wire.created_time,
            raw: Some(bytes.to_vec()),
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }
        let wire = JobWire {
            path: self.path.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            timeout: self.timeout,
            sigkill_on_stop: self.sigkill_on_stop,
            created_time: self.created_time,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// The subset of fields that determine whether two jobs are duplicates
    /// of one another, per the reliable backend's deduplication contract.
    /// `created_time` is deliberately excluded: it is an observability
    /// field only.
    pub fn identity_without_created(&self) -> (String, String, String, Option<u64>, bool) {
        (
            self.path.clone(),
            serde_json::to_string(&self.args).unwrap_or_default(),
            serde_json::to_string(&self.kwargs).unwrap_or_default(),
            self.timeout,
            self.sigkill_on_stop,
        )
    }

    /// Ensures this job can round-trip through the wire format and resolves
    /// against `registry` before it's ever enqueued, so we never enqueue
    /// something that can't be dequeued or dispatched.
    pub fn validate(&self, registry: &crate::task::TaskRegistry) -> Result<()> {
        if !registry.contains(&self.path) {
            return Err(Error::UnknownTask(self.path.clone()));
        }
        serde_json::to_vec(&self.args)
            .map_err(|e| Error::InvalidJob(e.to_string()))?;
        serde_json::to_vec(&self.kwargs)
            .map_err(|e| Error::InvalidJob(e.to_string()))?;
        Ok(())
    }
}

/// Which queue a job belongs to, independent of its serialized form; kept
/// alongside the job by callers that need to route it, since `Job` itself
/// carries no queue field on the wire.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub queue: QueueName,
    pub job: Job,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_exact_bytes() {
        let original = br#"{"path":"tasks.send_email","args":[1,2],"kwargs":{"to":"a@b.com"},"timeout":30,"sigkill_on_stop":false,"created_time":"2021-04-01 12:30:00.123456"}"#;
        let job = Job::from_json(JobId::Auto, original).unwrap();
        assert_eq!(job.to_json().unwrap(), original.to_vec());
    }

    #[test]
    fn identity_ignores_created_time() {
        let a = Job::new(
            JobId::Value("a"),
            "tasks.noop",
            vec![],
            Map::new(),
            None,
            false,
        );
        let mut b = a.clone();
        b.created_time = Utc::now() + chrono::Duration::days(1);
        assert_eq!(a.identity_without_created(), b.identity_without_created());
    }

    #[test]
    fn identity_distinguishes_timeout_and_sigkill_on_stop() {
        let base = Job::new(JobId::Value("a"), "tasks.noop", vec![], Map::new(), None, false);

        let mut different_timeout = base.clone();
        different_timeout.timeout = Some(30);
        assert_ne!(
            base.identity_without_created(),
            different_timeout.identity_without_created()
        );

        let mut different_sigkill = base.clone();
        different_sigkill.sigkill_on_stop = true;
        assert_ne!(
            base.identity_without_created(),
            different_sigkill.identity_without_created()
        );
    }

    #[test]
    fn job_id_strategies() {
        assert_eq!(JobId::Value("x").make_id(), "x");
        assert!(JobId::Prefix("p").make_id().starts_with("p:"));
        assert_ne!(JobId::Auto.make_id(), JobId::Auto.make_id());
    }
}
