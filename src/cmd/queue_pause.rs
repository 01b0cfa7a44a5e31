use chrono::{DateTime, TimeZone, Utc};
use structopt::StructOpt;

use crate::backend::BackendWithPause;
use crate::context::AppContext;
use crate::error::Result;
use crate::types::QueueName;

/// Pauses dequeuing on a queue; new jobs can still be enqueued.
#[derive(Debug, StructOpt)]
pub struct Args {
    pub queue: String,

    #[structopt(
        long = "for",
        help = "duration to pause for, e.g. '1h2m3s' (all components optional)",
        conflicts_with = "until"
    )]
    pub r#for: Option<String>,

    #[structopt(
        long,
        help = "ISO 8601 time at which the queue should reactivate, e.g. 2021-01-01T00:00:00+0000",
        required_unless = "for"
    )]
    pub until: Option<String>,
}

pub async fn main(args: Args, ctx: AppContext) -> Result<()> {
    let until = match (args.r#for, args.until) {
        (Some(duration), None) => parse_duration_to_time(&duration)?,
        (None, Some(time)) => parse_time(&time)?,
        _ => return Err(super::command_error("specify exactly one of --for or --until")),
    };

    if until < Utc::now() {
        return Err(super::command_error("refusing to pause until a time in the past"));
    }

    let queue = QueueName::from(args.queue);
    let backend_name = ctx.settings.backend_for_queue(&queue).to_string();
    let backend = crate::backend::build_with_pause(&backend_name, &ctx.settings, &queue).await?;

    backend.pause(&queue, until).await?;

    println!("Paused queue {} until {}.", queue, until.to_rfc3339());
    Ok(())
}

/// Parses `[<hours>h][<minutes>m][<seconds>s]` (each component optional, but
/// at least one must be present) into an absolute time relative to now.
fn parse_duration_to_time(spec: &str) -> Result<DateTime<Utc>> {
    let (hours, rest) = take_component(spec, 'h');
    let (minutes, rest) = take_component(rest, 'm');
    let (seconds, rest) = take_component(rest, 's');

    if !rest.is_empty() || (hours.is_none() && minutes.is_none() && seconds.is_none()) {
        return Err(super::command_error(format!(
            "unknown duration format '{}'. Try something like '1h2m3s'.",
            spec
        )));
    }

    let total_seconds = hours.unwrap_or(0) * 3600 + minutes.unwrap_or(0) * 60 + seconds.unwrap_or(0);
    Ok(Utc::now() + chrono::Duration::seconds(total_seconds as i64))
}

/// Strips a leading run of digits followed by `suffix` off `spec`, if
/// present, returning the parsed number and the remainder.
fn take_component(spec: &str, suffix: char) -> (Option<u64>, &str) {
    let digits: String = spec.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return (None, spec);
    }
    let rest = &spec[digits.len()..];
    match rest.strip_prefix(suffix) {
        Some(rest) => (digits.parse().ok(), rest),
        None => (None, spec),
    }
}

fn parse_time(spec: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(spec, "%Y-%m-%dT%H:%M:%S%z")
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| Utc.datetime_from_str(spec, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| super::command_error(format!("invalid time '{}': {}", spec, e)))
}
