//! Reply Correlation Cascade
//!
//! The plugin side does not answer in one canonical shape: a direct client
//! answers `{id, result}`, the relay re-broadcasts `{id, message: {result}}`,
//! older plugin builds echo the whole envelope back. Every inbound frame is
//! therefore run through an ordered list of pure matchers, from strict to
//! permissive, against a snapshot of the pending table. The first matcher
//! that claims the frame wins.
//!
//! | order | strategy            | claims the frame when                                           |
//! |-------|---------------------|-----------------------------------------------------------------|
//! | 1     | `Direct`            | top-level `id` is pending and `result`/`error` are top-level     |
//! | 2     | `Nested`            | top-level `id` is pending and `message.result`/`message.error`   |
//! | 3     | `ReverseNested`     | `message.id` is pending and `message.result`/`message.error`     |
//! | 4     | `Adopted`           | an id is pending, no result anywhere, `message` is an object     |
//! | 5     | `Fuzzy`             | an inbound id and a pending id are substrings of one another    |
//! | 6     | `CommandInference`  | no id matched; payload shape names a pending command             |
//! | 7     | `MostRecent`        | no id matched; result-shaped data goes to the newest request    |
//!
//! Steps 4 to 7 are best-effort. Step 6 cannot tell apart two in-flight
//! calls of the same command and picks the most recently active one.

use super::envelope::PROGRESS_UPDATE_TYPE;
use super::error::TransportError;
use serde_json::Value;
use tokio::time::Instant;

/// Read-only view of one pending request handed to the matchers
#[derive(Debug, Clone, Copy)]
pub struct PendingView<'a> {
    pub id: &'a str,
    pub command: &'a str,
    pub last_activity: Instant,
}

/// Which matcher claimed a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Direct,
    Nested,
    ReverseNested,
    Adopted,
    Fuzzy,
    CommandInference,
    MostRecent,
}

impl MatchStrategy {
    /// Whether the strategy relied on guessing rather than an exact id
    pub fn is_heuristic(self) -> bool {
        matches!(
            self,
            Self::Adopted | Self::Fuzzy | Self::CommandInference | Self::MostRecent
        )
    }
}

/// A frame correlated to a pending request
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: String,
    pub strategy: MatchStrategy,
    pub outcome: Result<Value, TransportError>,
}

/// What to do with an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Progress notification; refresh the request's activity, never resolve
    Progress { id: Option<String> },
    /// Relay echo of one of our own outbound requests
    Echo,
    /// Late or repeated reply for a request that already settled
    Duplicate { id: String },
    /// Terminal reply for a pending request
    Reply(Match),
    /// Broadcast or anything no matcher could place
    Unmatched,
}

/// Pre-parsed accessors over a raw inbound frame
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub raw: &'a Value,
    pub top_id: Option<&'a str>,
    pub nested: Option<&'a Value>,
    pub nested_id: Option<&'a str>,
}

impl<'a> Frame<'a> {
    pub fn parse(raw: &'a Value) -> Self {
        let nested = raw.get("message").filter(|m| m.is_object());
        Self {
            raw,
            top_id: non_empty_str(raw, "id"),
            nested,
            nested_id: nested.and_then(|m| non_empty_str(m, "id")),
        }
    }

    fn is_progress(&self) -> bool {
        self.raw.get("type").and_then(|t| t.as_str()) == Some(PROGRESS_UPDATE_TYPE)
    }

    /// Relay broadcasts our own request back to us, marked `sender: "You"`
    fn is_request_echo(&self) -> bool {
        if self.raw.get("sender").and_then(|s| s.as_str()) == Some("You") {
            return true;
        }
        match self.nested {
            Some(message) => message.get("command").is_some() && outcome_of(message).is_none(),
            None => false,
        }
    }

    fn ids(&self) -> impl Iterator<Item = &'a str> {
        self.top_id.into_iter().chain(self.nested_id)
    }

    fn has_result_data(&self) -> bool {
        self.outcome().is_some()
    }

    /// Best guess at the payload a reply carries
    fn payload(&self) -> &'a Value {
        if let Some(result) = self.raw.get("result") {
            return result;
        }
        match self.nested {
            Some(message) => message.get("result").unwrap_or(message),
            None => self.raw,
        }
    }

    /// Result or error found at the top level, then inside `message`
    fn outcome(&self) -> Option<Result<Value, TransportError>> {
        outcome_of(self.raw).or_else(|| self.nested.and_then(outcome_of))
    }
}

/// A matcher tries to place a frame against the pending snapshot
pub type Matcher = fn(&Frame<'_>, &[PendingView<'_>]) -> Option<Match>;

/// The cascade, strictest first
pub const CASCADE: &[Matcher] = &[
    match_direct,
    match_nested,
    match_reverse_nested,
    match_adopted,
    match_fuzzy,
    match_command_inference,
    match_most_recent,
];

/// Classify an inbound frame against the pending table
///
/// `is_settled` reports ids that were resolved or rejected recently; replies
/// bearing them are dropped instead of reaching the permissive matchers.
pub fn classify(
    raw: &Value,
    pending: &[PendingView<'_>],
    is_settled: impl Fn(&str) -> bool,
) -> Classification {
    let frame = Frame::parse(raw);

    if frame.is_progress() {
        return Classification::Progress {
            id: frame.ids().next().map(str::to_string),
        };
    }

    if frame.is_request_echo() {
        return Classification::Echo;
    }

    if let Some(id) = frame
        .ids()
        .find(|id| !is_pending(id, pending) && is_settled(*id))
    {
        return Classification::Duplicate { id: id.to_string() };
    }

    CASCADE
        .iter()
        .find_map(|matcher| matcher(&frame, pending))
        .map(Classification::Reply)
        .unwrap_or(Classification::Unmatched)
}

/// Top-level id + top-level result/error
pub fn match_direct(frame: &Frame<'_>, pending: &[PendingView<'_>]) -> Option<Match> {
    let id = frame.top_id.filter(|id| is_pending(id, pending))?;
    let outcome = outcome_of(frame.raw)?;
    Some(found(id, MatchStrategy::Direct, outcome))
}

/// Top-level id + result/error nested under `message`
pub fn match_nested(frame: &Frame<'_>, pending: &[PendingView<'_>]) -> Option<Match> {
    let id = frame.top_id.filter(|id| is_pending(id, pending))?;
    let outcome = outcome_of(frame.nested?)?;
    Some(found(id, MatchStrategy::Nested, outcome))
}

/// `message` carries both the id and the result (echoed envelope)
pub fn match_reverse_nested(frame: &Frame<'_>, pending: &[PendingView<'_>]) -> Option<Match> {
    let id = frame.nested_id.filter(|id| is_pending(id, pending))?;
    let outcome = outcome_of(frame.nested?)?;
    Some(found(id, MatchStrategy::ReverseNested, outcome))
}

/// A known id with no result field anywhere: take the whole message body
pub fn match_adopted(frame: &Frame<'_>, pending: &[PendingView<'_>]) -> Option<Match> {
    let id = frame.ids().find(|id| is_pending(id, pending))?;
    if frame.outcome().is_some() {
        return None;
    }
    let body = frame.nested?;
    Some(found(id, MatchStrategy::Adopted, Ok(body.clone())))
}

/// Inbound id and a pending id contain one another
pub fn match_fuzzy(frame: &Frame<'_>, pending: &[PendingView<'_>]) -> Option<Match> {
    let outcome = match frame.outcome() {
        Some(outcome) => outcome,
        None => Ok(frame.nested?.clone()),
    };

    let target = frame
        .ids()
        .filter_map(|inbound| {
            most_recent(
                pending
                    .iter()
                    .filter(|p| p.id.contains(inbound) || inbound.contains(p.id)),
            )
        })
        .max_by_key(|p| p.last_activity)?;

    Some(found(target.id, MatchStrategy::Fuzzy, outcome))
}

/// No usable id: infer the command from the payload shape
pub fn match_command_inference(frame: &Frame<'_>, pending: &[PendingView<'_>]) -> Option<Match> {
    if frame.ids().any(|id| is_pending(id, pending)) {
        return None;
    }

    let command = infer_command(frame.payload())?;
    let target = most_recent(
        pending
            .iter()
            .filter(|p| p.command == command || p.id.contains(command)),
    )?;

    Some(found(
        target.id,
        MatchStrategy::CommandInference,
        frame_outcome(frame),
    ))
}

/// Last resort: result-shaped data goes to the most recently active request
pub fn match_most_recent(frame: &Frame<'_>, pending: &[PendingView<'_>]) -> Option<Match> {
    if frame.ids().any(|id| is_pending(id, pending)) {
        return None;
    }
    if !frame.has_result_data() && infer_command(frame.payload()).is_none() {
        return None;
    }

    let target = most_recent(pending.iter())?;
    Some(found(
        target.id,
        MatchStrategy::MostRecent,
        frame_outcome(frame),
    ))
}

/// Guess which command produced a payload from its shape
pub fn infer_command(payload: &Value) -> Option<&'static str> {
    let obj = payload.as_object()?;
    let node_type = obj.get("type").and_then(|t| t.as_str());

    if obj.get("children").is_some_and(|c| c.is_array())
        && (matches!(node_type, Some("PAGE") | Some("DOCUMENT"))
            || obj.contains_key("currentPage")
            || obj.contains_key("pages"))
    {
        return Some("get_document_info");
    }
    if obj.contains_key("selectionCount") || obj.get("selection").is_some_and(|s| s.is_array()) {
        return Some("get_selection");
    }
    if obj.contains_key("colors") && (obj.contains_key("texts") || obj.contains_key("effects")) {
        return Some("get_styles");
    }
    if obj.get("components").is_some_and(|c| c.is_array()) {
        return Some("get_local_components");
    }
    if obj.contains_key("textNodes") {
        return Some("scan_text_nodes");
    }
    if obj.contains_key("imageData") && obj.contains_key("mimeType") {
        return Some("export_node_as_image");
    }
    if obj.get("annotations").is_some_and(|a| a.is_array()) {
        return Some("get_annotations");
    }
    if obj.contains_key("id") && node_type.is_some() && obj.contains_key("absoluteBoundingBox") {
        return Some("get_node_info");
    }
    None
}

/// Result/error fields of an object, if it has any
///
/// A non-null `error` wins over `result`.
pub fn outcome_of(obj: &Value) -> Option<Result<Value, TransportError>> {
    match obj.get("error") {
        Some(error) if !error.is_null() && error != &Value::Bool(false) => {
            Some(Err(TransportError::peer(error)))
        }
        _ => obj.get("result").map(|result| Ok(result.clone())),
    }
}

fn frame_outcome(frame: &Frame<'_>) -> Result<Value, TransportError> {
    frame
        .outcome()
        .unwrap_or_else(|| Ok(frame.payload().clone()))
}

fn found(id: &str, strategy: MatchStrategy, outcome: Result<Value, TransportError>) -> Match {
    Match {
        id: id.to_string(),
        strategy,
        outcome,
    }
}

fn is_pending(id: &str, pending: &[PendingView<'_>]) -> bool {
    pending.iter().any(|p| p.id == id)
}

fn most_recent<'p, 'a: 'p>(
    candidates: impl Iterator<Item = &'p PendingView<'a>>,
) -> Option<&'p PendingView<'a>> {
    candidates.max_by_key(|p| p.last_activity)
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
#[path = "matcher_test.rs"]
mod matcher_test;
