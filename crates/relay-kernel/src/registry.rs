use std::collections::HashSet;
use std::sync::Arc;

use relay_contracts::{Choice, Decision, Request, Status, Verdict};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::ids::IdGenerator;
use crate::notify::{Change, ChangeSink};
use crate::resolve::{resolve_action, status_for_choice};

pub const CAPACITY: usize = 8;
pub const MAX_CHOICES: usize = 8;

pub const TOOL_NAME_MAX_BYTES: usize = 63;
pub const SUBTITLE_MAX_BYTES: usize = 63;
pub const MESSAGE_MAX_BYTES: usize = 511;
pub const KEY_MAX_BYTES: usize = 63;
pub const ORIGIN_MAX_BYTES: usize = 63;
pub const CHOICE_TEXT_MAX_BYTES: usize = 31;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("request {id} not found")]
    NotFound { id: String },
    #[error("request {id} already decided: {}", .status.as_str())]
    AlreadyDecided { id: String, status: Status },
    #[error("choice {number} is not offered by request {id}")]
    InvalidChoice { id: String, number: u8 },
    #[error("malformed choices: {0}")]
    MalformedChoices(String),
    #[error("request store has no slots")]
    StoreFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub pending_timeout_ms: u64,
    pub retention_ms: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            pending_timeout_ms: 120 * 1000,
            retention_ms: 5 * 60 * 1000,
        }
    }
}

/// Producer input for [`Registry::create`]. Free text is truncated, not rejected.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub tool_name: String,
    pub message: String,
    pub subtitle: String,
    pub choices: Vec<Choice>,
    pub correlation_key: Option<String>,
    pub origin_label: Option<String>,
    /// Overrides the policy's pending timeout for this record.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Created {
    pub request: Request,
    /// Pending records from the same correlation key that were cancelled.
    pub superseded: Vec<String>,
    /// Pending record dropped because every slot held a pending record.
    pub evicted: Option<String>,
}

struct Slot {
    request: Request,
    seq: u64,
}

/// Fixed-capacity table of approval requests.
///
/// Every method runs to completion without blocking; the owner serialises
/// access (the server keeps it behind a single mutex). Callers only ever
/// receive cloned snapshots.
pub struct Registry {
    slots: Vec<Option<Slot>>,
    policy: Policy,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    sink: Arc<dyn ChangeSink>,
    next_seq: u64,
    last_now: u64,
    evictions: u64,
}

impl Registry {
    pub fn new(
        policy: Policy,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        sink: Arc<dyn ChangeSink>,
    ) -> Self {
        Self {
            slots: (0..CAPACITY).map(|_| None).collect(),
            policy,
            clock,
            ids,
            sink,
            next_seq: 0,
            last_now: 0,
            evictions: 0,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Current time, clamped so it never runs backwards.
    pub fn now(&mut self) -> u64 {
        let t = self.clock.now_ms();
        if t > self.last_now {
            self.last_now = t;
        }
        self.last_now
    }

    pub fn create(&mut self, new: NewRequest) -> Result<Created, RegistryError> {
        let choices = normalize_choices(new.choices)?;
        let correlation_key = non_empty(new.correlation_key, KEY_MAX_BYTES);
        let origin_label = non_empty(new.origin_label, ORIGIN_MAX_BYTES);
        let id = self.fresh_id();
        let now = self.now();

        self.expire_stale_at(now);
        let superseded = match &correlation_key {
            Some(key) => self.supersede(key, now),
            None => Vec::new(),
        };
        let (index, evicted) = self.admit()?;

        let timeout = new
            .timeout_ms
            .filter(|t| *t > 0)
            .unwrap_or(self.policy.pending_timeout_ms);
        let request = Request {
            id: id.clone(),
            tool_name: truncate(&new.tool_name, TOOL_NAME_MAX_BYTES),
            message: truncate(&new.message, MESSAGE_MAX_BYTES),
            subtitle: truncate(&new.subtitle, SUBTITLE_MAX_BYTES),
            choices,
            correlation_key,
            origin_label,
            created_at: now,
            expires_at: now.saturating_add(timeout),
            status: Status::Pending,
            decided_at: None,
            resolved_action: None,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots[index] = Some(Slot {
            request: request.clone(),
            seq,
        });

        info!(
            request_id = %id,
            tool = %request.tool_name,
            correlation_key = request.correlation_key.as_deref().unwrap_or(""),
            superseded = superseded.len(),
            "request created"
        );
        self.sink.publish(Change::Created { id });
        Ok(Created {
            request,
            superseded,
            evicted,
        })
    }

    pub fn get(&mut self, id: &str) -> Result<Request, RegistryError> {
        let now = self.now();
        let index = self.locate(id, now)?;
        self.request_at(index, id).cloned()
    }

    pub fn respond(&mut self, id: &str, verdict: Verdict) -> Result<Request, RegistryError> {
        self.transition(id, |_| Ok((verdict.into(), None)))
    }

    pub fn cancel(&mut self, id: &str) -> Result<Request, RegistryError> {
        self.respond(id, Verdict::Cancelled)
    }

    /// Resolves the downstream key for `decision` and commits it together
    /// with the status.
    pub fn decide(&mut self, id: &str, decision: Decision) -> Result<Request, RegistryError> {
        self.transition(id, |request| {
            Ok((decision.status(), Some(resolve_action(request, decision))))
        })
    }

    /// Responds with an offered choice number.
    pub fn choose(&mut self, id: &str, number: u8) -> Result<Request, RegistryError> {
        self.transition(id, |request| {
            if !request.choices.iter().any(|c| c.number == number) {
                return Err(RegistryError::InvalidChoice {
                    id: request.id.clone(),
                    number,
                });
            }
            Ok((status_for_choice(request, number), Some(number.to_string())))
        })
    }

    /// Live records, most recent first.
    pub fn list(&mut self) -> Vec<Request> {
        let now = self.now();
        self.cleanup_at(now);
        self.expire_stale_at(now);

        let mut live: Vec<&Slot> = self.slots.iter().flatten().collect();
        live.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        live.into_iter().map(|s| s.request.clone()).collect()
    }

    /// Expires every stale pending record. Returns how many changed.
    pub fn expire_stale(&mut self) -> usize {
        let now = self.now();
        self.expire_stale_at(now)
    }

    /// Frees every slot older than the retention window. Returns how many.
    pub fn cleanup(&mut self) -> usize {
        let now = self.now();
        self.cleanup_at(now)
    }

    pub fn pending_count(&mut self) -> usize {
        let now = self.now();
        self.expire_stale_at(now);
        self.live().filter(|r| r.is_pending()).count()
    }

    pub fn has_pending(&mut self, correlation_key: &str) -> bool {
        let now = self.now();
        self.expire_stale_at(now);
        self.live()
            .any(|r| r.is_pending() && r.correlation_key.as_deref() == Some(correlation_key))
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending records dropped for lack of space since startup.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn live(&self) -> impl Iterator<Item = &Request> {
        self.slots.iter().flatten().map(|s| &s.request)
    }

    fn fresh_id(&self) -> String {
        let id = self.ids.next_id();
        assert!(
            !self.live().any(|r| r.id == id),
            "id generator returned live id {id}"
        );
        id
    }

    fn transition<F>(&mut self, id: &str, decide: F) -> Result<Request, RegistryError>
    where
        F: FnOnce(&Request) -> Result<(Status, Option<String>), RegistryError>,
    {
        let now = self.now();
        let index = self.locate(id, now)?;
        let current = self.request_at(index, id)?;
        if current.status.is_terminal() {
            return Err(RegistryError::AlreadyDecided {
                id: id.to_string(),
                status: current.status,
            });
        }
        let (status, action) = decide(current)?;

        let request = self.request_at_mut(index, id)?;
        request.status = status;
        request.decided_at = Some(now);
        request.resolved_action = action;
        let snapshot = request.clone();

        info!(
            request_id = %id,
            status = status.as_str(),
            action = snapshot.resolved_action.as_deref().unwrap_or(""),
            "request decided"
        );
        self.sink.publish(Change::Decided {
            id: id.to_string(),
            status,
        });
        Ok(snapshot)
    }

    /// Slot index of a live record, after applying retention and expiry to it.
    fn locate(&mut self, id: &str, now: u64) -> Result<usize, RegistryError> {
        self.cleanup_at(now);
        let index = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.request.id == id))
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
        let request = self.request_at_mut(index, id)?;
        if expire_if_stale(request, now) {
            debug!(request_id = %id, "request expired");
            self.sink.publish(Change::Expired { id: id.to_string() });
        }
        Ok(index)
    }

    fn request_at(&self, index: usize, id: &str) -> Result<&Request, RegistryError> {
        self.slots
            .get(index)
            .and_then(|s| s.as_ref())
            .map(|s| &s.request)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    fn request_at_mut(&mut self, index: usize, id: &str) -> Result<&mut Request, RegistryError> {
        self.slots
            .get_mut(index)
            .and_then(|s| s.as_mut())
            .map(|s| &mut s.request)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    fn supersede(&mut self, key: &str, now: u64) -> Vec<String> {
        let mut cancelled = Vec::new();
        for slot in self.slots.iter_mut().flatten() {
            let r = &mut slot.request;
            if r.is_pending() && r.correlation_key.as_deref() == Some(key) {
                r.status = Status::Cancelled;
                r.decided_at = Some(now);
                info!(request_id = %r.id, correlation_key = key, "request superseded");
                cancelled.push(r.id.clone());
            }
        }
        for id in &cancelled {
            self.sink.publish(Change::Superseded { id: id.clone() });
        }
        cancelled
    }

    /// Picks the slot for a new record: free, else oldest decided, else
    /// oldest overall. Returns the id of a pending record it had to drop.
    fn admit(&mut self) -> Result<(usize, Option<String>), RegistryError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .or_else(|| self.oldest(|r| r.status.is_terminal()))
            .or_else(|| self.oldest(|_| true))
            .ok_or(RegistryError::StoreFull)?;

        let Some(previous) = self.slots[index].take() else {
            return Ok((index, None));
        };
        let old = previous.request;
        if old.is_pending() {
            self.evictions += 1;
            warn!(
                request_id = %old.id,
                evictions = self.evictions,
                "request store full, dropping oldest pending request"
            );
            self.sink.publish(Change::Evicted { id: old.id.clone() });
            Ok((index, Some(old.id)))
        } else {
            debug!(request_id = %old.id, "reclaimed decided request slot");
            self.sink.publish(Change::Removed { id: old.id });
            Ok((index, None))
        }
    }

    fn oldest<P>(&self, pred: P) -> Option<usize>
    where
        P: Fn(&Request) -> bool,
    {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
            .filter(|(_, s)| pred(&s.request))
            .min_by_key(|(_, s)| (s.request.created_at, s.seq))
            .map(|(i, _)| i)
    }

    fn expire_stale_at(&mut self, now: u64) -> usize {
        let mut expired = Vec::new();
        for slot in self.slots.iter_mut().flatten() {
            if expire_if_stale(&mut slot.request, now) {
                expired.push(slot.request.id.clone());
            }
        }
        for id in &expired {
            debug!(request_id = %id, "request expired");
            self.sink.publish(Change::Expired { id: id.clone() });
        }
        expired.len()
    }

    fn cleanup_at(&mut self, now: u64) -> usize {
        let retention = self.policy.retention_ms;
        let mut removed = Vec::new();
        for slot in self.slots.iter_mut() {
            let stale = slot
                .as_ref()
                .is_some_and(|s| now.saturating_sub(s.request.created_at) > retention);
            if stale {
                if let Some(s) = slot.take() {
                    removed.push(s.request.id);
                }
            }
        }
        for id in &removed {
            info!(request_id = %id, "request cleaned up");
            self.sink.publish(Change::Removed { id: id.clone() });
        }
        removed.len()
    }
}

/// Pending past its deadline becomes `expired`. Returns true if it changed.
fn expire_if_stale(request: &mut Request, now: u64) -> bool {
    if request.is_pending() && now > request.expires_at {
        request.status = Status::Expired;
        request.decided_at = Some(now);
        return true;
    }
    false
}

fn normalize_choices(choices: Vec<Choice>) -> Result<Vec<Choice>, RegistryError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(choices.len().min(MAX_CHOICES));
    for choice in choices.into_iter().take(MAX_CHOICES) {
        if choice.number == 0 {
            return Err(RegistryError::MalformedChoices(
                "choice numbers must be positive".to_string(),
            ));
        }
        if !seen.insert(choice.number) {
            return Err(RegistryError::MalformedChoices(format!(
                "duplicate choice number {}",
                choice.number
            )));
        }
        out.push(Choice {
            number: choice.number,
            text: truncate(&choice.text, CHOICE_TEXT_MAX_BYTES),
        });
    }
    Ok(out)
}

fn non_empty(value: Option<String>, max_bytes: usize) -> Option<String> {
    value
        .map(|v| truncate(&v, max_bytes))
        .filter(|v| !v.is_empty())
}

/// Cuts `value` to at most `max_bytes`, backing off to a char boundary.
pub fn truncate(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
