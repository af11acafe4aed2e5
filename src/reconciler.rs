//! Merges the live stream, the durable store snapshot, and local drafts into
//! one ordered timeline.
//!
//! Matching happens in two passes. Messages whose ids are already durable
//! pair with the persisted copy carrying the same id. Local messages then
//! pair by expectation: the newest unmatched persisted message of the same
//! role with compatible content is taken to be the durable copy of the
//! newest local message. A candidate must be created no earlier than the
//! newest id-matched persisted message and strictly after the local
//! message's store horizon, so history that was already stored when the
//! local message was written never absorbs it. An empty local message only
//! pairs with an empty stored one. The resulting id swaps are reported as
//! [`Promotion`]s.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use agent_provider::Role;
use session_store::{DurableId, LocalId, Message, MessageId, Timestamp};
use tracing::{debug, warn};

/// Where a timeline entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Ephemeral message paired with its persisted copy.
    Merged,
    /// Ephemeral message with no durable counterpart yet.
    Ephemeral,
    Persisted,
    Draft,
}

impl MessageOrigin {
    fn is_ephemeral(self) -> bool {
        matches!(self, Self::Merged | Self::Ephemeral)
    }
}

/// Conflict between the live and the persisted copy of a message. Logged and
/// resolved in favour of the persisted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationAnomaly {
    RoleMismatch {
        message_id: String,
        ephemeral: Role,
        persisted: Role,
    },
}

/// A local id that now has a durable counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub local: LocalId,
    pub durable: DurableId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Timeline {
    pub messages: Vec<Message>,
    /// Parallel to `messages`.
    pub origins: Vec<MessageOrigin>,
    pub anomalies: Vec<ReconciliationAnomaly>,
    pub promotions: Vec<Promotion>,
}

impl Timeline {
    /// Messages that belong to the live session (merged or still local), in
    /// timeline order.
    pub fn ephemeral_subset(&self) -> Vec<Message> {
        self.messages
            .iter()
            .zip(&self.origins)
            .filter(|(_, origin)| origin.is_ephemeral())
            .map(|(message, _)| message.clone())
            .collect()
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|message| &message.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Total order of the timeline: creation time, then users before assistants,
/// then id.
pub fn timeline_order(left: &Message, right: &Message) -> Ordering {
    left.created_at
        .cmp(&right.created_at)
        .then_with(|| left.role.sort_rank().cmp(&right.role.sort_rank()))
        .then_with(|| left.id.as_str().cmp(right.id.as_str()))
}

/// Builds the canonical timeline. Pure and deterministic: the same inputs
/// always produce the same output.
pub fn merge(ephemeral: &[Message], persisted: &[Message], drafts: &[Message]) -> Timeline {
    let persisted_index: HashMap<&DurableId, usize> = persisted
        .iter()
        .enumerate()
        .filter_map(|(index, message)| message.id.durable().map(|id| (id, index)))
        .collect();

    let mut anomalies = Vec::new();
    let mut pairs: HashMap<usize, usize> = HashMap::new();
    let mut used: HashSet<usize> = HashSet::new();

    for (index, message) in ephemeral.iter().enumerate() {
        let Some(durable) = message.id.durable() else {
            continue;
        };
        if let Some(&persisted_at) = persisted_index.get(durable) {
            if used.insert(persisted_at) {
                pairs.insert(index, persisted_at);
            }
        }
    }

    let anchor = used
        .iter()
        .map(|&index| persisted[index].created_at)
        .max();
    let locals: Vec<usize> = (0..ephemeral.len())
        .filter(|index| !pairs.contains_key(index) && !ephemeral[*index].id.is_durable())
        .collect();

    let mut promotions = Vec::new();
    for (local, persisted_at) in match_by_expectation(ephemeral, &locals, persisted, &used, anchor) {
        used.insert(persisted_at);
        pairs.insert(local, persisted_at);
        if let (MessageId::Local(local_id), Some(durable)) =
            (&ephemeral[local].id, persisted[persisted_at].id.durable())
        {
            debug!(local = %local_id.as_str(), durable = %durable.as_str(), "local message matched durable copy");
            promotions.push(Promotion {
                local: local_id.clone(),
                durable: durable.clone(),
            });
        }
    }

    let mut entries: Vec<(Message, MessageOrigin)> = Vec::with_capacity(ephemeral.len() + persisted.len());
    let mut floor: Option<Timestamp> = None;
    for (index, message) in ephemeral.iter().enumerate() {
        match pairs.get(&index) {
            Some(&persisted_at) => {
                let merged = merge_pair(message, &persisted[persisted_at], &mut anomalies);
                floor = max_timestamp(floor, merged.created_at);
                entries.push((merged, MessageOrigin::Merged));
            }
            None => {
                let mut local = message.clone();
                clamp_after(&mut local, floor);
                entries.push((local, MessageOrigin::Ephemeral));
            }
        }
    }

    for (index, message) in persisted.iter().enumerate() {
        if !used.contains(&index) {
            entries.push((message.clone(), MessageOrigin::Persisted));
        }
    }

    let known_ids: HashSet<&str> = ephemeral
        .iter()
        .chain(persisted)
        .map(|message| message.id.as_str())
        .collect();
    let draft_locals: Vec<usize> = (0..drafts.len())
        .filter(|index| !known_ids.contains(drafts[*index].id.as_str()))
        .collect();
    let stored_drafts: HashSet<usize> = match_by_expectation(drafts, &draft_locals, persisted, &used, anchor)
        .into_iter()
        .map(|(draft, _)| draft)
        .collect();

    let mut floor = entries.iter().map(|(message, _)| message.created_at).max();
    for index in draft_locals {
        if stored_drafts.contains(&index) {
            debug!(message_id = %drafts[index].id, "draft already stored; dropping");
            continue;
        }
        let mut draft = drafts[index].clone();
        clamp_after(&mut draft, floor);
        floor = max_timestamp(floor, draft.created_at);
        entries.push((draft, MessageOrigin::Draft));
    }

    entries.sort_by(|(left, _), (right, _)| timeline_order(left, right));
    let (messages, origins) = entries.into_iter().unzip();
    Timeline {
        messages,
        origins,
        anomalies,
        promotions,
    }
}

/// Pairs local messages with unused persisted messages, newest first.
fn match_by_expectation(
    locals: &[Message],
    local_indices: &[usize],
    persisted: &[Message],
    used: &HashSet<usize>,
    anchor: Option<Timestamp>,
) -> Vec<(usize, usize)> {
    let mut candidates: Vec<usize> = (0..persisted.len())
        .filter(|index| !used.contains(index))
        .filter(|index| anchor.map_or(true, |anchor| persisted[*index].created_at >= anchor))
        .collect();
    candidates.sort_by(|left, right| timeline_order(&persisted[*right], &persisted[*left]));

    let mut ordered_locals = local_indices.to_vec();
    ordered_locals.sort_by(|left, right| timeline_order(&locals[*right], &locals[*left]));

    let mut taken: HashSet<usize> = HashSet::new();
    let mut matches = Vec::new();
    for local in ordered_locals {
        let message = &locals[local];
        let found = candidates.iter().copied().find(|candidate| {
            let stored = &persisted[*candidate];
            !taken.contains(candidate)
                && stored.role == message.role
                && message.store_horizon.map_or(true, |horizon| stored.created_at > horizon)
                && content_compatible(&message.content, &stored.content)
        });
        if let Some(candidate) = found {
            taken.insert(candidate);
            matches.push((local, candidate));
        }
    }
    matches
}

/// The stored copy may lag the live stream or run ahead of it.
fn content_compatible(local: &str, stored: &str) -> bool {
    if local.is_empty() {
        return stored.is_empty();
    }
    local.starts_with(stored) || stored.starts_with(local)
}

fn merge_pair(ephemeral: &Message, persisted: &Message, anomalies: &mut Vec<ReconciliationAnomaly>) -> Message {
    if ephemeral.role != persisted.role {
        warn!(
            message_id = %persisted.id,
            ephemeral = ephemeral.role.as_str(),
            persisted = persisted.role.as_str(),
            "role mismatch between live and stored message; keeping stored role"
        );
        anomalies.push(ReconciliationAnomaly::RoleMismatch {
            message_id: persisted.id.to_string(),
            ephemeral: ephemeral.role,
            persisted: persisted.role,
        });
    }

    Message {
        id: persisted.id.clone(),
        role: persisted.role,
        created_at: persisted.created_at,
        content: ephemeral.content.clone(),
        parts: ephemeral.parts.clone(),
        generation_state: ephemeral.generation_state,
        error: ephemeral.error.clone(),
        attachments: if ephemeral.attachments.is_empty() {
            persisted.attachments.clone()
        } else {
            ephemeral.attachments.clone()
        },
        model: ephemeral.model.clone().or_else(|| persisted.model.clone()),
        store_horizon: None,
    }
}

fn clamp_after(message: &mut Message, floor: Option<Timestamp>) {
    if let Some(floor) = floor {
        if message.created_at <= floor {
            message.created_at = floor.offset(1);
        }
    }
}

fn max_timestamp(current: Option<Timestamp>, candidate: Timestamp) -> Option<Timestamp> {
    Some(current.map_or(candidate, |current| current.max(candidate)))
}
