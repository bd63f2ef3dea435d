//! Human-readable summaries of queue state
//!
//! Everything here is pure formatting. Name resolution falls back from the
//! live directory to the last cached name to the raw identifier, so no
//! function in this module can fail.

use crate::lobby::directory::Directory;
use crate::lobby::inactivity::InactivityTracker;
use crate::queue::{Queue, QueueRegistry};
use crate::types::ParticipantId;
use crate::utils::pad_centred;

const NAME_WIDTH: usize = 11;
const BORDER_LENGTH: usize = 20;
const EMPTY_QUEUE: &str = "dead game";

pub const WARNING_EMOJI: &str = "\u{26a0}";
pub const CROSS_EMOJI: &str = "\u{274c}";

/// Best available display name for a participant
pub fn resolve_name(
    directory: &dyn Directory,
    tracker: &InactivityTracker,
    participant: &str,
) -> String {
    directory
        .resolve_display_name(participant)
        .or_else(|| tracker.last_name(participant).map(str::to_string))
        .unwrap_or_else(|| participant.to_string())
}

/// Transport mention syntax for a participant
pub fn mention(participant: &str) -> String {
    format!("<@{}>", participant)
}

pub fn mentions(participants: &[ParticipantId]) -> String {
    participants
        .iter()
        .map(|p| mention(p))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `" 3/8  |    ctf    | Alice, Bob, Carol"`
pub fn queue_line(queue: &Queue, resolve: &dyn Fn(&str) -> String) -> String {
    let names = if queue.is_empty() {
        EMPTY_QUEUE.to_string()
    } else {
        queue
            .members()
            .iter()
            .map(|member| resolve(member))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "{:>2}/{:<2} |{}| {}",
        queue.len(),
        queue.required(),
        pad_centred(queue.name(), NAME_WIDTH),
        names
    )
}

/// Every queue, fullest first, inside a code block
pub fn full_status(registry: &QueueRegistry, resolve: &dyn Fn(&str) -> String) -> Vec<String> {
    let mut lines = vec!["```".to_string()];
    lines.extend(
        registry
            .snapshot_ordered_by_fullness()
            .into_iter()
            .map(|queue| queue_line(queue, resolve)),
    );
    lines.push("```".to_string());
    lines
}

/// `"ctf [3/8] - duel [1/2] - ffa [0/6]"`
pub fn brief_status(registry: &QueueRegistry) -> String {
    registry
        .snapshot_ordered_by_fullness()
        .into_iter()
        .map(|queue| format!("{} [{}/{}]", queue.name(), queue.len(), queue.required()))
        .collect::<Vec<_>>()
        .join(" - ")
}

/// Frame `lines` with a row of emoji above and below
pub fn emoji_border(emoji: &str, lines: Vec<String>) -> Vec<String> {
    let border = emoji.repeat(BORDER_LENGTH);
    let mut framed = Vec::with_capacity(lines.len() + 2);
    framed.push(border.clone());
    framed.extend(lines);
    framed.push(border);
    framed
}

pub fn formed_announcement(emoji: &str, members: &[ParticipantId]) -> Vec<String> {
    emoji_border(
        emoji,
        vec!["PLEASE HAVE A GOOD GAME".to_string(), mentions(members)],
    )
}

pub fn afk_warning(candidates: &[ParticipantId]) -> Vec<String> {
    emoji_border(
        WARNING_EMOJI,
        vec![
            "Some people are AFK! Say something so we can start the game".to_string(),
            mentions(candidates),
        ],
    )
}

pub fn aborted_announcement(candidates: &[ParticipantId], brief: String) -> Vec<String> {
    emoji_border(
        CROSS_EMOJI,
        vec![
            format!(
                "{} didn't respond, the game was called off",
                mentions(candidates)
            ),
            brief,
        ],
    )
}

/// Pickup channel title reflecting the default queue
pub fn channel_title(queue: &Queue) -> String {
    format!(
        "\u{1f93c}pickup\u{ff3b}{}\u{ff89}{}\u{ff3d}",
        queue.len(),
        queue.required()
    )
}
