use relay_contracts::{Decision, Request, Status, QUESTION_TOOL};

/// Fallback keys for prompts that offered no numbered choices.
const FALLBACK_ALLOW: &str = "1";
const FALLBACK_DENY: &str = "3";

/// Substrings (lowercase) that mark the "don't ask again" option.
const SKIP_MARKERS: &[&str] = &["don't ask", "don\u{2019}t ask", "always", "省略"];

/// Maps a coarse decision onto the choice key sent back to the producer.
///
/// The first choice is the plain "yes", the last one is the refusal, and
/// `AllowAll` prefers a choice that suppresses future prompts.
pub fn resolve_action(request: &Request, decision: Decision) -> String {
    let Some(first) = request.choices.first() else {
        return match decision {
            Decision::Deny => FALLBACK_DENY,
            Decision::Allow | Decision::AllowAll => FALLBACK_ALLOW,
        }
        .to_string();
    };

    let chosen = match decision {
        Decision::Allow => first,
        Decision::AllowAll => request
            .choices
            .iter()
            .find(|c| is_skip_choice(&c.text))
            .unwrap_or(first),
        Decision::Deny => request.last_choice().unwrap_or(first),
    };
    chosen.number.to_string()
}

pub fn is_skip_choice(text: &str) -> bool {
    let lower = text.to_lowercase();
    SKIP_MARKERS.iter().any(|m| lower.contains(m))
}

/// Status implied by picking choice `number` directly.
///
/// A lone choice is never treated as the refusal, so that `allow` resolves
/// and re-derives consistently.
pub fn status_for_choice(request: &Request, number: u8) -> Status {
    if request.tool_name == QUESTION_TOOL {
        return Status::Allow;
    }
    match request.last_choice() {
        Some(last) if request.choices.len() > 1 && last.number == number => Status::Deny,
        _ => Status::Allow,
    }
}
