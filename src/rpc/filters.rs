/// Start and end filters over an event sequence. An empty filter matches anything.
pub fn matches_start_end(events: &[String], start_event: &str, end_event: &str) -> bool {
    let start_ok = start_event.is_empty() || events.first().is_some_and(|e| e == start_event);
    let end_ok = end_event.is_empty() || events.last().is_some_and(|e| e == end_event);

    start_ok && end_ok
}

pub fn contains_event(events: &[String], event: &str) -> bool {
    events.iter().any(|e| e == event)
}

/// Element-wise equality with one of the candidate sequences.
pub fn matches_any(events: &[String], candidates: &[Vec<String>]) -> bool {
    candidates.iter().any(|candidate| candidate.as_slice() == events)
}
