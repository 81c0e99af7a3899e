//! Validated flat event arrays
//!
//! A [`Timeline`] owns its events and the guard-start -> guard-end table,
//! computed once at construction with a depth-counting stack. The player
//! looks matches up instead of scanning forward on every guard.

use crate::event::{EventKind, TimedEvent};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    events: Vec<TimedEvent>,
    /// `guard_ends[i]` is the matching guard-end index for a guard-start at `i`
    guard_ends: Vec<Option<usize>>,
    stray_ends: Vec<usize>,
}

impl Timeline {
    pub fn new(events: Vec<TimedEvent>) -> Self {
        let mut guard_ends = vec![None; events.len()];
        let mut stray_ends = Vec::new();
        let mut open: Vec<usize> = Vec::new();

        for (i, event) in events.iter().enumerate() {
            match event.kind {
                EventKind::GuardStart(_) => open.push(i),
                EventKind::GuardEnd => match open.pop() {
                    Some(start) => guard_ends[start] = Some(i),
                    None => stray_ends.push(i),
                },
                _ => {}
            }
        }

        Self {
            events,
            guard_ends,
            stray_ends,
        }
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimedEvent> {
        self.events.iter()
    }

    /// Index of the guard-end matching the guard-start at `start`
    pub fn guard_end(&self, start: usize) -> Option<usize> {
        self.guard_ends.get(start).copied().flatten()
    }

    /// Guard-starts without a matching guard-end
    pub fn unmatched_starts(&self) -> Vec<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                matches!(e.kind, EventKind::GuardStart(_)) && self.guard_ends[*i].is_none()
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Guard-ends that close nothing
    pub fn stray_ends(&self) -> &[usize] {
        &self.stray_ends
    }

    pub fn is_balanced(&self) -> bool {
        self.stray_ends.is_empty() && self.unmatched_starts().is_empty()
    }

    /// Timestamp of the last event, 0 when empty
    pub fn end_time(&self) -> f64 {
        self.events.last().map(|e| e.t).unwrap_or(0.0)
    }

    /// First index whose timestamp goes backwards, if any
    pub fn first_out_of_order(&self) -> Option<usize> {
        self.events
            .windows(2)
            .position(|w| w[1].t < w[0].t)
            .map(|i| i + 1)
    }

    /// First top-level event that needs a condition evaluator
    pub fn first_evaluator_use(&self) -> Option<(usize, &'static str)> {
        self.events
            .iter()
            .position(|e| e.kind.needs_evaluator())
            .map(|i| (i, self.events[i].kind.name()))
    }
}

impl From<Vec<TimedEvent>> for Timeline {
    fn from(events: Vec<TimedEvent>) -> Self {
        Self::new(events)
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a TimedEvent;
    type IntoIter = std::slice::Iter<'a, TimedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl Serialize for Timeline {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.events.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Timeline {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Vec::<TimedEvent>::deserialize(d).map(Timeline::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TextCondition;

    fn start(t: f64) -> TimedEvent {
        TimedEvent::new(EventKind::GuardStart(TextCondition::new(["x"])), t)
    }

    fn end(t: f64) -> TimedEvent {
        TimedEvent::new(EventKind::GuardEnd, t)
    }

    fn key(t: f64) -> TimedEvent {
        TimedEvent::new(EventKind::KeyPress { key: "a".into() }, t)
    }

    #[test]
    fn nested_guards_match_by_depth() {
        // 0:start 1:start 2:key 3:end 4:key 5:end
        let tl = Timeline::new(vec![start(0.0), start(0.0), key(0.1), end(0.1), key(0.2), end(0.2)]);
        assert_eq!(tl.guard_end(0), Some(5));
        assert_eq!(tl.guard_end(1), Some(3));
        assert_eq!(tl.guard_end(2), None);
        assert!(tl.is_balanced());
    }

    #[test]
    fn unmatched_and_stray_guards_are_reported() {
        let tl = Timeline::new(vec![end(0.0), start(0.0), key(0.1)]);
        assert_eq!(tl.stray_ends(), &[0]);
        assert_eq!(tl.unmatched_starts(), vec![1]);
        assert_eq!(tl.guard_end(1), None);
        assert!(!tl.is_balanced());
    }

    #[test]
    fn out_of_order_timestamps_are_located() {
        let tl = Timeline::new(vec![key(0.0), key(0.5), key(0.2)]);
        assert_eq!(tl.first_out_of_order(), Some(2));
        assert_eq!(tl.end_time(), 0.2);
        assert_eq!(Timeline::default().end_time(), 0.0);
    }

    #[test]
    fn evaluator_use_is_detected() {
        let tl = Timeline::new(vec![key(0.0), start(0.1), end(0.1)]);
        assert_eq!(tl.first_evaluator_use(), Some((1, "guard_start")));
        assert_eq!(Timeline::new(vec![key(0.0)]).first_evaluator_use(), None);
    }
}
