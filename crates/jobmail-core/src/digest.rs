//! Digest rendering.
//!
//! Turns one drained batch of [`JobEvent`]s into a deterministic report:
//! events are sorted by `(nodename, time)`, grouped per node, and rendered as
//!
//! ```text
//! gpu01:
//! 3: SUCCESS: /data/project/Refine3D/job003
//!
//! gpu02:
//! 10: FAILURE: /data/project/Class2D/job010
//! ```
//!
//! This is a pure transform; no I/O happens here.

use tracing::debug;

use crate::event::JobEvent;

/// Default subject prefix for digest mails.
pub const DEFAULT_SUBJECT_PREFIX: &str = "[relion-emailer]";

/// A rendered digest ready to hand to a mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    /// Number of events in the batch
    pub event_count: usize,
}

/// All events reported by one node, in `time` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroup<'a> {
    pub nodename: &'a str,
    pub events: Vec<&'a JobEvent>,
}

/// Builds digests from drained event batches.
#[derive(Debug, Clone)]
pub struct DigestBuilder {
    subject_prefix: String,
}

impl Default for DigestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECT_PREFIX)
    }
}

impl DigestBuilder {
    pub fn new(subject_prefix: impl Into<String>) -> Self {
        Self {
            subject_prefix: subject_prefix.into(),
        }
    }

    /// Renders a digest, or `None` when there is nothing to report.
    pub fn build(&self, events: &[JobEvent]) -> Option<Digest> {
        if events.is_empty() {
            return None;
        }

        let sections: Vec<String> = group_by_node(events)
            .iter()
            .map(render_section)
            .collect();

        debug!(
            events = events.len(),
            nodes = sections.len(),
            "Rendered digest"
        );

        Some(Digest {
            subject: format!("{} {} jobs finished", self.subject_prefix, events.len()),
            body: sections.join("\n"),
            event_count: events.len(),
        })
    }
}

/// Sorts events by `(nodename, time)` and groups them per node.
///
/// The sort is stable, so events with equal node and time keep their
/// drain order.
pub fn group_by_node(events: &[JobEvent]) -> Vec<NodeGroup<'_>> {
    let mut sorted: Vec<&JobEvent> = events.iter().collect();
    sorted.sort_by(|a, b| (a.nodename(), a.time()).cmp(&(b.nodename(), b.time())));

    let mut groups: Vec<NodeGroup<'_>> = Vec::new();
    for event in sorted {
        match groups.last_mut() {
            Some(group) if group.nodename == event.nodename() => group.events.push(event),
            _ => groups.push(NodeGroup {
                nodename: event.nodename(),
                events: vec![event],
            }),
        }
    }
    groups
}

/// Renders one event as `"{job_number}: {status}: {job_dir}"`.
pub fn render_line(event: &JobEvent) -> String {
    format!(
        "{}: {}: {}",
        event.job_number(),
        event.status(),
        event.job_dir()
    )
}

fn render_section(group: &NodeGroup<'_>) -> String {
    let lines: Vec<String> = group.events.iter().map(|e| render_line(e)).collect();
    format!("{}:\n{}\n", group.nodename, lines.join("\n"))
}
