//! Issue-order release of fetch completions.
//!
//! Every message fetch is tagged with a [`FetchTicket`] when it is issued.
//! Completions may come back in any order; the sequencer holds early arrivals
//! and releases them strictly in the order their fetches were issued.
//! Invalidating a channel bumps its generation, so anything still in flight
//! for it is dropped on arrival and no longer counts as in flight.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use parley_shared::types::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub channel: ChannelId,
    pub generation: u64,
    pub seq: u64,
}

#[derive(Debug)]
struct Lane<T> {
    generation: u64,
    next_issue: u64,
    next_apply: u64,
    ready: BTreeMap<u64, T>,
}

impl<T> Default for Lane<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            next_issue: 0,
            next_apply: 0,
            ready: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct FetchSequencer<T> {
    lanes: HashMap<ChannelId, Lane<T>>,
}

impl<T> Default for FetchSequencer<T> {
    fn default() -> Self {
        Self {
            lanes: HashMap::new(),
        }
    }
}

impl<T> FetchSequencer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, channel: ChannelId) -> FetchTicket {
        let lane = self.lanes.entry(channel).or_default();
        let ticket = FetchTicket {
            channel,
            generation: lane.generation,
            seq: lane.next_issue,
        };
        lane.next_issue += 1;
        ticket
    }

    /// Whether `ticket` still belongs to its channel's current generation.
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.lanes
            .get(&ticket.channel)
            .is_some_and(|lane| lane.generation == ticket.generation)
    }

    /// Record a completion and return every completion that can now be
    /// applied, in issue order. Stale tickets yield nothing.
    pub fn complete(&mut self, ticket: FetchTicket, value: T) -> Vec<(FetchTicket, T)> {
        let Some(lane) = self.lanes.get_mut(&ticket.channel) else {
            return Vec::new();
        };
        if lane.generation != ticket.generation || ticket.seq < lane.next_apply {
            debug!(
                channel = %ticket.channel,
                generation = ticket.generation,
                seq = ticket.seq,
                "Discarding stale fetch completion"
            );
            return Vec::new();
        }

        lane.ready.insert(ticket.seq, value);

        let mut released = Vec::new();
        while let Some(value) = lane.ready.remove(&lane.next_apply) {
            released.push((
                FetchTicket {
                    channel: ticket.channel,
                    generation: lane.generation,
                    seq: lane.next_apply,
                },
                value,
            ));
            lane.next_apply += 1;
        }
        released
    }

    /// Forget everything in flight for `channel`.
    pub fn invalidate(&mut self, channel: ChannelId) {
        if let Some(lane) = self.lanes.get_mut(&channel) {
            lane.generation += 1;
            lane.next_apply = lane.next_issue;
            lane.ready.clear();
        }
    }

    /// Fetches issued in the current generation that have not been applied.
    pub fn in_flight(&self, channel: ChannelId) -> u64 {
        self.lanes
            .get(&channel)
            .map(|lane| lane.next_issue - lane.next_apply)
            .unwrap_or(0)
    }
}
