//! Telemetry event catalog and the in-memory ring shared by firmware and host.
//!
//! Anomalies the rear node recovers from on its own (dropped requests, silent
//! peers, exhausted neutral searches) never surface as errors. They are
//! recorded here instead, with compact numeric codes so the firmware can
//! forward them over its log transport and the emulator can print them.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::Ticks;
use crate::failsafe::{FailsafeEvent, Peer};
use crate::gear::Approach;
use crate::sequencer::SequenceKind;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Scheduler ticks (10 ms each) since the node started.
pub type Timestamp = u32;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    SequenceStarted(SequenceKind),
    SequenceComplete(SequenceKind),
    /// A request arrived while another sequence was in flight.
    RequestDropped(SequenceKind),
    NeutralAttempt(Approach),
    NeutralFound,
    NeutralSearchExhausted,
    PeerTripped(Peer),
    ReceiverRearmed(Peer),
    PeerRecovered(Peer),
    MailboxExhausted(Peer),
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::SequenceStarted(kind) => write!(f, "sequence-started {kind}"),
            TelemetryEventKind::SequenceComplete(kind) => write!(f, "sequence-complete {kind}"),
            TelemetryEventKind::RequestDropped(kind) => write!(f, "request-dropped {kind}"),
            TelemetryEventKind::NeutralAttempt(approach) => {
                write!(f, "neutral-attempt {approach}")
            }
            TelemetryEventKind::NeutralFound => f.write_str("neutral-found"),
            TelemetryEventKind::NeutralSearchExhausted => f.write_str("neutral-search-exhausted"),
            TelemetryEventKind::PeerTripped(peer) => write!(f, "peer-tripped {peer}"),
            TelemetryEventKind::ReceiverRearmed(peer) => write!(f, "receiver-rearmed {peer}"),
            TelemetryEventKind::PeerRecovered(peer) => write!(f, "peer-recovered {peer}"),
            TelemetryEventKind::MailboxExhausted(peer) => write!(f, "mailbox-exhausted {peer}"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const SEQUENCE_STARTED_BASE: u16 = 0x0000;
    const SEQUENCE_COMPLETE_BASE: u16 = 0x0008;
    const REQUEST_DROPPED_BASE: u16 = 0x0010;
    const NEUTRAL_ATTEMPT_BASE: u16 = 0x0018;
    const NEUTRAL_FOUND_CODE: u16 = 0x001A;
    const SEARCH_EXHAUSTED_CODE: u16 = 0x001B;
    const PEER_TRIPPED_BASE: u16 = 0x0020;
    const RECEIVER_REARMED_BASE: u16 = 0x0024;
    const PEER_RECOVERED_BASE: u16 = 0x0028;
    const MAILBOX_EXHAUSTED_BASE: u16 = 0x002C;
    const END: u16 = 0x0030;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::SequenceStarted(kind) => {
                Self::SEQUENCE_STARTED_BASE + kind.as_index() as u16
            }
            TelemetryEventKind::SequenceComplete(kind) => {
                Self::SEQUENCE_COMPLETE_BASE + kind.as_index() as u16
            }
            TelemetryEventKind::RequestDropped(kind) => {
                Self::REQUEST_DROPPED_BASE + kind.as_index() as u16
            }
            TelemetryEventKind::NeutralAttempt(Approach::FromFirst) => Self::NEUTRAL_ATTEMPT_BASE,
            TelemetryEventKind::NeutralAttempt(Approach::FromSecond) => {
                Self::NEUTRAL_ATTEMPT_BASE + 1
            }
            TelemetryEventKind::NeutralFound => Self::NEUTRAL_FOUND_CODE,
            TelemetryEventKind::NeutralSearchExhausted => Self::SEARCH_EXHAUSTED_CODE,
            TelemetryEventKind::PeerTripped(peer) => {
                Self::PEER_TRIPPED_BASE + peer.as_index() as u16
            }
            TelemetryEventKind::ReceiverRearmed(peer) => {
                Self::RECEIVER_REARMED_BASE + peer.as_index() as u16
            }
            TelemetryEventKind::PeerRecovered(peer) => {
                Self::PEER_RECOVERED_BASE + peer.as_index() as u16
            }
            TelemetryEventKind::MailboxExhausted(peer) => {
                Self::MAILBOX_EXHAUSTED_BASE + peer.as_index() as u16
            }
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        let custom = TelemetryEventKind::Custom(code);
        match code {
            Self::NEUTRAL_ATTEMPT_BASE => TelemetryEventKind::NeutralAttempt(Approach::FromFirst),
            value if value == Self::NEUTRAL_ATTEMPT_BASE + 1 => {
                TelemetryEventKind::NeutralAttempt(Approach::FromSecond)
            }
            Self::NEUTRAL_FOUND_CODE => TelemetryEventKind::NeutralFound,
            Self::SEARCH_EXHAUSTED_CODE => TelemetryEventKind::NeutralSearchExhausted,
            value if value < Self::SEQUENCE_COMPLETE_BASE => {
                sequence_at(value - Self::SEQUENCE_STARTED_BASE)
                    .map_or(custom, TelemetryEventKind::SequenceStarted)
            }
            value if value < Self::REQUEST_DROPPED_BASE => {
                sequence_at(value - Self::SEQUENCE_COMPLETE_BASE)
                    .map_or(custom, TelemetryEventKind::SequenceComplete)
            }
            value if value < Self::NEUTRAL_ATTEMPT_BASE => {
                sequence_at(value - Self::REQUEST_DROPPED_BASE)
                    .map_or(custom, TelemetryEventKind::RequestDropped)
            }
            value if (Self::PEER_TRIPPED_BASE..Self::RECEIVER_REARMED_BASE).contains(&value) => {
                peer_at(value - Self::PEER_TRIPPED_BASE)
                    .map_or(custom, TelemetryEventKind::PeerTripped)
            }
            value if (Self::RECEIVER_REARMED_BASE..Self::PEER_RECOVERED_BASE).contains(&value) => {
                peer_at(value - Self::RECEIVER_REARMED_BASE)
                    .map_or(custom, TelemetryEventKind::ReceiverRearmed)
            }
            value if (Self::PEER_RECOVERED_BASE..Self::MAILBOX_EXHAUSTED_BASE).contains(&value) => {
                peer_at(value - Self::PEER_RECOVERED_BASE)
                    .map_or(custom, TelemetryEventKind::PeerRecovered)
            }
            value if (Self::MAILBOX_EXHAUSTED_BASE..Self::END).contains(&value) => {
                peer_at(value - Self::MAILBOX_EXHAUSTED_BASE)
                    .map_or(custom, TelemetryEventKind::MailboxExhausted)
            }
            _ => custom,
        }
    }
}

impl From<FailsafeEvent> for TelemetryEventKind {
    fn from(event: FailsafeEvent) -> Self {
        match event {
            FailsafeEvent::Tripped(peer) => TelemetryEventKind::PeerTripped(peer),
            FailsafeEvent::Rearmed(peer) => TelemetryEventKind::ReceiverRearmed(peer),
            FailsafeEvent::Recovered(peer) => TelemetryEventKind::PeerRecovered(peer),
            FailsafeEvent::MailboxExhausted(peer) => TelemetryEventKind::MailboxExhausted(peer),
        }
    }
}

fn sequence_at(offset: u16) -> Option<SequenceKind> {
    SequenceKind::from_index(usize::from(offset))
}

fn peer_at(offset: u16) -> Option<Peer> {
    Peer::from_index(usize::from(offset))
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    /// Neutral attempt number and the pulse length it used.
    Neutral { attempt: u8, try_time: Ticks },
    /// Final try-times of a neutral search.
    NeutralResult { try_up: Ticks, try_down: Ticks },
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Neutral { attempt, try_time } => {
                write!(f, "attempt={attempt} try={}", try_time.as_u16())
            }
            TelemetryPayload::NeutralResult { try_up, try_down } => {
                write!(f, "up={} down={}", try_up.as_u16(), try_down.as_u16())
            }
        }
    }
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
    clock: Timestamp,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
            clock: 0,
        }
    }

    /// Sets the timestamp applied by [`TelemetryRecorder::record`].
    pub fn set_clock(&mut self, now: Timestamp) {
        self.clock = now;
    }

    pub const fn clock(&self) -> Timestamp {
        self.clock
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Records newer than `last_seen`, oldest first.
    pub fn since(&self, last_seen: Option<EventId>) -> impl Iterator<Item = &TelemetryRecord> {
        self.oldest_first()
            .filter(move |record| last_seen.is_none_or(|seen| record.id > seen))
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of stored records of the given kind.
    pub fn count(&self, event: TelemetryEventKind) -> usize {
        self.oldest_first()
            .filter(|record| record.event == event)
            .count()
    }

    /// Records an event stamped with the current clock.
    pub fn record(&mut self, event: TelemetryEventKind, payload: TelemetryPayload) -> EventId {
        self.record_at(event, payload, self.clock)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record_at(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: Timestamp,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

/// Saturates an attempt counter into the payload field.
pub fn attempt_number(count: usize) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}
