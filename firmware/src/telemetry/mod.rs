//! Forwards new telemetry records from the node's ring to the log transport.
//!
//! The ring lives inside the node; this side only remembers the last record it
//! printed so each record is emitted once, and so a burst that overruns the
//! ring shows up as a gap in the ids rather than a flood of duplicates.

use gearbox_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Tracks which records have already been emitted.
#[derive(Debug, Default)]
pub struct TelemetryLog {
    last: Option<EventId>,
}

impl TelemetryLog {
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Emits every record newer than the last one seen and returns how many.
    pub fn drain<const N: usize>(&mut self, recorder: &TelemetryRecorder<N>) -> usize {
        let mut emitted = 0;
        for record in recorder.since(self.last) {
            emit(record);
            self.last = Some(record.id);
            emitted += 1;
        }
        emitted
    }

    pub const fn last(&self) -> Option<EventId> {
        self.last
    }
}

#[cfg(target_os = "none")]
fn emit(record: &TelemetryRecord) {
    defmt::info!(
        "telemetry #{} t={} code={=u16:#06x} {} {}",
        record.id,
        record.timestamp,
        record.event.to_raw(),
        defmt::Display2Format(&record.event),
        defmt::Display2Format(&record.details)
    );
}

#[cfg(not(target_os = "none"))]
fn emit(record: &TelemetryRecord) {
    println!(
        "telemetry #{} t={} code={:#06x} {} {}",
        record.id,
        record.timestamp,
        record.event.to_raw(),
        record.event,
        record.details
    );
}
