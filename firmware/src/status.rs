#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Periodic one-line status report for bring-up over RTT.

use core::fmt;

use gearbox_core::failsafe::Peer;
use gearbox_core::gear::Gear;
use gearbox_core::hal::NodeHardware;
use gearbox_core::node::RearNode;
use gearbox_core::sequencer::SequenceKind;
use gearbox_core::telemetry::Timestamp;

/// Point-in-time view of the node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub tick: Timestamp,
    pub gear: Gear,
    pub revs: u16,
    pub active: Option<SequenceKind>,
    pub tripped: [bool; 3],
    pub clutch_left: f32,
    pub clutch_right: f32,
    pub brake_light: bool,
}

impl StatusSnapshot {
    pub fn capture<H: NodeHardware, const N: usize>(
        node: &RearNode<'_, H, N>,
        tick: Timestamp,
    ) -> Self {
        let failsafe = node.failsafe();
        Self {
            tick,
            gear: node.shared().gear.gear(),
            revs: node.shared().gear.revs(),
            active: node.sequencer().active(),
            tripped: Peer::ALL.map(|peer| failsafe.is_tripped(peer)),
            clutch_left: node.clutch().left().filtered(),
            clutch_right: node.clutch().right().filtered(),
            brake_light: node.brake().is_lit(),
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={} gear={} revs={}", self.tick, self.gear, self.revs)?;
        match self.active {
            Some(kind) => write!(f, " busy={kind}")?,
            None => f.write_str(" idle")?,
        }
        write!(
            f,
            " clutch={:.0}/{:.0} brake={}",
            self.clutch_left,
            self.clutch_right,
            if self.brake_light { "on" } else { "off" }
        )?;
        for (peer, tripped) in Peer::ALL.iter().zip(self.tripped) {
            write!(f, " {peer}={}", if tripped { "TRIPPED" } else { "ok" })?;
        }
        Ok(())
    }
}

#[cfg(target_os = "none")]
pub fn log(snapshot: &StatusSnapshot) {
    defmt::info!("status: {}", defmt::Display2Format(snapshot));
}

#[cfg(not(target_os = "none"))]
pub fn log(snapshot: &StatusSnapshot) {
    println!("status: {snapshot}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_tripped_peers() {
        let snapshot = StatusSnapshot {
            tick: 1200,
            gear: Gear::Third,
            revs: 8000,
            active: None,
            tripped: [false, true, false],
            clutch_left: 412.4,
            clutch_right: 398.6,
            brake_light: true,
        };
        let line = snapshot.to_string();
        assert!(line.starts_with("t=1200 gear=3 revs=8000 idle clutch=412/399 brake=on"));
        assert!(line.contains("=TRIPPED"));
        assert_eq!(line.matches("=ok").count(), 2);
    }

    #[test]
    fn renders_active_sequence() {
        let snapshot = StatusSnapshot {
            tick: 0,
            gear: Gear::Unknown,
            revs: 13000,
            active: Some(SequenceKind::ShiftDown),
            tripped: [true; 3],
            clutch_left: 0.0,
            clutch_right: 0.0,
            brake_light: false,
        };
        let line = snapshot.to_string();
        assert!(line.starts_with("t=0 gear=? revs=13000 busy="));
        assert_eq!(line.matches("=TRIPPED").count(), 3);
    }
}
