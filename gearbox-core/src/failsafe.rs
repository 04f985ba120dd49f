//! Peer silence detection.
//!
//! The rear node listens to three peers: the engine computer, the front node
//! and the mid node. Each one gets a tick counter that frames reset. A counter
//! reaching the trip threshold declares the peer silent and releases its
//! mailbox; the node then falls back to local sensors for whatever that peer
//! used to supply. Receivers are re-armed on a shorter period so a peer that
//! comes back is picked up without any handshake.

use core::fmt;

use heapless::Vec;

use crate::config::{CanIds, FailsafeConfig, RearmPolicy};
use crate::gear::{Gear, GearState};
use crate::hal::{CanTransport, MailboxError, MailboxHandle, ReceiverFilter};

/// Monitored CAN peers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Peer {
    /// Engine computer.
    Dta,
    Front,
    Mid,
}

impl Peer {
    pub const COUNT: usize = 3;
    pub const ALL: [Peer; Self::COUNT] = [Peer::Dta, Peer::Front, Peer::Mid];

    pub const fn as_index(self) -> usize {
        match self {
            Peer::Dta => 0,
            Peer::Front => 1,
            Peer::Mid => 2,
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Peer::Dta),
            1 => Some(Peer::Front),
            2 => Some(Peer::Mid),
            _ => None,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Peer::Dta => "dta",
            Peer::Front => "front",
            Peer::Mid => "mid",
        };
        f.write_str(label)
    }
}

/// Transitions reported by the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailsafeEvent {
    Tripped(Peer),
    Rearmed(Peer),
    Recovered(Peer),
    /// A receiver could not be re-armed because every mailbox was taken.
    MailboxExhausted(Peer),
}

/// Silence tracking for a single peer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PeerMonitor {
    peer: Peer,
    receiver: ReceiverFilter,
    handle: Option<MailboxHandle>,
    counter: u8,
    tripped: bool,
    /// Counting only starts once the peer has been heard from.
    counting: bool,
}

impl PeerMonitor {
    const fn new(peer: Peer, receiver: ReceiverFilter, counting: bool) -> Self {
        Self {
            peer,
            receiver,
            handle: None,
            counter: 0,
            tripped: false,
            counting,
        }
    }

    pub const fn peer(&self) -> Peer {
        self.peer
    }

    pub const fn counter(&self) -> u8 {
        self.counter
    }

    pub const fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub const fn handle(&self) -> Option<MailboxHandle> {
        self.handle
    }

    pub const fn receiver(&self) -> ReceiverFilter {
        self.receiver
    }

    fn arm<C: CanTransport>(&mut self, can: &mut C) -> Result<MailboxHandle, MailboxError> {
        let handle =
            can.register_receiver(self.receiver.id, self.receiver.mask, self.receiver.len)?;
        self.handle = Some(handle);
        Ok(handle)
    }

    fn release<C: CanTransport>(&mut self, can: &mut C) {
        if let Some(handle) = self.handle.take() {
            can.free_receiver(handle);
        }
    }

    fn rearm<C: CanTransport>(&mut self, can: &mut C) -> FailsafeEvent {
        self.release(can);
        match self.arm(can) {
            Ok(_) => FailsafeEvent::Rearmed(self.peer),
            Err(MailboxError::Exhausted) => FailsafeEvent::MailboxExhausted(self.peer),
        }
    }

    fn on_tick<C: CanTransport>(
        &mut self,
        config: &FailsafeConfig,
        can: &mut C,
    ) -> Option<FailsafeEvent> {
        if !self.counting {
            return None;
        }

        self.counter = self.counter.saturating_add(1);

        if self.tripped {
            // keep probing so a returning peer is heard
            if self.counter >= config.rearm_threshold {
                self.counter = 0;
                return Some(self.rearm(can));
            }
            return None;
        }

        if self.counter >= config.trip_threshold {
            self.tripped = true;
            self.counter = 0;
            self.release(can);
            return Some(FailsafeEvent::Tripped(self.peer));
        }

        let rearm_due = match config.rearm_policy {
            RearmPolicy::Once => self.counter == config.rearm_threshold,
            RearmPolicy::Repeated => self.counter > config.rearm_threshold,
        };
        if rearm_due {
            return Some(self.rearm(can));
        }
        None
    }

    fn on_frame(&mut self) -> Option<FailsafeEvent> {
        self.counter = 0;
        self.counting = true;
        if self.tripped {
            self.tripped = false;
            return Some(FailsafeEvent::Recovered(self.peer));
        }
        None
    }
}

/// Failsafe counters for every monitored peer.
#[derive(Clone, Debug)]
pub struct FailsafeMonitor {
    config: FailsafeConfig,
    peers: [PeerMonitor; Peer::COUNT],
}

impl FailsafeMonitor {
    pub const fn new(config: FailsafeConfig, ids: &CanIds) -> Self {
        Self {
            config,
            peers: [
                // the engine computer may still be off at power-up
                PeerMonitor::new(Peer::Dta, ids.dta, false),
                PeerMonitor::new(Peer::Front, ids.brake, true),
                PeerMonitor::new(Peer::Mid, ids.commands, true),
            ],
        }
    }

    /// Registers the receive mailbox of every peer.
    pub fn arm_receivers<C: CanTransport>(&mut self, can: &mut C) -> Result<(), MailboxError> {
        for monitor in &mut self.peers {
            monitor.release(can);
            monitor.arm(can)?;
        }
        Ok(())
    }

    /// Advances every counter by one scheduler tick.
    ///
    /// Tripping the engine computer forces the gear to `Unknown` and the revs
    /// to the configured fallback.
    pub fn on_tick<C: CanTransport>(
        &mut self,
        can: &mut C,
        gear: &GearState,
    ) -> Vec<FailsafeEvent, { Peer::COUNT }> {
        let mut events = Vec::new();
        for monitor in &mut self.peers {
            if let Some(event) = monitor.on_tick(&self.config, can) {
                if event == FailsafeEvent::Tripped(Peer::Dta) {
                    gear.set_gear(Gear::Unknown);
                    gear.set_revs(self.config.fallback_revs);
                }
                // one event per peer per tick, so this never overflows
                let pushed = events.push(event);
                debug_assert!(pushed.is_ok(), "more failsafe events than peers");
            }
        }
        events
    }

    /// Resets the counter of a peer that was just heard from.
    pub fn on_frame(&mut self, peer: Peer) -> Option<FailsafeEvent> {
        self.peers[peer.as_index()].on_frame()
    }

    /// Resolves which peer owns the mailbox a frame arrived on.
    pub fn peer_for(&self, handle: MailboxHandle) -> Option<Peer> {
        self.peers
            .iter()
            .find(|monitor| monitor.handle == Some(handle))
            .map(PeerMonitor::peer)
    }

    pub fn is_tripped(&self, peer: Peer) -> bool {
        self.peers[peer.as_index()].tripped
    }

    pub fn monitor(&self, peer: Peer) -> &PeerMonitor {
        &self.peers[peer.as_index()]
    }

    pub const fn config(&self) -> &FailsafeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LUR7_CAN_IDS, STANDARD_FAILSAFE};
    use crate::hal::{MailboxTable, ReceiverFilter};

    #[derive(Default)]
    struct TableCan {
        table: MailboxTable,
        frees: usize,
        registers: usize,
    }

    impl CanTransport for TableCan {
        fn send(&mut self, _id: u32, _payload: &[u8]) {}

        fn register_receiver(
            &mut self,
            id: u32,
            mask: u32,
            len: u8,
        ) -> Result<MailboxHandle, MailboxError> {
            self.registers += 1;
            self.table.allocate(ReceiverFilter::new(id, mask, len))
        }

        fn free_receiver(&mut self, handle: MailboxHandle) {
            self.frees += 1;
            self.table.release(handle);
        }
    }

    fn armed_monitor(can: &mut TableCan) -> FailsafeMonitor {
        let mut monitor = FailsafeMonitor::new(STANDARD_FAILSAFE, &LUR7_CAN_IDS);
        monitor.arm_receivers(can).expect("three free mailboxes");
        monitor
    }

    #[test]
    fn engine_computer_counter_waits_for_first_frame() {
        let mut can = TableCan::default();
        let gear = GearState::new();
        let mut monitor = armed_monitor(&mut can);

        for _ in 0..250 {
            monitor.on_tick(&mut can, &gear);
        }
        assert!(!monitor.is_tripped(Peer::Dta));
        assert_eq!(monitor.monitor(Peer::Dta).counter(), 0);
        assert!(monitor.is_tripped(Peer::Front));
        assert!(monitor.is_tripped(Peer::Mid));
    }

    #[test]
    fn engine_computer_trip_forces_unknown_gear() {
        let mut can = TableCan::default();
        let gear = GearState::new();
        gear.set_gear(Gear::Third);
        gear.set_revs(6_000);
        let mut monitor = armed_monitor(&mut can);
        monitor.on_frame(Peer::Dta);

        let mut tripped_at = None;
        for tick in 1..=100 {
            monitor.on_frame(Peer::Front);
            monitor.on_frame(Peer::Mid);
            let events = monitor.on_tick(&mut can, &gear);
            if events.contains(&FailsafeEvent::Tripped(Peer::Dta)) {
                tripped_at = Some(tick);
            }
        }
        assert_eq!(tripped_at, Some(100));
        assert_eq!(gear.gear(), Gear::Unknown);
        assert_eq!(gear.revs(), 13_000);
        assert_eq!(monitor.monitor(Peer::Dta).handle(), None);
    }

    #[test]
    fn every_peer_can_report_on_the_same_tick() {
        let mut can = TableCan::default();
        let gear = GearState::new();
        let mut monitor = armed_monitor(&mut can);
        monitor.on_frame(Peer::Dta);

        let mut last = Vec::new();
        for tick in 1..=100 {
            let events = monitor.on_tick(&mut can, &gear);
            if tick == 20 {
                assert_eq!(
                    events.as_slice(),
                    &Peer::ALL.map(FailsafeEvent::Rearmed)
                );
            }
            last = events;
        }
        assert_eq!(last.as_slice(), &Peer::ALL.map(FailsafeEvent::Tripped));
    }

    #[test]
    fn rearm_once_policy_fires_a_single_time() {
        let mut can = TableCan::default();
        let gear = GearState::new();
        let mut monitor = armed_monitor(&mut can);
        let mut rearms = 0;
        for _ in 0..99 {
            monitor.on_frame(Peer::Mid);
            for event in monitor.on_tick(&mut can, &gear) {
                if event == FailsafeEvent::Rearmed(Peer::Front) {
                    rearms += 1;
                }
            }
        }
        assert_eq!(rearms, 1);
        assert!(!monitor.is_tripped(Peer::Front));
    }

    #[test]
    fn rearm_repeated_policy_fires_every_tick_past_threshold() {
        let mut can = TableCan::default();
        let gear = GearState::new();
        let mut config = STANDARD_FAILSAFE;
        config.rearm_policy = RearmPolicy::Repeated;
        let mut monitor = FailsafeMonitor::new(config, &LUR7_CAN_IDS);
        monitor.arm_receivers(&mut can).expect("free mailboxes");

        let mut rearms = 0;
        for _ in 0..99 {
            for event in monitor.on_tick(&mut can, &gear) {
                if event == FailsafeEvent::Rearmed(Peer::Front) {
                    rearms += 1;
                }
            }
        }
        // counter values 21 through 99
        assert_eq!(rearms, 79);
        assert_eq!(can.table.in_use(), 3);
    }

    #[test]
    fn exhausted_mailboxes_are_reported_not_fatal() {
        let mut can = TableCan::default();
        let gear = GearState::new();
        let mut monitor = armed_monitor(&mut can);
        for id in 0..3 {
            can.table
                .allocate(ReceiverFilter::new(0x700 + id, u32::MAX, 8))
                .expect("spare slot");
        }

        let mut front_events: Vec<FailsafeEvent, 8> = Vec::new();
        for _ in 0..100 {
            for event in monitor.on_tick(&mut can, &gear) {
                if matches!(
                    event,
                    FailsafeEvent::Rearmed(Peer::Front) | FailsafeEvent::MailboxExhausted(Peer::Front)
                ) {
                    front_events.push(event).expect("room");
                }
            }
        }
        // freeing the old mailbox makes room for its replacement
        assert_eq!(front_events.as_slice(), &[FailsafeEvent::Rearmed(Peer::Front)]);

        // another user grabs the mailboxes the tripped peers released
        for id in 0..2 {
            can.table
                .allocate(ReceiverFilter::new(0x800 + id, u32::MAX, 8))
                .expect("released slot");
        }
        let exhausted = (0..20)
            .flat_map(|_| monitor.on_tick(&mut can, &gear))
            .filter(|event| matches!(event, FailsafeEvent::MailboxExhausted(_)))
            .count();
        assert_eq!(exhausted, 2);
        assert!(monitor.is_tripped(Peer::Front));
        assert!(monitor.is_tripped(Peer::Mid));
    }
}
