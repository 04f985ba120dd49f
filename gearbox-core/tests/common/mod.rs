#![allow(dead_code)]

use gearbox_core::Ticks;
use gearbox_core::can::{DiagTag, Frame};
use gearbox_core::hal::{
    AnalogChannel, AnalogInput, BackupInputs, CanTransport, ClutchServo, Level, MailboxError,
    MailboxHandle, MailboxTable, OneShotTimer, Output, OutputDriver, ReceiverFilter,
};
use gearbox_core::config::NodeConfig;
use gearbox_core::node::{NodeShared, RearNode};

/// Hardware double that records every interaction.
#[derive(Debug)]
pub struct MockHardware {
    pub levels: [Level; 5],
    pub output_log: Vec<(Output, Level)>,
    pub arms: Vec<Ticks>,
    pub sent: Vec<(u32, Vec<u8>)>,
    pub mailboxes: MailboxTable,
    pub registered: usize,
    pub freed: usize,
    pub analog: [u16; 4],
    pub duty: Option<u16>,
    pub backup_buttons: bool,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self {
            levels: [Level::TriState; 5],
            output_log: Vec::new(),
            arms: Vec::new(),
            sent: Vec::new(),
            mailboxes: MailboxTable::new(),
            registered: 0,
            freed: 0,
            analog: [0; 4],
            duty: None,
            backup_buttons: false,
        }
    }
}

impl MockHardware {
    pub fn level(&self, output: Output) -> Level {
        self.levels[output.as_index()]
    }

    pub fn all_released(&self) -> bool {
        self.levels.iter().all(|level| *level == Level::TriState)
    }

    pub fn last_arm(&self) -> Option<Ticks> {
        self.arms.last().copied()
    }

    pub fn set_analog(&mut self, channel: AnalogChannel, value: u16) {
        self.analog[analog_index(channel)] = value;
    }

    /// Payloads sent on `id`, oldest first.
    pub fn sent_on(&self, id: u32) -> Vec<&[u8]> {
        self.sent
            .iter()
            .filter(|(sent_id, _)| *sent_id == id)
            .map(|(_, payload)| payload.as_slice())
            .collect()
    }

    pub fn diag_tags(&self) -> Vec<DiagTag> {
        self.sent
            .iter()
            .filter_map(|(id, payload)| DiagTag::from_frame(*id, payload))
            .collect()
    }

    /// Builds the frame and finds the mailbox that would take it.
    pub fn deliver(&self, id: u32, payload: &[u8]) -> Option<(MailboxHandle, Frame)> {
        let handle = self.mailboxes.route(id)?;
        let frame = Frame::new(id, payload).expect("test payload fits a frame");
        Some((handle, frame))
    }

    pub fn clear_logs(&mut self) {
        self.output_log.clear();
        self.arms.clear();
        self.sent.clear();
    }
}

fn analog_index(channel: AnalogChannel) -> usize {
    match channel {
        AnalogChannel::BackupBrakePressure => 0,
        AnalogChannel::BackupClutch => 1,
        AnalogChannel::SuspensionLeft => 2,
        AnalogChannel::SuspensionRight => 3,
    }
}

impl OutputDriver for MockHardware {
    fn set_output(&mut self, output: Output, level: Level) {
        self.levels[output.as_index()] = level;
        self.output_log.push((output, level));
    }
}

impl OneShotTimer for MockHardware {
    fn arm(&mut self, duration: Ticks) {
        self.arms.push(duration);
    }
}

impl CanTransport for MockHardware {
    fn send(&mut self, id: u32, payload: &[u8]) {
        self.sent.push((id, payload.to_vec()));
    }

    fn register_receiver(
        &mut self,
        id: u32,
        mask: u32,
        len: u8,
    ) -> Result<MailboxHandle, MailboxError> {
        let handle = self.mailboxes.allocate(ReceiverFilter::new(id, mask, len))?;
        self.registered += 1;
        Ok(handle)
    }

    fn free_receiver(&mut self, handle: MailboxHandle) {
        self.mailboxes.release(handle);
        self.freed += 1;
    }
}

impl AnalogInput for MockHardware {
    fn read_analog(&mut self, channel: AnalogChannel) -> u16 {
        self.analog[analog_index(channel)]
    }
}

impl ClutchServo for MockHardware {
    fn set_duty_cycle(&mut self, duty: u16) {
        self.duty = Some(duty);
    }
}

impl BackupInputs for MockHardware {
    fn enable_backup_buttons(&mut self) {
        self.backup_buttons = true;
    }

    fn disable_backup_buttons(&mut self) {
        self.backup_buttons = false;
    }
}

/// Routes a frame through the mock's mailboxes into the node. Returns
/// `false` when no armed receiver accepts the identifier.
pub fn deliver<const N: usize>(
    node: &mut RearNode<'_, MockHardware, N>,
    id: u32,
    payload: &[u8],
) -> bool {
    match node.hw().deliver(id, payload) {
        Some((handle, frame)) => {
            node.on_can_frame(handle, &frame);
            true
        }
        None => false,
    }
}

/// Builds and initialises a node on fresh mock hardware.
pub fn rear_node(shared: &NodeShared, config: NodeConfig) -> RearNode<'_, MockHardware> {
    let mut node =
        RearNode::new(config, shared, MockHardware::default()).expect("valid node config");
    node.init().expect("three receivers fit the mailboxes");
    node
}
