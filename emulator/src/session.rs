use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use gearbox_core::can::{ClutchPositions, DiagTag, Frame, GearCommand, LAUNCH_OPCODE};
use gearbox_core::config::{CalibrationError, NodeConfig};
use gearbox_core::failsafe::Peer;
use gearbox_core::gear::{Approach, Gear};
use gearbox_core::hal::{AnalogChannel, MailboxError, Output};
use gearbox_core::node::{BackupButton, NodeShared, RearNode};
use gearbox_core::telemetry::EventId;
use gearbox_core::Ticks;

use crate::command::{self, Command, HELP_TOPICS};
use crate::gearbox::{GearboxModel, NeutralWindow};
use crate::hardware::{SentFrame, SimHardware};

/// Timer ticks (100 µs) between scheduler ticks (10 ms).
pub const SCHEDULER_PERIOD: u64 = 100;
/// Timer ticks per millisecond.
const TICKS_PER_MILLI: u64 = 10;
/// Upper bound on how long a request is run before giving up on it.
const SEQUENCE_TIMEOUT: u64 = 60 * 1000 * TICKS_PER_MILLI;
const ENGINE_REVS: u16 = 4_000;
const SUSPENSION_REST: u16 = 512;

/// Failure to bring the simulated node up.
#[derive(Debug)]
pub enum SetupError {
    Calibration(CalibrationError),
    Mailbox(MailboxError),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Calibration(error) => write!(f, "calibration rejected: {error}"),
            SetupError::Mailbox(error) => write!(f, "receiver setup failed: {error}"),
        }
    }
}

impl std::error::Error for SetupError {}

impl From<CalibrationError> for SetupError {
    fn from(error: CalibrationError) -> Self {
        SetupError::Calibration(error)
    }
}

impl From<MailboxError> for SetupError {
    fn from(error: MailboxError) -> Self {
        SetupError::Mailbox(error)
    }
}

/// What the simulated peers currently broadcast.
#[derive(Copy, Clone, Debug)]
struct PeerTraffic {
    alive: [bool; 3],
    clutch: ClutchPositions,
    brake: u16,
}

impl PeerTraffic {
    fn is_alive(&self, peer: Peer) -> bool {
        self.alive[peer.as_index()]
    }
}

pub struct Session<'a> {
    node: RearNode<'a, SimHardware>,
    gearbox: GearboxModel,
    peers: PeerTraffic,
    tick: u32,
    last_event: Option<EventId>,
    transcript: Option<TranscriptLogger>,
}

impl<'a> Session<'a> {
    pub fn new(
        shared: &'a NodeShared,
        config: NodeConfig,
        transcript: Option<TranscriptLogger>,
    ) -> Result<Self, SetupError> {
        let mut hardware = SimHardware::new();
        hardware.set_analog(AnalogChannel::SuspensionLeft, SUSPENSION_REST);
        hardware.set_analog(AnalogChannel::SuspensionRight, SUSPENSION_REST);

        let mut node = RearNode::new(config, shared, hardware)?;
        node.init()?;

        let closed = config.clutch.right.closed as u16;
        let mut session = Self {
            node,
            gearbox: GearboxModel::new(Gear::Neutral),
            peers: PeerTraffic {
                alive: [true; 3],
                clutch: ClutchPositions {
                    left: closed,
                    right: closed,
                },
                brake: 0,
            },
            tick: 0,
            last_event: None,
            transcript,
        };
        session.mirror_backup_sensors();
        // first scheduler tick so the node has heard from every peer
        session.advance(0);
        session.node.hw_mut().take_sent();
        Ok(session)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let elapsed = self.now_millis();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut lines = match command::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(error) => error
                .lines()
                .enumerate()
                .map(|(index, text)| {
                    if index == 0 {
                        format!("ERR syntax {text}")
                    } else {
                        format!("  {text}")
                    }
                })
                .collect(),
        };
        self.collect_events(&mut lines);

        if let Some(transcript) = self.transcript.as_mut() {
            for line in &lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(lines)
    }

    pub fn node(&self) -> &RearNode<'a, SimHardware> {
        &self.node
    }

    pub fn gearbox(&self) -> &GearboxModel {
        &self.gearbox
    }

    /// Simulated time in timer ticks.
    pub fn now(&self) -> u64 {
        self.node.hw().now()
    }

    fn now_millis(&self) -> u64 {
        self.now() / TICKS_PER_MILLI
    }

    fn execute(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Up => self.request_gear(GearCommand::Up, Some(BackupButton::Up)),
            Command::Down => self.request_gear(GearCommand::Down, Some(BackupButton::Down)),
            Command::Neutral => {
                self.request_gear(GearCommand::NeutralSingle, Some(BackupButton::Neutral))
            }
            Command::Repeat(strategy) => {
                if let Some(strategy) = strategy {
                    self.node.set_search_strategy(strategy);
                }
                self.request_gear(GearCommand::NeutralRepeat, None)
            }
            Command::Launch => self.request_launch(),
            Command::Tick(count) => {
                self.advance(u64::from(count) * SCHEDULER_PERIOD);
                vec![format!("OK t={}ms tick={}", self.now_millis(), self.tick)]
            }
            Command::Wait(millis) => {
                self.advance(u64::from(millis) * TICKS_PER_MILLI);
                vec![format!("OK t={}ms tick={}", self.now_millis(), self.tick)]
            }
            Command::Silence(peer) => {
                self.peers.alive[peer.as_index()] = false;
                vec![format!("OK {peer} silenced")]
            }
            Command::Resume(peer) => {
                self.peers.alive[peer.as_index()] = true;
                vec![format!("OK {peer} transmitting")]
            }
            Command::Clutch { left, right } => {
                self.peers.clutch = ClutchPositions { left, right };
                self.mirror_backup_sensors();
                vec![format!("OK clutch left={left} right={right}")]
            }
            Command::Brake(pressure) => {
                self.peers.brake = pressure;
                self.mirror_backup_sensors();
                vec![format!("OK brake pressure={pressure}")]
            }
            Command::Window { low, high } => {
                if low > high {
                    return vec![format!("ERR window {low}..={high} is empty")];
                }
                let window = NeutralWindow::new(Ticks::new(low), Ticks::new(high));
                self.gearbox.set_window(window);
                vec![format!("OK neutral window {window}")]
            }
            Command::Gear => vec![self.describe_gear()],
            Command::Status => self.describe_status(),
            Command::Help(topic) => describe_help(topic),
            Command::Exit => vec!["Session closed.".to_string()],
        }
    }

    /// Sends a gear command from the mid node, or presses the wired button
    /// when the mid node is silent, then runs the node until it is idle.
    fn request_gear(&mut self, command: GearCommand, button: Option<BackupButton>) -> Vec<String> {
        let before = self.gearbox.gear();
        if self.peers.is_alive(Peer::Mid) {
            let id = self.node.config().can.gear;
            self.deliver(id, &command.opcode());
        } else {
            let Some(button) = button else {
                return vec!["ERR mid node silent and no backup button for this request".to_string()];
            };
            if !self.node.hw().backup_buttons_enabled() {
                return vec!["ERR backup buttons not armed yet".to_string()];
            }
            self.node.on_backup_button(button);
        }
        self.run_request(before)
    }

    fn request_launch(&mut self) -> Vec<String> {
        if !self.peers.is_alive(Peer::Mid) {
            return vec!["ERR mid node silent".to_string()];
        }
        let before = self.gearbox.gear();
        let id = self.node.config().can.launch;
        self.deliver(id, &LAUNCH_OPCODE);
        self.run_request(before)
    }

    fn run_request(&mut self, before: Gear) -> Vec<String> {
        let started = self.now();
        self.node.poll();
        self.feed_gearbox();
        let Some(kind) = self.node.sequencer().active() else {
            return vec![format!("OK ignored in gear {before}")];
        };

        while self.node.sequencer().is_busy() && self.now() - started < SEQUENCE_TIMEOUT {
            self.advance(SCHEDULER_PERIOD);
        }

        let elapsed = (self.now() - started) / TICKS_PER_MILLI;
        let after = self.gearbox.gear();
        if self.node.sequencer().is_busy() {
            vec![format!("ERR {kind} still running after {elapsed}ms")]
        } else {
            vec![format!("OK {kind} {before} -> {after} in {elapsed}ms")]
        }
    }

    /// Advances simulated time, firing timer expiries and scheduler ticks in
    /// order. A zero duration still runs anything due right now.
    fn advance(&mut self, duration: u64) {
        let end = self.now() + duration;
        loop {
            let next_tick_at = u64::from(self.tick) * SCHEDULER_PERIOD;
            let timer = self
                .node
                .hw()
                .deadline()
                .filter(|deadline| *deadline <= next_tick_at);
            let at = timer.unwrap_or(next_tick_at);
            if at > end {
                break;
            }

            self.node.hw_mut().set_now(at);
            if timer.is_some() {
                self.node.hw_mut().clear_deadline();
                self.node.on_timer_expired();
            } else {
                self.scheduler_tick();
            }
            self.node.poll();
            self.feed_gearbox();
        }
        self.node.hw_mut().set_now(end);
    }

    fn scheduler_tick(&mut self) {
        let ids = self.node.config().can;
        if self.peers.is_alive(Peer::Dta) {
            let mut revs = [0u8; 8];
            revs[6..].copy_from_slice(&ENGINE_REVS.to_be_bytes());
            self.deliver(ids.dta_revs, &revs);

            let mut pot = [0u8; 4];
            pot[2..].copy_from_slice(&self.gearbox.pot_reading().to_be_bytes());
            self.deliver(ids.dta_gear_pot, &pot);
        }
        if self.peers.is_alive(Peer::Front) {
            let [low, high] = self.peers.brake.to_le_bytes();
            self.deliver(ids.brake.id, &[0, 0, low, high]);
        }
        if self.peers.is_alive(Peer::Mid) {
            self.deliver(ids.clutch, &self.peers.clutch.to_payload());
        }

        self.node.on_tick(self.tick);
        self.tick = self.tick.wrapping_add(1);
    }

    fn deliver(&mut self, id: u32, payload: &[u8]) {
        let Ok(frame) = Frame::new(id, payload) else {
            return;
        };
        if let Some(handle) = self.node.hw().route(id) {
            self.node.on_can_frame(handle, &frame);
        }
    }

    fn feed_gearbox(&mut self) {
        for pulse in self.node.hw_mut().take_pulses() {
            self.gearbox.pulse(pulse.stroke, pulse.length);
        }
    }

    /// The wired backup sensors read the same pedals the peers report.
    fn mirror_backup_sensors(&mut self) {
        let hw = self.node.hw_mut();
        hw.set_analog(AnalogChannel::BackupClutch, self.peers.clutch.right);
        hw.set_analog(AnalogChannel::BackupBrakePressure, self.peers.brake);
    }

    fn collect_events(&mut self, lines: &mut Vec<String>) {
        for record in self.node.telemetry().since(self.last_event) {
            let detail = record.details.to_string();
            let line = format!("  [tick {:>6}] {} {}", record.timestamp, record.event, detail);
            lines.push(line.trim_end().to_string());
            self.last_event = Some(record.id);
        }

        let log_neutral = self.node.config().can.log_neutral;
        for SentFrame { at, frame } in self.node.hw_mut().take_sent() {
            let millis = at / TICKS_PER_MILLI;
            if let Some(tag) = DiagTag::from_frame(frame.id(), frame.payload()) {
                lines.push(format!("  [{millis:>6} ms] can {:#06x} {tag}", frame.id()));
            } else if frame.id() == log_neutral {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&frame.payload()[..4]);
                let raw = u32::from_le_bytes(bytes);
                lines.push(format!(
                    "  [{millis:>6} ms] can {:#06x} neutral up={} down={}",
                    frame.id(),
                    raw >> 16,
                    raw & 0xFFFF
                ));
            }
        }
    }

    fn describe_gear(&self) -> String {
        let shared = self.node.shared();
        format!(
            "node={} gearbox={} pot={} revs={}",
            shared.gear.gear(),
            self.gearbox.gear(),
            self.gearbox.pot_reading(),
            shared.gear.revs()
        )
    }

    fn describe_status(&self) -> Vec<String> {
        let node = &self.node;
        let hw = node.hw();
        let sequencer = node.sequencer();
        let neutral = sequencer.neutral();
        let mut lines = vec![
            format!(
                "node {} t={}ms tick={}",
                node.config().name,
                self.now_millis(),
                self.tick
            ),
            format!("gear {}", self.describe_gear()),
        ];
        lines.push(match sequencer.active() {
            Some(kind) => format!("sequencer busy={kind} step={:?}", sequencer.step()),
            None => "sequencer idle".to_string(),
        });
        lines.push(format!(
            "neutral strategy={} try-up={} try-down={} window={}",
            node.search_strategy(),
            neutral.try_time(Approach::FromFirst).as_u16(),
            neutral.try_time(Approach::FromSecond).as_u16(),
            self.gearbox.window()
        ));
        lines.push(format!(
            "clutch left={:.0} right={:.0} duty={}",
            node.clutch().left().filtered(),
            node.clutch().right().filtered(),
            hw.duty().map_or_else(|| "-".to_string(), |duty| duty.to_string())
        ));
        lines.push(format!(
            "brake pressure={} light={}",
            self.peers.brake,
            if node.brake().is_lit() { "on" } else { "off" }
        ));
        let peers: Vec<String> = Peer::ALL
            .iter()
            .map(|peer| {
                let state = if node.failsafe().is_tripped(*peer) {
                    "TRIPPED"
                } else {
                    "ok"
                };
                let traffic = if self.peers.is_alive(*peer) { "" } else { " (silenced)" };
                format!("{peer}={state}{traffic}")
            })
            .collect();
        lines.push(format!("peers {}", peers.join(" ")));
        lines.push(format!(
            "io mailboxes={} backup-buttons={} outputs={}",
            hw.mailboxes_in_use(),
            if hw.backup_buttons_enabled() { "armed" } else { "off" },
            describe_outputs(hw)
        ));
        lines
    }
}

fn describe_outputs(hw: &SimHardware) -> String {
    let asserted: Vec<String> = Output::ALL
        .iter()
        .filter(|output| hw.level(**output) == gearbox_core::hal::Level::Asserted)
        .map(ToString::to_string)
        .collect();
    if asserted.is_empty() {
        "released".to_string()
    } else {
        asserted.join(",")
    }
}

fn describe_help(topic: Option<&'static str>) -> Vec<String> {
    match topic {
        Some(name) => HELP_TOPICS
            .iter()
            .filter(|(topic, _)| *topic == name)
            .map(|(_, detail)| (*detail).to_string())
            .collect(),
        None => {
            let mut lines = vec!["Available commands:".to_string()];
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
            lines
        }
    }
}

pub struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    pub fn create(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# {header}")?;
        writeln!(logger.writer, "# Timestamps are simulated milliseconds")?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, elapsed_ms: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[+{elapsed_ms:>6} ms] {} {line}", role.prefix())?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
