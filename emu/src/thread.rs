//! The emulator run loop and its command plumbing.
//!
//! The front-end talks to the emulator thread through a mutex-protected
//! FIFO of [`Message`]s, drained in push order at the top of every frame, so
//! every command is observed with at most one frame of latency. Results
//! travel back over lock-free rings: core events (quicksave blobs, dirty
//! backup flushes, errors), finished video frames and audio samples.
//!
//! ```text
//!  front-end thread                      emulator thread
//!  ───────────────                       ───────────────
//!  queue.push(Message)  ──── mutex ────► drain, apply
//!                                        run_for(CYCLES_PER_FRAME)
//!  events.pop()         ◄─── rtrb ─────  quicksave/backup/errors
//!  frames.pop()         ◄─── rtrb ─────  vblank publication
//!  audio.pop()          ◄─── rtrb ─────  resampled stereo frames
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cpu::hardware::backup::BackupType;
use crate::cpu::hardware::keypad::Button;
use crate::cpu::hardware::sound::{AudioFrame, AUDIO_RING_CAPACITY};
use crate::gba::{Gba, VideoFrame, FRAME_RING_CAPACITY};
use crate::savestate;
use crate::scheduler::CYCLES_PER_FRAME;

/// Hardware refresh rate; the pacing target at speed 1.
const REFRESH_RATE: f64 = 59.737;

/// RTC configuration pushed by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    AutoDetect,
    Enabled,
    Disabled,
}

/// Everything the front-end can ask of the emulator. Payload buffers are
/// owned by the message and freed when it is consumed.
pub enum Message {
    /// Stop the emulator loop; the thread returns.
    Exit,
    /// Install a BIOS image (must be exactly 16 KiB).
    LoadBios(Vec<u8>),
    /// Install a ROM image and configure backup/RTC for it.
    LoadRom(Vec<u8>),
    /// Install a backup (save) blob.
    LoadBackup(Vec<u8>),
    /// Override the backup type; `None` re-runs detection. Ignored once
    /// emulation has started.
    BackupType(Option<BackupType>),
    /// Console reset.
    Reset,
    /// Start running at the given speed multiplier; 0 means uncapped.
    Run { speed: u32 },
    Pause,
    KeyInput { button: Button, pressed: bool },
    /// Produce a quicksave blob, returned via [`CoreEvent::Quicksave`].
    Quicksave,
    /// Restore a quicksave blob.
    Quickload(Vec<u8>),
    /// Change the audio output rate.
    AudioResampleFrequency(u32),
    ColorCorrection(bool),
    /// Configure the RTC. Ignored once emulation has started.
    Rtc(DeviceState),
}

/// Results and errors travelling back to the front-end.
pub enum CoreEvent {
    /// The requested quicksave blob.
    Quicksave(Vec<u8>),
    /// Backup storage was written this frame; persist this blob.
    Backup(Vec<u8>),
    /// A command was rejected; the emulator kept its previous state.
    Error(String),
}

/// The mutex-protected FIFO between the threads.
#[derive(Default)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    pub fn push(&self, message: Message) {
        self.messages.lock().unwrap().push_back(message);
    }

    fn drain(&self) -> Vec<Message> {
        self.messages.lock().unwrap().drain(..).collect()
    }
}

/// Front-end handle: command queue in, events/frames/audio out. Dropping it
/// shuts the emulator thread down.
pub struct CoreHandle {
    pub queue: Arc<MessageQueue>,
    pub events: rtrb::Consumer<CoreEvent>,
    pub frames: rtrb::Consumer<VideoFrame>,
    pub audio: rtrb::Consumer<AudioFrame>,
    thread: Option<JoinHandle<()>>,
}

impl CoreHandle {
    pub fn send(&self, message: Message) {
        self.queue.push(message);
    }
}

impl Drop for CoreHandle {
    fn drop(&mut self) {
        self.queue.push(Message::Exit);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawns the emulator thread around `gba` and wires the channels up.
#[must_use]
pub fn spawn(mut gba: Gba) -> CoreHandle {
    let (frame_tx, frames) = rtrb::RingBuffer::new(FRAME_RING_CAPACITY);
    let (sample_tx, audio) = rtrb::RingBuffer::new(AUDIO_RING_CAPACITY);
    let (event_tx, events) = rtrb::RingBuffer::new(64);

    gba.frame_tx = Some(frame_tx);
    gba.cpu.bus.sound.sample_tx = Some(sample_tx);

    let queue = Arc::new(MessageQueue::default());
    let thread_queue = Arc::clone(&queue);

    let thread = thread::Builder::new()
        .name("emulator".to_string())
        .spawn(move || EmulatorLoop::new(gba, thread_queue, event_tx).run())
        .expect("spawning the emulator thread");

    CoreHandle {
        queue,
        events,
        frames,
        audio,
        thread: Some(thread),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Pause,
    Run,
}

struct EmulatorLoop {
    gba: Gba,
    queue: Arc<MessageQueue>,
    event_tx: rtrb::Producer<CoreEvent>,

    state: RunState,
    speed: u32,
    frame_period: Duration,
    last_measured: Instant,
    accumulated: Duration,
}

impl EmulatorLoop {
    fn new(gba: Gba, queue: Arc<MessageQueue>, event_tx: rtrb::Producer<CoreEvent>) -> Self {
        Self {
            gba,
            queue,
            event_tx,
            state: RunState::Pause,
            speed: 1,
            frame_period: Duration::from_secs_f64(1.0 / REFRESH_RATE),
            last_measured: Instant::now(),
            accumulated: Duration::ZERO,
        }
    }

    fn run(mut self) {
        loop {
            for message in self.queue.drain() {
                if self.process_message(message) {
                    return;
                }
            }

            if self.state == RunState::Run {
                self.gba.run_for(CYCLES_PER_FRAME);
                self.gba.normalize_clock();
                self.flush_backup();
                self.limit_frame_rate();
            } else {
                // Nothing to emulate; don't spin on the queue.
                thread::sleep(Duration::from_millis(1));
                self.last_measured = Instant::now();
                self.accumulated = Duration::ZERO;
            }
        }
    }

    /// Applies one command. Returns true on `Exit`.
    fn process_message(&mut self, message: Message) -> bool {
        match message {
            Message::Exit => return true,
            Message::LoadBios(image) => {
                if let Err(error) = self.gba.load_bios(&image) {
                    self.report_error(error);
                }
            }
            Message::LoadRom(image) => {
                if let Err(error) = self.gba.load_rom(image) {
                    self.report_error(error);
                }
            }
            Message::LoadBackup(blob) => self.gba.load_backup(&blob),
            Message::BackupType(kind) => {
                if !self.gba.started {
                    self.gba.set_backup_type(kind);
                }
            }
            Message::Reset => self.gba.reset(),
            Message::Run { speed } => {
                self.gba.started = true;
                self.state = RunState::Run;
                self.speed = speed;
                if speed > 0 {
                    self.frame_period =
                        Duration::from_secs_f64(1.0 / REFRESH_RATE / f64::from(speed));
                    self.accumulated = Duration::ZERO;
                    self.last_measured = Instant::now();
                }
            }
            Message::Pause => self.state = RunState::Pause,
            Message::KeyInput { button, pressed } => self.gba.key_input(button, pressed),
            Message::Quicksave => match savestate::save(&self.gba) {
                Ok(blob) => {
                    let _ = self.event_tx.push(CoreEvent::Quicksave(blob));
                }
                Err(error) => self.report_error(error),
            },
            Message::Quickload(blob) => {
                if let Err(error) = savestate::load(&mut self.gba, &blob) {
                    self.report_error(error);
                }
            }
            Message::AudioResampleFrequency(frequency) => {
                self.gba.cpu.bus.sound.resample_frequency = frequency.max(1);
            }
            Message::ColorCorrection(enabled) => self.gba.color_correction = enabled,
            Message::Rtc(state) => {
                if !self.gba.started {
                    match state {
                        DeviceState::AutoDetect => {
                            self.gba.rtc_auto_detect = true;
                            self.gba.cpu.bus.cartridge.gpio.rtc_enabled = false;
                        }
                        DeviceState::Enabled => {
                            self.gba.rtc_auto_detect = false;
                            self.gba.cpu.bus.cartridge.gpio.rtc_enabled = true;
                        }
                        DeviceState::Disabled => {
                            self.gba.rtc_auto_detect = false;
                            self.gba.cpu.bus.cartridge.gpio.rtc_enabled = false;
                        }
                    }
                }
            }
        }
        false
    }

    fn report_error(&mut self, error: String) {
        tracing::error!("{error}");
        let _ = self.event_tx.push(CoreEvent::Error(error));
    }

    /// Hands a copy of the save data to the front-end whenever it changed.
    fn flush_backup(&mut self) {
        let backup = &mut self.gba.cpu.bus.cartridge.backup;
        if backup.dirty {
            backup.dirty = false;
            let blob = backup.data.clone();
            let _ = self.event_tx.push(CoreEvent::Backup(blob));
        }
    }

    /// Wall-clock pacing: accumulate elapsed time and sleep off the
    /// shortfall against the target frame period. Accumulated debt is
    /// capped so a preempted thread does not burst to catch up.
    fn limit_frame_rate(&mut self) {
        if self.speed == 0 {
            self.last_measured = Instant::now();
            self.accumulated = Duration::ZERO;
            return;
        }

        let now = Instant::now();
        self.accumulated += now - self.last_measured;
        self.last_measured = now;

        if self.accumulated < self.frame_period {
            thread::sleep(self.frame_period - self.accumulated);
            let now = Instant::now();
            self.accumulated += now - self.last_measured;
            self.last_measured = now;
        }

        self.accumulated -= self.frame_period.min(self.accumulated);
        self.accumulated = self.accumulated.min(2 * self.frame_period);
    }
}
