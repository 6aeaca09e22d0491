//! Narrow interfaces to the desktop capabilities the executor drives.
//!
//! The engine never touches pixels, input devices, or processes directly.
//! Concrete adapters live with the binary (or in tests as fakes) and are
//! handed to [`StepExecutor`](crate::StepExecutor) behind `Arc<dyn ...>`.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use autostep_types::{ClickType, Point};
use image::GrayImage;

/// A captured monitor image plus where it sits on the virtual desktop.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixels in physical (device) resolution.
    pub image: GrayImage,
    /// Top-left corner of the monitor in logical desktop coordinates.
    pub origin: Point,
    /// Physical pixels per logical pixel.
    pub scale_factor: f64,
}

/// Best match of a template inside a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// Normalized score in `[0, 1]`.
    pub score: f64,
    /// Top-left corner of the match, in frame pixels.
    pub location: Point,
    pub width: u32,
    pub height: u32,
}

/// Screen capture and template matching.
pub trait ScreenLocator: Send + Sync {
    /// Decodes a template image from disk.
    fn load_template(&self, path: &Path) -> Result<GrayImage> {
        let decoded = image::open(path).with_context(|| format!("failed to decode template image {}", path.display()))?;
        Ok(decoded.to_luma8())
    }

    /// Captures the monitor at `monitor_index`.
    ///
    /// Fails when the index is out of range or the capture device is unavailable.
    fn capture_region(&self, monitor_index: usize) -> Result<Frame>;

    /// Finds the best normalized match of `template` in `frame`.
    fn match_template(&self, frame: &Frame, template: &GrayImage) -> Result<TemplateMatch>;
}

/// Pointer, keyboard, and clipboard synthesis.
pub trait InputSynthesizer: Send + Sync {
    fn click(&self, point: Point, click_type: ClickType) -> Result<()>;

    fn move_to(&self, point: Point) -> Result<()>;

    /// Presses the primary button at the current position, moves to `point`
    /// over `duration`, and releases.
    fn drag_to(&self, point: Point, duration: Duration) -> Result<()>;

    /// Presses and releases a single named key.
    fn press(&self, key: &str) -> Result<()>;

    /// Holds `keys` down in order, then releases them in reverse.
    fn hotkey(&self, keys: &[&str]) -> Result<()>;

    fn set_clipboard(&self, text: &str) -> Result<()>;
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// How a command invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed(CommandOutput),
    /// The timeout elapsed; the process has been killed.
    TimedOut,
    /// Launched without waiting for completion.
    Detached,
}

/// Executes shell command strings.
pub trait CommandRunner: Send + Sync {
    /// Runs `command`, waiting up to `timeout` when `wait` is set.
    ///
    /// Errors are reserved for launch failures; exit status and timeouts are
    /// reported through [`CommandOutcome`].
    fn run(&self, command: &str, timeout: Duration, wait: bool) -> Result<CommandOutcome>;
}
