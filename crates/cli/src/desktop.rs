//! Desktop adapters for the engine's service traits.
//!
//! Screens come from `xcap`, matching from `imageproc`, pointer and keyboard
//! input from `enigo`, and the clipboard from `arboard`.

use std::{
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use autostep_engine::{Frame, InputSynthesizer, ScreenLocator, TemplateMatch};
use autostep_types::{ClickType, Point};
use enigo::{Enigo, Key, KeyboardControllable, MouseButton, MouseControllable};
use image::{DynamicImage, GrayImage};
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};
use tracing::debug;

const DRAG_STEP: Duration = Duration::from_millis(10);
const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(50);

/// Captures monitors with `xcap` and scores templates by normalized cross-correlation.
pub struct XcapLocator;

impl ScreenLocator for XcapLocator {
    fn capture_region(&self, monitor_index: usize) -> Result<Frame> {
        let monitors = xcap::Monitor::all().map_err(|error| anyhow!("failed to list monitors: {error}"))?;
        let count = monitors.len();
        let monitor = monitors
            .into_iter()
            .nth(monitor_index)
            .with_context(|| format!("monitor {monitor_index} does not exist ({count} connected)"))?;

        let x = monitor.x().map_err(|error| anyhow!("failed to read monitor position: {error}"))?;
        let y = monitor.y().map_err(|error| anyhow!("failed to read monitor position: {error}"))?;
        let scale_factor = monitor.scale_factor().map_err(|error| anyhow!("failed to read monitor scale: {error}"))?;
        let captured = monitor
            .capture_image()
            .map_err(|error| anyhow!("failed to capture monitor {monitor_index}: {error}"))?;

        debug!(monitor_index, width = captured.width(), height = captured.height(), scale_factor, "captured monitor");
        Ok(Frame {
            image: DynamicImage::ImageRgba8(captured).to_luma8(),
            origin: Point::new(x, y),
            scale_factor: f64::from(scale_factor),
        })
    }

    fn match_template(&self, frame: &Frame, template: &GrayImage) -> Result<TemplateMatch> {
        let (frame_width, frame_height) = frame.image.dimensions();
        let (width, height) = template.dimensions();
        if width == 0 || height == 0 {
            bail!("template image is empty");
        }
        if width > frame_width || height > frame_height {
            bail!("template ({width}x{height}) is larger than the captured screen ({frame_width}x{frame_height})");
        }

        let scores = match_template(&frame.image, template, MatchTemplateMethod::CrossCorrelationNormalized);
        let extremes = find_extremes(&scores);
        let (match_x, match_y) = extremes.max_value_location;
        Ok(TemplateMatch {
            score: f64::from(extremes.max_value).clamp(0.0, 1.0),
            location: Point::new(to_coordinate(match_x)?, to_coordinate(match_y)?),
            width,
            height,
        })
    }
}

fn to_coordinate(value: u32) -> Result<i32> {
    i32::try_from(value).context("screen coordinate out of range")
}

/// Synthesizes input with `enigo`, creating a fresh handle per call.
///
/// The last position the pointer was sent to is remembered as the drag origin.
#[derive(Default)]
pub struct EnigoInput {
    pointer: Mutex<Option<Point>>,
}

impl EnigoInput {
    fn remember(&self, point: Point) {
        *self.pointer.lock().expect("pointer lock poisoned") = Some(point);
    }
}

impl InputSynthesizer for EnigoInput {
    fn click(&self, point: Point, click_type: ClickType) -> Result<()> {
        let mut enigo = Enigo::new();
        enigo.mouse_move_to(point.x, point.y);
        self.remember(point);
        match click_type {
            ClickType::Single => enigo.mouse_click(MouseButton::Left),
            ClickType::Double => {
                enigo.mouse_click(MouseButton::Left);
                thread::sleep(DOUBLE_CLICK_GAP);
                enigo.mouse_click(MouseButton::Left);
            }
            ClickType::Right => enigo.mouse_click(MouseButton::Right),
        }
        Ok(())
    }

    fn move_to(&self, point: Point) -> Result<()> {
        Enigo::new().mouse_move_to(point.x, point.y);
        self.remember(point);
        Ok(())
    }

    fn drag_to(&self, point: Point, duration: Duration) -> Result<()> {
        let from = self.pointer.lock().expect("pointer lock poisoned").unwrap_or(point);
        let mut enigo = Enigo::new();
        enigo.mouse_down(MouseButton::Left);

        let started = Instant::now();
        while started.elapsed() < duration {
            let progress = started.elapsed().as_secs_f64() / duration.as_secs_f64();
            let x = f64::from(from.x) + f64::from(point.x - from.x) * progress;
            let y = f64::from(from.y) + f64::from(point.y - from.y) * progress;
            enigo.mouse_move_to(x.round() as i32, y.round() as i32);
            thread::sleep(DRAG_STEP);
        }

        enigo.mouse_move_to(point.x, point.y);
        enigo.mouse_up(MouseButton::Left);
        self.remember(point);
        Ok(())
    }

    fn press(&self, key: &str) -> Result<()> {
        let key = map_key(key)?;
        Enigo::new().key_click(key);
        Ok(())
    }

    fn hotkey(&self, keys: &[&str]) -> Result<()> {
        let mapped = keys.iter().map(|name| map_key(name)).collect::<Result<Vec<_>>>()?;
        let mut enigo = Enigo::new();
        for key in &mapped {
            enigo.key_down(*key);
        }
        for key in mapped.iter().rev() {
            enigo.key_up(*key);
        }
        Ok(())
    }

    fn set_clipboard(&self, text: &str) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("clipboard unavailable")?;
        clipboard.set_text(text.to_string()).context("failed to write clipboard")
    }
}

/// Maps a normalized key name onto an `enigo` key.
fn map_key(name: &str) -> Result<Key> {
    let key = match name {
        "ctrl" => Key::Control,
        "shift" => Key::Shift,
        "alt" => Key::Alt,
        "meta" => Key::Meta,
        "enter" => Key::Return,
        "tab" => Key::Tab,
        "space" => Key::Space,
        "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "capslock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(single), None) => Key::Layout(single),
                _ => bail!("unknown key '{other}'"),
            }
        }
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_named_and_printable_keys() {
        assert!(matches!(map_key("ctrl"), Ok(Key::Control)));
        assert!(matches!(map_key("enter"), Ok(Key::Return)));
        assert!(matches!(map_key("v"), Ok(Key::Layout('v'))));
        assert!(matches!(map_key("+"), Ok(Key::Layout('+'))));
        assert!(map_key("hyper").is_err());
    }

    #[test]
    fn finds_an_exact_template_copy() {
        let mut screen = GrayImage::new(40, 30);
        for (x, y, pixel) in screen.enumerate_pixels_mut() {
            pixel.0[0] = ((x * 7 + y * 13) % 251) as u8;
        }
        let template = image::imageops::crop_imm(&screen, 12, 9, 8, 6).to_image();
        let frame = Frame {
            image: screen,
            origin: Point::new(0, 0),
            scale_factor: 1.0,
        };

        let found = XcapLocator.match_template(&frame, &template).expect("match");
        assert_eq!(found.location, Point::new(12, 9));
        assert!(found.score > 0.99, "{}", found.score);
        assert_eq!((found.width, found.height), (8, 6));
    }

    #[test]
    fn oversized_templates_are_rejected() {
        let frame = Frame {
            image: GrayImage::new(10, 10),
            origin: Point::new(0, 0),
            scale_factor: 1.0,
        };
        assert!(XcapLocator.match_template(&frame, &GrayImage::new(11, 4)).is_err());
    }
}
