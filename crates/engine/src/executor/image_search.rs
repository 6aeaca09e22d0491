//! Template search with retries for the image click kinds.

use std::{path::Path, thread};

use autostep_types::{ImageTarget, Point};
use tracing::{debug, info};

use super::{errors::ExecutionError, seconds};
use crate::services::{Frame, ScreenLocator, TemplateMatch};

/// Finds `target` on the monitor and returns the logical point to click.
///
/// Makes up to `retry + 1` attempts, pausing `delay_secs` between them but
/// not after the last one. Capture and matching errors end the search.
pub(super) fn locate(
    locator: &dyn ScreenLocator,
    template_path: &Path,
    target: &ImageTarget,
    offset: Point,
    monitor_index: usize,
) -> Result<Point, ExecutionError> {
    let template = locator
        .load_template(template_path)
        .map_err(|error| ExecutionError::ImageDecode {
            path: template_path.to_path_buf(),
            message: format!("{error:#}"),
        })?;

    let attempts = target.retry.saturating_add(1);
    let delay = seconds(target.delay_secs);
    let mut last_score = 0.0;

    for attempt in 1..=attempts {
        let frame = locator.capture_region(monitor_index).map_err(ExecutionError::capture)?;
        let found = locator.match_template(&frame, &template).map_err(ExecutionError::capture)?;
        debug!(
            image = %target.image_path,
            attempt,
            attempts,
            score = found.score,
            threshold = target.confidence,
            "template match attempt"
        );

        if found.score >= target.confidence {
            let point = click_point(&frame, &found, offset);
            info!(image = %target.image_path, attempt, score = found.score, %point, "template found");
            return Ok(point);
        }

        last_score = found.score;
        if attempt < attempts {
            thread::sleep(delay);
        }
    }

    Err(ExecutionError::NotFound {
        file: target.image_path.clone(),
        attempts,
        last_score,
        threshold: target.confidence,
    })
}

/// Center of `found` converted from frame pixels to logical desktop
/// coordinates, plus `offset` (already logical).
pub(crate) fn click_point(frame: &Frame, found: &TemplateMatch, offset: Point) -> Point {
    let scale = if frame.scale_factor.is_finite() && frame.scale_factor > 0.0 {
        frame.scale_factor
    } else {
        1.0
    };
    let center_x = f64::from(found.location.x) + f64::from(found.width / 2);
    let center_y = f64::from(found.location.y) + f64::from(found.height / 2);

    Point::new(
        frame.origin.x + (center_x / scale).round() as i32 + offset.x,
        frame.origin.y + (center_y / scale).round() as i32 + offset.y,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn frame(origin: Point, scale_factor: f64) -> Frame {
        Frame {
            image: GrayImage::new(1, 1),
            origin,
            scale_factor,
        }
    }

    fn found(x: i32, y: i32, width: u32, height: u32) -> TemplateMatch {
        TemplateMatch {
            score: 1.0,
            location: Point::new(x, y),
            width,
            height,
        }
    }

    #[test]
    fn center_is_location_plus_half_size() {
        let point = click_point(&frame(Point::new(0, 0), 1.0), &found(10, 20, 8, 6), Point::default());
        assert_eq!(point, Point::new(14, 23));
    }

    #[test]
    fn scale_factor_and_origin_convert_to_logical() {
        let point = click_point(&frame(Point::new(1920, 0), 2.0), &found(100, 40, 20, 12), Point::new(5, -3));
        assert_eq!(point, Point::new(1920 + 55 + 5, 23 - 3));
    }

    #[test]
    fn invalid_scale_factor_is_treated_as_one() {
        let point = click_point(&frame(Point::new(0, 0), 0.0), &found(2, 2, 4, 4), Point::default());
        assert_eq!(point, Point::new(4, 4));
    }
}
