//! Strongly typed step model shared by the engine, the CLI, and authoring tools.
//!
//! A [`Step`] is only ever built from parameters that validated for its kind, so an
//! invalid step cannot enter a run. The persisted shape is [`StepRecord`]; parameter
//! bags keep authoring order (via `IndexMap`) and unknown keys, and unknown record
//! fields are carried along, so loading and saving a step file is lossless.

use std::{fmt, str::FromStr};

use chrono::Local;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

pub use validation::ValidationError;
use validation::ParamReader;

/// Ordered parameter bag attached to a step.
pub type StepParams = IndexMap<String, JsonValue>;

/// Format used for the informational `created_at` stamp.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEFAULT_CONFIDENCE: f64 = 0.8;
const DEFAULT_RETRY: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;
const DEFAULT_DRAG_DURATION_SECS: f64 = 0.5;
const DEFAULT_COMMAND_TIMEOUT_SECS: f64 = 30.0;

/// Closed set of step kinds understood by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ImageClick,
    CoordClick,
    CoordDrag,
    ImageOffsetClick,
    Sleep,
    Key,
    Copy,
    Paste,
    CustomText,
    CmdCommand,
    RepeatStart,
    RepeatEnd,
}

impl StepKind {
    /// Every kind, in the order authoring tools list them.
    pub const ALL: [StepKind; 12] = [
        StepKind::ImageClick,
        StepKind::CoordClick,
        StepKind::CoordDrag,
        StepKind::ImageOffsetClick,
        StepKind::Sleep,
        StepKind::Key,
        StepKind::Copy,
        StepKind::Paste,
        StepKind::CustomText,
        StepKind::CmdCommand,
        StepKind::RepeatStart,
        StepKind::RepeatEnd,
    ];

    /// The persisted `type` tag.
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::ImageClick => "image_click",
            StepKind::CoordClick => "coord_click",
            StepKind::CoordDrag => "coord_drag",
            StepKind::ImageOffsetClick => "image_offset_click",
            StepKind::Sleep => "sleep",
            StepKind::Key => "key",
            StepKind::Copy => "copy",
            StepKind::Paste => "paste",
            StepKind::CustomText => "custom_text",
            StepKind::CmdCommand => "cmd_command",
            StepKind::RepeatStart => "repeat_start",
            StepKind::RepeatEnd => "repeat_end",
        }
    }

    /// True for `repeat_start` and `repeat_end`.
    pub fn is_loop_marker(self) -> bool {
        matches!(self, StepKind::RepeatStart | StepKind::RepeatEnd)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        StepKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownKind(value.to_string()))
    }
}

/// Pointer button/press pattern used by click steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClickType {
    #[default]
    Single,
    Double,
    Right,
}

impl ClickType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClickType::Single => "single",
            ClickType::Double => "double",
            ClickType::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" | "left" => Some(ClickType::Single),
            "double" => Some(ClickType::Double),
            "right" => Some(ClickType::Right),
            _ => None,
        }
    }
}

/// Screen coordinate in logical (DPI-independent) pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Template search settings shared by the image click kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTarget {
    /// Template image file, resolved relative to the working directory.
    pub image_path: String,
    /// Minimum normalized match score in `[0, 1]`.
    pub confidence: f64,
    /// Additional attempts after the first one.
    pub retry: u32,
    /// Pause between attempts, in seconds.
    pub delay_secs: f64,
    pub click_type: ClickType,
}

/// Wait behavior of a `sleep` step.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitSpec {
    /// Block for a fixed duration.
    Sleep { seconds: f64 },
    /// Block until the next occurrence of a wall-clock time (`HH:MM:SS`).
    Scheduled { target_time: String },
}

/// Shell command settings of a `cmd_command` step.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub command: String,
    pub timeout_secs: f64,
    /// When false the command is launched and left running.
    pub wait: bool,
}

/// Validated, typed action of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    ImageClick(ImageTarget),
    CoordClick { point: Point, click_type: ClickType },
    CoordDrag { from: Point, to: Point, duration_secs: f64 },
    ImageOffsetClick { target: ImageTarget, offset: Point },
    Sleep(WaitSpec),
    Key { key: String },
    Copy,
    Paste,
    CustomText { text: String },
    CmdCommand(CommandSpec),
    RepeatStart { count: u32 },
    RepeatEnd,
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::ImageClick(_) => StepKind::ImageClick,
            StepAction::CoordClick { .. } => StepKind::CoordClick,
            StepAction::CoordDrag { .. } => StepKind::CoordDrag,
            StepAction::ImageOffsetClick { .. } => StepKind::ImageOffsetClick,
            StepAction::Sleep(_) => StepKind::Sleep,
            StepAction::Key { .. } => StepKind::Key,
            StepAction::Copy => StepKind::Copy,
            StepAction::Paste => StepKind::Paste,
            StepAction::CustomText { .. } => StepKind::CustomText,
            StepAction::CmdCommand(_) => StepKind::CmdCommand,
            StepAction::RepeatStart { .. } => StepKind::RepeatStart,
            StepAction::RepeatEnd => StepKind::RepeatEnd,
        }
    }

    /// Validates `params` for `kind` and builds the typed action.
    ///
    /// Legacy image steps saved without `click_type` get the kind's default
    /// written back into `params`.
    pub fn from_params(kind: StepKind, params: &mut StepParams) -> Result<Self, ValidationError> {
        let reader = ParamReader::new(kind, params);
        let action = match kind {
            StepKind::ImageClick => StepAction::ImageClick(image_target(&reader, ClickType::Single)?),
            StepKind::ImageOffsetClick => StepAction::ImageOffsetClick {
                target: image_target(&reader, ClickType::Right)?,
                offset: Point::new(reader.optional_integer("offset_x", 0)?, reader.optional_integer("offset_y", 0)?),
            },
            StepKind::CoordClick => StepAction::CoordClick {
                point: Point::new(reader.integer("x")?, reader.integer("y")?),
                click_type: reader.click_type()?.unwrap_or_default(),
            },
            StepKind::CoordDrag => StepAction::CoordDrag {
                from: Point::new(reader.integer("start_x")?, reader.integer("start_y")?),
                to: Point::new(reader.integer("end_x")?, reader.integer("end_y")?),
                duration_secs: reader.number_in(&["duration"], Some(DEFAULT_DRAG_DURATION_SECS), 0.0, f64::INFINITY)?,
            },
            StepKind::Sleep => StepAction::Sleep(wait_spec(&reader)?),
            StepKind::Key => StepAction::Key {
                key: reader.non_empty_string("key")?,
            },
            StepKind::Copy => StepAction::Copy,
            StepKind::Paste => StepAction::Paste,
            StepKind::CustomText => StepAction::CustomText {
                text: reader.string("text")?,
            },
            StepKind::CmdCommand => StepAction::CmdCommand(CommandSpec {
                command: reader.non_empty_string("command")?,
                timeout_secs: positive_timeout(&reader)?,
                wait: reader.flag("wait", true)?,
            }),
            StepKind::RepeatStart => StepAction::RepeatStart {
                count: reader.count("count", None, 1)?,
            },
            StepKind::RepeatEnd => StepAction::RepeatEnd,
        };

        if let StepAction::ImageClick(target) | StepAction::ImageOffsetClick { target, .. } = &action
            && !params.contains_key("click_type")
        {
            params.insert("click_type".into(), JsonValue::String(target.click_type.as_str().into()));
        }
        Ok(action)
    }
}

fn image_target(reader: &ParamReader<'_>, default_click: ClickType) -> Result<ImageTarget, ValidationError> {
    Ok(ImageTarget {
        image_path: reader.non_empty_string("image_path")?,
        confidence: reader.number_in(&["confidence", "threshold"], Some(DEFAULT_CONFIDENCE), 0.0, 1.0)?,
        retry: reader.count("retry", Some(DEFAULT_RETRY), 0)?,
        delay_secs: reader.number_in(&["delay"], Some(DEFAULT_RETRY_DELAY_SECS), 0.0, f64::INFINITY)?,
        click_type: reader.click_type()?.unwrap_or(default_click),
    })
}

fn wait_spec(reader: &ParamReader<'_>) -> Result<WaitSpec, ValidationError> {
    let wait_type = reader.optional_string("wait_type")?.unwrap_or_else(|| "sleep".to_string());
    match wait_type.trim() {
        "sleep" => Ok(WaitSpec::Sleep {
            seconds: reader.number_in(&["seconds"], None, 0.0, f64::INFINITY)?,
        }),
        "scheduled" => Ok(WaitSpec::Scheduled {
            target_time: reader.non_empty_string("target_time")?,
        }),
        other => Err(ValidationError::InvalidParameter {
            kind: StepKind::Sleep,
            param: "wait_type",
            message: format!("must be 'sleep' or 'scheduled', found '{other}'"),
        }),
    }
}

fn positive_timeout(reader: &ParamReader<'_>) -> Result<f64, ValidationError> {
    let timeout = reader.number_in(&["timeout"], Some(DEFAULT_COMMAND_TIMEOUT_SECS), 0.0, f64::INFINITY)?;
    if timeout == 0.0 {
        return Err(ValidationError::InvalidParameter {
            kind: StepKind::CmdCommand,
            param: "timeout",
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(timeout)
}

/// Persisted shape of a step, as read from and written to step files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step kind tag (for example, `image_click`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific parameters, in authoring order.
    #[serde(default)]
    pub params: StepParams,
    /// Free-form note shown next to the step; never interpreted.
    #[serde(default)]
    pub comment: String,
    /// Absent in older files, where every step was enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Fields this version does not know about, kept for the next save.
    #[serde(flatten)]
    pub extra: IndexMap<String, JsonValue>,
}

const fn default_enabled() -> bool {
    true
}

/// One validated automation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepRecord", into = "StepRecord")]
pub struct Step {
    action: StepAction,
    params: StepParams,
    comment: String,
    enabled: bool,
    created_at: Option<String>,
    extra: IndexMap<String, JsonValue>,
}

impl Step {
    /// Builds an enabled step stamped with the current local time.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when `kind` is unknown or `params` do not
    /// satisfy the kind's requirements.
    pub fn new(kind: &str, params: StepParams, comment: impl Into<String>) -> Result<Self, ValidationError> {
        Self::from_record(StepRecord {
            kind: kind.to_string(),
            params,
            comment: comment.into(),
            enabled: true,
            created_at: Some(Local::now().format(CREATED_AT_FORMAT).to_string()),
            extra: IndexMap::new(),
        })
    }

    /// Validates a persisted record.
    pub fn from_record(record: StepRecord) -> Result<Self, ValidationError> {
        let kind: StepKind = record.kind.parse()?;
        let mut params = record.params;
        let action = StepAction::from_params(kind, &mut params)?;
        Ok(Self {
            action,
            params,
            comment: record.comment,
            enabled: record.enabled,
            created_at: record.created_at,
            extra: record.extra,
        })
    }

    /// Returns the persisted shape, including unknown parameters and fields.
    pub fn to_record(&self) -> StepRecord {
        StepRecord {
            kind: self.kind().as_str().to_string(),
            params: self.params.clone(),
            comment: self.comment.clone(),
            enabled: self.enabled,
            created_at: self.created_at.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    pub fn action(&self) -> &StepAction {
        &self.action
    }

    pub fn params(&self) -> &StepParams {
        &self.params
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Builder form of [`Step::set_enabled`].
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }
}

impl TryFrom<StepRecord> for Step {
    type Error = ValidationError;

    fn try_from(record: StepRecord) -> Result<Self, Self::Error> {
        Step::from_record(record)
    }
}

impl From<Step> for StepRecord {
    fn from(step: Step) -> Self {
        step.to_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: JsonValue) -> StepParams {
        serde_json::from_value(value).expect("params")
    }

    #[test]
    fn legacy_image_click_defaults_to_single_click() {
        let record: StepRecord = serde_json::from_value(json!({
            "type": "image_click",
            "params": { "image_path": "ok_button.png", "confidence": 0.9 },
            "comment": "press OK"
        }))
        .expect("record");

        let step = Step::from_record(record).expect("valid step");
        let StepAction::ImageClick(target) = step.action() else {
            panic!("expected image click, got {:?}", step.action());
        };
        assert_eq!(target.click_type, ClickType::Single);
        assert_eq!(step.params().get("click_type"), Some(&json!("single")));
        assert!(step.is_enabled());
    }

    #[test]
    fn legacy_offset_click_defaults_to_right_click() {
        let step = Step::new(
            "image_offset_click",
            params(json!({ "image_path": "icon.png", "offset_x": 12, "offset_y": -4 })),
            "",
        )
        .expect("valid step");
        let StepAction::ImageOffsetClick { target, offset } = step.action() else {
            panic!("expected offset click");
        };
        assert_eq!(target.click_type, ClickType::Right);
        assert_eq!(*offset, Point::new(12, -4));
    }

    #[test]
    fn threshold_is_accepted_as_confidence_alias() {
        let step = Step::new("image_click", params(json!({ "image_path": "a.png", "threshold": 0.65 })), "").expect("step");
        let StepAction::ImageClick(target) = step.action() else {
            panic!("expected image click");
        };
        assert_eq!(target.confidence, 0.65);
        assert_eq!(target.retry, DEFAULT_RETRY);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let error = Step::new("teleport", StepParams::new(), "").expect_err("unknown kind");
        assert_eq!(error, ValidationError::UnknownKind("teleport".into()));
    }

    #[test]
    fn confidence_outside_unit_interval_is_rejected() {
        let error = Step::new("image_click", params(json!({ "image_path": "a.png", "confidence": 1.2 })), "").expect_err("range");
        assert!(matches!(error, ValidationError::InvalidParameter { param: "confidence", .. }));
    }

    #[test]
    fn repeat_start_requires_positive_count() {
        let zero = Step::new("repeat_start", params(json!({ "count": 0 })), "").expect_err("zero count");
        assert!(matches!(zero, ValidationError::InvalidParameter { param: "count", .. }));

        let missing = Step::new("repeat_start", StepParams::new(), "").expect_err("missing count");
        assert_eq!(
            missing,
            ValidationError::MissingParameter {
                kind: StepKind::RepeatStart,
                param: "count"
            }
        );
    }

    #[test]
    fn negative_retry_is_rejected() {
        let error = Step::new("image_click", params(json!({ "image_path": "a.png", "retry": -1 })), "").expect_err("retry");
        assert!(matches!(error, ValidationError::InvalidParameter { param: "retry", .. }));
    }

    #[test]
    fn scheduled_sleep_requires_target_time() {
        let step = Step::new("sleep", params(json!({ "wait_type": "scheduled", "target_time": "07:30:00" })), "").expect("step");
        assert_eq!(
            step.action(),
            &StepAction::Sleep(WaitSpec::Scheduled {
                target_time: "07:30:00".into()
            })
        );

        let error = Step::new("sleep", params(json!({ "wait_type": "scheduled" })), "").expect_err("missing time");
        assert!(matches!(error, ValidationError::MissingParameter { param: "target_time", .. }));
    }

    #[test]
    fn command_defaults_wait_and_timeout() {
        let step = Step::new("cmd_command", params(json!({ "command": "echo hello" })), "").expect("step");
        assert_eq!(
            step.action(),
            &StepAction::CmdCommand(CommandSpec {
                command: "echo hello".into(),
                timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
                wait: true,
            })
        );
    }

    #[test]
    fn record_round_trip_keeps_unknown_fields_and_param_order() {
        let source = r##"{
            "type": "coord_click",
            "params": { "y": 20, "x": 10, "click_type": "double", "note": "legacy" },
            "comment": "",
            "enabled": false,
            "created_at": "2024-05-01 10:00:00",
            "color": "#ff0000"
        }"##;
        let step: Step = serde_json::from_str(source).expect("step");
        assert!(!step.is_enabled());

        let saved = serde_json::to_value(&step).expect("serialize");
        let expected: JsonValue = serde_json::from_str(source).expect("expected");
        assert_eq!(saved, expected);
        let keys: Vec<&str> = step.params().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["y", "x", "click_type", "note"]);
    }

    #[test]
    fn yaml_records_without_enabled_default_to_enabled() {
        let yaml_text = r#"
type: key
params:
  key: ctrl+s
comment: save
"#;
        let step: Step = serde_yaml::from_str(yaml_text).expect("yaml step");
        assert!(step.is_enabled());
        assert_eq!(step.kind(), StepKind::Key);
    }
}
