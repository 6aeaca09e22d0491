//! Step files: loading and saving step sequences as JSON or YAML.
//!
//! A document is either a bare list of step records or an object whose
//! `steps` key holds that list next to arbitrary metadata. Both shapes load
//! into [`StepDocument`] and save back in the shape they came from, keeping
//! unknown fields and parameter order.

use std::{
    fs,
    path::{Path, PathBuf},
};

use autostep_types::{Step, StepRecord, ValidationError};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use thiserror::Error;
use tracing::debug;

const STEPS_KEY: &str = "steps";

/// Errors raised while reading or writing a step document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to access step file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON step document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML step document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("step document must be a list of steps or an object with a 'steps' list")]
    Shape,
    #[error("step record {index} is malformed: {source}")]
    MalformedRecord {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("step record {index} is invalid: {source}")]
    InvalidStep {
        index: usize,
        #[source]
        source: ValidationError,
    },
}

/// On-disk encoding of a step document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Picks the format from a `.json`, `.yaml`, or `.yml` extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "json" => Some(DocumentFormat::Json),
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }
}

/// Top-level shape a document was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentLayout {
    #[default]
    List,
    Object,
}

/// A validated step sequence plus the document metadata around it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepDocument {
    pub steps: Vec<Step>,
    /// Top-level fields other than `steps` (object documents only).
    pub extra: IndexMap<String, JsonValue>,
    pub layout: DocumentLayout,
}

impl StepDocument {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct ObjectDocument<'a> {
    steps: &'a [Step],
    #[serde(flatten)]
    extra: &'a IndexMap<String, JsonValue>,
}

/// Parses a document whose format is unknown.
///
/// Text that looks like JSON is parsed as JSON first; anything else (or JSON
/// that fails to parse but is valid YAML) goes through the YAML parser.
pub fn parse_step_document(text: &str) -> Result<StepDocument, DocumentError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        match parse_step_document_as(text, DocumentFormat::Json) {
            Err(DocumentError::Json(json_error)) => {
                parse_step_document_as(text, DocumentFormat::Yaml).map_err(|_| DocumentError::Json(json_error))
            }
            other => other,
        }
    } else {
        parse_step_document_as(text, DocumentFormat::Yaml)
    }
}

/// Parses a document in a known format.
pub fn parse_step_document_as(text: &str, format: DocumentFormat) -> Result<StepDocument, DocumentError> {
    let root: YamlValue = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
    };

    let (records, extra, layout) = match root {
        YamlValue::Sequence(records) => (records, IndexMap::new(), DocumentLayout::List),
        YamlValue::Mapping(mut mapping) => {
            let Some(YamlValue::Sequence(records)) = mapping.shift_remove(STEPS_KEY) else {
                return Err(DocumentError::Shape);
            };
            let mut extra = IndexMap::new();
            for (key, value) in mapping {
                let YamlValue::String(key) = key else {
                    return Err(DocumentError::Shape);
                };
                extra.insert(key, serde_yaml::from_value::<JsonValue>(value)?);
            }
            (records, extra, DocumentLayout::Object)
        }
        _ => return Err(DocumentError::Shape),
    };

    let steps = records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let record: StepRecord =
                serde_yaml::from_value(record).map_err(|source| DocumentError::MalformedRecord { index, source })?;
            Step::from_record(record).map_err(|source| DocumentError::InvalidStep { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(steps = steps.len(), ?layout, "parsed step document");
    Ok(StepDocument { steps, extra, layout })
}

/// Renders `document` in `format`, keeping its original layout.
pub fn render_step_document(document: &StepDocument, format: DocumentFormat) -> Result<String, DocumentError> {
    let as_object = document.layout == DocumentLayout::Object || !document.extra.is_empty();
    let object = ObjectDocument {
        steps: &document.steps,
        extra: &document.extra,
    };

    let rendered = match (format, as_object) {
        (DocumentFormat::Json, true) => serde_json::to_string_pretty(&object)?,
        (DocumentFormat::Json, false) => serde_json::to_string_pretty(&document.steps)?,
        (DocumentFormat::Yaml, true) => serde_yaml::to_string(&object)?,
        (DocumentFormat::Yaml, false) => serde_yaml::to_string(&document.steps)?,
    };
    Ok(rendered)
}

/// Loads a step file, choosing the parser from the extension.
pub fn load_step_file(path: impl AsRef<Path>) -> Result<StepDocument, DocumentError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match DocumentFormat::from_path(path) {
        Some(format) => parse_step_document_as(&text, format),
        None => parse_step_document(&text),
    }
}

/// Writes a step file; YAML for `.yaml`/`.yml`, JSON otherwise.
pub fn save_step_file(path: impl AsRef<Path>, document: &StepDocument) -> Result<(), DocumentError> {
    let path = path.as_ref();
    let format = DocumentFormat::from_path(path).unwrap_or(DocumentFormat::Json);
    let rendered = render_step_document(document, format)?;
    fs::write(path, rendered).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })
}
