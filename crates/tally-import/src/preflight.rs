//! Checks run before any request leaves the client.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tally_platform::{ColumnMapping, ImportPolicy, ModelMetadata};
use thiserror::Error;

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "json"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreflightError {
    #[error("file '{0}' has no extension, expected one of: csv, xlsx, json")]
    MissingExtension(String),

    #[error("unsupported file type '.{0}', expected one of: csv, xlsx, json")]
    UnsupportedExtension(String),

    #[error("file is {size} bytes, above the {max} byte upload limit")]
    TooLarge { size: u64, max: u64 },

    #[error("required fields are not mapped: {}", .0.join(", "))]
    UnmappedRequiredFields(Vec<String>),

    #[error("column '{column}' is mapped to unknown field '{field}'")]
    UnknownField { column: String, field: String },

    #[error("field '{0}' is mapped from more than one column")]
    DuplicateField(String),

    #[error("column '{0}' is not in the uploaded file")]
    UnknownColumn(String),

    #[error("column '{0}' has more than one mapping entry")]
    DuplicateColumn(String),

    #[error("column '{0}' of the uploaded file has no mapping entry")]
    MissingColumn(String),

    #[error("model '{model}' does not allow {policy} imports")]
    PolicyNotAllowed { model: String, policy: &'static str },

    #[error("batch {requested} is out of range, the file has {total} batches")]
    BatchOutOfRange { requested: u32, total: u32 },

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("preview has blocking validation errors; fix them or execute with skip errors")]
    CannotProceed,

    #[error("template '{template}' targets model '{expected}', not '{actual}'")]
    TemplateModelMismatch {
        template: String,
        expected: String,
        actual: String,
    },
}

/// A file picked for upload, held in memory until the session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { file_name, content })
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }

    pub fn mime_type(&self) -> &'static str {
        match self.extension().as_deref() {
            Some("csv") => "text/csv",
            Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Some("json") => "application/json",
            _ => "application/octet-stream",
        }
    }
}

pub fn validate_upload(file: &UploadFile, max_bytes: u64) -> Result<(), PreflightError> {
    let extension = file
        .extension()
        .ok_or_else(|| PreflightError::MissingExtension(file.file_name.clone()))?;
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(PreflightError::UnsupportedExtension(extension));
    }

    let size = file.size();
    if size > max_bytes {
        return Err(PreflightError::TooLarge {
            size,
            max: max_bytes,
        });
    }

    Ok(())
}

/// Requires one mapping entry per detected column, no more and no fewer.
pub fn validate_columns(
    detected_columns: &[String],
    mappings: &[ColumnMapping],
) -> Result<(), PreflightError> {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for column in detected_columns {
        *remaining.entry(column.as_str()).or_default() += 1;
    }

    for mapping in mappings {
        match remaining.get_mut(mapping.column_name.as_str()) {
            None => return Err(PreflightError::UnknownColumn(mapping.column_name.clone())),
            Some(0) => return Err(PreflightError::DuplicateColumn(mapping.column_name.clone())),
            Some(count) => *count -= 1,
        }
    }

    match detected_columns
        .iter()
        .find(|column| remaining.get(column.as_str()).is_some_and(|count| *count > 0))
    {
        Some(column) => Err(PreflightError::MissingColumn(column.clone())),
        None => Ok(()),
    }
}

/// Rejects mappings that target fields the model lacks or map one field twice.
pub fn validate_mappings(
    model: &ModelMetadata,
    mappings: &[ColumnMapping],
) -> Result<(), PreflightError> {
    let mut seen = HashSet::new();
    for mapping in mappings.iter().filter(|mapping| mapping.is_mapped()) {
        let field = mapping.field_name.as_deref().unwrap_or_default();
        if model.field(field).is_none() {
            return Err(PreflightError::UnknownField {
                column: mapping.column_name.clone(),
                field: field.to_string(),
            });
        }
        if !seen.insert(field) {
            return Err(PreflightError::DuplicateField(field.to_string()));
        }
    }
    Ok(())
}

/// Fields the policy needs that neither a column nor a default value supplies.
pub fn missing_fields(
    model: &ModelMetadata,
    policy: ImportPolicy,
    mappings: &[ColumnMapping],
    default_values: &BTreeMap<String, String>,
) -> Vec<String> {
    let supplied: HashSet<&str> = mappings
        .iter()
        .filter_map(|mapping| {
            let field = mapping.field_name.as_deref()?;
            (!field.is_empty()).then_some(field)
        })
        .chain(default_values.keys().map(String::as_str))
        .collect();

    model
        .fields_needed_for(policy)
        .into_iter()
        .filter(|field| !supplied.contains(field))
        .map(str::to_string)
        .collect()
}

pub fn check_policy(model: &ModelMetadata, policy: ImportPolicy) -> Result<(), PreflightError> {
    if model.allows(policy) {
        Ok(())
    } else {
        Err(PreflightError::PolicyNotAllowed {
            model: model.name.clone(),
            policy: policy.as_str(),
        })
    }
}
