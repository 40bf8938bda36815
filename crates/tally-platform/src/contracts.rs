use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportPolicy {
    CreateOnly,
    UpdateOnly,
    #[default]
    Upsert,
}

impl ImportPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportPolicy::CreateOnly => "create_only",
            ImportPolicy::UpdateOnly => "update_only",
            ImportPolicy::Upsert => "upsert",
        }
    }

    pub fn required_permissions(self) -> &'static [ImportPermission] {
        match self {
            ImportPolicy::CreateOnly => &[ImportPermission::Create],
            ImportPolicy::UpdateOnly => &[ImportPermission::Update],
            ImportPolicy::Upsert => &[ImportPermission::Create, ImportPermission::Update],
        }
    }
}

impl std::str::FromStr for ImportPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "create_only" => Ok(ImportPolicy::CreateOnly),
            "update_only" => Ok(ImportPolicy::UpdateOnly),
            "upsert" => Ok(ImportPolicy::Upsert),
            other => Err(format!(
                "unknown import policy '{other}', expected create_only, update_only or upsert"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImportPermission {
    Create,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub label: Option<String>,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    pub name: String,
    pub display_name: Option<String>,
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub business_key_fields: Vec<String>,
    #[serde(default)]
    pub import_permissions: Vec<ImportPermission>,
}

impl ModelMetadata {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|field| field.required)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.field(name).is_some_and(|field| field.required)
    }

    /// Fields that must be supplied for rows imported under `policy`.
    ///
    /// Updates match existing records by business key, so only those are
    /// needed; creation needs every required field.
    pub fn fields_needed_for(&self, policy: ImportPolicy) -> Vec<&str> {
        match policy {
            ImportPolicy::UpdateOnly => self
                .business_key_fields
                .iter()
                .map(String::as_str)
                .collect(),
            ImportPolicy::CreateOnly | ImportPolicy::Upsert => self
                .required_fields()
                .map(|field| field.name.as_str())
                .collect(),
        }
    }

    pub fn allows(&self, policy: ImportPolicy) -> bool {
        policy
            .required_permissions()
            .iter()
            .all(|permission| self.import_permissions.contains(permission))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column_name: String,
    pub field_name: Option<String>,
    pub default_value: Option<String>,
}

impl ColumnMapping {
    pub fn unmapped(column_name: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            field_name: None,
            default_value: None,
        }
    }

    pub fn mapped(column_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            field_name: Some(field_name.into()),
            default_value: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.field_name.as_deref().is_some_and(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMappingSuggestion {
    pub column_name: String,
    pub field_name: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSuggestionsResponse {
    pub suggestions: Vec<ColumnMappingSuggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportSessionResponse {
    pub import_session_token: String,
    pub detected_columns: Vec<String>,
    #[serde(default)]
    pub sample_rows: Vec<Map<String, Value>>,
    pub total_rows: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub column_mappings: Vec<ColumnMapping>,
    pub import_policy: ImportPolicy,
    pub skip_validation_errors: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_values: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowValidationError {
    pub row_number: Option<u64>,
    pub field_name: Option<String>,
    pub error_type: String,
    pub message: String,
    pub current_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewRow {
    pub row_number: u64,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub errors: Vec<RowValidationError>,
    #[serde(default)]
    pub warnings: Vec<RowValidationError>,
}

impl PreviewRow {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationSummary {
    pub total_rows: u64,
    pub valid_rows: u64,
    pub error_rows: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub warning_count: u64,
}

/// Position of a preview or execution window within the uploaded file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchInfo {
    pub current_batch: u32,
    pub total_batches: u32,
    pub batch_size: u32,
    pub total_rows: u64,
    pub current_batch_rows: u32,
}

impl BatchInfo {
    /// The batch layout the server produces for a file of `total_rows` rows.
    ///
    /// An empty file still has one (empty) batch. Returns `None` for a zero
    /// batch size or a `current_batch` past the end.
    pub fn compute(total_rows: u64, batch_size: u32, current_batch: u32) -> Option<Self> {
        if batch_size == 0 {
            return None;
        }

        let size = u64::from(batch_size);
        let total_batches = u32::try_from(total_rows.div_ceil(size).max(1)).ok()?;
        if current_batch >= total_batches {
            return None;
        }

        let start = u64::from(current_batch) * size;
        let current_batch_rows = total_rows.saturating_sub(start).min(size) as u32;

        Some(Self {
            current_batch,
            total_batches,
            batch_size,
            total_rows,
            current_batch_rows,
        })
    }

    pub fn contains(&self, batch_number: u32) -> bool {
        batch_number < self.total_batches
    }

    pub fn is_first(&self) -> bool {
        self.current_batch == 0
    }

    pub fn is_last(&self) -> bool {
        self.current_batch + 1 >= self.total_batches
    }

    /// 1-indexed inclusive row range covered by the current batch, `None` when empty.
    pub fn row_range(&self) -> Option<(u64, u64)> {
        if self.current_batch_rows == 0 {
            return None;
        }
        let offset = u64::from(self.current_batch) * u64::from(self.batch_size);
        Some((offset + 1, offset + u64::from(self.current_batch_rows)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportPreviewResponse {
    pub preview_data: Vec<PreviewRow>,
    pub validation_summary: ValidationSummary,
    pub can_proceed: bool,
    pub batch_info: Option<BatchInfo>,
}

impl ImportPreviewResponse {
    /// Row errors grouped by 1-indexed row number, in row order.
    pub fn errors_by_row(&self) -> BTreeMap<u64, Vec<&RowValidationError>> {
        let mut grouped: BTreeMap<u64, Vec<&RowValidationError>> = BTreeMap::new();
        for row in &self.preview_data {
            for error in &row.errors {
                grouped
                    .entry(error.row_number.unwrap_or(row.row_number))
                    .or_default()
                    .push(error);
            }
        }
        grouped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub mappings: Vec<ColumnMapping>,
    pub import_policy: ImportPolicy,
    pub skip_errors: bool,
    pub batch_size: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Completed => "completed",
            ImportStatus::CompletedWithErrors => "completed_with_errors",
            ImportStatus::Failed => "failed",
            ImportStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchProcessingResult {
    pub status: ImportStatus,
    pub total_rows: u64,
    pub successful_rows: u64,
    pub error_rows: u64,
    #[serde(default)]
    pub skipped_rows: u64,
    #[serde(default)]
    pub errors: Vec<RowValidationError>,
}

/// Terminal outcome of an execution, kept verbatim including partial counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportResult {
    pub model: String,
    pub status: ImportStatus,
    pub total_rows: u64,
    pub successful_rows: u64,
    pub error_rows: u64,
    pub skipped_rows: u64,
    pub errors: Vec<RowValidationError>,
    pub finished_at: DateTime<Utc>,
}

impl ImportResult {
    pub fn from_batch(model: impl Into<String>, batch: BatchProcessingResult) -> Self {
        Self {
            model: model.into(),
            status: batch.status,
            total_rows: batch.total_rows,
            successful_rows: batch.successful_rows,
            error_rows: batch.error_rows,
            skipped_rows: batch.skipped_rows,
            errors: batch.errors,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingTemplate {
    pub id: Option<Uuid>,
    pub name: String,
    pub model: String,
    pub mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub import_policy: ImportPolicy,
    #[serde(default)]
    pub default_values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveTemplateRequest {
    pub name: String,
    pub mappings: Vec<ColumnMapping>,
    pub import_policy: ImportPolicy,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    Csv,
    Xlsx,
    Json,
}

impl TemplateFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TemplateFormat::Csv => "csv",
            TemplateFormat::Xlsx => "xlsx",
            TemplateFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for TemplateFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(TemplateFormat::Csv),
            "xlsx" => Ok(TemplateFormat::Xlsx),
            "json" => Ok(TemplateFormat::Json),
            other => Err(format!("unsupported format '{other}'")),
        }
    }
}

fn default_field_type() -> String {
    "string".to_string()
}
