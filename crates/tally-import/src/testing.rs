use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tally_platform::{
    ApiError, BatchInfo, BatchProcessingResult, ColumnMappingSuggestion, ExecuteRequest,
    ImportPreviewResponse, ImportSessionResponse, ImportStatus, MappingTemplate, ModelMetadata,
    PreviewRequest, PreviewRow, RowValidationError, SaveTemplateRequest, TemplateFormat,
    ValidationSummary,
};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::preflight::UploadFile;
use crate::session::{ImportSessionApi, SessionError};

pub fn account_model() -> ModelMetadata {
    serde_json::from_value(json!({
        "name": "account",
        "fields": [
            {"name": "code", "required": true},
            {"name": "name", "required": true},
            {"name": "account_type", "field_type": "enum", "required": true},
            {"name": "description"}
        ],
        "business_key_fields": ["code"],
        "import_permissions": ["create", "update"]
    }))
    .unwrap()
}

pub fn csv_with_rows(rows: usize) -> UploadFile {
    let mut content = String::from("Code,Name,Type,Notes\n");
    for row in 0..rows {
        content.push_str(&format!("{},Account {row},asset,\n", 1000 + row));
    }
    UploadFile::new("accounts.csv", content.into_bytes())
}

/// In-memory backend that batches and validates like the real service.
#[derive(Default)]
pub struct FakeImportApi {
    pub calls: Mutex<Vec<&'static str>>,
    /// 1-indexed rows that fail validation.
    pub failing_rows: Mutex<Vec<u64>>,
    pub suggestions: Mutex<Vec<ColumnMappingSuggestion>>,
    pub templates: Mutex<Vec<MappingTemplate>>,
    pub fail_next: Mutex<Option<ApiError>>,
    total_rows: Mutex<u64>,
    gate: Option<(Arc<Notify>, Arc<Semaphore>)>,
}

impl FakeImportApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call first signals `entered`, then waits for a permit on `release`.
    pub fn gated() -> (Self, Arc<Notify>, Arc<Semaphore>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Semaphore::new(0));
        let api = Self {
            gate: Some((entered.clone(), release.clone())),
            ..Self::default()
        };
        (api, entered, release)
    }

    pub fn with_failing_rows(self, rows: Vec<u64>) -> Self {
        *self.failing_rows.lock() = rows;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|call| **call == name).count()
    }

    async fn enter(&self, name: &'static str) -> Result<(), SessionError> {
        self.calls.lock().push(name);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.acquire().await.expect("gate closed").forget();
        }
        match self.fail_next.lock().take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn failing(&self) -> Vec<u64> {
        self.failing_rows.lock().clone()
    }

    fn row_errors(row: u64) -> Vec<RowValidationError> {
        vec![RowValidationError {
            row_number: Some(row),
            field_name: Some("account_type".to_string()),
            error_type: "invalid_choice".to_string(),
            message: "unknown account type".to_string(),
            current_value: Some(json!("assset")),
        }]
    }
}

#[async_trait]
impl ImportSessionApi for FakeImportApi {
    async fn list_models(&self) -> Result<Vec<String>, SessionError> {
        self.enter("list_models").await?;
        Ok(vec!["account".to_string()])
    }

    async fn model_metadata(&self, model: &str) -> Result<ModelMetadata, SessionError> {
        self.enter("model_metadata").await?;
        if model == "account" {
            return Ok(account_model());
        }
        let mut other = account_model();
        other.name = model.to_string();
        Ok(other)
    }

    async fn create_session(
        &self,
        _model: &str,
        file: &UploadFile,
    ) -> Result<ImportSessionResponse, SessionError> {
        self.enter("create_session").await?;
        let text = String::from_utf8_lossy(&file.content);
        let mut lines = text.lines();
        let detected_columns: Vec<String> = lines
            .next()
            .unwrap_or_default()
            .split(',')
            .map(str::to_string)
            .collect();
        let rows: Vec<&str> = lines.filter(|line| !line.is_empty()).collect();
        *self.total_rows.lock() = rows.len() as u64;

        let sample_rows = rows
            .iter()
            .take(5)
            .map(|line| {
                detected_columns
                    .iter()
                    .zip(line.split(','))
                    .map(|(column, value)| (column.clone(), Value::from(value)))
                    .collect::<Map<String, Value>>()
            })
            .collect();

        Ok(ImportSessionResponse {
            import_session_token: Uuid::new_v4().to_string(),
            detected_columns,
            sample_rows,
            total_rows: Some(rows.len() as u64),
            expires_at: None,
        })
    }

    async fn mapping_suggestions(
        &self,
        _token: &str,
    ) -> Result<Vec<ColumnMappingSuggestion>, SessionError> {
        self.enter("mapping_suggestions").await?;
        Ok(self.suggestions.lock().clone())
    }

    async fn preview(
        &self,
        _token: &str,
        request: &PreviewRequest,
    ) -> Result<ImportPreviewResponse, SessionError> {
        self.enter("preview").await?;
        let total_rows = *self.total_rows.lock();
        let info = BatchInfo::compute(
            total_rows,
            request.batch_size.unwrap_or(100),
            request.batch_number.unwrap_or(0),
        )
        .ok_or_else(|| ApiError::Status {
            status: 422,
            message: "batch out of range".to_string(),
        })?;

        let failing = self.failing();
        let first_row = u64::from(info.current_batch) * u64::from(info.batch_size) + 1;
        let preview_data: Vec<PreviewRow> = (first_row..first_row + u64::from(info.current_batch_rows))
            .map(|row_number| PreviewRow {
                row_number,
                data: Map::new(),
                errors: if failing.contains(&row_number) {
                    Self::row_errors(row_number)
                } else {
                    Vec::new()
                },
                warnings: Vec::new(),
            })
            .collect();
        let error_rows = preview_data.iter().filter(|row| !row.is_valid()).count() as u64;

        Ok(ImportPreviewResponse {
            validation_summary: ValidationSummary {
                total_rows: u64::from(info.current_batch_rows),
                valid_rows: u64::from(info.current_batch_rows) - error_rows,
                error_rows,
                error_count: error_rows,
                warning_count: 0,
            },
            preview_data,
            can_proceed: failing.is_empty() || request.skip_validation_errors,
            batch_info: Some(info),
        })
    }

    async fn validate(
        &self,
        _token: &str,
        _request: &PreviewRequest,
    ) -> Result<ValidationSummary, SessionError> {
        self.enter("validate").await?;
        let total_rows = *self.total_rows.lock();
        let error_rows = self.failing().len() as u64;
        Ok(ValidationSummary {
            total_rows,
            valid_rows: total_rows - error_rows,
            error_rows,
            error_count: error_rows,
            warning_count: 0,
        })
    }

    async fn execute(
        &self,
        _token: &str,
        request: &ExecuteRequest,
    ) -> Result<BatchProcessingResult, SessionError> {
        self.enter("execute").await?;
        let total_rows = *self.total_rows.lock();
        let failing = self.failing();
        let error_rows = failing.len() as u64;
        let errors = failing.iter().flat_map(|row| Self::row_errors(*row)).collect();

        Ok(if error_rows == 0 {
            BatchProcessingResult {
                status: ImportStatus::Completed,
                total_rows,
                successful_rows: total_rows,
                error_rows: 0,
                skipped_rows: 0,
                errors,
            }
        } else if request.skip_errors {
            BatchProcessingResult {
                status: ImportStatus::CompletedWithErrors,
                total_rows,
                successful_rows: total_rows - error_rows,
                error_rows,
                skipped_rows: error_rows,
                errors,
            }
        } else {
            BatchProcessingResult {
                status: ImportStatus::Failed,
                total_rows,
                successful_rows: 0,
                error_rows,
                skipped_rows: 0,
                errors,
            }
        })
    }

    async fn list_templates(&self, _token: &str) -> Result<Vec<MappingTemplate>, SessionError> {
        self.enter("list_templates").await?;
        Ok(self.templates.lock().clone())
    }

    async fn save_template(
        &self,
        _token: &str,
        request: &SaveTemplateRequest,
    ) -> Result<MappingTemplate, SessionError> {
        self.enter("save_template").await?;
        let template = MappingTemplate {
            id: Some(Uuid::new_v4()),
            name: request.name.clone(),
            model: "account".to_string(),
            mappings: request.mappings.clone(),
            import_policy: request.import_policy,
            default_values: request.default_values.clone(),
        };
        self.templates.lock().push(template.clone());
        Ok(template)
    }

    async fn download_template(
        &self,
        _model: &str,
        _format: TemplateFormat,
    ) -> Result<Vec<u8>, SessionError> {
        self.enter("download_template").await?;
        Ok(b"code,name,account_type\n".to_vec())
    }

    async fn download_example(
        &self,
        _model: &str,
        _format: TemplateFormat,
    ) -> Result<Vec<u8>, SessionError> {
        self.enter("download_example").await?;
        Ok(b"code,name,account_type\n1000,Cash,asset\n".to_vec())
    }
}
