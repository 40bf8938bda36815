use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tally_platform::{
    ApiClient, ApiError, BatchProcessingResult, ColumnMappingSuggestion, ExecuteRequest,
    ImportPreviewResponse, ImportSessionResponse, MappingSuggestionsResponse, MappingTemplate,
    ModelMetadata, PreviewRequest, SaveTemplateRequest, TemplateFormat, ValidationSummary,
};
use thiserror::Error;
use tracing::info;

use crate::preflight::{PreflightError, UploadFile, validate_upload};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Remote side of the import wizard: model metadata and token-addressed sessions.
#[async_trait]
pub trait ImportSessionApi: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, SessionError>;

    async fn model_metadata(&self, model: &str) -> Result<ModelMetadata, SessionError>;

    async fn create_session(
        &self,
        model: &str,
        file: &UploadFile,
    ) -> Result<ImportSessionResponse, SessionError>;

    async fn mapping_suggestions(
        &self,
        token: &str,
    ) -> Result<Vec<ColumnMappingSuggestion>, SessionError>;

    async fn preview(
        &self,
        token: &str,
        request: &PreviewRequest,
    ) -> Result<ImportPreviewResponse, SessionError>;

    async fn validate(
        &self,
        token: &str,
        request: &PreviewRequest,
    ) -> Result<ValidationSummary, SessionError>;

    async fn execute(
        &self,
        token: &str,
        request: &ExecuteRequest,
    ) -> Result<BatchProcessingResult, SessionError>;

    async fn list_templates(&self, token: &str) -> Result<Vec<MappingTemplate>, SessionError>;

    async fn save_template(
        &self,
        token: &str,
        request: &SaveTemplateRequest,
    ) -> Result<MappingTemplate, SessionError>;

    async fn download_template(
        &self,
        model: &str,
        format: TemplateFormat,
    ) -> Result<Vec<u8>, SessionError>;

    async fn download_example(
        &self,
        model: &str,
        format: TemplateFormat,
    ) -> Result<Vec<u8>, SessionError>;
}

#[derive(Clone, Debug)]
pub struct HttpImportSessions {
    api: ApiClient,
    max_upload_bytes: u64,
}

impl HttpImportSessions {
    pub fn new(api: ApiClient, max_upload_bytes: u64) -> Self {
        Self {
            api,
            max_upload_bytes,
        }
    }
}

const SESSIONS: &str = "import-sessions";

#[async_trait]
impl ImportSessionApi for HttpImportSessions {
    async fn list_models(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.api.get_json(&["models"], &[]).await?)
    }

    async fn model_metadata(&self, model: &str) -> Result<ModelMetadata, SessionError> {
        Ok(self.api.get_json(&["models", model], &[]).await?)
    }

    async fn create_session(
        &self,
        model: &str,
        file: &UploadFile,
    ) -> Result<ImportSessionResponse, SessionError> {
        validate_upload(file, self.max_upload_bytes)?;

        let part = Part::bytes(file.content.clone())
            .file_name(file.file_name.clone())
            .mime_str(file.mime_type())
            .map_err(ApiError::from)?;
        let form = Form::new().text("model", model.to_string()).part("file", part);

        let session: ImportSessionResponse =
            self.api.post_multipart(&[SESSIONS], form).await?;
        info!(
            model,
            file = %file.file_name,
            columns = session.detected_columns.len(),
            "import session created"
        );
        Ok(session)
    }

    async fn mapping_suggestions(
        &self,
        token: &str,
    ) -> Result<Vec<ColumnMappingSuggestion>, SessionError> {
        let response: MappingSuggestionsResponse = self
            .api
            .get_json(&[SESSIONS, token, "mapping-suggestions"], &[])
            .await?;
        Ok(response.suggestions)
    }

    async fn preview(
        &self,
        token: &str,
        request: &PreviewRequest,
    ) -> Result<ImportPreviewResponse, SessionError> {
        Ok(self
            .api
            .post_json(&[SESSIONS, token, "preview"], request)
            .await?)
    }

    async fn validate(
        &self,
        token: &str,
        request: &PreviewRequest,
    ) -> Result<ValidationSummary, SessionError> {
        Ok(self
            .api
            .post_json(&[SESSIONS, token, "validate"], request)
            .await?)
    }

    async fn execute(
        &self,
        token: &str,
        request: &ExecuteRequest,
    ) -> Result<BatchProcessingResult, SessionError> {
        Ok(self
            .api
            .post_json(&[SESSIONS, token, "execute"], request)
            .await?)
    }

    async fn list_templates(&self, token: &str) -> Result<Vec<MappingTemplate>, SessionError> {
        Ok(self
            .api
            .get_json(&[SESSIONS, token, "templates"], &[])
            .await?)
    }

    async fn save_template(
        &self,
        token: &str,
        request: &SaveTemplateRequest,
    ) -> Result<MappingTemplate, SessionError> {
        Ok(self
            .api
            .post_json(&[SESSIONS, token, "templates"], request)
            .await?)
    }

    async fn download_template(
        &self,
        model: &str,
        format: TemplateFormat,
    ) -> Result<Vec<u8>, SessionError> {
        Ok(self
            .api
            .get_bytes(
                &["models", model, "template"],
                &[("format", format.extension())],
            )
            .await?)
    }

    async fn download_example(
        &self,
        model: &str,
        format: TemplateFormat,
    ) -> Result<Vec<u8>, SessionError> {
        Ok(self
            .api
            .get_bytes(
                &["models", model, "example"],
                &[("format", format.extension())],
            )
            .await?)
    }
}
