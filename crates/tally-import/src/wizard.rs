//! Import wizard state machine.
//!
//! The controller owns a [`WizardState`] and sequences
//! `upload → mapping → preview → execute → result`. Data collected along the
//! way lives in [`Progress`], whose variants nest so that later data can only
//! exist on top of the data it was derived from. Network operations run one
//! at a time: `is_loading` is set for the duration and a second operation is
//! refused with [`WizardError::Busy`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tally_core::LedgerEvent;
use tally_platform::{
    BatchInfo, ColumnMapping, EventBus, ExecuteRequest, ImportPolicy, ImportPreviewResponse,
    ImportResult, ImportSessionResponse, MappingTemplate, ModelMetadata, PreviewRequest,
    SaveTemplateRequest, ValidationSummary,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::navigation::{BatchAction, BatchNavigator};
use crate::preflight::{self, PreflightError, UploadFile};
use crate::session::{ImportSessionApi, SessionError};
use crate::templates::apply_template;

const ALREADY_EXECUTED: &str = "import already executed, reset the wizard to start over";

#[derive(Debug, Error)]
pub enum WizardError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Api(#[from] tally_platform::ApiError),

    #[error("another import operation is still running")]
    Busy,

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<SessionError> for WizardError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Preflight(err) => WizardError::Preflight(err),
            SessionError::Api(err) => WizardError::Api(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WizardStep {
    Upload,
    Mapping,
    Preview,
    Execute,
    Result,
}

impl WizardStep {
    pub const ALL: [WizardStep; 5] = [
        WizardStep::Upload,
        WizardStep::Mapping,
        WizardStep::Preview,
        WizardStep::Execute,
        WizardStep::Result,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn predecessor(self) -> Option<WizardStep> {
        self.index().checked_sub(1).map(|index| Self::ALL[index])
    }

    pub fn next(self) -> Option<WizardStep> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenSession {
    pub model: ModelMetadata,
    pub session: ImportSessionResponse,
    pub mappings: Vec<ColumnMapping>,
}

impl OpenSession {
    pub fn token(&self) -> &str {
        &self.session.import_session_token
    }

    pub fn maps_required_field(&self) -> bool {
        self.mappings.iter().any(|mapping| {
            mapping
                .field_name
                .as_deref()
                .is_some_and(|field| self.model.is_required(field))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewedSession {
    pub open: OpenSession,
    pub preview: ImportPreviewResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSession {
    pub previewed: PreviewedSession,
    pub result: ImportResult,
}

/// Data gathered so far. Each variant carries exactly what its stage produced
/// plus everything before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Progress {
    #[default]
    Empty,
    ModelSelected(ModelMetadata),
    SessionOpen(OpenSession),
    Previewed(PreviewedSession),
    Completed(CompletedSession),
}

impl Progress {
    pub fn model(&self) -> Option<&ModelMetadata> {
        match self {
            Progress::Empty => None,
            Progress::ModelSelected(model) => Some(model),
            other => other.session().map(|open| &open.model),
        }
    }

    pub fn session(&self) -> Option<&OpenSession> {
        match self {
            Progress::Empty | Progress::ModelSelected(_) => None,
            Progress::SessionOpen(open) => Some(open),
            Progress::Previewed(previewed) => Some(&previewed.open),
            Progress::Completed(completed) => Some(&completed.previewed.open),
        }
    }

    pub fn preview(&self) -> Option<&ImportPreviewResponse> {
        match self {
            Progress::Previewed(previewed) => Some(&previewed.preview),
            Progress::Completed(completed) => Some(&completed.previewed.preview),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&ImportResult> {
        match self {
            Progress::Completed(completed) => Some(&completed.result),
            _ => None,
        }
    }

    fn take_previewed(&mut self) -> Option<PreviewedSession> {
        match std::mem::take(self) {
            Progress::Previewed(previewed) => Some(previewed),
            other => {
                *self = other;
                None
            }
        }
    }

    fn take_session(&mut self) -> Option<OpenSession> {
        match std::mem::take(self) {
            Progress::SessionOpen(open) => Some(open),
            Progress::Previewed(previewed) => Some(previewed.open),
            Progress::Completed(completed) => Some(completed.previewed.open),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Drops preview data so a changed mapping or setting is previewed again.
    fn invalidate_preview(&mut self) {
        if matches!(self, Progress::Previewed(_)) {
            if let Some(open) = self.take_session() {
                *self = Progress::SessionOpen(open);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub import_policy: ImportPolicy,
    pub skip_validation_errors: bool,
    pub default_values: BTreeMap<String, String>,
    pub batch_size: u32,
}

impl ImportSettings {
    pub fn new(batch_size: u32) -> Self {
        Self {
            import_policy: ImportPolicy::default(),
            skip_validation_errors: false,
            default_values: BTreeMap::new(),
            batch_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WizardState {
    pub current_step: WizardStep,
    pub progress: Progress,
    pub settings: ImportSettings,
    pub full_validation: Option<ValidationSummary>,
    pub error: Option<String>,
    pub is_loading: bool,
}

impl WizardState {
    pub fn new(batch_size: u32) -> Self {
        Self {
            current_step: WizardStep::Upload,
            progress: Progress::Empty,
            settings: ImportSettings::new(batch_size),
            full_validation: None,
            error: None,
            is_loading: false,
        }
    }

    pub fn selected_model(&self) -> Option<&ModelMetadata> {
        self.progress.model()
    }

    pub fn import_session(&self) -> Option<&ImportSessionResponse> {
        self.progress.session().map(|open| &open.session)
    }

    pub fn column_mappings(&self) -> &[ColumnMapping] {
        self.progress
            .session()
            .map(|open| open.mappings.as_slice())
            .unwrap_or_default()
    }

    pub fn preview_data(&self) -> Option<&ImportPreviewResponse> {
        self.progress.preview()
    }

    pub fn import_result(&self) -> Option<&ImportResult> {
        self.progress.result()
    }

    pub fn batch_info(&self) -> Option<BatchInfo> {
        self.preview_data().and_then(|preview| preview.batch_info)
    }

    /// Whether the work of `step` is done, i.e. the following step may be entered.
    pub fn is_step_valid(&self, step: WizardStep) -> bool {
        match step {
            WizardStep::Upload => self.progress.model().is_some(),
            WizardStep::Mapping => self.progress.session().is_some(),
            WizardStep::Preview => self
                .progress
                .session()
                .is_some_and(OpenSession::maps_required_field),
            WizardStep::Execute | WizardStep::Result => self
                .preview_data()
                .is_some_and(|preview| preview.can_proceed),
        }
    }

    /// Whether the data `step` displays exists.
    fn can_enter(&self, step: WizardStep) -> bool {
        match step {
            WizardStep::Upload => true,
            WizardStep::Mapping => self.progress.session().is_some(),
            WizardStep::Preview => self.is_step_valid(WizardStep::Preview),
            WizardStep::Execute => self.is_step_valid(WizardStep::Execute),
            WizardStep::Result => self.import_result().is_some(),
        }
    }

    /// Moves the cursor. Backward moves always succeed; a forward move must be
    /// to the next step, with its predecessor complete and nothing in flight.
    pub fn go_to_step(&mut self, target: WizardStep) -> bool {
        if target <= self.current_step {
            self.current_step = target;
            return true;
        }

        let allowed = !self.is_loading
            && self.current_step.next() == Some(target)
            && target
                .predecessor()
                .is_some_and(|previous| self.is_step_valid(previous))
            && self.can_enter(target);

        if allowed {
            self.current_step = target;
        }
        allowed
    }

    fn preview_request(&self, batch_number: Option<u32>) -> Result<PreviewRequest, WizardError> {
        let open = self
            .progress
            .session()
            .ok_or(WizardError::InvalidState("upload a file before previewing"))?;
        if self.import_result().is_some() {
            return Err(WizardError::InvalidState(
                ALREADY_EXECUTED,
            ));
        }

        let settings = &self.settings;
        if settings.batch_size == 0 {
            return Err(PreflightError::InvalidBatchSize.into());
        }
        preflight::check_policy(&open.model, settings.import_policy)?;
        preflight::validate_mappings(&open.model, &open.mappings)?;
        let missing = preflight::missing_fields(
            &open.model,
            settings.import_policy,
            &open.mappings,
            &settings.default_values,
        );
        if !missing.is_empty() {
            return Err(PreflightError::UnmappedRequiredFields(missing).into());
        }

        if let Some(requested) = batch_number {
            let total = self.known_batch_count(open);
            if requested >= total {
                return Err(PreflightError::BatchOutOfRange { requested, total }.into());
            }
        }

        Ok(PreviewRequest {
            column_mappings: open.mappings.clone(),
            import_policy: settings.import_policy,
            skip_validation_errors: settings.skip_validation_errors,
            default_values: settings.default_values.clone(),
            batch_size: batch_number.map(|_| settings.batch_size),
            batch_number,
        })
    }

    /// Batch count from the latest server answer, else from the row count the
    /// session reported, else just the first batch.
    fn known_batch_count(&self, open: &OpenSession) -> u32 {
        if let Some(info) = self.batch_info() {
            return info.total_batches;
        }
        open.session
            .total_rows
            .and_then(|rows| BatchInfo::compute(rows, self.settings.batch_size, 0))
            .map(|info| info.total_batches)
            .unwrap_or(1)
    }

    fn mutable_session(&mut self) -> Result<&mut OpenSession, WizardError> {
        if self.is_loading {
            return Err(WizardError::Busy);
        }
        match &mut self.progress {
            Progress::SessionOpen(open) => Ok(open),
            Progress::Previewed(previewed) => Ok(&mut previewed.open),
            Progress::Completed(_) => Err(WizardError::InvalidState(
                ALREADY_EXECUTED,
            )),
            _ => Err(WizardError::InvalidState("upload a file before mapping columns")),
        }
    }

    fn mutable_settings(&mut self) -> Result<&mut ImportSettings, WizardError> {
        if self.is_loading {
            return Err(WizardError::Busy);
        }
        if self.import_result().is_some() {
            return Err(WizardError::InvalidState(
                ALREADY_EXECUTED,
            ));
        }
        self.progress.invalidate_preview();
        Ok(&mut self.settings)
    }
}

struct Inner {
    state: WizardState,
    inflight: Option<Inflight>,
    next_operation: u64,
}

struct Inflight {
    id: u64,
    token: CancellationToken,
}

/// One running operation. Dropping it while it is still the current one,
/// e.g. when the caller abandons the future, releases the wizard.
struct Operation<'a> {
    inner: &'a Mutex<Inner>,
    id: u64,
    token: CancellationToken,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner
            .inflight
            .as_ref()
            .is_some_and(|current| current.id == self.id)
        {
            inner.inflight = None;
            inner.state.is_loading = false;
            self.token.cancel();
            debug!(operation = self.id, "abandoned operation released");
        }
    }
}

/// Drives one import from model selection to result.
pub struct WizardController {
    api: Arc<dyn ImportSessionApi>,
    inner: Mutex<Inner>,
    max_upload_bytes: u64,
    default_batch_size: u32,
    events: Option<EventBus<LedgerEvent>>,
}

impl WizardController {
    pub fn new(api: Arc<dyn ImportSessionApi>, max_upload_bytes: u64, batch_size: u32) -> Self {
        Self {
            api,
            inner: Mutex::new(Inner {
                state: WizardState::new(batch_size),
                inflight: None,
                next_operation: 0,
            }),
            max_upload_bytes,
            default_batch_size: batch_size,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus<LedgerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn snapshot(&self) -> WizardState {
        self.inner.lock().state.clone()
    }

    pub fn current_step(&self) -> WizardStep {
        self.inner.lock().state.current_step
    }

    pub fn is_step_valid(&self, step: WizardStep) -> bool {
        self.inner.lock().state.is_step_valid(step)
    }

    pub fn go_to_step(&self, target: WizardStep) -> bool {
        let moved = self.inner.lock().state.go_to_step(target);
        if !moved {
            debug!(?target, "step transition rejected");
        }
        moved
    }

    pub async fn select_model(&self, name: &str) -> Result<(), WizardError> {
        let (name, op) = self.begin(|_| {
            let name = name.trim();
            if name.is_empty() {
                return Err(WizardError::InvalidState("model name is empty"));
            }
            Ok(name.to_string())
        })?;

        let result = self.guard(&op.token, self.api.model_metadata(&name)).await;
        self.finish(&op, result, |state, model| {
            info!(model = %model.name, fields = model.fields.len(), "model selected");
            state.progress = Progress::ModelSelected(model);
            state.settings.default_values.clear();
            state.full_validation = None;
            state.current_step = WizardStep::Upload;
        })
    }

    pub async fn upload_file(&self, file: UploadFile) -> Result<(), WizardError> {
        let max_upload_bytes = self.max_upload_bytes;
        let ((model, file), op) = self.begin(move |state| {
            let model = state
                .selected_model()
                .ok_or(WizardError::InvalidState("select a model before uploading"))?;
            preflight::validate_upload(&file, max_upload_bytes)?;
            Ok((model.clone(), file))
        })?;

        let result = self
            .guard(&op.token, self.api.create_session(&model.name, &file))
            .await;
        self.finish(&op, result, move |state, session| {
            let mappings = session
                .detected_columns
                .iter()
                .map(|column| ColumnMapping::unmapped(column.clone()))
                .collect();
            info!(
                model = %model.name,
                columns = session.detected_columns.len(),
                rows = ?session.total_rows,
                "file uploaded"
            );
            state.progress = Progress::SessionOpen(OpenSession {
                model,
                session,
                mappings,
            });
            state.full_validation = None;
            state.current_step = WizardStep::Mapping;
        })
    }

    /// Replaces the column mapping. Local only: no request, no step change.
    pub fn update_column_mappings(&self, mappings: Vec<ColumnMapping>) -> Result<(), WizardError> {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        let open = state.mutable_session()?;
        preflight::validate_columns(&open.session.detected_columns, &mappings)?;
        preflight::validate_mappings(&open.model, &mappings)?;
        open.mappings = mappings;
        state.progress.invalidate_preview();
        Ok(())
    }

    pub fn set_import_policy(&self, policy: ImportPolicy) -> Result<(), WizardError> {
        self.inner.lock().state.mutable_settings()?.import_policy = policy;
        Ok(())
    }

    pub fn set_skip_validation_errors(&self, skip: bool) -> Result<(), WizardError> {
        self.inner.lock().state.mutable_settings()?.skip_validation_errors = skip;
        Ok(())
    }

    pub fn set_default_value(
        &self,
        field: impl Into<String>,
        value: Option<String>,
    ) -> Result<(), WizardError> {
        let field = field.into();
        let mut inner = self.inner.lock();
        let settings = inner.state.mutable_settings()?;
        match value {
            Some(value) => settings.default_values.insert(field, value),
            None => settings.default_values.remove(&field),
        };
        Ok(())
    }

    pub fn set_batch_size(&self, batch_size: u32) -> Result<(), WizardError> {
        if batch_size == 0 {
            return Err(PreflightError::InvalidBatchSize.into());
        }
        self.inner.lock().state.mutable_settings()?.batch_size = batch_size;
        Ok(())
    }

    /// Applies server suggestions at or above `min_confidence` to unmapped
    /// columns and returns how many were applied.
    pub async fn suggest_mappings(&self, min_confidence: f64) -> Result<usize, WizardError> {
        let (session_token, op) = self.begin(|state| {
            if state.import_result().is_some() {
                return Err(WizardError::InvalidState(ALREADY_EXECUTED));
            }
            state
                .progress
                .session()
                .map(|open| open.token().to_string())
                .ok_or(WizardError::InvalidState("upload a file before mapping columns"))
        })?;

        let result = self
            .guard(&op.token, self.api.mapping_suggestions(&session_token))
            .await;
        self.finish(&op, result, |state, suggestions| {
            state.progress.invalidate_preview();
            let Progress::SessionOpen(open) = &mut state.progress else {
                return 0;
            };

            let mut applied = 0;
            for suggestion in suggestions
                .iter()
                .filter(|suggestion| suggestion.confidence >= min_confidence)
            {
                let Some(field) = suggestion.field_name.as_deref() else {
                    continue;
                };
                if open.model.field(field).is_none()
                    || open.mappings.iter().any(|m| m.field_name.as_deref() == Some(field))
                {
                    continue;
                }
                if let Some(mapping) = open
                    .mappings
                    .iter_mut()
                    .find(|m| m.column_name == suggestion.column_name && !m.is_mapped())
                {
                    mapping.field_name = Some(field.to_string());
                    applied += 1;
                }
            }
            debug!(applied, "mapping suggestions applied");
            applied
        })
    }

    pub async fn generate_preview(&self) -> Result<(), WizardError> {
        self.generate_batch_preview(0).await
    }

    pub async fn generate_batch_preview(&self, batch_number: u32) -> Result<(), WizardError> {
        let ((session_token, request), op) = self.begin(|state| {
            let request = state.preview_request(Some(batch_number))?;
            let open = state
                .progress
                .session()
                .ok_or(WizardError::InvalidState("upload a file before previewing"))?;
            Ok((open.token().to_string(), request))
        })?;

        let result = self
            .guard(&op.token, self.api.preview(&session_token, &request))
            .await;
        self.finish(&op, result, |state, preview| {
            info!(
                batch = batch_number,
                can_proceed = preview.can_proceed,
                error_rows = preview.validation_summary.error_rows,
                "preview generated"
            );
            if let Some(open) = state.progress.take_session() {
                state.progress = Progress::Previewed(PreviewedSession { open, preview });
            }
            state.current_step = WizardStep::Preview;
        })
    }

    /// Requests `action` relative to the current batch; `Ok(false)` when the
    /// action is disabled at this position.
    pub async fn navigate_batch(&self, action: BatchAction) -> Result<bool, WizardError> {
        let target = {
            let inner = self.inner.lock();
            inner
                .state
                .batch_info()
                .and_then(|info| BatchNavigator::target(&info, action))
        };

        match target {
            Some(batch_number) => {
                self.generate_batch_preview(batch_number).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn validate_full_file(&self) -> Result<ValidationSummary, WizardError> {
        let ((session_token, request), op) = self.begin(|state| {
            let request = state.preview_request(None)?;
            let open = state
                .progress
                .session()
                .ok_or(WizardError::InvalidState("upload a file before validating"))?;
            Ok((open.token().to_string(), request))
        })?;

        let result = self
            .guard(&op.token, self.api.validate(&session_token, &request))
            .await;
        self.finish(&op, result, |state, summary| {
            info!(
                total_rows = summary.total_rows,
                errors = summary.error_count,
                warnings = summary.warning_count,
                "full file validated"
            );
            state.full_validation = Some(summary.clone());
            summary
        })
    }

    pub async fn execute_import(&self) -> Result<ImportResult, WizardError> {
        self.execute(false).await
    }

    pub async fn execute_import_with_skip_errors(&self) -> Result<ImportResult, WizardError> {
        self.execute(true).await
    }

    async fn execute(&self, skip_errors: bool) -> Result<ImportResult, WizardError> {
        let ((session_token, model, request), op) = self.begin(|state| {
            let Progress::Previewed(previewed) = &state.progress else {
                return Err(match state.progress {
                    Progress::Completed(_) => WizardError::InvalidState(
                        ALREADY_EXECUTED,
                    ),
                    _ => WizardError::InvalidState("generate a preview before executing"),
                });
            };
            if !skip_errors && !previewed.preview.can_proceed {
                return Err(PreflightError::CannotProceed.into());
            }

            let settings = &state.settings;
            let request = ExecuteRequest {
                mappings: previewed.open.mappings.clone(),
                import_policy: settings.import_policy,
                skip_errors,
                batch_size: settings.batch_size,
                default_values: settings.default_values.clone(),
            };
            Ok((
                previewed.open.token().to_string(),
                previewed.open.model.name.clone(),
                request,
            ))
        })?;

        let result = self
            .guard(&op.token, self.api.execute(&session_token, &request))
            .await;
        let events = self.events.clone();
        self.finish(&op, result, move |state, batch| {
            let result = ImportResult::from_batch(model, batch);
            info!(
                model = %result.model,
                status = result.status.as_str(),
                successful = result.successful_rows,
                errors = result.error_rows,
                skipped = result.skipped_rows,
                "import executed"
            );
            if let Some(events) = &events {
                events.publish(LedgerEvent::import_completed(
                    result.model.clone(),
                    result.status.as_str(),
                    result.successful_rows,
                    result.error_rows,
                ));
            }

            if let Some(previewed) = state.progress.take_previewed() {
                state.progress = Progress::Completed(CompletedSession {
                    previewed,
                    result: result.clone(),
                });
            }
            state.current_step = WizardStep::Result;
            result
        })
    }

    pub async fn save_template(&self, name: &str) -> Result<MappingTemplate, WizardError> {
        let ((session_token, request), op) = self.begin(|state| {
            let name = name.trim();
            if name.is_empty() {
                return Err(WizardError::InvalidState("template name is empty"));
            }
            let open = state
                .progress
                .session()
                .ok_or(WizardError::InvalidState("upload a file before saving a template"))?;
            let request = SaveTemplateRequest {
                name: name.to_string(),
                mappings: open.mappings.clone(),
                import_policy: state.settings.import_policy,
                default_values: state.settings.default_values.clone(),
            };
            Ok((open.token().to_string(), request))
        })?;

        let result = self
            .guard(&op.token, self.api.save_template(&session_token, &request))
            .await;
        self.finish(&op, result, |_, template| {
            info!(template = %template.name, "mapping template saved");
            template
        })
    }

    pub async fn list_templates(&self) -> Result<Vec<MappingTemplate>, WizardError> {
        let (session_token, op) = self.begin(|state| {
            state
                .progress
                .session()
                .map(|open| open.token().to_string())
                .ok_or(WizardError::InvalidState("upload a file before listing templates"))
        })?;

        let result = self
            .guard(&op.token, self.api.list_templates(&session_token))
            .await;
        self.finish(&op, result, |_, templates| templates)
    }

    /// Applies a saved template to the current file's columns and returns how
    /// many columns ended up mapped.
    pub fn apply_template(&self, template: &MappingTemplate) -> Result<usize, WizardError> {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        let open = state.mutable_session()?;
        if open.model.name != template.model {
            return Err(PreflightError::TemplateModelMismatch {
                template: template.name.clone(),
                expected: template.model.clone(),
                actual: open.model.name.clone(),
            }
            .into());
        }

        let mappings = apply_template(template, &open.session.detected_columns);
        preflight::validate_mappings(&open.model, &mappings)?;
        let mapped = mappings.iter().filter(|m| m.is_mapped()).count();
        open.mappings = mappings;

        state.progress.invalidate_preview();
        state.settings.import_policy = template.import_policy;
        state.settings.default_values = template.default_values.clone();
        Ok(mapped)
    }

    /// Abandons the in-flight operation, if any. Its response is discarded.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if let Some(inflight) = inner.inflight.take() {
            inflight.token.cancel();
            inner.state.is_loading = false;
            inner.state.error = Some(WizardError::Cancelled.to_string());
            info!("import operation cancelled");
        }
    }

    /// Back to a fresh wizard. The server expires the abandoned session itself.
    pub fn reset_wizard(&self) {
        let mut inner = self.inner.lock();
        if let Some(inflight) = inner.inflight.take() {
            inflight.token.cancel();
        }
        inner.state = WizardState::new(self.default_batch_size);
        debug!("wizard reset");
    }

    /// Runs `prepare` against the state and marks an operation in flight.
    /// Nothing is sent when another operation is running or `prepare` fails.
    fn begin<P>(
        &self,
        prepare: impl FnOnce(&WizardState) -> Result<P, WizardError>,
    ) -> Result<(P, Operation<'_>), WizardError> {
        let mut inner = self.inner.lock();
        if inner.state.is_loading {
            debug!("operation ignored while another is in flight");
            return Err(WizardError::Busy);
        }

        let params = match prepare(&inner.state) {
            Ok(params) => params,
            Err(err) => {
                inner.state.error = Some(err.to_string());
                return Err(err);
            }
        };

        let id = inner.next_operation;
        inner.next_operation += 1;
        let token = CancellationToken::new();
        inner.state.is_loading = true;
        inner.state.error = None;
        inner.inflight = Some(Inflight {
            id,
            token: token.clone(),
        });
        Ok((
            params,
            Operation {
                inner: &self.inner,
                id,
                token,
            },
        ))
    }

    async fn guard<T, F>(&self, token: &CancellationToken, request: F) -> Result<T, WizardError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        tokio::select! {
            _ = token.cancelled() => Err(WizardError::Cancelled),
            result = request => result.map_err(WizardError::from),
        }
    }

    /// Settles `op`, applying `apply` on success. A cancelled or superseded
    /// operation leaves the state untouched.
    fn finish<T, R>(
        &self,
        op: &Operation<'_>,
        result: Result<T, WizardError>,
        apply: impl FnOnce(&mut WizardState, T) -> R,
    ) -> Result<R, WizardError> {
        let mut inner = self.inner.lock();
        let current = inner
            .inflight
            .as_ref()
            .is_some_and(|inflight| inflight.id == op.id);
        if op.token.is_cancelled() || !current {
            return Err(WizardError::Cancelled);
        }
        inner.inflight = None;
        inner.state.is_loading = false;

        match result {
            Ok(value) => Ok(apply(&mut inner.state, value)),
            Err(err) => {
                warn!("import operation failed: {err}");
                inner.state.error = Some(err.to_string());
                Err(err)
            }
        }
    }
}
