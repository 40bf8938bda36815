pub mod bus;
pub mod client;
pub mod config;
pub mod contracts;
pub mod resources;

pub use bus::{EventBus, Subscription};
pub use client::{ApiClient, ApiError, RetryPolicy};
pub use config::ClientConfig;
pub use contracts::{
    BatchInfo, BatchProcessingResult, ColumnMapping, ColumnMappingSuggestion, ExecuteRequest,
    FieldInfo, ImportPermission, ImportPolicy, ImportPreviewResponse, ImportResult,
    ImportSessionResponse, ImportStatus, MappingSuggestionsResponse, MappingTemplate,
    ModelMetadata, PreviewRequest, PreviewRow, RowValidationError, SaveTemplateRequest,
    TemplateFormat, ValidationSummary,
};
pub use resources::{Page, PageRequest, Resource, ResourceClient, ResourceError};
