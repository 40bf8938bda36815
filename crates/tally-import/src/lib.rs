pub mod navigation;
pub mod preflight;
pub mod session;
pub mod templates;
pub mod wizard;

#[cfg(test)]
mod testing;

pub use navigation::{BatchAction, BatchNavigator};
pub use preflight::{PreflightError, SUPPORTED_EXTENSIONS, UploadFile};
pub use session::{HttpImportSessions, ImportSessionApi, SessionError};
pub use templates::apply_template;
pub use wizard::{
    CompletedSession, ImportSettings, OpenSession, PreviewedSession, Progress, WizardController,
    WizardError, WizardState, WizardStep,
};
