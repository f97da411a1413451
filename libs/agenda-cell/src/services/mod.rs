pub mod agenda;
pub mod audit;
pub mod event_blocker;
pub mod generator;
pub mod lifecycle;
pub mod settings;
pub mod waitlist;

use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::WorkTemplate;
use crate::repository::TemplateRepository;

/// Reads the professional's template as it is right now.
pub(crate) async fn current_template(
    templates: &dyn TemplateRepository,
    professional_id: Uuid,
) -> Result<WorkTemplate, SchedulingError> {
    templates
        .get_work_template(professional_id)
        .await?
        .ok_or_else(|| SchedulingError::TemplateNotConfigured(professional_id.to_string()))
}
