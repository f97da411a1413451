use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::WorkTemplate;
use crate::repository::TemplateRepository;
use crate::services::current_template;

/// Work-template editor. Generation trusts whatever is stored, so all
/// validation happens here.
pub struct SettingsService {
    templates: Arc<dyn TemplateRepository>,
}

impl SettingsService {
    pub fn new(templates: Arc<dyn TemplateRepository>) -> Self {
        Self { templates }
    }

    pub async fn get_template(&self, professional_id: Uuid) -> Result<WorkTemplate, SchedulingError> {
        current_template(self.templates.as_ref(), professional_id).await
    }

    pub async fn update_template(
        &self,
        professional_id: Uuid,
        template: WorkTemplate,
    ) -> Result<WorkTemplate, SchedulingError> {
        template.validate()?;
        self.templates.save_work_template(professional_id, &template).await?;

        let active_days = template.days.values().filter(|d| d.active).count();
        info!(
            "Saved work template for {}: {} min sessions, {} active days",
            professional_id, template.session_duration_minutes, active_days
        );
        Ok(template)
    }
}
