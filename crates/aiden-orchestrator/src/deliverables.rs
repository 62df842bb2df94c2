use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use aiden_agent::GraphState;
use aiden_core::error::Result;
use aiden_core::types::{
    new_id, Deliverable, DeliverableFormat, DeliverableStatus, DeliverableVersion, Phase,
};
use aiden_store::UnitOfWork;

/// State fields that become deliverables, with their stored format.
const RECOGNIZED: [(&str, DeliverableFormat, &str); 2] = [
    ("requirements_spec", DeliverableFormat::Markdown, "Requirements Specification"),
    ("traceability_matrix", DeliverableFormat::Json, "Traceability Matrix"),
];

/// Write the deliverables found in a finished phase's state.
///
/// At most one deliverable exists per (phase, type). Unchanged content is
/// left alone; changed content becomes the next version and returns the
/// deliverable to draft. Returns the deliverables that were written.
pub(crate) fn persist(
    uow: &UnitOfWork<'_>,
    phase: &Phase,
    state: &GraphState,
    created_by: &str,
) -> Result<Vec<Deliverable>> {
    let mut written = Vec::new();
    for (field, format, default_title) in RECOGNIZED {
        let Some(value) = state.get(field) else {
            continue;
        };
        let content = render(value, format)?;
        let title = value
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(default_title)
            .to_string();
        let now = Utc::now();

        match uow.find_deliverable(&phase.id, field)? {
            None => {
                let deliverable = Deliverable {
                    id: new_id(),
                    phase_id: phase.id.clone(),
                    title,
                    deliverable_type: field.to_string(),
                    status: DeliverableStatus::Draft,
                    current_version: 1,
                    format,
                    created_at: now,
                    updated_at: now,
                };
                uow.insert_deliverable(&deliverable)?;
                uow.insert_version(&DeliverableVersion {
                    id: new_id(),
                    deliverable_id: deliverable.id.clone(),
                    version_number: 1,
                    content,
                    content_structured: Some(value.clone()),
                    change_summary: Some("Initial version".to_string()),
                    created_by: created_by.to_string(),
                    created_at: now,
                })?;
                debug!(deliverable_id = %deliverable.id, deliverable_type = field, "Deliverable created");
                written.push(deliverable);
            }
            Some(existing) => {
                let latest = uow.get_version(&existing.id, existing.current_version)?;
                if latest.content == content && latest.content_structured.as_ref() == Some(value) {
                    debug!(deliverable_id = %existing.id, "Deliverable unchanged");
                    continue;
                }
                let next = existing.current_version + 1;
                uow.append_version(&DeliverableVersion {
                    id: new_id(),
                    deliverable_id: existing.id.clone(),
                    version_number: next,
                    content,
                    content_structured: Some(value.clone()),
                    change_summary: Some(format!("Revision {}", next)),
                    created_by: created_by.to_string(),
                    created_at: now,
                })?;
                if existing.status != DeliverableStatus::Draft {
                    uow.set_deliverable_status(&existing.id, DeliverableStatus::Draft)?;
                }
                debug!(deliverable_id = %existing.id, version = next, "Deliverable versioned");
                written.push(uow.get_deliverable(&existing.id)?);
            }
        }
    }
    Ok(written)
}

fn render(value: &Value, format: DeliverableFormat) -> Result<String> {
    Ok(match format {
        DeliverableFormat::Markdown => match value.get("content").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => serde_json::to_string_pretty(value)?,
        },
        DeliverableFormat::Json => serde_json::to_string_pretty(value)?,
    })
}
