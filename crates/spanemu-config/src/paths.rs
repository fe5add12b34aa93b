//! Resource path formatting for the project/instance/database hierarchy.

use crate::types::Identifiers;

/// Instance configuration served by the emulator.
pub const EMULATOR_INSTANCE_CONFIG: &str = "emulator-config";

pub fn project_path(project_id: &str) -> String {
    format!("projects/{project_id}")
}

pub fn instance_path(project_id: &str, instance_id: &str) -> String {
    format!("projects/{project_id}/instances/{instance_id}")
}

pub fn database_path(project_id: &str, instance_id: &str, database_id: &str) -> String {
    format!("projects/{project_id}/instances/{instance_id}/databases/{database_id}")
}

pub fn instance_config_path(project_id: &str, config: &str) -> String {
    format!("projects/{project_id}/instanceConfigs/{config}")
}

/// Split `projects/{p}/instances/{i}/databases/{d}` back into its identifiers.
pub fn parse_database_path(path: &str) -> Option<Identifiers> {
    let mut parts = path.split('/');
    match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some("projects"), Some(p), Some("instances"), Some(i), Some("databases"), Some(d), None)
            if !p.is_empty() && !i.is_empty() && !d.is_empty() =>
        {
            Some(Identifiers::new(p, i, d))
        }
        _ => None,
    }
}
