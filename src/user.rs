use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Locally persisted facts about the signed-in user.
///
/// Stored as JSON under `cl_user_meta`. The field names match records written by the
/// JavaScript client, so sessions survive a client upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The staff role while a staff member browses in citizen mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl UserMeta {
    pub const CITIZEN_MODE: &'static str = "citizen_mode";

    pub fn new(role: Option<String>, name: Option<String>) -> Self {
        Self {
            role,
            name,
            actual_role: None,
            mode: None,
        }
    }

    pub fn is_citizen_mode(&self) -> bool {
        self.mode.as_deref() == Some(Self::CITIZEN_MODE)
    }

    /// A profile is complete when both role and name are known.
    pub fn is_complete(&self) -> bool {
        non_empty(self.role.as_deref()) && non_empty(self.name.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        !non_empty(self.role.as_deref()) && !non_empty(self.name.as_deref())
    }

    /// Derives role and name from provider-side user metadata.
    ///
    /// `raw_user_meta_data` wins over `user_metadata`. `role` falls back to `normalized_role`.
    pub fn from_provider_metadata(
        user_metadata: &Map<String, Value>,
        raw_user_meta_data: &Map<String, Value>,
    ) -> Self {
        let mut combined = user_metadata.clone();
        combined.extend(raw_user_meta_data.clone());

        let role = string_field(&combined, "role").or_else(|| string_field(&combined, "normalized_role"));
        let name = string_field(&combined, "name");
        Self::new(role, name)
    }
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|it| !it.trim().is_empty())
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|it| !it.is_empty())
        .map(str::to_owned)
}

/// Human readable form of a role identifier, as shown in the header and in toasts.
///
/// Department scoped roles carry the department code in upper case, E.g. `lgu-admin-ceo` is
/// displayed as "LGU Admin (CEO)".
pub fn format_role_for_display(role: Option<&str>) -> String {
    let Some(role) = role.filter(|it| !it.is_empty()) else {
        return "Unknown".to_owned();
    };

    let fixed = match role {
        "citizen" => Some("Citizen"),
        "lgu" => Some("LGU Officer"),
        "lgu-admin" => Some("LGU Admin"),
        "lgu-hr" => Some("LGU HR"),
        "hr" => Some("HR"),
        "complaint-coordinator" => Some("Complaint Coordinator"),
        "super-admin" => Some("Super Admin"),
        _ => None,
    };
    if let Some(fixed) = fixed {
        return fixed.to_owned();
    }

    if let Some(dept) = role.strip_prefix("lgu-admin-") {
        return format!("LGU Admin ({})", dept.to_uppercase());
    }
    if let Some(dept) = role.strip_prefix("lgu-hr-") {
        return format!("HR ({})", dept.to_uppercase());
    }
    if let Some(dept) = role.strip_prefix("lgu-") {
        return format!("LGU Officer ({})", dept.to_uppercase());
    }

    role.to_owned()
}
