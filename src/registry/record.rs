use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Backend string for records served by a cloud provider
pub const CLOUD_BACKEND: &str = "cloud_api";
/// Backend string for records served by the local GGUF runtime
pub const LOCAL_BACKEND: &str = "llama.cpp";

/// Metadata key used by older registry files to mark the intent model
const LEGACY_ROLE_KEY: &str = "role";
const LEGACY_SYSTEM_INTENT: &str = "system_intent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Local,
    Cloud,
}

/// Who a model is for. The system intent model is reserved for internal use
/// and never offered as the user's chat model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPurpose {
    #[default]
    User,
    SystemIntent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub provider: Option<String>,
    pub backend: String,
    #[serde(default)]
    pub size_mb: Option<f64>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_base_model: bool,
    /// Artifact path for local models, API endpoint for cloud models
    pub location: String,
    #[serde(default)]
    pub purpose: ModelPurpose,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub created_at: i64,
}

impl ModelRecord {
    pub fn local(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ModelKind::Local,
            provider: None,
            backend: LOCAL_BACKEND.to_string(),
            size_mb: None,
            is_active: false,
            is_base_model: false,
            location: path.into().display().to_string(),
            purpose: ModelPurpose::User,
            metadata: BTreeMap::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn cloud(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ModelKind::Cloud,
            provider: Some(provider.into()),
            backend: CLOUD_BACKEND.to_string(),
            size_mb: None,
            is_active: false,
            is_base_model: false,
            location: endpoint.into(),
            purpose: ModelPurpose::User,
            metadata: BTreeMap::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_size_mb(mut self, size_mb: f64) -> Self {
        self.size_mb = Some(size_mb);
        self
    }

    pub fn with_purpose(mut self, purpose: ModelPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn base(mut self) -> Self {
        self.is_base_model = true;
        self
    }

    pub fn is_cloud(&self) -> bool {
        self.backend == CLOUD_BACKEND
    }

    pub fn artifact_path(&self) -> Option<PathBuf> {
        match self.kind {
            ModelKind::Local if !self.location.is_empty() => Some(PathBuf::from(&self.location)),
            _ => None,
        }
    }

    /// Name sent to the provider API. Defaults to the record name.
    pub fn cloud_model_name(&self) -> &str {
        self.metadata
            .get("cloud_model_name")
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    /// Moves a legacy `role = system_intent` metadata tag into `purpose`
    pub(crate) fn upgrade_legacy_role(&mut self) {
        if self.metadata.get(LEGACY_ROLE_KEY).map(String::as_str) == Some(LEGACY_SYSTEM_INTENT) {
            self.metadata.remove(LEGACY_ROLE_KEY);
            self.purpose = ModelPurpose::SystemIntent;
        }
    }
}

impl fmt::Display for ModelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)?;
        if self.is_active {
            write!(f, " [active]")?;
        }
        if self.is_base_model {
            write!(f, " [base]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_record_defaults() {
        let record = ModelRecord::local("phi3", "Phi-3", "/models/phi3.gguf");
        assert_eq!(record.kind, ModelKind::Local);
        assert_eq!(record.backend, LOCAL_BACKEND);
        assert!(!record.is_cloud());
        assert_eq!(record.artifact_path(), Some(PathBuf::from("/models/phi3.gguf")));
        assert_eq!(record.purpose, ModelPurpose::User);
    }

    #[test]
    fn test_cloud_record() {
        let record = ModelRecord::cloud("gpt4o", "gpt-4o", "openai", "https://api.openai.com/v1");
        assert!(record.is_cloud());
        assert_eq!(record.artifact_path(), None);
        assert_eq!(record.cloud_model_name(), "gpt-4o");

        let renamed = record.with_metadata("cloud_model_name", "gpt-4o-2024-08-06");
        assert_eq!(renamed.cloud_model_name(), "gpt-4o-2024-08-06");
    }

    #[test]
    fn test_legacy_role_is_upgraded() {
        let json = r#"{
            "id": "intent",
            "name": "Intent",
            "kind": "local",
            "backend": "llama.cpp",
            "location": "/m/intent.gguf",
            "metadata": {"role": "system_intent", "repo_id": "x/y"}
        }"#;
        let mut record: ModelRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.purpose, ModelPurpose::User);

        record.upgrade_legacy_role();
        assert_eq!(record.purpose, ModelPurpose::SystemIntent);
        assert!(!record.metadata.contains_key("role"));
        assert_eq!(record.metadata.get("repo_id").unwrap(), "x/y");
    }

    #[test]
    fn test_display_flags() {
        let mut record = ModelRecord::local("a", "A", "/a").base();
        record.is_active = true;
        assert_eq!(record.to_string(), "a (A) [active] [base]");
    }
}
