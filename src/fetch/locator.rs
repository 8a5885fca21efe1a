use crate::error::{AgentError, Result};
use std::fmt;
use std::path::Path;

const DEFAULT_REVISION: &str = "main";

/// Where an artifact lives in the repository
///
/// Accepted forms:
/// - `https://huggingface.co/owner/repo/blob/main/model.gguf` (also `resolve`)
/// - `owner/repo/model.gguf`
/// - `owner/repo`, the file is picked later from the repository listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocator {
    pub repo_id: String,
    pub filename: Option<String>,
    pub revision: String,
}

impl ArtifactLocator {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: Some(filename.into()),
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let input = input.split(['?', '#']).next().unwrap_or(input);
        let path = input
            .strip_prefix("https://")
            .or_else(|| input.strip_prefix("http://"))
            .map(|rest| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
            .unwrap_or(input);

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return Err(AgentError::InvalidLocator(format!(
                "expected owner/repo[/file], got '{}'",
                input
            )));
        }

        let repo_id = format!("{}/{}", parts[0], parts[1]);
        let rest = &parts[2..];

        let (revision, file_parts) = match rest.first() {
            Some(&"blob") | Some(&"resolve") => {
                if rest.len() < 3 {
                    return Err(AgentError::InvalidLocator(format!(
                        "missing file after revision in '{}'",
                        input
                    )));
                }
                (rest[1].to_string(), &rest[2..])
            }
            Some(&"tree") if rest.len() >= 2 => (rest[1].to_string(), &rest[2..]),
            _ => (DEFAULT_REVISION.to_string(), rest),
        };

        let filename = if file_parts.is_empty() {
            None
        } else {
            Some(file_parts.join("/"))
        };

        Ok(Self {
            repo_id,
            filename,
            revision,
        })
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn file_url(&self, endpoint: &str, filename: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            endpoint.trim_end_matches('/'),
            self.repo_id,
            self.revision,
            filename
        )
    }

    /// Last path segment of the repository id
    pub fn default_name(&self) -> String {
        self.repo_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.repo_id)
            .to_string()
    }
}

impl fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filename {
            Some(file) => write!(f, "{}/{}", self.repo_id, file),
            None => f.write_str(&self.repo_id),
        }
    }
}

/// Lowercased file stem, the default id for a pulled model
pub fn default_model_id(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| filename.to_lowercase())
}

/// Flattens a repository path into a single safe file name
pub fn local_filename(filename: &str) -> Result<String> {
    let flattened = filename
        .trim()
        .trim_start_matches('/')
        .replace('\\', "/")
        .replace('/', "__");

    let mut sanitized: String = flattened
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() || sanitized == ".." {
        return Err(AgentError::InvalidLocator(format!(
            "invalid file name '{}'",
            filename
        )));
    }
    Ok(sanitized)
}
