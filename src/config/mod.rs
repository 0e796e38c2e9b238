// Config module - Descriptor loading and supervisor settings

mod descriptor;
mod settings;

pub use descriptor::{
    expand_env, parse_signal, resolve_command, ArgList, ExecMode, InstanceCount,
    ProcessDescriptor, RawDescriptor, StdioMode,
};
pub use settings::SupervisorSettings;

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Parsed (not yet validated) contents of a descriptor file
#[derive(Debug, Clone)]
pub struct DescriptorFile {
    pub descriptors: Vec<RawDescriptor>,
}

impl DescriptorFile {
    /// Load a descriptor file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WardenError::InvalidDescriptorFile(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "toml" => Self::parse_toml(&contents),
            "json" => Self::parse_json(&contents),
            _ => Err(WardenError::InvalidDescriptorFile(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    /// Parse TOML: a single descriptor, `[[processes]]` or `[[apps]]`
    pub fn parse_toml(contents: &str) -> Result<Self> {
        let shape: FileShape = toml::from_str(contents).map_err(|e| {
            WardenError::InvalidDescriptorFile(format!("Failed to parse TOML: {}", e))
        })?;
        shape.into_file()
    }

    /// Parse JSON: a single object, `{"processes": [...]}` or `{"apps": [...]}`
    pub fn parse_json(contents: &str) -> Result<Self> {
        let shape: FileShape = serde_json::from_str(contents).map_err(|e| {
            WardenError::InvalidDescriptorFile(format!("Failed to parse JSON: {}", e))
        })?;
        shape.into_file()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FileShape {
    Processes { processes: Vec<RawDescriptor> },
    Apps { apps: Vec<RawDescriptor> },
    Single(RawDescriptor),
}

impl FileShape {
    fn into_file(self) -> Result<DescriptorFile> {
        let descriptors = match self {
            FileShape::Processes { processes } => processes,
            FileShape::Apps { apps } => apps,
            FileShape::Single(single) => vec![single],
        };

        if descriptors.is_empty() {
            return Err(WardenError::InvalidDescriptorFile(
                "No process descriptor found in file".to_string(),
            ));
        }

        Ok(DescriptorFile { descriptors })
    }
}

/// A descriptor that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub name: String,
    pub reason: String,
}

/// Validated descriptors ready to hand to the supervisor, plus the ones
/// that were rejected
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    pub descriptors: Vec<Arc<ProcessDescriptor>>,
    pub rejected: Vec<Rejection>,
}

impl DescriptorSet {
    /// Load and validate a descriptor file with the given profile selector
    pub fn load(path: &Path, profile: Option<&str>) -> Result<Self> {
        let file = DescriptorFile::from_file(path)?;
        Ok(Self::from_raw(file.descriptors, profile))
    }

    /// Validate raw descriptors. Each failure rejects only its own descriptor.
    pub fn from_raw(raws: Vec<RawDescriptor>, profile: Option<&str>) -> Self {
        let mut occurrences: HashMap<String, usize> = HashMap::new();
        for raw in &raws {
            *occurrences.entry(raw.name.trim().to_string()).or_default() += 1;
        }

        let mut set = DescriptorSet::default();
        for raw in raws {
            let name = raw.name.trim().to_string();
            let duplicated = !name.is_empty() && occurrences.get(&name).copied() > Some(1);

            let result = ProcessDescriptor::from_raw(raw, profile);
            let result = match (result, duplicated) {
                (Ok(_), true) => Err(WardenError::Validation {
                    name: name.clone(),
                    violations: vec![format!("name '{}' is declared more than once", name)],
                }),
                (Err(WardenError::Validation { name, mut violations }), true) => {
                    violations.push(format!("name '{}' is declared more than once", name));
                    Err(WardenError::Validation { name, violations })
                }
                (result, _) => result,
            };

            match result {
                Ok(descriptor) => set.descriptors.push(Arc::new(descriptor)),
                Err(e) => {
                    tracing::warn!("Rejected descriptor: {}", e);
                    set.rejected.push(Rejection {
                        name: if name.is_empty() { "<unnamed>".to_string() } else { name },
                        reason: e.to_string(),
                    });
                }
            }
        }

        set
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
