//! Test-definition loading and validation.
//!
//! A definition is a JSON document with a required `test_cases` list;
//! validation happens entirely locally, before any network activity.

use crate::errors::DefinitionError;
use crate::types::ImpactAssessment;
use serde::Deserialize;
use std::path::Path;

/// Parsed test-definition document.
#[derive(Debug, Clone, Deserialize)]
pub struct TestDefinition {
    pub test_cases: Vec<TestCase>,
    /// Pre-computed impact flags, if the authoring tool embedded them.
    /// The classifier result is OR-ed with these.
    #[serde(default)]
    pub impacts: Option<ImpactAssessment>,
}

/// One test case inside a definition.
#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl TestDefinition {
    /// Parse and validate a definition from raw JSON text.
    pub fn parse(text: &str) -> Result<Self, DefinitionError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|source| DefinitionError::InvalidJson { source })?;

        // Distinguish "no test_cases key" from a structurally broken one
        // so the user gets the actionable message.
        if value.get("test_cases").is_none() {
            return Err(DefinitionError::MissingTestCases);
        }

        serde_json::from_value(value).map_err(|source| DefinitionError::InvalidJson { source })
    }

    /// Load and validate a definition file from disk.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        if !path.exists() {
            return Err(DefinitionError::NotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn case_count(&self) -> usize {
        self.test_cases.len()
    }
}
