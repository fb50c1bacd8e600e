// Language configuration management
// Loads the languages the execution service accepts from languages.json

use grader_common::types::Language;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse languages file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown language '{0}' in languages file")]
    UnknownLanguage(String),

    #[error("no languages configured")]
    Empty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub file_extension: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageConfig>,
}

/// Registry of languages the executor advertises
/// Intake rejects anything outside this set even if an assessment allows it
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    enabled_languages: HashSet<Language>,
}

impl LanguageRegistry {
    /// Load language configuration from a languages.json file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| RegistryError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, RegistryError> {
        let config: LanguagesFile = serde_json::from_str(content)?;

        let mut enabled_languages = HashSet::new();
        for lang_config in &config.languages {
            let lang: Language = lang_config
                .name
                .parse()
                .map_err(|_| RegistryError::UnknownLanguage(lang_config.name.clone()))?;
            enabled_languages.insert(lang);
        }

        if enabled_languages.is_empty() {
            return Err(RegistryError::Empty);
        }

        Ok(Self { enabled_languages })
    }

    /// Check if a language is enabled
    pub fn is_enabled(&self, language: Language) -> bool {
        self.enabled_languages.contains(&language)
    }

    /// All enabled languages, in declaration order of the enum
    pub fn enabled_languages(&self) -> Vec<Language> {
        Language::ALL
            .iter()
            .copied()
            .filter(|l| self.enabled_languages.contains(l))
            .collect()
    }
}
