//! The sclang script template: fixed text with exactly three placeholders,
//! `${osc_path}`, `${synth_def}` and `${duration}`.

use crate::error::SetupError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::path::Path;

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

const PLACEHOLDERS: [&str; 3] = ["osc_path", "synth_def", "duration"];

/// Script shipped with the crate.
pub const BUNDLED_BLUEPRINT: &str = include_str!("blueprint.scd");

#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    source: String,
}

impl ScriptTemplate {
    /// Validate `source`: every placeholder must be present, no others allowed.
    pub fn parse(source: impl Into<String>) -> Result<Self, SetupError> {
        let source = source.into();
        let found: BTreeSet<&str> = RE_PLACEHOLDER
            .captures_iter(&source)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if let Some(unknown) = found.iter().find(|name| !PLACEHOLDERS.contains(*name)) {
            return Err(SetupError::Template(format!("unknown placeholder ${{{unknown}}}")));
        }
        if let Some(missing) = PLACEHOLDERS.iter().find(|name| !found.contains(*name)) {
            return Err(SetupError::Template(format!("missing placeholder ${{{missing}}}")));
        }
        Ok(Self { source })
    }

    pub fn bundled() -> Self {
        Self {
            source: BUNDLED_BLUEPRINT.to_string(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let source = std::fs::read_to_string(path).map_err(|source| SetupError::TemplateRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(source)
    }

    /// Substitute in a single pass; inserted text is never scanned again.
    pub fn instantiate(&self, osc_path: &Path, synth_def: &str, duration: f32) -> String {
        let osc_path = osc_path.to_string_lossy();
        let duration = format!("{duration:.1}");
        RE_PLACEHOLDER
            .replace_all(&self.source, |caps: &Captures| match &caps[1] {
                "osc_path" => osc_path.to_string(),
                "synth_def" => synth_def.to_string(),
                "duration" => duration.clone(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}
