//! Language profile registry.
//!
//! Profiles are flat capability records (compile step, run command,
//! resource factors, lint command) loaded from an embedded TOML file into
//! a read-only registry at startup. Aliases map onto the canonical name.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Capability record for one supported language.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    /// Canonical name ("cpp", "python", "java")
    pub name: String,
    /// Source file extension without the dot
    pub file_extension: String,
    /// Name the source file must have inside the sandbox (e.g. "Main.java")
    pub source_file: String,
    /// Compile step; syntax validation for interpreted languages
    pub compile_command: Vec<String>,
    /// Command that runs the compiled artifact
    pub run_command: Vec<String>,
    /// Time limit multiplier relative to the native baseline
    pub time_multiplier: f64,
    /// Memory limit multiplier relative to the native baseline
    pub memory_multiplier: f64,
    /// Fixed interpreter/VM overhead in KiB added to the memory limit
    pub memory_overhead_kb: u32,
    /// Optional lint command for the quality analyzer
    pub lint_command: Option<Vec<String>>,
}

impl LanguageProfile {
    /// Adjusted time limit in milliseconds.
    ///
    /// Multipliers outside [0.1, 10.0] are configuration mistakes; they are
    /// clamped and logged rather than allowed to starve or inflate runs.
    pub fn adjusted_time_ms(&self, base_time_ms: u32) -> u32 {
        let m = clamp_multiplier(self.time_multiplier, &self.name, "time");
        (base_time_ms as f64 * m) as u32
    }

    /// Adjusted memory limit in KiB, including the fixed overhead.
    pub fn adjusted_memory_kb(&self, base_memory_kb: u32) -> u32 {
        let m = clamp_multiplier(self.memory_multiplier, &self.name, "memory");
        (base_memory_kb as f64 * m) as u32 + self.memory_overhead_kb
    }
}

fn clamp_multiplier(value: f64, language: &str, kind: &str) -> f64 {
    if !(0.1..=10.0).contains(&value) {
        let clamped = value.clamp(0.1, 10.0);
        warn!(
            "Invalid {} multiplier {} for {}, clamping to {}",
            kind, value, language, clamped
        );
        clamped
    } else {
        value
    }
}

/// Raw TOML shape of a profile entry.
#[derive(Debug, Deserialize)]
struct RawProfile {
    file_extension: String,
    source_file: String,
    compile_command: String,
    run_command: String,
    time_multiplier: f64,
    memory_multiplier: f64,
    memory_overhead_kb: u32,
    lint_command: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

static LANGUAGES: OnceLock<HashMap<String, LanguageProfile>> = OnceLock::new();

/// Initialize the registry from the embedded profile file.
pub fn init_languages() -> Result<()> {
    let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
    let raw: HashMap<String, RawProfile> =
        toml::from_str(content).context("Failed to parse languages.toml")?;

    let mut languages = HashMap::new();
    for (name, raw) in raw {
        let profile = LanguageProfile {
            name: name.to_lowercase(),
            file_extension: raw.file_extension,
            source_file: raw.source_file,
            compile_command: into_command(&raw.compile_command),
            run_command: into_command(&raw.run_command),
            time_multiplier: raw.time_multiplier,
            memory_multiplier: raw.memory_multiplier,
            memory_overhead_kb: raw.memory_overhead_kb,
            lint_command: raw.lint_command.as_deref().map(into_command),
        };

        for alias in &raw.aliases {
            languages.insert(alias.to_lowercase(), profile.clone());
        }
        languages.insert(name.to_lowercase(), profile);
    }

    LANGUAGES
        .set(languages)
        .map_err(|_| anyhow::anyhow!("Language registry already initialized"))?;

    Ok(())
}

/// Look up a profile by language name or alias.
pub fn get_profile(language: &str) -> Option<LanguageProfile> {
    LANGUAGES.get()?.get(&language.to_lowercase()).cloned()
}

/// Canonical names of all supported languages.
pub fn supported_languages() -> Vec<String> {
    let mut names: Vec<String> = LANGUAGES
        .get()
        .map(|langs| {
            langs
                .values()
                .map(|p| p.name.clone())
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
