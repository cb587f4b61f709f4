/*!
 * Generation profiles.
 *
 * A profile is the complete set of sampling parameters and stream guards for
 * one kind of request. Profiles are built once (defaults, then an optional
 * JSON override file), validated, and only read afterwards.
 */

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Which kind of request a profile serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Translation,
    QualityCheck,
    Enhancement,
    FrontMatter,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::QualityCheck => "quality_check",
            Self::Enhancement => "enhancement",
            Self::FrontMatter => "front_matter",
        }
    }
}

impl std::str::FromStr for ProfileKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "translation" => Ok(Self::Translation),
            "quality_check" => Ok(Self::QualityCheck),
            "enhancement" => Ok(Self::Enhancement),
            "front_matter" => Ok(Self::FrontMatter),
            _ => Err(anyhow!("Unknown generation profile: {}", s)),
        }
    }
}

/// Immutable sampling and guard parameters for one request kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationProfile {
    pub kind: &'static str,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub repetition_penalty: Option<f32>,
    /// Stream watchdog in seconds, 0 disables it
    pub watchdog_secs: u64,
    /// Marker whose appearance ends the stream early
    pub sentinel: Option<String>,
    /// Enable the short and long repetition guards
    pub repeat_guard: bool,
}

impl GenerationProfile {
    /// Deterministic line-by-line translation
    pub fn translation(end_marker: &str) -> Self {
        Self {
            kind: ProfileKind::Translation.as_str(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 6000,
            stop: Vec::new(),
            frequency_penalty: None,
            presence_penalty: None,
            repetition_penalty: None,
            watchdog_secs: 300,
            sentinel: non_empty(end_marker),
            repeat_guard: true,
        }
    }

    /// GOOD/BAD verdicts from the judge tier
    pub fn quality_check(judge_end_marker: &str) -> Self {
        Self {
            kind: ProfileKind::QualityCheck.as_str(),
            temperature: 0.1,
            top_p: 0.8,
            max_tokens: 1500,
            stop: Vec::new(),
            frequency_penalty: None,
            presence_penalty: None,
            repetition_penalty: None,
            watchdog_secs: 300,
            sentinel: non_empty(judge_end_marker),
            repeat_guard: true,
        }
    }

    /// Rewriting drafts that still show residual issues
    pub fn enhancement(end_marker: &str) -> Self {
        Self {
            kind: ProfileKind::Enhancement.as_str(),
            temperature: 0.3,
            top_p: 0.9,
            max_tokens: 2000,
            stop: vec![
                "（未完待续）".to_string(),
                "[END]".to_string(),
                "<|im_end|>".to_string(),
                "</s>".to_string(),
            ],
            frequency_penalty: Some(0.3),
            presence_penalty: Some(0.2),
            repetition_penalty: None,
            watchdog_secs: 300,
            sentinel: non_empty(end_marker),
            repeat_guard: true,
        }
    }

    /// Short metadata values from the front matter
    pub fn front_matter(end_marker: &str) -> Self {
        Self {
            kind: ProfileKind::FrontMatter.as_str(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 800,
            stop: Vec::new(),
            frequency_penalty: None,
            presence_penalty: None,
            repetition_penalty: None,
            watchdog_secs: 180,
            sentinel: non_empty(end_marker),
            repeat_guard: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!(
                "Profile '{}': temperature must be between 0 and 2, got {}",
                self.kind,
                self.temperature
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(anyhow!(
                "Profile '{}': top_p must be in (0, 1], got {}",
                self.kind,
                self.top_p
            ));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("Profile '{}': max_tokens must be at least 1", self.kind));
        }
        Ok(())
    }

    fn apply(&mut self, patch: &ProfileOverride) {
        if let Some(v) = patch.temperature {
            self.temperature = v;
        }
        if let Some(v) = patch.top_p {
            self.top_p = v;
        }
        if let Some(v) = patch.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = &patch.stop {
            self.stop = v.clone();
        }
        if patch.frequency_penalty.is_some() {
            self.frequency_penalty = patch.frequency_penalty;
        }
        if patch.presence_penalty.is_some() {
            self.presence_penalty = patch.presence_penalty;
        }
        if patch.repetition_penalty.is_some() {
            self.repetition_penalty = patch.repetition_penalty;
        }
        if let Some(v) = patch.watchdog_secs {
            self.watchdog_secs = v;
        }
        if let Some(v) = &patch.sentinel {
            self.sentinel = non_empty(v);
        }
        if let Some(v) = patch.repeat_guard {
            self.repeat_guard = v;
        }
    }
}

fn non_empty(marker: &str) -> Option<String> {
    if marker.is_empty() { None } else { Some(marker.to_string()) }
}

/// Partial profile as written in a profiles JSON file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverride {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub repetition_penalty: Option<f32>,
    pub watchdog_secs: Option<u64>,
    pub sentinel: Option<String>,
    pub repeat_guard: Option<bool>,
}

/// The four profiles the engine uses, resolved once per run
#[derive(Debug, Clone)]
pub struct ProfileSet {
    translation: GenerationProfile,
    quality_check: GenerationProfile,
    enhancement: GenerationProfile,
    front_matter: GenerationProfile,
}

impl ProfileSet {
    /// Built-in defaults
    pub fn defaults(end_marker: &str, judge_end_marker: &str) -> Self {
        Self {
            translation: GenerationProfile::translation(end_marker),
            quality_check: GenerationProfile::quality_check(judge_end_marker),
            enhancement: GenerationProfile::enhancement(end_marker),
            front_matter: GenerationProfile::front_matter(end_marker),
        }
    }

    /// Merge a JSON object of `{profile name: partial profile}` over the current values
    pub fn with_overrides_json(mut self, json: &str) -> Result<Self> {
        let overrides: HashMap<String, ProfileOverride> =
            serde_json::from_str(json).context("Failed to parse profile overrides")?;

        for (name, patch) in &overrides {
            let kind: ProfileKind = name.parse()?;
            self.get_mut(kind).apply(patch);
        }
        self.validate()?;
        Ok(self)
    }

    /// Defaults merged with an optional override file
    pub fn load(end_marker: &str, judge_end_marker: &str, overrides: Option<&Path>) -> Result<Self> {
        let set = Self::defaults(end_marker, judge_end_marker);
        match overrides {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read profiles file: {:?}", path))?;
                set.with_overrides_json(&json)
            }
            None => {
                set.validate()?;
                Ok(set)
            }
        }
    }

    pub fn get(&self, kind: ProfileKind) -> &GenerationProfile {
        match kind {
            ProfileKind::Translation => &self.translation,
            ProfileKind::QualityCheck => &self.quality_check,
            ProfileKind::Enhancement => &self.enhancement,
            ProfileKind::FrontMatter => &self.front_matter,
        }
    }

    fn get_mut(&mut self, kind: ProfileKind) -> &mut GenerationProfile {
        match kind {
            ProfileKind::Translation => &mut self.translation,
            ProfileKind::QualityCheck => &mut self.quality_check,
            ProfileKind::Enhancement => &mut self.enhancement,
            ProfileKind::FrontMatter => &mut self.front_matter,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.translation.validate()?;
        self.quality_check.validate()?;
        self.enhancement.validate()?;
        self.front_matter.validate()
    }
}
