use std::collections::HashMap;

use crate::params::ParameterSnapshot;

// =============================================================================
// FACTORY PRESETS
// =============================================================================

/// Factory starting points for common compression jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryPreset {
    Default,
    GentleBus,
    VocalLeveler,
    DrumPunch,
    BrickwallLimiter,
}

impl FactoryPreset {
    pub fn all_presets() -> [FactoryPreset; 5] {
        [
            FactoryPreset::Default,
            FactoryPreset::GentleBus,
            FactoryPreset::VocalLeveler,
            FactoryPreset::DrumPunch,
            FactoryPreset::BrickwallLimiter,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FactoryPreset::Default => "Default",
            FactoryPreset::GentleBus => "Gentle Bus",
            FactoryPreset::VocalLeveler => "Vocal Leveler",
            FactoryPreset::DrumPunch => "Drum Punch",
            FactoryPreset::BrickwallLimiter => "Brickwall Limiter",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FactoryPreset::Default => "Unity settings - no compression",
            FactoryPreset::GentleBus => "Slow, wide-knee glue for mix buses",
            FactoryPreset::VocalLeveler => "Moderate ratio with hold for spoken and sung vocals",
            FactoryPreset::DrumPunch => "Hard knee with slow attack to keep transients",
            FactoryPreset::BrickwallLimiter => "Lookahead peak ceiling at -1 dBFS",
        }
    }

    /// Case-insensitive lookup by display name.
    pub fn from_name(name: &str) -> Option<FactoryPreset> {
        Self::all_presets()
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

impl Default for FactoryPreset {
    fn default() -> Self {
        FactoryPreset::Default
    }
}

#[derive(Debug)]
pub struct PresetManager {
    presets: HashMap<String, ParameterSnapshot>,
}

impl PresetManager {
    /// Load presets from baked-in JSON. This is fallible but non-fatal.
    /// Falls back to a table holding only "Default" if parsing fails.
    pub fn new() -> Self {
        Self::from_json(include_str!("../presets.json"))
    }

    pub fn from_json(presets_str: &str) -> Self {
        match serde_json::from_str::<HashMap<String, ParameterSnapshot>>(presets_str) {
            Ok(presets) => Self { presets },
            Err(err) => {
                log::warn!("factory preset table is malformed, using defaults: {err}");
                Self::default()
            }
        }
    }

    pub fn get(&self, preset_name: &str) -> Option<&ParameterSnapshot> {
        self.presets.get(preset_name)
    }

    /// Snapshot for a factory preset; the default snapshot when missing.
    pub fn snapshot(&self, preset: FactoryPreset) -> ParameterSnapshot {
        self.get(preset.name())
            .map(ParameterSnapshot::sanitized)
            .unwrap_or_default()
    }
}

impl Default for PresetManager {
    fn default() -> Self {
        let mut presets = HashMap::new();
        presets.insert(
            FactoryPreset::Default.name().to_string(),
            ParameterSnapshot::default(),
        );
        Self { presets }
    }
}
