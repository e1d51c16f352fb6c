use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Upper bound on loaded blocks; at least one block always stays loaded.
    pub max_cache_size: usize,
    /// Percentage step at which schematic imports save progress; 0 disables.
    pub stage_save_percent: f64,
}

impl MapConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn effective_cache_size(&self) -> usize {
        self.max_cache_size.max(1)
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            stage_save_percent: 0.0,
        }
    }
}
