use wasmparser::{Validator, WasmFeatures};

/// Shared collection configuration.
///
/// Markers are only collected from modules that pass validation, so
/// the features enabled here decide which modules are accepted at all.
#[derive(Debug, Clone)]
pub struct Engine {
    features: WasmFeatures,
}

impl Engine {
    pub fn new(features: WasmFeatures) -> Self {
        Self { features }
    }

    pub fn features(&self) -> WasmFeatures {
        self.features
    }

    /// Create a new validator with the engine's features.
    pub fn new_validator(&self) -> Validator {
        Validator::new_with_features(self.features)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(WasmFeatures::default())
    }
}
