use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// Which interpretation `Engine::evaluate` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    /// Build nodes only.
    Lazy,
    #[default]
    Eager,
    /// Rewrite pass (desugar, canonicalize, optimize) then eager.
    Pipeline,
}

impl EvalMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lazy => "lazy",
            Self::Eager => "eager",
            Self::Pipeline => "pipeline",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ApiError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lazy" | "reflect" => Ok(Self::Lazy),
            "eager" => Ok(Self::Eager),
            "pipeline" | "optimize" => Ok(Self::Pipeline),
            other => Err(ApiError::Config {
                detail: format!("unknown evaluation mode `{other}`"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mode: EvalMode,
    pub backend: String,
    /// Cardinality the cost model assumes for continuous dims.
    pub continuous_size: u64,
    pub seed: u64,
    /// Interned-node count above which the engine sweeps dead entries
    /// after an evaluation.
    pub sweep_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EvalMode::Eager,
            backend: "cpu".to_owned(),
            continuous_size: 2,
            seed: 0,
            sweep_threshold: 1 << 16,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ApiError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ApiError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Applies `TT_EVAL_MODE`, `TT_BACKEND`, `TT_CONTINUOUS_SIZE` and
    /// `TT_SEED` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ApiError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::with_env_overrides`] with an explicit lookup.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ApiError> {
        if let Some(mode) = lookup("TT_EVAL_MODE") {
            self.mode = EvalMode::parse(&mode)?;
        }
        if let Some(backend) = lookup("TT_BACKEND") {
            self.backend = backend.trim().to_owned();
        }
        if let Some(size) = lookup("TT_CONTINUOUS_SIZE") {
            self.continuous_size = parse_number("TT_CONTINUOUS_SIZE", &size)?;
        }
        if let Some(seed) = lookup("TT_SEED") {
            self.seed = parse_number("TT_SEED", &seed)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.continuous_size == 0 {
            return Err(ApiError::Config {
                detail: "continuous_size must be positive".to_owned(),
            });
        }
        if self.backend.is_empty() {
            return Err(ApiError::Config {
                detail: "backend name is empty".to_owned(),
            });
        }
        Ok(())
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64, ApiError> {
    raw.trim().parse().map_err(|_| ApiError::Config {
        detail: format!("{name}={raw:?} is not an unsigned integer"),
    })
}
