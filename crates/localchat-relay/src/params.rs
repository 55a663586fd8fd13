//! Sampling parameters for a chat request.

use std::ops::RangeInclusive;

use crate::error::RelayError;

/// Temperature and output length for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    temperature: f32,
    max_tokens: u32,
}

impl SamplingParams {
    pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.1..=4.0;
    pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 250..=4096;

    pub const DEFAULT_TEMPERATURE: f32 = 0.45;
    pub const DEFAULT_MAX_TOKENS: u32 = 1500;

    /// Validate and build sampling parameters.
    pub fn new(temperature: f32, max_tokens: u32) -> Result<Self, RelayError> {
        if !Self::TEMPERATURE_RANGE.contains(&temperature) {
            return Err(RelayError::InvalidParams(format!(
                "temperature {} outside {:?}",
                temperature,
                Self::TEMPERATURE_RANGE
            )));
        }
        if !Self::MAX_TOKENS_RANGE.contains(&max_tokens) {
            return Err(RelayError::InvalidParams(format!(
                "max_tokens {} outside {:?}",
                max_tokens,
                Self::MAX_TOKENS_RANGE
            )));
        }
        Ok(Self {
            temperature,
            max_tokens,
        })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: Self::DEFAULT_TEMPERATURE,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }
}
