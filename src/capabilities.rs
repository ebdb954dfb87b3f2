//! Optional heavy ML capabilities (face embeddings, OCR).
//!
//! Resolved once from `[capabilities]` at startup. The core never runs these
//! models itself; callers ask before delegating to an external service.

use std::fmt;

use crate::config::CapabilitiesConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Face,
    Ocr,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Face => f.write_str("face"),
            Capability::Ocr => f.write_str("ocr"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    face: bool,
    ocr: bool,
}

impl Capabilities {
    pub fn from_config(config: &CapabilitiesConfig) -> Self {
        Self { face: config.face, ocr: config.ocr }
    }

    pub fn is_enabled(&self, cap: Capability) -> bool {
        match cap {
            Capability::Face => self.face,
            Capability::Ocr => self.ocr,
        }
    }

    /// `Err(CapabilityUnavailable)` unless `cap` is present in this deployment.
    pub fn require(&self, cap: Capability) -> Result<(), AppError> {
        if self.is_enabled(cap) {
            Ok(())
        } else {
            Err(AppError::CapabilityUnavailable(format!("{cap} is not installed in this deployment")))
        }
    }

    /// Enabled capabilities, for the status line.
    pub fn available(&self) -> Vec<Capability> {
        [Capability::Face, Capability::Ocr]
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }
}
