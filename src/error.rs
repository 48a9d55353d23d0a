use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems the rendering core can run into.
///
/// Only [`RenderError::Structural`] stops anything, and only for the part it was raised for.
/// Everything else is corrected or skipped locally and reported through [`Diagnostics`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderError {
    #[error("{kind} '{name}' is not defined in style '{style}'")]
    MissingReference {
        kind: String,
        style: String,
        name: String,
    },

    #[error("invalid {parameter} at date {date}: {correction}")]
    InvalidParameter {
        parameter: String,
        date: f64,
        correction: String,
    },

    #[error("part '{part}' cannot be rendered: {reason}")]
    Structural { part: String, reason: String },

    #[error("{what} at date {date} would not keep a positive duration, change reduced to {applied}")]
    DegenerateTiming {
        what: String,
        date: f64,
        applied: f64,
    },
}

impl RenderError {
    pub fn missing(kind: &str, style: &str, name: &str) -> Self {
        RenderError::MissingReference {
            kind: kind.to_string(),
            style: style.to_string(),
            name: name.to_string(),
        }
    }

    pub fn invalid(parameter: &str, date: f64, correction: impl Into<String>) -> Self {
        RenderError::InvalidParameter {
            parameter: parameter.to_string(),
            date,
            correction: correction.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RenderError::Structural { .. })
    }
}

/// A recoverable problem attached to the part it was raised in (`None` for the global maps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderWarning {
    pub part: Option<String>,
    pub error: RenderError,
}

/// A part that was left out of the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartFailure {
    pub part: String,
    pub reason: String,
}

/// Collects recoverable errors for one part (or for the global environment) during a render.
#[derive(Debug, Default)]
pub struct Diagnostics {
    scope: Option<String>,
    errors: Vec<RenderError>,
}

impl Diagnostics {
    pub fn new(scope: Option<String>) -> Self {
        Self {
            scope,
            errors: Vec::new(),
        }
    }

    pub fn report(&mut self, error: RenderError) {
        match &self.scope {
            Some(part) => warn!("[{}] {}..!", part, error),
            None => warn!("[global] {}..!", error),
        }
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[RenderError] {
        &self.errors
    }

    pub fn into_warnings(self) -> Vec<RenderWarning> {
        let scope = self.scope;
        self.errors
            .into_iter()
            .map(|error| RenderWarning {
                part: scope.clone(),
                error,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn diagnostics_attach_scope() {
        env_logger::try_init().unwrap_or(());

        let mut diagnostics = Diagnostics::new(Some("Violin".into()));
        diagnostics.report(RenderError::missing("articulationDef", "default", "wobble"));
        diagnostics.report(RenderError::invalid("rubato intensity", 0.0, "set to 0.01"));
        assert_eq!(diagnostics.errors().len(), 2);

        let warnings = diagnostics.into_warnings();
        assert!(warnings.iter().all(|w| w.part.as_deref() == Some("Violin")));
        assert!(warnings.iter().all(|w| w.error.is_recoverable()));
    }

    #[test]
    fn structural_is_fatal() {
        let err = RenderError::Structural {
            part: "Viola".into(),
            reason: "missing midi.channel".into(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "part 'Viola' cannot be rendered: missing midi.channel"
        );
    }
}
