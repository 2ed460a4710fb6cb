//! Formatter detection and routing.

use super::formatters::{GenericFormatter, GoTestFormatter, JestFormatter, PytestFormatter};
use super::Formatter;

/// Minimum detection score a framework formatter must reach.
pub const DETECT_THRESHOLD: u8 = 50;

struct Candidate {
    name: &'static str,
    detect: fn(&str, &str) -> u8,
    build: fn() -> Box<dyn Formatter>,
}

/// Picks the best formatter for a command and its early output.
///
/// Candidates are scored in declaration order; the highest score wins and
/// ties keep the earliest candidate. Anything below the threshold falls
/// back to the generic formatter.
pub struct FormatterRegistry {
    candidates: Vec<Candidate>,
    color: bool,
}

impl FormatterRegistry {
    /// Creates the registry with the built-in framework formatters.
    #[must_use]
    pub fn new(color: bool) -> Self {
        Self {
            candidates: vec![
                Candidate {
                    name: "pytest",
                    detect: PytestFormatter::detect,
                    build: || Box::new(PytestFormatter::new()),
                },
                Candidate {
                    name: "go test",
                    detect: GoTestFormatter::detect,
                    build: || Box::new(GoTestFormatter::new()),
                },
                Candidate {
                    name: "jest",
                    detect: JestFormatter::detect,
                    build: || Box::new(JestFormatter::new()),
                },
            ],
            color,
        }
    }

    /// Returns the formatter whose `detect` scored highest for the inputs.
    #[must_use]
    pub fn detect(&self, command: &str, raw_output: &str) -> Box<dyn Formatter> {
        let mut best: Option<(&Candidate, u8)> = None;
        for candidate in &self.candidates {
            let score = (candidate.detect)(command, raw_output).min(100);
            let beats_current = best.is_none_or(|(_, best_score)| score > best_score);
            if score >= DETECT_THRESHOLD && beats_current {
                best = Some((candidate, score));
            }
        }

        best.map_or_else(
            || {
                log::debug!("no framework formatter matched; using generic");
                Box::new(GenericFormatter::new(self.color)) as Box<dyn Formatter>
            },
            |(candidate, score)| {
                log::debug!("formatter {} selected (score {score})", candidate.name);
                (candidate.build)()
            },
        )
    }
}
