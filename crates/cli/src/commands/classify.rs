use maimai_core::moderation::{normalize, FastPathClassifier};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ClassifyReport<'a> {
    command: &'static str,
    status: &'static str,
    text: &'a str,
    normalized: String,
    flagged: bool,
    severity: &'static str,
}

/// Runs the fast-path classifier on `text` without touching config or the
/// network, so operators can check how a message would be routed.
pub fn run(text: &str) -> CommandResult {
    let classifier = match FastPathClassifier::new() {
        Ok(classifier) => classifier,
        Err(error) => {
            return CommandResult::failure(
                "classify",
                "classifier_rules",
                format!("classifier pattern failed to compile: {error}"),
                2,
            );
        }
    };

    let classification = classifier.classify(text);
    let report = ClassifyReport {
        command: "classify",
        status: "ok",
        text,
        normalized: normalize(text),
        flagged: classification.is_flagged,
        severity: classification.severity.as_str(),
    };

    match serde_json::to_string(&report) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("classify", "serialization", error.to_string(), 3),
    }
}
