//! Turns engine output and the produced file into an accept/reject verdict.

use crate::markers;

/// Output files must be strictly larger than this many bytes.
pub const MIN_VALID_SIZE: u64 = 100;

/// Marker to reason, in the order reasons are reported.
const MARKER_REASONS: &[(&str, &str)] = &[
    (markers::USER_SCRIPT_ERROR, "user script crashed"),
    (
        markers::ZERO_OBJECTS_SELECTED,
        "no exportable objects (0 objects selected)",
    ),
    (markers::CRITICAL_EXPORT_ERROR, "export command failed"),
    (markers::UNKNOWN_FORMAT, "unknown export format"),
    (markers::ENGINE_TIMEOUT, "engine timed out"),
];

const NO_OUTPUT: &str = "no output file produced";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub accepted: bool,
    /// Ordered and free of duplicates. May be non-empty on an accepted
    /// export when the user script failed but the export still succeeded.
    pub reasons: Vec<String>,
}

impl Classification {
    /// Reasons joined for a job's error text.
    pub fn summary(&self) -> String {
        self.reasons.join(", ")
    }
}

/// Stateless verdict over one engine run.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputClassifier;

impl OutputClassifier {
    /// `size` is ignored when `exists` is false.
    pub fn classify(&self, output: &str, exists: bool, size: u64) -> Classification {
        let mut reasons: Vec<String> = MARKER_REASONS
            .iter()
            .filter(|(marker, _)| output.contains(marker))
            .map(|(_, reason)| reason.to_string())
            .collect();

        let accepted = exists && size > MIN_VALID_SIZE;

        if exists && !accepted {
            reasons.push(format!(
                "output file too small: {size} bytes (minimum {MIN_VALID_SIZE})"
            ));
        }

        if !accepted && reasons.is_empty() {
            reasons.push(NO_OUTPUT.to_string());
        }

        Classification { accepted, reasons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_objects_reports_object_count_once() {
        let output = "SELECTED_OBJECTS: 0\nZERO_OBJECTS_SELECTED: no exportable objects in scene\n";
        let verdict = OutputClassifier.classify(output, false, 0);
        assert!(!verdict.accepted);
        assert_eq!(
            verdict.reasons,
            vec!["no exportable objects (0 objects selected)".to_string()]
        );
    }

    #[test]
    fn small_file_reports_size() {
        let verdict = OutputClassifier.classify("EXPORT_SUCCESS: selection", true, 50);
        assert!(!verdict.accepted);
        assert_eq!(verdict.reasons.len(), 1);
        assert!(verdict.reasons[0].contains("50 bytes"));
        assert!(verdict.reasons[0].contains("minimum 100"));
    }

    #[test]
    fn clean_large_file_is_accepted() {
        let verdict = OutputClassifier.classify("EXPORT_SUCCESS: selection", true, 5000);
        assert!(verdict.accepted);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn boundary_size_is_rejected() {
        assert!(OutputClassifier.classify("", true, MIN_VALID_SIZE + 1).accepted);
        assert!(!OutputClassifier.classify("", true, MIN_VALID_SIZE).accepted);
    }

    #[test]
    fn user_error_with_good_file_is_accepted_with_reason() {
        let output = "USER_SCRIPT_ERROR: NameError: x\nSELECTED_OBJECTS: 1\nEXPORT_SUCCESS: selection\n";
        let verdict = OutputClassifier.classify(output, true, 4096);
        assert!(verdict.accepted);
        assert_eq!(verdict.reasons, vec!["user script crashed".to_string()]);
    }

    #[test]
    fn silent_failure_gets_generic_reason() {
        let verdict = OutputClassifier.classify("Traceback: something", false, 0);
        assert_eq!(verdict.reasons, vec![NO_OUTPUT.to_string()]);
    }

    #[test]
    fn reasons_follow_marker_order_without_duplicates() {
        let output = "ENGINE_TIMEOUT: killed\nUSER_SCRIPT_ERROR: a\nUSER_SCRIPT_ERROR: b\n";
        let verdict = OutputClassifier.classify(output, false, 0);
        assert_eq!(
            verdict.reasons,
            vec!["user script crashed".to_string(), "engine timed out".to_string()]
        );
        assert_eq!(verdict.summary(), "user script crashed, engine timed out");
    }

    #[test]
    fn size_ignored_without_file() {
        let verdict = OutputClassifier.classify("", false, 10_000);
        assert!(!verdict.accepted);
        assert_eq!(verdict.reasons, vec![NO_OUTPUT.to_string()]);
    }
}
