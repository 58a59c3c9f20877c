use std::collections::HashMap;

use procapi_common::OutputData;

use super::OutputPreprocessor;

/// Result class reported for any backend value missing from the label map.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Maps the backend's numeric class index to a human-readable label.
#[derive(Debug, Clone)]
pub struct LabelOutputPreprocessor {
    labels: HashMap<i64, String>,
}

impl Default for LabelOutputPreprocessor {
    fn default() -> Self {
        Self::new([(0, "cat"), (1, "dog")])
    }
}

impl LabelOutputPreprocessor {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }
}

impl OutputPreprocessor for LabelOutputPreprocessor {
    fn decode_output(&self, raw: &str) -> OutputData {
        let label = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|idx| self.labels.get(&idx))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL);

        if label == UNKNOWN_LABEL {
            tracing::debug!(raw, "Unrecognised backend output, reporting unknown");
        }
        OutputData::new(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", "cat")]
    #[case("1", "dog")]
    #[case(" 1\n", "dog")]
    #[case("7", "unknown")]
    #[case("-1", "unknown")]
    #[case("", "unknown")]
    #[case("dog", "unknown")]
    fn test_default_labels(#[case] raw: &str, #[case] expected: &str) {
        let output = LabelOutputPreprocessor::default().decode_output(raw);
        assert_eq!(output.result_class, expected);
    }

    #[test]
    fn test_custom_label_set() {
        let pre = LabelOutputPreprocessor::new([(0, "bird"), (7, "horse")]);
        assert_eq!(pre.decode_output("7").result_class, "horse");
        assert_eq!(pre.decode_output("1").result_class, "unknown");
    }
}
