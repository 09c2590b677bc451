// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Static policy YAML parser.
//!
//! # File Format
//!
//! ```yaml
//! subjects:
//!   fused.track:
//!     pubs: [fusion-ae]
//!     subs: [display-ae]
//!     labels: [cui]
//! roles:
//!   producer: {}
//! ```

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::policy::StaticPolicy;

pub struct StaticPolicyLoader;

impl StaticPolicyLoader {
    pub fn parse_yaml(yaml: &str) -> Result<StaticPolicy> {
        serde_yaml::from_str(yaml).context("failed to parse policy YAML")
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<StaticPolicy> {
        let yaml = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read policy file: {:?}", path.as_ref()))?;
        Self::parse_yaml(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subjects_and_roles() {
        let yaml = r#"
subjects:
  fused.track:
    pubs: [fusion-ae]
    subs: [display-ae, logger-ae]
    labels: [cui]
  raw.sensor:
    pubs: [sensor-ae]
roles:
  producer:
    description: "emits envelopes"
"#;
        let policy = StaticPolicyLoader::parse_yaml(yaml).unwrap();
        assert_eq!(policy.subjects.len(), 2);

        let rule = &policy.subjects["fused.track"];
        assert!(rule.pubs.contains("fusion-ae"));
        assert_eq!(rule.subs.len(), 2);
        assert!(rule.labels.contains("cui"));

        // Omitted sections default to empty.
        assert!(policy.subjects["raw.sensor"].subs.is_empty());
        assert!(policy.roles.contains_key("producer"));
    }

    #[test]
    fn empty_document_yields_empty_policy() {
        let policy = StaticPolicyLoader::parse_yaml("{}").unwrap();
        assert!(policy.subjects.is_empty());
        assert!(policy.roles.is_empty());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(StaticPolicyLoader::parse_yaml("subjects: [not, a, map").is_err());
        assert!(StaticPolicyLoader::parse_yaml("subjects: 42").is_err());
    }
}
