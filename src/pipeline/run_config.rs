//! End-to-end run configuration: estimation plus optional permutation test.

use super::runner::SparccConfig;
use crate::error::{Result, SparccError};
use crate::test::PermutationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serializable description of a full analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Basis correlation estimation.
    #[serde(default)]
    pub sparcc: SparccConfig,
    /// Permutation p-values; skipped when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permutation: Option<PermutationConfig>,
}

impl RunConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(SparccError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(SparccError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// A fully populated configuration to start from.
    pub fn example() -> Self {
        Self {
            name: "example-sparcc".to_string(),
            description: Some(
                "SparCC correlations with two-sided permutation p-values".to_string(),
            ),
            sparcc: SparccConfig {
                seed: Some(42),
                ..Default::default()
            },
            permutation: Some(PermutationConfig::default()),
        }
    }

    /// Validate both stages.
    pub fn validate(&self) -> Result<()> {
        self.sparcc.validate()?;
        if let Some(permutation) = &self.permutation {
            if permutation.n_permutations == 0 {
                return Err(SparccError::InvalidParameter(
                    "Number of permutations must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestType;

    #[test]
    fn test_example_roundtrip() {
        let config = RunConfig::example();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("example-sparcc"));
        assert_eq!(RunConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_minimal_yaml() {
        let yaml = r#"
name: minimal
sparcc:
  n_iter: 5
permutation:
  n_permutations: 10
  test_type: one_sided
"#;
        let config = RunConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sparcc.n_iter, 5);
        assert_eq!(config.sparcc.threshold, 0.1);
        let permutation = config.permutation.unwrap();
        assert_eq!(permutation.test_type, TestType::OneSided);
        assert_eq!(permutation.seed, 42);
    }

    #[test]
    fn test_unknown_test_type_rejected() {
        let yaml = "name: bad\npermutation:\n  test_type: three_sided\n";
        assert!(RunConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_permutations_invalid() {
        let mut config = RunConfig::example();
        config.permutation = Some(PermutationConfig {
            n_permutations: 0,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }
}
