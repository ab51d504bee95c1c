//! YAML configuration.
//!
//! ```yaml
//! system:
//!   max_posts_per_run: 3
//! targets:
//!   - group: "Artist"
//!     source_id: "UC..."
//!     milestones: { default_step: 1000000, initial_target: 1000000 }
//!     support_triggers: [{ distance: 10000 }]
//! templates:
//!   achieved: "{title} passed {milestone}!"
//!   support: "{title}: {remaining} to go"
//! ```
//!
//! Field names of older configuration files (`artist_name`, `channel_id`,
//! `dynamic_rules`, `step`, `support_trigger`, `remaining`) are accepted as
//! aliases.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::{DEFAULT_BATCH_SIZE, DEFAULT_FULL_SCAN_CAP};
use crate::error::ConfigError;
use crate::filter::{ItemFilter, DEFAULT_MIN_DURATION_SECS};
use crate::item::ItemId;
use crate::policy::{MilestonePolicy, SupportTrigger};
use crate::template::{NumberStyle, TemplateSet};

/// Run-wide options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemOptions {
    /// Live-mode notification budget, shared by all targets of a run.
    pub max_posts_per_run: usize,
    /// Shortest eligible item, in seconds.
    pub min_duration_secs: u64,
    /// Items read from the recent listing outside full scans.
    pub recent_limit: usize,
    /// Ids per statistics request during backfill.
    pub batch_size: usize,
    /// Safety cap on items visited by a full scan.
    pub full_scan_cap: usize,
    /// Number formatting in messages.
    pub number_style: NumberStyle,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            max_posts_per_run: 3,
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            recent_limit: 50,
            batch_size: DEFAULT_BATCH_SIZE,
            full_scan_cap: DEFAULT_FULL_SCAN_CAP,
            number_style: NumberStyle::default(),
        }
    }
}

fn default_account() -> String {
    "DEFAULT".to_string()
}

fn default_item_url() -> String {
    "https://www.youtube.com/watch?v={id}".to_string()
}

/// One tracked target: a catalog source, its policy and its posting account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Group label written on tracked items and used in messages.
    #[serde(alias = "artist_name")]
    pub group: String,
    /// Catalog source identifier.
    #[serde(alias = "channel_id")]
    pub source_id: String,
    /// Account whose poster sends this target's messages.
    #[serde(default = "default_account")]
    pub account_id: String,
    /// Item link pattern; `{id}` is replaced by the item id.
    #[serde(default = "default_item_url")]
    pub item_url: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Titles must contain one of these (case-insensitive) when non-empty.
    #[serde(default)]
    pub title_keywords: Vec<String>,
    /// Titles containing any of these are skipped.
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    /// Extra template values.
    #[serde(default)]
    pub custom_vars: BTreeMap<String, String>,
    pub milestones: MilestonePolicy,
    /// Support tiers; merged with any listed under `milestones`.
    #[serde(default, alias = "support_trigger")]
    pub support_triggers: Vec<SupportTrigger>,
}

impl TargetConfig {
    /// Effective policy with target-level support tiers merged in.
    #[must_use]
    pub fn policy(&self) -> MilestonePolicy {
        let mut policy = self.milestones.clone();
        policy.support_triggers.extend(self.support_triggers.iter().copied());
        policy
    }

    /// Eligibility filter for this target.
    #[must_use]
    pub fn filter(&self, system: &SystemOptions) -> ItemFilter {
        ItemFilter::new(&self.title_keywords, &self.exclude_keywords, system.min_duration_secs)
    }

    /// Link to `id`.
    #[must_use]
    pub fn url_for(&self, id: &ItemId) -> String {
        self.item_url.replace("{id}", id.as_str())
    }

    /// Hashtags joined by spaces.
    #[must_use]
    pub fn hashtag_line(&self) -> String {
        self.hashtags.join(" ")
    }

    /// Custom template values with defaults filled in.
    #[must_use]
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.custom_vars.clone();
        vars.entry("fan_name".to_string()).or_insert_with(|| "ファン".to_string());
        vars.entry("oshi_mark".to_string()).or_insert_with(|| "✨".to_string());
        vars.entry("cheer_msg".to_string())
            .or_insert_with(|| format!("{}最高！", self.group));
        vars
    }
}

/// Message templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Templates {
    /// Used when a milestone is reached.
    pub achieved: TemplateSet,
    /// Used when a milestone is close.
    pub support: TemplateSet,
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub system: SystemOptions,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    pub templates: Templates,
}

impl WatchConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every target policy, the templates and the system options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::MissingField {
                field: "targets".to_string(),
            });
        }

        for (i, target) in self.targets.iter().enumerate() {
            if target.group.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: format!("targets[{i}].group"),
                });
            }
            if target.source_id.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: format!("targets[{i}].source_id"),
                });
            }
            target.policy().validate(&target.group)?;
        }

        for (name, set) in [("achieved", &self.templates.achieved), ("support", &self.templates.support)] {
            if set.is_empty() {
                return Err(ConfigError::InvalidTemplate {
                    name: name.to_string(),
                    reason: "at least one non-empty template is required".to_string(),
                });
            }
        }

        let invalid = |option: &str, reason: String| ConfigError::InvalidOption {
            option: option.to_string(),
            reason,
        };
        let system = &self.system;
        if system.batch_size == 0 || system.batch_size > DEFAULT_BATCH_SIZE {
            return Err(invalid(
                "batch_size",
                format!("must be between 1 and {DEFAULT_BATCH_SIZE}"),
            ));
        }
        if system.recent_limit == 0 {
            return Err(invalid("recent_limit", "must be greater than zero".to_string()));
        }
        if system.full_scan_cap == 0 {
            return Err(invalid("full_scan_cap", "must be greater than zero".to_string()));
        }

        Ok(())
    }
}

/// Loads and validates a configuration file.
pub fn load_config(path: &Path) -> Result<WatchConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    WatchConfig::from_yaml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r##"
system:
  max_posts_per_run: 2
  number_style: grouped
targets:
  - group: "Snow Man"
    source_id: "UC1"
    account_id: MAIN
    hashtags: ["#SnowMan", "#MV"]
    exclude_keywords: ["teaser"]
    custom_vars: { fan_name: "すの担" }
    milestones:
      default_step: 1000000
      initial_target: 1000000
      rules:
        - { threshold: 100000000, step: 10000000 }
    support_triggers:
      - { distance: 10000 }
      - { distance: 100000 }
templates:
  achieved: ["{title} passed {milestone}!", "{milestone}! {hashtags}"]
  support: "{title}: {remaining} to go"
"##;

    const LEGACY: &str = r#"
targets:
  - artist_name: "Artist"
    channel_id: "UC2"
    milestones:
      step: 500000
      initial_target: 0
      dynamic_rules:
        - { threshold: 10000000, step: 1000000 }
    support_trigger:
      - { remaining: 50000 }
templates:
  achieved: "a"
  support: "s"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = WatchConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.system.max_posts_per_run, 2);
        assert_eq!(config.system.number_style, NumberStyle::Grouped);
        assert_eq!(config.system.batch_size, 50);

        let target = &config.targets[0];
        assert_eq!(target.account_id, "MAIN");
        assert_eq!(target.hashtag_line(), "#SnowMan #MV");
        assert_eq!(target.policy().support_triggers.len(), 2);
        assert_eq!(target.policy().resolve_step(150_000_000), 10_000_000);
        assert_eq!(config.templates.achieved.variants().len(), 2);
    }

    #[test]
    fn test_legacy_field_names() {
        let config = WatchConfig::from_yaml(LEGACY).unwrap();
        let target = &config.targets[0];
        assert_eq!(target.group, "Artist");
        assert_eq!(target.source_id, "UC2");
        assert_eq!(target.account_id, "DEFAULT");
        assert_eq!(target.milestones.default_step, 500_000);
        assert_eq!(target.policy().support_triggers, vec![SupportTrigger::new(50_000)]);
        assert_eq!(config.system, SystemOptions::default());
    }

    #[test]
    fn test_template_var_defaults() {
        let config = WatchConfig::from_yaml(FULL).unwrap();
        let vars = config.targets[0].template_vars();
        assert_eq!(vars["fan_name"], "すの担");
        assert_eq!(vars["oshi_mark"], "✨");
        assert_eq!(vars["cheer_msg"], "Snow Man最高！");
    }

    #[test]
    fn test_url_for() {
        let config = WatchConfig::from_yaml(LEGACY).unwrap();
        assert_eq!(
            config.targets[0].url_for(&ItemId::new("abc")),
            "https://www.youtube.com/watch?v=abc"
        );
    }

    #[test]
    fn test_filter_uses_system_duration() {
        let config = WatchConfig::from_yaml(FULL).unwrap();
        let filter = config.targets[0].filter(&config.system);
        assert!(filter.admits("New MV", 200));
        assert!(!filter.admits("MV Teaser", 200));
        assert!(!filter.admits("Short", 30));
    }

    #[test]
    fn test_rejects_unsorted_rules() {
        let yaml = FULL.replace(
            "- { threshold: 100000000, step: 10000000 }",
            "- { threshold: 1000, step: 10 }\n        - { threshold: 100000000, step: 10000000 }",
        );
        let err = WatchConfig::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy { .. }));
    }

    #[test]
    fn test_rejects_missing_targets_and_bad_options() {
        let err = WatchConfig::from_yaml("templates: { achieved: a, support: s }").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));

        let yaml = format!("{FULL}\n").replace("number_style: grouped", "batch_size: 0");
        let err = WatchConfig::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_missing_initial_target_is_rejected() {
        let yaml = FULL.replace("      initial_target: 1000000\n", "");
        assert_ne!(yaml, FULL);
        let err = WatchConfig::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("initial_target"));
    }

    #[test]
    fn test_rejects_empty_template() {
        let yaml = FULL.replace("support: \"{title}: {remaining} to go\"", "support: []");
        let err = WatchConfig::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/watch.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = WatchConfig::from_yaml("targets: [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
