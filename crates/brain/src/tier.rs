use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Cost/capability bucket for a reasoning call. `None` skips the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    None,
    Cheap,
    Balanced,
    Premium,
    Frontier,
}

impl ModelTier {
    pub const ALL: [ModelTier; 5] = [
        ModelTier::None,
        ModelTier::Cheap,
        ModelTier::Balanced,
        ModelTier::Premium,
        ModelTier::Frontier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::None => "none",
            ModelTier::Cheap => "cheap",
            ModelTier::Balanced => "balanced",
            ModelTier::Premium => "premium",
            ModelTier::Frontier => "frontier",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelTier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown model tier '{s}'"))
    }
}

const TIER_TABLE: &[(&str, ModelTier)] = &[
    ("classification", ModelTier::Cheap),
    ("parsing", ModelTier::Cheap),
    ("summarization", ModelTier::Cheap),
    ("extraction", ModelTier::Cheap),
    ("freeform-ask", ModelTier::Cheap),
    ("chat", ModelTier::Cheap),
    ("analysis", ModelTier::Balanced),
    ("research", ModelTier::Balanced),
    ("code-review", ModelTier::Balanced),
    ("writing", ModelTier::Balanced),
    ("architecture", ModelTier::Premium),
    ("multi-step-planning", ModelTier::Premium),
    ("debugging", ModelTier::Premium),
    ("security-audit", ModelTier::Frontier),
    ("critical-decision", ModelTier::Frontier),
    ("shell-command", ModelTier::None),
    ("container-command", ModelTier::None),
    ("file-operation", ModelTier::None),
    ("status-check", ModelTier::None),
    ("log-query", ModelTier::None),
    ("schedule-request", ModelTier::None),
    ("job-cancel", ModelTier::None),
];

/// Static tier lookup by intent kind. Unknown kinds are `Cheap`.
pub fn select_tier(intent_kind: &str) -> ModelTier {
    let kind = intent_kind.trim();
    TIER_TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(kind))
        .map(|(_, tier)| *tier)
        .unwrap_or(ModelTier::Cheap)
}

/// Tier to concrete model identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierModels {
    models: HashMap<ModelTier, String>,
}

impl Default for TierModels {
    fn default() -> Self {
        let models = HashMap::from([
            (ModelTier::Cheap, "gpt-4o-mini".to_string()),
            (ModelTier::Balanced, "gpt-4o".to_string()),
            (ModelTier::Premium, "o3".to_string()),
            (ModelTier::Frontier, "o3-pro".to_string()),
        ]);
        Self { models }
    }
}

impl TierModels {
    pub fn with_override(mut self, tier: ModelTier, model: impl Into<String>) -> Self {
        self.set(tier, model);
        self
    }

    pub fn set(&mut self, tier: ModelTier, model: impl Into<String>) {
        if tier != ModelTier::None {
            self.models.insert(tier, model.into());
        }
    }

    /// Apply `tier name -> model` overrides; unknown tier names are returned.
    pub fn apply_overrides<'a>(
        &mut self,
        overrides: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Vec<String> {
        let mut rejected = Vec::new();
        for (name, model) in overrides {
            match name.parse::<ModelTier>() {
                Ok(tier) if tier != ModelTier::None => self.set(tier, model.clone()),
                _ => rejected.push(name.clone()),
            }
        }
        rejected
    }

    pub fn model_for(&self, tier: ModelTier) -> Option<&str> {
        self.models.get(&tier).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookups() {
        assert_eq!(select_tier("classification"), ModelTier::Cheap);
        assert_eq!(select_tier("code-review"), ModelTier::Balanced);
        assert_eq!(select_tier("multi-step-planning"), ModelTier::Premium);
        assert_eq!(select_tier("security-audit"), ModelTier::Frontier);
        assert_eq!(select_tier("shell-command"), ModelTier::None);
    }

    #[test]
    fn unknown_kinds_default_to_cheap_and_case_is_ignored() {
        assert_eq!(select_tier("interpretive-dance"), ModelTier::Cheap);
        assert_eq!(select_tier(""), ModelTier::Cheap);
        assert_eq!(select_tier("  Analysis "), ModelTier::Balanced);
        assert_eq!(select_tier("ARCHITECTURE"), ModelTier::Premium);
    }

    #[test]
    fn overrides_replace_single_tiers() {
        let mut models = TierModels::default();
        let overrides = HashMap::from([
            ("premium".to_string(), "local-70b".to_string()),
            ("none".to_string(), "ignored".to_string()),
            ("gold".to_string(), "ignored".to_string()),
        ]);
        let mut rejected = models.apply_overrides(&overrides);
        rejected.sort();

        assert_eq!(rejected, vec!["gold".to_string(), "none".to_string()]);
        assert_eq!(models.model_for(ModelTier::Premium), Some("local-70b"));
        assert_eq!(models.model_for(ModelTier::Cheap), Some("gpt-4o-mini"));
        assert_eq!(models.model_for(ModelTier::None), None);
    }

    #[test]
    fn tier_names_parse() {
        assert_eq!("Balanced".parse::<ModelTier>(), Ok(ModelTier::Balanced));
        assert!("gold".parse::<ModelTier>().is_err());
    }
}
