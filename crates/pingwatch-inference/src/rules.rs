//! Alert-intent rule sets and the per-process prompt cache.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parse::{extract_json_object, string_list};

/// Cache bound: on overflow the whole map is cleared. The cost of losing it
/// is one extra normalisation per distinct prompt.
const RULE_CACHE_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

/// Strict-JSON form of a user's free-form alert intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuleSet {
    pub target_entities: Vec<String>,
    pub target_actions: Vec<String>,
    pub locations: Vec<String>,
    pub time_constraints: Vec<String>,
    pub ignore_conditions: Vec<String>,
    pub sensitivity: Sensitivity,
}

/// Parse a normalisation reply into a rule set, coercing unknown values to
/// defaults. An unparseable reply yields the default (empty) rule set.
pub fn parse_rule_set(response_text: &str) -> RuleSet {
    let Some(data) = extract_json_object(response_text) else {
        return RuleSet::default();
    };
    let sensitivity = data
        .get("sensitivity")
        .and_then(serde_json::Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .and_then(|s| match s.as_str() {
            "low" => Some(Sensitivity::Low),
            "medium" => Some(Sensitivity::Medium),
            "high" => Some(Sensitivity::High),
            _ => None,
        })
        .unwrap_or_default();

    RuleSet {
        target_entities: string_list(data.get("target_entities")),
        target_actions: string_list(data.get("target_actions")),
        locations: string_list(data.get("locations")),
        time_constraints: string_list(data.get("time_constraints")),
        ignore_conditions: string_list(data.get("ignore_conditions")),
        sensitivity,
    }
}

/// Process-local prompt→rules cache, keyed case-insensitively.
///
/// Read-mostly; tolerates loss on restart. Behind this small interface so a
/// distributed cache could replace it without touching callers.
pub struct RuleCache {
    map: Mutex<HashMap<String, RuleSet>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn key(user_prompt: &str) -> String {
        user_prompt.trim().to_lowercase()
    }

    pub fn get(&self, user_prompt: &str) -> Option<RuleSet> {
        self.map.lock().unwrap().get(&Self::key(user_prompt)).cloned()
    }

    pub fn insert(&self, user_prompt: &str, rules: RuleSet) {
        let mut map = self.map.lock().unwrap();
        if map.len() >= RULE_CACHE_LIMIT && !map.contains_key(&Self::key(user_prompt)) {
            debug!(limit = RULE_CACHE_LIMIT, "rule cache full; clearing");
            map.clear();
        }
        map.insert(Self::key(user_prompt), rules);
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_coerces_unknown_values() {
        let rules = parse_rule_set(
            r#"{"target_entities": ["person"], "target_actions": ["loitering", 7],
                "locations": [], "sensitivity": "EXTREME"}"#,
        );
        assert_eq!(rules.target_entities, vec!["person"]);
        assert_eq!(rules.target_actions, vec!["loitering"]);
        assert_eq!(rules.sensitivity, Sensitivity::Medium);
    }

    #[test]
    fn parse_accepts_prose_wrapped_json() {
        let rules = parse_rule_set(
            "Here you go: {\"target_entities\": [\"vehicle\"], \"sensitivity\": \"high\"} done",
        );
        assert_eq!(rules.target_entities, vec!["vehicle"]);
        assert_eq!(rules.sensitivity, Sensitivity::High);
    }

    #[test]
    fn parse_garbage_yields_default() {
        assert_eq!(parse_rule_set("not json at all"), RuleSet::default());
        assert_eq!(parse_rule_set(""), RuleSet::default());
    }

    #[test]
    fn cache_key_is_trimmed_and_lowercased() {
        let cache = RuleCache::new();
        let rules = RuleSet {
            target_entities: vec!["person".into()],
            ..Default::default()
        };
        cache.insert("  Alert On People  ", rules.clone());
        assert_eq!(cache.get("alert on people"), Some(rules));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_clears_wholesale_on_overflow() {
        let cache = RuleCache::new();
        for i in 0..RULE_CACHE_LIMIT {
            cache.insert(&format!("prompt {i}"), RuleSet::default());
        }
        assert_eq!(cache.len(), RULE_CACHE_LIMIT);

        cache.insert("one more", RuleSet::default());
        // The map was cleared and now holds only the newcomer.
        assert_eq!(cache.len(), 1);
        assert!(cache.get("one more").is_some());
        assert!(cache.get("prompt 0").is_none());
    }

    #[test]
    fn reinserting_existing_key_does_not_clear() {
        let cache = RuleCache::new();
        for i in 0..RULE_CACHE_LIMIT {
            cache.insert(&format!("prompt {i}"), RuleSet::default());
        }
        cache.insert("prompt 0", RuleSet::default());
        assert_eq!(cache.len(), RULE_CACHE_LIMIT);
    }
}
