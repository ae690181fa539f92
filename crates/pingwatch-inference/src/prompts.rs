//! Fixed prompt text for intent normalisation and clip analysis.

use crate::rules::RuleSet;

/// Video-mode providers are steered away from chain-of-thought output.
pub const PRIMARY_SYSTEM_PROMPT: &str = "/no_think";

pub const INTENT_NORMALIZATION_PROMPT: &str = "\
You are an assistant that converts natural-language security alert requests into strict JSON rules.
Return JSON only, with this exact shape:
{
  \"target_entities\": [\"...\"],
  \"target_actions\": [\"...\"],
  \"locations\": [\"...\"],
  \"time_constraints\": [\"...\"],
  \"ignore_conditions\": [\"...\"],
  \"sensitivity\": \"low|medium|high\"
}";

pub const SCENE_ANALYSIS_PROMPT: &str = "\
You are analyzing security camera footage.
Given a video clip and user alert rules, decide whether this clip should trigger a user alert.

Return JSON only in this schema:
{
  \"label\": \"person|animal|vehicle|motion|clear|unknown\",
  \"summary\": \"1-2 sentence summary of the clip\",
  \"confidence\": 0.0,
  \"notify\": false,
  \"reason\": \"why this should or should not alert\",
  \"matched_rules\": [\"...\"],
  \"detected_entities\": [\"...\"],
  \"detected_actions\": [\"...\"]
}
";

/// Text completion input for turning one alert request into rules.
pub fn build_intent_prompt(user_prompt: &str) -> String {
    format!("{INTENT_NORMALIZATION_PROMPT}\n\nUser alert request:\n{user_prompt}")
}

/// Scene preamble + raw user prompt + normalised rules JSON.
pub fn build_clip_analysis_prompt(user_prompt: Option<&str>, rule_set: Option<&RuleSet>) -> String {
    let mut prompt = SCENE_ANALYSIS_PROMPT.to_string();
    if let Some(user) = user_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        prompt.push_str(&format!("\nUser alert request: {user}"));
    }
    if let Some(rules) = rule_set {
        let json = serde_json::to_string(rules).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str(&format!("\nNormalized alert rules JSON: {json}"));
    }
    prompt
}
