//! Human-readable summary of a user's preference, written by a chat model.

use serde::{Deserialize, Serialize};

use super::aggregator::WeightMap;
use crate::{
    animals::{Animal, AnimalType, NeuterStatus},
    embedding::{ChatProvider, ProviderError},
};

const NO_PREFERENCE_HEADLINE: &str =
    "You haven't looked around enough yet for us to tell what you like.";

const SYSTEM_PROMPT: &str = r#"You help people adopt shelter animals.
From the list of animals the user has shown interest in (color, breed, animal type, age, neuter status), describe what kind of animal the user prefers.
Respond with JSON only, in exactly this shape:
{"headline": "...", "details": "..."}
headline is one sentence of the form "Looks like you love {color} {breed}!", using the most frequent color and breed combination. Join several colors with commas.
details is exactly three lines separated by "\n":
Preferred: {animal type} {one emoji} ({one or two representative breeds})
Typical age: {min}-{max} years
Neutered: {a short phrase such as "mostly neutered", "mostly not neutered" or "mixed"}
Do not add any other text, explanation, code block or backticks."#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceSummary {
    pub headline: String,
    #[serde(default)]
    pub details: String,
}

impl PreferenceSummary {
    /// Returned without calling the chat model when there is nothing to summarize.
    pub fn no_preference() -> Self {
        Self {
            headline: NO_PREFERENCE_HEADLINE.to_string(),
            details: String::new(),
        }
    }
}

/// The `n` heaviest entries, heaviest first; equal weights ordered by id.
pub fn top_weighted(weights: &WeightMap, n: usize) -> Vec<(&str, f64)> {
    let mut entries: Vec<(&str, f64)> = weights
        .iter()
        .map(|(id, weight)| (id.as_str(), *weight))
        .collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.truncate(n);
    entries
}

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// One `index | color | breed | type | age | neuter` row per animal.
pub fn user_content(animals: &[Animal]) -> String {
    let mut content = String::from(
        "Animals the user showed interest in, one per row as \
         'index | color | breed | type | age | neuter':\n\n",
    );

    for (idx, animal) in animals.iter().enumerate() {
        let animal_type = animal.animal_type.map(|t| match t {
            AnimalType::Dog => "DOG",
            AnimalType::Cat => "CAT",
            AnimalType::Other => "OTHER",
        });
        let neuter = animal.neuter_status.map(|n| match n {
            NeuterStatus::Yes => "YES",
            NeuterStatus::No => "NO",
            NeuterStatus::Unknown => "UNKNOWN",
        });

        content.push_str(&format!(
            "{} | {} | {} | {} | {} | {}\n",
            idx + 1,
            or_dash(animal.color.as_deref()),
            or_dash(animal.breed_name.as_deref()),
            or_dash(animal_type),
            or_dash(animal.age.as_deref()),
            or_dash(neuter),
        ));
    }

    content
}

fn or_dash(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => "-",
    }
}

/// Parse the model reply. Tolerates a surrounding markdown code fence.
pub fn parse_reply(content: &str) -> Result<PreferenceSummary, ProviderError> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(json).map_err(|err| {
        log::warn!("couldnt parse preference summary: {err}; content={content}");
        ProviderError::InvalidResponse(format!("unparseable preference summary: {err}"))
    })
}

/// Summarize the given animals with the chat model.
pub fn summarize(
    animals: &[Animal],
    chat: &dyn ChatProvider,
) -> Result<PreferenceSummary, ProviderError> {
    if animals.is_empty() {
        return Ok(PreferenceSummary::no_preference());
    }

    let reply = chat.complete(system_prompt(), &user_content(animals))?;
    parse_reply(&reply)
}
