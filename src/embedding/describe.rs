//! Embedding input text for animals.
//!
//! Builds `"key: value"` segments from the populated attributes, joins them
//! and truncates to a bounded length. An animal with no usable attributes
//! yields an empty string, which the generator treats as nothing to embed.

use crate::animals::{Animal, AnimalType, NeuterStatus, Sex};

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 512;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

const SEGMENT_SEPARATOR: &str = ". ";

pub fn describe_animal(animal: &Animal) -> String {
    let animal_type = animal.animal_type.map(|t| match t {
        AnimalType::Dog => "dog",
        AnimalType::Cat => "cat",
        AnimalType::Other => "other",
    });
    let sex = animal.sex.and_then(|s| match s {
        Sex::Male => Some("male"),
        Sex::Female => Some("female"),
        Sex::Unknown => None,
    });
    let neutered = animal.neuter_status.and_then(|n| match n {
        NeuterStatus::Yes => Some("yes"),
        NeuterStatus::No => Some("no"),
        NeuterStatus::Unknown => None,
    });

    let segments = [
        ("type", animal_type),
        ("breed", animal.breed_name.as_deref()),
        ("color", animal.color.as_deref()),
        ("age", animal.age.as_deref()),
        ("sex", sex),
        ("neutered", neutered),
        ("weight", animal.weight.as_deref()),
        ("personality", animal.personality.as_deref()),
        ("special marks", animal.special_mark.as_deref()),
        ("health", animal.health_info.as_deref()),
    ];

    let content = segments
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?.trim();
            (!value.is_empty()).then(|| format!("{key}: {value}"))
        })
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR);

    truncate_content(&content)
}

/// Truncate content to MAX_CONTENT_LENGTH characters, adding ellipsis if truncated.
fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_animal_yields_empty_text() {
        let animal = Animal {
            desertion_no: "A1".into(),
            breed_name: Some("   ".into()),
            sex: Some(Sex::Unknown),
            ..Default::default()
        };
        assert_eq!(describe_animal(&animal), "");
    }

    #[test]
    fn test_segments_in_fixed_order() {
        let animal = Animal {
            desertion_no: "A1".into(),
            animal_type: Some(AnimalType::Dog),
            breed_name: Some(" maltese ".into()),
            color: Some("white".into()),
            neuter_status: Some(NeuterStatus::Yes),
            personality: Some("gentle".into()),
            ..Default::default()
        };
        assert_eq!(
            describe_animal(&animal),
            "type: dog. breed: maltese. color: white. neutered: yes. personality: gentle"
        );
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let animal = Animal {
            desertion_no: "A1".into(),
            special_mark: Some("온순함".repeat(400)),
            ..Default::default()
        };
        let text = describe_animal(&animal);
        assert_eq!(text.chars().count(), MAX_CONTENT_LENGTH);
        assert!(text.ends_with(TRUNCATION_SUFFIX));
    }
}
