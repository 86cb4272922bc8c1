//! Prescription prompt assembly.
//!
//! Turns the retrieved herbs, the user's symptom, their constitution, and a
//! few prior diagnoses into the system instruction and user turn sent to the
//! generation model.

use crate::models::{Constitution, DiagnosisRecord, HerbRecord, IndexMatch};

/// A fully assembled request for the generation model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Inputs to [`build_prescription_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub symptom: &'a str,
    pub constitution: Option<Constitution>,
    /// Output of [`format_herb_context`]; may be empty.
    pub herb_list: &'a str,
    pub history: &'a [DiagnosisRecord],
}

const USER_TURN: &str = "Please write my prescription.";

fn or_none(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("None")
}

/// Render one herb as an indented block.
pub fn format_herb(herb: &HerbRecord, default_category: &str) -> String {
    format!(
        "- Herb: {}\n  Category: {}\n  Efficacy: {}\n  Caution: {}",
        or_none(&herb.name),
        herb.category.as_deref().unwrap_or(default_category),
        or_none(&herb.efficacy),
        or_none(&herb.caution),
    )
}

/// Render all matches, separated by blank lines. Empty when there are none.
pub fn format_herb_context(matches: &[IndexMatch], default_category: &str) -> String {
    matches
        .iter()
        .map(|m| format_herb(&m.herb, default_category))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prescription_prompt(input: PromptInput<'_>) -> Prompt {
    let constitution = input
        .constitution
        .map(|c| format!("{} ({})", c.label(), c.description()))
        .unwrap_or_else(|| "not provided".to_string());

    let herbs = if input.herb_list.trim().is_empty() {
        "(no candidate herbs were found for this symptom; say so and give only general advice)"
    } else {
        input.herb_list
    };

    let mut system = format!(
        "You are an integrative medicine specialist with twenty years of experience.\n\
         Taking the patient's constitution into account, choose the best prescription \
         from the retrieved herb candidates.\n\
         \n\
         [Situation]\n\
         - Patient constitution: {constitution} (very important)\n\
         - Reported symptom: {symptom}\n\
         \n\
         [Retrieved herb candidates]\n\
         {herbs}\n",
        constitution = constitution,
        symptom = input.symptom,
        herbs = herbs,
    );

    if !input.history.is_empty() {
        system.push_str("\n[Previous consultations]\n");
        for rec in input.history {
            system.push_str(&format!(
                "- {}: {} -> {}\n",
                rec.recorded_at, rec.symptom, rec.summary
            ));
        }
    }

    system.push_str(
        "\n[Prescription guide]\n\
         1. From the retrieved herbs, pick two or three that treat the symptom without \
         harming this constitution.\n\
         2. If a retrieved herb does not suit this constitution, warn about it plainly.\n\
         3. If pharmacy, traditional Korean, and Ayurvedic remedies are mixed, combine \
         them sensibly.\n\
         4. Be trustworthy and warm.\n",
    );

    Prompt {
        system,
        user: USER_TURN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn herb_match(name: &str, category: Option<&str>) -> IndexMatch {
        IndexMatch {
            id: name.to_lowercase(),
            score: 0.8,
            herb: HerbRecord {
                name: Some(name.to_string()),
                category: category.map(str::to_string),
                efficacy: Some("Settles the stomach".to_string()),
                caution: None,
            },
        }
    }

    #[test]
    fn test_format_herb_defaults() {
        let text = format_herb(&herb_match("Ginger", None).herb, "general");
        assert!(text.starts_with("- Herb: Ginger"));
        assert!(text.contains("Category: general"));
        assert!(text.contains("Caution: None"));
    }

    #[test]
    fn test_context_joins_with_blank_line() {
        let ctx = format_herb_context(
            &[herb_match("Ginger", Some("warming")), herb_match("Mint", None)],
            "general",
        );
        assert_eq!(ctx.matches("\n\n").count(), 1);
        assert!(ctx.contains("Category: warming"));
        assert_eq!(format_herb_context(&[], "general"), "");
    }

    #[test]
    fn test_prompt_interpolates_inputs() {
        let herbs = format_herb_context(&[herb_match("Ginger", None)], "general");
        let prompt = build_prescription_prompt(PromptInput {
            symptom: "cold hands and indigestion",
            constitution: Some(Constitution::Soeumin),
            herb_list: &herbs,
            history: &[],
        });
        assert!(prompt.system.contains("소음인"));
        assert!(prompt.system.contains("cold hands and indigestion"));
        assert!(prompt.system.contains("- Herb: Ginger"));
        assert!(!prompt.system.contains("[Previous consultations]"));
        assert_eq!(prompt.user, USER_TURN);
    }

    #[test]
    fn test_prompt_without_candidates_or_constitution() {
        let prompt = build_prescription_prompt(PromptInput {
            symptom: "insomnia",
            constitution: None,
            herb_list: "",
            history: &[],
        });
        assert!(prompt.system.contains("not provided"));
        assert!(prompt.system.contains("no candidate herbs"));
    }

    #[test]
    fn test_prompt_includes_history() {
        let history = vec![DiagnosisRecord {
            recorded_at: "2026-01-02 09:00:00".into(),
            user_id: "lee".into(),
            symptom: "headache".into(),
            label: "AI diagnosis complete".into(),
            summary: "Try chrysanthemum tea".into(),
        }];
        let prompt = build_prescription_prompt(PromptInput {
            symptom: "headache again",
            constitution: Some(Constitution::Taeeumin),
            herb_list: "- Herb: Mint",
            history: &history,
        });
        assert!(prompt.system.contains("[Previous consultations]"));
        assert!(prompt.system.contains("headache -> Try chrysanthemum tea"));
    }
}
