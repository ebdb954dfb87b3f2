//! Prompt assembly and the fixed grounding instruction.
//!
//! Every section is always present so the model can tell "nothing was
//! retrieved" apart from "nothing was sent".

use crate::store::incidents::Incident;
use crate::store::statutes::Statute;
use crate::store::vector::Scored;

/// System instruction sent with every report request.
pub const GROUNDING_CONTRACT: &str = "\
You are Argus, an operational intelligence assistant for field police units.
Write operational reports ONLY from the data supplied in the prompt.

STRICT RULES:
- NEVER invent facts, names, dates, report numbers, statutes or circumstances.
- If the supplied data is insufficient, say so explicitly.
- Cite sources by identifier (report number or law and article) when you use them.
- Structure the report as: CONTEXT, ANALYSIS, APPLICABLE LAW, RECOMMENDATIONS.
";

pub const NO_INCIDENTS_MARKER: &str = "No similar incidents were retrieved. Do not infer any.";
pub const NO_STATUTES_MARKER: &str = "No applicable statutes were retrieved. Do not cite any.";

/// Everything the prompt is built from.
#[derive(Debug)]
pub struct PromptInput<'a> {
    pub encounter_id: i64,
    pub description: &'a str,
    pub incidents: &'a [Scored<Incident>],
    pub statutes: &'a [Scored<Statute>],
    pub instruction: Option<&'a str>,
    pub incident_excerpt_chars: usize,
    pub statute_excerpt_chars: usize,
}

/// Round a similarity to four decimals for display and reporting.
pub fn round4(x: f32) -> f64 {
    (x as f64 * 10_000.0).round() / 10_000.0
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let mut sections = vec![format!("## Encounter #{}\n{}", input.encounter_id, input.description)];

    let mut lines = vec!["## Similar Incidents".to_string()];
    if input.incidents.is_empty() {
        lines.push(NO_INCIDENTS_MARKER.to_string());
    }
    for hit in input.incidents {
        let text = hit.record.extracted_text.as_deref().unwrap_or("");
        lines.push(format!(
            "- Report {} (similarity: {:.4}): {}",
            hit.record.number,
            round4(hit.similarity),
            excerpt(text, input.incident_excerpt_chars)
        ));
    }
    sections.push(lines.join("\n"));

    let mut lines = vec!["## Applicable Statutes".to_string()];
    if input.statutes.is_empty() {
        lines.push(NO_STATUTES_MARKER.to_string());
    }
    for hit in input.statutes {
        let s = &hit.record;
        lines.push(format!(
            "- {} Art. {} ({}, similarity: {:.4}): {}",
            s.law_code,
            s.article,
            s.name.as_deref().unwrap_or("unnamed"),
            round4(hit.similarity),
            excerpt(&s.text, input.statute_excerpt_chars)
        ));
    }
    sections.push(lines.join("\n"));

    if let Some(instruction) = input.instruction.map(str::trim).filter(|i| !i.is_empty()) {
        sections.push(format!("## Additional Instruction\n{instruction}"));
    }

    sections.push(
        "## Task\nWrite a structured operational report based EXCLUSIVELY on the data above."
            .to_string(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident(number: &str, text: &str) -> Incident {
        Incident {
            id: 1,
            tenant_id: 1,
            number: number.into(),
            encounter_id: None,
            extracted_text: Some(text.into()),
            embedding: None,
            processed: true,
            active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn statute(name: Option<&str>, text: &str) -> Statute {
        Statute {
            id: 1,
            law_code: "CP".into(),
            article: "155".into(),
            name: name.map(str::to_string),
            text: text.into(),
            active: true,
            embedding: None,
        }
    }

    fn input<'a>(
        incidents: &'a [Scored<Incident>],
        statutes: &'a [Scored<Statute>],
        instruction: Option<&'a str>,
    ) -> PromptInput<'a> {
        PromptInput {
            encounter_id: 42,
            description: "Person: João",
            incidents,
            statutes,
            instruction,
            incident_excerpt_chars: 500,
            statute_excerpt_chars: 300,
        }
    }

    #[test]
    fn empty_corpora_are_marked_not_omitted() {
        let prompt = build_prompt(&input(&[], &[], None));
        assert!(prompt.starts_with("## Encounter #42\nPerson: João"));
        assert!(prompt.contains(NO_INCIDENTS_MARKER));
        assert!(prompt.contains(NO_STATUTES_MARKER));
        assert!(!prompt.contains("## Additional Instruction"));
        assert!(prompt.ends_with("based EXCLUSIVELY on the data above."));
    }

    #[test]
    fn excerpts_are_truncated_by_characters() {
        let long = "á".repeat(800);
        let incidents = [Scored { record: incident("BO-7", &long), similarity: 0.87654 }];
        let statutes = [Scored { record: statute(None, &"x".repeat(400)), similarity: 0.5 }];
        let prompt = build_prompt(&input(&incidents, &statutes, Some("  focus on vehicles ")));

        let line = prompt.lines().find(|l| l.starts_with("- Report BO-7")).unwrap();
        assert!(line.starts_with("- Report BO-7 (similarity: 0.8765): "));
        assert_eq!(line.split(": ").last().unwrap().chars().count(), 500);

        assert!(prompt.contains("- CP Art. 155 (unnamed, similarity: 0.5000): "));
        assert!(!prompt.contains(&"x".repeat(301)));
        assert!(prompt.contains("## Additional Instruction\nfocus on vehicles"));
        assert!(!prompt.contains(NO_INCIDENTS_MARKER));
    }

    #[test]
    fn round4_rounds_half_away() {
        assert_eq!(round4(0.123_456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }

    #[test]
    fn contract_names_every_rule() {
        for needle in ["NEVER invent", "insufficient", "Cite sources", "CONTEXT", "APPLICABLE LAW", "RECOMMENDATIONS"] {
            assert!(GROUNDING_CONTRACT.contains(needle), "missing {needle}");
        }
    }
}
