//! Reply rendering.
//!
//! Sections always appear in this order: description, recommended steps,
//! manual annotation, regulation annotation. Absent sections are skipped and
//! present ones are separated by a blank line.

use crate::domain::finding::QueryResultRow;

pub const NO_MATCH_REPLY: &str = "No specific fault code found. Based on the information provided, I'll use my engineering experience to help diagnose the issue.";
pub const NO_QUERY_REPLY: &str = "Unable to generate a database query.";
pub const CLARIFY_REPLY: &str = "I'm not sure how to proceed. Could you please clarify?";

const STEPS_HEADER: &str = "Recommended steps:";
const MANUAL_PREFIX: &str = "\u{1f4d6} Manual: ";
const REGULATION_PREFIX: &str = "\u{26a0}\u{fe0f} Gas Safety Regulation: ";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct References<'a> {
    pub manual_link: &'a str,
    pub regulation_ref: &'a str,
}

#[derive(Clone, Debug, Default)]
pub struct ResponseFormatter;

impl ResponseFormatter {
    /// Reply for a query that returned a row.
    pub fn format_finding(&self, row: &QueryResultRow, references: References<'_>) -> String {
        let mut sections = Vec::new();
        if let Some(description) = row.description().map(str::trim).filter(|d| !d.is_empty()) {
            sections.push(description.to_string());
        }
        if !row.solutions().is_empty() {
            let steps = row
                .solutions()
                .iter()
                .map(|step| format!("- {step}"))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("{STEPS_HEADER}\n{steps}"));
        }
        push_annotations(&mut sections, references);
        sections.join("\n\n")
    }

    /// Free reasoning keeps the model's text and only gains the annotations.
    pub fn format_reasoning(&self, response: &str, references: References<'_>) -> String {
        let mut sections = Vec::new();
        if !response.is_empty() {
            sections.push(response.to_string());
        }
        push_annotations(&mut sections, references);
        sections.join("\n\n")
    }
}

fn push_annotations(sections: &mut Vec<String>, references: References<'_>) {
    if !references.manual_link.is_empty() {
        sections.push(format!("{MANUAL_PREFIX}{}", references.manual_link));
    }
    if !references.regulation_ref.is_empty() {
        sections.push(format!("{REGULATION_PREFIX}{}", references.regulation_ref));
    }
}
