//! System prompts and response schemas for every LLM call in the pipeline.
//!
//! Each stage uses a fixed system prompt and puts everything variable in
//! the user message, so a provider (or a test double) can tell the stages
//! apart by the system prompt alone.

use serde_json::{Value, json};

use pursuit_core::retrieval::RetrievalCandidate;

pub const PLANNER_SYSTEM: &str = "You decompose health-plan policy questions into independent sub-questions. \
Each sub-question must be answerable on its own and keep every detail it depends on \
(income, household size, conditions, state, plan). Do not answer the question. \
For each sub-question declare the capability it needs: \"retrieval\" for anything a published \
policy or provider manual would answer, \"web_search\" only when the user explicitly asks to \
search the web, \"page_fetch\" only when the user gives a URL, \"reasoning\" for definitions or \
arithmetic that need no source. Set kind to \"patient_restricted\" when the sub-question names a \
specific patient or member. Set objective_ref to the id of an open item when the sub-question \
pursues it again. Respond with JSON only.";

pub const GROUNDED_SYSTEM: &str = "You answer health-plan policy questions using only the numbered evidence. \
Cite evidence as [n]. If the evidence does not answer the question, say exactly what is missing. \
Be concise and never invent requirements, amounts or dates.";

pub const TOOL_SYSTEM: &str = "You answer a question from web material fetched for it. \
Use only that material, cite sources by their number or URL, and say when the material does not answer the question.";

pub const REASONING_SYSTEM: &str = "You answer general questions about health coverage concepts. \
No documents are available for this question: answer from general knowledge, keep it short, and state \
that the answer is not drawn from a published policy document.";

pub const INTEGRATOR_SYSTEM: &str = "You combine answers to the parts of one user question into a single reply. \
Keep every fact and citation marker from the part answers, do not add new facts, and keep the reply short.";

/// JSON schema for the decomposition response.
pub fn plan_schema(max_sub_questions: usize) -> Value {
    json!({
        "type": "object",
        "properties": {
            "sub_questions": {
                "type": "array",
                "minItems": 1,
                "maxItems": max_sub_questions,
                "items": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "kind": { "type": "string", "enum": ["generic", "patient_restricted", "tool"] },
                        "capability": { "type": "string", "enum": ["retrieval", "web_search", "page_fetch", "reasoning"] },
                        "fallback": { "type": "string", "enum": ["none", "try_tool", "try_reasoning"] },
                        "objective_ref": { "type": ["string", "null"] }
                    },
                    "required": ["text"]
                }
            }
        },
        "required": ["sub_questions"]
    })
}

/// User message for the planner.
pub fn planner_input(
    message: &str,
    previous_query: Option<&str>,
    open_items: &[(String, String)],
    max_sub_questions: usize,
) -> String {
    let mut input = format!("Question: {message}\n\nUse at most {max_sub_questions} sub-questions.");
    if let Some(previous) = previous_query {
        input.push_str(&format!("\n\nThe previous question in this conversation was: {previous}"));
    }
    if !open_items.is_empty() {
        input.push_str("\n\nOpen items from earlier in this conversation:");
        for (id, text) in open_items {
            input.push_str(&format!("\n- {id}: {text}"));
        }
    }
    input
}

/// Numbered evidence block for the grounded answer prompt.
pub fn evidence_input(question: &str, candidates: &[RetrievalCandidate]) -> String {
    let evidence = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let label = if c.citation.is_empty() { c.parent_id.as_str() } else { c.citation.as_str() };
            format!("[{}] ({label}) {}", i + 1, c.text)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("Question: {question}\n\nEvidence:\n{evidence}")
}

pub fn tool_input(question: &str, material: &str) -> String {
    format!("Question: {question}\n\nMaterial:\n{material}")
}

pub fn integrator_input(message: &str, parts: &[(String, String)]) -> String {
    let parts = parts
        .iter()
        .map(|(question, answer)| format!("Part: {question}\nAnswer: {answer}"))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("User question: {message}\n\n{parts}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pursuit_core::retrieval::Channel;

    #[test]
    fn schema_bounds_sub_questions() {
        let schema = plan_schema(3);
        assert_eq!(schema["properties"]["sub_questions"]["maxItems"], 3);
        assert_eq!(schema["required"][0], "sub_questions");
    }

    #[test]
    fn planner_input_lists_open_items() {
        let input = planner_input(
            "and the asset limit?",
            Some("Florida Medicaid income limit"),
            &[("so2".into(), "What is the asset limit?".into())],
            5,
        );
        assert!(input.contains("Florida Medicaid income limit"));
        assert!(input.contains("- so2: What is the asset limit?"));
    }

    #[test]
    fn evidence_is_numbered() {
        let candidate = RetrievalCandidate {
            parent_id: "p1".into(),
            raw_score: 3.0,
            confidence: 0.8,
            channel: Channel::Sparse,
            provenance: "p1#s0".into(),
            citation: "Provider Manual 4.2".into(),
            url: None,
            text: "Rides must be booked 48 hours ahead.".into(),
            published_at: None,
        };
        let input = evidence_input("When to book rides?", &[candidate]);
        assert!(input.contains("[1] (Provider Manual 4.2) Rides must be booked 48 hours ahead."));
    }
}
