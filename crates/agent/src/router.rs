//! Blueprint Router: one routing decision per sub-question.
//!
//! Rule order is fixed:
//! 1. patient identifiers are refused, whatever the planner declared;
//! 2. lexical cues (embedded URL, explicit search phrase, capability
//!    question) force a tool strategy;
//! 3. otherwise the declared capability picks the strategy.
//!
//! Cues are read from the sub-question text and again from the raw
//! message. A URL or search instruction the planner rewrote away still
//! forces the tool strategy, on the first sub-question that is not refused.
//!
//! Anaphoric or underspecified follow-ups are rewritten against the
//! previous turn's refined query and jurisdiction before they reach the
//! resolver.

use tracing::debug;

use pursuit_core::blueprint::{Blueprint, BlueprintEntry, RoutingRule, Strategy, ToolKind};
use pursuit_core::plan::{CapabilityNeed, FallbackRule, Plan, SubQuestion, SubQuestionKind};
use pursuit_core::thread::ContinuityContext;

use crate::cues::{self, MessageCues};
use crate::jurisdiction::{self, Jurisdiction};
use crate::phi;

/// Route every sub-question of `plan`, in plan order.
pub fn route(plan: &Plan, context: &ContinuityContext, message: &MessageCues) -> Blueprint {
    let mut blueprint: Blueprint = plan.sub_questions.iter().map(|sq| route_one(sq, context)).collect();

    let kept = |rule| blueprint.iter().any(|e: &BlueprintEntry| e.rule == rule);
    let forced = match &message.url {
        Some(url) if !kept(RoutingRule::EmbeddedUrl) => Some((ToolKind::PageFetch, Some(url.clone()))),
        None if message.search && !kept(RoutingRule::SearchPhrase) => Some((ToolKind::WebSearch, None)),
        _ => None,
    };

    if let Some((tool, url)) = forced
        && let Some(i) = blueprint.iter().position(|e| e.strategy != Strategy::Refusal)
    {
        let sq = &plan.sub_questions[i];
        debug!(sub_question = %sq.id, tool = tool.tool_name(), "Message cue lost in planning, forcing tool");
        let entry = &mut blueprint[i];
        entry.strategy = Strategy::Tool(tool);
        entry.filter_tags.clear();
        entry.fallback = tool_fallback(sq.fallback);
        match url {
            Some(url) => {
                entry.query = url;
                entry.rule = RoutingRule::EmbeddedUrl;
                entry.merged = false;
            }
            None => entry.rule = RoutingRule::SearchPhrase,
        }
    }
    blueprint
}

fn tool_fallback(declared: FallbackRule) -> FallbackRule {
    match declared {
        FallbackRule::None => FallbackRule::None,
        _ => FallbackRule::TryReasoning,
    }
}

pub fn route_one(sq: &SubQuestion, context: &ContinuityContext) -> BlueprintEntry {
    let entry = |strategy, query: String, filter_tags, fallback, rule, merged| BlueprintEntry {
        sub_question_id: sq.id.clone(),
        question: sq.text.clone(),
        strategy,
        query,
        filter_tags,
        fallback,
        rule,
        merged,
    };

    if sq.kind == SubQuestionKind::PatientRestricted || phi::contains_patient_identifier(&sq.text) {
        debug!(sub_question = %sq.id, "Patient identifier, refusing");
        return entry(
            Strategy::Refusal,
            String::new(),
            Vec::new(),
            FallbackRule::None,
            RoutingRule::PatientIdentifier,
            false,
        );
    }

    let tool_fallback = tool_fallback(sq.fallback);

    if let Some(url) = cues::first_url(&sq.text) {
        return entry(
            Strategy::Tool(ToolKind::PageFetch),
            url,
            Vec::new(),
            tool_fallback,
            RoutingRule::EmbeddedUrl,
            false,
        );
    }

    if cues::has_search_phrase(&sq.text) {
        let (query, merged) = rewrite(&cues::strip_search_phrase(&sq.text), context);
        return entry(
            Strategy::Tool(ToolKind::WebSearch),
            query,
            Vec::new(),
            tool_fallback,
            RoutingRule::SearchPhrase,
            merged,
        );
    }

    if cues::is_capability_question(&sq.text) {
        return entry(
            Strategy::Tool(ToolKind::Capabilities),
            sq.text.clone(),
            Vec::new(),
            FallbackRule::None,
            RoutingRule::CapabilityQuestion,
            false,
        );
    }

    let strategy = match (sq.capability, sq.kind) {
        (CapabilityNeed::WebSearch, _) | (CapabilityNeed::Retrieval, SubQuestionKind::Tool) => {
            Strategy::Tool(ToolKind::WebSearch)
        }
        // A fetch needs a URL; without one the closest tool is a search
        (CapabilityNeed::PageFetch, _) => Strategy::Tool(ToolKind::WebSearch),
        (CapabilityNeed::Reasoning, _) => Strategy::Reasoning,
        (CapabilityNeed::Retrieval, _) => Strategy::Retrieval,
    };
    let fallback = match strategy {
        Strategy::Tool(_) => tool_fallback,
        Strategy::Reasoning => FallbackRule::None,
        _ => sq.fallback,
    };

    let (query, merged) = rewrite(&sq.text, context);
    let filter_tags = match strategy {
        Strategy::Retrieval => Jurisdiction::extract(&query).filter_tags(),
        _ => Vec::new(),
    };
    entry(strategy, query, filter_tags, fallback, RoutingRule::Declared, merged)
}

/// Merge an anaphoric or underspecified follow-up with the previous turn's
/// refined query and jurisdiction. Returns the text and whether it merged.
pub fn rewrite(text: &str, context: &ContinuityContext) -> (String, bool) {
    let text = text.trim();
    let needs_context = cues::is_anaphoric(text) || cues::is_underspecified(text);
    if !context.is_followup || !needs_context {
        return (text.to_string(), false);
    }
    let Some(base) = context.last_refined_query.as_deref().filter(|q| !q.trim().is_empty()) else {
        return (text.to_string(), false);
    };

    let current = Jurisdiction::extract(text);
    let previous = context
        .jurisdiction_summary
        .as_deref()
        .map(Jurisdiction::extract)
        .unwrap_or_default()
        .overlay(&Jurisdiction::extract(base));

    // Names the new message replaces drop out of the old query
    let replaced = Jurisdiction {
        states: if current.states.is_empty() { vec![] } else { previous.states.clone() },
        payers: if current.payers.is_empty() { vec![] } else { previous.payers.clone() },
        programs: if current.programs.is_empty() { vec![] } else { previous.programs.clone() },
    };
    let base = jurisdiction::strip_names(base, &replaced);

    let residual = cues::strip_continuation(text);
    let residual = if cues::content_words(&residual).is_empty() { String::new() } else { residual };

    let mut merged = base.trim().to_string();
    if !residual.is_empty() && !merged.to_lowercase().contains(&residual.to_lowercase()) {
        merged.push(' ');
        merged.push_str(&residual);
    }
    if let Some(summary) = previous.overlay(&current).summary() {
        let carried = Jurisdiction::extract(&merged);
        let missing = previous.overlay(&current);
        let has_all = missing.states.iter().all(|s| carried.states.contains(s))
            && missing.payers.iter().all(|p| carried.payers.contains(p))
            && missing.programs.iter().all(|p| carried.programs.contains(p));
        if !has_all {
            merged.push_str(&format!(" ({summary})"));
        }
    }

    debug!(original = %text, merged = %merged, "Merged follow-up with previous query");
    (merged, true)
}

/// The jurisdiction a routed blueprint settles on, overlaid on the
/// previous one.
pub fn settled_jurisdiction(blueprint: &Blueprint, context: &ContinuityContext) -> Option<String> {
    let previous = context
        .jurisdiction_summary
        .as_deref()
        .map(Jurisdiction::extract)
        .unwrap_or_default();
    let current = blueprint
        .iter()
        .filter(|e| e.strategy != Strategy::Refusal)
        .map(|e| Jurisdiction::extract(&e.query))
        .fold(Jurisdiction::default(), |acc, j| acc.overlay(&j));
    previous.overlay(&current).summary()
}

/// The query a later follow-up should build on: the first routed entry
/// that searched for evidence.
pub fn primary_query(blueprint: &Blueprint) -> Option<String> {
    blueprint
        .iter()
        .find(|e| matches!(e.strategy, Strategy::Retrieval | Strategy::Tool(ToolKind::WebSearch) | Strategy::Reasoning))
        .map(|e| e.query.clone())
        .filter(|q| !q.is_empty())
}
