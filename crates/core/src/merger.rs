//! Result Merger: folds the outputs of one turn into a single response.

use std::fmt::Write as _;

use serde::Serialize;

use crate::domain::capability::CapabilityId;
use crate::domain::result::{CapabilityResult, EntityId, Item, Review, ReviewSummary, TableRows};

const MAX_LISTED: usize = 10;
const REVIEW_EXCERPT_CHARS: usize = 200;

/// Output of one executed request.
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutput {
    pub step: usize,
    pub capability: CapabilityId,
    pub query: Option<String>,
    pub derived_from: Vec<usize>,
    pub result: CapabilityResult,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergedSection {
    pub step: usize,
    pub capability: CapabilityId,
    pub headline: String,
    pub derived_from: Vec<usize>,
    pub result: CapabilityResult,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergedResponse {
    pub sections: Vec<MergedSection>,
    /// Result later turns refer back to.
    pub salient: Option<CapabilityResult>,
    /// Deterministic text handed to the response phraser.
    pub rendering: String,
}

impl MergedResponse {
    pub fn headlines(&self) -> Vec<&str> {
        self.sections.iter().map(|section| section.headline.as_str()).collect()
    }
}

/// Merges outputs in emission order, whatever order they completed in.
pub fn merge(mut outputs: Vec<StepOutput>) -> MergedResponse {
    outputs.sort_by_key(|output| output.step);

    let sections: Vec<MergedSection> = outputs
        .iter()
        .map(|output| MergedSection {
            step: output.step,
            capability: output.capability,
            headline: headline(output, &outputs),
            derived_from: output.derived_from.clone(),
            result: output.result.clone(),
        })
        .collect();

    let salient = salient_result(&sections);
    let rendering = render(&sections);
    MergedResponse { sections, salient, rendering }
}

/// Sections nobody else consumed. When they all hold the same kind of list the lists are
/// combined; otherwise the last one wins.
fn salient_result(sections: &[MergedSection]) -> Option<CapabilityResult> {
    let leaves: Vec<&MergedSection> = sections
        .iter()
        .filter(|section| {
            !sections.iter().any(|other| other.derived_from.contains(&section.step))
        })
        .collect();

    let (last, rest) = leaves.split_last()?;
    if rest.is_empty() {
        return Some(last.result.clone());
    }

    let mut combined = leaves[0].result.clone();
    for section in &leaves[1..] {
        if combined.concat(section.result.clone()).is_err() {
            return Some(last.result.clone());
        }
    }
    Some(combined)
}

fn headline(output: &StepOutput, outputs: &[StepOutput]) -> String {
    let origin = origin_note(output, outputs);
    match &output.result {
        CapabilityResult::ItemList(items) => {
            let mut text = format!("Found {}", plural(items.len(), "item"));
            if let Some(query) = output.query.as_deref() {
                let _ = write!(text, " for \"{query}\"");
            }
            text + &origin
        }
        CapabilityResult::ReviewList(reviews) => {
            let mut text = format!("Found {}", plural(reviews.len(), "review"));
            if let Some(label) = reviews.first().and_then(|review| label_for(&review.item_id, outputs))
            {
                let _ = write!(text, " for {label}");
            }
            text + &origin
        }
        CapabilityResult::Summary(summary) => {
            let mut text = format!("Summary of {}", plural(summary.review_count, "review"));
            if let Some(label) = summary.subject.as_ref().and_then(|id| label_for(id, outputs)) {
                let _ = write!(text, " for {label}");
            }
            text + &origin
        }
        CapabilityResult::TableRows(table) => {
            format!("Query returned {}", plural(table.rows.len(), "row")) + &origin
        }
        CapabilityResult::IdeaList(ideas) => {
            format!("Came up with {}", plural(ideas.len(), "search idea")) + &origin
        }
    }
}

fn origin_note(output: &StepOutput, outputs: &[StepOutput]) -> String {
    let sources: Vec<String> = output
        .derived_from
        .iter()
        .filter(|step| outputs.iter().any(|other| other.step == **step))
        .map(|step| format!("step {}", step + 1))
        .collect();
    if sources.is_empty() {
        String::new()
    } else {
        format!(" (using results from {})", sources.join(", "))
    }
}

fn label_for(id: &EntityId, outputs: &[StepOutput]) -> Option<String> {
    outputs.iter().find_map(|output| output.result.entity_label(id)).map(|label| format!("\"{label}\""))
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn render(sections: &[MergedSection]) -> String {
    let mut text = String::new();
    for section in sections {
        let _ = writeln!(text, "## Step {}: {}", section.step + 1, section.headline);
        match &section.result {
            CapabilityResult::ItemList(items) => render_items(&mut text, items),
            CapabilityResult::ReviewList(reviews) => render_reviews(&mut text, reviews),
            CapabilityResult::Summary(summary) => render_summary(&mut text, summary),
            CapabilityResult::TableRows(table) => render_table(&mut text, table),
            CapabilityResult::IdeaList(ideas) => {
                for (index, idea) in ideas.iter().enumerate() {
                    let _ = writeln!(text, "{}. {}", index + 1, idea.query);
                }
            }
        }
        text.push('\n');
    }
    text.trim_end().to_string()
}

fn render_items(text: &mut String, items: &[Item]) {
    for (index, item) in items.iter().take(MAX_LISTED).enumerate() {
        let _ = write!(text, "{}. {}", index + 1, item.title);
        if let Some(price) = item.price {
            let _ = write!(text, " - ${price:.2}");
        }
        if let Some(rating) = item.average_rating {
            let _ = write!(text, " - {rating:.1} stars");
        }
        if let Some(count) = item.rating_count {
            let _ = write!(text, " ({count} ratings)");
        }
        text.push('\n');
    }
    if items.len() > MAX_LISTED {
        let _ = writeln!(text, "...and {} more", items.len() - MAX_LISTED);
    }
}

fn render_reviews(text: &mut String, reviews: &[Review]) {
    for (index, review) in reviews.iter().take(MAX_LISTED).enumerate() {
        let excerpt: String = review.text.chars().take(REVIEW_EXCERPT_CHARS).collect();
        let ellipsis = if review.text.chars().count() > REVIEW_EXCERPT_CHARS { "..." } else { "" };
        let _ = writeln!(
            text,
            "{}. {:.0} stars, {} helpful votes: {} - {excerpt}{ellipsis}",
            index + 1,
            review.rating,
            review.helpful_votes,
            review.title
        );
    }
}

fn render_summary(text: &mut String, summary: &ReviewSummary) {
    if !summary.pros.is_empty() {
        let _ = writeln!(text, "Pros: {}", summary.pros.join("; "));
    }
    if !summary.cons.is_empty() {
        let _ = writeln!(text, "Cons: {}", summary.cons.join("; "));
    }
    let _ = writeln!(text, "Overall: {}", summary.overall);
}

fn render_table(text: &mut String, table: &TableRows) {
    let _ = writeln!(text, "{}", table.columns.join(" | "));
    for row in table.rows.iter().take(MAX_LISTED) {
        let cells: Vec<String> = row
            .iter()
            .map(|value| match value {
                serde_json::Value::String(inner) => inner.clone(),
                serde_json::Value::Null => "-".to_string(),
                other => other.to_string(),
            })
            .collect();
        let _ = writeln!(text, "{}", cells.join(" | "));
    }
}
