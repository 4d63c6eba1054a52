//! Prompt text for every model-backed collaborator.

use std::fmt::Write as _;

use shopper_core::collaborators::ClassificationRequest;

pub const CLASSIFIER_SYSTEM: &str = "You route messages for a shopping concierge on an e-commerce site. \
Decide which capabilities answer the shopper's latest message and reply with JSON only.";

pub const SUMMARIZER_SYSTEM: &str = "You summarize product reviews for shoppers. Be factual and concise. \
Only use what the reviews say.";

pub const RESEARCHER_SYSTEM: &str = "You are a market researcher for an e-commerce site. You turn a \
shopping request into concrete product search queries in English.";

pub const SQL_SYSTEM: &str = "You are a SQLite expert. You answer questions about a product catalog by \
writing one read-only SQL query.";

pub const RESPONDER_SYSTEM: &str = "You are a shopper's concierge. Present search results politely and \
clearly so the shopper can move towards a buying decision. Never invent products or details, never \
mention internal identifiers such as ASINs, and stay on the topic of shopping.";

const CLASSIFIER_RULES: &str = r#"Rules:
- Use search_items for product discovery with filters (price, rating, rating_count, category, brand).
- Use search_reviews to find reviews, optionally filtered by rating or helpful_votes.
- Use summarize_reviews when the shopper wants a summary of what reviewers say about an item.
- Use analytical_query for counting, averaging or multi-level sorting questions.
- Use research_ideas for gift or open-ended requests, followed by a search_items step that depends on it.
- Use clarify with a question in "query" when the request is too broad to search.
- Two products in one message become two search_items steps.
- Put the entity the shopper points at ("the second one", "that sandal") in "reference".
- "depends_on" lists indexes of earlier steps whose results a step consumes.
- Set "refinement" to true when the message narrows or adjusts the previous search.
- Comparisons: lt, lte, gt, gte, eq, in, between.

Reply with a JSON object:
{"steps":[{"capability":"...","query":"...","constraints":[{"field":"...","comparison":"...","value":...}],"reference":null,"depends_on":[]}],"confidence":0.0,"refinement":false,"clarification":null}"#;

pub fn classification_prompt(request: &ClassificationRequest<'_>) -> String {
    let mut prompt = String::from("Capabilities:\n");
    for descriptor in request.registry.descriptors() {
        let fields: Vec<&str> =
            descriptor.schema.allowed_fields.iter().map(|field| field.as_str()).collect();
        let _ = write!(prompt, "- {}: {}", descriptor.id, descriptor.description);
        if !fields.is_empty() {
            let _ = write!(prompt, " Filterable fields: {}.", fields.join(", "));
        }
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(CLASSIFIER_RULES);
    prompt.push_str("\n\nConversation so far:\n");

    let context = &request.context;
    if context.recent_turns.is_empty() {
        prompt.push_str("(new conversation)\n");
    }
    for turn in &context.recent_turns {
        let _ = writeln!(prompt, "{turn}");
    }
    if let Some(kind) = &context.last_result_kind {
        let _ = writeln!(prompt, "Last result ({kind}):");
        for (position, label) in &context.entities {
            let _ = writeln!(prompt, "  {position}. {label}");
        }
    }
    if let Some(capability) = &context.active_capability {
        let _ = write!(prompt, "Active search: {capability}");
        if let Some(query) = &context.active_query {
            let _ = write!(prompt, " for \"{query}\"");
        }
        if !context.active_filters.is_empty() {
            let _ = write!(prompt, " with {}", context.active_filters.join("; "));
        }
        prompt.push('\n');
    }

    let _ = write!(prompt, "\nShopper: {}", request.text.trim());
    prompt
}

pub fn summary_prompt(review_texts: &[String]) -> String {
    let mut prompt = format!(
        "Here are {} customer reviews for one product.\n\
         Summarize them, highlighting:\n\
         1. Common positive aspects (pros).\n\
         2. Common negative aspects (cons).\n\
         3. An overall sentiment that starts with \"Based on {} reviews\".\n\n\
         Reply with JSON: {{\"pros\":[\"...\"],\"cons\":[\"...\"],\"overall\":\"...\"}}\n\nReviews:\n",
        review_texts.len(),
        review_texts.len()
    );
    for (index, text) in review_texts.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", index + 1, text.trim());
    }
    prompt
}

pub fn research_prompt(intent: &str, count: usize) -> String {
    format!(
        "Shopping request: {}\n\n\
         Generate {count} distinct product search queries that would find good options for this \
         request. Reply with a JSON array of strings only.",
        intent.trim()
    )
}

pub fn sql_prompt(question: &str, schema: &str, row_limit: u32) -> String {
    format!(
        "Tables, columns and sample rows:\n{schema}\n\n\
         Write one SQLite SELECT statement that answers the question. When products are \
         returned, select parent_asin, title, price, average_rating, rating_number and \
         main_category. Limit the result to {row_limit} rows unless the question asks for a \
         single aggregate. Reply with the SQL only.\n\nQuestion: {}",
        question.trim()
    )
}

pub fn response_prompt(user_text: &str, rendering: &str) -> String {
    format!(
        "The shopper said: {}\n\nResults gathered for this turn:\n{rendering}\n\n\
         Write the reply to the shopper. Keep every product that appears above, with its title, \
         price and rating where known.",
        user_text.trim()
    )
}
