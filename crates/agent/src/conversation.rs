//! Keyword-driven intent classification. Needs no model, so it backs offline runs
//! against the demo catalog and serves as the default classifier.

use async_trait::async_trait;
use shopper_core::collaborators::{
    Classification, ClassificationRequest, ClassifiedStep, ConversationDigest, IntentClassifier,
};
use shopper_core::domain::capability::CapabilityId;
use shopper_core::errors::CollaboratorError;
use shopper_core::filters::{RawConstraint, RawValue};
use tracing::debug;

const GREETING_WORDS: &[&str] = &[
    "hi", "hello", "hey", "hiya", "thanks", "thank", "you", "there", "good", "morning",
    "afternoon", "evening", "ok", "okay", "cool",
];
const ANALYTICAL_PHRASES: &[&str] = &[
    "how many",
    "average",
    "number of",
    "count of",
    "most reviewed",
    "most reviews",
    "most ratings",
    "highest average",
    "lowest average",
    "percentage",
    "median",
    "which category",
    "which brand",
    "total number",
];
const SUMMARY_PHRASES: &[&str] = &[
    "summarize",
    "summarise",
    "summary",
    "sum up",
    "pros and cons",
    "what do people say",
    "what are people saying",
    "what do reviewers",
    "what do customers",
    "what do buyers",
];
const REVIEW_WORDS: &[&str] =
    &["review", "reviews", "reviewers", "complaints", "complaint", "feedback", "testimonials"];
const IDEA_WORDS: &[&str] = &[
    "gift", "gifts", "present", "presents", "ideas", "idea", "inspiration", "birthday",
    "christmas", "anniversary",
];
const IDEA_PHRASES: &[&str] = &["what should i get", "what to get", "what to buy"];
const SEARCH_WORDS: &[&str] =
    &["find", "show", "search", "looking", "want", "need", "buy", "shopping", "recommend"];

const NEGATIVE_WORDS: &[&str] =
    &["negative", "bad", "critical", "complaints", "complaint", "worst", "poor", "unhappy"];
const POSITIVE_WORDS: &[&str] = &["positive", "good", "glowing", "great", "favorable", "happy"];
const WELL_RATED: &[&[&str]] = &[
    &["highly", "rated"],
    &["well", "rated"],
    &["top", "rated"],
    &["best", "rated"],
    &["highly-rated"],
    &["well-rated"],
    &["top-rated"],
    &["best-rated"],
    &["well", "reviewed"],
    &["well-reviewed"],
];

const LEADING_COMPARISONS: &[(&[&str], &str)] = &[
    (&["no", "more", "than"], "lte"),
    (&["no", "less", "than"], "gte"),
    (&["less", "than"], "lt"),
    (&["cheaper", "than"], "lt"),
    (&["lower", "than"], "lt"),
    (&["more", "than"], "gt"),
    (&["greater", "than"], "gt"),
    (&["higher", "than"], "gt"),
    (&["at", "most"], "lte"),
    (&["at", "least"], "gte"),
    (&["up", "to"], "lte"),
    (&["under"], "lt"),
    (&["below"], "lt"),
    (&["over"], "gt"),
    (&["above"], "gt"),
    (&["max"], "lte"),
    (&["maximum"], "lte"),
    (&["within"], "lte"),
    (&["budget"], "lte"),
    (&["min"], "gte"),
    (&["minimum"], "gte"),
    (&["exactly"], "eq"),
];
const TRAILING_COMPARISONS: &[(&[&str], &str)] = &[
    (&["or", "more"], "gte"),
    (&["or", "higher"], "gte"),
    (&["or", "better"], "gte"),
    (&["or", "above"], "gte"),
    (&["and", "up"], "gte"),
    (&["and", "above"], "gte"),
    (&["plus"], "gte"),
    (&["or", "less"], "lte"),
    (&["or", "lower"], "lte"),
    (&["or", "under"], "lte"),
    (&["or", "below"], "lte"),
    (&["or", "fewer"], "lte"),
];

/// Catalog category for a product noun, matched on the singular form.
const PRODUCT_CATEGORIES: &[(&str, &str)] = &[
    ("swimsuit", "Swimwear"),
    ("swimwear", "Swimwear"),
    ("bikini", "Swimwear"),
    ("tankini", "Swimwear"),
    ("trunk", "Swimwear"),
    ("boardshort", "Swimwear"),
    ("sandal", "Shoes"),
    ("shoe", "Shoes"),
    ("sneaker", "Shoes"),
    ("boot", "Shoes"),
    ("slipper", "Shoes"),
    ("flip-flop", "Shoes"),
    ("heel", "Shoes"),
    ("towel", "Home"),
];

const ORDINALS: &[&str] =
    &["first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth"];

/// Words that never name a product.
const PHRASE_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "some", "any", "me", "i", "i'm", "im", "we", "my", "our", "you", "your",
    "please", "can", "could", "would", "like", "to", "for", "with", "of", "in", "on", "at",
    "that", "this", "these", "those", "them", "it", "its", "is", "are", "be", "do", "does",
    "one", "ones", "only", "just", "also", "instead", "but", "each", "both", "and", "or", "what",
    "which", "about", "say", "people", "show", "find", "search", "looking", "look", "want",
    "need", "buy", "get", "shopping", "recommend", "items", "item", "products", "product",
    "something", "stuff", "then", "now", "let's", "lets", "see", "reviews", "review",
    "reviewers", "summarize", "summarise", "summary", "sum", "up", "pros", "cons", "customers",
    "buyers", "think", "saying", "feedback", "complaints", "complaint", "testimonials", "star",
    "stars", "rated", "cheap", "cheaper", "under", "below", "over", "above", "than", "less",
    "more", "at", "least", "most", "price", "priced", "cost", "costs", "dollars", "bucks",
    "options", "option", "there", "have", "has", "from", "by", "all",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Intent {
    Analytical,
    Summarize,
    Reviews,
    Ideas,
    Search,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Items,
    Reviews,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Quantity {
    Price,
    Stars,
    ReviewCount,
    Votes,
}

/// Rule-based [`IntentClassifier`]: cue words pick the capability, number patterns
/// become constraints, ordinals become references.
#[derive(Clone, Debug, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str, context: &ConversationDigest) -> Classification {
        let original = tokenize(text);
        let tokens: Vec<String> = original.iter().map(|token| token.to_ascii_lowercase()).collect();
        let lowered = tokens.join(" ");

        if tokens.iter().all(|token| GREETING_WORDS.contains(&token.as_str())) {
            return Classification {
                clarification: Some("Hi! What are you shopping for today?".to_string()),
                ..Classification::default()
            };
        }

        let (intent, has_cue) = detect_intent(&lowered, &tokens);
        if intent == Intent::Analytical {
            return finish(
                vec![ClassifiedStep::new(CapabilityId::AnalyticalQuery.as_str()).query(text.trim())],
                confidence_score(has_cue, true, false, false),
                false,
                None,
            );
        }

        let mode = if intent == Intent::Reviews { Mode::Reviews } else { Mode::Items };
        let mut consumed = vec![false; tokens.len()];
        let reference = find_reference(&tokens, &mut consumed);
        let constraints = extract_constraints(&tokens, &original, mode, &mut consumed);
        let split = tokens.iter().any(|token| matches!(token.as_str(), "each" | "both"));
        let groups = product_groups(&tokens, &consumed, split);
        let phrase = groups.join(" ");
        let has_constraints = !constraints.is_empty();

        match intent {
            Intent::Ideas => {
                let mut follow_up = ClassifiedStep::new(CapabilityId::SearchItems.as_str()).after(0);
                follow_up.constraints = constraints;
                finish(
                    vec![
                        ClassifiedStep::new(CapabilityId::ResearchIdeas.as_str()).query(text.trim()),
                        follow_up,
                    ],
                    confidence_score(has_cue, true, has_constraints, false),
                    false,
                    None,
                )
            }
            Intent::Summarize => {
                let mention = reference.or_else(|| matching_label(&phrase, context));
                let has_subject =
                    mention.is_some() || !phrase.is_empty() || !context.entities.is_empty();
                let steps = match mention {
                    Some(mention) => vec![
                        ClassifiedStep::new(CapabilityId::SummarizeReviews.as_str()).reference(mention),
                    ],
                    None if !phrase.is_empty() => {
                        let mut search =
                            ClassifiedStep::new(CapabilityId::SearchItems.as_str()).query(phrase.clone());
                        search.constraints = with_group_category(&constraints, &phrase);
                        vec![search, ClassifiedStep::new(CapabilityId::SummarizeReviews.as_str()).after(0)]
                    }
                    None => vec![ClassifiedStep::new(CapabilityId::SummarizeReviews.as_str())],
                };
                finish(
                    steps,
                    confidence_score(has_cue, has_subject, has_constraints, false),
                    false,
                    Some("Which product's reviews should I summarize?"),
                )
            }
            Intent::Reviews => {
                let has_reference = reference.is_some();
                let mut step = ClassifiedStep::new(CapabilityId::SearchReviews.as_str());
                step.constraints = constraints;
                match reference.or_else(|| matching_label(&phrase, context)) {
                    Some(mention) => step = step.reference(mention),
                    None if !phrase.is_empty() => step = step.query(phrase.clone()),
                    None => {}
                }
                let refinement = has_constraints
                    && step.reference.is_none()
                    && step.query.is_none()
                    && context.active_capability.as_deref()
                        == Some(CapabilityId::SearchReviews.as_str());
                let has_subject = step.reference.is_some()
                    || step.query.is_some()
                    || !context.entities.is_empty()
                    || has_constraints;
                finish(
                    vec![step],
                    confidence_score(has_cue, has_subject, has_constraints, has_reference),
                    refinement,
                    Some("Which product's reviews would you like to see?"),
                )
            }
            Intent::Search | Intent::Analytical => {
                let refines_items = context.active_capability.as_deref()
                    == Some(CapabilityId::SearchItems.as_str());
                if groups.is_empty() {
                    if has_constraints && refines_items {
                        let mut step = ClassifiedStep::new(CapabilityId::SearchItems.as_str());
                        step.constraints = constraints;
                        return finish(
                            vec![step],
                            confidence_score(has_cue, true, true, false),
                            true,
                            None,
                        );
                    }
                    return finish(
                        Vec::new(),
                        confidence_score(has_cue, false, has_constraints, false),
                        false,
                        Some("What kind of product are you looking for?"),
                    );
                }

                let steps = groups
                    .iter()
                    .map(|group| {
                        let mut step =
                            ClassifiedStep::new(CapabilityId::SearchItems.as_str()).query(group.clone());
                        step.constraints = with_group_category(&constraints, group);
                        step
                    })
                    .collect();
                finish(steps, confidence_score(has_cue, true, has_constraints, false), false, None)
            }
        }
    }
}

#[async_trait]
impl IntentClassifier for RuleBasedClassifier {
    async fn classify_intent(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, CollaboratorError> {
        let classification = self.classify(request.text, &request.context);
        debug!(
            event_name = "classifier.rules",
            steps = classification.steps.len(),
            confidence = classification.confidence,
            refinement = classification.refinement,
            "rule classification"
        );
        Ok(classification)
    }
}

fn finish(
    steps: Vec<ClassifiedStep>,
    score: u8,
    refinement: bool,
    clarification: Option<&str>,
) -> Classification {
    Classification {
        steps,
        confidence: f64::from(score) / 100.0,
        refinement,
        clarification: clarification.map(str::to_string),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '$' | '.' | '+' | '-' | '\'' | ',' | '#')
        {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|character| matches!(character, '.' | ',' | '-' | '\'')))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn detect_intent(lowered: &str, tokens: &[String]) -> (Intent, bool) {
    let padded = format!(" {lowered} ");
    let has_phrase = |phrases: &[&str]| {
        phrases.iter().any(|phrase| padded.contains(&format!(" {phrase} ")))
    };

    if has_phrase(ANALYTICAL_PHRASES) {
        return (Intent::Analytical, true);
    }
    if has_phrase(SUMMARY_PHRASES) {
        return (Intent::Summarize, true);
    }
    let review_cue = tokens.iter().enumerate().any(|(index, token)| {
        REVIEW_WORDS.contains(&token.as_str())
            && !(index > 0 && parse_amount(&tokens[index - 1]).is_some())
    });
    if review_cue {
        return (Intent::Reviews, true);
    }
    if has_phrase(IDEA_PHRASES) || tokens.iter().any(|token| IDEA_WORDS.contains(&token.as_str())) {
        return (Intent::Ideas, true);
    }
    (Intent::Search, tokens.iter().any(|token| SEARCH_WORDS.contains(&token.as_str())))
}

/// Ordinal mention of an entity from the previous result ("the second one", "#2").
fn find_reference(tokens: &[String], consumed: &mut [bool]) -> Option<String> {
    for (index, token) in tokens.iter().enumerate() {
        let word = token.as_str();
        let mention = if ORDINALS.contains(&word) || matches!(word, "last" | "final") {
            Some(word.to_string())
        } else if word.starts_with('#') && word[1..].parse::<usize>().is_ok() {
            Some(word.to_string())
        } else if ["st", "nd", "rd", "th"]
            .iter()
            .filter_map(|suffix| word.strip_suffix(suffix))
            .any(|digits| !digits.is_empty() && digits.parse::<usize>().is_ok())
        {
            Some(word.to_string())
        } else if matches!(word, "number" | "option" | "no")
            && tokens.get(index + 1).is_some_and(|next| next.parse::<usize>().is_ok())
        {
            consumed[index + 1] = true;
            Some(format!("number {}", tokens[index + 1]))
        } else {
            None
        };
        if mention.is_some() {
            consumed[index] = true;
            return mention;
        }
    }
    None
}

/// Parses "$49.99", "500+", "1,000" or "2k" into a number.
fn parse_amount(token: &str) -> Option<f64> {
    let trimmed = token.trim_start_matches('$').trim_end_matches('+').replace(',', "");
    if trimmed.is_empty() {
        return None;
    }
    let (number_part, multiplier) = if let Some(prefix) = trimmed.strip_suffix('k') {
        (prefix, 1_000.0)
    } else {
        (trimmed.as_str(), 1.0)
    };
    let amount = number_part.parse::<f64>().ok()?;
    (amount.is_finite() && amount >= 0.0).then_some(amount * multiplier)
}

fn parse_range(token: &str) -> Option<(f64, f64)> {
    let (low, high) = token.split_once('-')?;
    Some((parse_amount(low)?, parse_amount(high)?))
}

/// Unit following a number and how many tokens it spans.
fn unit_at(tokens: &[String], index: usize) -> Option<(Quantity, usize)> {
    match tokens.get(index).map(String::as_str)? {
        "star" | "stars" | "star-rated" => Some((Quantity::Stars, 1)),
        "reviews" | "review" | "ratings" | "rating" => Some((Quantity::ReviewCount, 1)),
        "helpful" => {
            let spans_votes =
                tokens.get(index + 1).is_some_and(|next| matches!(next.as_str(), "votes" | "vote"));
            Some((Quantity::Votes, if spans_votes { 2 } else { 1 }))
        }
        "votes" | "vote" | "upvotes" => Some((Quantity::Votes, 1)),
        "dollars" | "bucks" | "usd" => Some((Quantity::Price, 1)),
        _ => None,
    }
}

fn field_for(quantity: Quantity, mode: Mode) -> Option<&'static str> {
    match (quantity, mode) {
        (Quantity::Price, Mode::Items) => Some("price"),
        (Quantity::Stars, _) => Some("rating"),
        (Quantity::ReviewCount, Mode::Items) => Some("rating_count"),
        (Quantity::Votes, Mode::Reviews) => Some("helpful_votes"),
        _ => None,
    }
}

fn matches_at(tokens: &[String], consumed: &[bool], start: usize, words: &[&str]) -> bool {
    start + words.len() <= tokens.len()
        && words
            .iter()
            .enumerate()
            .all(|(offset, word)| tokens[start + offset] == *word && !consumed[start + offset])
}

/// Longest comparison phrase ending right before `index`.
fn leading_comparison(tokens: &[String], consumed: &[bool], index: usize) -> Option<(&'static str, usize)> {
    LEADING_COMPARISONS
        .iter()
        .filter(|(words, _)| {
            index >= words.len() && matches_at(tokens, consumed, index - words.len(), words)
        })
        .max_by_key(|(words, _)| words.len())
        .map(|(words, comparison)| (*comparison, words.len()))
}

fn trailing_comparison(tokens: &[String], consumed: &[bool], index: usize) -> Option<(&'static str, usize)> {
    TRAILING_COMPARISONS
        .iter()
        .find(|(words, _)| matches_at(tokens, consumed, index, words))
        .map(|(words, comparison)| (*comparison, words.len()))
}

fn mark(consumed: &mut [bool], start: usize, len: usize) {
    for flag in consumed.iter_mut().skip(start).take(len) {
        *flag = true;
    }
}

fn range_constraint(field: &str, low: f64, high: f64, mode: Mode) -> RawConstraint {
    let (low, high) = (low.min(high), low.max(high));
    let whole = low.fract() == 0.0 && high.fract() == 0.0 && high - low <= 4.0;
    if field == "rating" && mode == Mode::Reviews && whole {
        let stars = (low as u32..=high as u32).map(|star| RawValue::Number(f64::from(star))).collect();
        RawConstraint::new(field, "in", RawValue::List(stars))
    } else {
        RawConstraint::new(field, "between", RawValue::List(vec![low.into(), high.into()]))
    }
}

fn extract_constraints(
    tokens: &[String],
    original: &[String],
    mode: Mode,
    consumed: &mut [bool],
) -> Vec<RawConstraint> {
    let mut constraints = Vec::new();
    let mut index = 0;

    while index < tokens.len() {
        if consumed[index] {
            index += 1;
            continue;
        }
        let token = tokens[index].as_str();

        // "between $20 and $50"
        if token == "between" && tokens.get(index + 2).is_some_and(|word| word == "and") {
            let bounds = tokens
                .get(index + 1)
                .and_then(|low| parse_amount(low))
                .zip(tokens.get(index + 3).and_then(|high| parse_amount(high)));
            if let Some((low, high)) = bounds {
                let unit = unit_at(tokens, index + 4);
                let quantity = unit.map_or(Quantity::Price, |(quantity, _)| quantity);
                if let Some(field) = field_for(quantity, mode) {
                    constraints.push(range_constraint(field, low, high, mode));
                    mark(consumed, index, 4 + unit.map_or(0, |(_, len)| len));
                    index += 4;
                    continue;
                }
            }
        }

        // "$20-$50", "1-2 star"
        if let Some((low, high)) = parse_range(token) {
            let unit = unit_at(tokens, index + 1);
            let quantity = match unit {
                Some((quantity, _)) => Some(quantity),
                None if token.contains('$') => Some(Quantity::Price),
                None => None,
            };
            if let Some(field) = quantity.and_then(|quantity| field_for(quantity, mode)) {
                constraints.push(range_constraint(field, low, high, mode));
                mark(consumed, index, 1 + unit.map_or(0, |(_, len)| len));
                index += 1;
                continue;
            }
        }

        if let Some(amount) = parse_amount(token) {
            let leading = leading_comparison(tokens, consumed, index);
            let unit = unit_at(tokens, index + 1);
            let quantity = match unit {
                Some((quantity, _)) => Some(quantity),
                None if token.starts_with('$') => Some(Quantity::Price),
                None if leading.is_some() && mode == Mode::Items => Some(Quantity::Price),
                None if leading.is_some() && amount <= 5.0 => Some(Quantity::Stars),
                None => None,
            };
            if let Some((quantity, field)) =
                quantity.and_then(|quantity| Some((quantity, field_for(quantity, mode)?)))
            {
                let unit_len = unit.map_or(0, |(_, len)| len);
                let trailing = trailing_comparison(tokens, consumed, index + 1 + unit_len);
                let comparison = if token.ends_with('+') {
                    "gte"
                } else if let Some((comparison, _)) = leading.or(trailing) {
                    comparison
                } else {
                    match (quantity, mode) {
                        (Quantity::Price, _) => "lte",
                        (Quantity::Stars, Mode::Reviews) => "eq",
                        _ => "gte",
                    }
                };
                constraints.push(RawConstraint::new(field, comparison, amount.into()));
                if let Some((_, len)) = leading {
                    mark(consumed, index - len, len);
                }
                mark(consumed, index, 1 + unit_len + trailing.map_or(0, |(_, len)| len));
                index += 1;
                continue;
            }
        }

        index += 1;
    }

    let has_rating = constraints.iter().any(|constraint| constraint.field == "rating");
    match mode {
        Mode::Reviews if !has_rating => {
            for (index, token) in tokens.iter().enumerate() {
                if consumed[index] {
                    continue;
                }
                let constraint = if NEGATIVE_WORDS.contains(&token.as_str()) {
                    Some(RawConstraint::new("rating", "lte", 2.0.into()))
                } else if POSITIVE_WORDS.contains(&token.as_str()) {
                    Some(RawConstraint::new("rating", "gte", 4.0.into()))
                } else {
                    None
                };
                if let Some(constraint) = constraint {
                    constraints.push(constraint);
                    consumed[index] = true;
                    break;
                }
            }
        }
        Mode::Items if !has_rating => {
            let found = (0..tokens.len()).find_map(|start| {
                WELL_RATED
                    .iter()
                    .find(|words| matches_at(tokens, consumed, start, words))
                    .map(|words| (start, words.len()))
            });
            if let Some((start, len)) = found {
                constraints.push(RawConstraint::new("rating", "gte", 4.0.into()));
                mark(consumed, start, len);
            }
        }
        _ => {}
    }

    if mode == Mode::Items {
        constraints.extend(named_constraints(tokens, original, consumed));
    }
    constraints
}

/// "in the Swimwear category", "brand Acme", "by Acme".
fn named_constraints(tokens: &[String], original: &[String], consumed: &mut [bool]) -> Vec<RawConstraint> {
    let mut constraints = Vec::new();
    let capitalized = |index: usize| {
        original
            .get(index)
            .filter(|word| word.chars().next().is_some_and(|first| first.is_ascii_uppercase()))
    };

    for index in 0..tokens.len() {
        if consumed[index] {
            continue;
        }
        match tokens[index].as_str() {
            "category" => {
                let start = (0..index)
                    .rev()
                    .take(3)
                    .take_while(|&before| {
                        !consumed[before] && !matches!(tokens[before].as_str(), "in" | "the" | "from")
                    })
                    .last();
                if let Some(start) = start {
                    let value = original[start..index].join(" ");
                    constraints.push(RawConstraint::new("category", "eq", value.as_str().into()));
                    mark(consumed, start, index - start + 1);
                }
            }
            "brand" => {
                let named = capitalized(index + 1)
                    .map(|word| (index + 1, word))
                    .or_else(|| index.checked_sub(1).and_then(|before| capitalized(before).map(|word| (before, word))));
                if let Some((position, word)) = named {
                    constraints.push(RawConstraint::new("brand", "eq", word.as_str().into()));
                    consumed[position] = true;
                    consumed[index] = true;
                }
            }
            "by" => {
                if let Some(word) = capitalized(index + 1) {
                    constraints.push(RawConstraint::new("brand", "eq", word.as_str().into()));
                    consumed[index] = true;
                    consumed[index + 1] = true;
                }
            }
            _ => {}
        }
    }
    constraints
}

/// Remaining product words, split on "and" when the shopper asks for several things.
fn product_groups(tokens: &[String], consumed: &[bool], split: bool) -> Vec<String> {
    let mut groups: Vec<Vec<&str>> = vec![Vec::new()];
    for (index, token) in tokens.iter().enumerate() {
        if consumed[index] {
            continue;
        }
        if split && token == "and" {
            groups.push(Vec::new());
            continue;
        }
        if PHRASE_STOP_WORDS.contains(&token.as_str()) || parse_amount(token).is_some() {
            continue;
        }
        if let Some(group) = groups.last_mut() {
            group.push(token.as_str());
        }
    }
    groups.into_iter().filter(|group| !group.is_empty()).map(|group| group.join(" ")).collect()
}

/// Category of the product a group names, looked up from its last known noun.
fn group_category(group: &str) -> Option<&'static str> {
    group.split_whitespace().rev().find_map(|word| {
        let singular = word.strip_suffix('s').unwrap_or(word);
        PRODUCT_CATEGORIES
            .iter()
            .find(|(noun, _)| *noun == singular || *noun == word)
            .map(|(_, category)| *category)
    })
}

/// Shared constraints plus the group's category, unless the shopper named one.
fn with_group_category(constraints: &[RawConstraint], group: &str) -> Vec<RawConstraint> {
    let mut scoped = constraints.to_vec();
    let named = constraints.iter().any(|constraint| constraint.field == "category");
    if let Some(category) = group_category(group).filter(|_| !named) {
        scoped.push(RawConstraint::new("category", "eq", category.into()));
    }
    scoped
}

/// The phrase itself when it names an entity shown in the previous result.
fn matching_label(phrase: &str, context: &ConversationDigest) -> Option<String> {
    if phrase.is_empty() {
        return None;
    }
    let mut matching = context
        .entities
        .iter()
        .filter(|(_, label)| label.to_ascii_lowercase().contains(phrase));
    match (matching.next(), matching.next()) {
        (Some(_), None) => Some(phrase.to_string()),
        _ => None,
    }
}

fn confidence_score(has_cue: bool, has_subject: bool, has_constraints: bool, has_reference: bool) -> u8 {
    let mut score = 20u8;
    if has_cue {
        score += 30;
    }
    if has_subject {
        score += 40;
    }
    if has_constraints {
        score += 20;
    }
    if has_reference {
        score += 10;
    }
    score.min(100)
}
