use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use shopper_core::collaborators::{Classification, ClassificationRequest, IntentClassifier};
use shopper_core::errors::CollaboratorError;
use tracing::debug;

use crate::llm::LlmClient;
use crate::prompts;

/// Intent classification through the language model.
pub struct LlmIntentClassifier {
    client: Arc<dyn LlmClient>,
}

impl LlmIntentClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify_intent(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, CollaboratorError> {
        let prompt = prompts::classification_prompt(request);
        let reply = self.client.complete(prompts::CLASSIFIER_SYSTEM, &prompt).await?;
        let mut classification: Classification = parse_json_reply(&reply)?;
        classification.confidence = classification.confidence.clamp(0.0, 1.0);
        debug!(
            event_name = "classifier.llm",
            steps = classification.steps.len(),
            confidence = classification.confidence,
            "llm classification parsed"
        );
        Ok(classification)
    }
}

/// Parses the JSON value a model reply carries, tolerating code fences and prose
/// around it.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, CollaboratorError> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let candidate = ['{', '[']
        .iter()
        .filter_map(|open| {
            let close = if *open == '{' { '}' } else { ']' };
            let start = trimmed.find(*open)?;
            let end = trimmed.rfind(close)?;
            (end > start).then(|| &trimmed[start..=end])
        })
        .min_by_key(|slice| trimmed.len() - slice.len())
        .ok_or_else(|| CollaboratorError::Malformed("reply contains no JSON".to_string()))?;

    serde_json::from_str(candidate).map_err(|error| CollaboratorError::Malformed(error.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use shopper_core::collaborators::{
        ClassificationRequest, ConversationDigest, IntentClassifier,
    };
    use shopper_core::errors::CollaboratorError;
    use shopper_core::filters::RawValue;
    use shopper_core::registry::CapabilityRegistry;

    use super::{parse_json_reply, LlmIntentClassifier};
    use crate::llm::{LlmClient, LlmError};

    struct CannedLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().expect("lock").push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn classify(reply: &str) -> Result<shopper_core::collaborators::Classification, CollaboratorError> {
        let llm = Arc::new(CannedLlm { reply: reply.to_string(), prompts: Mutex::new(Vec::new()) });
        let classifier = LlmIntentClassifier::new(llm);
        let registry = CapabilityRegistry::standard();
        let request = ClassificationRequest {
            text: "sandals under $50",
            registry: &registry,
            context: ConversationDigest::default(),
        };
        futures::executor::block_on(classifier.classify_intent(&request))
    }

    #[test]
    fn fenced_reply_is_parsed() {
        let classification = classify(
            "```json\n{\"steps\":[{\"capability\":\"search_items\",\"query\":\"sandals\",\
             \"constraints\":[{\"field\":\"price\",\"comparison\":\"lt\",\"value\":50}]}],\
             \"confidence\":0.92}\n```",
        )
        .expect("parses");

        assert_eq!(classification.steps.len(), 1);
        assert_eq!(classification.steps[0].capability, "search_items");
        assert_eq!(classification.steps[0].constraints[0].value, RawValue::Number(50.0));
        assert!(!classification.refinement);
    }

    #[test]
    fn confidence_is_clamped() {
        let classification =
            classify(r#"{"steps":[{"capability":"clarify","query":"Which size?"}],"confidence":7}"#)
                .expect("parses");
        assert_eq!(classification.confidence, 1.0);
    }

    #[test]
    fn prose_without_json_is_malformed() {
        assert!(matches!(
            classify("I think they want sandals."),
            Err(CollaboratorError::Malformed(_))
        ));
    }

    #[test]
    fn arrays_are_found_inside_prose() {
        let ideas: Vec<String> =
            parse_json_reply("Here you go:\n[\"kids bike helmet\", \"scooter\"]\nEnjoy!")
                .expect("parses");
        assert_eq!(ideas, vec!["kids bike helmet", "scooter"]);
    }
}
