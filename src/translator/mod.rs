//! Natural-language -> structured filter translator (C6).
//!
//! `translate` must never fail from the caller's perspective: any problem
//! forwarding the request to the LLM, or parsing what comes back, falls
//! through to a deterministic text-search filter.

mod extract;

pub use extract::extract_json;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

/// The LLM call goes through this trait so the fallback path can be
/// exercised deterministically in tests without network access.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Sends `prompt` to the model and returns its raw completion text.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Issues the completion request over the shared `reqwest::Client`.
pub struct HttpTranslator {
    client: reqwest::Client,
    llm_base_url: String,
    api_key: String,
}

impl HttpTranslator {
    pub fn new(client: reqwest::Client, llm_base_url: String, api_key: String) -> Self {
        Self {
            client,
            llm_base_url,
            api_key,
        }
    }
}

#[derive(serde::Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
}

#[derive(serde::Deserialize)]
struct CompletionResponse {
    completion: String,
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/complete", self.llm_base_url))
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest { prompt })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("llm endpoint returned HTTP {}", response.status().as_u16());
        }

        let parsed: CompletionResponse = response.json().await?;
        Ok(parsed.completion)
    }
}

/// Result of a translation, always well-formed (§8 invariants).
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationResult {
    pub filter: JsonValue,
    pub explanation: String,
}

/// Fields searched by the deterministic fallback, joined by `OR` (§4.6).
const FALLBACK_FIELDS: &[&str] = &["name", "address", "city", "description"];

/// Converts a natural-language request into a structured filter, with a
/// fallback that always produces a usable result.
pub struct NlQueryTranslator {
    translator: Option<std::sync::Arc<dyn Translator>>,
}

impl NlQueryTranslator {
    pub fn new(translator: Option<std::sync::Arc<dyn Translator>>) -> Self {
        Self { translator }
    }

    /// Translates `nl` into `{filter, explanation}`, falling back to a
    /// free-text search across name/address/city/description when the LLM
    /// is unavailable or its response cannot be interpreted as the expected
    /// shape (§4.6, §8).
    pub async fn translate(&self, nl: &str) -> TranslationResult {
        if let Some(translator) = &self.translator
            && let Some(result) = self.try_llm(translator.as_ref(), nl).await
        {
            return result;
        }
        fallback(nl)
    }

    async fn try_llm(&self, translator: &dyn Translator, nl: &str) -> Option<TranslationResult> {
        let prompt = build_prompt(nl);
        let completion = translator.complete(&prompt).await.ok()?;
        let extracted = extract_json(&completion)?;
        let parsed: JsonValue = serde_json::from_str(&extracted).ok()?;
        let filter = parsed.get("filter")?.clone();
        if !filter.is_object() {
            return None;
        }
        let explanation = parsed
            .get("explanation")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Some(TranslationResult { filter, explanation })
    }
}

fn build_prompt(nl: &str) -> String {
    format!(
        "Convert the following property search request into strict JSON of the \
         shape {{\"filter\": {{...}}, \"explanation\": \"...\"}}. Request: {nl}"
    )
}

/// Synthesizes a filter searching the verbatim `nl` string (case-insensitive
/// `contains`, not tokenized — see the resolved open question on stop-word
/// handling) across name/address/city/description, joined by `OR`.
fn fallback(nl: &str) -> TranslationResult {
    let leaves: Vec<JsonValue> = FALLBACK_FIELDS
        .iter()
        .map(|field| json!({ *field: { "contains": nl, "mode": "insensitive" } }))
        .collect();

    TranslationResult {
        filter: json!({ "OR": leaves }),
        explanation: format!(
            "Used a text search fallback across name, address, city, and description for \"{nl}\"."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FakeTranslator {
        response: String,
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.response.clone())
        }
    }

    struct FailingTranslator;

    #[async_trait]
    impl Translator for FailingTranslator {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("upstream outage")
        }
    }

    #[tokio::test]
    async fn well_formed_json_response_is_used_directly() {
        let translator = NlQueryTranslator::new(Some(Arc::new(FakeTranslator {
            response: r#"{"filter": {"city": "Austin"}, "explanation": "matched city"}"#.to_string(),
        })));
        let result = translator.translate("properties in Austin").await;
        assert_eq!(result.filter, json!({"city": "Austin"}));
        assert_eq!(result.explanation, "matched city");
    }

    #[tokio::test]
    async fn fenced_json_response_is_extracted() {
        let translator = NlQueryTranslator::new(Some(Arc::new(FakeTranslator {
            response: "Sure, here you go:\n```json\n{\"filter\": {\"city\": \"Dallas\"}, \"explanation\": \"ok\"}\n```"
                .to_string(),
        })));
        let result = translator.translate("homes in Dallas").await;
        assert_eq!(result.filter, json!({"city": "Dallas"}));
    }

    #[tokio::test]
    async fn llm_outage_falls_back_to_text_search() {
        let translator = NlQueryTranslator::new(Some(Arc::new(FailingTranslator)));
        let result = translator.translate("properties in Austin").await;
        assert_eq!(
            result.filter,
            json!({"OR": [
                {"name": {"contains": "properties in Austin", "mode": "insensitive"}},
                {"address": {"contains": "properties in Austin", "mode": "insensitive"}},
                {"city": {"contains": "properties in Austin", "mode": "insensitive"}},
                {"description": {"contains": "properties in Austin", "mode": "insensitive"}},
            ]})
        );
        assert!(result.explanation.contains("text search fallback"));
    }

    #[tokio::test]
    async fn no_translator_configured_falls_back() {
        let translator = NlQueryTranslator::new(None);
        let result = translator.translate("smith").await;
        assert!(result.explanation.contains("text search fallback"));
    }

    #[tokio::test]
    async fn malformed_json_falls_back() {
        let translator = NlQueryTranslator::new(Some(Arc::new(FakeTranslator {
            response: "I'm not sure what you mean.".to_string(),
        })));
        let result = translator.translate("???").await;
        assert!(result.filter.is_object());
        assert!(result.explanation.contains("text search fallback"));
    }

    #[tokio::test]
    async fn array_typed_response_falls_back() {
        let translator = NlQueryTranslator::new(Some(Arc::new(FakeTranslator {
            response: "[1, 2, 3]".to_string(),
        })));
        let result = translator.translate("numbers").await;
        assert!(result.explanation.contains("text search fallback"));
    }

    #[tokio::test]
    async fn empty_and_whitespace_input_always_returns_well_formed_result() {
        let translator = NlQueryTranslator::new(None);
        for input in ["", "   ", "\u{2028}\u{2029}"] {
            let result = translator.translate(input).await;
            assert!(result.filter.is_object());
            assert!(!result.explanation.is_empty());
        }
    }
}
