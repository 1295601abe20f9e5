//! Inference backend client
//!
//! One POST per attempt against a Gemini-style `generateContent` endpoint.
//! The credential travels in a request header, never in the URL, so it cannot
//! leak through logs or history. Generation is pinned to low-temperature,
//! top-k 1 sampling: the contract expects a single letter or option text, not
//! prose. This component performs no retries; the control loop owns those.

use std::time::Duration;

use chromiumoxide::Page;
use serde::{Deserialize, Serialize};

use crate::{
	AnswerOption, AnswerSet, Question,
	credentials::Credential,
	error::{Result, SolverError},
};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Client for the inference backend
pub struct GeminiClient {
	http: reqwest::Client,
	endpoint: String,
	model: String,
	credential: Credential,
}

impl GeminiClient {
	pub fn new(credential: Credential, model: impl Into<String>, timeout: Duration) -> Result<Self> {
		let http = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(GeminiClient {
			http,
			endpoint: DEFAULT_ENDPOINT.to_string(),
			model: model.into(),
			credential,
		})
	}

	/// Point the client at a different endpoint base (proxies, test servers)
	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = endpoint.into();
		self
	}

	pub(crate) fn url(&self) -> String {
		format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
	}

	/// Ask the backend which alternative answers the question
	///
	/// Returns `Ok(None)` when the backend answered but the reply was empty or
	/// malformed (logged, retried by the caller). Transport failures and
	/// non-success statuses are returned as errors so the loop boundary can
	/// count them toward its ceiling.
	pub async fn query(&self, page: &Page, question: &Question, answers: &AnswerSet) -> Result<Option<String>> {
		let mut parts = vec![Part::Text { text: build_prompt(question, answers) }];

		// One bad image must not abort the whole query.
		for image in &question.images {
			match fetch_image_as_base64(page, &image.url).await {
				Ok((data, mime_type)) => parts.push(Part::Inline {
					inline_data: InlineData { mime_type, data },
				}),
				Err(e) => tracing::warn!("skipping question image {}: {e}", image.url),
			}
		}

		match self.generate(parts).await {
			Ok(text) => {
				let trimmed = text.trim();
				if trimmed.is_empty() {
					tracing::warn!("inference backend returned an empty reply");
					Ok(None)
				} else {
					Ok(Some(trimmed.to_string()))
				}
			}
			Err(SolverError::MalformedReply(message)) => {
				tracing::warn!("unusable inference reply: {message}");
				Ok(None)
			}
			Err(e) => Err(e),
		}
	}

	async fn generate(&self, parts: Vec<Part>) -> Result<String> {
		let body = GenerateRequest {
			contents: vec![Content { parts }],
			generation_config: GenerationConfig::default(),
		};

		let response = self
			.http
			.post(self.url())
			.header("x-goog-api-key", self.credential.as_str())
			.json(&body)
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let message = response
				.json::<BackendError>()
				.await
				.map(|e| e.error.message)
				.unwrap_or_else(|_| status.canonical_reason().unwrap_or("request failed").to_string());
			return Err(SolverError::Inference { status: status.as_u16(), message });
		}

		let reply: GenerateResponse = response.json().await?;
		reply_text(reply).ok_or_else(|| SolverError::MalformedReply("response carried no text part".to_string()))
	}
}

/// Build the instruction sent to the backend
///
/// Lettered choices ask for only a letter; dropdown/fill-in sets ask for the
/// exact option text, so the resolver's matching stays trivial.
pub fn build_prompt(question: &Question, answers: &AnswerSet) -> String {
	let has_letters = answers.options.iter().any(|o| matches!(o, AnswerOption::Labeled { .. }));

	let mut prompt = String::from("You are answering a question from an online exercise.\n\nQuestion:\n");
	prompt.push_str(&question.text);
	prompt.push_str("\n\n");

	if !question.images.is_empty() {
		prompt.push_str(&format!("The question includes {} image(s), attached to this message.\n\n", question.images.len()));
	}

	prompt.push_str("Alternatives:\n");
	for option in &answers.options {
		prompt.push_str(option.text());
		prompt.push('\n');
	}
	prompt.push('\n');

	if has_letters {
		prompt.push_str("Reply with ONLY the letter of the correct alternative (A, B, C, D or E). Do not explain.");
	} else {
		prompt.push_str("Reply with ONLY the exact text of the correct option. Do not explain.");
	}

	prompt
}

/// Fetch an image through the browser context and return (base64 data, media type)
///
/// Going through the page keeps the portal's session cookies on the request.
async fn fetch_image_as_base64(page: &Page, url: &str) -> Result<(String, String)> {
	let fetch_script = format!(
		r#"
		(async function() {{
			try {{
				const response = await fetch("{}");
				if (!response.ok) return null;
				const blob = await response.blob();
				const mediaType = blob.type || 'image/png';
				return new Promise((resolve) => {{
					const reader = new FileReader();
					reader.onloadend = () => {{
						const base64 = reader.result.split(',')[1];
						resolve(JSON.stringify({{base64: base64, mediaType: mediaType}}));
					}};
					reader.readAsDataURL(blob);
				}});
			}} catch (e) {{
				return null;
			}}
		}})()
		"#,
		url
	);

	let result = page.evaluate(fetch_script).await.map_err(|e| SolverError::Page(format!("image fetch failed: {e}")))?;
	let json_str = result
		.value()
		.and_then(|v| v.as_str())
		.ok_or_else(|| SolverError::Page("image fetch returned null".to_string()))?;

	let parsed: serde_json::Value = serde_json::from_str(json_str)?;
	let base64 = parsed["base64"]
		.as_str()
		.ok_or_else(|| SolverError::Page("image fetch result missing base64 data".to_string()))?
		.to_string();
	let media_type = parsed["mediaType"].as_str().unwrap_or("image/png").to_string();

	Ok((base64, media_type))
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
	contents: Vec<Content>,
	#[serde(rename = "generationConfig")]
	generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
	parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
	Text {
		text: String,
	},
	Inline {
		#[serde(rename = "inlineData")]
		inline_data: InlineData,
	},
}

#[derive(Debug, Serialize)]
struct InlineData {
	#[serde(rename = "mimeType")]
	mime_type: String,
	data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
	temperature: f32,
	top_k: u32,
	max_output_tokens: u32,
}

impl Default for GenerationConfig {
	fn default() -> Self {
		// terse deterministic output: the reply is one token or one phrase
		GenerationConfig {
			temperature: 0.1,
			top_k: 1,
			max_output_tokens: 64,
		}
	}
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
	#[serde(default)]
	candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
	content: Option<ReplyContent>,
}

#[derive(Debug, Deserialize)]
struct ReplyContent {
	#[serde(default)]
	parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
	text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendError {
	error: BackendErrorBody,
}

#[derive(Debug, Deserialize)]
struct BackendErrorBody {
	message: String,
}

fn reply_text(response: GenerateResponse) -> Option<String> {
	response.candidates.into_iter().next()?.content?.parts.into_iter().find_map(|p| p.text)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::OptionHandle;

	fn labeled(letter: char, text: &str) -> AnswerOption {
		AnswerOption::Labeled {
			letter,
			text: text.to_string(),
			handle: OptionHandle::new("[data-sala-opt=\"0\"]"),
		}
	}

	#[test]
	fn prompt_for_lettered_choices_asks_for_a_letter() {
		let question = Question {
			text: "Qual o valor de x?".to_string(),
			images: Vec::new(),
			detected: true,
		};
		let answers = AnswerSet {
			options: vec![labeled('A', "A) 1"), labeled('B', "B) 2")],
		};
		let prompt = build_prompt(&question, &answers);
		assert!(prompt.contains("Qual o valor de x?"));
		assert!(prompt.contains("A) 1"));
		assert!(prompt.contains("B) 2"));
		assert!(prompt.contains("ONLY the letter"));
		assert!(!prompt.contains("image(s)"));
	}

	#[test]
	fn prompt_for_dropdown_choices_asks_for_exact_text() {
		let question = Question {
			text: "Complete: a capital da França é ____.".to_string(),
			images: Vec::new(),
			detected: true,
		};
		let answers = AnswerSet {
			options: vec![AnswerOption::Dropdown {
				text: "Paris".to_string(),
				handle: crate::SelectHandle::new("[data-sala-sel=\"0\"]"),
				value: "1".to_string(),
			}],
		};
		let prompt = build_prompt(&question, &answers);
		assert!(prompt.contains("Paris"));
		assert!(prompt.contains("ONLY the exact text"));
	}

	#[test]
	fn prompt_mentions_attached_imagery() {
		let question = Question {
			text: "Considerando a figura, assinale a alternativa correta.".to_string(),
			images: vec![crate::Image {
				url: "https://example.com/fig.png".to_string(),
				alt: None,
			}],
			detected: true,
		};
		let answers = AnswerSet {
			options: vec![labeled('A', "A) azul")],
		};
		let prompt = build_prompt(&question, &answers);
		assert!(prompt.contains("1 image(s)"));
	}

	#[test]
	fn reply_text_reads_the_first_candidate_part() {
		let response: GenerateResponse = serde_json::from_value(serde_json::json!({
			"candidates": [{
				"content": { "parts": [{ "text": "B" }], "role": "model" },
				"finishReason": "STOP"
			}]
		}))
		.unwrap();
		assert_eq!(reply_text(response).as_deref(), Some("B"));
	}

	#[test]
	fn reply_text_is_none_for_empty_candidates() {
		let response: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
		assert!(reply_text(response).is_none());
	}

	#[test]
	fn request_url_names_the_model_and_never_the_credential() {
		let client = GeminiClient::new(Credential::new("secret-key").unwrap(), "gemini-2.0-flash", Duration::from_secs(5)).unwrap();
		let url = client.url();
		assert!(url.ends_with("/v1beta/models/gemini-2.0-flash:generateContent"));
		assert!(!url.contains("secret-key"));
	}

	#[test]
	fn backend_error_body_parses() {
		let parsed: BackendError = serde_json::from_value(serde_json::json!({
			"error": { "code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT" }
		}))
		.unwrap();
		assert_eq!(parsed.error.message, "API key not valid");
	}
}
