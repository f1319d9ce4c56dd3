use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure to get text back from the generation service. Callers treat
/// every variant as the service being unavailable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("generation service returned no text")]
    EmptyResponse,
}

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Temperature used for drafting news articles.
const NEWS_TEMPERATURE: f32 = 0.7;

/// Temperature used for summarizing aspiration themes.
const THEMES_TEMPERATURE: f32 = 0.5;

/// Returned instead of a summary when there are no aspirations to analyze.
pub const NO_ASPIRATIONS_SUMMARY: &str = "No aspirations to analyze.";

/// Topic an aspiration is filed under. Labels are the ones shown to students.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspirationCategory {
    #[serde(rename = "Akademik")]
    Academic,
    #[serde(rename = "Fasilitas")]
    Facilities,
    #[serde(rename = "Kegiatan Kesiswaan")]
    StudentActivities,
    #[serde(rename = "Lingkungan Sekolah")]
    SchoolEnvironment,
    #[default]
    #[serde(rename = "Lain-lain")]
    Other,
}

impl AspirationCategory {
    pub const ALL: [Self; 5] = [
        Self::Academic,
        Self::Facilities,
        Self::StudentActivities,
        Self::SchoolEnvironment,
        Self::Other,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Academic => "Akademik",
            Self::Facilities => "Fasilitas",
            Self::StudentActivities => "Kegiatan Kesiswaan",
            Self::SchoolEnvironment => "Lingkungan Sekolah",
            Self::Other => "Lain-lain",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.label() == label)
    }
}

impl std::fmt::Display for AspirationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspirationStatus {
    #[default]
    Unread,
    Read,
}

/// A suggestion submitted by a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aspiration {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub status: AspirationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<AspirationCategory>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

impl GenerationConfig {
    fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Self::default()
        }
    }

    fn json(schema: serde_json::Value) -> Self {
        Self {
            response_mime_type: Some("application/json"),
            response_schema: Some(schema),
            ..Self::default()
        }
    }
}

/// Structured reply to a categorization prompt.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Categorization {
    categorized_aspirations: Vec<CategorizedAspiration>,
}

#[derive(Debug, Deserialize)]
struct CategorizedAspiration {
    id: serde_json::Number,
    category: String,
}

impl CategorizedAspiration {
    /// The model may send ids as floats.
    fn id(&self) -> Option<u64> {
        self.id.as_u64().or_else(|| {
            self.id
                .as_f64()
                .filter(|id| id.fract() == 0.0 && *id >= 0.0 && *id <= u64::MAX as f64)
                .map(|id| id as u64)
        })
    }
}

impl Categorization {
    /// Files every aspiration under the category the model gave its id and
    /// marks it read. Ids the model skipped, or categories it made up, fall
    /// back to [`AspirationCategory::Other`].
    fn apply(self, aspirations: Vec<Aspiration>) -> Vec<Aspiration> {
        let categories: HashMap<u64, AspirationCategory> = self
            .categorized_aspirations
            .iter()
            .filter_map(|item| Some((item.id()?, AspirationCategory::from_label(&item.category)?)))
            .collect();

        aspirations
            .into_iter()
            .map(|aspiration| Aspiration {
                category: Some(categories.get(&aspiration.id).copied().unwrap_or_default()),
                status: AspirationStatus::Read,
                ..aspiration
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GenerateContentResponse {
    /// Joins the text parts of the first candidate.
    fn into_text(self) -> Result<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().map(|part| part.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(text)
    }
}

/// A client for a Gemini-style `generateContent` text generation API.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    model: String,
    api_key: String,
    http: reqwest::Client,
}

impl Client {
    /// Create a new client with the given base URL, model name, and API key.
    ///
    /// # Example
    ///
    /// ```
    /// # use genai_client::Client;
    /// let base_url = "http://localhost:8080/".parse().unwrap();
    /// let client = Client::new(base_url, "gemini-2.5-flash", "secret");
    /// ```
    pub fn new(base_url: Url, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url,
            model: model.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> Result<Url> {
        Ok(self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))?)
    }

    /// Send `prompt` to the model and return the generated text. No retries.
    pub async fn generate_text(&self, prompt: &str, temperature: f32) -> Result<String> {
        self.generate(prompt, GenerationConfig::with_temperature(temperature))
            .await
    }

    async fn generate(&self, prompt: &str, generation_config: GenerationConfig) -> Result<String> {
        let request = GenerateContentRequest {
            contents: [Content {
                parts: [RequestPart { text: prompt }],
            }],
            generation_config,
        };

        let response = self
            .http
            .post(self.generate_url()?)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        serde_json::from_str::<GenerateContentResponse>(&body)?.into_text()
    }

    /// Draft a short school news article from the given talking points.
    pub async fn draft_news_article(&self, points: &str) -> Result<String> {
        tracing::debug!("drafting news article with {}", self.model);
        self.generate_text(&news_prompt(points), NEWS_TEMPERATURE)
            .await
    }

    /// File each aspiration under one of the [`AspirationCategory`] labels and
    /// mark it read. The model answers in JSON constrained by a response
    /// schema.
    pub async fn categorize_aspirations(
        &self,
        aspirations: Vec<Aspiration>,
    ) -> Result<Vec<Aspiration>> {
        if aspirations.is_empty() {
            return Ok(aspirations);
        }
        tracing::debug!(
            "categorizing {} aspirations with {}",
            aspirations.len(),
            self.model
        );
        let text = self
            .generate(
                &categorize_prompt(&aspirations),
                GenerationConfig::json(categorization_schema()),
            )
            .await?;
        let categorization: Categorization = serde_json::from_str(text.trim())?;
        Ok(categorization.apply(aspirations))
    }

    /// Summarize two or three recurring themes in the aspirations, each with
    /// a short summary and one recommendation, as Markdown.
    pub async fn summarize_aspiration_themes(&self, aspirations: &[Aspiration]) -> Result<String> {
        if aspirations.is_empty() {
            return Ok(NO_ASPIRATIONS_SUMMARY.to_owned());
        }
        tracing::debug!(
            "summarizing {} aspirations with {}",
            aspirations.len(),
            self.model
        );
        self.generate_text(&themes_prompt(aspirations), THEMES_TEMPERATURE)
            .await
    }
}

fn categorization_schema() -> serde_json::Value {
    let labels: Vec<&str> = AspirationCategory::ALL
        .into_iter()
        .map(AspirationCategory::label)
        .collect();
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "categorizedAspirations": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "id": { "type": "NUMBER" },
                        "category": { "type": "STRING", "enum": labels },
                    },
                    "required": ["id", "category"],
                },
            },
        },
        "required": ["categorizedAspirations"],
    })
}

fn categorize_prompt(aspirations: &[Aspiration]) -> String {
    let labels: Vec<&str> = AspirationCategory::ALL
        .into_iter()
        .map(AspirationCategory::label)
        .collect();
    let listing: Vec<String> = aspirations
        .iter()
        .map(|aspiration| format!("ID {}: {}", aspiration.id, aspiration.text))
        .collect();
    format!(
        "You help a student council manage student aspirations. Put each \
         aspiration below into exactly one of these categories: {}. Use \
         \"{}\" when unsure.\n\nAspirations:\n{}",
        labels.join(", "),
        AspirationCategory::Other,
        listing.join("\n")
    )
}

fn themes_prompt(aspirations: &[Aspiration]) -> String {
    let listing: Vec<String> = aspirations
        .iter()
        .map(|aspiration| {
            format!(
                "- {} (Category: {})",
                aspiration.text,
                aspiration.category.unwrap_or_default()
            )
        })
        .collect();
    format!(
        "Analyze the categorized student aspirations below and identify the \
         two or three main themes. For each theme give a short summary of one \
         or two sentences and one concrete recommendation the school or the \
         student council can act on. Answer in concise Markdown bullet points \
         with each theme title in **bold**.\n\nExample:\n\
         **Theme: Better study facilities**\n\
         Summary: Many students want the projectors repaired and more books in the library.\n\
         Recommendation: Inventory the facilities that need repair and propose new library purchases.\n\n\
         Aspirations:\n{}",
        listing.join("\n")
    )
}

fn news_prompt(points: &str) -> String {
    format!(
        "Write a short news article of three to four paragraphs for a school \
         news portal based on the points below. Keep it informative and \
         neutral, in a journalistic style that students find easy to read. \
         Points: \"{points}\""
    )
}
