use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::cosmos::provider::ProviderError;

pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible image generation endpoint.
pub struct ImageStudio {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    enabled: bool,
}

impl ImageStudio {
    pub fn new(api_key: String, model: String, base_url: String, timeout: std::time::Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_key,
            model,
            base_url,
            enabled: true,
        })
    }

    pub fn disabled() -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: String::new(),
            model: String::new(),
            base_url: String::new(),
            enabled: false,
        }
    }

    pub async fn render(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::ImagesDisabled);
        }
        log::info!("Rendering illustration: {:?}", prompt);

        let request_body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": "1792x1024",
            "response_format": "b64_json"
        });

        let response = self
            .http_client
            .post(format!("{}/images/generations", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                service: "images",
                status,
                body,
            });
        }

        let response_body: serde_json::Value = response.json().await?;
        decode_image(&response_body)
    }
}

fn decode_image(response_body: &serde_json::Value) -> Result<Vec<u8>, ProviderError> {
    let encoded = response_body["data"][0]["b64_json"]
        .as_str()
        .ok_or(ProviderError::NoImage)?;
    STANDARD
        .decode(encoded)
        .map_err(|_| ProviderError::NoImage)
}
