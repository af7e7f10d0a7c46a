use crate::error::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferEmail {
    pub subject: String,
    pub body: String,
}

#[derive(Clone)]
pub struct AIService {
    client: Client,
    api_key: Option<String>,
}

impl AIService {
    pub fn new(api_key: Option<String>, client: Client) -> Self {
        Self { client, api_key }
    }

    /// Never fails: without an API key, or when the model misbehaves, the local
    /// template is used instead.
    pub async fn draft_offer_email(
        &self,
        candidate_name: &str,
        job_name: &str,
        feedback_summary: &str,
    ) -> Result<OfferEmail> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(fallback_offer_email(candidate_name, job_name));
        };

        let system_prompt = "You are an HR specialist writing job offer emails. \
            Write a warm, professional offer email to the candidate. Mention strengths from the interview feedback \
            without quoting scores. Return a JSON object with the fields 'subject' and 'body'.";

        let user_data = serde_json::json!({
            "candidate_name": candidate_name,
            "job_name": job_name,
            "feedback_summary": feedback_summary,
        });

        let payload = serde_json::json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_data.to_string()}
            ],
            "response_format": { "type": "json_object" }
        });

        match self.chat_openai(api_key, payload).await {
            Ok(resp) => {
                let subject = resp.get("subject").and_then(|v| v.as_str()).map(str::trim);
                let body = resp.get("body").and_then(|v| v.as_str()).map(str::trim);
                if let (Some(subject), Some(body)) = (subject, body) {
                    if !subject.is_empty() && !body.is_empty() {
                        return Ok(OfferEmail {
                            subject: subject.to_string(),
                            body: body.to_string(),
                        });
                    }
                }
                tracing::warn!("Offer draft had no usable subject/body, using template");
            }
            Err(e) => tracing::error!("Offer drafting failed: {:?}", e),
        }

        Ok(fallback_offer_email(candidate_name, job_name))
    }

    async fn chat_openai(&self, api_key: &str, payload: JsonValue) -> Result<JsonValue> {
        let res = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(api_key)
            .json(&payload)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("OpenAI API Error {}: {}", status, text).into());
        }

        let body: JsonValue = res.json().await?;

        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .and_then(|s| serde_json::from_str(s).ok())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response format").into())
    }
}

pub fn fallback_offer_email(candidate_name: &str, job_name: &str) -> OfferEmail {
    OfferEmail {
        subject: format!("Your offer for the {} position", job_name),
        body: format!(
            "Dear {},\n\nThank you for the time you spent with us during the interviews. \
             We are delighted to offer you the {} position.\n\n\
             Our HR team will contact you shortly with the details of the offer and the next steps.\n\n\
             Best regards,\nThe Recruitment Team",
            candidate_name, job_name
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn without_a_key_the_template_is_used() {
        let ai = AIService::new(None, Client::new());
        let email = ai
            .draft_offer_email("Aiko Tanaka", "Backend Engineer", "strong system design")
            .await
            .unwrap();
        assert_eq!(email, fallback_offer_email("Aiko Tanaka", "Backend Engineer"));
        assert!(email.subject.contains("Backend Engineer"));
        assert!(email.body.starts_with("Dear Aiko Tanaka,"));
    }
}
