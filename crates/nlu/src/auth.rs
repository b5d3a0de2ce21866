use cxbridge_core::policy::CallPolicy;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::api::ApiError;
use crate::http::decode;

const CONTEXT: &str = "Failed to get access token";

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// Client-credentials grant against `{auth_endpoint}/oauth/token`.
pub async fn fetch_access_token(
    client: &reqwest::Client,
    auth_endpoint: &str,
    client_id: &str,
    client_secret: &SecretString,
    policy: &CallPolicy,
) -> Result<SecretString, ApiError> {
    let url = format!("{}/oauth/token", auth_endpoint.trim_end_matches('/'));
    let url = url.as_str();

    let token: TokenResponse = policy
        .run(CONTEXT, move || async move {
            let response = client
                .post(url)
                .basic_auth(client_id, Some(client_secret.expose_secret()))
                .form(&[("grant_type", "client_credentials")])
                .send()
                .await
                .map_err(|error| ApiError::request(CONTEXT, error))?;
            decode(CONTEXT, response).await
        })
        .await?;

    if token.access_token.is_empty() {
        return Err(ApiError::Decode {
            context: CONTEXT,
            message: "token endpoint returned an empty access token".to_owned(),
        });
    }

    info!(event_name = "nlu.auth.token_acquired", client_id, "platform access token acquired");
    Ok(token.access_token.into())
}
