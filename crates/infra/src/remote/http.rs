//! `reqwest`-backed remote authority client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::{RemoteConfig, RemoteCredentials};

use super::{
    InvitationCheck, KeyCheck, OutboundDecision, OutboundInvitation, OutboundOnboarding, RemoteAuthority,
    RemoteError, RemoteResult,
};

/// Remote authority over HTTP with operator credentials injected per call.
#[derive(Debug, Clone)]
pub struct HttpRemoteAuthority {
    client: Client,
    base_url: Url,
    credentials: RemoteCredentials,
}

impl HttpRemoteAuthority {
    pub fn new(config: &RemoteConfig, timeout: Duration) -> RemoteResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| RemoteError::Transport(format!("bad base url: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            credentials: config.credentials.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            RemoteCredentials::None => request,
            RemoteCredentials::Basic { username, password } => request.basic_auth(username, Some(password)),
            RemoteCredentials::Bearer(token) => request.bearer_auth(token),
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorize(request).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body: truncate(body),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> RemoteResult<Response> {
        let url = self.endpoint(segments)?;
        self.send(self.client.post(url).json(body)).await
    }

    async fn decode<R: DeserializeOwned>(response: Response) -> RemoteResult<R> {
        response.json::<R>().await.map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn create_invitation(&self, invitation: &OutboundInvitation) -> RemoteResult<()> {
        self.post(&["admin", "create-invitation"], invitation).await.map(drop)
    }

    async fn validate_invitation(&self, code: &str, pin: Option<&str>, email: Option<&str>) -> RemoteResult<InvitationCheck> {
        let mut body = json!({ "code": code });
        if let Some(pin) = pin {
            body["pin"] = Value::String(pin.to_string());
        }
        if let Some(email) = email {
            body["email"] = Value::String(email.to_string());
        }
        let response = self.post(&["validate-invitation"], &body).await?;
        Self::decode(response).await
    }

    async fn submit_onboarding(&self, submission: &OutboundOnboarding) -> RemoteResult<()> {
        self.post(&["submit-onboarding"], submission).await.map(drop)
    }

    async fn validate_key(&self, key: &str) -> RemoteResult<KeyCheck> {
        let response = self.post(&["validate-key"], &json!({ "key": key })).await?;
        Self::decode(response).await
    }

    async fn approve_membership(&self, decision: &OutboundDecision) -> RemoteResult<()> {
        self.post(&["admin", "approve-membership"], decision).await.map(drop)
    }

    async fn membership_status(&self, email: &str) -> RemoteResult<Value> {
        let url = self.endpoint(&["admin", "membership-status", email])?;
        let response = self.send(self.client.get(url)).await?;
        Self::decode(response).await
    }
}

fn map_reqwest_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(err.to_string())
    }
}

fn truncate(mut body: String) -> String {
    const MAX: usize = 256;
    if body.len() > MAX {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, credentials: RemoteCredentials, timeout: Duration) -> HttpRemoteAuthority {
        HttpRemoteAuthority::new(
            &RemoteConfig {
                base_url: server.uri(),
                credentials,
            },
            timeout,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_invitation_posts_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/create-invitation"))
            .and(header("authorization", "Basic dTpw"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let remote = client(
            &server,
            RemoteCredentials::Basic {
                username: "u".into(),
                password: "p".into(),
            },
            Duration::from_secs(2),
        );
        let invitation = OutboundInvitation {
            code: "CODE1".into(),
            pin: "123456".into(),
            invited_name: Some("A B".into()),
            email: Some("a@b.com".into()),
            expires_at: Utc::now(),
            status: "pending",
        };
        remote.create_invitation(&invitation).await.unwrap();
    }

    #[tokio::test]
    async fn validate_key_decodes_user_name_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate-key"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({"key": "MEMBER-abcdef-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true, "user_name": "Remote"})))
            .mount(&server)
            .await;

        let remote = client(&server, RemoteCredentials::Bearer("tok".into()), Duration::from_secs(2));
        let check = remote.validate_key("MEMBER-abcdef-1").await.unwrap();
        assert!(check.valid);
        assert_eq!(check.user_name.as_deref(), Some("Remote"));
    }

    #[tokio::test]
    async fn validate_invitation_sends_only_supplied_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate-invitation"))
            .and(body_json(json!({"code": "C1", "pin": "123456"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true})))
            .mount(&server)
            .await;

        let remote = client(&server, RemoteCredentials::None, Duration::from_secs(2));
        assert!(remote.validate_invitation("C1", Some("123456"), None).await.unwrap().valid);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit-onboarding"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let remote = client(&server, RemoteCredentials::None, Duration::from_secs(2));
        let err = remote
            .submit_onboarding(&OutboundOnboarding {
                code: "C1".into(),
                voice_consent: true,
                responses: json!("answers"),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                status: 503,
                body: "down".into()
            }
        );
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/approve-membership"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let remote = client(&server, RemoteCredentials::None, Duration::from_millis(50));
        let err = remote
            .approve_membership(&OutboundDecision {
                invitation_code: "C1".into(),
                approved: true,
                membership_key: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Timeout);
    }

    #[tokio::test]
    async fn membership_status_uses_email_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/membership-status/a@b.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "active"})))
            .mount(&server)
            .await;

        let remote = client(&server, RemoteCredentials::None, Duration::from_secs(2));
        let status = remote.membership_status("a@b.com").await.unwrap();
        assert_eq!(status["status"], "active");
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let remote = client(&server, RemoteCredentials::None, Duration::from_secs(2));
        assert!(matches!(remote.validate_key("k").await, Err(RemoteError::Decode(_))));
    }
}
