//! Cloud Foundry v2 API client
//!
//! Logs in through the UAA password grant advertised by `/v2/info`, lists
//! the apps of one org/space, and updates instance counts.

use crate::error::PlatformError;
use crate::platform::{Namespace, PlatformApp, PlatformClient, Session};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// OAuth client id the cf CLI uses for password grants
const CF_OAUTH_CLIENT: &str = "cf";

#[derive(Debug, Deserialize)]
struct InfoResponse {
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    next_url: Option<String>,
    resources: Vec<Resource<T>>,
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    metadata: Metadata,
    entity: T,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AppEntity {
    name: String,
    instances: u32,
}

pub struct CloudFoundryClient {
    api_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl CloudFoundryClient {
    pub fn new(
        api_url: &str,
        username: String,
        password: String,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Request {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            username,
            password,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
    ) -> Result<T, PlatformError> {
        debug!(path = %path, "GET");
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(session.token())
            .send()
            .await?;
        read_json(response).await
    }

    /// GUID of the single resource under `path` called `name`
    async fn find_one(
        &self,
        session: &Session,
        path: &str,
        kind: &'static str,
        name: &str,
    ) -> Result<String, PlatformError> {
        debug!(path = %path, name = %name, "Looking up {}", kind);
        let response = self
            .client
            .get(self.url(path))
            .query(&[("q", format!("name:{}", name))])
            .bearer_auth(session.token())
            .send()
            .await?;
        let page: Page<NamedEntity> = read_json(response).await?;

        page.resources
            .into_iter()
            .find(|r| r.entity.name == name)
            .map(|r| r.metadata.guid)
            .ok_or_else(|| PlatformError::NotFound {
                kind,
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl PlatformClient for CloudFoundryClient {
    async fn authenticate(&self) -> Result<Session, PlatformError> {
        let response = self.client.get(self.url("/v2/info")).send().await?;
        let info: InfoResponse = read_json(response).await?;

        let token_url = format!("{}/oauth/token", info.token_endpoint.trim_end_matches('/'));
        debug!(token_url = %token_url, user = %self.username, "Requesting access token");

        let response = self
            .client
            .post(&token_url)
            .basic_auth(CF_OAUTH_CLIENT, Some(""))
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        // UAA answers bad credentials with 400/401
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Unauthorized { message: body });
        }

        let token: TokenResponse = read_json(response).await?;
        Ok(Session::new(token.access_token))
    }

    async fn list_apps(
        &self,
        session: &Session,
        namespace: &Namespace,
    ) -> Result<Vec<PlatformApp>, PlatformError> {
        let org_guid = self
            .find_one(session, "/v2/organizations", "organization", &namespace.org)
            .await?;
        let space_guid = self
            .find_one(
                session,
                &format!("/v2/organizations/{}/spaces", org_guid),
                "space",
                &namespace.space,
            )
            .await?;

        let mut apps = Vec::new();
        let mut next = Some(format!("/v2/spaces/{}/apps", space_guid));
        while let Some(path) = next {
            let page: Page<AppEntity> = self.get_json(session, &path).await?;
            apps.extend(page.resources.into_iter().map(|r| PlatformApp {
                name: r.entity.name,
                id: r.metadata.guid,
                instances: r.entity.instances,
            }));
            next = page.next_url;
        }

        Ok(apps)
    }

    async fn set_instance_count(
        &self,
        session: &Session,
        app_id: &str,
        instances: u32,
    ) -> Result<(), PlatformError> {
        let response = self
            .client
            .put(self.url(&format!("/v2/apps/{}", app_id)))
            .bearer_auth(session.token())
            .json(&json!({ "instances": instances }))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read body>".to_string());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(PlatformError::Unauthorized { message: body })
    } else {
        Err(PlatformError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, PlatformError> {
    check_status(response)
        .await?
        .json()
        .await
        .map_err(|e| PlatformError::InvalidResponse {
            message: e.to_string(),
        })
}
