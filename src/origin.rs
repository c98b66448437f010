use async_trait::async_trait;
use log::debug;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::config::Context;
use crate::flag::{Flag, TargetingRule};
use crate::FlagError;

/// The two authoritative sources consulted on a cache miss.
#[async_trait]
pub trait Origin {
    async fn fetch_flag(&self, flag_name: &str) -> Result<Flag, FlagError>;
    async fn fetch_rule(&self, flag_name: &str) -> Result<TargetingRule, FlagError>;
}

#[derive(Debug, Clone)]
struct ServiceEndpoint {
    service: &'static str,
    base_url: Url,
    resource: &'static str,
}

impl ServiceEndpoint {
    /// `{base}/{resource}/{flag_name}`, with the flag name encoded as one segment.
    fn url_for(&self, flag_name: &str) -> Result<Url, FlagError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FlagError::ConfigError(format!("{} URL cannot be a base", self.service)))?
            .pop_if_empty()
            .push(self.resource)
            .push(flag_name);
        Ok(url)
    }
}

/// HTTP clients for the flag service (`/flags/{name}`) and the targeting
/// service (`/rules/{name}`).
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    http_client: reqwest::Client,
    flags: ServiceEndpoint,
    rules: ServiceEndpoint,
}

impl HttpOrigin {
    pub fn new(context: &Context) -> Self {
        Self {
            http_client: context.http_client.clone(),
            flags: ServiceEndpoint {
                service: "flag-service",
                base_url: context.flag_service_url.clone(),
                resource: "flags",
            },
            rules: ServiceEndpoint {
                service: "targeting-service",
                base_url: context.targeting_service_url.clone(),
                resource: "rules",
            },
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        endpoint: &ServiceEndpoint,
        flag_name: &str,
    ) -> Result<T, FlagError> {
        let url = endpoint.url_for(flag_name)?;
        debug!("GET {} ({})", url, endpoint.service);

        let response = self.http_client.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                Ok(serde_json::from_slice(&body)?)
            }
            StatusCode::NOT_FOUND => Err(FlagError::NotFound(flag_name.to_string())),
            status => Err(FlagError::StatusError {
                service: endpoint.service,
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch_flag(&self, flag_name: &str) -> Result<Flag, FlagError> {
        self.fetch_json(&self.flags, flag_name).await
    }

    async fn fetch_rule(&self, flag_name: &str) -> Result<TargetingRule, FlagError> {
        self.fetch_json(&self.rules, flag_name).await
    }
}
