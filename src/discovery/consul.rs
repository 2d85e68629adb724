use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::discovery::backend::{
    Backend, QueryOptions, Registration, ServiceEntry, TreeEntry,
};
use crate::error::ServiceError;

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
struct ConsulService {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default, deserialize_with = "deserialize_null_default")]
    tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConsulCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(rename = "Status")]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ConsulHealthEntry {
    #[serde(rename = "Service")]
    service: ConsulService,
    #[serde(rename = "Checks", default)]
    checks: Vec<ConsulCheck>,
}

#[derive(Debug, Serialize)]
struct ConsulCheckRegistration {
    #[serde(rename = "CheckID", skip_serializing_if = "Option::is_none")]
    check_id: Option<String>,
    #[serde(rename = "TTL")]
    ttl: String,
}

#[derive(Debug, Serialize)]
struct ConsulRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Address")]
    address: &'a str,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags")]
    tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ConsulKvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default, deserialize_with = "deserialize_null_default")]
    value: Option<String>,
}

/// Adapter wrapping a Consul HTTP agent as a [`Backend`] (§9 design note:
/// "a local trait/interface `Backend` declaring only what the core
/// consumes; adapter structs wrap vendor clients").
#[derive(Clone)]
pub struct ConsulBackend {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
    datacenter: Option<String>,
}

impl ConsulBackend {
    pub fn new(address: &str, token: Option<String>, datacenter: Option<String>) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(65))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build consul http client");

        Self {
            base_url,
            client,
            token,
            datacenter,
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("X-Consul-Token", token),
            None => req,
        }
    }
}

#[async_trait]
impl Backend for ConsulBackend {
    async fn service(
        &self,
        name: &str,
        tag: Option<&str>,
        passing_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, u64), ServiceError> {
        let mut url = format!("{}/v1/health/service/{}?wait=60s", self.base_url, name);
        url.push_str(&format!("&index={}", opts.wait_index));
        if passing_only {
            url.push_str("&passing=true");
        }
        if let Some(tag) = tag {
            url.push_str(&format!("&tag={tag}"));
        }
        let dc = opts.datacenter.as_ref().or(self.datacenter.as_ref());
        if let Some(dc) = dc {
            url.push_str(&format!("&dc={dc}"));
        }

        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ServiceError::Backend(format!(
                "consul service query failed: status={}",
                resp.status()
            )));
        }

        let new_index: u64 = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(opts.wait_index);

        let entries: Vec<ConsulHealthEntry> = resp
            .json()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        let instances = entries
            .into_iter()
            .filter(|entry| {
                !entry
                    .checks
                    .iter()
                    .any(|c| c.check_id == "serfHealth" && c.status == "critical")
            })
            .map(|entry| ServiceEntry {
                address: entry.service.address,
                port: entry.service.port,
                tags: entry.service.tags,
            })
            .collect();

        Ok((instances, new_index))
    }

    async fn datacenters(&self) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/v1/catalog/datacenters", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ServiceError::Backend(format!(
                "consul datacenters query failed: status={}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))
    }

    async fn register(&self, reg: &Registration) -> Result<(), ServiceError> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        let body = ConsulRegistration {
            id: &reg.id,
            name: &reg.name,
            address: &reg.address,
            port: reg.port,
            tags: &reg.tags,
        };

        let resp = self
            .authed(self.client.put(&url).json(&body))
            .send()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Backend(format!(
                "register failed: {status} - {body}"
            )));
        }
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), ServiceError> {
        let url = format!("{}/v1/agent/service/deregister/{id}", self.base_url);
        let resp = self
            .authed(self.client.put(&url))
            .send()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Backend(format!(
                "deregister failed: {status} - {body}"
            )));
        }
        Ok(())
    }

    async fn update_ttl(
        &self,
        check_id: &str,
        output: &str,
        passing: bool,
    ) -> Result<(), ServiceError> {
        let verb = if passing { "pass" } else { "fail" };
        let url = format!(
            "{}/v1/agent/check/{verb}/{check_id}?note={}",
            self.base_url,
            urlencoding_lite(output)
        );
        let resp = self
            .authed(self.client.put(&url))
            .send()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Err(ServiceError::Backend(format!("check {check_id} not found")));
        }
        if !resp.status().is_success() {
            return Err(ServiceError::Backend(format!(
                "update ttl failed: status={}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn entries(&self, path: &str) -> Result<Vec<TreeEntry>, ServiceError> {
        let url = format!("{}/v1/kv/{path}?recurse=true", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(ServiceError::Backend(format!(
                "kv list failed: status={}",
                resp.status()
            )));
        }

        let raw: Vec<ConsulKvEntry> = resp
            .json()
            .await
            .map_err(|e| ServiceError::Backend(e.to_string()))?;

        raw.into_iter()
            .map(|e| {
                let value = match e.value {
                    Some(v) => base64::engine::general_purpose::STANDARD
                        .decode(v)
                        .map_err(|err| ServiceError::Backend(err.to_string()))?,
                    None => Vec::new(),
                };
                Ok(TreeEntry { key: e.key, value })
            })
            .collect()
    }
}

fn urlencoding_lite(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '&' => "%26".to_string(),
            '=' => "%3D".to_string(),
            other => other.to_string(),
        })
        .collect()
}
