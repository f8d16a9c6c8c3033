//! Scatter/gather client of the `ps` service.
//!
//! A call is sent to every registered node at once. Nodes answering `ignored`, failing, or
//! returning something undecodable contribute nothing; the authoritative answers are merged.

use crate::collab::coordination::Coordinator;
use crate::pattern::{Pattern, UserAndEventsInfo};
use crate::rpc::envelope::{decode_response, encode_request};
use crate::rpc::*;
use crate::topology::{ModelId, ModelInfo};
use anyhow::Result;
use log::{debug, error};
use reqwest::{Client, header::CONTENT_TYPE};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

pub struct PatternClient<C> {
    coordinator: Arc<C>,
    http: Client,
}

async fn call_node<R: RpcResponse>(
    http: Client,
    url: String,
    req_id: String,
    body: Vec<u8>,
) -> Result<R> {
    let response = http
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .header(REQUEST_ID_HEADER, req_id)
        .body(body)
        .send()
        .await?;

    let bytes = response.bytes().await?;
    decode_response(&bytes)
}

fn decode_patterns(response: &PatternsResponse) -> Result<Vec<Pattern>, serde_json::Error> {
    response
        .patterns
        .iter()
        .map(|raw| serde_json::from_str(raw.get()))
        .collect()
}

fn union(lists: impl IntoIterator<Item = Vec<String>>) -> Vec<String> {
    lists
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl<C> PatternClient<C>
where
    C: Coordinator + Send + Sync + 'static,
{
    pub fn new(coordinator: Arc<C>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self { coordinator, http })
    }

    /// Sends `request` to every registered node and returns the authoritative answers.
    ///
    /// Fails only when the node list cannot be read or the request cannot be encoded.
    pub async fn scatter<R>(&self, req_id: Option<&str>, request: &R) -> Result<Vec<R::Response>>
    where
        R: RpcRequest,
    {
        let method = R::METHOD.qualified_name();
        let body = encode_request(&method, request)?;
        let req_id = req_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let addresses = self.coordinator.registered_nodes().await?;

        let mut tasks = JoinSet::new();
        for address in addresses {
            let http = self.http.clone();
            let url = format!("http://{address}{RPC_ENDPOINT}");
            let req_id = req_id.clone();
            let body = body.clone();

            tasks.spawn(async move {
                let result = call_node::<R::Response>(http, url, req_id, body).await;
                (address, result)
            });
        }

        let mut responses = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (address, result) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    error!("{method} req_id={req_id}: node task failed: {e}");
                    continue;
                }
            };

            match result {
                Ok(response) if response.header().ignored => {
                    debug!("{method} req_id={req_id}: {address} ignored the request");
                }
                Ok(response) => match response.header().error {
                    Some(e) => error!("{method} req_id={req_id}: {address} failed: {e}"),
                    None => responses.push(response),
                },
                Err(e) => error!("{method} req_id={req_id}: dropping {address}: {e:#}"),
            }
        }

        Ok(responses)
    }

    async fn gather_patterns<R>(&self, req_id: Option<&str>, request: &R) -> Result<Vec<Pattern>>
    where
        R: RpcRequest<Response = PatternsResponse>,
    {
        let mut patterns = Vec::new();

        for response in self.scatter(req_id, request).await? {
            match decode_patterns(&response) {
                Ok(decoded) => patterns.extend(decoded),
                Err(e) => error!(
                    "Dropping patterns of project {} model {}: {e}",
                    response.project_id, response.model_id
                ),
            }
        }

        Ok(patterns)
    }

    pub async fn get_all_patterns(
        &self,
        req_id: Option<&str>,
        request: &GetAllPatternsRequest,
    ) -> Result<Vec<Pattern>> {
        self.gather_patterns(req_id, request).await
    }

    pub async fn get_all_containing_patterns(
        &self,
        req_id: Option<&str>,
        request: &GetAllContainingPatternsRequest,
    ) -> Result<Vec<Pattern>> {
        self.gather_patterns(req_id, request).await
    }

    pub async fn get_patterns(
        &self,
        req_id: Option<&str>,
        request: &GetPatternsRequest,
    ) -> Result<Vec<Pattern>> {
        self.gather_patterns(req_id, request).await
    }

    pub async fn get_count_of_pattern(
        &self,
        req_id: Option<&str>,
        request: &GetCountOfPatternRequest,
    ) -> Result<u64> {
        let responses = self.scatter(req_id, request).await?;
        Ok(responses.iter().map(|r| r.count).sum())
    }

    pub async fn get_total_event_count(
        &self,
        req_id: Option<&str>,
        request: &GetTotalEventCountRequest,
    ) -> Result<u64> {
        let responses = self.scatter(req_id, request).await?;
        Ok(responses.iter().map(|r| r.total_event_count).sum())
    }

    /// Event info of the model together with the model id it was resolved to. Model id 0 means no
    /// node answered for it.
    pub async fn get_user_and_events_info(
        &self,
        req_id: Option<&str>,
        request: &GetUserAndEventsInfoRequest,
    ) -> Result<(UserAndEventsInfo, ModelId)> {
        let mut merged = UserAndEventsInfo::default();
        let mut model_id = 0;

        for response in self.scatter(req_id, request).await? {
            let info = response.user_and_events_info;
            merged.user_properties_info = info.user_properties_info;
            merged
                .event_properties_info_map
                .extend(info.event_properties_info_map);
            merged.model_version = info.model_version;
            model_id = response.model_id;
        }

        Ok((merged, model_id))
    }

    /// Numeric and categorical property keys of an event.
    pub async fn get_seen_event_properties(
        &self,
        req_id: Option<&str>,
        request: &GetSeenEventPropertiesRequest,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let responses = self.scatter(req_id, request).await?;
        Ok(merge_properties(responses))
    }

    /// Numeric and categorical user property keys.
    pub async fn get_seen_user_properties(
        &self,
        req_id: Option<&str>,
        request: &GetSeenUserPropertiesRequest,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let responses = self.scatter(req_id, request).await?;
        Ok(merge_properties(responses))
    }

    pub async fn get_seen_event_property_values(
        &self,
        req_id: Option<&str>,
        request: &GetSeenEventPropertyValuesRequest,
    ) -> Result<Vec<String>> {
        let responses = self.scatter(req_id, request).await?;
        Ok(union(responses.into_iter().map(|r| r.values)))
    }

    pub async fn get_seen_user_property_values(
        &self,
        req_id: Option<&str>,
        request: &GetSeenUserPropertyValuesRequest,
    ) -> Result<Vec<String>> {
        let responses = self.scatter(req_id, request).await?;
        Ok(union(responses.into_iter().map(|r| r.values)))
    }

    pub async fn get_project_models_intervals(
        &self,
        req_id: Option<&str>,
        request: &GetProjectModelsIntervalsRequest,
    ) -> Result<Vec<ModelInfo>> {
        let responses = self.scatter(req_id, request).await?;
        Ok(responses.into_iter().flat_map(|r| r.intervals).collect())
    }
}

fn merge_properties(responses: Vec<SeenPropertiesResponse>) -> (Vec<String>, Vec<String>) {
    let (numeric, categorical): (Vec<_>, Vec<_>) = responses
        .into_iter()
        .map(|r| (r.numeric_properties, r.categorical_properties))
        .unzip();

    (union(numeric), union(categorical))
}
