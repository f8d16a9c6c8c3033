use crate::collab::state::{StateManager, StateSnapshot};
use crate::pattern::{PatternWithMeta, PropertiesInfo, UserAndEventsInfo};
use crate::rpc::envelope::RequestEnvelope;
use crate::rpc::filters::{contains_event, matches_any, matches_start_end};
use crate::rpc::*;
use crate::store::files::{FileManager, Storage};
use crate::store::{ChunkPatterns, PatternStore};
use crate::topology::{ModelId, ProjectId, Topology, TopologySource, model_info};
use futures::future::try_join_all;
use log::debug;
use serde_json::value::{RawValue, to_raw_value};
use std::sync::Arc;

/// Failure to even decode a call, as opposed to a handler level [`RpcError`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error(transparent)]
    Envelope(#[from] crate::rpc::envelope::EnvelopeError),
}

fn header(project_id: ProjectId, model_id: ModelId, ignored: bool) -> ResponseHeader {
    ResponseHeader {
        project_id,
        model_id,
        ignored,
        error: None,
    }
}

fn ignored<R: RpcResponse>(project_id: ProjectId, model_id: ModelId) -> R {
    let mut response = R::default();
    response.set_header(header(project_id, model_id, true));
    response
}

fn require(value: &str, name: &str) -> Result<(), RpcError> {
    if value.trim().is_empty() {
        return Err(RpcError::InvalidArgument(format!("{name} is required")));
    }
    Ok(())
}

fn all_patterns(chunks: &[ChunkPatterns]) -> impl Iterator<Item = &PatternWithMeta> {
    chunks.iter().flat_map(|chunk| chunk.iter())
}

fn event_properties<'a>(
    info: &'a UserAndEventsInfo,
    event_name: &str,
) -> Result<&'a PropertiesInfo, RpcError> {
    info.event_properties_info_map
        .get(event_name)
        .ok_or_else(|| RpcError::NotFound(format!("event '{event_name}' not found in model")))
}

/// The `ps` service of one node: answers for the data this node is authoritative for and flags
/// everything else as ignored.
pub struct PatternService<T = Topology, F = Storage> {
    state: Arc<StateManager>,
    store: Arc<PatternStore<F>>,
    topology: Arc<T>,
}

impl<T, F> PatternService<T, F>
where
    T: TopologySource + Send + Sync + 'static,
    F: FileManager + Send + Sync + 'static,
{
    pub fn new(state: Arc<StateManager>, store: Arc<PatternStore<F>>, topology: Arc<T>) -> Self {
        Self {
            state,
            store,
            topology,
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn store(&self) -> &Arc<PatternStore<F>> {
        &self.store
    }

    /// Validates the project and resolves model id 0 to the latest model of the project.
    async fn resolve_model(
        &self,
        project_id: ProjectId,
        model_id: ModelId,
    ) -> Result<ModelId, RpcError> {
        if project_id == 0 {
            return Err(RpcError::InvalidArgument("invalid project id 0".to_string()));
        }

        if model_id != 0 {
            return Ok(model_id);
        }

        let latest = self
            .topology
            .latest_model_interval(project_id)
            .await
            .map_err(|e| RpcError::TopologyLookup(e.to_string()))?;

        debug!("Resolved latest model of project {project_id} to {}", latest.model_id);
        Ok(latest.model_id)
    }

    /// Every chunk of the model this node owns, or `None` when it owns none of them.
    async fn owned_chunk_patterns(
        &self,
        snapshot: &StateSnapshot,
        project_id: ProjectId,
        model_id: ModelId,
    ) -> Result<Option<Vec<ChunkPatterns>>, RpcError> {
        let chunk_ids = snapshot.owned_chunks(project_id, model_id);
        if chunk_ids.is_empty() {
            return Ok(None);
        }

        let chunks = try_join_all(chunk_ids.iter().map(|chunk_id| {
            self.store
                .get_patterns_with_meta(project_id, model_id, chunk_id)
        }))
        .await?;

        Ok(Some(chunks))
    }

    /// Event info of the model, or `None` when another node is authoritative for it.
    async fn owned_event_info(
        &self,
        snapshot: &StateSnapshot,
        project_id: ProjectId,
        model_id: ModelId,
    ) -> Result<Option<Arc<UserAndEventsInfo>>, RpcError> {
        if !snapshot.serves_model(project_id, model_id) {
            return Ok(None);
        }

        Ok(Some(
            self.store
                .get_model_event_info(project_id, model_id)
                .await?,
        ))
    }

    async fn filtered_patterns(
        &self,
        project_id: ProjectId,
        model_id: ModelId,
        keep: impl Fn(&PatternWithMeta) -> bool,
    ) -> Result<PatternsResponse, RpcError> {
        let snapshot = self.state.snapshot();
        let model_id = self.resolve_model(project_id, model_id).await?;

        let Some(chunks) = self
            .owned_chunk_patterns(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let patterns: Vec<Box<RawValue>> = all_patterns(&chunks)
            .filter(|pattern| keep(pattern))
            .map(|pattern| pattern.raw_pattern.raw().to_owned())
            .collect();

        let mut response = PatternsResponse {
            patterns,
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_all_patterns(
        &self,
        request: GetAllPatternsRequest,
    ) -> Result<PatternsResponse, RpcError> {
        let GetAllPatternsRequest {
            project_id,
            model_id,
            start_event,
            end_event,
        } = request;

        self.filtered_patterns(project_id, model_id, |pattern| {
            matches_start_end(&pattern.pattern_events, &start_event, &end_event)
        })
        .await
    }

    pub async fn get_all_containing_patterns(
        &self,
        request: GetAllContainingPatternsRequest,
    ) -> Result<PatternsResponse, RpcError> {
        require(&request.event, "event name")?;

        self.filtered_patterns(request.project_id, request.model_id, |pattern| {
            contains_event(&pattern.pattern_events, &request.event)
        })
        .await
    }

    pub async fn get_patterns(
        &self,
        request: GetPatternsRequest,
    ) -> Result<PatternsResponse, RpcError> {
        self.filtered_patterns(request.project_id, request.model_id, |pattern| {
            matches_any(&pattern.pattern_events, &request.pattern_events)
        })
        .await
    }

    pub async fn get_count_of_pattern(
        &self,
        request: GetCountOfPatternRequest,
    ) -> Result<CountOfPatternResponse, RpcError> {
        if request.pattern_events.is_empty() {
            return Err(RpcError::InvalidArgument("pattern events are required".to_string()));
        }

        let snapshot = self.state.snapshot();
        let project_id = request.project_id;
        let model_id = self.resolve_model(project_id, request.model_id).await?;

        let Some(chunks) = self
            .owned_chunk_patterns(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let mut count = 0;
        let matching = all_patterns(&chunks).filter(|p| p.pattern_events == request.pattern_events);
        for pattern in matching {
            count += pattern.raw_pattern.decode()?.per_occurrence_count;
        }

        let mut response = CountOfPatternResponse {
            count,
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_total_event_count(
        &self,
        request: GetTotalEventCountRequest,
    ) -> Result<TotalEventCountResponse, RpcError> {
        let snapshot = self.state.snapshot();
        let project_id = request.project_id;
        let model_id = self.resolve_model(project_id, request.model_id).await?;

        let Some(chunks) = self
            .owned_chunk_patterns(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let mut total_event_count = 0;
        for pattern in all_patterns(&chunks).filter(|p| p.pattern_events.len() == 1) {
            total_event_count += pattern.raw_pattern.decode()?.per_occurrence_count;
        }

        let mut response = TotalEventCountResponse {
            total_event_count,
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_user_and_events_info(
        &self,
        request: GetUserAndEventsInfoRequest,
    ) -> Result<UserAndEventsInfoResponse, RpcError> {
        let snapshot = self.state.snapshot();
        let project_id = request.project_id;
        let model_id = self.resolve_model(project_id, request.model_id).await?;

        let Some(info) = self
            .owned_event_info(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let mut response = UserAndEventsInfoResponse {
            user_and_events_info: info.as_ref().clone(),
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_seen_event_properties(
        &self,
        request: GetSeenEventPropertiesRequest,
    ) -> Result<SeenPropertiesResponse, RpcError> {
        require(&request.event_name, "event name")?;

        let snapshot = self.state.snapshot();
        let project_id = request.project_id;
        let model_id = self.resolve_model(project_id, request.model_id).await?;

        let Some(info) = self
            .owned_event_info(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let properties = event_properties(&info, &request.event_name)?;

        let mut response = SeenPropertiesResponse {
            numeric_properties: properties.numeric_property_keys(),
            categorical_properties: properties.categorical_property_keys(),
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_seen_user_properties(
        &self,
        request: GetSeenUserPropertiesRequest,
    ) -> Result<SeenPropertiesResponse, RpcError> {
        let snapshot = self.state.snapshot();
        let project_id = request.project_id;
        let model_id = self.resolve_model(project_id, request.model_id).await?;

        let Some(info) = self
            .owned_event_info(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let properties = &info.user_properties_info;

        let mut response = SeenPropertiesResponse {
            numeric_properties: properties.numeric_property_keys(),
            categorical_properties: properties.categorical_property_keys(),
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_seen_event_property_values(
        &self,
        request: GetSeenEventPropertyValuesRequest,
    ) -> Result<SeenPropertyValuesResponse, RpcError> {
        require(&request.event_name, "event name")?;
        require(&request.property_name, "property name")?;

        let snapshot = self.state.snapshot();
        let project_id = request.project_id;
        let model_id = self.resolve_model(project_id, request.model_id).await?;

        let Some(info) = self
            .owned_event_info(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let values =
            event_properties(&info, &request.event_name)?.values_of(&request.property_name);
        if values.is_empty() {
            return Err(RpcError::NotFound(format!(
                "no values seen for property '{}' of event '{}'",
                request.property_name, request.event_name
            )));
        }

        let mut response = SeenPropertyValuesResponse {
            values,
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_seen_user_property_values(
        &self,
        request: GetSeenUserPropertyValuesRequest,
    ) -> Result<SeenPropertyValuesResponse, RpcError> {
        require(&request.property_name, "property name")?;

        let snapshot = self.state.snapshot();
        let project_id = request.project_id;
        let model_id = self.resolve_model(project_id, request.model_id).await?;

        let Some(info) = self
            .owned_event_info(&snapshot, project_id, model_id)
            .await?
        else {
            return Ok(ignored(project_id, model_id));
        };

        let values = info.user_properties_info.values_of(&request.property_name);
        if values.is_empty() {
            return Err(RpcError::NotFound(format!(
                "no values seen for user property '{}'",
                request.property_name
            )));
        }

        let mut response = SeenPropertyValuesResponse {
            values,
            ..Default::default()
        };
        response.set_header(header(project_id, model_id, false));
        Ok(response)
    }

    pub async fn get_project_models_intervals(
        &self,
        request: GetProjectModelsIntervalsRequest,
    ) -> Result<ProjectModelsIntervalsResponse, RpcError> {
        let project_id = request.project_id;
        if project_id == 0 {
            return Err(RpcError::InvalidArgument("invalid project id 0".to_string()));
        }

        let snapshot = self.state.snapshot();
        if !snapshot.serves_project(project_id) {
            return Ok(ignored(project_id, 0));
        }

        let intervals = snapshot
            .topology
            .get(&project_id)
            .map(|models| {
                models
                    .iter()
                    .map(|(model_id, data)| model_info(*model_id, data))
                    .collect()
            })
            .unwrap_or_default();

        let mut response = ProjectModelsIntervalsResponse {
            intervals,
            ..Default::default()
        };
        response.set_header(header(project_id, 0, false));
        Ok(response)
    }

    /// Routes a decoded envelope to its handler and encodes the response.
    ///
    /// The outer error means the call itself was unusable; the inner one is the handler outcome.
    pub async fn dispatch(
        &self,
        envelope: &RequestEnvelope,
    ) -> Result<Result<EncodedResponse, RpcError>, DispatchError> {
        let method = Method::from_qualified_name(&envelope.method)
            .ok_or_else(|| DispatchError::UnknownMethod(envelope.method.clone()))?;

        let result = match method {
            Method::GetAllPatterns => encode(self.get_all_patterns(envelope.param()?).await),
            Method::GetAllContainingPatterns => {
                encode(self.get_all_containing_patterns(envelope.param()?).await)
            }
            Method::GetPatterns => encode(self.get_patterns(envelope.param()?).await),
            Method::GetCountOfPattern => encode(self.get_count_of_pattern(envelope.param()?).await),
            Method::GetTotalEventCount => {
                encode(self.get_total_event_count(envelope.param()?).await)
            }
            Method::GetUserAndEventsInfo => {
                encode(self.get_user_and_events_info(envelope.param()?).await)
            }
            Method::GetSeenEventProperties => {
                encode(self.get_seen_event_properties(envelope.param()?).await)
            }
            Method::GetSeenUserProperties => {
                encode(self.get_seen_user_properties(envelope.param()?).await)
            }
            Method::GetSeenEventPropertyValues => {
                encode(self.get_seen_event_property_values(envelope.param()?).await)
            }
            Method::GetSeenUserPropertyValues => {
                encode(self.get_seen_user_property_values(envelope.param()?).await)
            }
            Method::GetProjectModelsIntervals => {
                encode(self.get_project_models_intervals(envelope.param()?).await)
            }
        };

        Ok(result)
    }
}

/// A handler response, serialized, with its header kept for logging.
#[derive(Debug)]
pub struct EncodedResponse {
    pub header: ResponseHeader,
    pub body: Box<RawValue>,
}

fn encode<R: RpcResponse>(result: Result<R, RpcError>) -> Result<EncodedResponse, RpcError> {
    let response = result?;

    Ok(EncodedResponse {
        header: response.header(),
        body: to_raw_value(&response)?,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::topology::ProjectModelMetadata;
    use serde_json::json;

    // Event info files hold one JSON document per line
    fn event_info() -> String {
        json!({
            "UserPropertiesInfo": {
                "NumericPropertyKeys": {"age": true},
                "CategoricalPropertyKeyValues": {"country": {"IN": true, "US": true}, "empty": {}}
            },
            "EventPropertiesInfoMap": {
                "purchase": {
                    "NumericPropertyKeys": {"amount": true},
                    "CategoricalPropertyKeyValues": {"currency": {"USD": true}, "coupon": {}}
                }
            },
            "ModelVersion": 3
        })
        .to_string()
    }

    fn line(events: &[&str], count: u64) -> String {
        json!({"pe": events, "rp": {"en": events, "c": count, "uc": 1, "ouc": 1}}).to_string()
    }

    async fn setup() -> TestService {
        let t = single_node_service(vec![
            ProjectModelMetadata::example(1, 10, "1,2"),
            ProjectModelMetadata::example(1, 11, "1"),
        ]);

        let chunk_1 = [line(&["A", "B", "C"], 5), line(&["A", "B"], 7), line(&["A"], 10)];
        let chunk_2 = [line(&["B", "C"], 3), line(&["B"], 4)];
        let latest = [line(&["Z"], 1)];

        let disk = &t.files.disk;
        disk.put_chunk(1, 10, "1", &chunk_1.iter().map(String::as_str).collect::<Vec<_>>()).await;
        disk.put_chunk(1, 10, "2", &chunk_2.iter().map(String::as_str).collect::<Vec<_>>()).await;
        disk.put_chunk(1, 11, "1", &latest.iter().map(String::as_str).collect::<Vec<_>>()).await;
        disk.put_event_info(1, 10, &event_info()).await;

        t
    }

    fn events_of(response: &PatternsResponse) -> Vec<Vec<String>> {
        response
            .patterns
            .iter()
            .map(|raw| {
                let value: serde_json::Value = serde_json::from_str(raw.get()).unwrap();
                serde_json::from_value(value["en"].clone()).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_get_all_patterns_filters() {
        let t = setup().await;

        let all = t
            .service
            .get_all_patterns(GetAllPatternsRequest {
                project_id: 1,
                model_id: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!all.ignored);
        assert_eq!(all.patterns.len(), 5);

        let filtered = t
            .service
            .get_all_patterns(GetAllPatternsRequest {
                project_id: 1,
                model_id: 10,
                start_event: "A".to_string(),
                end_event: "C".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(events_of(&filtered), vec![vec!["A", "B", "C"]]);
    }

    #[tokio::test]
    async fn test_latest_model_is_resolved() {
        let t = setup().await;

        let response = t
            .service
            .get_all_patterns(GetAllPatternsRequest {
                project_id: 1,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.model_id, 11);
        assert_eq!(events_of(&response), vec![vec!["Z"]]);

        let unknown = t
            .service
            .get_all_patterns(GetAllPatternsRequest {
                project_id: 2,
                ..Default::default()
            })
            .await;
        assert!(matches!(unknown, Err(RpcError::TopologyLookup(_))));

        let invalid = t
            .service
            .get_all_patterns(GetAllPatternsRequest::default())
            .await;
        assert!(matches!(invalid, Err(RpcError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_exact_and_containing_patterns() {
        let t = setup().await;

        let exact = t
            .service
            .get_patterns(GetPatternsRequest {
                project_id: 1,
                model_id: 10,
                pattern_events: vec![vec!["A".to_string(), "B".to_string()]],
            })
            .await
            .unwrap();
        assert_eq!(events_of(&exact), vec![vec!["A", "B"]]);

        let containing = t
            .service
            .get_all_containing_patterns(GetAllContainingPatternsRequest {
                project_id: 1,
                model_id: 10,
                event: "C".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(containing.patterns.len(), 2);

        let missing_event = t
            .service
            .get_all_containing_patterns(GetAllContainingPatternsRequest {
                project_id: 1,
                model_id: 10,
                event: String::new(),
            })
            .await;
        assert!(matches!(missing_event, Err(RpcError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_counts() {
        let t = setup().await;

        let count = t
            .service
            .get_count_of_pattern(GetCountOfPatternRequest {
                project_id: 1,
                model_id: 10,
                pattern_events: vec!["A".to_string(), "B".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(count.count, 7);

        let total = t
            .service
            .get_total_event_count(GetTotalEventCountRequest {
                project_id: 1,
                model_id: 10,
            })
            .await
            .unwrap();
        assert_eq!(total.total_event_count, 14);
    }

    #[tokio::test]
    async fn test_unowned_model_is_ignored() {
        let t = setup().await;
        // Nobody else is in the cluster, dropping out leaves nothing owned
        t.service
            .state()
            .set_nodes(vec!["10.0.0.2:8100".to_string()]);

        let response = t
            .service
            .get_all_patterns(GetAllPatternsRequest {
                project_id: 1,
                model_id: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(response.ignored);
        assert!(response.patterns.is_empty());

        let info = t
            .service
            .get_user_and_events_info(GetUserAndEventsInfoRequest {
                project_id: 1,
                model_id: 10,
            })
            .await
            .unwrap();
        assert!(info.ignored);

        let intervals = t
            .service
            .get_project_models_intervals(GetProjectModelsIntervalsRequest { project_id: 1 })
            .await
            .unwrap();
        assert!(intervals.ignored);

        assert_eq!(t.files.disk.gets(), 0);
    }

    #[tokio::test]
    async fn test_event_info_queries() {
        let t = setup().await;

        let info = t
            .service
            .get_user_and_events_info(GetUserAndEventsInfoRequest {
                project_id: 1,
                model_id: 10,
            })
            .await
            .unwrap();
        assert_eq!(info.user_and_events_info.model_version, 3);

        let event = t
            .service
            .get_seen_event_properties(GetSeenEventPropertiesRequest {
                project_id: 1,
                model_id: 10,
                event_name: "purchase".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(event.numeric_properties, vec!["amount"]);
        assert_eq!(event.categorical_properties, vec!["coupon", "currency"]);

        let user = t
            .service
            .get_seen_user_properties(GetSeenUserPropertiesRequest {
                project_id: 1,
                model_id: 10,
            })
            .await
            .unwrap();
        assert_eq!(user.numeric_properties, vec!["age"]);
        assert_eq!(user.categorical_properties, vec!["country", "empty"]);

        let values = t
            .service
            .get_seen_user_property_values(GetSeenUserPropertyValuesRequest {
                project_id: 1,
                model_id: 10,
                property_name: "country".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(values.values, vec!["IN", "US"]);

        let values = t
            .service
            .get_seen_event_property_values(GetSeenEventPropertyValuesRequest {
                project_id: 1,
                model_id: 10,
                event_name: "purchase".to_string(),
                property_name: "currency".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(values.values, vec!["USD"]);

        // Read once, served from the cache afterwards
        assert_eq!(t.files.disk.gets(), 1);
    }

    #[tokio::test]
    async fn test_empty_values_are_not_found() {
        let t = setup().await;

        let empty = t
            .service
            .get_seen_user_property_values(GetSeenUserPropertyValuesRequest {
                project_id: 1,
                model_id: 10,
                property_name: "empty".to_string(),
            })
            .await;
        assert!(matches!(empty, Err(RpcError::NotFound(_))));

        let empty_event_property = t
            .service
            .get_seen_event_property_values(GetSeenEventPropertyValuesRequest {
                project_id: 1,
                model_id: 10,
                event_name: "purchase".to_string(),
                property_name: "coupon".to_string(),
            })
            .await;
        assert!(matches!(empty_event_property, Err(RpcError::NotFound(_))));

        let unknown_event = t
            .service
            .get_seen_event_property_values(GetSeenEventPropertyValuesRequest {
                project_id: 1,
                model_id: 10,
                event_name: "signup".to_string(),
                property_name: "currency".to_string(),
            })
            .await;
        assert!(matches!(unknown_event, Err(RpcError::NotFound(_))));

        let unknown_property = t
            .service
            .get_seen_event_property_values(GetSeenEventPropertyValuesRequest {
                project_id: 1,
                model_id: 10,
                event_name: "purchase".to_string(),
                property_name: "color".to_string(),
            })
            .await;
        assert!(matches!(unknown_property, Err(RpcError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_project_models_intervals() {
        let t = setup().await;

        let response = t
            .service
            .get_project_models_intervals(GetProjectModelsIntervalsRequest { project_id: 1 })
            .await
            .unwrap();

        let model_ids: Vec<_> = response.intervals.iter().map(|m| m.model_id).collect();
        assert_eq!(model_ids, vec![10, 11]);
    }

    #[tokio::test]
    async fn test_missing_chunk_is_a_hard_error() {
        let t = single_node_service(vec![ProjectModelMetadata::example(5, 1, "1")]);

        let result = t
            .service
            .get_all_patterns(GetAllPatternsRequest {
                project_id: 5,
                model_id: 1,
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(RpcError::Store(e)) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_dispatch() {
        let t = setup().await;

        let envelope: RequestEnvelope = serde_json::from_value(json!({
            "method": "ps.GetTotalEventCount",
            "params": [{"pid": 1, "mid": 10}],
            "id": 1
        }))
        .unwrap();
        let result = t.service.dispatch(&envelope).await.unwrap().unwrap();
        assert!(!result.header.ignored);
        let response: TotalEventCountResponse = serde_json::from_str(result.body.get()).unwrap();
        assert_eq!(response.total_event_count, 14);
        assert_eq!(response.model_id, 10);

        let envelope: RequestEnvelope = serde_json::from_value(json!({
            "method": "ps.GetSeenUserPropertyValues",
            "params": [{"pid": 1, "mid": 10, "pn": "empty"}],
            "id": 2
        }))
        .unwrap();
        let result = t.service.dispatch(&envelope).await.unwrap();
        assert!(matches!(result, Err(RpcError::NotFound(_))));

        let envelope: RequestEnvelope = serde_json::from_value(json!({
            "method": "ps.Unknown",
            "params": [{}],
            "id": 3
        }))
        .unwrap();
        assert!(matches!(
            t.service.dispatch(&envelope).await,
            Err(DispatchError::UnknownMethod(_))
        ));

        let envelope: RequestEnvelope = serde_json::from_value(json!({
            "method": "ps.GetTotalEventCount",
            "params": [{"pid": "one"}],
            "id": 4
        }))
        .unwrap();
        assert!(matches!(
            t.service.dispatch(&envelope).await,
            Err(DispatchError::Envelope(_))
        ));
    }
}
