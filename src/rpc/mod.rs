//! Request and response types of the `ps` RPC service.
//!
//! Every response carries the same header: the project, the resolved model, whether this node was
//! authoritative for the request (`ignored` when it was not) and an optional error.

pub mod envelope;
pub mod filters;
pub mod handlers;

use crate::pattern::UserAndEventsInfo;
use crate::store::error::StoreError;
use crate::topology::{ModelId, ModelInfo, ProjectId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

pub const SERVICE_NAME: &str = "ps";
pub const RPC_ENDPOINT: &str = "/rpc";
/// Correlates a scattered call across the nodes it reached.
pub const REQUEST_ID_HEADER: &str = "X-Req-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter)]
pub enum Method {
    GetAllPatterns,
    GetAllContainingPatterns,
    GetPatterns,
    GetCountOfPattern,
    GetTotalEventCount,
    GetUserAndEventsInfo,
    GetSeenEventProperties,
    GetSeenUserProperties,
    GetSeenEventPropertyValues,
    GetSeenUserPropertyValues,
    GetProjectModelsIntervals,
}

impl Method {
    /// `ps.<Method>`, as sent in the envelope.
    pub fn qualified_name(self) -> String {
        format!("{SERVICE_NAME}.{self}")
    }

    pub fn from_qualified_name(name: &str) -> Option<Self> {
        let (service, method) = name.split_once('.')?;
        if service != SERVICE_NAME {
            return None;
        }
        method.parse().ok()
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to resolve model: {0}")]
    TopologyLookup(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt pattern: {0}")]
    CorruptPattern(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Common header of every response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub project_id: ProjectId,
    pub model_id: ModelId,
    pub ignored: bool,
    pub error: Option<String>,
}

pub trait RpcResponse: Serialize + DeserializeOwned + Default + Send + 'static {
    fn header(&self) -> ResponseHeader;
    fn set_header(&mut self, header: ResponseHeader);
}

pub trait RpcRequest: Serialize + DeserializeOwned + Send + Sync {
    const METHOD: Method;
    type Response: RpcResponse;
}

/// Declares a response struct with the header fields inlined, the way they appear on the wire.
macro_rules! rpc_response {
    ($(#[$meta:meta])* $name:ident { $($(#[$field_meta:meta])* $field:ident : $type:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        pub struct $name {
            #[serde(rename = "pid", default)]
            pub project_id: ProjectId,
            #[serde(rename = "mid", default)]
            pub model_id: ModelId,
            #[serde(default)]
            pub ignored: bool,
            #[serde(default)]
            pub error: Option<String>,
            $($(#[$field_meta])* pub $field: $type,)*
        }

        impl RpcResponse for $name {
            fn header(&self) -> ResponseHeader {
                ResponseHeader {
                    project_id: self.project_id,
                    model_id: self.model_id,
                    ignored: self.ignored,
                    error: self.error.clone(),
                }
            }

            fn set_header(&mut self, header: ResponseHeader) {
                self.project_id = header.project_id;
                self.model_id = header.model_id;
                self.ignored = header.ignored;
                self.error = header.error;
            }
        }
    };
}

rpc_response!(
    /// Raw pattern bodies, passed through undecoded.
    PatternsResponse {
        #[serde(rename = "ps", default)]
        patterns: Vec<Box<RawValue>>,
    }
);

rpc_response!(CountOfPatternResponse {
    #[serde(rename = "poc", default)]
    count: u64,
});

rpc_response!(TotalEventCountResponse {
    #[serde(rename = "tec", default)]
    total_event_count: u64,
});

rpc_response!(UserAndEventsInfoResponse {
    #[serde(rename = "uei", default)]
    user_and_events_info: UserAndEventsInfo,
});

rpc_response!(SeenPropertiesResponse {
    #[serde(rename = "np", default)]
    numeric_properties: Vec<String>,
    #[serde(rename = "cp", default)]
    categorical_properties: Vec<String>,
});

rpc_response!(SeenPropertyValuesResponse {
    #[serde(rename = "pv", default)]
    values: Vec<String>,
});

rpc_response!(ProjectModelsIntervalsResponse {
    #[serde(rename = "mis", default)]
    intervals: Vec<ModelInfo>,
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllPatternsRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    /// 0 selects the latest model.
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
    #[serde(rename = "se", default)]
    pub start_event: String,
    #[serde(rename = "ee", default)]
    pub end_event: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllContainingPatternsRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
    #[serde(rename = "en", default)]
    pub event: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPatternsRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
    #[serde(rename = "pe", default)]
    pub pattern_events: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCountOfPatternRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
    #[serde(rename = "pe", default)]
    pub pattern_events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTotalEventCountRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUserAndEventsInfoRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSeenEventPropertiesRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
    #[serde(rename = "en", default)]
    pub event_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSeenUserPropertiesRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSeenEventPropertyValuesRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
    #[serde(rename = "en", default)]
    pub event_name: String,
    #[serde(rename = "pn", default)]
    pub property_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSeenUserPropertyValuesRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
    #[serde(rename = "mid", default)]
    pub model_id: ModelId,
    #[serde(rename = "pn", default)]
    pub property_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProjectModelsIntervalsRequest {
    #[serde(rename = "pid")]
    pub project_id: ProjectId,
}

macro_rules! rpc_request {
    ($($request:ty => $method:ident, $response:ty;)*) => {
        $(
            impl RpcRequest for $request {
                const METHOD: Method = Method::$method;
                type Response = $response;
            }
        )*
    };
}

rpc_request!(
    GetAllPatternsRequest => GetAllPatterns, PatternsResponse;
    GetAllContainingPatternsRequest => GetAllContainingPatterns, PatternsResponse;
    GetPatternsRequest => GetPatterns, PatternsResponse;
    GetCountOfPatternRequest => GetCountOfPattern, CountOfPatternResponse;
    GetTotalEventCountRequest => GetTotalEventCount, TotalEventCountResponse;
    GetUserAndEventsInfoRequest => GetUserAndEventsInfo, UserAndEventsInfoResponse;
    GetSeenEventPropertiesRequest => GetSeenEventProperties, SeenPropertiesResponse;
    GetSeenUserPropertiesRequest => GetSeenUserProperties, SeenPropertiesResponse;
    GetSeenEventPropertyValuesRequest => GetSeenEventPropertyValues, SeenPropertyValuesResponse;
    GetSeenUserPropertyValuesRequest => GetSeenUserPropertyValues, SeenPropertyValuesResponse;
    GetProjectModelsIntervalsRequest => GetProjectModelsIntervals, ProjectModelsIntervalsResponse;
);
