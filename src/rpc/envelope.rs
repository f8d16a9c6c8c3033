//! JSON-RPC 1.0 envelope: `{"method", "params": [p], "id"}` in, `{"result", "error", "id"}` out.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("expected exactly one parameter object, got {0}")]
    ParamCount(usize),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope<P = Value> {
    pub method: String,
    pub params: Vec<P>,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope<R = Box<RawValue>> {
    pub result: Option<R>,
    pub error: Option<String>,
    #[serde(default)]
    pub id: Value,
}

/// Encodes a client request with a random id.
pub fn encode_request<P: Serialize>(
    method: &str,
    params: &P,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&RequestEnvelope {
        method: method.to_string(),
        params: vec![params],
        id: Value::from(rand::random::<u32>()),
    })
}

/// Decodes a server side request, leaving the parameters for the method handler.
pub fn decode_request(body: &[u8]) -> Result<RequestEnvelope, EnvelopeError> {
    Ok(serde_json::from_slice(body)?)
}

impl RequestEnvelope {
    /// The single parameter object of the call.
    pub fn param<P: DeserializeOwned>(&self) -> Result<P, EnvelopeError> {
        match self.params.as_slice() {
            [param] => Ok(P::deserialize(param)?),
            params => Err(EnvelopeError::ParamCount(params.len())),
        }
    }
}

pub fn success(id: Value, result: Box<RawValue>) -> ResponseEnvelope {
    ResponseEnvelope {
        result: Some(result),
        error: None,
        id,
    }
}

pub fn failure(id: Value, error: impl ToString) -> ResponseEnvelope {
    ResponseEnvelope {
        result: None,
        error: Some(error.to_string()),
        id,
    }
}

/// Decodes a client response. An envelope error is returned as `Err`.
pub fn decode_response<R: DeserializeOwned>(body: &[u8]) -> anyhow::Result<R> {
    let envelope: ResponseEnvelope<R> = serde_json::from_slice(body)?;

    if let Some(error) = envelope.error {
        anyhow::bail!("server error: {error}");
    }

    envelope
        .result
        .ok_or_else(|| anyhow::anyhow!("response has neither result nor error"))
}
