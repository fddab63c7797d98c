//! HTTP implementation of the analysis gateway.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::ComplexityClass;

use super::{AnalysisGateway, AnalysisOutcome, AnalysisRequest, GatewayError};

pub struct HttpAnalysisGateway {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    language: &'a str,
    kind: &'a str,
    name: &'a str,
    qualified_name: &'a str,
    code: &'a str,
    context: &'a str,
    ui_locale: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    description: String,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    complexity_explanation: Option<String>,
    #[serde(default)]
    design_patterns: Vec<String>,
    #[serde(default)]
    ddd_role: Option<String>,
    #[serde(default)]
    mvc_role: Option<String>,
    #[serde(default)]
    testability_score: Option<u32>,
    #[serde(default)]
    testability_issues: Vec<String>,
    #[serde(default)]
    tokens_used: u64,
}

impl HttpAnalysisGateway {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

impl AnalysisGateway for HttpAnalysisGateway {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> std::result::Result<AnalysisOutcome, GatewayError> {
        debug!(name = %request.qualified_name, "sending entity for analysis");
        let body = WireRequest {
            language: &request.language,
            kind: request.kind.as_str(),
            name: &request.name,
            qualified_name: &request.qualified_name,
            code: &request.code,
            context: &request.context,
            ui_locale: &request.ui_locale,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Provider(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(GatewayError::Provider(format!(
                "status {}",
                response.status()
            )));
        }
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        if wire.description.trim().is_empty() {
            return Err(GatewayError::MalformedResponse(
                "empty description".to_string(),
            ));
        }
        // An unrecognized complexity label is dropped rather than trusted.
        let complexity = wire
            .complexity
            .as_deref()
            .and_then(ComplexityClass::from_str);
        Ok(AnalysisOutcome {
            description: wire.description,
            complexity,
            complexity_explanation: wire.complexity_explanation,
            design_patterns: wire.design_patterns,
            ddd_role: wire.ddd_role,
            mvc_role: wire.mvc_role,
            testability_score: wire.testability_score,
            testability_issues: wire.testability_issues,
            tokens_used: wire.tokens_used,
        })
    }
}
