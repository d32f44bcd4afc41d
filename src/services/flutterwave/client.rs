use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use super::token::{AccessToken, TokenCache};
use super::{
    validate_charge, ChargeAuthorization, ChargeRequest, Customer, CustomerRequest, GatewayCharge,
    GatewayError, GatewayPaymentMethod, GatewayTransfer, PaymentGateway, PaymentMethodDetails,
    TransferRequest,
};
use crate::config::GatewayConfig;
use crate::models::OperationIds;

const TRACE_HEADER: &str = "X-Trace-Id";
const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Response envelope used by every gateway endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// One logical request. The body is serialized once so every retry sends the same bytes.
struct GatewayRequest<'a> {
    method: Method,
    path: String,
    body: Option<Value>,
    trace_id: &'a str,
    idempotency_key: Option<&'a str>,
}

/// HTTP client for the Flutterwave v4 API.
pub struct FlutterwaveClient {
    http: reqwest::Client,
    config: GatewayConfig,
    token: TokenCache,
}

impl FlutterwaveClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            token: TokenCache::new(config.refresh_margin),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_token(&self) -> Result<AccessToken, GatewayError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, "Gateway token request rejected: {}", body);
            return Err(GatewayError::Auth(format!("token endpoint returned {}", status)));
        }

        response
            .json::<AccessToken>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        self.token.get_or_refresh(|| self.fetch_token()).await
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_transient(e: &reqwest::Error) -> bool {
        e.is_timeout() || e.is_connect() || e.is_request()
    }

    /// Send with bounded retries on transport errors, timeouts, 429 and 5xx.
    /// A 401 drops the cached token and is retried once.
    async fn execute<T: DeserializeOwned>(&self, request: GatewayRequest<'_>) -> Result<T, GatewayError> {
        let schedule = &self.config.retry_schedule;
        let mut attempt = 0usize;
        let mut reauthenticated = false;

        loop {
            let token = self.access_token().await?;
            let mut builder = self
                .http
                .request(request.method.clone(), self.url(&request.path))
                .bearer_auth(&token)
                .header(TRACE_HEADER, request.trace_id);
            if let Some(key) = request.idempotency_key {
                builder = builder.header(IDEMPOTENCY_HEADER, key);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                        tracing::warn!(trace_id = request.trace_id, path = %request.path, "Gateway rejected token; refreshing");
                        self.token.invalidate().await;
                        reauthenticated = true;
                        continue;
                    }
                    if Self::should_retry(status) && attempt < schedule.len() {
                        tracing::warn!(
                            trace_id = request.trace_id,
                            path = %request.path,
                            %status,
                            attempt = attempt + 1,
                            "Gateway call failed; retrying"
                        );
                        tokio::time::sleep(schedule[attempt]).await;
                        attempt += 1;
                        continue;
                    }
                    return Self::decode(response, request.trace_id, &request.path).await;
                }
                Err(e) if Self::is_transient(&e) && attempt < schedule.len() => {
                    tracing::warn!(
                        trace_id = request.trace_id,
                        path = %request.path,
                        attempt = attempt + 1,
                        "Gateway unreachable ({}); retrying",
                        e
                    );
                    tokio::time::sleep(schedule[attempt]).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(trace_id = request.trace_id, path = %request.path, "Gateway call failed: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        trace_id: &str,
        path: &str,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));

        if !status.is_success() {
            tracing::error!(trace_id, path, %status, "Gateway returned an error: {}", body);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_value(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        envelope
            .data
            .ok_or_else(|| GatewayError::Decode(format!("{} response has no data", path)))
    }

    fn write<'a, B: Serialize>(
        method: Method,
        path: impl Into<String>,
        body: &B,
        ids: &'a OperationIds,
    ) -> Result<GatewayRequest<'a>, GatewayError> {
        Ok(GatewayRequest {
            method,
            path: path.into(),
            body: Some(serde_json::to_value(body).map_err(|e| GatewayError::Decode(e.to_string()))?),
            trace_id: &ids.trace_id,
            idempotency_key: Some(&ids.idempotency_key),
        })
    }
}

#[derive(Serialize)]
struct NewPaymentMethod<'a> {
    customer_id: &'a str,
    #[serde(flatten)]
    details: &'a PaymentMethodDetails,
}

#[derive(Serialize)]
struct ChargeUpdate<'a> {
    authorization: &'a ChargeAuthorization,
}

#[async_trait]
impl PaymentGateway for FlutterwaveClient {
    async fn create_customer(
        &self,
        request: &CustomerRequest,
        ids: &OperationIds,
    ) -> Result<Customer, GatewayError> {
        let call = Self::write(Method::POST, "/customers", request, ids)?;
        match self.execute::<Customer>(call).await {
            Err(GatewayError::Api { status: 409, .. }) => {
                tracing::info!(trace_id = %ids.trace_id, "Customer already exists; looking it up by email");
                self.search_customer(&request.email).await?.ok_or_else(|| {
                    GatewayError::Decode("customer reported as existing but not found by email".to_string())
                })
            }
            other => other,
        }
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        request: &CustomerRequest,
        ids: &OperationIds,
    ) -> Result<Customer, GatewayError> {
        let call = Self::write(Method::PUT, format!("/customers/{}", customer_id), request, ids)?;
        self.execute(call).await
    }

    async fn search_customer(&self, email: &str) -> Result<Option<Customer>, GatewayError> {
        let trace_id = Uuid::new_v4().to_string();
        let customers: Vec<Customer> = self
            .execute(GatewayRequest {
                method: Method::POST,
                path: "/customers/search".to_string(),
                body: Some(json!({ "email": email })),
                trace_id: &trace_id,
                idempotency_key: None,
            })
            .await?;
        Ok(customers
            .into_iter()
            .find(|c| c.email.eq_ignore_ascii_case(email)))
    }

    async fn add_payment_method(
        &self,
        customer_id: &str,
        details: &PaymentMethodDetails,
        ids: &OperationIds,
    ) -> Result<GatewayPaymentMethod, GatewayError> {
        let body = NewPaymentMethod { customer_id, details };
        let call = Self::write(Method::POST, "/payment-methods", &body, ids)?;
        self.execute(call).await
    }

    async fn initiate_charge(
        &self,
        request: &ChargeRequest,
        ids: &OperationIds,
    ) -> Result<GatewayCharge, GatewayError> {
        validate_charge(request.amount, Some(&request.customer_id))?;
        let call = Self::write(Method::POST, "/charges", request, ids)?;
        self.execute(call).await
    }

    async fn update_charge(
        &self,
        charge_id: &str,
        authorization: &ChargeAuthorization,
        ids: &OperationIds,
    ) -> Result<GatewayCharge, GatewayError> {
        let body = ChargeUpdate { authorization };
        let call = Self::write(Method::PUT, format!("/charges/{}", charge_id), &body, ids)?;
        self.execute(call).await
    }

    async fn direct_transfer(
        &self,
        request: &TransferRequest,
        ids: &OperationIds,
    ) -> Result<GatewayTransfer, GatewayError> {
        let call = Self::write(Method::POST, "/direct-transfers", request, ids)?;
        self.execute(call).await
    }
}
