//! reqwest client for the storefront backend.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use tracing::debug;

use super::wire::{
    ApplyCouponRequest, CouponGrant, CreateOrderRequest, CreatedOrder, Envelope, InitiatePaymentRequest, PaymentInitiation,
    RetryPaymentRequest, VerifiedPayment, VerifyPaymentRequest,
};
use super::{ApiError, CheckoutApi, CustomerContext};
use crate::domain::value_objects::{IdempotencyKey, OrderId};

/// HTTP client for the order, payment and coupon endpoints.
///
/// No request timeout is set here; the transport's defaults apply.
#[derive(Debug, Clone)]
pub struct HttpCheckoutApi {
    base_url: String,
    http: Client,
}

impl HttpCheckoutApi {
    /// `base_url` is the API root, e.g. `"http://localhost:5000/api"`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), http }
    }

    pub fn base_url(&self) -> &str { &self.base_url }

    /// Appends `segments` to the API root, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B, T>(&self, segments: &[&str], body: &B, customer: Option<&CustomerContext>, key: Option<IdempotencyKey>) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let mut request = self.http.post(url.clone()).json(body);
        if let Some(token) = customer.and_then(CustomerContext::bearer) {
            request = request.bearer_auth(token);
        }
        if let Some(key) = key {
            request = request.header("Idempotency-Key", key.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(%url, status = status.as_u16(), "backend responded");

        if !status.is_success() {
            return Err(rejection(status, &bytes));
        }

        let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
        if envelope.success == Some(false) {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_default(),
                fields: envelope.errors,
            });
        }
        match envelope.data {
            Some(data) => Ok(data),
            // Some endpoints answer with the payload itself instead of an envelope.
            None => serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string())),
        }
    }
}

fn rejection(status: StatusCode, bytes: &[u8]) -> ApiError {
    match serde_json::from_slice::<Envelope<IgnoredAny>>(bytes) {
        Ok(envelope) => ApiError::Rejected {
            status: status.as_u16(),
            message: envelope.message.unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string()),
            fields: envelope.errors,
        },
        Err(_) => ApiError::rejected(status.as_u16(), status.canonical_reason().unwrap_or_default()),
    }
}

#[async_trait]
impl CheckoutApi for HttpCheckoutApi {
    async fn create_order(&self, customer: &CustomerContext, key: IdempotencyKey, request: &CreateOrderRequest) -> Result<CreatedOrder, ApiError> {
        self.post(&["checkout"], request, Some(customer), Some(key)).await
    }

    async fn initiate_payment(&self, customer: &CustomerContext, request: &InitiatePaymentRequest) -> Result<PaymentInitiation, ApiError> {
        self.post(&["payments", "initiate"], request, Some(customer), None).await
    }

    async fn verify_payment(&self, request: &VerifyPaymentRequest) -> Result<VerifiedPayment, ApiError> {
        self.post(&["payments", "verify"], request, None, None).await
    }

    async fn retry_payment(&self, customer: &CustomerContext, order_id: &OrderId, request: &RetryPaymentRequest) -> Result<CreatedOrder, ApiError> {
        self.post(&["payments", order_id.as_str(), "retry"], request, Some(customer), None).await
    }

    async fn apply_coupon(&self, customer: &CustomerContext, request: &ApplyCouponRequest) -> Result<CouponGrant, ApiError> {
        self.post(&["coupons", "apply"], request, Some(customer), None).await
    }
}
