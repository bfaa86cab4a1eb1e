//! API client for communicating with the minehaul REST API.
//!
//! This module provides the `ApiClient` struct for the authentication
//! endpoints consumed by the session store, plus the order and schedule
//! endpoints used by planners.

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::models::{
    AccountKind, Identity, LoginCredentials, Order, OrderForm, Registration, Schedule, ScheduleForm,
    ScheduleUpdate, SessionRecord,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the backend when nothing is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Backend contract
// ============================================================================

/// Successful `POST /auth/login` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "user")]
    pub identity: Identity,
}

/// The credential/session backend the session store talks to.
///
/// Every call that needs authorization takes the bearer token explicitly, so
/// the store decides which token is used for which request.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse, ApiError>;

    async fn logout(&self, token: &str) -> Result<(), ApiError>;

    /// Exchange the current (possibly expired) token for a fresh one.
    async fn refresh(&self, token: &str) -> Result<String, ApiError>;

    async fn current_identity(&self, token: &str) -> Result<Identity, ApiError>;

    async fn sessions(&self, token: &str) -> Result<Vec<SessionRecord>, ApiError>;

    async fn revoke_session(&self, token: &str, session_id: &str) -> Result<(), ApiError>;

    async fn register(&self, kind: AccountKind, registration: &Registration) -> Result<(), ApiError>;
}

// ============================================================================
// Response envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    user: Identity,
}

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: Vec<Order>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: Order,
}

#[derive(Debug, Deserialize)]
struct SchedulesResponse {
    #[serde(default)]
    schedules: Vec<Schedule>,
}

#[derive(Debug, Deserialize)]
struct ScheduleResponse {
    schedule: Schedule,
}

// ============================================================================
// Client
// ============================================================================

/// API client for the minehaul backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client against `base_url`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                Self::bearer_value(token)?,
            );
        }
        Ok(headers)
    }

    fn bearer_value(token: &str) -> Result<header::HeaderValue, ApiError> {
        header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::InvalidResponse("token is not a valid header value".to_string()))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }

    /// Send a request with an explicit bearer token (or none) and return the raw response.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        debug!(%method, path, "Sending request");

        let mut request = self.client.request(method, &url);
        request = match bearer {
            Some(token) => request.header(header::AUTHORIZATION, Self::bearer_value(token)?),
            None => request.headers(self.auth_headers()?),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::check_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send::<()>(Method::GET, path, None, None).await?;
        Self::parse_json(response, path).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let response = self.send(Method::POST, path, None, Some(body)).await?;
        Self::parse_json(response, path).await
    }

    async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let response = self.send(Method::PUT, path, None, Some(body)).await?;
        Self::parse_json(response, path).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send::<()>(Method::DELETE, path, None, None).await?;
        Ok(())
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Orders created by the signed-in mine planner
    pub async fn fetch_my_orders(&self) -> Result<Vec<Order>, ApiError> {
        let resp: OrdersResponse = self.get("/orders/mine").await?;
        Ok(resp.orders)
    }

    /// All orders visible to the signed-in planner
    pub async fn fetch_all_orders(&self) -> Result<Vec<Order>, ApiError> {
        let resp: OrdersResponse = self.get("/orders").await?;
        Ok(resp.orders)
    }

    pub async fn fetch_order(&self, order_id: &str) -> Result<Order, ApiError> {
        let resp: OrderResponse = self.get(&format!("/orders/{}", order_id)).await?;
        Ok(resp.order)
    }

    /// Create an order as the signed-in mine planner
    pub async fn create_order(&self, form: &OrderForm) -> Result<Order, ApiError> {
        let resp: OrderResponse = self.post("/orders", form).await?;
        Ok(resp.order)
    }

    pub async fn delete_order(&self, order_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/orders/{}", order_id)).await
    }

    // =========================================================================
    // Schedules
    // =========================================================================

    pub async fn fetch_schedules(&self) -> Result<Vec<Schedule>, ApiError> {
        let resp: SchedulesResponse = self.get("/schedules").await?;
        Ok(resp.schedules)
    }

    /// Schedule an order as the signed-in shipping planner
    pub async fn create_schedule(&self, form: &ScheduleForm) -> Result<Schedule, ApiError> {
        let resp: ScheduleResponse = self.post("/schedules", form).await?;
        Ok(resp.schedule)
    }

    pub async fn update_schedule(&self, schedule_id: &str, update: &ScheduleUpdate) -> Result<Schedule, ApiError> {
        let resp: ScheduleResponse = self.put(&format!("/schedules/{}", schedule_id), update).await?;
        Ok(resp.schedule)
    }

    pub async fn fetch_schedule(&self, schedule_id: &str) -> Result<Schedule, ApiError> {
        let resp: ScheduleResponse = self.get(&format!("/schedules/{}", schedule_id)).await?;
        Ok(resp.schedule)
    }

    pub async fn fetch_schedules_for_order(&self, order_id: &str) -> Result<Vec<Schedule>, ApiError> {
        let resp: SchedulesResponse = self.get(&format!("/schedules/order/{}", order_id)).await?;
        Ok(resp.schedules)
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse, ApiError> {
        let path = "/auth/login";
        let response = self.send(Method::POST, path, None, Some(credentials)).await?;
        Self::parse_json(response, path).await
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        self.send::<()>(Method::POST, "/auth/logout", Some(token), None).await?;
        Ok(())
    }

    async fn refresh(&self, token: &str) -> Result<String, ApiError> {
        let path = "/auth/refresh-token";
        let response = self.send::<()>(Method::POST, path, Some(token), None).await?;
        let resp: RefreshResponse = Self::parse_json(response, path).await?;
        Ok(resp.token)
    }

    async fn current_identity(&self, token: &str) -> Result<Identity, ApiError> {
        let path = "/auth/me";
        let response = self.send::<()>(Method::GET, path, Some(token), None).await?;
        let resp: IdentityResponse = Self::parse_json(response, path).await?;
        Ok(resp.user)
    }

    async fn sessions(&self, token: &str) -> Result<Vec<SessionRecord>, ApiError> {
        let path = "/auth/sessions";
        let response = self.send::<()>(Method::GET, path, Some(token), None).await?;
        let resp: SessionsResponse = Self::parse_json(response, path).await?;
        Ok(resp.sessions)
    }

    async fn revoke_session(&self, token: &str, session_id: &str) -> Result<(), ApiError> {
        let path = format!("/auth/sessions/{}", session_id);
        self.send::<()>(Method::DELETE, &path, Some(token), None).await?;
        Ok(())
    }

    async fn register(&self, kind: AccountKind, registration: &Registration) -> Result<(), ApiError> {
        let path = format!("/auth/register/{}", kind.as_str());
        self.send(Method::POST, &path, None, Some(registration)).await?;
        Ok(())
    }
}
