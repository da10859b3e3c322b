//! Bag request model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A visitor asking for a bag of their own.
#[derive(Debug, Clone, Serialize)]
pub struct BagRequest {
    pub id: i64,
    pub email: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /request-bag`, sent as JSON or as a form.
#[derive(Debug, Clone, Deserialize)]
pub struct BagRequestPayload {
    #[serde(default)]
    pub email: String,
}

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
