//! Upload log model

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One accepted photo upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadLog {
    pub id: i64,
    pub token_id: i64,
    pub session_number: i32,
    pub session_uuid: String,
    pub player_name: String,
    pub contribution_id: i64,
    pub derive_number: i32,
    pub comment: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Data for recording an upload against a token's quota.
#[derive(Debug, Clone)]
pub struct NewUploadLog {
    pub token_id: i64,
    pub session_number: i32,
    pub session_uuid: String,
    pub player_name: String,
    pub contribution_id: i64,
    pub derive_number: i32,
    pub comment: Option<String>,
}
