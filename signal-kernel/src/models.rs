use serde::{Deserialize, Serialize};

// POST /api/register (pair → kernel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub system_uri: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
}

// POST /api/inquiry (client → kernel)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InquiryResponse {
    pub success: bool,
    pub percentage_processed: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

// réponse attendue d'un pair sur /api/signals/server
#[derive(Debug, Serialize, Deserialize)]
pub struct SignalResponse {
    pub percentage_processed: i64,
}

/// Vue d'inspection d'un pair enregistré (GET /api/register)
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerView {
    pub system_uri: String,
    pub port: u16,
    pub last_seen: String,   // RFC3339
    pub age_seconds: i64,
}

impl InquiryResponse {
    pub fn processed(percentage: i64) -> Self {
        Self { success: true, percentage_processed: percentage, error: None }
    }

    pub fn rejected(reason: String) -> Self {
        Self { success: false, percentage_processed: 0, error: Some(reason) }
    }
}
