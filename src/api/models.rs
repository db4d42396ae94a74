use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub task_id: Uuid,
}
