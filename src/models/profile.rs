use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMeta {
    pub data_dir: String,
    pub scan_count: usize,
    pub last_scan_at: Option<i64>,
}
