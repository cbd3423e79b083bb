//! Batch plan files
//!
//! A plan lists several batches to run side by side:
//!
//! ```toml
//! [[batch]]
//! index = 1
//! video = "/videos/lofi.mp4"
//! stream_key = "abcd-efgh-ijkl-mnop"
//! duration_limit_secs = 3600
//!
//! [[batch]]
//! index = 2
//! video = "/videos/short.mp4"
//! url = "rtmp://a.rtmp.youtube.com/live2/qrst-uvwx"
//! vertical = true
//! [batch.settings]
//! fps = 60
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

use super::stream::{EncodeSettings, StreamParams, StreamTarget};
use crate::errors::StreamError;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchPlan {
    #[serde(rename = "batch", default)]
    pub batches: Vec<PlannedBatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedBatch {
    pub index: u32,
    pub video: PathBuf,
    pub stream_key: Option<String>,
    pub url: Option<String>,
    pub duration_limit_secs: Option<u64>,
    #[serde(default)]
    pub vertical: bool,
    pub channel_name: Option<String>,
    pub title: Option<String>,
    /// Missing fields fall back to the configured defaults
    pub settings: Option<toml::Value>,
}

impl BatchPlan {
    pub fn from_toml(contents: &str) -> Result<Self, String> {
        let plan: Self = toml::from_str(contents).map_err(|e| e.to_string())?;
        let mut seen = HashSet::new();
        for batch in &plan.batches {
            if !seen.insert(batch.index) {
                return Err(format!("batch index {} appears more than once", batch.index));
            }
        }
        Ok(plan)
    }
}

impl PlannedBatch {
    pub fn to_params(&self, defaults: &EncodeSettings) -> Result<StreamParams, StreamError> {
        let target = StreamTarget::from_parts(self.stream_key.clone(), self.url.clone())?;
        let settings = match &self.settings {
            Some(overrides) => merge_settings(defaults, overrides)?,
            None => defaults.clone(),
        };

        let mut params = StreamParams::new(&self.video, target);
        params.settings = settings;
        params.duration_limit_secs = self.duration_limit_secs;
        params.vertical = self.vertical;
        params.channel_name = self.channel_name.clone();
        params.validate()?;
        Ok(params)
    }
}

fn merge_settings(defaults: &EncodeSettings, overrides: &toml::Value) -> Result<EncodeSettings, StreamError> {
    let mut merged = toml::Value::try_from(defaults)
        .map_err(|e| StreamError::invalid_settings("settings", e.to_string()))?;
    if let (Some(base), Some(extra)) = (merged.as_table_mut(), overrides.as_table()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    merged
        .try_into()
        .map_err(|e: toml::de::Error| StreamError::invalid_settings("settings", e.to_string()))
}
