//! Polling source backed by an HTTP JSON feed.

use scbot_core::{MentionRecord, MentionSource};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Either a bare array of records or `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedPayload {
    List(Vec<MentionRecord>),
    Wrapped {
        #[serde(default)]
        data: Vec<MentionRecord>,
    },
}

impl FeedPayload {
    fn into_records(self) -> Vec<MentionRecord> {
        match self {
            FeedPayload::List(records) | FeedPayload::Wrapped { data: records } => records,
        }
    }
}

pub struct JsonFeedSource {
    url: String,
    agent: ureq::Agent,
}

impl JsonFeedSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder().timeout_global(Some(timeout)).build();
        Self {
            url: url.into(),
            agent: config.into(),
        }
    }
}

impl MentionSource for JsonFeedSource {
    fn fetch_mentions(&mut self) -> anyhow::Result<Vec<MentionRecord>> {
        let mut response = self.agent.get(&self.url).call()?;
        let payload: FeedPayload = response.body_mut().read_json()?;
        let records = payload.into_records();
        debug!(url = %self.url, count = records.len(), "fetched mentions");
        Ok(records)
    }
}
