use anyhow::anyhow;
use scbot_core::{BotIdentity, StreamIngestor, StreamRules};
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct AppState {
    pub identity: BotIdentity,
    pub stream: Arc<StreamIngestor>,
    pub rules: MemoryRules,
}

/// Stream filter rules kept in memory. Clones share the same list.
#[derive(Clone, Default)]
pub struct MemoryRules {
    inner: Arc<RwLock<Vec<String>>>,
}

impl MemoryRules {
    pub fn list(&self) -> Vec<String> {
        self.inner.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Whether a record text would pass the installed rules.
    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.list().iter().any(|rule| text.contains(&rule.to_lowercase()))
    }
}

impl StreamRules for MemoryRules {
    fn delete_all_rules(&mut self) -> anyhow::Result<()> {
        self.inner.write().map_err(|_| anyhow!("rule store poisoned"))?.clear();
        Ok(())
    }

    fn add_rule(&mut self, rule: &str) -> anyhow::Result<()> {
        self.inner
            .write()
            .map_err(|_| anyhow!("rule store poisoned"))?
            .push(rule.to_string());
        Ok(())
    }
}
