//! Platform search capabilities, keyed by platform tag.
//!
//! Adding a platform means implementing the trait and adding one line to the
//! registry construction in main; no inheritance, no dispatch enum to grow.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use murmur_common::{ListeningTask, Platform, SocialPost};

/// One platform's search implementation. Implementations own their retry
/// policy; an `Err` from `search` means the call is spent.
#[async_trait]
pub trait SearchCapability: Send + Sync {
    fn platform(&self) -> Platform;

    async fn search(&self, task: &ListeningTask) -> Result<Vec<SocialPost>>;
}

pub struct CapabilityRegistry {
    capabilities: HashMap<Platform, Arc<dyn SearchCapability>>,
}

impl CapabilityRegistry {
    /// Build from an explicit list. Registering the same platform twice is
    /// a wiring bug and fails construction.
    pub fn new(capabilities: Vec<Arc<dyn SearchCapability>>) -> Result<Self> {
        let mut map: HashMap<Platform, Arc<dyn SearchCapability>> = HashMap::new();
        for capability in capabilities {
            let platform = capability.platform();
            if map.insert(platform, capability).is_some() {
                bail!("duplicate search capability registered for {platform}");
            }
        }
        Ok(Self { capabilities: map })
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn SearchCapability>> {
        self.capabilities.get(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.capabilities.keys().copied().collect();
        platforms.sort_by_key(|p| p.to_string());
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCapability;

    #[test]
    fn duplicate_registration_is_a_constructor_error() {
        let result = CapabilityRegistry::new(vec![
            Arc::new(FakeCapability::new(Platform::Bluesky)),
            Arc::new(FakeCapability::new(Platform::Bluesky)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn lookup_is_by_platform_tag() {
        let registry = CapabilityRegistry::new(vec![
            Arc::new(FakeCapability::new(Platform::Bluesky)),
            Arc::new(FakeCapability::new(Platform::Mastodon)),
        ])
        .unwrap();

        assert!(registry.get(Platform::Mastodon).is_some());
        assert_eq!(registry.platforms().len(), 2);
    }
}
