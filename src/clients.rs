//! Client registry: resolves client ids to their tier.

use std::collections::HashMap;

use crate::admission::ClientTier;
use crate::config::ClientConfig;

/// Known clients, loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientConfig>,
}

impl ClientRegistry {
    pub fn new(clients: HashMap<String, ClientConfig>) -> Self {
        Self { clients }
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.get(client_id)
    }

    pub fn tier(&self, client_id: &str) -> Option<&ClientTier> {
        self.get(client_id).map(|c| &c.tier)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl FromIterator<(String, ClientConfig)> for ClientRegistry {
    fn from_iter<I: IntoIterator<Item = (String, ClientConfig)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let registry: ClientRegistry = [(
            "client-001".to_string(),
            ClientConfig {
                tier: ClientTier::Premium,
                name: Some("Premium Client 1".to_string()),
            },
        )]
        .into_iter()
        .collect();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tier("client-001"), Some(&ClientTier::Premium));
        assert!(registry.get("client-999").is_none());
        assert!(ClientRegistry::default().is_empty());
    }

    #[test]
    fn test_ids_are_exact_match() {
        let registry: ClientRegistry = [(
            "client-001".to_string(),
            ClientConfig {
                tier: ClientTier::Basic,
                name: None,
            },
        )]
        .into_iter()
        .collect();

        assert!(registry.get("CLIENT-001").is_none());
    }
}
