//! Integrations (onboarded cloud accounts) as served by the integration
//! service.

use serde::{Deserialize, Serialize};

/// Onboarding state of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationState {
    Active,
    Inactive,
    Archived,
    Sample,
}

/// An onboarded account or resource scope under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub integration_id: String,
    /// Provider-side identifier (account ID, subscription ID, ...).
    pub provider_id: String,
    pub integration_type: String,
    pub state: IntegrationState,
}

impl Integration {
    pub fn new(
        integration_id: impl Into<String>,
        integration_type: impl Into<String>,
        state: IntegrationState,
    ) -> Self {
        let integration_id = integration_id.into();
        Self {
            provider_id: integration_id.clone(),
            integration_id,
            integration_type: integration_type.into(),
            state,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == IntegrationState::Active
    }
}

/// Filter for listing integrations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationFilter {
    /// Only integrations in one of these states; empty means any state.
    pub states: Vec<IntegrationState>,
    /// Only integrations of one of these types; empty means any type.
    pub integration_types: Vec<String>,
}

impl IntegrationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            states: vec![IntegrationState::Active],
            integration_types: Vec::new(),
        }
    }

    pub fn matches(&self, integration: &Integration) -> bool {
        (self.states.is_empty() || self.states.contains(&integration.state))
            && (self.integration_types.is_empty()
                || self
                    .integration_types
                    .iter()
                    .any(|t| *t == integration.integration_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let active = Integration::new("a", "aws", IntegrationState::Active);
        let archived = Integration::new("b", "aws", IntegrationState::Archived);

        assert!(IntegrationFilter::all().matches(&archived));
        assert!(IntegrationFilter::active().matches(&active));
        assert!(!IntegrationFilter::active().matches(&archived));

        let azure_only = IntegrationFilter {
            states: Vec::new(),
            integration_types: vec!["azure".to_string()],
        };
        assert!(!azure_only.matches(&active));
    }
}
