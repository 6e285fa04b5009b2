//! # Core Campaign Types
//!
//! Campaign type profiles, phase identifiers, the compile-time phase-order
//! table, and the caller identity used by user-filtered store variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One stage of the domain-processing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Generation,
    Dns,
    Http,
    Extraction,
    Enrichment,
    Analysis,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Dns => "dns",
            Self::Http => "http",
            Self::Extraction => "extraction",
            Self::Enrichment => "enrichment",
            Self::Analysis => "analysis",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation" => Ok(Self::Generation),
            "dns" => Ok(Self::Dns),
            "http" => Ok(Self::Http),
            "extraction" => Ok(Self::Extraction),
            "enrichment" => Ok(Self::Enrichment),
            "analysis" => Ok(Self::Analysis),
            other => Err(format!("unknown phase kind: {other}")),
        }
    }
}

/// Campaign type, selecting a phase-order profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    DomainGeneration,
    DnsValidation,
    HttpKeywordValidation,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DomainGeneration => "domain_generation",
            Self::DnsValidation => "dns_validation",
            Self::HttpKeywordValidation => "http_keyword_validation",
        }
    }

    /// The ordered phase list for this campaign type. Phases advance in
    /// declaration order with no skipping.
    pub fn phase_order(&self) -> &'static [PhaseKind] {
        match self {
            Self::DomainGeneration => &[
                PhaseKind::Generation,
                PhaseKind::Dns,
                PhaseKind::Http,
                PhaseKind::Extraction,
                PhaseKind::Enrichment,
                PhaseKind::Analysis,
            ],
            Self::DnsValidation => &[
                PhaseKind::Dns,
                PhaseKind::Http,
                PhaseKind::Extraction,
                PhaseKind::Enrichment,
                PhaseKind::Analysis,
            ],
            Self::HttpKeywordValidation => &[
                PhaseKind::Http,
                PhaseKind::Extraction,
                PhaseKind::Enrichment,
                PhaseKind::Analysis,
            ],
        }
    }

    /// First phase of the profile
    pub fn initial_phase(&self) -> PhaseKind {
        self.phase_order()[0]
    }

    /// Phase following `phase` in this profile, if any
    pub fn next_phase(&self, phase: PhaseKind) -> Option<PhaseKind> {
        let order = self.phase_order();
        order
            .iter()
            .position(|p| *p == phase)
            .and_then(|idx| order.get(idx + 1))
            .copied()
    }
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain_generation" => Ok(Self::DomainGeneration),
            "dns_validation" => Ok(Self::DnsValidation),
            "http_keyword_validation" => Ok(Self::HttpKeywordValidation),
            other => Err(format!("unknown campaign type: {other}")),
        }
    }
}

/// Caller identity for operator-initiated paths.
///
/// Every user-filtered store variant receives one of these; the owner
/// predicate is evaluated inside the store query, not at the service layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_uuid: Uuid,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn new(user_uuid: Uuid) -> Self {
        Self {
            user_uuid,
            roles: Vec::new(),
        }
    }

    pub fn with_roles(user_uuid: Uuid, roles: Vec<String>) -> Self {
        Self { user_uuid, roles }
    }

    /// Admin capability bypasses the owner predicate
    pub fn is_admin(&self) -> bool {
        self.roles
            .iter()
            .any(|r| r == "admin" || r == "super_admin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_profiles() {
        assert_eq!(CampaignType::DomainGeneration.phase_order().len(), 6);
        assert_eq!(CampaignType::DnsValidation.phase_order().len(), 5);
        assert_eq!(CampaignType::HttpKeywordValidation.phase_order().len(), 4);

        assert_eq!(
            CampaignType::DomainGeneration.initial_phase(),
            PhaseKind::Generation
        );
        assert_eq!(CampaignType::DnsValidation.initial_phase(), PhaseKind::Dns);
    }

    #[test]
    fn test_next_phase_advances_in_order_without_skipping() {
        let ty = CampaignType::DomainGeneration;
        assert_eq!(ty.next_phase(PhaseKind::Generation), Some(PhaseKind::Dns));
        assert_eq!(ty.next_phase(PhaseKind::Dns), Some(PhaseKind::Http));
        assert_eq!(ty.next_phase(PhaseKind::Analysis), None);

        // A phase outside the profile has no successor
        assert_eq!(
            CampaignType::HttpKeywordValidation.next_phase(PhaseKind::Generation),
            None
        );
    }

    #[test]
    fn test_phase_kind_round_trips_through_str() {
        for phase in [
            PhaseKind::Generation,
            PhaseKind::Dns,
            PhaseKind::Http,
            PhaseKind::Extraction,
            PhaseKind::Enrichment,
            PhaseKind::Analysis,
        ] {
            assert_eq!(phase.as_str().parse::<PhaseKind>().unwrap(), phase);
        }
        assert!("keyword_scoring".parse::<PhaseKind>().is_err());
    }

    #[test]
    fn test_admin_capability() {
        let user = AuthContext::new(Uuid::new_v4());
        assert!(!user.is_admin());

        let admin = AuthContext::with_roles(Uuid::new_v4(), vec!["admin".into()]);
        assert!(admin.is_admin());

        let super_admin = AuthContext::with_roles(Uuid::new_v4(), vec!["super_admin".into()]);
        assert!(super_admin.is_admin());

        let viewer = AuthContext::with_roles(Uuid::new_v4(), vec!["viewer".into()]);
        assert!(!viewer.is_admin());
    }
}
