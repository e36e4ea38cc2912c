//! # Batch Process Kinds
//!
//! The closed vocabulary of work a batch process can carry, plus the
//! routing table the scheduler dispatches on. Kinds persist as their
//! SCREAMING_SNAKE wire tokens; a stored token outside this vocabulary is
//! a parse failure at the store boundary, never a dispatch fallthrough.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of work a batch process carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessKind {
    RetrieveBallotItemsFromPollingLocations,
    RefreshBallotItemsFromPollingLocations,
    RefreshBallotItemsFromVoters,
    AugmentAnalyticsActionWithElectionId,
    AugmentAnalyticsActionWithFirstVisit,
    CalculateSitewideVoterMetrics,
    CalculateSitewideDailyMetrics,
    CalculateSitewideElectionMetrics,
    CalculateOrganizationDailyMetrics,
    CalculateOrganizationElectionMetrics,
    SearchTwitterForCandidateTwitterHandle,
}

/// Ballot item kinds share the three-phase chunk machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BallotItemKind {
    RetrieveFromPollingLocations,
    RefreshFromPollingLocations,
    RefreshFromVoters,
}

impl BallotItemKind {
    /// Refresh variants re-walk existing data; a timed-out retrieval that
    /// produced nothing lets the whole process finish instead of retrying
    pub fn is_refresh(&self) -> bool {
        !matches!(self, BallotItemKind::RetrieveFromPollingLocations)
    }
}

/// Analytics kinds that advance chunk by chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkedAnalyticsKind {
    AugmentWithElectionId,
    AugmentWithFirstVisit,
    SitewideVoterMetrics,
    SitewideElectionMetrics,
    OrganizationDailyMetrics,
    OrganizationElectionMetrics,
}

/// Routing table for scheduler dispatch
///
/// Every [`ProcessKind`] maps to exactly one route, so dispatch is an
/// exhaustive match with no runtime fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRoute {
    BallotItems(BallotItemKind),
    ChunkedAnalytics(ChunkedAnalyticsKind),
    SitewideDailyMetrics,
    HandleSearch,
}

impl ProcessKind {
    /// Wire token stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::RetrieveBallotItemsFromPollingLocations => {
                "RETRIEVE_BALLOT_ITEMS_FROM_POLLING_LOCATIONS"
            }
            ProcessKind::RefreshBallotItemsFromPollingLocations => {
                "REFRESH_BALLOT_ITEMS_FROM_POLLING_LOCATIONS"
            }
            ProcessKind::RefreshBallotItemsFromVoters => "REFRESH_BALLOT_ITEMS_FROM_VOTERS",
            ProcessKind::AugmentAnalyticsActionWithElectionId => {
                "AUGMENT_ANALYTICS_ACTION_WITH_ELECTION_ID"
            }
            ProcessKind::AugmentAnalyticsActionWithFirstVisit => {
                "AUGMENT_ANALYTICS_ACTION_WITH_FIRST_VISIT"
            }
            ProcessKind::CalculateSitewideVoterMetrics => "CALCULATE_SITEWIDE_VOTER_METRICS",
            ProcessKind::CalculateSitewideDailyMetrics => "CALCULATE_SITEWIDE_DAILY_METRICS",
            ProcessKind::CalculateSitewideElectionMetrics => "CALCULATE_SITEWIDE_ELECTION_METRICS",
            ProcessKind::CalculateOrganizationDailyMetrics => {
                "CALCULATE_ORGANIZATION_DAILY_METRICS"
            }
            ProcessKind::CalculateOrganizationElectionMetrics => {
                "CALCULATE_ORGANIZATION_ELECTION_METRICS"
            }
            ProcessKind::SearchTwitterForCandidateTwitterHandle => {
                "SEARCH_TWITTER_FOR_CANDIDATE_TWITTER_HANDLE"
            }
        }
    }

    /// Resolve the processing route for this kind
    pub fn route(&self) -> ProcessRoute {
        match self {
            ProcessKind::RetrieveBallotItemsFromPollingLocations => {
                ProcessRoute::BallotItems(BallotItemKind::RetrieveFromPollingLocations)
            }
            ProcessKind::RefreshBallotItemsFromPollingLocations => {
                ProcessRoute::BallotItems(BallotItemKind::RefreshFromPollingLocations)
            }
            ProcessKind::RefreshBallotItemsFromVoters => {
                ProcessRoute::BallotItems(BallotItemKind::RefreshFromVoters)
            }
            ProcessKind::AugmentAnalyticsActionWithElectionId => {
                ProcessRoute::ChunkedAnalytics(ChunkedAnalyticsKind::AugmentWithElectionId)
            }
            ProcessKind::AugmentAnalyticsActionWithFirstVisit => {
                ProcessRoute::ChunkedAnalytics(ChunkedAnalyticsKind::AugmentWithFirstVisit)
            }
            ProcessKind::CalculateSitewideVoterMetrics => {
                ProcessRoute::ChunkedAnalytics(ChunkedAnalyticsKind::SitewideVoterMetrics)
            }
            ProcessKind::CalculateSitewideDailyMetrics => ProcessRoute::SitewideDailyMetrics,
            ProcessKind::CalculateSitewideElectionMetrics => {
                ProcessRoute::ChunkedAnalytics(ChunkedAnalyticsKind::SitewideElectionMetrics)
            }
            ProcessKind::CalculateOrganizationDailyMetrics => {
                ProcessRoute::ChunkedAnalytics(ChunkedAnalyticsKind::OrganizationDailyMetrics)
            }
            ProcessKind::CalculateOrganizationElectionMetrics => {
                ProcessRoute::ChunkedAnalytics(ChunkedAnalyticsKind::OrganizationElectionMetrics)
            }
            ProcessKind::SearchTwitterForCandidateTwitterHandle => ProcessRoute::HandleSearch,
        }
    }

    /// Check whether this kind walks ballot item chunks
    pub fn is_ballot_item_kind(&self) -> bool {
        matches!(self.route(), ProcessRoute::BallotItems(_))
    }

    /// Check whether this kind belongs to the analytics family (chunked
    /// or sitewide daily). Used to avoid scheduling a second analytics
    /// process while one is running.
    pub fn is_analytics_kind(&self) -> bool {
        matches!(
            self.route(),
            ProcessRoute::ChunkedAnalytics(_) | ProcessRoute::SitewideDailyMetrics
        )
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RETRIEVE_BALLOT_ITEMS_FROM_POLLING_LOCATIONS" => {
                Ok(ProcessKind::RetrieveBallotItemsFromPollingLocations)
            }
            "REFRESH_BALLOT_ITEMS_FROM_POLLING_LOCATIONS" => {
                Ok(ProcessKind::RefreshBallotItemsFromPollingLocations)
            }
            "REFRESH_BALLOT_ITEMS_FROM_VOTERS" => Ok(ProcessKind::RefreshBallotItemsFromVoters),
            "AUGMENT_ANALYTICS_ACTION_WITH_ELECTION_ID" => {
                Ok(ProcessKind::AugmentAnalyticsActionWithElectionId)
            }
            "AUGMENT_ANALYTICS_ACTION_WITH_FIRST_VISIT" => {
                Ok(ProcessKind::AugmentAnalyticsActionWithFirstVisit)
            }
            "CALCULATE_SITEWIDE_VOTER_METRICS" => Ok(ProcessKind::CalculateSitewideVoterMetrics),
            "CALCULATE_SITEWIDE_DAILY_METRICS" => Ok(ProcessKind::CalculateSitewideDailyMetrics),
            "CALCULATE_SITEWIDE_ELECTION_METRICS" => {
                Ok(ProcessKind::CalculateSitewideElectionMetrics)
            }
            "CALCULATE_ORGANIZATION_DAILY_METRICS" => {
                Ok(ProcessKind::CalculateOrganizationDailyMetrics)
            }
            "CALCULATE_ORGANIZATION_ELECTION_METRICS" => {
                Ok(ProcessKind::CalculateOrganizationElectionMetrics)
            }
            "SEARCH_TWITTER_FOR_CANDIDATE_TWITTER_HANDLE" => {
                Ok(ProcessKind::SearchTwitterForCandidateTwitterHandle)
            }
            _ => Err(format!("Unrecognized kind of process: {s}")),
        }
    }
}

/// All kinds, in scheduling display order
pub const ALL_PROCESS_KINDS: &[ProcessKind] = &[
    ProcessKind::RetrieveBallotItemsFromPollingLocations,
    ProcessKind::RefreshBallotItemsFromPollingLocations,
    ProcessKind::RefreshBallotItemsFromVoters,
    ProcessKind::AugmentAnalyticsActionWithElectionId,
    ProcessKind::AugmentAnalyticsActionWithFirstVisit,
    ProcessKind::CalculateSitewideVoterMetrics,
    ProcessKind::CalculateSitewideDailyMetrics,
    ProcessKind::CalculateSitewideElectionMetrics,
    ProcessKind::CalculateOrganizationDailyMetrics,
    ProcessKind::CalculateOrganizationElectionMetrics,
    ProcessKind::SearchTwitterForCandidateTwitterHandle,
];
