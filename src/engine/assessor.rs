//! Classify per-item backend results.

use std::collections::HashSet;

use crate::types::ItemResult;
use crate::utils::config::{MassIndexingConfig, StatusConsts};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    /// Backend timed out on this item; worth retrying.
    TimedOut,
    Failure(String),
}

#[derive(Clone, Debug, Default)]
pub struct ResultAssessor {
    ignored_statuses: HashSet<u16>,
    ignored_error_types: HashSet<String>,
}

impl ResultAssessor {
    pub fn new<S, E>(ignored_statuses: S, ignored_error_types: E) -> Self
    where
        S: IntoIterator<Item = u16>,
        E: IntoIterator<Item = String>,
    {
        Self {
            ignored_statuses: ignored_statuses.into_iter().collect(),
            ignored_error_types: ignored_error_types.into_iter().collect(),
        }
    }

    pub fn from_config(cfg: &MassIndexingConfig) -> Self {
        Self::new(
            cfg.ignored_statuses.iter().copied(),
            cfg.ignored_error_types.iter().cloned(),
        )
    }

    /// Deletes of documents that are already gone are not failures.
    pub fn for_deletes() -> Self {
        Self::new([StatusConsts::NOT_FOUND], std::iter::empty())
    }

    pub fn is_success(&self, result: &ItemResult) -> bool {
        let in_window = (StatusConsts::SUCCESS_MIN..StatusConsts::FAILURE_MIN).contains(&result.status);
        (result.error_type.is_none() && in_window)
            || self.ignored_statuses.contains(&result.status)
            || result
                .error_type
                .as_ref()
                .is_some_and(|t| self.ignored_error_types.contains(t))
    }

    pub fn assess(&self, result: &ItemResult) -> ItemOutcome {
        if self.is_success(result) {
            return ItemOutcome::Success;
        }
        if result.status == StatusConsts::TIMEOUT {
            return ItemOutcome::TimedOut;
        }
        let error_type = result.error_type.as_deref().unwrap_or("");
        let reason = result.error_reason.as_deref().unwrap_or("no reason given");
        ItemOutcome::Failure(format!(
            "backend rejected the item: status {}, error type '{}': {}",
            result.status, error_type, reason
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_window() {
        let a = ResultAssessor::default();
        assert_eq!(a.assess(&ItemResult::ok()), ItemOutcome::Success);
        let created = ItemResult {
            status: 201,
            ..Default::default()
        };
        assert!(a.is_success(&created));
        let redirect = ItemResult {
            status: 300,
            ..Default::default()
        };
        assert!(!a.is_success(&redirect));
    }

    #[test]
    fn test_error_type_fails_even_with_2xx() {
        let a = ResultAssessor::default();
        let r = ItemResult {
            status: 200,
            error_type: Some(String::new()),
            error_reason: None,
        };
        assert!(matches!(a.assess(&r), ItemOutcome::Failure(_)));
    }

    #[test]
    fn test_ignored_status_and_error_type() {
        let a = ResultAssessor::new([409], ["document_missing_exception".to_string()]);
        assert!(a.is_success(&ItemResult::error(409, "version_conflict", "old")));
        assert!(a.is_success(&ItemResult::error(500, "document_missing_exception", "gone")));
        assert!(!a.is_success(&ItemResult::error(500, "other", "gone")));
    }

    #[test]
    fn test_delete_not_found_with_empty_error_is_success() {
        let a = ResultAssessor::for_deletes();
        let r = ItemResult {
            status: 404,
            error_type: Some(String::new()),
            error_reason: None,
        };
        assert_eq!(a.assess(&r), ItemOutcome::Success);
    }

    #[test]
    fn test_timeout_is_distinct() {
        let a = ResultAssessor::default();
        assert_eq!(a.assess(&ItemResult::error(408, "timeout", "slow")), ItemOutcome::TimedOut);
        match a.assess(&ItemResult::error(500, "mapper_parsing_exception", "bad field")) {
            ItemOutcome::Failure(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("mapper_parsing_exception"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_config() {
        let cfg = MassIndexingConfig {
            ignored_statuses: vec![404],
            ..Default::default()
        };
        assert!(ResultAssessor::from_config(&cfg).is_success(&ItemResult::error(404, "", "")));
    }
}
