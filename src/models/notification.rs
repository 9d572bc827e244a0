// SPDX-License-Identifier: MIT

//! Inbound webhook notification payload and its schema validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::Validate;

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Collection types Fitbit sends notifications for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectionType {
    Activities,
    Body,
    Foods,
    Sleep,
    UserRevokedAccess,
    DeleteUser,
}

impl CollectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionType::Activities => "activities",
            CollectionType::Body => "body",
            CollectionType::Foods => "foods",
            CollectionType::Sleep => "sleep",
            CollectionType::UserRevokedAccess => "userRevokedAccess",
            CollectionType::DeleteUser => "deleteUser",
        }
    }

    /// True for the account-state notifications that bypass data fetching.
    pub fn is_account_state(self) -> bool {
        matches!(
            self,
            CollectionType::UserRevokedAccess | CollectionType::DeleteUser
        )
    }
}

impl std::fmt::Display for CollectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of a Fitbit webhook notification batch.
///
/// The gateway validates every record before enqueuing any of them; a
/// single invalid record rejects the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    pub collection_type: CollectionType,
    #[validate(regex(path = *ISO_DATE_RE))]
    pub date: String,
    #[validate(length(min = 1))]
    pub owner_id: String,
    pub owner_type: String,
    #[validate(length(min = 1))]
    pub subscription_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_notification() -> WebhookNotification {
        WebhookNotification {
            collection_type: CollectionType::Activities,
            date: "2024-01-15".to_string(),
            owner_id: "ABC123".to_string(),
            owner_type: "user".to_string(),
            subscription_id: "7-activities-1".to_string(),
        }
    }

    #[test]
    fn test_valid_notification_passes() {
        assert!(valid_notification().validate().is_ok());
    }

    #[test]
    fn test_bad_date_fails_validation() {
        let mut n = valid_notification();
        n.date = "15/01/2024".to_string();
        assert!(n.validate().is_err());
    }

    #[test]
    fn test_empty_owner_id_fails_validation() {
        let mut n = valid_notification();
        n.owner_id = String::new();
        assert!(n.validate().is_err());
    }

    #[test]
    fn test_collection_type_round_trip() {
        let json = r#"{"collectionType":"userRevokedAccess","date":"2024-01-15","ownerId":"X","ownerType":"user","subscriptionId":"s1"}"#;
        let n: WebhookNotification = serde_json::from_str(json).unwrap();
        assert_eq!(n.collection_type, CollectionType::UserRevokedAccess);
        assert!(n.collection_type.is_account_state());
        assert_eq!(n.collection_type.to_string(), "userRevokedAccess");
    }

    #[test]
    fn test_unknown_collection_type_rejected() {
        let json = r#"{"collectionType":"heartrate","date":"2024-01-15","ownerId":"X","ownerType":"user","subscriptionId":"s1"}"#;
        assert!(serde_json::from_str::<WebhookNotification>(json).is_err());
    }
}
