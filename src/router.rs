use std::fmt;

use serde::{Deserialize, Serialize};

/// Routes a dispute description to a dispute category using weighted keyword scoring.
pub struct DisputeRouter;

impl DisputeRouter {
    /// Weighted keyword-based category assignment from a dispute description.
    pub fn route(description: &str) -> String {
        let lower = description.to_lowercase();

        let keyword_categories: &[(&str, &str, u32)] = &[
            ("fraud", "fraudulent_charge", 10),
            ("unauthorized", "fraudulent_charge", 8),
            ("stolen", "fraudulent_charge", 7),
            ("not received", "product_not_received", 10),
            ("never arrived", "product_not_received", 8),
            ("missing", "product_not_received", 5),
            ("duplicate", "duplicate_charge", 10),
            ("charged twice", "duplicate_charge", 10),
            ("twice", "duplicate_charge", 5),
            ("refund", "refund_not_processed", 8),
            ("damaged", "product_unacceptable", 8),
            ("defective", "product_unacceptable", 7),
            ("wrong item", "product_unacceptable", 7),
            ("subscription", "subscription_canceled", 6),
            ("cancel", "subscription_canceled", 5),
        ];

        let mut scores: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();

        for &(keyword, category, weight) in keyword_categories {
            if lower.contains(keyword) {
                *scores.entry(category).or_insert(0) += weight;
            }
        }

        scores
            .into_iter()
            .max_by_key(|&(_, score)| score)
            .map(|(category, _)| category.to_string())
            .unwrap_or_else(|| "general_inquiry".to_string())
    }
}

/// Priority tier assigned to a dispute at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputePriority {
    Low,
    Normal,
    High,
}

impl fmt::Display for DisputePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisputePriority::Low => write!(f, "low"),
            DisputePriority::Normal => write!(f, "normal"),
            DisputePriority::High => write!(f, "high"),
        }
    }
}

/// Selects a priority tier based on urgency inferred from the description.
pub struct PrioritySelector;

impl PrioritySelector {
    /// Urgency-based priority selection using weighted keyword scoring.
    pub fn select(description: &str) -> DisputePriority {
        let lower = description.to_lowercase();

        let low_keywords: &[(&str, u32)] = &[
            ("question", 5),
            ("clarif", 5),
            ("minor", 7),
            ("whenever", 5),
            ("small amount", 7),
        ];

        let high_keywords: &[(&str, u32)] = &[
            ("urgent", 10),
            ("fraud", 8),
            ("stolen", 8),
            ("legal", 8),
            ("chargeback deadline", 10),
            ("large", 5),
            ("immediately", 7),
        ];

        let mut low_score: u32 = 0;
        let mut high_score: u32 = 0;

        for &(keyword, weight) in low_keywords {
            if lower.contains(keyword) {
                low_score += weight;
            }
        }

        for &(keyword, weight) in high_keywords {
            if lower.contains(keyword) {
                high_score += weight;
            }
        }

        if high_score > low_score && high_score > 0 {
            DisputePriority::High
        } else if low_score > high_score {
            DisputePriority::Low
        } else {
            DisputePriority::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_fraud_keywords() {
        assert_eq!(
            DisputeRouter::route("Unauthorized charge, my card was stolen"),
            "fraudulent_charge"
        );
    }

    #[test]
    fn routes_duplicate_charge() {
        assert_eq!(
            DisputeRouter::route("I was charged twice for the same order"),
            "duplicate_charge"
        );
    }

    #[test]
    fn routes_missing_delivery() {
        assert_eq!(
            DisputeRouter::route("Package never arrived, item not received"),
            "product_not_received"
        );
    }

    #[test]
    fn unknown_description_falls_back_to_general() {
        assert_eq!(DisputeRouter::route("something odd happened"), "general_inquiry");
    }

    #[test]
    fn priority_high_on_urgency() {
        assert_eq!(
            PrioritySelector::select("Urgent: fraud on my account, act immediately"),
            DisputePriority::High
        );
    }

    #[test]
    fn priority_low_on_minor_questions() {
        assert_eq!(
            PrioritySelector::select("Just a question about a minor fee"),
            DisputePriority::Low
        );
    }

    #[test]
    fn priority_defaults_to_normal() {
        assert_eq!(
            PrioritySelector::select("charged for an order I returned"),
            DisputePriority::Normal
        );
    }

    #[test]
    fn priority_display() {
        assert_eq!(DisputePriority::High.to_string(), "high");
        assert_eq!(DisputePriority::Normal.to_string(), "normal");
        assert_eq!(DisputePriority::Low.to_string(), "low");
    }
}
