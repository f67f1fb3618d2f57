//! Attention signals and aggregate figures over a tenant's documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::domain::{Document, DocumentId};
use super::status::InternalStatus;

const PENDING_TOO_LONG_DAYS: i64 = 7;
const STAGNATED_DAYS: i64 = 3;
const EXPIRING_SOON_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Expired,
    PendingTooLong,
    Stagnated,
    ExpiringSoon,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentAlert {
    pub document_id: DocumentId,
    pub document_name: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    /// The instant the alert is anchored to: deadline, creation, or last update.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetrics {
    pub total_documents: usize,
    pub status_breakdown: BTreeMap<&'static str, usize>,
    pub signature_rate: f64,
    pub average_signature_time_hours: Option<f64>,
    pub expiring_soon_count: usize,
}

/// Whole days elapsed from `from` to `to`, floored.
fn whole_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().div_euclid(86_400)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn alert_for(document: &Document, now: DateTime<Utc>) -> Option<DocumentAlert> {
    let make = |kind, severity, message: String, created_at| DocumentAlert {
        document_id: document.id,
        document_name: document.name.clone(),
        kind,
        severity,
        message,
        created_at,
    };
    let name = &document.name;
    let mut alert = None;

    match (document.internal_status, document.date_limit_to_sign()) {
        (InternalStatus::Pending, Some(deadline)) => {
            if now > deadline {
                alert = Some(make(
                    AlertKind::Expired,
                    AlertSeverity::Error,
                    format!("Document \"{name}\" expired and needs attention"),
                    deadline,
                ));
            }
            let days_left = whole_days(now, deadline);
            if (0..=EXPIRING_SOON_DAYS).contains(&days_left) {
                alert = Some(make(
                    AlertKind::ExpiringSoon,
                    AlertSeverity::Warning,
                    format!("Document \"{name}\" expires in {days_left} day(s)"),
                    deadline,
                ));
            }
        }
        (InternalStatus::Pending, None) => {
            let days = whole_days(document.created_at, now);
            if days >= PENDING_TOO_LONG_DAYS {
                alert = Some(make(
                    AlertKind::PendingTooLong,
                    AlertSeverity::Warning,
                    format!("Document \"{name}\" has been pending for {days} days"),
                    document.created_at,
                ));
            }
        }
        (InternalStatus::InProgress, _) => {
            let days = whole_days(document.updated_at, now);
            if days >= STAGNATED_DAYS {
                alert = Some(make(
                    AlertKind::Stagnated,
                    AlertSeverity::Warning,
                    format!("Document \"{name}\" has been in progress for {days} days without updates"),
                    document.updated_at,
                ));
            }
        }
        _ => {}
    }

    alert
}

/// At most one alert per document, most severe first, then oldest first.
pub fn document_alerts(documents: &[Document], now: DateTime<Utc>) -> Vec<DocumentAlert> {
    let mut alerts: Vec<DocumentAlert> = documents
        .iter()
        .filter_map(|document| alert_for(document, now))
        .collect();
    alerts.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then(a.created_at.cmp(&b.created_at))
    });
    alerts
}

pub fn document_metrics(documents: &[Document], now: DateTime<Utc>) -> DocumentMetrics {
    let total = documents.len();
    let mut status_breakdown: BTreeMap<&'static str, usize> = InternalStatus::ALL
        .iter()
        .map(|status| (status.label(), 0))
        .collect();
    for document in documents {
        *status_breakdown
            .entry(document.internal_status.label())
            .or_default() += 1;
    }

    let signed: Vec<&Document> = documents
        .iter()
        .filter(|document| document.internal_status == InternalStatus::Signed)
        .collect();
    let signature_rate = if total > 0 {
        round2(signed.len() as f64 / total as f64 * 100.0)
    } else {
        0.0
    };
    let average_signature_time_hours = if signed.is_empty() {
        None
    } else {
        let hours: f64 = signed
            .iter()
            .map(|document| (document.updated_at - document.created_at).num_seconds() as f64 / 3600.0)
            .sum();
        Some(round2(hours / signed.len() as f64))
    };

    let horizon = now + Duration::days(EXPIRING_SOON_DAYS);
    let expiring_soon_count = documents
        .iter()
        .filter(|document| document.internal_status == InternalStatus::Pending)
        .filter_map(Document::date_limit_to_sign)
        .filter(|deadline| *deadline >= now && *deadline <= horizon)
        .count();

    DocumentMetrics {
        total_documents: total,
        status_breakdown,
        signature_rate,
        average_signature_time_hours,
        expiring_soon_count,
    }
}
