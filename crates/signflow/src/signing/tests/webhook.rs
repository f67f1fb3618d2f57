use std::sync::Arc;

use serde_json::json;

use super::common::*;
use crate::signing::provider::{FactoryError, ProviderKey, ProviderSettings, ProviderStrategy};
use crate::signing::status::{InternalStatus, SignerStatus};
use crate::signing::webhook::{DiscardReason, WebhookOutcome, WebhookReconciler};

#[tokio::test]
async fn signer_events_drive_document_to_signed() {
    let harness = harness();
    let document = harness.create(&["ana@example.com", "bo@example.com"]).await;

    let first = harness.webhook(signer_signed(&document, 0));
    assert_eq!(
        first,
        WebhookOutcome::Applied {
            document_id: document.id,
            internal_status: InternalStatus::InProgress,
        }
    );

    let second = harness.webhook(signer_signed(&document, 1));
    assert_eq!(
        second,
        WebhookOutcome::Applied {
            document_id: document.id,
            internal_status: InternalStatus::Signed,
        }
    );
    let stored = harness.stored(&document);
    assert_eq!(stored.provider_status.as_deref(), Some("signed"));
    assert_eq!(
        stored.signer_statuses(),
        vec![SignerStatus::Signed, SignerStatus::Signed]
    );
}

#[tokio::test]
async fn duplicate_deliveries_are_no_ops() {
    let harness = harness();
    let document = harness.create(&["ana@example.com", "bo@example.com"]).await;

    harness.webhook(signer_signed(&document, 0));
    let after_first = harness.stored(&document);

    let replay = harness.webhook(signer_signed(&document, 0));
    assert_eq!(
        replay,
        WebhookOutcome::Unchanged {
            document_id: document.id
        }
    );
    assert_eq!(harness.stored(&document), after_first);
}

#[tokio::test]
async fn deliveries_without_a_known_document_are_discarded() {
    let harness = harness();
    let document = harness.create(&["ana@example.com"]).await;

    assert_eq!(
        harness.webhook(json!({ "event": "doc_signed" })),
        WebhookOutcome::Discarded(DiscardReason::MissingDocumentToken)
    );
    assert_eq!(
        harness.webhook(json!({ "event": "doc_signed", "token": "ghost" })),
        WebhookOutcome::Discarded(DiscardReason::UnknownDocument)
    );
    assert_eq!(
        harness
            .webhooks
            .handle("docusign", &json!({ "event": "doc_signed", "token": "doc-1" })),
        WebhookOutcome::Discarded(DiscardReason::UnknownProvider)
    );
    assert_eq!(
        harness.webhook(json!({ "event": "doc_viewed", "token": "doc-1" })),
        WebhookOutcome::Discarded(DiscardReason::UnknownEvent)
    );
    assert_eq!(harness.stored(&document), document);
}

#[tokio::test]
async fn missing_signer_is_ignored() {
    let harness = harness();
    let document = harness.create(&["ana@example.com"]).await;

    let outcome = harness.webhook(json!({
        "event": "signer_signed",
        "token": "doc-1",
        "signer": { "token": "someone-else" }
    }));

    assert_eq!(
        outcome,
        WebhookOutcome::Discarded(DiscardReason::SignerNotFound)
    );
    assert_eq!(harness.stored(&document), document);
}

#[tokio::test]
async fn doc_signed_force_advances_signers() {
    let harness = harness();
    let document = harness.create(&["ana@example.com", "bo@example.com"]).await;

    let outcome = harness.webhook(json!({ "event": "doc_signed", "token": "doc-1" }));

    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            document_id: document.id,
            internal_status: InternalStatus::Signed,
        }
    );
    let stored = harness.stored(&document);
    assert_eq!(stored.provider_status.as_deref(), Some("signed"));
    assert_eq!(
        stored.signer_statuses(),
        vec![SignerStatus::Signed, SignerStatus::Signed]
    );
}

#[tokio::test]
async fn doc_signed_keeps_rejected_signers_and_stays_in_progress() {
    let harness = harness();
    let document = harness.create(&["ana@example.com", "bo@example.com"]).await;
    harness.webhook(json!({
        "event": "email_bounce",
        "token": "doc-1",
        "email": "BO@example.com"
    }));

    harness.webhook(json!({ "event": "doc_signed", "token": "doc-1" }));

    let stored = harness.stored(&document);
    assert_eq!(
        stored.signer_statuses(),
        vec![SignerStatus::Signed, SignerStatus::Rejected]
    );
    assert_eq!(stored.internal_status, InternalStatus::InProgress);
}

#[tokio::test]
async fn rejected_signer_is_not_revived_by_a_late_signature() {
    let harness = harness();
    let document = harness.create(&["ana@example.com", "bo@example.com"]).await;

    harness.webhook(json!({
        "event": "signer_authentication_failed",
        "token": "doc-1",
        "signer": { "token": signer_token(&document, 0) }
    }));
    let outcome = harness.webhook(signer_signed(&document, 0));

    assert_eq!(
        outcome,
        WebhookOutcome::Unchanged {
            document_id: document.id
        }
    );
    assert_eq!(
        harness.stored(&document).signer_statuses(),
        vec![SignerStatus::Rejected, SignerStatus::Pending]
    );
}

#[tokio::test]
async fn doc_created_records_provider_status() {
    let harness = harness();
    let document = harness.create(&["ana@example.com"]).await;

    let outcome = harness.webhook(json!({
        "event": "doc_created",
        "token": "doc-1",
        "status": "expired"
    }));

    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            document_id: document.id,
            internal_status: InternalStatus::Expired,
        }
    );
}

#[tokio::test]
async fn terminal_documents_ignore_every_event() {
    let harness = harness();
    let document = harness.create(&["ana@example.com", "bo@example.com"]).await;
    let cancelled = harness
        .orchestrator
        .cancel_document(document.id)
        .await
        .expect("cancelled");

    let events = [
        signer_signed(&document, 0),
        json!({ "event": "doc_signed", "token": "doc-1" }),
        json!({ "event": "doc_created", "token": "doc-1", "status": "pending" }),
        json!({ "event": "email_bounce", "token": "doc-1", "email": "ana@example.com" }),
    ];
    for event in events {
        assert_eq!(
            harness.webhook(event),
            WebhookOutcome::Unchanged {
                document_id: document.id
            }
        );
    }
    assert_eq!(harness.stored(&document), cancelled);
}

#[tokio::test]
async fn webhook_and_poll_converge_in_either_order() {
    let push_first = harness();
    let document = push_first.create(&["ana@example.com", "bo@example.com"]).await;
    push_first.webhook(json!({ "event": "doc_signed", "token": "doc-1" }));
    push_first.strategy.push_status(Ok(snapshot(
        "pending",
        &[("doc-1-s1", "new"), ("doc-1-s2", "new")],
    )));
    let after_stale_poll = push_first
        .orchestrator
        .refresh_status(document.id)
        .await
        .expect("refresh succeeds");

    let poll_first = harness();
    let other = poll_first.create(&["ana@example.com", "bo@example.com"]).await;
    poll_first.strategy.push_status(Ok(snapshot(
        "signed",
        &[("doc-1-s1", "signed"), ("doc-1-s2", "link-opened")],
    )));
    poll_first
        .orchestrator
        .refresh_status(other.id)
        .await
        .expect("refresh succeeds");
    let late_push = poll_first.webhook(signer_signed(&other, 1));
    let after_late_push = poll_first.stored(&other);

    assert_eq!(
        late_push,
        WebhookOutcome::Unchanged {
            document_id: other.id
        }
    );
    assert_eq!(after_stale_poll.internal_status, InternalStatus::Signed);
    assert_eq!(after_late_push.internal_status, InternalStatus::Signed);
    assert_eq!(
        after_stale_poll.signer_statuses(),
        after_late_push.signer_statuses()
    );
    assert_eq!(after_stale_poll.provider_status, after_late_push.provider_status);
}

#[tokio::test]
async fn path_provider_code_selects_the_parser_even_when_it_differs_from_the_binding() {
    let harness = harness();
    let document = harness.create(&["ana@example.com"]).await;
    let strategy = Arc::clone(&harness.strategy);
    let factory = scripted_factory(Arc::clone(&harness.strategy)).register(
        "mirror",
        Arc::new(
            move |_: &ProviderKey,
                  _: &ProviderSettings|
                  -> Result<Arc<dyn ProviderStrategy>, FactoryError> {
                Ok(Arc::clone(&strategy) as Arc<dyn ProviderStrategy>)
            },
        ),
    );
    let webhooks = WebhookReconciler::new(Arc::clone(&harness.repository), Arc::new(factory));

    let outcome = webhooks.handle("mirror", &signer_signed(&document, 0));

    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            document_id: document.id,
            internal_status: InternalStatus::Signed,
        }
    );
    assert_eq!(harness.company.binding.provider_code, SCRIPTED);
}
