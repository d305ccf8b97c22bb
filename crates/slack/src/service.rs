use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use santa_core::domain::participant::{validate_address, Participant};
use santa_core::domain::scope::ScopeStatus;
use santa_core::errors::{ApplicationError, DomainError};
use santa_core::matching::{MatchingEngine, MatchingOutcome};
use santa_core::store::{ParticipantStore, StoreError};

use crate::commands::{CommandEnvelope, CommandReply, SantaCommandService};
use crate::messages::{self, SlackMessage};
use crate::notifier::Notifier;

/// Command handlers for the four Secret Santa slash commands.
pub struct SecretSantaService {
    store: Arc<dyn ParticipantStore>,
    notifier: Arc<dyn Notifier>,
    engine: MatchingEngine,
    seed: Option<u64>,
}

impl SecretSantaService {
    pub fn new(
        store: Arc<dyn ParticipantStore>,
        notifier: Arc<dyn Notifier>,
        engine: MatchingEngine,
    ) -> Self {
        Self { store, notifier, engine, seed: None }
    }

    /// Draws every matching run from the same seed instead of OS entropy.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    async fn deliver(
        &self,
        envelope: &CommandEnvelope,
        response_url: &str,
        message: &SlackMessage,
    ) {
        if let Err(error) = self.notifier.notify(response_url, message).await {
            warn!(
                event_name = "slack.notification.failed",
                correlation_id = %envelope.correlation_id,
                command = envelope.command.as_str(),
                error = %error,
                "notification could not be delivered"
            );
        }
    }

    fn participant_from(&self, envelope: &CommandEnvelope, address: String) -> Participant {
        Participant::new(
            envelope.scope.clone(),
            envelope.user_id.clone(),
            envelope.user_name.clone(),
            address,
            envelope.response_url.clone(),
        )
    }
}

fn busy_scope_error(status: ScopeStatus, year: i32) -> DomainError {
    match status {
        ScopeStatus::Matched => DomainError::AlreadyMatched { year },
        ScopeStatus::Open | ScopeStatus::Matching => DomainError::MatchingInProgress { year },
    }
}

#[async_trait]
impl SantaCommandService for SecretSantaService {
    async fn get_match(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<CommandReply, ApplicationError> {
        let scope = &envelope.scope;
        let participant = self.store.get_by_id(&scope.key(), &envelope.user_id).await?;

        let Some(recipient) = participant.your_match else {
            return Err(DomainError::NotMatched {
                year: scope.year,
                channel_id: scope.channel_label().to_owned(),
            }
            .into());
        };

        self.deliver(envelope, &envelope.response_url, &messages::match_message(&recipient))
            .await;
        Ok(CommandReply::Deferred)
    }

    async fn initialize(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<CommandReply, ApplicationError> {
        let address = validate_address(envelope.text.as_deref())?;
        let scope = &envelope.scope;
        let host = self.participant_from(envelope, address).as_host();

        match self.store.open_scope(&host).await {
            Ok(()) => {}
            Err(StoreError::ScopeExists { .. }) => {
                return Err(DomainError::AlreadyInitialized { year: scope.year }.into());
            }
            Err(error) => return Err(error.into()),
        }

        info!(
            event_name = "santa.scope.opened",
            correlation_id = %envelope.correlation_id,
            scope_key = %scope.key(),
            host_user_id = %host.user_id,
            "secret santa initialized"
        );

        let message =
            messages::initialized_message(&host.user_id, scope.year, scope.channel_label());
        self.deliver(envelope, &envelope.response_url, &message).await;
        Ok(CommandReply::Deferred)
    }

    async fn participate(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<CommandReply, ApplicationError> {
        let address = validate_address(envelope.text.as_deref())?;
        let scope = &envelope.scope;
        let participant = self.participant_from(envelope, address);

        match self.store.enroll(&participant).await {
            Ok(()) => {}
            Err(StoreError::ScopeMissing { .. }) => {
                return Err(DomainError::NotInitialized { year: scope.year }.into());
            }
            Err(StoreError::ScopeBusy { status, .. }) => {
                return Err(busy_scope_error(status, scope.year).into());
            }
            Err(error) => return Err(error.into()),
        }

        info!(
            event_name = "santa.participant.enrolled",
            correlation_id = %envelope.correlation_id,
            scope_key = %scope.key(),
            user_id = %participant.user_id,
            "participant enrolled"
        );

        let message =
            messages::enrolled_message(&participant.user_id, scope.year, scope.channel_label());
        self.deliver(envelope, &participant.response_url, &message).await;
        Ok(CommandReply::Deferred)
    }

    async fn randomize(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<CommandReply, ApplicationError> {
        let scope = &envelope.scope;
        let key = scope.key();

        if self.store.scope_status(&key).await?.is_none() {
            return Err(DomainError::NotInitialized { year: scope.year }.into());
        }

        let caller = self.store.get_by_id(&key, &envelope.user_id).await?;
        if !caller.is_host {
            return Err(DomainError::NotHost.into());
        }

        match self.store.begin_matching(&key).await {
            Ok(()) => {}
            Err(StoreError::ScopeBusy { status, .. }) => {
                return Err(busy_scope_error(status, scope.year).into());
            }
            Err(StoreError::ScopeMissing { .. }) => {
                return Err(DomainError::NotInitialized { year: scope.year }.into());
            }
            Err(error) => return Err(error.into()),
        }

        let mut rng = self.rng();
        let outcome = self.engine.run(self.store.as_ref(), &key, &mut rng).await;

        match self.store.finish_matching(&key).await {
            Ok(status) => info!(
                event_name = "santa.matching.finished",
                correlation_id = %envelope.correlation_id,
                scope_key = %key,
                status = status.as_str(),
                "matching window closed"
            ),
            Err(finish_error) => error!(
                event_name = "santa.matching.finish_failed",
                correlation_id = %envelope.correlation_id,
                scope_key = %key,
                error = %finish_error,
                "scope stays in matching until its lease expires"
            ),
        }

        let report = match outcome? {
            MatchingOutcome::Matched(report) => report,
            MatchingOutcome::NothingToMatch => {
                return Err(DomainError::AlreadyMatched { year: scope.year }.into());
            }
        };

        info!(
            event_name = "santa.matching.completed",
            correlation_id = %envelope.correlation_id,
            scope_key = %key,
            pairs = report.assignments.len(),
            redraws = report.redraws,
            "secret santa pairs drawn"
        );

        // The draw is already committed; a failed lookup only costs the notifications.
        match self.store.get_all(&key).await {
            Ok(participants) => {
                for participant in participants {
                    if let Some(recipient) = participant.your_match.as_ref() {
                        let message = messages::match_message(recipient);
                        self.deliver(envelope, &participant.response_url, &message).await;
                    }
                }
            }
            Err(lookup_error) => warn!(
                event_name = "santa.matching.notify_skipped",
                correlation_id = %envelope.correlation_id,
                scope_key = %key,
                error = %lookup_error,
                "matched participants could not be loaded for notification"
            ),
        }

        Ok(CommandReply::Message(messages::randomized_message()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use santa_core::domain::participant::{MatchDetails, Participant, UserId};
    use santa_core::domain::scope::{Scope, ScopeKey, ScopeStatus};
    use santa_core::matching::MatchingEngine;
    use santa_core::store::{ParticipantStore, StoreError};
    use santa_db::InMemoryParticipantStore;

    use super::SecretSantaService;
    use crate::commands::{CommandEnvelope, CommandReply, CommandRouter, SantaCommand};
    use crate::messages::{ResponseType, SlackMessage};
    use crate::notifier::RecordingNotifier;

    struct Harness {
        store: Arc<InMemoryParticipantStore>,
        notifier: Arc<RecordingNotifier>,
        router: CommandRouter<SecretSantaService>,
    }

    fn harness_with(notifier: RecordingNotifier) -> Harness {
        harness_over(InMemoryParticipantStore::new(), notifier)
    }

    fn harness_over(store: InMemoryParticipantStore, notifier: RecordingNotifier) -> Harness {
        let store = Arc::new(store);
        let notifier = Arc::new(notifier);
        let service =
            SecretSantaService::new(store.clone(), notifier.clone(), MatchingEngine::default())
                .with_seed(7);
        Harness { store, notifier, router: CommandRouter::new(service) }
    }

    fn harness() -> Harness {
        harness_with(RecordingNotifier::new())
    }

    fn scope() -> Scope {
        Scope::new(None, Some("T1".into()), Some("C1".into()), 2024)
    }

    fn envelope(command: SantaCommand, user: &str, text: Option<&str>) -> CommandEnvelope {
        CommandEnvelope {
            command,
            scope: scope(),
            user_id: UserId(user.to_owned()),
            user_name: format!("{user}-name"),
            text: text.map(str::to_owned),
            response_url: format!("https://hooks.slack.test/{user}"),
            correlation_id: format!("corr-{user}"),
        }
    }

    fn error_text(reply: CommandReply) -> String {
        match reply {
            CommandReply::Message(SlackMessage { response_type: ResponseType::Ephemeral, text }) => {
                text
            }
            other => panic!("expected an ephemeral error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_secret_santa_round() {
        let h = harness();
        let key = scope().key();

        let reply =
            h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;
        assert_eq!(reply, CommandReply::Deferred);
        assert_eq!(h.store.count_all(&key).await.expect("count"), 1);
        assert!(h.store.get_by_id(&key, &UserId("H".into())).await.expect("host").is_host);

        for user in ["P1", "P2"] {
            let reply = h
                .router
                .route(envelope(SantaCommand::Participate, user, Some("9 Side Road")))
                .await;
            assert_eq!(reply, CommandReply::Deferred);
        }
        assert_eq!(h.store.count_all(&key).await.expect("count"), 3);

        let reply = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(
            reply,
            CommandReply::Message(SlackMessage::in_channel(
                "Secret Santa pairs have been randomized!"
            ))
        );
        assert_eq!(h.store.count_matched(&key).await.expect("matched"), 3);
        assert_eq!(h.store.scope_status(&key).await.expect("status"), Some(ScopeStatus::Matched));

        let everyone = h.store.get_all(&key).await.expect("all");
        let recipients: HashSet<UserId> = everyone
            .iter()
            .map(|p| p.your_match.as_ref().expect("matched").user_id.clone())
            .collect();
        assert_eq!(recipients.len(), 3);
        assert!(everyone
            .iter()
            .all(|p| p.your_match.as_ref().map(|m| &m.user_id) != Some(&p.user_id)));

        let again = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(
            error_text(again),
            "Secret Santa 2024 pairs for this Slack channel have already been matched"
        );

        let sent = h.notifier.sent();
        let match_notices =
            sent.iter().filter(|(_, message)| message.text.starts_with("Your match is")).count();
        assert_eq!(match_notices, 3);
        assert!(sent.iter().any(|(url, message)| url == "https://hooks.slack.test/H"
            && message.text == "<@H> just initiated Secret Santa 2024 for the Slack channel <#C1>"));
    }

    #[tokio::test]
    async fn get_reports_match_only_after_randomize() {
        let h = harness();
        h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;
        h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;

        let early = h.router.route(envelope(SantaCommand::Get, "P1", None)).await;
        assert_eq!(
            error_text(early),
            "Secret Santa 2024 pairs have not been matched yet for the Slack channel <#C1>"
        );

        h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        let reply = h.router.route(envelope(SantaCommand::Get, "P1", None)).await;
        assert_eq!(reply, CommandReply::Deferred);

        let (url, message) = h.notifier.sent().pop().expect("match notice");
        assert_eq!(url, "https://hooks.slack.test/P1");
        assert_eq!(message.response_type, ResponseType::Ephemeral);
        assert_eq!(
            message.text,
            "Your match is <@H>. Prepare your gift and send it to 123 Main St. Thank you and happy New Year!"
        );
    }

    #[tokio::test]
    async fn join_before_initialize_is_rejected() {
        let h = harness();
        let reply =
            h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;
        assert_eq!(
            error_text(reply),
            "Secret Santa 2024 has not been initialized yet for this Slack channel"
        );
        assert_eq!(h.store.count_all(&scope().key()).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn short_address_is_rejected() {
        let h = harness();
        for command in [SantaCommand::Initialize, SantaCommand::Participate] {
            let reply = h.router.route(envelope(command, "U1", Some("1 A"))).await;
            assert_eq!(
                error_text(reply),
                "Please provide a valid postal address by typing it after the command"
            );
        }
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn second_initialize_and_duplicate_join_are_rejected() {
        let h = harness();
        h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;

        let reply =
            h.router.route(envelope(SantaCommand::Initialize, "X", Some("555 Other St"))).await;
        assert_eq!(
            error_text(reply),
            "Secret Santa 2024 has already been initialized for this Slack channel"
        );

        h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;
        let reply =
            h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;
        assert_eq!(
            error_text(reply),
            "You are already registered in Secret Santa for this Slack channel"
        );
        assert_eq!(h.store.count_all(&scope().key()).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn only_the_host_may_randomize() {
        let h = harness();
        h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;
        h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;

        let reply = h.router.route(envelope(SantaCommand::Randomize, "P1", None)).await;
        assert_eq!(
            error_text(reply),
            "You are not the host of this secret santa party, hence cannot randomize pairs"
        );
        assert_eq!(h.store.count_matched(&scope().key()).await.expect("matched"), 0);
    }

    #[tokio::test]
    async fn randomize_with_only_the_host_leaves_scope_open() {
        let h = harness();
        let key = scope().key();
        h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;

        let reply = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(
            error_text(reply),
            "Secret Santa needs at least two unmatched participants to randomize pairs"
        );
        assert_eq!(h.store.scope_status(&key).await.expect("status"), Some(ScopeStatus::Open));

        h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;
        let reply = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(reply, CommandReply::Message(crate::messages::randomized_message()));
    }

    #[tokio::test]
    async fn randomize_uninitialized_scope_is_rejected() {
        let h = harness();
        let reply = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(
            error_text(reply),
            "Secret Santa 2024 has not been initialized yet for this Slack channel"
        );
    }

    #[tokio::test]
    async fn notification_failures_do_not_change_the_reply() {
        let h = harness_with(RecordingNotifier::failing());
        let reply =
            h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;
        assert_eq!(reply, CommandReply::Deferred);
        h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;

        let reply = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(reply, CommandReply::Message(crate::messages::randomized_message()));
        assert_eq!(h.store.count_matched(&scope().key()).await.expect("matched"), 2);
    }

    #[tokio::test]
    async fn join_after_randomize_is_rejected() {
        let h = harness();
        let key = scope().key();
        h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;
        h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;
        h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;

        let reply =
            h.router.route(envelope(SantaCommand::Participate, "P2", Some("8 Birch Lane"))).await;
        assert_eq!(
            error_text(reply),
            "Secret Santa 2024 pairs for this Slack channel have already been matched"
        );
        assert_eq!(h.store.count_all(&key).await.expect("count"), 2);
        assert_eq!(h.store.scope_status(&key).await.expect("status"), Some(ScopeStatus::Matched));
        assert!(h.store.get_unmatched(&key).await.expect("unmatched").is_empty());
    }

    #[tokio::test]
    async fn abandoned_matching_run_is_recovered_after_lease() {
        let store = InMemoryParticipantStore::new().with_matching_lease(Duration::from_millis(20));
        let h = harness_over(store, RecordingNotifier::new());
        let key = scope().key();
        h.router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;
        h.router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;

        // A run that claimed the scope and never finished.
        h.store.begin_matching(&key).await.expect("claim");
        let reply = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(
            error_text(reply),
            "Secret Santa 2024 pairs are already being matched for this Slack channel"
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let reply = h.router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(reply, CommandReply::Message(crate::messages::randomized_message()));
        assert_eq!(h.store.scope_status(&key).await.expect("status"), Some(ScopeStatus::Matched));
    }

    /// Serves everything from memory except `get_all`.
    struct ListingOutage {
        inner: InMemoryParticipantStore,
    }

    #[async_trait]
    impl ParticipantStore for ListingOutage {
        async fn count_all(&self, scope: &ScopeKey) -> Result<u64, StoreError> {
            self.inner.count_all(scope).await
        }

        async fn count_matched(&self, scope: &ScopeKey) -> Result<u64, StoreError> {
            self.inner.count_matched(scope).await
        }

        async fn get_by_id(
            &self,
            scope: &ScopeKey,
            user_id: &UserId,
        ) -> Result<Participant, StoreError> {
            self.inner.get_by_id(scope, user_id).await
        }

        async fn get_unmatched(&self, scope: &ScopeKey) -> Result<Vec<Participant>, StoreError> {
            self.inner.get_unmatched(scope).await
        }

        async fn get_all(&self, _scope: &ScopeKey) -> Result<Vec<Participant>, StoreError> {
            Err(StoreError::Backend("listing unavailable".to_string()))
        }

        async fn register(&self, participant: &Participant) -> Result<(), StoreError> {
            self.inner.register(participant).await
        }

        async fn record_match(
            &self,
            scope: &ScopeKey,
            giver: &UserId,
            recipient: &MatchDetails,
        ) -> Result<(), StoreError> {
            self.inner.record_match(scope, giver, recipient).await
        }

        async fn scope_status(
            &self,
            scope: &ScopeKey,
        ) -> Result<Option<ScopeStatus>, StoreError> {
            self.inner.scope_status(scope).await
        }

        async fn open_scope(&self, host: &Participant) -> Result<(), StoreError> {
            self.inner.open_scope(host).await
        }

        async fn enroll(&self, participant: &Participant) -> Result<(), StoreError> {
            self.inner.enroll(participant).await
        }

        async fn begin_matching(&self, scope: &ScopeKey) -> Result<(), StoreError> {
            self.inner.begin_matching(scope).await
        }

        async fn finish_matching(&self, scope: &ScopeKey) -> Result<ScopeStatus, StoreError> {
            self.inner.finish_matching(scope).await
        }
    }

    #[tokio::test]
    async fn randomize_reports_success_when_notification_lookup_fails() {
        let store = Arc::new(ListingOutage { inner: InMemoryParticipantStore::new() });
        let notifier = Arc::new(RecordingNotifier::new());
        let router = CommandRouter::new(
            SecretSantaService::new(store.clone(), notifier.clone(), MatchingEngine::default())
                .with_seed(7),
        );
        let key = scope().key();

        router.route(envelope(SantaCommand::Initialize, "H", Some("123 Main St"))).await;
        router.route(envelope(SantaCommand::Participate, "P1", Some("77 Pine Ave"))).await;

        let reply = router.route(envelope(SantaCommand::Randomize, "H", None)).await;
        assert_eq!(reply, CommandReply::Message(crate::messages::randomized_message()));
        assert_eq!(store.count_matched(&key).await.expect("matched"), 2);
        assert!(notifier
            .sent()
            .iter()
            .all(|(_, message)| !message.text.starts_with("Your match is")));
    }
}
