use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicI64, Ordering},
    },
};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    valet_common::{PeerRef, StrategyKind, UserInfo},
};

use crate::{
    cache::IdentityCache,
    directory::{ChannelInfo, InputPeer, PeerDirectory},
    error::{Error, Result, StrategyFailure},
    record::IdentityRecord,
    strategy::{self, Limits, LookupContext},
};

/// Strategy order and thresholds, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub strategies: Vec<StrategyKind>,
    /// Appended to `strategies` by [`PeerResolver::resolve_within_group`].
    pub group_strategies: Vec<StrategyKind>,
    /// Consecutive failures after which an id is refused locally.
    pub failure_threshold: u32,
    pub limits: Limits,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strategies: StrategyKind::DEFAULT_ORDER.to_vec(),
            group_strategies: StrategyKind::GROUP_ORDER.to_vec(),
            failure_threshold: 3,
            limits: Limits::default(),
        }
    }
}

/// Turns peer ids into addressable protocol peers.
pub struct PeerResolver {
    directory: Arc<dyn PeerDirectory>,
    cache: Arc<IdentityCache>,
    channels: RwLock<HashMap<i64, ChannelInfo>>,
    config: ResolverConfig,
    /// Zero until the client reports who we are.
    self_id: AtomicI64,
}

impl PeerResolver {
    pub fn new(
        directory: Arc<dyn PeerDirectory>,
        cache: Arc<IdentityCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            directory,
            cache,
            channels: RwLock::new(HashMap::new()),
            config,
            self_id: AtomicI64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn set_self_id(&self, id: i64) {
        self.self_id.store(id, Ordering::Relaxed);
    }

    pub fn self_id(&self) -> Option<i64> {
        match self.self_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_blocked(&self, user_id: i64) -> bool {
        self.cache.failure_count(user_id) >= self.config.failure_threshold
    }

    fn context(&self) -> LookupContext<'_> {
        LookupContext {
            directory: self.directory.as_ref(),
            limits: self.config.limits,
            group: None,
            message: None,
        }
    }

    // ── Users ───────────────────────────────────────────────────────────────

    /// Find the access hash for `user_id`, from cache or by discovery.
    pub async fn resolve(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<IdentityRecord> {
        self.resolve_with(user_id, &self.config.strategies, &self.context(), cancel)
            .await
    }

    /// Like [`resolve`](Self::resolve), then also asks `group` before giving up.
    pub async fn resolve_within_group(
        &self,
        group: &InputPeer,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<IdentityRecord> {
        let plan: Vec<_> = self
            .config
            .strategies
            .iter()
            .chain(&self.config.group_strategies)
            .copied()
            .collect();
        let ctx = LookupContext {
            group: Some(group),
            ..self.context()
        };
        self.resolve_with(user_id, &plan, &ctx, cancel).await
    }

    /// Resolve a user through a message it sent in `chat`.
    ///
    /// The message lookup ignores the failure counter and resets it on
    /// success. If it fails, this falls back to [`resolve`](Self::resolve).
    pub async fn resolve_from_message(
        &self,
        chat: &InputPeer,
        message_id: i32,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<IdentityRecord> {
        if let Some(record) = self.cache.get(user_id) {
            return Ok(record);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let ctx = LookupContext {
            message: Some((chat, message_id)),
            ..self.context()
        };
        match self.attempt(StrategyKind::Message, user_id, &ctx, cancel).await? {
            Ok(record) => {
                self.cache.reset_failures(user_id);
                return Ok(record);
            },
            Err(failure) => debug!(peer_id = user_id, reason = %failure.reason, "message lookup failed"),
        }
        self.resolve(user_id, cancel).await
    }

    async fn resolve_with(
        &self,
        user_id: i64,
        plan: &[StrategyKind],
        ctx: &LookupContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<IdentityRecord> {
        if let Some(record) = self.cache.get(user_id) {
            debug!(peer_id = user_id, "identity cache hit");
            return Ok(record);
        }

        let failures = self.cache.failure_count(user_id);
        if failures >= self.config.failure_threshold {
            debug!(peer_id = user_id, failures, "identity blocked, not querying");
            return Err(Error::Blocked {
                peer_id: user_id,
                failures,
            });
        }

        let mut attempts = Vec::new();
        for &kind in plan {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if !strategy::applies(kind, ctx) {
                continue;
            }
            match self.attempt(kind, user_id, ctx, cancel).await? {
                Ok(record) => {
                    self.cache.reset_failures(user_id);
                    return Ok(record);
                },
                Err(failure) => attempts.push(failure),
            }
        }

        let failures = self.cache.record_failure(user_id);
        warn!(peer_id = user_id, failures, attempts = attempts.len(), "identity unresolved");
        Err(Error::Unresolved {
            peer_id: user_id,
            attempts,
        })
    }

    /// One strategy. The outer error is cancellation only.
    async fn attempt(
        &self,
        kind: StrategyKind,
        user_id: i64,
        ctx: &LookupContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<IdentityRecord, StrategyFailure>> {
        let outcome = strategy::run(kind, user_id, ctx).await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let failure = |reason: String| StrategyFailure {
            strategy: kind,
            reason,
        };
        let discovery = match outcome {
            Ok(d) => d,
            Err(e) => {
                debug!(peer_id = user_id, strategy = %kind, error = %e, "strategy failed");
                return Ok(Err(failure(e.to_string())));
            },
        };

        self.cache
            .put_many(discovery.seen.into_iter().filter(|u| u.id != user_id))
            .await;
        match discovery.target {
            Some(user) if user.access_hash != 0 => {
                info!(peer_id = user_id, strategy = %kind, "identity resolved");
                Ok(Ok(self.cache.put(user).await))
            },
            Some(_) => Ok(Err(failure("returned no access hash".into()))),
            None => Ok(Err(failure("not found".into()))),
        }
    }

    /// Warm the cache from identities seen in any protocol response.
    pub async fn cache_from_bulk(&self, users: &[UserInfo]) -> usize {
        self.cache.put_many(users.iter().cloned()).await
    }

    /// Forget the cached hash and failure count of `user_id`.
    pub async fn invalidate(&self, user_id: i64) {
        self.cache.remove(user_id).await;
        self.cache.reset_failures(user_id);
        debug!(peer_id = user_id, "identity invalidated");
    }

    // ── Addressing ──────────────────────────────────────────────────────────

    /// Turn a signed peer id into a call target, resolving hashes as needed.
    pub async fn addressable(&self, peer_id: i64, cancel: &CancellationToken) -> Result<InputPeer> {
        let peer = PeerRef::decode(peer_id).ok_or(Error::InvalidPeer { peer_id })?;
        match peer {
            PeerRef::User(id) if self.self_id() == Some(id) => Ok(InputPeer::SelfPeer),
            PeerRef::User(id) => {
                let record = self.resolve(id, cancel).await?;
                Ok(InputPeer::User {
                    user_id: id,
                    access_hash: record.access_hash,
                })
            },
            PeerRef::Chat(id) => Ok(InputPeer::Chat { chat_id: id }),
            PeerRef::Channel(id) => Ok(self.resolve_channel(id, cancel).await?.input_peer()),
        }
    }

    /// Find a channel's access hash: direct lookup, then the conversation
    /// list, then a longer conversation list.
    pub async fn resolve_channel(
        &self,
        channel_id: i64,
        cancel: &CancellationToken,
    ) -> Result<ChannelInfo> {
        if let Some(found) = self.known_channel(channel_id) {
            return Ok(found);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match self.directory.channel_by_id(channel_id).await {
            Ok(Some(channel)) => return Ok(self.remember_channel(channel)),
            Ok(None) => {},
            Err(e) => debug!(channel_id, error = %e, "direct channel lookup failed"),
        }

        let limits = self.config.limits;
        for limit in [limits.channel_dialogs, limits.channel_dialogs_extended] {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let page = match self.directory.dialogs(limit).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(channel_id, limit, error = %e, "dialog scan failed");
                    continue;
                },
            };
            self.cache.put_many(page.users).await;
            for channel in page.channels {
                self.remember_channel(channel);
            }
            if let Some(found) = self.known_channel(channel_id) {
                return Ok(found);
            }
        }

        warn!(channel_id, "channel unresolved");
        Err(Error::ChannelNotFound { channel_id })
    }

    fn known_channel(&self, channel_id: i64) -> Option<ChannelInfo> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&channel_id)
            .cloned()
    }

    fn remember_channel(&self, channel: ChannelInfo) -> ChannelInfo {
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.id, channel.clone());
        channel
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {async_trait::async_trait, rstest::rstest};

    use {super::*, crate::directory::DialogPage};

    /// Scripted protocol client that records every call.
    #[derive(Default)]
    struct FakeDirectory {
        calls: Mutex<Vec<&'static str>>,
        direct: Vec<UserInfo>,
        dialog_users: Vec<UserInfo>,
        contacts: Vec<UserInfo>,
        search: Vec<UserInfo>,
        participant: Vec<UserInfo>,
        members: Vec<UserInfo>,
        from_message: Vec<UserInfo>,
        channels: Vec<ChannelInfo>,
        dialog_channels: Vec<ChannelInfo>,
        /// Dialog limit at which `dialog_channels` start showing up.
        channel_visible_at: usize,
        broken: Vec<&'static str>,
    }

    impl FakeDirectory {
        fn call(&self, name: &'static str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(name);
            if self.broken.contains(&name) {
                anyhow::bail!("{name} rpc error");
            }
            Ok(())
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn pick(list: &[UserInfo], id: i64) -> Option<UserInfo> {
            list.iter().find(|u| u.id == id).cloned()
        }
    }

    #[async_trait]
    impl PeerDirectory for FakeDirectory {
        async fn user_by_id(&self, user_id: i64) -> anyhow::Result<Option<UserInfo>> {
            self.call("direct")?;
            Ok(Self::pick(&self.direct, user_id))
        }

        async fn user_from_message(
            &self,
            _chat: &InputPeer,
            _message_id: i32,
            user_id: i64,
        ) -> anyhow::Result<Option<UserInfo>> {
            self.call("message")?;
            Ok(Self::pick(&self.from_message, user_id))
        }

        async fn dialogs(&self, limit: usize) -> anyhow::Result<DialogPage> {
            self.call("dialogs")?;
            let channels = if limit >= self.channel_visible_at {
                self.dialog_channels.clone()
            } else {
                Vec::new()
            };
            Ok(DialogPage {
                users: self.dialog_users.clone(),
                channels,
            })
        }

        async fn contacts(&self) -> anyhow::Result<Vec<UserInfo>> {
            self.call("contacts")?;
            Ok(self.contacts.clone())
        }

        async fn search(&self, _query: &str, _limit: usize) -> anyhow::Result<Vec<UserInfo>> {
            self.call("search")?;
            Ok(self.search.clone())
        }

        async fn group_participant(
            &self,
            _group: &InputPeer,
            user_id: i64,
        ) -> anyhow::Result<Option<UserInfo>> {
            self.call("participant")?;
            Ok(Self::pick(&self.participant, user_id))
        }

        async fn group_members(
            &self,
            _group: &InputPeer,
            query: &str,
            _limit: usize,
        ) -> anyhow::Result<Vec<UserInfo>> {
            self.call(if query.is_empty() {
                "members_recent"
            } else {
                "members_search"
            })?;
            Ok(if query.is_empty() {
                self.members.clone()
            } else {
                Vec::new()
            })
        }

        async fn channel_by_id(&self, channel_id: i64) -> anyhow::Result<Option<ChannelInfo>> {
            self.call("channel")?;
            Ok(self.channels.iter().find(|c| c.id == channel_id).cloned())
        }
    }

    fn resolver(fake: FakeDirectory) -> (Arc<FakeDirectory>, PeerResolver) {
        resolver_with(fake, ResolverConfig::default())
    }

    fn resolver_with(fake: FakeDirectory, config: ResolverConfig) -> (Arc<FakeDirectory>, PeerResolver) {
        let fake = Arc::new(fake);
        let resolver = PeerResolver::new(
            Arc::clone(&fake) as Arc<dyn PeerDirectory>,
            Arc::new(IdentityCache::default()),
            config,
        );
        (fake, resolver)
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn bulk_warm_then_resolve_makes_no_calls() {
        let (fake, resolver) = resolver(FakeDirectory::default());
        resolver.cache_from_bulk(&[UserInfo::new(42, 99)]).await;

        let record = resolver.resolve(42, &token()).await.unwrap();
        assert_eq!((record.id, record.access_hash), (42, 99));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn strategies_run_in_order_until_one_succeeds() {
        let (fake, resolver) = resolver(FakeDirectory {
            broken: vec!["direct"],
            contacts: vec![UserInfo::new(5, 55)],
            ..Default::default()
        });

        let record = resolver.resolve(5, &token()).await.unwrap();
        assert_eq!(record.access_hash, 55);
        assert_eq!(fake.calls(), ["direct", "dialogs", "contacts"]);
        assert_eq!(resolver.cache().failure_count(5), 0);
    }

    #[tokio::test]
    async fn configured_order_is_respected() {
        let config = ResolverConfig {
            strategies: vec![StrategyKind::Search, StrategyKind::Direct],
            ..Default::default()
        };
        let (fake, resolver) = resolver_with(
            FakeDirectory {
                direct: vec![UserInfo::new(5, 1)],
                ..Default::default()
            },
            config,
        );
        resolver.resolve(5, &token()).await.unwrap();
        assert_eq!(fake.calls(), ["search", "direct"]);
    }

    #[tokio::test]
    async fn scans_warm_the_cache_with_bystanders() {
        let (fake, resolver) = resolver(FakeDirectory {
            dialog_users: vec![UserInfo::new(1, 10), UserInfo::new(2, 20)],
            ..Default::default()
        });

        resolver.resolve(1, &token()).await.unwrap();
        let calls_after_first = fake.calls().len();
        let bystander = resolver.resolve(2, &token()).await.unwrap();
        assert_eq!(bystander.access_hash, 20);
        assert_eq!(fake.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn hashless_answers_do_not_count_as_success() {
        let (_fake, resolver) = resolver(FakeDirectory {
            direct: vec![UserInfo::new(8, 0)],
            ..Default::default()
        });
        let err = resolver.resolve(8, &token()).await.unwrap_err();
        match err {
            Error::Unresolved { attempts, .. } => {
                assert_eq!(attempts.len(), 4);
                assert_eq!(attempts[0].reason, "returned no access hash");
            },
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn three_failures_block_until_invalidated() {
        let (fake, resolver) = resolver(FakeDirectory::default());

        for expected in 1..=3 {
            let err = resolver.resolve(7, &token()).await.unwrap_err();
            assert!(matches!(err, Error::Unresolved { .. }));
            assert_eq!(resolver.cache().failure_count(7), expected);
        }
        let calls = fake.calls().len();
        assert_eq!(calls, 12);

        let err = resolver.resolve(7, &token()).await.unwrap_err();
        assert!(err.is_blocked());
        assert_eq!(fake.calls().len(), calls);

        resolver.invalidate(7).await;
        let err = resolver.resolve(7, &token()).await.unwrap_err();
        assert!(matches!(err, Error::Unresolved { .. }));
        assert_eq!(fake.calls().len(), calls + 4);
    }

    #[tokio::test]
    async fn unresolved_message_suggests_remediation() {
        let (_fake, resolver) = resolver(FakeDirectory {
            broken: vec!["contacts"],
            ..Default::default()
        });
        let text = resolver.resolve(3, &token()).await.unwrap_err().to_string();
        assert!(text.contains("contacts: contacts rpc error"));
        assert!(text.contains("clear its cache entry and retry"));
    }

    #[tokio::test]
    async fn group_context_adds_group_strategies() {
        let group = InputPeer::Channel {
            channel_id: 77,
            access_hash: 1,
        };
        let (fake, resolver) = resolver(FakeDirectory {
            members: vec![UserInfo::new(9, 90), UserInfo::new(10, 100)],
            ..Default::default()
        });

        let record = resolver.resolve_within_group(&group, 9, &token()).await.unwrap();
        assert_eq!(record.access_hash, 90);
        assert_eq!(fake.calls(), [
            "direct",
            "dialogs",
            "contacts",
            "search",
            "participant",
            "members_search",
            "members_recent"
        ]);
        assert!(resolver.cache().get(10).is_some());

        // Without group context the group strategies are skipped.
        let err = resolver.resolve(11, &token()).await.unwrap_err();
        let Error::Unresolved { attempts, .. } = err else {
            panic!("expected unresolved");
        };
        assert!(attempts.iter().all(|a| a.strategy != StrategyKind::Participant));
    }

    #[tokio::test]
    async fn message_context_bypasses_the_breaker() {
        let chat = InputPeer::Chat { chat_id: 4 };
        let (fake, resolver) = resolver(FakeDirectory {
            from_message: vec![UserInfo::new(7, 70)],
            ..Default::default()
        });
        for _ in 0..3 {
            resolver.resolve(7, &token()).await.unwrap_err();
        }
        assert!(resolver.is_blocked(7));

        let record = resolver
            .resolve_from_message(&chat, 15, 7, &token())
            .await
            .unwrap();
        assert_eq!(record.access_hash, 70);
        assert_eq!(fake.calls().last(), Some(&"message"));
        assert!(!resolver.is_blocked(7));
    }

    #[tokio::test]
    async fn message_failure_falls_back_to_regular_resolution() {
        let chat = InputPeer::Chat { chat_id: 4 };
        let (fake, resolver) = resolver(FakeDirectory {
            broken: vec!["message"],
            direct: vec![UserInfo::new(7, 70)],
            ..Default::default()
        });
        let record = resolver
            .resolve_from_message(&chat, 15, 7, &token())
            .await
            .unwrap();
        assert_eq!(record.access_hash, 70);
        assert_eq!(fake.calls(), ["message", "direct"]);
    }

    #[tokio::test]
    async fn cancellation_stops_without_counting_a_failure() {
        let (fake, resolver) = resolver(FakeDirectory::default());
        let cancel = token();
        cancel.cancel();
        let err = resolver.resolve(7, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(fake.calls().is_empty());
        assert_eq!(resolver.cache().failure_count(7), 0);
    }

    #[rstest]
    #[case(-55, InputPeer::Chat { chat_id: 55 })]
    #[case(1000, InputPeer::SelfPeer)]
    #[case(12, InputPeer::User { user_id: 12, access_hash: 120 })]
    #[tokio::test]
    async fn addressable_by_chat_kind(#[case] peer_id: i64, #[case] expected: InputPeer) {
        let (_fake, resolver) = resolver(FakeDirectory {
            direct: vec![UserInfo::new(12, 120)],
            ..Default::default()
        });
        resolver.set_self_id(1000);
        assert_eq!(resolver.addressable(peer_id, &token()).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn channels_fall_back_to_extended_dialog_scan() {
        let channel = ChannelInfo {
            id: 1_234_567_890,
            access_hash: 5,
            title: Some("news".into()),
        };
        let (fake, resolver) = resolver(FakeDirectory {
            dialog_channels: vec![channel.clone()],
            channel_visible_at: 500,
            ..Default::default()
        });

        let peer = resolver
            .addressable(-1_001_234_567_890, &token())
            .await
            .unwrap();
        assert_eq!(peer, channel.input_peer());
        assert_eq!(fake.calls(), ["channel", "dialogs", "dialogs"]);

        // Second lookup is served from memory.
        resolver.resolve_channel(channel.id, &token()).await.unwrap();
        assert_eq!(fake.calls().len(), 3);
    }

    #[tokio::test]
    async fn unknown_channel_and_zero_peer_fail() {
        let (_fake, resolver) = resolver(FakeDirectory::default());
        let err = resolver.resolve_channel(1, &token()).await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound { channel_id: 1 }));
        let err = resolver.addressable(0, &token()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPeer { peer_id: 0 }));
    }
}
