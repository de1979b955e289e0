//! In-process stand-ins for the stores and platform clients.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream crates' tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::providers::{
    CommandDeclaration, CreatedPlaylist, DiscordApi, DiscordUser, Guild, GuildMember, PlayedTrack,
    RegisteredCommand, SpotifyApi, SpotifyUser, Track,
};
use crate::{AuthToken, Error, LinkStore, LinkedAccount, ListenEntry, ListenStore, OAuthFlow, Result};

pub const STUB_APPLICATION_ID: &str = "app-1";
pub const STUB_GUILD_NAME: &str = "Test Guild";

/// A linked account whose token never expires.
pub fn account(account_id: &str, access_token: &str) -> LinkedAccount {
    LinkedAccount {
        account_id: account_id.to_string(),
        token: AuthToken {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: None,
        },
    }
}

pub fn track(id: &str) -> Track {
    Track {
        id: Some(id.to_string()),
        name: format!("Track {}", id),
        artists: Vec::new(),
        is_local: false,
    }
}

/// A local file: played through Spotify but without a catalog id.
pub fn local_track(name: &str) -> Track {
    Track {
        id: None,
        name: name.to_string(),
        artists: Vec::new(),
        is_local: true,
    }
}

pub fn played(id: &str, played_at: DateTime<Utc>) -> PlayedTrack {
    PlayedTrack {
        track: track(id),
        played_at,
    }
}

pub fn played_local(name: &str, played_at: DateTime<Utc>) -> PlayedTrack {
    PlayedTrack {
        track: local_track(name),
        played_at,
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StubLinks {
    links: Mutex<BTreeMap<String, LinkedAccount>>,
    failing: AtomicBool,
}

impl StubLinks {
    pub fn with(links: impl IntoIterator<Item = LinkedAccount>) -> Self {
        let store = Self::default();
        {
            let mut map = lock(&store.links);
            for link in links {
                map.insert(link.account_id.clone(), link);
            }
        }
        store
    }

    /// Every later call fails.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("link store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for StubLinks {
    async fn get_link(&self, account_id: &str) -> anyhow::Result<Option<LinkedAccount>> {
        self.check()?;
        Ok(lock(&self.links).get(account_id).cloned())
    }

    async fn get_links(&self) -> anyhow::Result<Vec<LinkedAccount>> {
        self.check()?;
        Ok(lock(&self.links).values().cloned().collect())
    }

    async fn upsert_link(&self, link: &LinkedAccount) -> anyhow::Result<()> {
        self.check()?;
        lock(&self.links).insert(link.account_id.clone(), link.clone());
        Ok(())
    }
}

/// Listen history with the same uniqueness rule as the SQLite table.
#[derive(Default)]
pub struct StubListens {
    rows: Mutex<BTreeSet<(String, DateTime<Utc>, String)>>,
    batches: AtomicUsize,
}

impl StubListens {
    /// Number of `batch_write_listens` calls seen.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListenStore for StubListens {
    async fn last_listen_time(&self, account_id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|(a, _, _)| a == account_id)
            .map(|(_, at, _)| *at)
            .max())
    }

    async fn track_listen_count(&self, account_id: &str, track_id: &str) -> anyhow::Result<i64> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|(a, _, t)| a == account_id && t == track_id)
            .count() as i64)
    }

    async fn account_listen_count(&self, account_id: &str) -> anyhow::Result<i64> {
        Ok(lock(&self.rows)
            .iter()
            .filter(|(a, _, _)| a == account_id)
            .count() as i64)
    }

    async fn listen_counts(&self) -> anyhow::Result<Vec<(String, i64)>> {
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for (account_id, _, _) in lock(&self.rows).iter() {
            *counts.entry(account_id.clone()).or_default() += 1;
        }
        let mut counts: Vec<(String, i64)> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(counts)
    }

    async fn batch_write_listens(
        &self,
        account_id: &str,
        entries: &[ListenEntry],
    ) -> anyhow::Result<u64> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if entries.iter().any(|e| e.track_id.is_empty()) {
            return Err(anyhow!("empty track id"));
        }
        let mut rows = lock(&self.rows);
        let mut inserted = 0;
        for entry in entries {
            if rows.insert((account_id.to_string(), entry.played_at, entry.track_id.clone())) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// Spotify
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub public: bool,
}

/// Spotify keyed by access token: each token stands for one user.
#[derive(Default)]
pub struct StubSpotify {
    history: Mutex<HashMap<String, Vec<PlayedTrack>>>,
    top: Mutex<HashMap<String, Vec<Track>>>,
    playing: Mutex<HashMap<String, Track>>,
    failing: Mutex<HashSet<String>>,
    omit_link: AtomicBool,
    recent_calls: Mutex<Vec<(String, DateTime<Utc>)>>,
    created: Mutex<Vec<CreatedRecord>>,
    added: Mutex<Vec<(String, Vec<String>)>>,
    add_delay: Mutex<std::time::Duration>,
}

impl StubSpotify {
    pub fn set_history(&self, token: &str, plays: Vec<PlayedTrack>) {
        lock(&self.history).insert(token.to_string(), plays);
    }

    /// Every add call waits `delay` before recording its tracks.
    pub fn slow_add_tracks(&self, delay: std::time::Duration) {
        *lock(&self.add_delay) = delay;
    }

    pub fn set_top_tracks(&self, token: &str, tracks: Vec<Track>) {
        lock(&self.top).insert(token.to_string(), tracks);
    }

    pub fn set_playing(&self, token: &str, track: Track) {
        lock(&self.playing).insert(token.to_string(), track);
    }

    /// Every call made with `token` fails as an upstream error.
    pub fn fail_token(&self, token: &str) {
        lock(&self.failing).insert(token.to_string());
    }

    /// Created playlists come back without an `external_urls.spotify` entry.
    pub fn omit_playlist_link(&self) {
        self.omit_link.store(true, Ordering::SeqCst);
    }

    /// `(access token, after)` of every recently-played call.
    pub fn recent_calls(&self) -> Vec<(String, DateTime<Utc>)> {
        lock(&self.recent_calls).clone()
    }

    pub fn created(&self) -> Vec<CreatedRecord> {
        lock(&self.created).clone()
    }

    pub fn added(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.added).clone()
    }

    fn check(&self, token: &AuthToken) -> Result<()> {
        if lock(&self.failing).contains(&token.access_token) {
            return Err(Error::upstream(anyhow!(
                "spotify: HTTP 401 - token {} rejected",
                token.access_token
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SpotifyApi for StubSpotify {
    async fn recently_played(
        &self,
        token: &AuthToken,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<PlayedTrack>> {
        lock(&self.recent_calls).push((token.access_token.clone(), after));
        self.check(token)?;

        let mut items: Vec<PlayedTrack> = lock(&self.history)
            .get(&token.access_token)
            .map(|plays| plays.iter().filter(|p| p.played_at > after).cloned().collect())
            .unwrap_or_default();
        items.sort_by_key(|p| p.played_at);
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn top_tracks(&self, token: &AuthToken, limit: u32) -> Result<Vec<Track>> {
        self.check(token)?;
        let mut tracks = lock(&self.top)
            .get(&token.access_token)
            .cloned()
            .unwrap_or_default();
        tracks.truncate(limit as usize);
        Ok(tracks)
    }

    async fn currently_playing(&self, token: &AuthToken) -> Result<Option<Track>> {
        self.check(token)?;
        Ok(lock(&self.playing).get(&token.access_token).cloned())
    }

    async fn current_user(&self, token: &AuthToken) -> Result<SpotifyUser> {
        self.check(token)?;
        Ok(SpotifyUser {
            id: format!("user-{}", token.access_token),
            display_name: None,
        })
    }

    async fn create_playlist(
        &self,
        token: &AuthToken,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<CreatedPlaylist> {
        self.check(token)?;
        let mut created = lock(&self.created);
        created.push(CreatedRecord {
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            public,
        });

        let id = format!("playlist-{}", created.len());
        let mut external_urls = HashMap::new();
        if !self.omit_link.load(Ordering::SeqCst) {
            external_urls.insert(
                "spotify".to_string(),
                format!("https://open.spotify.com/playlist/{}", id),
            );
        }
        Ok(CreatedPlaylist { id, external_urls })
    }

    async fn add_tracks(
        &self,
        token: &AuthToken,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<()> {
        self.check(token)?;
        let delay = *lock(&self.add_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.added).push((playlist_id.to_string(), track_ids.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Discord
// ---------------------------------------------------------------------------

pub struct StubDiscord {
    bot: DiscordUser,
    guild_name: String,
    members: Vec<GuildMember>,
    member_page_calls: AtomicUsize,
    commands: Mutex<Vec<(Option<String>, RegisteredCommand)>>,
    upserts: AtomicUsize,
    upsert_attempts: AtomicUsize,
    failing_upsert: Mutex<Option<String>>,
}

impl Default for StubDiscord {
    fn default() -> Self {
        Self {
            bot: DiscordUser {
                id: STUB_APPLICATION_ID.to_string(),
                username: "chorus".to_string(),
                global_name: None,
            },
            guild_name: STUB_GUILD_NAME.to_string(),
            members: Vec::new(),
            member_page_calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            upserts: AtomicUsize::new(0),
            upsert_attempts: AtomicUsize::new(0),
            failing_upsert: Mutex::new(None),
        }
    }
}

impl StubDiscord {
    /// A guild whose members have the given user ids.
    pub fn with_members(ids: &[&str]) -> Self {
        let mut members: Vec<GuildMember> = ids
            .iter()
            .map(|id| GuildMember {
                user: DiscordUser {
                    id: id.to_string(),
                    username: format!("user-{}", id),
                    global_name: None,
                },
                nick: None,
            })
            .collect();
        members.sort_by(|a, b| a.user.id.cmp(&b.user.id));
        Self {
            members,
            ..Self::default()
        }
    }

    pub fn member_page_calls(&self) -> usize {
        self.member_page_calls.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Upserts made, whether or not they succeeded.
    pub fn upsert_attempts(&self) -> usize {
        self.upsert_attempts.load(Ordering::SeqCst)
    }

    /// Upserting the command called `name` fails.
    pub fn fail_command_upsert(&self, name: &str) {
        *lock(&self.failing_upsert) = Some(name.to_string());
    }

    /// Names of the commands declared in `scope`, in declaration order.
    pub fn declared(&self, scope: Option<&str>) -> Vec<String> {
        lock(&self.commands)
            .iter()
            .filter(|(s, _)| s.as_deref() == scope)
            .map(|(_, c)| c.name.clone())
            .collect()
    }
}

#[async_trait]
impl DiscordApi for StubDiscord {
    async fn current_user(&self) -> Result<DiscordUser> {
        Ok(self.bot.clone())
    }

    async fn list_guild_members(
        &self,
        _guild_id: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<GuildMember>> {
        self.member_page_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .members
            .iter()
            .filter(|m| after.map_or(true, |after| m.user.id.as_str() > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_guild(&self, guild_id: &str) -> Result<Guild> {
        Ok(Guild {
            id: guild_id.to_string(),
            name: self.guild_name.clone(),
        })
    }

    async fn upsert_command(
        &self,
        application_id: &str,
        guild_id: Option<&str>,
        declaration: &CommandDeclaration,
    ) -> Result<RegisteredCommand> {
        if application_id != self.bot.id {
            return Err(Error::upstream(anyhow!("discord: HTTP 403 - wrong application")));
        }
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_upsert).as_deref() == Some(declaration.name.as_str()) {
            return Err(Error::upstream(anyhow!("discord: HTTP 500 - upsert failed")));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);

        let scope = guild_id.map(str::to_string);
        let command = RegisteredCommand {
            id: format!("cmd-{}", declaration.name),
            name: declaration.name.clone(),
            description: declaration.description.clone(),
        };
        let mut commands = lock(&self.commands);
        commands.retain(|(s, c)| !(s == &scope && c.name == command.name));
        commands.push((scope, command.clone()));
        Ok(command)
    }

    async fn list_commands(
        &self,
        _application_id: &str,
        guild_id: Option<&str>,
    ) -> Result<Vec<RegisteredCommand>> {
        Ok(lock(&self.commands)
            .iter()
            .filter(|(s, _)| s.as_deref() == guild_id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn delete_command(
        &self,
        _application_id: &str,
        guild_id: Option<&str>,
        command_id: &str,
    ) -> Result<()> {
        lock(&self.commands).retain(|(s, c)| !(s.as_deref() == guild_id && c.id == command_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StubOAuth {
    refresh_calls: AtomicUsize,
    fail_exchange: AtomicBool,
}

impl StubOAuth {
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn fail_exchange(&self) {
        self.fail_exchange.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OAuthFlow for StubOAuth {
    fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        Ok(format!(
            "https://accounts.spotify.com/authorize?response_type=code&client_id=stub&state={}",
            state
        ))
    }

    async fn exchange_code(&self, code: &str) -> anyhow::Result<AuthToken> {
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(anyhow!("invalid_grant: authorization code expired"));
        }
        Ok(AuthToken {
            access_token: format!("access-{}", code),
            refresh_token: Some(format!("refresh-{}", code)),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<AuthToken> {
        // Long enough for concurrent callers to pile up on the account lock.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AuthToken {
            access_token: format!("refreshed-{}", refresh_token),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}
