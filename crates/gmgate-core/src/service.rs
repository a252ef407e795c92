//! The command gate: authorization, normalization and execution.
//!
//! `GateService` owns every piece of mutable state (verification records,
//! sessions) so independent instances never share anything. The optional
//! background sweeper belongs to the instance and stops when it is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{SessionManager, VerificationManager};
use crate::command::{normalize, screen_dangerous, validate_syntax, NormalizedCommand, TargetId};
use crate::config::Config;
use crate::error::{GateError, GateResult};
use crate::gateway::Gateway;
use crate::store::{AccountStore, Clock, SystemClock};

/// Phrases the game server puts in an otherwise successful reply when it
/// refused the command's arguments.
const USAGE_PHRASES: &[&str] = &["用法：", "此命令需要", "Usage:"];

/// Phrases the game server puts in an otherwise successful reply when the
/// credential lacked permission.
const PERMISSION_PHRASES: &[&str] = &["无权限", "No permission"];

/// A command the game server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub command: NormalizedCommand,
    /// Server reply text, possibly empty.
    pub output: String,
}

/// Reclassify a nominally successful reply by its text.
/// Unrecognized text is a success.
pub fn classify_upstream(output: &str) -> GateResult<()> {
    if PERMISSION_PHRASES.iter().any(|p| output.contains(p)) {
        return Err(GateError::UpstreamPermissionDenied(output.to_string()));
    }
    if USAGE_PHRASES.iter().any(|p| output.contains(p)) {
        return Err(GateError::UpstreamUsage(output.to_string()));
    }
    Ok(())
}

/// Periodic cleanup of lapsed verification records and sessions.
/// Aborted when dropped.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn spawn(
        verification: Arc<VerificationManager>,
        sessions: Arc<SessionManager>,
        every: std::time::Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let records = verification.sweep().await;
                let expired_sessions = sessions.sweep().await;
                if records > 0 || expired_sessions > 0 {
                    debug!(records, sessions = expired_sessions, "Swept expired entries");
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct GateService {
    config: Config,
    gateway: Gateway,
    verification: Arc<VerificationManager>,
    sessions: Arc<SessionManager>,
    sweeper: Option<Sweeper>,
}

impl GateService {
    pub fn new(
        config: Config,
        gateway: Gateway,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let verification = Arc::new(VerificationManager::new(
            gateway.clone(),
            clock.clone(),
            config.verification.window(),
        ));
        let sessions = Arc::new(SessionManager::new(
            accounts,
            clock,
            config.session.validity(),
        ));
        Self {
            config,
            gateway,
            verification,
            sessions,
            sweeper: None,
        }
    }

    /// Service talking HTTP to the configured game server, on the system clock.
    pub fn from_config(config: Config, accounts: Arc<dyn AccountStore>) -> GateResult<Self> {
        let gateway = Gateway::from_config(&config.gateway)?;
        Ok(Self::new(config, gateway, accounts, Arc::new(SystemClock)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn verification(&self) -> &VerificationManager {
        &self.verification
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Start the periodic sweep. Must be called inside a tokio runtime.
    /// Calling it again restarts the task.
    pub fn start_sweeper(&mut self) {
        let every = self.config.verification.sweep_interval();
        self.sweeper = Some(Sweeper::spawn(
            self.verification.clone(),
            self.sessions.clone(),
            every,
        ));
        debug!(interval_secs = every.as_secs(), "Sweeper started");
    }

    pub fn stop_sweeper(&mut self) {
        self.sweeper = None;
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(Sweeper::is_running)
    }

    pub async fn send_code(&self, target: &str) -> GateResult<DateTime<Utc>> {
        let target = TargetId::parse(target)?;
        self.verification.send_code(&target).await
    }

    pub async fn verify_code(&self, target: &str, code: &str) -> GateResult<()> {
        let target = TargetId::parse(target)?;
        self.verification.verify_code(&target, code).await
    }

    /// Either trust source suffices: a live verification record for the
    /// target, or the target on the allowlist of the session's account.
    pub async fn is_authorized(&self, target: &str, session_token: Option<&str>) -> GateResult<bool> {
        let target = TargetId::parse(target)?;
        match self.check_authorized(target.as_str(), session_token).await {
            Ok(()) => Ok(true),
            Err(e) if e.needs_verification() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn check_authorized(&self, target: &str, session_token: Option<&str>) -> GateResult<()> {
        if let Some(token) = session_token {
            if self.sessions.is_target_allowed(token, target).await? {
                debug!(target_id = target, "Target on account allowlist");
                return Ok(());
            }
        }
        self.verification.authorize(target).await
    }

    /// Run `raw_command` against `target` with the elevated console credential.
    ///
    /// Rejections happen in this order, each before any network traffic:
    /// deny-listed verb, malformed syntax, unauthorized target, missing
    /// console credential.
    pub async fn execute(
        &self,
        target: &str,
        raw_command: &str,
        session_token: Option<&str>,
    ) -> GateResult<ExecutionOutcome> {
        let target = Self::screen(target, raw_command)?;
        self.check_authorized(target.as_str(), session_token).await?;

        let credential = self.config.gateway.console_token().ok_or_else(|| {
            GateError::Config("console token is not configured".to_string())
        })?;
        self.dispatch(&target, raw_command, credential).await
    }

    /// Run `raw_command` with the target's own verified token instead of the
    /// console credential. Only a live verification authorizes this; the
    /// allowlist carries no token.
    pub async fn execute_as_player(
        &self,
        target: &str,
        raw_command: &str,
    ) -> GateResult<ExecutionOutcome> {
        let target = Self::screen(target, raw_command)?;
        self.verification.authorize(target.as_str()).await?;

        let token = self
            .verification
            .verified_token(target.as_str())
            .await
            .ok_or_else(|| GateError::VerificationExpired(target.to_string()))?;
        self.dispatch(&target, raw_command, &token).await
    }

    fn screen(target: &str, raw_command: &str) -> GateResult<TargetId> {
        let target = TargetId::parse(target)?;
        screen_dangerous(raw_command).inspect_err(|e| {
            warn!(target_id = %target, error = %e, "Dangerous command rejected");
        })?;
        validate_syntax(raw_command)?;
        Ok(target)
    }

    async fn dispatch(
        &self,
        target: &TargetId,
        raw_command: &str,
        credential: &str,
    ) -> GateResult<ExecutionOutcome> {
        let command = normalize(raw_command, target);
        let response = self.gateway.run_command(credential, &command).await?;
        let output = response.data_text();
        classify_upstream(&output)?;

        info!(target_id = %target, command = %command, "Command executed");
        Ok(ExecutionOutcome { command, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::ScriptedTransport;
    use crate::gateway::{Action, GatewayError, GatewayResponse};
    use crate::store::{ManualClock, MemoryAccountStore};
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Value};

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
        service: GateService,
    }

    fn fixture_with(console_token: Option<&str>) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ));
        let mut config = Config::default();
        config.gateway.console_token = console_token.map(str::to_string);
        let service = GateService::new(
            config,
            Gateway::new(transport.clone(), ""),
            Arc::new(MemoryAccountStore::new()),
            clock.clone(),
        );
        Fixture {
            transport,
            clock,
            service,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Some("console-secret"))
    }

    #[tokio::test]
    async fn test_end_to_end_verification_flow() {
        let f = fixture();

        let err = f.service.execute("12345", "heal", None).await.unwrap_err();
        assert!(matches!(err, GateError::VerificationRequired(ref t) if t == "12345"));
        assert!(f.transport.requests().is_empty());

        f.transport.push_ok(json!("tok-abc"));
        f.service.send_code("12345").await.unwrap();
        assert!(!f.service.verification().is_verified("12345").await);

        f.transport.push_ok(Value::Null);
        f.service.verify_code("12345", "4321").await.unwrap();
        assert!(f.service.verification().is_verified("12345").await);

        f.transport.push_ok(json!("Healed all avatars."));
        let outcome = f.service.execute("12345", "heal", None).await.unwrap();
        assert_eq!(outcome.command.as_str(), "heal @12345");
        assert_eq!(outcome.output, "Healed all avatars.");

        let sent = f.transport.requests();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].token, "tok-abc");
        assert_eq!(sent[2].action, Action::Command);
        assert_eq!(sent[2].token, "console-secret");
        assert_eq!(sent[2].data, json!("heal @12345"));
    }

    #[tokio::test]
    async fn test_expired_verification_short_circuits() {
        let f = fixture();
        f.transport.push_ok(json!("tok"));
        f.transport.push_ok(Value::Null);
        f.service.send_code("1").await.unwrap();
        f.service.verify_code("1", "1").await.unwrap();

        f.clock.advance(Duration::minutes(10));
        let err = f.service.execute("1", "heal", None).await.unwrap_err();
        assert!(matches!(err, GateError::VerificationExpired(_)));
        assert_eq!(f.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_dangerous_and_invalid_never_reach_gateway() {
        let f = fixture();

        let err = f.service.execute("1", "ban 2", None).await.unwrap_err();
        assert!(matches!(err, GateError::Dangerous(_)));

        let err = f.service.execute("1", "give;rm", None).await.unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));

        let err = f.service.execute("1", "   ", None).await.unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));

        let err = f.service.execute("", "heal", None).await.unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));

        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_danger_screen_runs_before_authorization() {
        let f = fixture();
        let err = f
            .service
            .execute("1", "account delete someone", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Dangerous(_)));
    }

    #[tokio::test]
    async fn test_marked_dangerous_verbs_rejected_for_verified_target() {
        let f = fixture();
        f.transport.push_ok(json!("tok"));
        f.transport.push_ok(Value::Null);
        f.service.send_code("1").await.unwrap();
        f.service.verify_code("1", "1").await.unwrap();

        for cmd in ["@1 ban 2", "@ban 2", "@UID account delete bob"] {
            let err = f.service.execute("1", cmd, None).await.unwrap_err();
            assert!(matches!(err, GateError::Dangerous(_)), "{:?}", cmd);
        }
        assert_eq!(f.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_console_token_fails_fast() {
        let f = fixture_with(None);
        f.transport.push_ok(json!("tok"));
        f.transport.push_ok(Value::Null);
        f.service.send_code("1").await.unwrap();
        f.service.verify_code("1", "1").await.unwrap();

        let err = f.service.execute("1", "heal", None).await.unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
        assert_eq!(f.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_allowlist_authorizes_without_verification() {
        let f = fixture();
        let sessions = f.service.sessions();
        sessions.register("gm", "secret1").await.unwrap();
        sessions.grant_permanent_verification("gm", "777").unwrap();
        let session = sessions.login("gm", "secret1").await.unwrap();

        assert!(f.service.is_authorized("777", Some(&session.token)).await.unwrap());
        assert!(f.service.is_authorized(" 777 ", Some(&session.token)).await.unwrap());
        assert!(matches!(
            f.service.is_authorized("  ", Some(&session.token)).await,
            Err(GateError::Validation(_))
        ));
        assert!(!f.service.is_authorized("777", None).await.unwrap());
        assert!(!f.service.is_authorized("778", Some(&session.token)).await.unwrap());

        f.transport.push_ok(json!("ok"));
        let outcome = f
            .service
            .execute("777", "give 202 x5", Some(&session.token))
            .await
            .unwrap();
        assert_eq!(outcome.command.as_str(), "give @777 202 x5");

        sessions.logout(&session.token).await;
        let err = f
            .service
            .execute("777", "give 202 x5", Some(&session.token))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::VerificationRequired(_)));
    }

    #[tokio::test]
    async fn test_trust_sources_are_independent() {
        let f = fixture();
        let sessions = f.service.sessions();
        sessions.register("gm", "secret1").await.unwrap();
        sessions.grant_permanent_verification("gm", "5").unwrap();
        let session = sessions.login("gm", "secret1").await.unwrap();

        f.transport.push_ok(json!("tok"));
        f.transport.push_ok(Value::Null);
        f.service.send_code("5").await.unwrap();
        f.service.verify_code("5", "1").await.unwrap();

        sessions.revoke_permanent_verification("gm", "5").unwrap();
        assert!(f.service.is_authorized("5", Some(&session.token)).await.unwrap());
    }

    #[tokio::test]
    async fn test_pre_supplied_marker_is_replaced() {
        let f = fixture();
        let sessions = f.service.sessions();
        sessions.register("gm", "secret1").await.unwrap();
        sessions.grant_permanent_verification("gm", "100").unwrap();
        let session = sessions.login("gm", "secret1").await.unwrap();

        f.transport.push_ok(Value::Null);
        let outcome = f
            .service
            .execute("100", "give 202 @999", Some(&session.token))
            .await
            .unwrap();
        assert_eq!(outcome.command.as_str(), "give @100 202");
    }

    #[tokio::test]
    async fn test_upstream_rejections_are_classified() {
        let f = fixture();
        let sessions = f.service.sessions();
        sessions.register("gm", "secret1").await.unwrap();
        sessions.grant_permanent_verification("gm", "1").unwrap();
        let token = sessions.login("gm", "secret1").await.unwrap().token;

        f.transport.push_ok(json!("Usage: give <itemId> [x<amount>]"));
        let err = f.service.execute("1", "give 1", Some(&token)).await.unwrap_err();
        assert!(matches!(err, GateError::UpstreamUsage(_)));

        f.transport.push_ok(json!("No permission to run this command"));
        let err = f.service.execute("1", "heal", Some(&token)).await.unwrap_err();
        assert!(matches!(err, GateError::UpstreamPermissionDenied(_)));

        f.transport.push(GatewayResponse::failed(403, "Forbidden"));
        let err = f.service.execute("1", "heal", Some(&token)).await.unwrap_err();
        assert!(matches!(err, GateError::Gateway(GatewayError::Rejected { code: 403, .. })));
    }

    #[tokio::test]
    async fn test_player_mode_uses_verified_token() {
        let f = fixture_with(None);

        let err = f.service.execute_as_player("42", "heal").await.unwrap_err();
        assert!(matches!(err, GateError::VerificationRequired(_)));

        f.transport.push_ok(json!("tok-player"));
        f.transport.push_ok(Value::Null);
        f.transport.push_ok(json!("done"));
        f.service.send_code("42").await.unwrap();
        f.service.verify_code("42", "1").await.unwrap();

        let outcome = f.service.execute_as_player("42", "tp 1 2 3").await.unwrap();
        assert_eq!(outcome.command.as_str(), "tp 1 2 3 @42");

        let sent = &f.transport.requests()[2];
        assert_eq!(sent.action, Action::Command);
        assert_eq!(sent.token, "tok-player");
    }

    #[test]
    fn test_classify_upstream() {
        assert!(classify_upstream("").is_ok());
        assert!(classify_upstream("Done").is_ok());
        assert!(classify_upstream(r#"{"result":"ok"}"#).is_ok());
        assert!(matches!(
            classify_upstream("用法：give <itemId>"),
            Err(GateError::UpstreamUsage(_))
        ));
        assert!(matches!(
            classify_upstream("此命令需要一个目标"),
            Err(GateError::UpstreamUsage(_))
        ));
        assert!(matches!(
            classify_upstream("你无权限执行此命令"),
            Err(GateError::UpstreamPermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_sweeper_removes_lapsed_entries() {
        let mut f = fixture();
        f.transport.push_ok(json!("tok"));
        f.service.send_code("1").await.unwrap();
        assert_eq!(f.service.verification().tracked().await, 1);

        f.clock.advance(Duration::minutes(10));
        f.service.start_sweeper();
        assert!(f.service.sweeper_running());

        for _ in 0..50 {
            if f.service.verification().tracked().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(f.service.verification().tracked().await, 0);

        f.service.stop_sweeper();
        assert!(!f.service.sweeper_running());
    }
}
