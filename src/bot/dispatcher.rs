use super::command::{Command, ParseError};
use super::replies;
use crate::external::{MembershipGate, Notifier};
use crate::models::{BroadcastReport, Caller, CommandResponse, GeneratedCode, UserId};
use crate::services::LedgerService;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-sender conversation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionMode {
    #[default]
    Idle,
    /// The sender's next plain message is broadcast to every user.
    AwaitingBroadcast,
}

/// One inbound chat message.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub text: String,
}

/// Routes chat commands to the ledger, consulting the Membership Gate for member-facing
/// commands. Broadcast delivery is best effort and outside ledger atomicity.
#[derive(Clone)]
pub struct CommandDispatcher {
    ledger: LedgerService,
    gate: Arc<dyn MembershipGate>,
    notifier: Arc<dyn Notifier>,
    channel: String,
    sessions: Arc<Mutex<HashMap<UserId, SessionMode>>>,
}

impl CommandDispatcher {
    pub fn new(
        ledger: LedgerService,
        gate: Arc<dyn MembershipGate>,
        notifier: Arc<dyn Notifier>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            gate,
            notifier,
            channel: channel.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Builds a [`Caller`] carrying the gate's verdict for this user.
    pub async fn caller(&self, user_id: UserId, display_name: Option<String>) -> Caller {
        Caller {
            user_id,
            display_name,
            is_member: self.gate.is_authorized(user_id).await,
        }
    }

    pub async fn session_mode(&self, user_id: UserId) -> SessionMode {
        self.sessions
            .lock()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn dispatch(&self, message: &Inbound) -> CommandResponse {
        let command = match Command::parse(&message.text) {
            Ok(command) => command,
            Err(ParseError::Usage { usage, admin_only }) => {
                if admin_only && !self.ledger.is_admin(message.user_id) {
                    return reply(replies::not_authorized());
                }
                return reply(replies::usage(usage));
            }
            Err(ParseError::Unknown(name)) => return reply(replies::unknown_command(&name)),
        };

        log::debug!("Dispatching {:?} from {}", command, message.user_id);

        match command {
            Command::Start => self.start(message).await,
            Command::Redeem(code) => {
                self.as_member(message, |caller| async move {
                    match self.ledger.redeem_code(&caller, &code).await {
                        Ok(result) => replies::redeemed(result.points_granted, result.new_balance),
                        Err(e) => replies::ledger_error(&e),
                    }
                })
                .await
            }
            Command::GetAccount => {
                self.as_member(message, |caller| async move {
                    match self.ledger.allocate_account(&caller).await {
                        Ok(result) => replies::allocated(&result, &self.channel),
                        Err(e) => replies::ledger_error(&e),
                    }
                })
                .await
            }
            Command::Balance => {
                self.as_member(message, |caller| async move {
                    match self.ledger.balance(&caller).await {
                        Ok(Some(points)) => replies::balance(points),
                        Ok(None) => replies::no_user_yet(),
                        Err(e) => replies::ledger_error(&e),
                    }
                })
                .await
            }
            Command::AddCode { code, points } => {
                let caller = self.admin_caller(message);
                match self.ledger.add_code(&caller, &code, points).await {
                    Ok(()) => reply(replies::code_added(&code)),
                    Err(e) => reply(replies::ledger_error(&e)),
                }
            }
            Command::AddBulkAccounts(entries) => {
                let caller = self.admin_caller(message);
                match self.ledger.import_accounts(&caller, &entries).await {
                    Ok(report) => reply(replies::import_report(&report)),
                    Err(e) => reply(replies::ledger_error(&e)),
                }
            }
            Command::GenerateCodes { count, points } => {
                let caller = self.admin_caller(message);
                match self.ledger.generate_codes(&caller, count, points).await {
                    Ok(codes) => {
                        let broadcast = self.announce_codes(&codes).await;
                        CommandResponse {
                            replies: vec![replies::generated_codes(&codes)],
                            broadcast: Some(broadcast),
                        }
                    }
                    Err(e) => reply(replies::ledger_error(&e)),
                }
            }
            Command::Broadcast => {
                if !self.ledger.is_admin(message.user_id) {
                    return reply(replies::not_authorized());
                }
                self.sessions
                    .lock()
                    .await
                    .insert(message.user_id, SessionMode::AwaitingBroadcast);
                reply(replies::broadcast_armed())
            }
            Command::Text(text) => self.plain_text(message.user_id, &text).await,
        }
    }

    /// Sends the generated-code announcement to every known user.
    pub async fn announce_codes(&self, codes: &[GeneratedCode]) -> BroadcastReport {
        self.broadcast(&replies::generated_codes(codes)).await
    }

    async fn start(&self, message: &Inbound) -> CommandResponse {
        let caller = self
            .caller(message.user_id, message.display_name.clone())
            .await;

        // 用户记录在成员校验前创建, 与成员身份无关
        if let Err(e) = self.ledger.register_user(&caller).await {
            return reply(replies::ledger_error(&e));
        }

        if caller.is_member {
            let name = message.display_name.as_deref().unwrap_or("there");
            reply(replies::welcome(name, &self.channel))
        } else {
            reply(replies::not_member(&self.channel))
        }
    }

    async fn as_member<F, Fut>(&self, message: &Inbound, run: F) -> CommandResponse
    where
        F: FnOnce(Caller) -> Fut,
        Fut: Future<Output = String>,
    {
        let caller = self
            .caller(message.user_id, message.display_name.clone())
            .await;
        if !caller.is_member {
            return reply(replies::not_member(&self.channel));
        }
        reply(run(caller).await)
    }

    // 管理员命令不经过频道成员校验
    fn admin_caller(&self, message: &Inbound) -> Caller {
        Caller {
            user_id: message.user_id,
            display_name: message.display_name.clone(),
            is_member: false,
        }
    }

    async fn plain_text(&self, user_id: UserId, text: &str) -> CommandResponse {
        let armed = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&user_id) {
                Some(SessionMode::AwaitingBroadcast) => {
                    sessions.insert(user_id, SessionMode::Idle);
                    true
                }
                _ => false,
            }
        };

        if !armed || !self.ledger.is_admin(user_id) {
            return CommandResponse::default();
        }

        let report = self.broadcast(text).await;
        CommandResponse {
            replies: vec![replies::broadcast_sent(report.delivered, report.failed)],
            broadcast: Some(report),
        }
    }

    async fn broadcast(&self, text: &str) -> BroadcastReport {
        let recipients = match self.ledger.user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("Broadcast aborted, cannot list users: {e}");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for user_id in recipients {
            match self.notifier.notify(user_id, text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::warn!("Error sending message to {user_id}: {e}");
                    report.failed += 1;
                }
            }
        }
        log::info!(
            "Broadcast finished: {} delivered, {} failed",
            report.delivered,
            report.failed
        );
        report
    }
}

fn reply(text: String) -> CommandResponse {
    CommandResponse {
        replies: vec![text],
        broadcast: None,
    }
}
