use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::models::*;
use crate::store::{Collection, CredentialStore, StoreError, StorePath, Transaction};
use crate::utils::generate_redeem_code;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

/// Points & inventory ledger.
///
/// Every state transition is a single conditional commit against the store: the records a
/// transition depends on are read, the new values computed, and the commit names the read
/// values as expectations. If another writer got there first the commit fails with a
/// conflict and the whole transition is re-read and retried. Nothing is ever written with
/// a bare get/set pair.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn CredentialStore>,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(store: Arc<dyn CredentialStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        user_id == self.config.admin_user_id
    }

    /// 首次接触时创建用户 (余额 0)，已存在则原样返回
    pub async fn register_user(&self, caller: &Caller) -> LedgerResult<Registration> {
        let path = StorePath::user(caller.user_id);
        let path = &path;
        self.retry("register_user", move || self.try_register(caller, path))
            .await
    }

    /// `None` when the user has never interacted with the bot.
    pub async fn balance(&self, caller: &Caller) -> LedgerResult<Option<u64>> {
        Self::require_member(caller)?;
        let path = StorePath::user(caller.user_id);
        match self.store.get(&path).await? {
            Some(raw) => Ok(Some(decode::<UserRecord>(&path, &raw)?.points)),
            None => Ok(None),
        }
    }

    /// Marks the code used and credits its value, as one commit.
    pub async fn redeem_code(&self, caller: &Caller, code: &str) -> LedgerResult<RedemptionResult> {
        Self::require_member(caller)?;
        // 含 '/' 或空白的字符串不可能是已存在的兑换码
        let code_path = StorePath::code(code).map_err(|_| LedgerError::InvalidCode)?;
        let code_path = &code_path;

        let result = self
            .retry("redeem_code", move || self.try_redeem(caller, code_path))
            .await?;

        log::info!(
            "User {} redeemed code {} for {} points (balance {})",
            caller.user_id,
            result.code,
            result.points_granted,
            result.new_balance
        );
        Ok(result)
    }

    /// Claims the account with the smallest identifier and debits [`ACCOUNT_COST`], as one
    /// commit. The returned credentials are never handed out again.
    pub async fn allocate_account(&self, caller: &Caller) -> LedgerResult<AllocationResult> {
        Self::require_member(caller)?;

        let result = self
            .retry("allocate_account", move || self.try_allocate(caller))
            .await?;

        log::info!(
            "Allocated account {} to user {} (balance {})",
            result.account_id,
            caller.user_id,
            result.remaining_balance
        );
        Ok(result)
    }

    pub async fn add_code(&self, caller: &Caller, code: &str, points: u64) -> LedgerResult<()> {
        self.require_admin(caller)?;
        if points == 0 {
            return Err(LedgerError::InvalidInput("points must be positive".to_string()));
        }
        let path = StorePath::code(code)?;

        let transaction = Transaction::new().insert(path, encode(&CodeRecord::new(points))?);
        match self.store.commit(transaction).await {
            Ok(()) => {
                log::info!("Code {code} added ({points} points)");
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => Err(LedgerError::AlreadyExists(code.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// 批量生成兑换码, 整批一次提交: 要么全部写入, 要么一个都不写。
    /// 与已有兑换码冲突时只重新生成冲突的那一个, 再整批提交。
    pub async fn generate_codes(
        &self,
        caller: &Caller,
        count: u32,
        points: u64,
    ) -> LedgerResult<Vec<GeneratedCode>> {
        self.require_admin(caller)?;
        if count == 0 || count > self.config.max_generate_count {
            return Err(LedgerError::InvalidInput(format!(
                "count must be between 1 and {}",
                self.config.max_generate_count
            )));
        }
        if points == 0 {
            return Err(LedgerError::InvalidInput("points must be positive".to_string()));
        }

        let record = encode(&CodeRecord::new(points))?;
        let mut drawn = HashSet::new();
        let mut batch: Vec<String> = (0..count).map(|_| draw_unique(&mut drawn)).collect();

        for n in 1..=self.config.max_attempts {
            let mut transaction = Transaction::new();
            for code in &batch {
                transaction = transaction.insert(StorePath::code(code)?, record.clone());
            }

            match self.store.commit(transaction).await {
                Ok(()) => {
                    log::info!("Generated {count} codes worth {points} points each");
                    return Ok(batch
                        .into_iter()
                        .map(|code| GeneratedCode { code, points })
                        .collect());
                }
                Err(StoreError::Conflict { path }) => {
                    let taken = path.strip_prefix(&Collection::Codes.prefix());
                    match batch.iter().position(|code| Some(code.as_str()) == taken) {
                        Some(slot) => {
                            log::warn!(
                                "Generated code {} collides with an existing code, drawing again ({n}/{})",
                                batch[slot],
                                self.config.max_attempts
                            );
                            batch[slot] = draw_unique(&mut drawn);
                        }
                        None => log::warn!("Code batch conflicted on {path}, retrying"),
                    }
                }
                Err(e) => {
                    log::error!("Store commit failed: {e}");
                    return Err(e.into());
                }
            }
        }

        Err(LedgerError::StoreUnavailable(
            "could not draw an unused code batch".to_string(),
        ))
    }

    /// Adds each `id:credential` entry unless the id is already in the pool. A bad entry
    /// is reported, not fatal; a store failure aborts the remaining entries (re-running the
    /// import is safe).
    pub async fn import_accounts(
        &self,
        caller: &Caller,
        entries: &[String],
    ) -> LedgerResult<ImportReport> {
        self.require_admin(caller)?;

        let mut report = ImportReport::default();
        for entry in entries {
            let (account_id, status) = match parse_account_entry(entry) {
                Ok((path, record)) => {
                    let account_id = path.key().to_string();
                    let status = match self
                        .store
                        .commit(Transaction::new().insert(path, encode(&record)?))
                        .await
                    {
                        Ok(()) => ImportStatus::Added,
                        Err(StoreError::Conflict { .. }) => ImportStatus::AlreadyExists,
                        Err(e) => return Err(e.into()),
                    };
                    (Some(account_id), status)
                }
                Err(e) => {
                    log::warn!("Skipping account entry: {e}");
                    (None, ImportStatus::Malformed)
                }
            };
            report.entries.push(ImportEntryReport {
                entry: entry.clone(),
                account_id,
                status,
            });
        }

        log::info!(
            "Account import: {} added, {} already existing, {} malformed",
            report.count(ImportStatus::Added),
            report.count(ImportStatus::AlreadyExists),
            report.count(ImportStatus::Malformed)
        );
        Ok(report)
    }

    /// Every known user id, for broadcast fan-out.
    pub async fn user_ids(&self) -> LedgerResult<Vec<UserId>> {
        let users = self.store.list(Collection::Users).await?;
        Ok(users
            .into_iter()
            .filter_map(|(key, _)| match key.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    log::warn!("Ignoring non-numeric user key {key}");
                    None
                }
            })
            .collect())
    }

    // -----------------------------
    // 内部辅助方法
    // -----------------------------

    fn require_member(caller: &Caller) -> LedgerResult<()> {
        if caller.is_member {
            Ok(())
        } else {
            Err(LedgerError::NotAuthorized)
        }
    }

    fn require_admin(&self, caller: &Caller) -> LedgerResult<()> {
        if self.is_admin(caller.user_id) {
            Ok(())
        } else {
            log::warn!("User {} attempted an admin operation", caller.user_id);
            Err(LedgerError::NotAuthorized)
        }
    }

    /// Runs `attempt` until it commits. `Ok(None)` from an attempt means its commit lost a
    /// race and must be re-read.
    async fn retry<T, F, Fut>(&self, operation: &str, mut attempt: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<Option<T>>>,
    {
        for n in 1..=self.config.max_attempts {
            if let Some(done) = attempt().await? {
                return Ok(done);
            }
            log::warn!(
                "{operation}: concurrent write detected, retrying ({n}/{})",
                self.config.max_attempts
            );
            tokio::task::yield_now().await;
        }
        Err(LedgerError::StoreUnavailable(format!(
            "{operation} gave up after {} conflicting attempts",
            self.config.max_attempts
        )))
    }

    /// `Ok(true)` committed, `Ok(false)` lost a race.
    async fn commit(&self, transaction: Transaction) -> LedgerResult<bool> {
        match self.store.commit(transaction).await {
            Ok(()) => Ok(true),
            Err(StoreError::Conflict { path }) => {
                log::debug!("Commit conflict on {path}");
                Ok(false)
            }
            Err(e) => {
                log::error!("Store commit failed: {e}");
                Err(e.into())
            }
        }
    }

    async fn try_register(
        &self,
        caller: &Caller,
        path: &StorePath,
    ) -> LedgerResult<Option<Registration>> {
        if let Some(raw) = self.store.get(path).await? {
            return Ok(Some(Registration {
                user: decode(path, &raw)?,
                created: false,
            }));
        }

        let user = UserRecord::new(caller.display_name.clone());
        if !self
            .commit(Transaction::new().insert(path.clone(), encode(&user)?))
            .await?
        {
            return Ok(None);
        }
        log::info!("Registered user {}", caller.user_id);
        Ok(Some(Registration {
            user,
            created: true,
        }))
    }

    async fn try_redeem(
        &self,
        caller: &Caller,
        code_path: &StorePath,
    ) -> LedgerResult<Option<RedemptionResult>> {
        let raw_code = self
            .store
            .get(code_path)
            .await?
            .ok_or(LedgerError::InvalidCode)?;
        let mut code: CodeRecord = decode(code_path, &raw_code)?;
        if code.used {
            return Err(LedgerError::AlreadyUsed);
        }

        let user_path = StorePath::user(caller.user_id);
        let raw_user = self.store.get(&user_path).await?;
        let mut user = match &raw_user {
            Some(raw) => decode::<UserRecord>(&user_path, raw)?,
            None => UserRecord::new(caller.display_name.clone()),
        };

        code.used = true;
        user.points = user
            .points
            .checked_add(code.points)
            .ok_or_else(|| LedgerError::InvalidInput("balance overflow".to_string()))?;

        let transaction = Transaction::new()
            .put(code_path.clone(), Some(raw_code), encode(&code)?)
            .put(user_path, raw_user, encode(&user)?);
        if !self.commit(transaction).await? {
            return Ok(None);
        }

        Ok(Some(RedemptionResult {
            code: code_path.key().to_string(),
            points_granted: code.points,
            new_balance: user.points,
        }))
    }

    async fn try_allocate(&self, caller: &Caller) -> LedgerResult<Option<AllocationResult>> {
        let user_path = StorePath::user(caller.user_id);
        let Some(raw_user) = self.store.get(&user_path).await? else {
            return Err(LedgerError::insufficient(0));
        };
        let mut user: UserRecord = decode(&user_path, &raw_user)?;
        // 余额不足时不触碰账号池
        if user.points < ACCOUNT_COST {
            return Err(LedgerError::insufficient(user.points));
        }

        let Some((account_id, raw_account)) = self.store.first(Collection::Accounts).await? else {
            return Err(LedgerError::PoolEmpty);
        };
        let account_path = StorePath::account(&account_id)?;
        let account: AccountRecord = decode(&account_path, &raw_account)?;

        user.points -= ACCOUNT_COST;

        let transaction = Transaction::new()
            .remove(account_path, raw_account)
            .put(user_path, Some(raw_user), encode(&user)?);
        if !self.commit(transaction).await? {
            return Ok(None);
        }

        Ok(Some(AllocationResult {
            account_id,
            credentials: account.credentials,
            points_spent: ACCOUNT_COST,
            remaining_balance: user.points,
        }))
    }
}

// 同一批次内不重复
fn draw_unique(drawn: &mut HashSet<String>) -> String {
    loop {
        let code = generate_redeem_code();
        if drawn.insert(code.clone()) {
            return code;
        }
    }
}

fn parse_account_entry(entry: &str) -> LedgerResult<(StorePath, AccountRecord)> {
    let entry = entry.trim();
    let (account_id, secret) = entry
        .split_once(':')
        .ok_or_else(|| LedgerError::MalformedEntry(format!("missing ':' in {entry:?}")))?;
    if secret.is_empty() {
        return Err(LedgerError::MalformedEntry(format!(
            "empty credential in {entry:?}"
        )));
    }
    let path = StorePath::account(account_id)
        .map_err(|_| LedgerError::MalformedEntry(format!("invalid identifier in {entry:?}")))?;

    Ok((
        path,
        AccountRecord {
            credentials: entry.to_string(),
            created_at: Some(chrono::Utc::now()),
        },
    ))
}

fn decode<T: DeserializeOwned>(path: &StorePath, raw: &Value) -> LedgerResult<T> {
    serde_json::from_value(raw.clone()).map_err(|e| {
        LedgerError::CorruptRecord(format!("{path}: {e}"))
    })
}

fn encode<T: Serialize>(record: &T) -> LedgerResult<Value> {
    serde_json::to_value(record)
        .map_err(|e| LedgerError::StoreUnavailable(format!("cannot encode record: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Mutation, StoreResult};
    use async_trait::async_trait;
    use futures_util::future::join_all;
    use serde_json::json;
    use std::collections::HashSet;

    const ADMIN: UserId = 5601;

    fn ledger_with(store: Arc<MemoryStore>) -> LedgerService {
        LedgerService::new(
            store,
            LedgerConfig {
                admin_user_id: ADMIN,
                max_attempts: 64,
                max_generate_count: 100,
            },
        )
    }

    fn ledger() -> (LedgerService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ledger_with(store.clone()), store)
    }

    fn admin() -> Caller {
        Caller::member(ADMIN)
    }

    async fn seed_user(store: &MemoryStore, user_id: UserId, points: u64) {
        store
            .commit(Transaction::new().insert(
                StorePath::user(user_id),
                json!({"username": null, "points": points}),
            ))
            .await
            .unwrap();
    }

    async fn points_of(ledger: &LedgerService, user_id: UserId) -> Option<u64> {
        ledger.balance(&Caller::member(user_id)).await.unwrap()
    }

    #[tokio::test]
    async fn test_redeem_unknown_code_leaves_balance_unchanged() {
        let (ledger, store) = ledger();
        seed_user(&store, 1, 7).await;

        let err = ledger
            .redeem_code(&Caller::member(1), "NOPE")
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidCode);
        assert_eq!(points_of(&ledger, 1).await, Some(7));
    }

    #[tokio::test]
    async fn test_redeem_twice_credits_once() {
        let (ledger, _) = ledger();
        ledger.add_code(&admin(), "WELCOME10", 10).await.unwrap();

        let first = ledger
            .redeem_code(&Caller::member(2), "WELCOME10")
            .await
            .unwrap();
        assert_eq!(first.points_granted, 10);
        assert_eq!(first.new_balance, 10);

        let second = ledger
            .redeem_code(&Caller::member(2), "WELCOME10")
            .await
            .unwrap_err();
        assert_eq!(second, LedgerError::AlreadyUsed);
        assert_eq!(points_of(&ledger, 2).await, Some(10));
    }

    #[tokio::test]
    async fn test_redeem_is_exact_match() {
        let (ledger, _) = ledger();
        ledger.add_code(&admin(), "CaseCode", 5).await.unwrap();

        let err = ledger
            .redeem_code(&Caller::member(3), "casecode")
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidCode);
        let err = ledger
            .redeem_code(&Caller::member(3), "Case/Code")
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidCode);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redeem_of_one_code() {
        let (ledger, _) = ledger();
        ledger.add_code(&admin(), "RACE", 25).await.unwrap();

        let tasks = (0..8).map(|i| {
            let ledger = ledger.clone();
            // half the racers share a user, half are distinct
            let user = if i % 2 == 0 { 100 } else { 200 + i };
            tokio::spawn(async move { (user, ledger.redeem_code(&Caller::member(user), "RACE").await) })
        });
        let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

        let winners: Vec<_> = results.iter().filter(|(_, r)| r.is_ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(
            results
                .iter()
                .filter(|(_, r)| r.is_err())
                .all(|(_, r)| r.as_ref().unwrap_err() == &LedgerError::AlreadyUsed)
        );

        let winner = winners[0].0;
        assert_eq!(points_of(&ledger, winner).await, Some(25));
        for (user, _) in &results {
            if *user != winner {
                assert_eq!(points_of(&ledger, *user).await.unwrap_or(0), 0);
            }
        }
    }

    #[tokio::test]
    async fn test_non_member_is_rejected_before_store_access() {
        let (ledger, store) = ledger();
        ledger.add_code(&admin(), "GATED", 10).await.unwrap();
        let outsider = Caller {
            user_id: 9,
            display_name: None,
            is_member: false,
        };

        assert_eq!(
            ledger.redeem_code(&outsider, "GATED").await.unwrap_err(),
            LedgerError::NotAuthorized
        );
        assert_eq!(
            ledger.allocate_account(&outsider).await.unwrap_err(),
            LedgerError::NotAuthorized
        );
        let raw = store
            .get(&StorePath::code("GATED").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw["used"], false);
    }

    #[tokio::test]
    async fn test_allocate_requires_points_before_touching_pool() {
        let (ledger, store) = ledger();
        ledger
            .import_accounts(&admin(), &["a@x.com:pw".to_string()])
            .await
            .unwrap();
        seed_user(&store, 4, 9).await;

        let err = ledger.allocate_account(&Caller::member(4)).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientPoints {
                balance: 9,
                required: ACCOUNT_COST
            }
        );
        assert_eq!(store.list(Collection::Accounts).await.unwrap().len(), 1);

        // unknown user behaves like a zero balance
        let err = ledger.allocate_account(&Caller::member(5)).await.unwrap_err();
        assert_eq!(err, LedgerError::insufficient(0));
    }

    #[tokio::test]
    async fn test_allocate_pairs_debit_with_claim() {
        let (ledger, store) = ledger();
        ledger
            .import_accounts(
                &admin(),
                &["zoe@x.com:z".to_string(), "amy@x.com:a".to_string()],
            )
            .await
            .unwrap();
        seed_user(&store, 6, 25).await;

        let first = ledger.allocate_account(&Caller::member(6)).await.unwrap();
        assert_eq!(first.account_id, "amy@x.com");
        assert_eq!(first.credentials, "amy@x.com:a");
        assert_eq!(first.remaining_balance, 15);

        let second = ledger.allocate_account(&Caller::member(6)).await.unwrap();
        assert_eq!(second.account_id, "zoe@x.com");
        assert_eq!(second.remaining_balance, 5);

        assert_eq!(
            ledger.allocate_account(&Caller::member(6)).await.unwrap_err(),
            LedgerError::insufficient(5)
        );
        assert!(store.list(Collection::Accounts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allocate_from_empty_pool_keeps_points() {
        let (ledger, store) = ledger();
        seed_user(&store, 7, 30).await;

        assert_eq!(
            ledger.allocate_account(&Caller::member(7)).await.unwrap_err(),
            LedgerError::PoolEmpty
        );
        assert_eq!(points_of(&ledger, 7).await, Some(30));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_over_small_pool() {
        let (ledger, store) = ledger();
        let pool: Vec<String> = (0..3).map(|i| format!("acct{i}:secret{i}")).collect();
        ledger.import_accounts(&admin(), &pool).await.unwrap();

        let users: Vec<UserId> = (1000..1010).collect();
        for user in &users {
            seed_user(&store, *user, 10).await;
        }

        let tasks = users.iter().map(|&user| {
            let ledger = ledger.clone();
            tokio::spawn(async move { (user, ledger.allocate_account(&Caller::member(user)).await) })
        });
        let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

        let issued: Vec<&AllocationResult> =
            results.iter().filter_map(|(_, r)| r.as_ref().ok()).collect();
        assert_eq!(issued.len(), 3);
        let distinct: HashSet<&str> = issued.iter().map(|a| a.account_id.as_str()).collect();
        assert_eq!(distinct.len(), 3);

        for (user, result) in &results {
            match result {
                Ok(_) => assert_eq!(points_of(&ledger, *user).await, Some(0)),
                Err(e) => {
                    assert_eq!(e, &LedgerError::PoolEmpty);
                    assert_eq!(points_of(&ledger, *user).await, Some(10));
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_for_one_user_never_overdraw() {
        let (ledger, store) = ledger();
        let pool: Vec<String> = (0..5).map(|i| format!("acct{i}:pw")).collect();
        ledger.import_accounts(&admin(), &pool).await.unwrap();
        seed_user(&store, 42, 20).await;

        let tasks = (0..5).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.allocate_account(&Caller::member(42)).await })
        });
        let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert_eq!(points_of(&ledger, 42).await, Some(0));
        assert_eq!(store.list(Collection::Accounts).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let (ledger, _) = ledger();
        let entries = vec!["a:1".to_string(), "b:2".to_string(), "a:1".to_string()];

        let report = ledger.import_accounts(&admin(), &entries).await.unwrap();
        let statuses: Vec<ImportStatus> = report.entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ImportStatus::Added,
                ImportStatus::Added,
                ImportStatus::AlreadyExists
            ]
        );
        assert_eq!(report.entries[2].account_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_import_reports_malformed_entries_and_keeps_going() {
        let (ledger, store) = ledger();
        let entries = vec![
            "no-separator".to_string(),
            "ok:pw".to_string(),
            ":nouser".to_string(),
            "emptysecret:".to_string(),
            "pass:with:colons".to_string(),
        ];

        let report = ledger.import_accounts(&admin(), &entries).await.unwrap();
        let statuses: Vec<ImportStatus> = report.entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ImportStatus::Malformed,
                ImportStatus::Added,
                ImportStatus::Malformed,
                ImportStatus::Malformed,
                ImportStatus::Added
            ]
        );

        let raw = store
            .get(&StorePath::account("pass").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw["credentials"], "pass:with:colons");
    }

    #[tokio::test]
    async fn test_import_never_overwrites() {
        let (ledger, store) = ledger();
        ledger
            .import_accounts(&admin(), &["dup:first".to_string()])
            .await
            .unwrap();
        ledger
            .import_accounts(&admin(), &["dup:second".to_string()])
            .await
            .unwrap();

        let raw = store
            .get(&StorePath::account("dup").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw["credentials"], "dup:first");
    }

    #[tokio::test]
    async fn test_generate_codes_are_distinct_and_redeemable_once() {
        let (ledger, _) = ledger();
        ledger.add_code(&admin(), "PREEXISTING", 1).await.unwrap();

        let codes = ledger.generate_codes(&admin(), 5, 20).await.unwrap();
        assert_eq!(codes.len(), 5);
        let distinct: HashSet<&str> = codes.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(distinct.len(), 5);
        assert!(!distinct.contains("PREEXISTING"));

        for (i, generated) in codes.iter().enumerate() {
            assert_eq!(generated.code.len(), CODE_LENGTH);
            let user = Caller::member(300 + i as i64);
            let ok = ledger.redeem_code(&user, &generated.code).await.unwrap();
            assert_eq!(ok.points_granted, 20);
            assert_eq!(
                ledger.redeem_code(&user, &generated.code).await.unwrap_err(),
                LedgerError::AlreadyUsed
            );
        }
    }

    #[tokio::test]
    async fn test_generate_codes_validates_arguments() {
        let (ledger, _) = ledger();
        assert!(matches!(
            ledger.generate_codes(&admin(), 0, 20).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            ledger.generate_codes(&admin(), 101, 20).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            ledger.generate_codes(&admin(), 1, 0).await,
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_operations_require_admin_identity() {
        let (ledger, _) = ledger();
        let member = Caller::member(1);

        assert_eq!(
            ledger.add_code(&member, "X1", 5).await.unwrap_err(),
            LedgerError::NotAuthorized
        );
        assert_eq!(
            ledger.generate_codes(&member, 1, 5).await.unwrap_err(),
            LedgerError::NotAuthorized
        );
        assert_eq!(
            ledger
                .import_accounts(&member, &["a:b".to_string()])
                .await
                .unwrap_err(),
            LedgerError::NotAuthorized
        );
    }

    #[tokio::test]
    async fn test_add_code_rejects_duplicates() {
        let (ledger, _) = ledger();
        ledger.add_code(&admin(), "ONCE", 5).await.unwrap();
        assert_eq!(
            ledger.add_code(&admin(), "ONCE", 50).await.unwrap_err(),
            LedgerError::AlreadyExists("ONCE".to_string())
        );
        assert!(matches!(
            ledger.add_code(&admin(), "bad code", 5).await,
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_register_user_is_lazy_and_idempotent() {
        let (ledger, _) = ledger();
        let caller = Caller::member(77).with_name("neo");

        let first = ledger.register_user(&caller).await.unwrap();
        assert!(first.created);
        assert_eq!(first.user.points, 0);
        assert_eq!(first.user.username.as_deref(), Some("neo"));

        let again = ledger.register_user(&caller).await.unwrap();
        assert!(!again.created);
        assert_eq!(ledger.user_ids().await.unwrap(), vec![77]);
    }

    #[tokio::test]
    async fn test_redeem_creates_user_lazily() {
        let (ledger, _) = ledger();
        ledger.add_code(&admin(), "FRESH", 15).await.unwrap();
        assert_eq!(points_of(&ledger, 88).await, None);

        ledger
            .redeem_code(&Caller::member(88), "FRESH")
            .await
            .unwrap();
        assert_eq!(points_of(&ledger, 88).await, Some(15));
    }

    #[tokio::test]
    async fn test_redeem_accepts_legacy_records() {
        let (ledger, store) = ledger();
        store
            .commit(Transaction::new().insert(
                StorePath::code("LEGACY").unwrap(),
                json!({"points": 10, "used": 0}),
            ))
            .await
            .unwrap();
        store
            .commit(Transaction::new().insert(
                StorePath::code("LEGACYUSED").unwrap(),
                json!({"points": 10, "used": 1}),
            ))
            .await
            .unwrap();

        assert!(ledger.redeem_code(&Caller::member(1), "LEGACY").await.is_ok());
        assert_eq!(
            ledger
                .redeem_code(&Caller::member(1), "LEGACYUSED")
                .await
                .unwrap_err(),
            LedgerError::AlreadyUsed
        );
    }

    /// Delegates reads to an inner store and fails every commit.
    struct UnavailableOnCommit(MemoryStore);

    #[async_trait]
    impl CredentialStore for UnavailableOnCommit {
        async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
            self.0.get(path).await
        }

        async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>> {
            self.0.list(collection).await
        }

        async fn commit(&self, _transaction: Transaction) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_retryable() {
        let inner = MemoryStore::new();
        inner
            .commit(Transaction::new().insert(
                StorePath::code("DOWN").unwrap(),
                json!({"points": 10, "used": false}),
            ))
            .await
            .unwrap();
        let ledger = LedgerService::new(Arc::new(UnavailableOnCommit(inner)), LedgerConfig::default());

        let err = ledger
            .redeem_code(&Caller::member(1), "DOWN")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    /// Loses every commit race.
    struct AlwaysConflicting(MemoryStore);

    #[async_trait]
    impl CredentialStore for AlwaysConflicting {
        async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
            self.0.get(path).await
        }

        async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>> {
            self.0.list(collection).await
        }

        async fn commit(&self, transaction: Transaction) -> StoreResult<()> {
            let first: Option<&Mutation> = transaction.mutations().first();
            Err(StoreError::Conflict {
                path: first.map(|m| m.path.to_string()).unwrap_or_default(),
            })
        }
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let inner = MemoryStore::new();
        inner
            .commit(Transaction::new().insert(
                StorePath::code("HOT").unwrap(),
                json!({"points": 10, "used": false}),
            ))
            .await
            .unwrap();
        let ledger = LedgerService::new(
            Arc::new(AlwaysConflicting(inner)),
            LedgerConfig {
                admin_user_id: ADMIN,
                max_attempts: 3,
                max_generate_count: 10,
            },
        );

        let err = ledger
            .redeem_code(&Caller::member(1), "HOT")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }

    enum CommitOutcome {
        Apply,
        /// Reports a conflict on the second mutation of the batch, as if another writer
        /// had taken that code first.
        ConflictOnSecond,
        Fail,
    }

    /// Plays back one outcome per commit, then applies everything.
    struct ScriptedCommits {
        inner: MemoryStore,
        script: std::sync::Mutex<Vec<CommitOutcome>>,
        commits: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedCommits {
        fn new(script: Vec<CommitOutcome>) -> Self {
            Self {
                inner: MemoryStore::new(),
                script: std::sync::Mutex::new(script),
                commits: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for ScriptedCommits {
        async fn get(&self, path: &StorePath) -> StoreResult<Option<Value>> {
            self.inner.get(path).await
        }

        async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>> {
            self.inner.list(collection).await
        }

        async fn commit(&self, transaction: Transaction) -> StoreResult<()> {
            self.commits
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let outcome = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    CommitOutcome::Apply
                } else {
                    script.remove(0)
                }
            };
            match outcome {
                CommitOutcome::Apply => self.inner.commit(transaction).await,
                CommitOutcome::ConflictOnSecond => Err(StoreError::Conflict {
                    path: transaction.mutations()[1].path.to_string(),
                }),
                CommitOutcome::Fail => Err(StoreError::Unavailable("connection reset".to_string())),
            }
        }
    }

    fn ledger_on(store: Arc<ScriptedCommits>) -> LedgerService {
        LedgerService::new(
            store,
            LedgerConfig {
                admin_user_id: ADMIN,
                ..LedgerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_generate_codes_failure_leaves_no_codes_behind() {
        let store = Arc::new(ScriptedCommits::new(vec![
            CommitOutcome::ConflictOnSecond,
            CommitOutcome::Fail,
        ]));
        let ledger = ledger_on(store.clone());

        let err = ledger.generate_codes(&admin(), 5, 20).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.inner.list(Collection::Codes).await.unwrap().is_empty());

        // retrying after the failure produces exactly one batch
        let codes = ledger.generate_codes(&admin(), 5, 20).await.unwrap();
        assert_eq!(codes.len(), 5);
        assert_eq!(store.inner.list(Collection::Codes).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_generate_codes_redraws_only_the_colliding_code() {
        let store = Arc::new(ScriptedCommits::new(vec![CommitOutcome::ConflictOnSecond]));
        let ledger = ledger_on(store.clone());

        let codes = ledger.generate_codes(&admin(), 4, 20).await.unwrap();
        assert_eq!(store.commits.load(std::sync::atomic::Ordering::SeqCst), 2);

        let stored: HashSet<String> = store
            .inner
            .list(Collection::Codes)
            .await
            .unwrap()
            .into_iter()
            .map(|(code, _)| code)
            .collect();
        let returned: HashSet<String> = codes.into_iter().map(|c| c.code).collect();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored, returned);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_not_retryable() {
        let (ledger, store) = ledger();
        store
            .commit(Transaction::new().insert(
                StorePath::code("BROKEN").unwrap(),
                json!({"points": "ten"}),
            ))
            .await
            .unwrap();

        let err = ledger
            .redeem_code(&Caller::member(1), "BROKEN")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CorruptRecord(_)));
        assert!(!err.is_retryable());
    }
}
