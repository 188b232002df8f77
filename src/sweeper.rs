use crate::agents::AgentService;
use crate::config::HubConfig;
use crate::models::now_ms;
use crate::roundtable::RoundTableService;
use crate::storage::DynStorage;

/// Result of a single sweep pass, for logging and the force-run endpoint.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub leases_reclaimed: u64,
    pub messages_expired: u64,
    pub ephemeral_purged: u64,
    pub terminal_cleaned: u64,
    pub round_tables_expired: u64,
    pub agents_marked_offline: u64,
}

impl SweepResult {
    pub fn total(&self) -> u64 {
        self.leases_reclaimed
            + self.messages_expired
            + self.ephemeral_purged
            + self.terminal_cleaned
            + self.round_tables_expired
            + self.agents_marked_offline
    }
}

/// Spawns the background task that periodically reclaims lapsed leases,
/// expires messages past their TTL, purges expired ephemerals, deletes
/// terminal records past retention, expires round tables and refreshes
/// heartbeat statuses. Idempotent; safe to run alongside the force-run
/// endpoint because every transition is atomic in storage.
pub fn spawn_sweeper(
    storage: DynStorage,
    agents: AgentService,
    round_tables: RoundTableService,
    config: HubConfig,
) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_millis(config.cleanup_interval_ms);
        loop {
            tokio::time::sleep(interval).await;
            let result = run_sweep(&storage, &agents, &round_tables, &config).await;
            if result.total() > 0 {
                println!(
                    "🧹 Sweep: {} leases reclaimed, {} expired, {} purged, {} cleaned, {} round tables closed, {} agents offline",
                    result.leases_reclaimed,
                    result.messages_expired,
                    result.ephemeral_purged,
                    result.terminal_cleaned,
                    result.round_tables_expired,
                    result.agents_marked_offline,
                );
            }
        }
    });
}

/// Execute one sweep pass. Failures in one phase are logged and do not stop
/// the others.
pub async fn run_sweep(
    storage: &DynStorage,
    agents: &AgentService,
    round_tables: &RoundTableService,
    config: &HubConfig,
) -> SweepResult {
    let now = now_ms();
    let mut result = SweepResult::default();

    match storage.expire_leases(now).await {
        Ok(n) => result.leases_reclaimed = n,
        Err(e) => eprintln!("⚠️ Sweep: lease reclaim failed: {e}"),
    }
    match storage.expire_messages(now).await {
        Ok(n) => result.messages_expired = n,
        Err(e) => eprintln!("⚠️ Sweep: message expiry failed: {e}"),
    }
    match storage.purge_expired_ephemeral(now).await {
        Ok(n) => result.ephemeral_purged = n,
        Err(e) => eprintln!("⚠️ Sweep: ephemeral purge failed: {e}"),
    }
    match storage
        .cleanup_terminal_messages(now, config.terminal_retention_ms)
        .await
    {
        Ok(n) => result.terminal_cleaned = n,
        Err(e) => eprintln!("⚠️ Sweep: terminal cleanup failed: {e}"),
    }
    match round_tables.expire_past_due(now).await {
        Ok(n) => result.round_tables_expired = n,
        Err(e) => eprintln!("⚠️ Sweep: round-table expiry failed: {}", e.code()),
    }
    match agents.refresh_statuses().await {
        Ok(n) => result.agents_marked_offline = n,
        Err(e) => eprintln!("⚠️ Sweep: heartbeat refresh failed: {}", e.code()),
    }

    result
}
