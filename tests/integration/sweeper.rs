// One full sweep pass against the in-process backend, driving every phase
// through the services the sweeper composes.

use std::sync::Arc;

use admp_hub::agents::AgentService;
use admp_hub::config::HubConfig;
use admp_hub::events::EventBus;
use admp_hub::groups::GroupService;
use admp_hub::models::{CreateRoundTableRequest, RegisterRequest, now_ms};
use admp_hub::roundtable::RoundTableService;
use admp_hub::storage::memory::MemoryStorage;
use admp_hub::storage::{DynStorage, RoundTableFilter, Storage};
use admp_hub::sweeper::run_sweep;

fn services(config: HubConfig) -> (DynStorage, AgentService, GroupService, RoundTableService) {
    let storage: DynStorage = Arc::new(MemoryStorage::new());
    let events = EventBus::new();
    let agents = AgentService::new(storage.clone(), config.clone());
    let groups = GroupService::new(storage.clone(), events.clone(), config.clone());
    let round_tables =
        RoundTableService::new(storage.clone(), events.clone(), groups.clone(), config);
    (storage, agents, groups, round_tables)
}

async fn register(agents: &AgentService, id: &str) {
    agents
        .register(RegisterRequest {
            agent_id: Some(id.to_string()),
            seed: None,
            agent_type: None,
            metadata: None,
            webhook_url: None,
            webhook_secret: None,
        })
        .await
        .unwrap();
}

#[test]
fn test_sweep_marks_silent_agents_offline() {
    rocket::execute(async {
        let config = HubConfig {
            heartbeat_timeout_ms: 0,
            ..HubConfig::default()
        };
        let (storage, agents, _, round_tables) = services(config.clone());

        register(&agents, "sleepy").await;
        // Make the registration heartbeat strictly older than the cutoff
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let result = run_sweep(&storage, &agents, &round_tables, &config).await;
        assert_eq!(result.agents_marked_offline, 1);
        let agent = storage.get_agent("sleepy").await.unwrap().unwrap();
        assert_eq!(agent.status, "offline");
    });
}

#[test]
fn test_sweep_expires_round_tables_and_cleans_groups() {
    rocket::execute(async {
        let config = HubConfig::default();
        let (storage, agents, _, round_tables) = services(config.clone());

        register(&agents, "fac").await;
        register(&agents, "p1").await;
        let rt = round_tables
            .create(CreateRoundTableRequest {
                topic: "stale".to_string(),
                goal: None,
                facilitator: "fac".to_string(),
                participants: vec!["p1".to_string()],
                expires_in_sec: Some(60),
            })
            .await
            .unwrap();
        let group_id = rt.group_id.clone().unwrap();

        // Not yet due: nothing expires
        let result = run_sweep(&storage, &agents, &round_tables, &config).await;
        assert_eq!(result.round_tables_expired, 0);

        // Force the deadline into the past, then sweep
        assert_eq!(round_tables.expire_past_due(now_ms() + 61_000).await.unwrap(), 1);
        let expired = storage
            .list_round_tables(RoundTableFilter {
                status: Some("expired".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert!(expired[0].group_id.is_none());
        assert!(storage.get_group(&group_id).await.unwrap().is_none());
    });
}
