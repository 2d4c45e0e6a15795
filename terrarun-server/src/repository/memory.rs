//! In-memory repository
//!
//! All state lives behind one mutex, so every trait method is atomic with
//! respect to every other. Used for local development (`TERRARUN_STORE=memory`)
//! and throughout the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use terrarun_core::domain::agent::{Agent, AgentStatus};
use terrarun_core::domain::pool::{AgentPool, AgentToken, PoolScope};
use terrarun_core::domain::run::{RunQueueEntry, RunState};
use terrarun_core::domain::scope::{Environment, Project, Workspace};
use terrarun_core::dto::pool::UpdateAgentPool;
use terrarun_core::dto::run::RunQuery;
use uuid::Uuid;

use crate::repository::{Repository, RepositoryError, Result, RunOutcome, SweepReport};

/// Repository holding everything in process memory
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct State {
    workspaces: HashMap<Uuid, Workspace>,
    projects: HashMap<Uuid, Project>,
    environments: HashMap<Uuid, Environment>,
    pools: HashMap<Uuid, AgentPool>,
    scopes: HashMap<Uuid, HashSet<PoolScope>>,
    tokens: HashMap<Uuid, StoredToken>,
    agents: HashMap<Uuid, StoredAgent>,
    runs: HashMap<Uuid, RunQueueEntry>,
}

struct StoredToken {
    token: AgentToken,
    secret_hash: String,
}

struct StoredAgent {
    agent: Agent,
    session_hash: String,
}

impl State {
    fn name_taken(&self, organisation: &str, name: &str, except: Option<Uuid>) -> bool {
        self.pools.values().any(|p| {
            p.organisation == organisation && p.name == name && Some(p.id) != except
        })
    }

    fn pool_scopes(&self, pool_id: Uuid) -> Vec<PoolScope> {
        self.scopes
            .get(&pool_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn holds_work(&self, agent_id: Uuid) -> bool {
        self.runs.values().any(|entry| entry.is_held_by(agent_id))
    }

    fn release_held_by(&mut self, agent_ids: &[Uuid]) -> Vec<RunQueueEntry> {
        let mut released = Vec::new();

        for entry in self.runs.values_mut() {
            let held = agent_ids.iter().any(|id| entry.is_held_by(*id));
            if held {
                entry.state = RunState::Unclaimed;
                entry.agent_id = None;
                entry.claimed_at = None;
                entry.started_at = None;
                released.push(entry.clone());
            }
        }

        released
    }

    fn free_agent(&mut self, agent_id: Uuid) {
        let holds_work = self.holds_work(agent_id);
        if let Some(stored) = self.agents.get_mut(&agent_id) {
            if stored.agent.status == AgentStatus::Busy && !holds_work {
                stored.agent.status = AgentStatus::Idle;
            }
        }
    }

    fn owned_entry_mut(&mut self, entry_id: Uuid, agent_id: Uuid) -> Option<&mut RunQueueEntry> {
        self.runs
            .get_mut(&entry_id)
            .filter(|entry| entry.is_held_by(agent_id))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.state
            .lock()
            .workspaces
            .insert(workspace.id, workspace.clone());
        Ok(())
    }

    async fn find_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
        Ok(self.state.lock().workspaces.get(&id).cloned())
    }

    async fn list_workspaces(&self, organisation: Option<&str>) -> Result<Vec<Workspace>> {
        let state = self.state.lock();
        let mut workspaces: Vec<Workspace> = state
            .workspaces
            .values()
            .filter(|w| organisation.is_none_or(|org| w.organisation == org))
            .cloned()
            .collect();
        workspaces.sort_by(|a, b| (&a.organisation, &a.name).cmp(&(&b.organisation, &b.name)));
        Ok(workspaces)
    }

    async fn upsert_project(&self, project: &Project) -> Result<()> {
        self.state
            .lock()
            .projects
            .insert(project.id, project.clone());
        Ok(())
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.state.lock().projects.get(&id).cloned())
    }

    async fn upsert_environment(&self, environment: &Environment) -> Result<()> {
        self.state
            .lock()
            .environments
            .insert(environment.id, environment.clone());
        Ok(())
    }

    async fn find_environment(&self, id: Uuid) -> Result<Option<Environment>> {
        Ok(self.state.lock().environments.get(&id).cloned())
    }

    async fn insert_pool(&self, pool: &AgentPool) -> Result<()> {
        let mut state = self.state.lock();

        if state.name_taken(&pool.organisation, &pool.name, None) {
            return Err(RepositoryError::Conflict(format!(
                "Organisation {} already has a pool named {}",
                pool.organisation, pool.name
            )));
        }

        state.pools.insert(pool.id, pool.clone());
        Ok(())
    }

    async fn find_pool(&self, id: Uuid) -> Result<Option<AgentPool>> {
        Ok(self.state.lock().pools.get(&id).cloned())
    }

    async fn list_pools(&self, organisation: Option<&str>) -> Result<Vec<AgentPool>> {
        let state = self.state.lock();
        let mut pools: Vec<AgentPool> = state
            .pools
            .values()
            .filter(|p| organisation.is_none_or(|org| p.organisation == org))
            .cloned()
            .collect();
        pools.sort_by(|a, b| (&a.organisation, &a.name).cmp(&(&b.organisation, &b.name)));
        Ok(pools)
    }

    async fn update_pool(&self, id: Uuid, update: &UpdateAgentPool) -> Result<Option<AgentPool>> {
        let mut state = self.state.lock();

        let Some(organisation) = state.pools.get(&id).map(|p| p.organisation.clone()) else {
            return Ok(None);
        };

        if let Some(name) = &update.name {
            if state.name_taken(&organisation, name, Some(id)) {
                return Err(RepositoryError::Conflict(format!(
                    "Organisation {} already has a pool named {}",
                    organisation, name
                )));
            }
        }

        let Some(pool) = state.pools.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            pool.name = name.clone();
        }
        if let Some(allow_all) = update.allow_all_workspaces {
            pool.allow_all_workspaces = allow_all;
        }

        Ok(Some(pool.clone()))
    }

    async fn delete_pool(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock();

        if state.pools.remove(&id).is_none() {
            return Ok(false);
        }

        let agent_ids: Vec<Uuid> = state
            .agents
            .values()
            .filter(|s| s.agent.pool_id == id)
            .map(|s| s.agent.id)
            .collect();
        state.release_held_by(&agent_ids);

        state.agents.retain(|_, s| s.agent.pool_id != id);
        state.tokens.retain(|_, t| t.token.pool_id != id);
        state.scopes.remove(&id);

        Ok(true)
    }

    async fn add_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<()> {
        self.state
            .lock()
            .scopes
            .entry(pool_id)
            .or_default()
            .insert(scope);
        Ok(())
    }

    async fn remove_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .scopes
            .get_mut(&pool_id)
            .is_some_and(|set| set.remove(&scope)))
    }

    async fn list_pool_scopes(&self, pool_id: Uuid) -> Result<Vec<PoolScope>> {
        let mut scopes = self.state.lock().pool_scopes(pool_id);
        scopes.sort_by_key(|s| (s.kind(), s.target_id()));
        Ok(scopes)
    }

    async fn eligible_pools(&self, workspace: &Workspace) -> Result<Vec<AgentPool>> {
        let state = self.state.lock();
        let mut pools: Vec<AgentPool> = state
            .pools
            .values()
            .filter(|p| p.is_eligible_for(workspace, &state.pool_scopes(p.id)))
            .cloned()
            .collect();
        pools.sort_by(|a, b| (&a.organisation, &a.name).cmp(&(&b.organisation, &b.name)));
        Ok(pools)
    }

    async fn insert_token(&self, token: &AgentToken, secret_hash: &str) -> Result<()> {
        self.state.lock().tokens.insert(
            token.id,
            StoredToken {
                token: token.clone(),
                secret_hash: secret_hash.to_string(),
            },
        );
        Ok(())
    }

    async fn list_tokens(&self, pool_id: Uuid) -> Result<Vec<AgentToken>> {
        let state = self.state.lock();
        let mut tokens: Vec<AgentToken> = state
            .tokens
            .values()
            .filter(|t| t.token.pool_id == pool_id)
            .map(|t| t.token.clone())
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    async fn revoke_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<AgentToken>> {
        let mut state = self.state.lock();
        Ok(state.tokens.get_mut(&id).map(|stored| {
            stored.token.revoked_at.get_or_insert(at);
            stored.token.clone()
        }))
    }

    async fn register_agent(
        &self,
        token_hash: &str,
        name: &str,
        session_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        let mut state = self.state.lock();

        let Some(stored) = state
            .tokens
            .values_mut()
            .find(|t| t.secret_hash == token_hash && !t.token.is_revoked())
        else {
            return Ok(None);
        };
        stored.token.last_used_at = Some(at);

        let agent = Agent {
            id: Uuid::new_v4(),
            pool_id: stored.token.pool_id,
            name: name.to_string(),
            status: AgentStatus::Idle,
            created_at: at,
            last_ping_at: at,
        };

        state.agents.insert(
            agent.id,
            StoredAgent {
                agent: agent.clone(),
                session_hash: session_hash.to_string(),
            },
        );

        Ok(Some(agent))
    }

    async fn authenticate_agent(&self, id: Uuid, session_hash: &str) -> Result<Option<Agent>> {
        Ok(self
            .state
            .lock()
            .agents
            .get(&id)
            .filter(|s| s.session_hash == session_hash)
            .map(|s| s.agent.clone()))
    }

    async fn find_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(self.state.lock().agents.get(&id).map(|s| s.agent.clone()))
    }

    async fn list_agents(&self, pool_id: Option<Uuid>) -> Result<Vec<Agent>> {
        let state = self.state.lock();
        let mut agents: Vec<Agent> = state
            .agents
            .values()
            .filter(|s| pool_id.is_none_or(|id| s.agent.pool_id == id))
            .map(|s| s.agent.clone())
            .collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(agents)
    }

    async fn record_heartbeat(
        &self,
        id: Uuid,
        reported: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        let mut state = self.state.lock();

        if !state.agents.contains_key(&id) {
            return Ok(None);
        }

        let holds_work = state.holds_work(id);
        let status = AgentStatus::from_report(reported, holds_work);
        if status.abandons_work() && holds_work {
            state.release_held_by(&[id]);
        }

        let Some(stored) = state.agents.get_mut(&id) else {
            return Ok(None);
        };
        stored.agent.status = status;
        stored.agent.last_ping_at = stored.agent.last_ping_at.max(at);

        Ok(Some(stored.agent.clone()))
    }

    async fn delete_agent(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock();
        state.release_held_by(&[id]);
        Ok(state.agents.remove(&id).is_some())
    }

    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let mut state = self.state.lock();

        let mut agents = Vec::new();
        for stored in state.agents.values_mut() {
            if stored.agent.last_ping_at < cutoff && stored.agent.status.is_sweepable() {
                stored.agent.status = AgentStatus::Unknown;
                agents.push(stored.agent.clone());
            }
        }

        let ids: Vec<Uuid> = agents.iter().map(|a| a.id).collect();
        let released = state.release_held_by(&ids);

        Ok(SweepReport { agents, released })
    }

    async fn insert_run(&self, entry: &RunQueueEntry) -> Result<()> {
        self.state.lock().runs.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_run(&self, id: Uuid) -> Result<Option<RunQueueEntry>> {
        Ok(self.state.lock().runs.get(&id).cloned())
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunQueueEntry>> {
        let state = self.state.lock();
        let mut runs: Vec<RunQueueEntry> = state
            .runs
            .values()
            .filter(|r| query.state.is_none_or(|s| r.state == s))
            .filter(|r| query.workspace_id.is_none_or(|w| r.workspace_id == w))
            .cloned()
            .collect();
        runs.sort_by_key(|r| (r.queued_at, r.id));
        Ok(runs)
    }

    async fn claim_next(&self, agent_id: Uuid, at: DateTime<Utc>) -> Result<Option<RunQueueEntry>> {
        let mut state = self.state.lock();

        let Some(agent) = state.agents.get(&agent_id).map(|s| s.agent.clone()) else {
            return Ok(None);
        };
        if !agent.status.can_claim() {
            return Ok(None);
        }
        let Some(pool) = state.pools.get(&agent.pool_id).cloned() else {
            return Ok(None);
        };
        let scopes = state.pool_scopes(pool.id);

        let next = state
            .runs
            .values()
            .filter(|entry| entry.state == RunState::Unclaimed)
            .filter(|entry| {
                state
                    .workspaces
                    .get(&entry.workspace_id)
                    .is_some_and(|ws| pool.is_eligible_for(ws, &scopes))
            })
            .min_by_key(|entry| (entry.queued_at, entry.id))
            .map(|entry| entry.id);

        let Some(entry_id) = next else {
            return Ok(None);
        };

        let Some(entry) = state.runs.get_mut(&entry_id) else {
            return Ok(None);
        };
        entry.state = RunState::Claimed;
        entry.agent_id = Some(agent_id);
        entry.attempt += 1;
        entry.claimed_at = Some(at);
        entry.started_at = None;
        let claimed = entry.clone();

        if let Some(stored) = state.agents.get_mut(&agent_id) {
            stored.agent.status = AgentStatus::Busy;
        }

        Ok(Some(claimed))
    }

    async fn start_run(
        &self,
        entry_id: Uuid,
        agent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RunQueueEntry>> {
        let mut state = self.state.lock();

        Ok(state
            .owned_entry_mut(entry_id, agent_id)
            .filter(|entry| entry.state == RunState::Claimed)
            .map(|entry| {
                entry.state = RunState::Executing;
                entry.started_at = Some(at);
                entry.clone()
            }))
    }

    async fn finish_run(
        &self,
        entry_id: Uuid,
        agent_id: Uuid,
        outcome: RunOutcome,
        at: DateTime<Utc>,
    ) -> Result<Option<RunQueueEntry>> {
        let mut state = self.state.lock();

        let Some(entry) = state.owned_entry_mut(entry_id, agent_id) else {
            return Ok(None);
        };
        match outcome {
            RunOutcome::Completed => entry.state = RunState::Completed,
            RunOutcome::Failed(message) => {
                entry.state = RunState::Failed;
                entry.failure_message = Some(message);
            }
        }
        entry.finished_at = Some(at);
        let finished = entry.clone();

        state.free_agent(agent_id);
        Ok(Some(finished))
    }

    async fn release_run(&self, entry_id: Uuid, agent_id: Uuid) -> Result<Option<RunQueueEntry>> {
        let mut state = self.state.lock();

        let Some(entry) = state.owned_entry_mut(entry_id, agent_id) else {
            return Ok(None);
        };
        entry.state = RunState::Unclaimed;
        entry.agent_id = None;
        entry.claimed_at = None;
        entry.started_at = None;
        let released = entry.clone();

        state.free_agent(agent_id);
        Ok(Some(released))
    }
}
