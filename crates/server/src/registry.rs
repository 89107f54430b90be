// crates/server/src/registry.rs
//! The Registry: single source of truth for agents, sessions, tasks, and
//! messages.
//!
//! Every mutation goes through a method here, holds the internal lock only
//! for the synchronous critical section (never across `.await`), and emits
//! one typed [`Delta`] on the broadcast channel. The WebSocket layer filters
//! deltas per client; nothing else subscribes.
//!
//! Broadcast policy for activity updates: consecutive `working` updates for
//! one agent coalesce in a 200 ms window (latest wins); transitions to idle
//! or done flush immediately and cancel the pending debounce so a trailing
//! "Reading x" can never land after the true idle frame.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use agent_town_core::git::GitStatusInfo;
use agent_town_types::{
    Agent, AgentStatus, Delta, FullState, Message, Session, SessionSummary, Task, TaskStatus,
};

use crate::guards::Guards;
use crate::util::now_ms;

/// Coalescing window for consecutive `working` broadcasts.
pub const WORKING_DEBOUNCE: Duration = Duration::from_millis(200);

/// Bound on the retained message log.
pub const MESSAGE_LOG_CAP: usize = 200;

#[derive(Default)]
struct RegistryInner {
    all_agents: HashMap<String, Agent>,
    sessions: HashMap<String, Session>,
    tasks: HashMap<String, Task>,
    messages: VecDeque<Message>,
    message_ids: HashSet<String>,
    selected_session: Option<String>,
}

pub struct Registry {
    guards: Arc<Guards>,
    inner: Mutex<RegistryInner>,
    tx: broadcast::Sender<Delta>,
    /// Agent id → debounce generation. A pending flush only fires if its
    /// generation is still current; removing the entry cancels it.
    debounce: Mutex<HashMap<String, u64>>,
}

impl Registry {
    pub fn new(guards: Arc<Guards>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(512);
        Arc::new(Self {
            guards,
            inner: Mutex::new(RegistryInner::default()),
            tx,
            debounce: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribe to the delta stream (WebSocket fan-out).
    pub fn subscribe(&self) -> broadcast::Receiver<Delta> {
        self.tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("registry lock poisoned")
    }

    fn emit(&self, delta: Delta) {
        // No subscribers is fine (startup, tests).
        let _ = self.tx.send(delta);
    }

    // ── agents ───────────────────────────────────────────────────────

    /// Insert a new agent. Silently dropped when the id was recently removed
    /// (hooks retired it; the watcher must not resurrect it). A replay for an
    /// existing id is a no-op.
    pub fn register_agent(&self, agent: Agent) {
        if self.guards.was_recently_removed(&agent.id) {
            tracing::debug!(agent_id = %agent.id, "register dropped: recently removed");
            return;
        }
        let delta = {
            let mut inner = self.lock();
            if inner.all_agents.contains_key(&agent.id) {
                return;
            }
            inner.all_agents.insert(agent.id.clone(), agent.clone());
            Delta::AgentAdded(agent)
        };
        self.emit(delta);
    }

    /// Insert or update an agent. Respects the recently-removed guard.
    pub fn update_agent(&self, agent: Agent) {
        if self.guards.was_recently_removed(&agent.id) {
            return;
        }
        let delta = {
            let mut inner = self.lock();
            let added = !inner.all_agents.contains_key(&agent.id);
            inner.all_agents.insert(agent.id.clone(), agent.clone());
            if added {
                Delta::AgentAdded(agent)
            } else {
                Delta::AgentUpdated(agent)
            }
        };
        self.emit(delta);
    }

    /// Remove an agent and arm the recently-removed guard.
    pub fn remove_agent(&self, id: &str) {
        let removed = {
            let mut inner = self.lock();
            inner.all_agents.remove(id).is_some()
        };
        if removed {
            self.guards.mark_removed(id);
            // Any raw-session mapping that resolved to this agent dies with it.
            self.guards.remove_session_mappings(id);
            self.cancel_debounce(id);
            self.emit(Delta::AgentRemoved { id: id.to_string() });
        }
    }

    /// Set status/action/context for an agent.
    ///
    /// `working` broadcasts are debounced; idle/done flush immediately and
    /// cancel the pending debounce. A `working` update with a non-empty
    /// action also lands in the agent's recent-action ring.
    pub fn update_agent_activity_by_id(
        self: &Arc<Self>,
        id: &str,
        status: AgentStatus,
        action: Option<&str>,
        context: Option<&str>,
    ) {
        let now = now_ms();
        let delta = {
            let mut inner = self.lock();
            let Some(agent) = inner.all_agents.get_mut(id) else {
                return;
            };
            agent.set_status(status);
            if let Some(action) = action {
                agent.current_action = action.to_string();
            }
            if let Some(context) = context {
                agent.action_context = context.to_string();
            }
            if status == AgentStatus::Working {
                if let Some(action) = action {
                    agent.push_recent_action(action, now);
                }
            }
            Delta::AgentUpdated(agent.clone())
        };
        if status == AgentStatus::Working {
            self.schedule_debounced(id);
        } else {
            self.cancel_debounce(id);
            self.emit(delta);
        }
    }

    /// Flip the waiting flag (and optionally action/context/waiting type).
    ///
    /// Setting `waiting` on an idle/done agent promotes it to working first —
    /// idle and done agents are never waiting.
    pub fn set_agent_waiting_by_id(
        &self,
        id: &str,
        waiting: bool,
        action: Option<&str>,
        context: Option<&str>,
        waiting_type: Option<agent_town_types::WaitingType>,
    ) {
        let delta = {
            let mut inner = self.lock();
            let Some(agent) = inner.all_agents.get_mut(id) else {
                return;
            };
            if waiting {
                if matches!(agent.status, AgentStatus::Idle | AgentStatus::Done) {
                    agent.status = AgentStatus::Working;
                }
                agent.waiting_for_input = true;
                agent.waiting_type = waiting_type;
            } else {
                agent.waiting_for_input = false;
                agent.waiting_type = None;
            }
            if let Some(action) = action {
                agent.current_action = action.to_string();
            }
            if let Some(context) = context {
                agent.action_context = context.to_string();
            }
            Delta::AgentUpdated(agent.clone())
        };
        self.emit(delta);
    }

    /// Merge git fields into an agent.
    pub fn update_agent_git_info(
        &self,
        id: &str,
        branch: Option<&str>,
        worktree: Option<&str>,
        status: Option<GitStatusInfo>,
    ) {
        let delta = {
            let mut inner = self.lock();
            let Some(agent) = inner.all_agents.get_mut(id) else {
                return;
            };
            if let Some(branch) = branch {
                agent.git_branch = Some(branch.to_string());
            }
            if let Some(worktree) = worktree {
                agent.worktree_path = Some(worktree.to_string());
            }
            if let Some(s) = status {
                agent.git_ahead = Some(s.ahead);
                agent.git_behind = Some(s.behind);
                agent.has_upstream = Some(s.has_upstream);
                agent.git_dirty = Some(s.is_dirty);
            }
            Delta::AgentUpdated(agent.clone())
        };
        self.emit(delta);
    }

    pub fn set_agent_current_task(&self, id: &str, task_id: Option<&str>) {
        let delta = {
            let mut inner = self.lock();
            let Some(agent) = inner.all_agents.get_mut(id) else {
                return;
            };
            agent.current_task_id = task_id.map(String::from);
            Delta::AgentUpdated(agent.clone())
        };
        self.emit(delta);
    }

    pub fn get_agent(&self, id: &str) -> Option<Agent> {
        self.lock().all_agents.get(id).cloned()
    }

    /// First agent with a matching display name. Name lookups exist only for
    /// wire fields that genuinely carry names (task owners, message
    /// recipients); everything else is id-keyed.
    pub fn agent_id_by_name(&self, name: &str) -> Option<String> {
        self.lock()
            .all_agents
            .values()
            .find(|a| a.name == name)
            .map(|a| a.id.clone())
    }

    pub fn agent_count(&self) -> usize {
        self.lock().all_agents.len()
    }

    /// Clone of every known agent (staleness sweeps).
    pub fn agents_snapshot(&self) -> Vec<Agent> {
        self.lock().all_agents.values().cloned().collect()
    }

    /// Remove every agent belonging to a team (TeamDelete).
    pub fn clear_team_agents(&self, team_name: &str) {
        let ids: Vec<String> = {
            let inner = self.lock();
            inner
                .all_agents
                .values()
                .filter(|a| a.team_name.as_deref() == Some(team_name))
                .map(|a| a.id.clone())
                .collect()
        };
        for id in ids {
            self.remove_agent(&id);
        }
    }

    // ── tasks ────────────────────────────────────────────────────────

    /// Insert or update a task.
    ///
    /// A transition into completed credits the owner's `tasks_completed`
    /// exactly once. When ownership moves away from a working agent that has
    /// no other in-progress task, that agent's working status is cleared.
    pub fn update_task(&self, task: Task) {
        let mut agent_deltas: Vec<Delta> = Vec::new();
        let task_delta = {
            let mut inner = self.lock();
            let prev = inner.tasks.get(&task.id).cloned();
            inner.tasks.insert(task.id.clone(), task.clone());

            // Completion credit, once per transition into completed.
            let was_completed = prev
                .as_ref()
                .map(|p| p.status == TaskStatus::Completed)
                .unwrap_or(false);
            if task.status == TaskStatus::Completed && !was_completed {
                if let Some(owner) = task.owner.as_deref() {
                    if let Some(agent) = agent_by_name_mut(&mut inner, owner) {
                        agent.tasks_completed += 1;
                        if agent.current_task_id.as_deref() == Some(task.id.as_str()) {
                            agent.current_task_id = None;
                        }
                        agent_deltas.push(Delta::AgentUpdated(agent.clone()));
                    }
                }
            }

            // Track the owner's current task while it is in progress.
            if task.status == TaskStatus::InProgress {
                if let Some(owner) = task.owner.as_deref() {
                    if let Some(agent) = agent_by_name_mut(&mut inner, owner) {
                        if agent.current_task_id.as_deref() != Some(task.id.as_str()) {
                            agent.current_task_id = Some(task.id.clone());
                            agent_deltas.push(Delta::AgentUpdated(agent.clone()));
                        }
                    }
                }
            }

            // Ownership moved away from a working agent: idle it if nothing
            // else of theirs is in progress.
            if let Some(prev_task) = &prev {
                if let Some(prev_owner) = prev_task.owner.as_deref() {
                    if task.owner.as_deref() != Some(prev_owner) {
                        let still_busy = inner.tasks.values().any(|t| {
                            t.status == TaskStatus::InProgress
                                && t.owner.as_deref() == Some(prev_owner)
                        });
                        if !still_busy {
                            if let Some(agent) = agent_by_name_mut(&mut inner, prev_owner) {
                                if agent.status == AgentStatus::Working {
                                    agent.set_status(AgentStatus::Idle);
                                    agent.current_action.clear();
                                    agent.action_context.clear();
                                    agent.current_task_id = None;
                                    agent_deltas.push(Delta::AgentUpdated(agent.clone()));
                                }
                            }
                        }
                    }
                }
            }

            Delta::TaskUpdated(task)
        };
        for delta in agent_deltas {
            self.emit(delta);
        }
        self.emit(task_delta);
    }

    pub fn remove_task(&self, id: &str) {
        let removed = {
            let mut inner = self.lock();
            inner.tasks.remove(id).is_some()
        };
        if removed {
            self.emit(Delta::TaskRemoved { id: id.to_string() });
        }
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    /// Re-derive working/idle from task ownership: owners of in-progress
    /// tasks are working; working agents with none are idled.
    pub fn reconcile_agent_statuses(&self) {
        let deltas = {
            let mut inner = self.lock();
            let busy_owners: HashSet<String> = inner
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::InProgress)
                .filter_map(|t| t.owner.clone())
                .collect();
            let mut deltas = Vec::new();
            for agent in inner.all_agents.values_mut() {
                if busy_owners.contains(&agent.name) {
                    if agent.status != AgentStatus::Working {
                        agent.status = AgentStatus::Working;
                        deltas.push(Delta::AgentUpdated(agent.clone()));
                    }
                } else if agent.status == AgentStatus::Working {
                    agent.set_status(AgentStatus::Idle);
                    agent.current_action.clear();
                    agent.action_context.clear();
                    deltas.push(Delta::AgentUpdated(agent.clone()));
                }
            }
            deltas
        };
        for delta in deltas {
            self.emit(delta);
        }
    }

    // ── messages ─────────────────────────────────────────────────────

    /// Append a message, deduplicated by id, bounded to the latest 200.
    pub fn add_message(&self, message: Message) {
        let delta = {
            let mut inner = self.lock();
            if !inner.message_ids.insert(message.id.clone()) {
                return;
            }
            inner.messages.push_back(message.clone());
            while inner.messages.len() > MESSAGE_LOG_CAP {
                if let Some(evicted) = inner.messages.pop_front() {
                    inner.message_ids.remove(&evicted.id);
                }
            }
            Delta::NewMessage(message)
        };
        self.emit(delta);
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    // ── sessions ─────────────────────────────────────────────────────

    /// Insert a session. Auto-selects it when nothing is selected or when it
    /// is fresher than the current selection. A replay for an existing id
    /// only advances the activity timestamp.
    pub fn add_session(&self, session: Session) {
        enum Outcome {
            Replay,
            Selected(String),
            ListOnly,
        }
        let (outcome, started) = {
            let mut inner = self.lock();
            if let Some(existing) = inner.sessions.get_mut(&session.session_id) {
                existing.touch(session.last_activity);
                (Outcome::Replay, None)
            } else {
                let fresher_than_selected = match inner
                    .selected_session
                    .as_ref()
                    .and_then(|sid| inner.sessions.get(sid))
                {
                    Some(current) => session.last_activity > current.last_activity,
                    None => true,
                };
                let sid = session.session_id.clone();
                inner.sessions.insert(sid.clone(), session.clone());
                if fresher_than_selected {
                    inner.selected_session = Some(sid.clone());
                    (Outcome::Selected(sid), Some(session))
                } else {
                    (Outcome::ListOnly, Some(session))
                }
            }
        };
        if let Some(session) = started {
            self.emit(Delta::SessionStarted(session));
        }
        match outcome {
            Outcome::Replay => {}
            Outcome::Selected(sid) => {
                self.emit(Delta::SelectionChanged {
                    session_id: Some(sid),
                });
            }
            Outcome::ListOnly => self.emit(Delta::SessionsListChanged),
        }
    }

    /// Switch the server-global selection. Returns false for unknown ids.
    pub fn select_session(&self, session_id: &str) -> bool {
        {
            let mut inner = self.lock();
            if !inner.sessions.contains_key(session_id) {
                return false;
            }
            inner.selected_session = Some(session_id.to_string());
        }
        self.emit(Delta::SelectionChanged {
            session_id: Some(session_id.to_string()),
        });
        self.emit(Delta::SessionsListChanged);
        true
    }

    /// Remove a session, its id-mappings, and (for solo sessions) its member
    /// agents. Clears the selection when the removed session held it.
    pub fn remove_session(&self, session_id: &str) {
        let (existed, member_ids) = {
            let mut inner = self.lock();
            let Some(session) = inner.sessions.get(session_id) else {
                return;
            };
            let member_ids: Vec<String> = if session.is_team {
                // Team agents are cleared explicitly via TeamDelete.
                Vec::new()
            } else {
                members_of(&inner, session_id)
                    .into_iter()
                    .map(|a| a.id.clone())
                    .collect()
            };
            inner.sessions.remove(session_id);
            if inner.selected_session.as_deref() == Some(session_id) {
                inner.selected_session = None;
            }
            (true, member_ids)
        };
        if existed {
            for id in member_ids {
                self.remove_agent(&id);
            }
            self.guards.remove_session_mappings(session_id);
            self.emit(Delta::SessionEnded {
                session_id: session_id.to_string(),
            });
            self.emit(Delta::SessionsListChanged);
        }
    }

    /// Bump a session's activity clock (monotonic).
    pub fn update_session_activity(&self, session_id: &str, now: i64) {
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.touch(now);
        }
    }

    /// Select the session with the most recent activity.
    pub fn select_most_interesting_session(&self) {
        let freshest = {
            let inner = self.lock();
            inner
                .sessions
                .values()
                .max_by_key(|s| s.last_activity)
                .map(|s| s.session_id.clone())
        };
        if let Some(sid) = freshest {
            self.select_session(&sid);
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.lock().sessions.get(session_id).cloned()
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.lock().sessions.contains_key(session_id)
    }

    pub fn is_team_session(&self, session_id: &str) -> bool {
        self.lock()
            .sessions
            .get(session_id)
            .map(|s| s.is_team)
            .unwrap_or(false)
    }

    pub fn selected_session(&self) -> Option<String> {
        self.lock().selected_session.clone()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.lock().sessions.keys().cloned().collect()
    }

    // ── views ────────────────────────────────────────────────────────

    /// Whether `agent` is a member of `session_id` per the single membership
    /// filter. All visibility decisions use this.
    pub fn is_member(&self, agent: &Agent, session_id: &str) -> bool {
        let inner = self.lock();
        is_member_inner(&inner, agent, session_id)
    }

    /// Visible agents for a session (the membership filter, materialized).
    pub fn session_agents(&self, session_id: &str) -> Vec<Agent> {
        let inner = self.lock();
        members_of(&inner, session_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// The sessions list for one client, sorted by activity desc, with that
    /// client's `active` flag applied.
    pub fn sessions_snapshot(&self, client_selected: Option<&str>) -> Vec<SessionSummary> {
        let inner = self.lock();
        let mut sessions: Vec<&Session> = inner.sessions.values().collect();
        sessions.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
            .into_iter()
            .map(|s| SessionSummary {
                session_id: s.session_id.clone(),
                project_name: s.project_name.clone(),
                slug: s.slug.clone(),
                git_branch: s.git_branch.clone(),
                team_name: s.team_name.clone(),
                is_team: s.is_team,
                last_activity: s.last_activity,
                agent_count: members_of(&inner, &s.session_id).len(),
                active: client_selected == Some(s.session_id.as_str()),
            })
            .collect()
    }

    /// A complete view of one session. `None` session yields an empty state.
    pub fn full_state(&self, session_id: Option<&str>) -> FullState {
        let inner = self.lock();
        let Some(sid) = session_id else {
            return FullState::default();
        };
        let Some(session) = inner.sessions.get(sid) else {
            return FullState::default();
        };
        let mut agents: Vec<Agent> = members_of(&inner, sid).into_iter().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        let tasks = if session.is_team {
            let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
            tasks.sort_by(|a, b| a.id.cmp(&b.id));
            tasks
        } else {
            Vec::new()
        };
        FullState {
            session_id: Some(sid.to_string()),
            session_name: session
                .team_name
                .clone()
                .unwrap_or_else(|| session.project_name.clone()),
            agents,
            tasks,
            messages: inner.messages.iter().cloned().collect(),
        }
    }

    /// Server-chosen default for a fresh client: the freshest session with a
    /// waiting agent, else the freshest overall.
    pub fn default_session_for_client(&self) -> Option<String> {
        let inner = self.lock();
        let mut sessions: Vec<&Session> = inner.sessions.values().collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        for session in &sessions {
            let waiting = members_of(&inner, &session.session_id)
                .iter()
                .any(|a| a.waiting_for_input);
            if waiting {
                return Some(session.session_id.clone());
            }
        }
        sessions.first().map(|s| s.session_id.clone())
    }

    /// Wipe everything (tests).
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = RegistryInner::default();
        self.debounce
            .lock()
            .expect("debounce lock poisoned")
            .clear();
    }

    // ── debounce plumbing ────────────────────────────────────────────

    fn schedule_debounced(self: &Arc<Self>, id: &str) {
        let generation = {
            let mut debounce = self.debounce.lock().expect("debounce lock poisoned");
            let entry = debounce.entry(id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let registry = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(WORKING_DEBOUNCE).await;
            let current = {
                let mut debounce = registry.debounce.lock().expect("debounce lock poisoned");
                if debounce.get(&id) == Some(&generation) {
                    debounce.remove(&id);
                    true
                } else {
                    false
                }
            };
            if current {
                // Latest wins: read the agent as it is now, not as it was
                // when the update arrived.
                let delta = registry
                    .lock()
                    .all_agents
                    .get(&id)
                    .map(|a| Delta::AgentUpdated(a.clone()));
                if let Some(delta) = delta {
                    registry.emit(delta);
                }
            }
        });
    }

    fn cancel_debounce(&self, id: &str) {
        self.debounce
            .lock()
            .expect("debounce lock poisoned")
            .remove(id);
    }
}

fn agent_by_name_mut<'a>(inner: &'a mut RegistryInner, name: &str) -> Option<&'a mut Agent> {
    inner.all_agents.values_mut().find(|a| a.name == name)
}

/// The single membership filter — every visibility decision derives from it.
///
/// Solo sessions see the agent whose id equals the session id plus subagents
/// parented to it. Team sessions see every agent that is not itself a solo
/// session's main agent.
fn members_of<'a>(inner: &'a RegistryInner, session_id: &str) -> Vec<&'a Agent> {
    let Some(session) = inner.sessions.get(session_id) else {
        return Vec::new();
    };
    if session.is_team {
        let solo_ids: HashSet<&str> = inner
            .sessions
            .values()
            .filter(|s| !s.is_team)
            .map(|s| s.session_id.as_str())
            .collect();
        inner
            .all_agents
            .values()
            .filter(|a| !solo_ids.contains(a.id.as_str()))
            .collect()
    } else {
        inner
            .all_agents
            .values()
            .filter(|a| {
                a.id == session_id
                    || (a.is_subagent && a.parent_agent_id.as_deref() == Some(session_id))
            })
            .collect()
    }
}

fn is_member_inner(inner: &RegistryInner, agent: &Agent, session_id: &str) -> bool {
    let Some(session) = inner.sessions.get(session_id) else {
        return false;
    };
    if session.is_team {
        !inner
            .sessions
            .values()
            .any(|s| !s.is_team && s.session_id == agent.id)
    } else {
        agent.id == session_id
            || (agent.is_subagent && agent.parent_agent_id.as_deref() == Some(session_id))
    }
}
