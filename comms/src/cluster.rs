//! The static cluster topology: which endpoint serves which task of which role.

use std::{
    collections::{BTreeMap, HashMap},
    error::Error,
    fmt,
    net::{SocketAddr, ToSocketAddrs},
};

use log::debug;
use serde::{Deserialize, Serialize};

/// The role hosting the shared parameters.
pub const PS_ROLE: &str = "ps";

/// The role computing and pushing updates.
pub const WORKER_ROLE: &str = "worker";

/// The raw cluster description, role name to ordered endpoints.
///
/// The position of an endpoint inside its list is the task index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSpec(pub BTreeMap<String, Vec<String>>);

impl ClusterSpec {
    /// Adds a role with its endpoints, replacing any previous entry.
    pub fn with_role<I, S>(mut self, role: &str, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = endpoints.into_iter().map(Into::into).collect();
        self.0.insert(role.to_string(), endpoints);
        self
    }
}

/// Failures while building or querying a `ClusterRegistry`.
///
/// All of them are configuration errors, the process can't start with them.
#[derive(Debug)]
pub enum ClusterErr {
    UnknownRole {
        role: String,
    },
    IndexOutOfRange {
        role: String,
        index: usize,
        tasks: usize,
    },
    EmptyRole {
        role: String,
    },
    Unresolvable {
        role: String,
        index: usize,
        endpoint: String,
        reason: String,
    },
    DuplicateEndpoint {
        addr: SocketAddr,
        first: (String, usize),
        second: (String, usize),
    },
}

impl fmt::Display for ClusterErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRole { role } => write!(f, "unknown role {role:?}"),
            Self::IndexOutOfRange { role, index, tasks } => write!(
                f,
                "task index {index} out of range for role {role:?} with {tasks} task(s)"
            ),
            Self::EmptyRole { role } => write!(f, "role {role:?} has no endpoints"),
            Self::Unresolvable {
                role,
                index,
                endpoint,
                reason,
            } => write!(
                f,
                "endpoint {endpoint:?} of {role}/{index} can't be resolved: {reason}"
            ),
            Self::DuplicateEndpoint {
                addr,
                first,
                second,
            } => write!(
                f,
                "endpoint {addr} is used by both {}/{} and {}/{}",
                first.0, first.1, second.0, second.1
            ),
        }
    }
}

impl Error for ClusterErr {}

/// The authoritative, immutable mapping of roles to resolved endpoints.
#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    roles: BTreeMap<String, Vec<SocketAddr>>,
}

impl ClusterRegistry {
    /// Creates a new `ClusterRegistry`, resolving every endpoint.
    ///
    /// # Arguments
    /// * `spec` - The cluster description.
    ///
    /// # Returns
    /// The registry, or a `ClusterErr` if a role is empty, an endpoint doesn't resolve
    /// or the same address is assigned to two tasks.
    pub fn new(spec: ClusterSpec) -> Result<Self, ClusterErr> {
        let mut roles = BTreeMap::new();
        let mut owners: HashMap<SocketAddr, (String, usize)> = HashMap::new();

        for (role, endpoints) in spec.0 {
            if endpoints.is_empty() {
                return Err(ClusterErr::EmptyRole { role });
            }

            let mut addrs = Vec::with_capacity(endpoints.len());

            for (index, endpoint) in endpoints.into_iter().enumerate() {
                let addr = Self::resolve_endpoint(&role, index, &endpoint)?;

                if let Some(first) = owners.insert(addr, (role.clone(), index)) {
                    return Err(ClusterErr::DuplicateEndpoint {
                        addr,
                        first,
                        second: (role, index),
                    });
                }

                debug!("resolved {role}/{index} {endpoint} -> {addr}");
                addrs.push(addr);
            }

            roles.insert(role, addrs);
        }

        Ok(Self { roles })
    }

    /// Resolves the endpoint of a single task.
    ///
    /// # Arguments
    /// * `role` - The role name.
    /// * `task_index` - The position of the task inside the role.
    ///
    /// # Returns
    /// The task's address, or `UnknownRole` / `IndexOutOfRange`.
    pub fn resolve(&self, role: &str, task_index: usize) -> Result<SocketAddr, ClusterErr> {
        let tasks = self.tasks(role)?;

        tasks
            .get(task_index)
            .copied()
            .ok_or_else(|| ClusterErr::IndexOutOfRange {
                role: role.to_string(),
                index: task_index,
                tasks: tasks.len(),
            })
    }

    /// Returns every endpoint of `role`, ordered by task index.
    pub fn tasks(&self, role: &str) -> Result<&[SocketAddr], ClusterErr> {
        self.roles
            .get(role)
            .map(Vec::as_slice)
            .ok_or_else(|| ClusterErr::UnknownRole {
                role: role.to_string(),
            })
    }

    /// Returns the amount of tasks in `role`, zero if the role doesn't exist.
    pub fn num_tasks(&self, role: &str) -> usize {
        self.roles.get(role).map_or(0, Vec::len)
    }

    /// Returns the whole topology.
    pub fn all_roles(&self) -> &BTreeMap<String, Vec<SocketAddr>> {
        &self.roles
    }

    fn resolve_endpoint(
        role: &str,
        index: usize,
        endpoint: &str,
    ) -> Result<SocketAddr, ClusterErr> {
        let unresolvable = |reason: String| ClusterErr::Unresolvable {
            role: role.to_string(),
            index,
            endpoint: endpoint.to_string(),
            reason,
        };

        endpoint
            .to_socket_addrs()
            .map_err(|e| unresolvable(e.to_string()))?
            .next()
            .ok_or_else(|| unresolvable("no address found".to_string()))
    }
}
