use std::collections::HashMap;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::ParallelJobInfo;

/// Placeholder replaced with the cluster token of the requested
/// configuration.
pub const CONFIG_NAME_PLACEHOLDER: &str = "{config_name}";
/// Placeholder replaced with the requested node count.
pub const MAX_NODE_PLACEHOLDER: &str = "{max_node}";

/// What a parallel request adds to a submission: native-specification text
/// for the manager plus environment variables for the job itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelRequest {
    pub native_specification: String,
    pub env: Vec<(String, String)>,
}

/// Translation table from abstract parallel configurations to one
/// manager's native attributes.
///
/// Everything here is data, not logic: supporting a new cluster means
/// building a table with its tokens and templates, no code changes. The
/// default table targets a grid-engine-like manager.
#[derive(Debug, Clone)]
pub struct ParallelTable {
    /// Configuration name (e.g. "MPI") to the cluster's token for it
    /// (e.g. the name of a parallel environment).
    cluster_tokens: HashMap<String, String>,
    /// Native-specification templates, each expanded with both placeholders
    /// and joined with spaces.
    spec_templates: Vec<String>,
    /// Environment variables appended to the job's environment; values may
    /// use the `{max_node}` placeholder.
    env_templates: Vec<(String, String)>,
}

impl Default for ParallelTable {
    fn default() -> Self {
        Self::new(
            [("MPI", "mpi"), ("OpenMP", "smp")]
                .into_iter()
                .map(|(name, token)| (name.to_string(), token.to_string()))
                .collect(),
            vec![format!(
                "-pe {CONFIG_NAME_PLACEHOLDER} {MAX_NODE_PLACEHOLDER}"
            )],
            vec![(
                "OMP_NUM_THREADS".to_string(),
                MAX_NODE_PLACEHOLDER.to_string(),
            )],
        )
    }
}

impl ParallelTable {
    pub fn new(
        cluster_tokens: HashMap<String, String>,
        spec_templates: Vec<String>,
        env_templates: Vec<(String, String)>,
    ) -> Self {
        Self {
            cluster_tokens,
            spec_templates,
            env_templates,
        }
    }

    /// Expand a parallel request against this table. Unknown configurations
    /// are a submission error: nothing sensible can be sent to the manager
    /// for them.
    pub fn expand(&self, info: &ParallelJobInfo) -> Result<ParallelRequest> {
        let token = self.cluster_tokens.get(&info.configuration).ok_or_else(|| {
            SchedulerError::Submission(format!(
                "unknown parallel configuration '{}'",
                info.configuration
            ))
        })?;
        let max_node = info.max_nodes.to_string();

        let native_specification = self
            .spec_templates
            .iter()
            .map(|template| {
                template
                    .replace(CONFIG_NAME_PLACEHOLDER, token)
                    .replace(MAX_NODE_PLACEHOLDER, &max_node)
            })
            .collect::<Vec<_>>()
            .join(" ");

        let env = self
            .env_templates
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    value.replace(MAX_NODE_PLACEHOLDER, &max_node),
                )
            })
            .collect();

        Ok(ParallelRequest {
            native_specification,
            env,
        })
    }
}
