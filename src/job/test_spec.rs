//! Test specifications attached to a job
//!
//! A test is either a remote definition living in a git repository or an
//! inline list of shell steps. Roles assign a test to the nodes of a
//! multi-node job.
//!
//! Remote tests can be written on the command line as
//! `repository#name[#revision]`.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::JobError;

/// Where a test's definition comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "from", rename_all = "lowercase")]
pub enum TestDefinition {
    /// Definition file in a git repository
    #[serde(rename = "git")]
    Remote {
        repository: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
    /// Steps carried in the job itself
    Inline { name: String, steps: Vec<String> },
}

/// One test to run as part of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTestSpec")]
pub struct TestSpec {
    #[serde(flatten)]
    pub definition: TestDefinition,
    pub params: BTreeMap<String, String>,
    pub roles: BTreeSet<String>,
}

impl TestSpec {
    pub fn remote(
        repository: impl Into<String>,
        name: impl Into<String>,
        revision: Option<String>,
    ) -> Self {
        Self::from_definition(TestDefinition::Remote {
            repository: repository.into(),
            name: name.into(),
            revision,
        })
    }

    pub fn inline(name: impl Into<String>, steps: Vec<String>) -> Self {
        Self::from_definition(TestDefinition::Inline {
            name: name.into(),
            steps,
        })
    }

    fn from_definition(definition: TestDefinition) -> Self {
        Self {
            definition,
            params: BTreeMap::new(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn name(&self) -> &str {
        match &self.definition {
            TestDefinition::Remote { name, .. } | TestDefinition::Inline { name, .. } => name,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.definition, TestDefinition::Inline { .. })
    }
}

impl FromStr for TestSpec {
    type Err = JobError;

    /// Parse `repository#name[#revision]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('#').collect();
        match parts.as_slice() {
            [repository, name] if !repository.is_empty() && !name.is_empty() => {
                Ok(Self::remote(*repository, *name, None))
            }
            [repository, name, revision]
                if !repository.is_empty() && !name.is_empty() && !revision.is_empty() =>
            {
                Ok(Self::remote(*repository, *name, Some(revision.to_string())))
            }
            _ => Err(JobError::InvalidTest(format!(
                "expected repository#name[#revision], got {:?}",
                s
            ))),
        }
    }
}

/// Roles may be given as a single tag or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Test entry as written in a suite file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestSpec {
    from: Option<String>,
    repository: Option<String>,
    name: Option<String>,
    revision: Option<serde_yaml::Value>,
    steps: Option<Vec<String>>,
    #[serde(default)]
    params: BTreeMap<String, serde_yaml::Value>,
    #[serde(alias = "role")]
    roles: Option<OneOrMany>,
}

impl TryFrom<RawTestSpec> for TestSpec {
    type Error = JobError;

    fn try_from(raw: RawTestSpec) -> Result<Self, Self::Error> {
        let name = raw
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| JobError::InvalidTest("test without a name".to_string()))?;

        match raw.from.as_deref() {
            None | Some("git") | Some("inline") => {}
            Some(other) => {
                return Err(JobError::InvalidTest(format!(
                    "test {} has unknown source {:?}",
                    name, other
                )))
            }
        }

        let definition = match (raw.repository, raw.steps) {
            (Some(_), Some(_)) => {
                return Err(JobError::InvalidTest(format!(
                    "test {} has both a repository and inline steps",
                    name
                )))
            }
            (Some(repository), None) => TestDefinition::Remote {
                repository,
                name,
                revision: raw.revision.as_ref().and_then(scalar_to_string),
            },
            (None, Some(steps)) => TestDefinition::Inline { name, steps },
            (None, None) => {
                return Err(JobError::InvalidTest(format!(
                    "test {} needs either a repository or steps",
                    name
                )))
            }
        };

        let params = raw
            .params
            .iter()
            .map(|(key, value)| {
                scalar_to_string(value)
                    .map(|v| (key.clone(), v))
                    .ok_or_else(|| JobError::InvalidTest(format!("param {} is not a scalar", key)))
            })
            .collect::<Result<_, _>>()?;

        let roles = match raw.roles {
            None => BTreeSet::new(),
            Some(OneOrMany::One(role)) => BTreeSet::from([role]),
            Some(OneOrMany::Many(roles)) => roles.into_iter().collect(),
        };

        Ok(Self {
            definition,
            params,
            roles,
        })
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
