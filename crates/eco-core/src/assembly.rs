//! Composite devices.
//!
//! An [`Assembly`] models a physical device made of several parts: a
//! diffractometer holding motors, a spectrometer holding a camera and a
//! grating. Members are registered under the assembly's alias tree, so the
//! full names (`xrd.gamma`, `xrd.det.exposure`) come for free.
//!
//! Each member is flagged as a *setting* (a configuration value worth
//! restoring) or a *status* entry (read-only information).

use crate::adjustable::{Adjustable, Detector};
use crate::alias::{Alias, join_alias};
use crate::error::{EcoError, EcoResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What an assembly holds.
#[derive(Clone)]
pub enum Member {
    /// Settable value
    Adjustable(Arc<dyn Adjustable>),
    /// Read-only value
    Detector(Arc<dyn Detector>),
    /// Nested assembly
    Assembly(Arc<Assembly>),
}

/// Classification used when collecting a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Configuration value
    Setting,
    /// Read-only status
    Status,
}

struct Entry {
    name: String,
    member: Member,
    role: MemberRole,
}

/// Values of every member, keyed by dotted full name.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Values of setting members
    pub settings: BTreeMap<String, f64>,
    /// Values of status members
    pub status: BTreeMap<String, f64>,
}

impl StatusSnapshot {
    fn merge(&mut self, other: StatusSnapshot) {
        self.settings.extend(other.settings);
        self.status.extend(other.status);
    }
}

/// Composite device.
pub struct Assembly {
    alias: Alias,
    members: Vec<Entry>,
}

impl Assembly {
    /// Create an empty assembly.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: Alias::new(name),
            members: Vec::new(),
        }
    }

    /// Local name.
    pub fn name(&self) -> &str {
        self.alias.name()
    }

    /// Alias tree including every member.
    pub fn alias(&self) -> &Alias {
        &self.alias
    }

    /// Number of direct members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True without members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add a settable member with an optional channel.
    pub fn append_adjustable(
        &mut self,
        name: &str,
        adjustable: Arc<dyn Adjustable>,
        channel: Option<&str>,
        role: MemberRole,
    ) -> EcoResult<()> {
        self.append(name, leaf_alias(name, channel), Member::Adjustable(adjustable), role)
    }

    /// Add a read-only member with an optional channel.
    pub fn append_detector(
        &mut self,
        name: &str,
        detector: Arc<dyn Detector>,
        channel: Option<&str>,
        role: MemberRole,
    ) -> EcoResult<()> {
        self.append(name, leaf_alias(name, channel), Member::Detector(detector), role)
    }

    /// Nest another assembly under `name`.
    pub fn append_assembly(
        &mut self,
        name: &str,
        assembly: Arc<Assembly>,
        role: MemberRole,
    ) -> EcoResult<()> {
        let mut alias = assembly.alias.clone();
        alias.set_name(name);
        self.append(name, alias, Member::Assembly(assembly), role)
    }

    fn append(&mut self, name: &str, alias: Alias, member: Member, role: MemberRole) -> EcoResult<()> {
        if name.is_empty() || name.contains(crate::alias::ALIAS_SEPARATOR) {
            return Err(EcoError::Configuration(format!(
                "invalid member name '{name}' in assembly '{}'",
                self.name()
            )));
        }
        self.alias.append(alias)?;
        debug!(assembly = %self.name(), member = %name, ?role, "Appended member");
        self.members.push(Entry {
            name: name.to_string(),
            member,
            role,
        });
        Ok(())
    }

    /// Direct member by local name.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.member)
    }

    /// Resolve a dotted path relative to this assembly.
    pub fn get(&self, path: &str) -> Option<Member> {
        let (head, rest) = match path.split_once(crate::alias::ALIAS_SEPARATOR) {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match (self.member(head)?, rest) {
            (member, None) => Some(member.clone()),
            (Member::Assembly(sub), Some(rest)) => sub.get(rest),
            (_, Some(_)) => None,
        }
    }

    /// Resolve a dotted path to an adjustable.
    pub fn get_adjustable(&self, path: &str) -> Option<Arc<dyn Adjustable>> {
        match self.get(path)? {
            Member::Adjustable(a) => Some(a),
            _ => None,
        }
    }

    /// Resolve a dotted path to something readable.
    pub fn get_detector(&self, path: &str) -> Option<Arc<dyn Detector>> {
        match self.get(path)? {
            Member::Detector(d) => Some(d),
            Member::Adjustable(a) => Some(Arc::new(AdjustableReader(a))),
            Member::Assembly(_) => None,
        }
    }

    /// Read every member recursively.
    ///
    /// A member that fails to read is logged and left out. Every entry of a
    /// nested assembly appended as a status member is reported as status.
    pub fn get_status(&self) -> BoxFuture<'_, StatusSnapshot> {
        Box::pin(async move {
            let mut snapshot = StatusSnapshot::default();
            for entry in &self.members {
                let full = join_alias(self.name(), &entry.name);
                let value = match &entry.member {
                    Member::Adjustable(a) => a.get_current_value().await,
                    Member::Detector(d) => d.get_current_value().await,
                    Member::Assembly(sub) => {
                        let nested = sub.get_status().await;
                        snapshot.merge(prefix_snapshot(nested, sub.name(), &full, entry.role));
                        continue;
                    }
                };
                match value {
                    Ok(v) => {
                        let target = match entry.role {
                            MemberRole::Setting => &mut snapshot.settings,
                            MemberRole::Status => &mut snapshot.status,
                        };
                        target.insert(full, v);
                    }
                    Err(e) => warn!(member = %full, error = %e, "Could not read member"),
                }
            }
            snapshot
        })
    }
}

fn leaf_alias(name: &str, channel: Option<&str>) -> Alias {
    match channel {
        Some(ch) => Alias::new(name).with_channel(ch, None),
        None => Alias::new(name),
    }
}


fn prefix_snapshot(
    nested: StatusSnapshot,
    sub_name: &str,
    full: &str,
    role: MemberRole,
) -> StatusSnapshot {
    let own_prefix = join_alias(sub_name, "");
    let prefix = |m: BTreeMap<String, f64>| -> BTreeMap<String, f64> {
        m.into_iter()
            .map(|(k, v)| {
                let rest = k.strip_prefix(own_prefix.as_str()).unwrap_or(&k);
                (join_alias(full, rest), v)
            })
            .collect()
    };
    match role {
        MemberRole::Setting => StatusSnapshot {
            settings: prefix(nested.settings),
            status: prefix(nested.status),
        },
        MemberRole::Status => {
            let mut status = prefix(nested.settings);
            status.extend(prefix(nested.status));
            StatusSnapshot {
                settings: BTreeMap::new(),
                status,
            }
        }
    }
}

/// Read-only view of an adjustable.
struct AdjustableReader(Arc<dyn Adjustable>);

#[async_trait::async_trait]
impl Detector for AdjustableReader {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn units(&self) -> Option<&str> {
        self.0.units()
    }

    async fn get_current_value(&self) -> anyhow::Result<f64> {
        self.0.get_current_value().await
    }
}
