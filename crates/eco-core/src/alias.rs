//! Alias trees and the flat alias namespace.
//!
//! Every device carries an [`Alias`]: a human-readable name, optionally
//! bound to a control-system channel. Aliases nest, so an assembly
//! `"xrd"` holding a motor `"gamma"` exposes the full name `"xrd.gamma"`.
//!
//! A [`Namespace`] is the flat view over many trees, used to guarantee that
//! no two registered aliases share a full name or a channel.

use crate::error::{EcoError, EcoResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Separator between alias path segments.
pub const ALIAS_SEPARATOR: &str = ".";

/// Named node of an alias tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channeltype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Alias>,
}

/// Flattened alias entry with its dotted full name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// Dotted full name
    pub alias: String,
    /// Bound channel, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Channel type (e.g. "CA", "BS")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channeltype: Option<String>,
}

impl Alias {
    /// Create an alias without a channel.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            channel: None,
            channeltype: None,
            children: Vec::new(),
        }
    }

    /// Bind a channel and its type.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>, channeltype: Option<&str>) -> Self {
        self.channel = Some(channel.into());
        self.channeltype = channeltype.map(str::to_string);
        self
    }

    /// Local name of this node.
    pub fn name(&self) -> &str {
        &self.alias
    }

    /// Bound channel, if any.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Channel type, if any.
    pub fn channeltype(&self) -> Option<&str> {
        self.channeltype.as_deref()
    }

    /// Direct children.
    pub fn children(&self) -> &[Alias] {
        &self.children
    }

    /// Look up a direct child by local name.
    pub fn child(&self, name: &str) -> Option<&Alias> {
        self.children.iter().find(|c| c.alias == name)
    }

    /// Append a child node. Sibling names must be unique.
    pub fn append(&mut self, child: Alias) -> EcoResult<()> {
        if self.child(&child.alias).is_some() {
            return Err(EcoError::DuplicateAlias {
                name: join_alias(&self.alias, &child.alias),
            });
        }
        debug!(parent = %self.alias, child = %child.alias, "Appending alias");
        self.children.push(child);
        Ok(())
    }

    /// Give the root node another name; children and channel are kept.
    pub(crate) fn set_name(&mut self, name: &str) {
        self.alias = name.to_string();
    }

    /// Flatten the tree, root included, in depth-first order.
    pub fn get_all(&self) -> Vec<AliasRecord> {
        let mut out = Vec::new();
        self.collect(None, &mut out);
        out
    }

    /// Full names of every node in the tree.
    pub fn get_full_names(&self) -> Vec<String> {
        self.get_all().into_iter().map(|r| r.alias).collect()
    }

    fn collect(&self, prefix: Option<&str>, out: &mut Vec<AliasRecord>) {
        let full = match prefix {
            Some(p) => join_alias(p, &self.alias),
            None => self.alias.clone(),
        };
        out.push(AliasRecord {
            alias: full.clone(),
            channel: self.channel.clone(),
            channeltype: self.channeltype.clone(),
        });
        for child in &self.children {
            child.collect(Some(&full), out);
        }
    }
}

/// Join two alias segments with [`ALIAS_SEPARATOR`].
pub fn join_alias(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}{ALIAS_SEPARATOR}{child}")
    }
}

/// Flat registry of aliases with unique names and unique channels.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Namespace {
    records: BTreeMap<String, AliasRecord>,
    #[serde(skip)]
    channels: BTreeMap<String, String>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every node of `alias`.
    ///
    /// The tree is checked as a whole first; on any conflict nothing is
    /// registered.
    pub fn register(&mut self, alias: &Alias) -> EcoResult<()> {
        let incoming = alias.get_all();

        let mut pending_names = BTreeMap::new();
        let mut pending_channels: BTreeMap<&str, &str> = BTreeMap::new();
        for record in &incoming {
            if self.records.contains_key(&record.alias)
                || pending_names.insert(record.alias.as_str(), ()).is_some()
            {
                return Err(EcoError::DuplicateAlias {
                    name: record.alias.clone(),
                });
            }
            if let Some(channel) = record.channel.as_deref() {
                let existing = self
                    .channels
                    .get(channel)
                    .map(String::as_str)
                    .or_else(|| pending_channels.get(channel).copied());
                if let Some(existing) = existing {
                    return Err(EcoError::DuplicateChannel {
                        channel: channel.to_string(),
                        existing: existing.to_string(),
                    });
                }
                pending_channels.insert(channel, &record.alias);
            }
        }

        for record in incoming {
            if let Some(channel) = &record.channel {
                self.channels.insert(channel.clone(), record.alias.clone());
            }
            self.records.insert(record.alias.clone(), record);
        }
        debug!(root = %alias.name(), total = self.records.len(), "Registered alias tree");
        Ok(())
    }

    /// Look up by full name.
    pub fn get(&self, name: &str) -> Option<&AliasRecord> {
        self.records.get(name)
    }

    /// Look up the alias bound to a channel.
    pub fn find_by_channel(&self, channel: &str) -> Option<&AliasRecord> {
        self.channels
            .get(channel)
            .and_then(|name| self.records.get(name))
    }

    /// Number of registered aliases.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, sorted by full name.
    pub fn records(&self) -> impl Iterator<Item = &AliasRecord> {
        self.records.values()
    }

    /// Rebuild the channel index (after deserialization).
    pub fn reindex(&mut self) {
        self.channels = self
            .records
            .values()
            .filter_map(|r| r.channel.clone().map(|c| (c, r.alias.clone())))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xrd() -> Alias {
        let mut root = Alias::new("xrd");
        root.append(Alias::new("gamma").with_channel("SARES20-XRD:MOT_GAM", Some("CA")))
            .unwrap();
        let mut det = Alias::new("det");
        det.append(Alias::new("frame").with_channel("JF01T03V01", Some("BS")))
            .unwrap();
        root.append(det).unwrap();
        root
    }

    #[test]
    fn test_full_names_are_dotted() {
        let names = xrd().get_full_names();
        assert_eq!(names, vec!["xrd", "xrd.gamma", "xrd.det", "xrd.det.frame"]);
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let mut root = xrd();
        let err = root.append(Alias::new("gamma")).unwrap_err();
        assert!(matches!(err, EcoError::DuplicateAlias { name } if name == "xrd.gamma"));
        assert_eq!(root.children().len(), 2);
    }

    #[test]
    fn test_same_name_in_different_branches_allowed() {
        let mut root = Alias::new("root");
        let mut a = Alias::new("a");
        a.append(Alias::new("x")).unwrap();
        let mut b = Alias::new("b");
        b.append(Alias::new("x")).unwrap();
        root.append(a).unwrap();
        root.append(b).unwrap();

        let mut ns = Namespace::new();
        ns.register(&root).unwrap();
        assert!(ns.get("root.a.x").is_some());
        assert!(ns.get("root.b.x").is_some());
    }

    #[test]
    fn test_namespace_rejects_duplicate_channel_atomically() {
        let mut ns = Namespace::new();
        ns.register(&xrd()).unwrap();
        let before = ns.len();

        let mut other = Alias::new("other");
        other.append(Alias::new("fresh")).unwrap();
        other
            .append(Alias::new("clash").with_channel("SARES20-XRD:MOT_GAM", None))
            .unwrap();

        let err = ns.register(&other).unwrap_err();
        assert!(matches!(
            err,
            EcoError::DuplicateChannel { ref existing, .. } if existing == "xrd.gamma"
        ));
        assert_eq!(ns.len(), before);
        assert!(ns.get("other.fresh").is_none());
    }

    #[test]
    fn test_namespace_rejects_duplicate_name() {
        let mut ns = Namespace::new();
        ns.register(&Alias::new("mono")).unwrap();
        assert!(matches!(
            ns.register(&Alias::new("mono")),
            Err(EcoError::DuplicateAlias { .. })
        ));
    }

    #[test]
    fn test_names_and_channels_unique_after_many_registrations() {
        let mut ns = Namespace::new();
        for i in 0..20 {
            let mut root = Alias::new(format!("dev{i}"));
            root.append(Alias::new("x").with_channel(format!("CH{i}:X"), Some("CA")))
                .unwrap();
            ns.register(&root).unwrap();
            assert!(ns.register(&Alias::new(format!("dev{i}"))).is_err());
        }
        let records: Vec<_> = ns.records().collect();
        let mut channels: Vec<_> = records.iter().filter_map(|r| r.channel.clone()).collect();
        channels.sort();
        channels.dedup();
        assert_eq!(records.len(), 40);
        assert_eq!(channels.len(), 20);
    }

    #[test]
    fn test_find_by_channel_after_reindex() {
        let mut ns = Namespace::new();
        ns.register(&xrd()).unwrap();
        let json = serde_json::to_string(&ns).unwrap();
        let mut restored: Namespace = serde_json::from_str(&json).unwrap();
        assert!(restored.find_by_channel("JF01T03V01").is_none());
        restored.reindex();
        assert_eq!(
            restored.find_by_channel("JF01T03V01").map(|r| r.alias.as_str()),
            Some("xrd.det.frame")
        );
    }
}
