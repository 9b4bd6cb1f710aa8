//! BGP announcements as records of symbolic attributes, and their
//! versioned, fixed-length sets.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::rc::Rc;
use std::str::FromStr;

use routesyn_smt::{SmtVar, Sort};

use crate::{PolicyError, PolicyResult};

/// Enum domain names for the finite-sorted attributes.
pub const PREFIX_DOMAIN: &str = "prefix";
pub const PEER_DOMAIN: &str = "peer";
pub const ORIGIN_DOMAIN: &str = "origin";
pub const NEXT_HOP_DOMAIN: &str = "next_hop";
pub const AS_PATH_DOMAIN: &str = "as_path";

/// The fixed attribute set of an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attr {
    Prefix,
    Peer,
    Origin,
    NextHop,
    AsPath,
    AsPathLen,
    LocalPref,
    Med,
    Permitted,
}

impl Attr {
    pub const ALL: [Attr; 9] = [
        Attr::Prefix,
        Attr::Peer,
        Attr::Origin,
        Attr::NextHop,
        Attr::AsPath,
        Attr::AsPathLen,
        Attr::LocalPref,
        Attr::Med,
        Attr::Permitted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attr::Prefix => "prefix",
            Attr::Peer => "peer",
            Attr::Origin => "origin",
            Attr::NextHop => "next_hop",
            Attr::AsPath => "as_path",
            Attr::AsPathLen => "as_path_len",
            Attr::LocalPref => "local_pref",
            Attr::Med => "med",
            Attr::Permitted => "permitted",
        }
    }

    /// The enum domain backing this attribute, for finite-sorted ones.
    pub fn domain(&self) -> Option<&'static str> {
        match self {
            Attr::Prefix => Some(PREFIX_DOMAIN),
            Attr::Peer => Some(PEER_DOMAIN),
            Attr::Origin => Some(ORIGIN_DOMAIN),
            Attr::NextHop => Some(NEXT_HOP_DOMAIN),
            Attr::AsPath => Some(AS_PATH_DOMAIN),
            Attr::AsPathLen | Attr::LocalPref | Attr::Med | Attr::Permitted => None,
        }
    }

    pub fn sort(&self) -> Sort {
        match self {
            Attr::AsPathLen | Attr::LocalPref | Attr::Med => Sort::Int,
            Attr::Permitted => Sort::Bool,
            _ => Sort::Enum(self.domain().unwrap().to_string()),
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attr {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attr::ALL
            .into_iter()
            .find(|attr| attr.as_str() == s)
            .ok_or_else(|| PolicyError::UnrecognizedAttribute(s.to_string()))
    }
}

/// A BGP community tag (`ASN:value` notation).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Community(String);

impl Community {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dispatch key for the match/action factories: a fixed attribute or one
/// community tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Attr(Attr),
    Community(Community),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Attr(attr) => write!(f, "{attr}"),
            Field::Community(c) => write!(f, "community {c}"),
        }
    }
}

/// One simulated route advertisement. Immutable: "modifying" an attribute
/// always builds a new record sharing the untouched values.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub prefix: SmtVar,
    pub peer: SmtVar,
    pub origin: SmtVar,
    pub next_hop: SmtVar,
    pub as_path: SmtVar,
    pub as_path_len: SmtVar,
    pub local_pref: SmtVar,
    pub med: SmtVar,
    pub permitted: SmtVar,
    /// Per-tag boolean membership flags.
    pub communities: BTreeMap<Community, SmtVar>,
}

impl Announcement {
    pub fn attr(&self, attr: Attr) -> &SmtVar {
        match attr {
            Attr::Prefix => &self.prefix,
            Attr::Peer => &self.peer,
            Attr::Origin => &self.origin,
            Attr::NextHop => &self.next_hop,
            Attr::AsPath => &self.as_path,
            Attr::AsPathLen => &self.as_path_len,
            Attr::LocalPref => &self.local_pref,
            Attr::Med => &self.med,
            Attr::Permitted => &self.permitted,
        }
    }

    pub fn community(&self, tag: &Community) -> Option<&SmtVar> {
        self.communities.get(tag)
    }

    /// A copy with one attribute replaced.
    pub fn with_attr(&self, attr: Attr, value: SmtVar) -> Announcement {
        let mut next = self.clone();
        *next.attr_mut(attr) = value;
        next
    }

    /// A copy with one community flag replaced.
    pub fn with_community(&self, tag: Community, value: SmtVar) -> Announcement {
        let mut next = self.clone();
        next.communities.insert(tag, value);
        next
    }

    fn attr_mut(&mut self, attr: Attr) -> &mut SmtVar {
        match attr {
            Attr::Prefix => &mut self.prefix,
            Attr::Peer => &mut self.peer,
            Attr::Origin => &mut self.origin,
            Attr::NextHop => &mut self.next_hop,
            Attr::AsPath => &mut self.as_path,
            Attr::AsPathLen => &mut self.as_path_len,
            Attr::LocalPref => &mut self.local_pref,
            Attr::Med => &mut self.med,
            Attr::Permitted => &mut self.permitted,
        }
    }
}

/// A fixed-length sequence of announcements — one lane per simulated
/// input scenario — versioned through policy actions.
///
/// Versions form a singly-linked history: each one records the previous
/// version and the name of the action that produced it, and is never
/// mutated after construction.
#[derive(Debug)]
pub struct AnnouncementSet {
    anns: Vec<Announcement>,
    prev: Option<Rc<AnnouncementSet>>,
    produced_by: Option<String>,
}

impl AnnouncementSet {
    /// The initial version. Rejects an empty lane list.
    pub fn new(anns: Vec<Announcement>) -> PolicyResult<Rc<Self>> {
        if anns.is_empty() {
            return Err(PolicyError::EmptyAnnouncements);
        }
        Ok(Rc::new(Self {
            anns,
            prev: None,
            produced_by: None,
        }))
    }

    /// The next version, produced by the named action. The lane count is
    /// fixed across versions.
    pub fn create_new(
        self: &Rc<Self>,
        anns: Vec<Announcement>,
        produced_by: &str,
    ) -> PolicyResult<Rc<Self>> {
        if anns.len() != self.anns.len() {
            return Err(PolicyError::LaneCountMismatch {
                old: self.anns.len(),
                new: anns.len(),
            });
        }
        Ok(Rc::new(Self {
            anns,
            prev: Some(self.clone()),
            produced_by: Some(produced_by.to_string()),
        }))
    }

    pub fn len(&self) -> usize {
        self.anns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anns.is_empty()
    }

    pub fn get(&self, lane: usize) -> Option<&Announcement> {
        self.anns.get(lane)
    }

    /// The first lane; sets are never empty.
    pub fn first(&self) -> &Announcement {
        &self.anns[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Announcement> {
        self.anns.iter()
    }

    /// The previous version, if this one was produced by an action.
    pub fn prev(&self) -> Option<&Rc<AnnouncementSet>> {
        self.prev.as_ref()
    }

    /// The name of the producing action, if any.
    pub fn produced_by(&self) -> Option<&str> {
        self.produced_by.as_deref()
    }
}

impl Index<usize> for AnnouncementSet {
    type Output = Announcement;

    fn index(&self, lane: usize) -> &Announcement {
        &self.anns[lane]
    }
}
