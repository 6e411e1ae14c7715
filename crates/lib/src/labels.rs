//! Closed label vocabulary and label sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A conversation label the classifier may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Demand,
    Support,
    Spam,
    Offer,
    Billing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown label: {0}")]
pub struct UnknownLabel(pub String);

impl Label {
    /// The full vocabulary, in the order it is presented to the classifier.
    pub const ALL: [Label; 5] = [
        Label::Demand,
        Label::Support,
        Label::Spam,
        Label::Offer,
        Label::Billing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Demand => "demand",
            Label::Support => "support",
            Label::Spam => "spam",
            Label::Offer => "offer",
            Label::Billing => "billing",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = UnknownLabel;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Label::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// De-duplicated set of labels, serialized as a JSON array of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<Label>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: Label) -> bool {
        self.0.insert(label)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Label names, in vocabulary order.
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(Label::as_str).collect()
    }

    /// Keep raw names that resolve to a label in `allowed`. Returns the set and the rejected names.
    pub fn from_names<I, S>(names: I, allowed: &[Label]) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = LabelSet::new();
        let mut rejected = Vec::new();
        for name in names {
            let name = name.as_ref();
            match name.parse::<Label>() {
                Ok(label) if allowed.contains(&label) => {
                    set.insert(label);
                }
                _ => rejected.push(name.to_string()),
            }
        }
        (set, rejected)
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}
