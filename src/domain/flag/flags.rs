use serde::Serialize;
use std::{collections::HashSet, fmt, ops};

use crate::Flag;

/// Represents the list of flags.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Flags(pub HashSet<Flag>);

impl Flags {
    /// Clones the flags that can be given back to the server when
    /// appending a copy of an email.
    pub fn clone_for_append(&self) -> Self {
        Self::from_iter(self.iter().filter(|f| !f.is_session_only()).cloned())
    }

    /// Builds the IMAP flag list query, for example `\Seen \Flagged`.
    pub fn to_imap_query(&self) -> String {
        let mut flags: Vec<&Flag> = self.iter().collect();
        flags.sort();
        flags
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_imap_query())
    }
}

impl ops::Deref for Flags {
    type Target = HashSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<&str> for Flags {
    fn from(flags: &str) -> Self {
        Flags(
            flags
                .split_whitespace()
                .map(|flag| flag.trim().into())
                .collect(),
        )
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        let mut flags = Flags::default();
        flags.extend(iter);
        flags
    }
}
