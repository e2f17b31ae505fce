//! Data structures shared by the registry, the deploy path and the HTTP
//! layer.
//!
//! A peer record is one file in the peers directory, named after the
//! node's hostname.  The file format is the one fastd reads from its
//! peer directory, with an extra comment line that carries the
//! per-record challenge used for renames.

use serde::Deserialize;

/// One of the two lines of history in the registry checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    /// Where new and changed registrations are committed.
    Review,
    /// What the live fastd daemon reads.
    Production,
}

/// A single registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub hostname: String,
    /// Lowercase hex, 64 characters.
    pub key: String,
    /// Random text a node signs to prove it owns `key` when renaming.
    /// Records written by older deployments have none.
    pub challenge: Option<String>,
}

const CHALLENGE_PREFIX: &str = "# Challenge: ";

impl PeerRecord {
    /// Creates a record with a fresh random challenge.
    pub fn new(hostname: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            key: key.into(),
            challenge: Some(uuid::Uuid::new_v4().simple().to_string()),
        }
    }

    /// Renders the record in fastd peer-file syntax.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(challenge) = &self.challenge {
            out.push_str(CHALLENGE_PREFIX);
            out.push_str(challenge);
            out.push('\n');
        }
        out.push_str(&format!("key \"{}\";\n", self.key));
        out
    }

    /// Parses a peer file.  Returns `None` when no `key "...";` line exists.
    pub fn parse(hostname: impl Into<String>, contents: &str) -> Option<Self> {
        let mut key = None;
        let mut challenge = None;
        for line in contents.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix(CHALLENGE_PREFIX) {
                challenge = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("key ") {
                key = rest
                    .trim()
                    .strip_suffix(';')
                    .map(|v| v.trim().trim_matches('"').to_string());
            }
        }
        Some(Self {
            hostname: hostname.into(),
            key: key?,
            challenge,
        })
    }
}

/// The part of a CI notification the deploy gate looks at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployPayload {
    /// Build result, e.g. `passed` or `failed`.
    #[serde(default)]
    pub state: Option<String>,
}

/// Result of a successful add or rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Final hostname, possibly with a collision suffix.
    pub hostname: String,
    pub key: String,
    /// Set when the key was moved over from another hostname.
    pub renamed_from: Option<String>,
}

impl Registration {
    /// Commit message recorded in the registry history.
    pub fn commit_message(&self) -> String {
        match &self.renamed_from {
            Some(old) => format!("Changed {} to {}", old, self.hostname),
            None => format!("Added {}", self.hostname),
        }
    }
}

/// What `promote` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// The CI run did not succeed; nothing was touched.
    Skipped { state: String },
    /// Review line merged into production and the daemon reloaded.
    Deployed,
}
