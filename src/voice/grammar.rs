//! Closed command vocabulary
//!
//! A grammar is a flat list of entries. Each entry names a category and
//! optionally a subcategory and target, which together describe the phrase
//! sequence a speaker walks through after the wake word. Entries in the
//! global category (`*`) are offered at every stage.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Category marking entries that are available at every stage
pub const GLOBAL_CATEGORY: &str = "*";

/// Lowercase and collapse whitespace so recognizer output and grammar
/// phrases compare equal
#[must_use]
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// One voice-reachable command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarEntry {
    /// Command text to dispatch; defaults to the spoken phrase sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    pub category: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl GrammarEntry {
    #[must_use]
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            command: None,
            category: category.into(),
            subcategory: None,
            target: None,
        }
    }

    /// A phrase accepted at every stage
    #[must_use]
    pub fn global(phrase: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(GLOBAL_CATEGORY)
            .with_target(phrase)
            .with_command(command)
    }

    #[must_use]
    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Parse the slash form `category[/subcategory][/target]`
    ///
    /// # Errors
    ///
    /// Returns `Error::Grammar` if the form has an empty or extra part
    pub fn from_spoken(spoken: &str) -> Result<Self> {
        let parts: Vec<&str> = spoken.split('/').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Grammar(format!("empty phrase in '{spoken}'")));
        }
        let entry = match parts.as_slice() {
            [category] => Self::new(*category),
            [category, target] => Self::new(*category).with_target(*target),
            [category, subcategory, target] => Self::new(*category)
                .with_subcategory(*subcategory)
                .with_target(*target),
            _ => {
                return Err(Error::Grammar(format!(
                    "'{spoken}' has more than three phrases"
                )));
            }
        };
        Ok(entry)
    }

    /// Slash form of the phrase sequence, e.g. `lights/kitchen/on`
    #[must_use]
    pub fn spoken(&self) -> String {
        [
            Some(self.category.as_str()),
            self.subcategory.as_deref(),
            self.target.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("/")
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.category == GLOBAL_CATEGORY
    }

    /// Command text dispatched when this entry is spoken
    ///
    /// Explicit commands win; otherwise the category, subcategory and
    /// target phrases are joined with spaces.
    #[must_use]
    pub fn command_string(&self) -> String {
        if let Some(command) = self.command.as_deref().filter(|c| !c.trim().is_empty()) {
            return command.trim().to_string();
        }
        if self.is_global() {
            return self.target.clone().unwrap_or_default();
        }
        [
            Some(self.category.as_str()),
            self.subcategory.as_deref(),
            self.target.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }

    fn normalized(self) -> Self {
        let norm = |s: String| Some(normalize_phrase(&s)).filter(|p| !p.is_empty());
        Self {
            command: self.command.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            category: if self.category.trim() == GLOBAL_CATEGORY {
                GLOBAL_CATEGORY.to_string()
            } else {
                normalize_phrase(&self.category)
            },
            subcategory: self.subcategory.and_then(norm),
            target: self.target.and_then(norm),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.category.is_empty() {
            return Err(Error::Grammar("entry has an empty category".to_string()));
        }
        if self.is_global() && self.target.is_none() {
            return Err(Error::Grammar("global entry needs a target phrase".to_string()));
        }
        if self.is_global() && self.subcategory.is_some() {
            return Err(Error::Grammar("global entry cannot have a subcategory".to_string()));
        }
        if self.subcategory.is_some() && self.target.is_none() {
            return Err(Error::Grammar(format!(
                "entry '{}' has a subcategory but no target",
                self.category
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GrammarFile {
    #[serde(default)]
    entry: Vec<GrammarEntry>,
}

/// The full vocabulary the recognizer may be asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grammar {
    entries: Vec<GrammarEntry>,
}

impl Grammar {
    /// Build from entries, normalizing phrases
    ///
    /// # Errors
    ///
    /// Returns `Error::Grammar` if an entry is malformed
    pub fn new(entries: impl IntoIterator<Item = GrammarEntry>) -> Result<Self> {
        let entries = entries
            .into_iter()
            .map(GrammarEntry::normalized)
            .map(|e| e.validate().map(|()| e))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Parse a TOML grammar (`[[entry]]` tables)
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML or an entry is malformed
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: GrammarFile = toml::from_str(text)?;
        if file.entry.is_empty() {
            return Err(Error::Grammar("grammar has no entries".to_string()));
        }
        Self::new(file.entry)
    }

    /// Load a TOML grammar file
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ModelLoad(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text).map_err(|e| Error::ModelLoad(format!("{}: {e}", path.display())))
    }

    /// Serialize as `[[entry]]` tables
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_toml_string(&self) -> Result<String> {
        let file = GrammarFile {
            entry: self.entries.clone(),
        };
        Ok(toml::to_string(&file)?)
    }

    /// Write the grammar to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns `Error::Grammar` if the grammar is empty, or an I/O error
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Grammar("refusing to save an empty grammar".to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        tracing::info!(path = %path.display(), entries = self.len(), "grammar saved");
        Ok(())
    }

    /// Append an entry, returning the new entry count
    ///
    /// # Errors
    ///
    /// Returns `Error::Grammar` if the entry is malformed or its phrase
    /// sequence is already taken
    pub fn push(&mut self, entry: GrammarEntry) -> Result<usize> {
        let entry = entry.normalized();
        entry.validate()?;
        let spoken = entry.spoken();
        if self.entries.iter().any(|e| e.spoken() == spoken) {
            return Err(Error::Grammar(format!("'{spoken}' already exists")));
        }
        self.entries.push(entry);
        Ok(self.entries.len())
    }

    /// Remove the entry at `index` (0-based)
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `index` is out of range
    pub fn remove(&mut self, index: usize) -> Result<GrammarEntry> {
        if index >= self.entries.len() {
            return Err(Error::InvalidArgument(format!(
                "no entry {}; grammar has {}",
                index + 1,
                self.entries.len()
            )));
        }
        Ok(self.entries.remove(index))
    }

    /// Remove the entry spoken as `spoken` (slash form)
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if no entry matches
    pub fn remove_spoken(&mut self, spoken: &str) -> Result<GrammarEntry> {
        let wanted = GrammarEntry::from_spoken(spoken)?.normalized().spoken();
        let index = self
            .entries
            .iter()
            .position(|e| e.spoken() == wanted)
            .ok_or_else(|| Error::InvalidArgument(format!("no entry '{wanted}'")))?;
        Ok(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn entries(&self) -> &[GrammarEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Global entries, in declaration order
    pub fn globals(&self) -> impl Iterator<Item = &GrammarEntry> {
        self.entries.iter().filter(|e| e.is_global())
    }

    /// Global entry whose phrase is `phrase`
    #[must_use]
    pub fn global(&self, phrase: &str) -> Option<&GrammarEntry> {
        let phrase = normalize_phrase(phrase);
        self.globals().find(|e| e.target.as_deref() == Some(phrase.as_str()))
    }

    /// Distinct categories, in declaration order
    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        dedup(self.entries.iter().filter(|e| !e.is_global()).map(|e| e.category.as_str()))
    }

    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        let category = normalize_phrase(category);
        self.categories().contains(&category.as_str())
    }

    /// Distinct subcategories under `category`
    #[must_use]
    pub fn subcategories(&self, category: &str) -> Vec<&str> {
        dedup(
            self.in_category(normalize_phrase(category))
                .filter_map(|e| e.subcategory.as_deref()),
        )
    }

    #[must_use]
    pub fn has_subcategories(&self, category: &str) -> bool {
        !self.subcategories(category).is_empty()
    }

    /// Targets under `category`, or under `category` + `subcategory`
    #[must_use]
    pub fn targets(&self, category: &str, subcategory: Option<&str>) -> Vec<&str> {
        let subcategory = subcategory.map(normalize_phrase);
        dedup(
            self.in_category(normalize_phrase(category))
                .filter(|e| e.subcategory == subcategory)
                .filter_map(|e| e.target.as_deref()),
        )
    }

    #[must_use]
    pub fn has_direct_targets(&self, category: &str) -> bool {
        !self.targets(category, None).is_empty()
    }

    /// Entry spoken as a bare category, with no further stages
    #[must_use]
    pub fn single_stage(&self, category: &str) -> Option<&GrammarEntry> {
        self.in_category(normalize_phrase(category))
            .find(|e| e.subcategory.is_none() && e.target.is_none())
    }

    /// Entry matching a full phrase sequence
    #[must_use]
    pub fn resolve(
        &self,
        category: &str,
        subcategory: Option<&str>,
        target: &str,
    ) -> Option<&GrammarEntry> {
        let subcategory = subcategory.map(normalize_phrase);
        let target = normalize_phrase(target);
        self.in_category(normalize_phrase(category)).find(|e| {
            e.subcategory == subcategory && e.target.as_deref() == Some(target.as_str())
        })
    }

    /// Phrases of all global entries
    #[must_use]
    pub fn global_phrases(&self) -> Vec<&str> {
        dedup(self.globals().filter_map(|e| e.target.as_deref()))
    }

    fn in_category(&self, category: String) -> impl Iterator<Item = &GrammarEntry> {
        self.entries
            .iter()
            .filter(move |e| !e.is_global() && e.category == category)
    }
}

fn dedup<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Grammar {
        Grammar::new([
            GrammarEntry::new("Lights").with_subcategory("Kitchen").with_target("On"),
            GrammarEntry::new("lights").with_subcategory("kitchen").with_target("off"),
            GrammarEntry::new("lights").with_subcategory("porch").with_target("on"),
            GrammarEntry::new("battery").with_target("status").with_command("power status"),
            GrammarEntry::new("reboot").with_command("system reboot"),
            GrammarEntry::global("cancel", "voice cancel"),
            GrammarEntry::global("help", "voice help"),
        ])
        .unwrap()
    }

    #[test]
    fn normalizes_phrases() {
        assert_eq!(normalize_phrase("  Turn   ON "), "turn on");
        assert_eq!(home().entries()[0].category, "lights");
    }

    #[test]
    fn stage_queries() {
        let g = home();
        assert_eq!(g.categories(), vec!["lights", "battery", "reboot"]);
        assert_eq!(g.subcategories("LIGHTS"), vec!["kitchen", "porch"]);
        assert_eq!(g.targets("lights", Some("kitchen")), vec!["on", "off"]);
        assert!(g.targets("lights", None).is_empty());
        assert!(g.has_direct_targets("battery"));
        assert!(!g.has_subcategories("battery"));
        assert!(g.single_stage("reboot").is_some());
        assert!(g.single_stage("lights").is_none());
        assert_eq!(g.global_phrases(), vec!["cancel", "help"]);
    }

    #[test]
    fn command_strings() {
        let g = home();
        let kitchen_on = g.resolve("lights", Some("kitchen"), "on").unwrap();
        assert_eq!(kitchen_on.command_string(), "lights kitchen on");
        let battery = g.resolve("battery", None, "status").unwrap();
        assert_eq!(battery.command_string(), "power status");
        assert_eq!(g.global("Cancel").unwrap().command_string(), "voice cancel");
        assert!(g.resolve("lights", None, "on").is_none());
    }

    #[test]
    fn parses_toml() {
        let g = Grammar::from_toml_str(
            r#"
            [[entry]]
            category = "fan"
            target = "on"

            [[entry]]
            category = "*"
            target = "nevermind"
            command = "voice cancel"
            "#,
        )
        .unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.categories(), vec!["fan"]);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(Grammar::from_toml_str("").is_err());
        assert!(Grammar::from_toml_str("[[entry]]\ncategory = \" \"\n").is_err());
        assert!(
            Grammar::from_toml_str("[[entry]]\ncategory = \"a\"\nsubcategory = \"b\"\n").is_err()
        );
        assert!(Grammar::from_toml_str("[[entry]]\ncategory = \"*\"\n").is_err());
    }

    #[test]
    fn missing_file_is_load_failure() {
        let err = Grammar::from_file(Path::new("/nonexistent/grammar.toml")).unwrap_err();
        assert_eq!(err.outcome(), crate::Outcome::LoadFailed);
    }

    #[test]
    fn spoken_form_round_trips() {
        let entry = GrammarEntry::from_spoken("Lights / Kitchen / On").unwrap().normalized();
        assert_eq!(entry.spoken(), "lights/kitchen/on");
        assert_eq!(GrammarEntry::from_spoken("reboot").unwrap().spoken(), "reboot");
        assert_eq!(GrammarEntry::global("cancel", "voice cancel").spoken(), "*/cancel");
        assert!(GrammarEntry::from_spoken("a//b").is_err());
        assert!(GrammarEntry::from_spoken("a/b/c/d").is_err());
    }

    #[test]
    fn push_rejects_duplicates_and_malformed() {
        let mut g = home();
        let before = g.len();
        assert_eq!(g.push(GrammarEntry::new("Fan").with_target("On")).unwrap(), before + 1);
        assert_eq!(g.targets("fan", None), vec!["on"]);

        let dup = GrammarEntry::new("lights").with_subcategory("kitchen").with_target("on");
        assert!(matches!(g.push(dup), Err(Error::Grammar(_))));
        assert!(g.push(GrammarEntry::new("*")).is_err());
        assert_eq!(g.len(), before + 1);
    }

    #[test]
    fn remove_by_index_and_phrase() {
        let mut g = home();
        let removed = g.remove(0).unwrap();
        assert_eq!(removed.spoken(), "lights/kitchen/on");
        assert!(g.remove(99).is_err());

        assert_eq!(g.remove_spoken("Battery/Status").unwrap().command_string(), "power status");
        assert!(g.remove_spoken("battery/status").is_err());

        g.clear();
        assert!(g.is_empty());
    }

    #[test]
    fn saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grammar.toml");
        let g = home();
        g.save(&path).unwrap();
        assert_eq!(Grammar::from_file(&path).unwrap(), g);

        assert!(Grammar::default().save(&dir.path().join("empty.toml")).is_err());
    }
}
