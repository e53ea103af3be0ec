//! Command dispatch
//!
//! Every transport (console, HTTP, voice) funnels text commands through
//! [`CommandFacade::execute`] with an [`AuthContext`]. The [`Dispatcher`]
//! applies the same authorization rules to all of them, then resolves the
//! longest registered command name that prefixes the text and hands the
//! remainder to its handler as arguments.

mod mic;
mod sr;
#[cfg(test)]
mod testing;
mod voice;

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::device::Device;
use crate::security::{AuthContext, Transport, UserDirectory};
use crate::voice::{Grammar, GrammarEntry};
use crate::{Error, Result};

/// Executes text commands on behalf of an authenticated caller
pub trait CommandFacade: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the caller is not authorized, the command is
    /// unknown, or the handler fails
    fn execute(&self, ctx: &AuthContext, text: &str) -> Result<String>;
}

/// A resolved invocation passed to a handler
#[derive(Debug)]
pub struct CommandCall<'a> {
    pub ctx: &'a AuthContext,
    /// Registered command name
    pub name: &'a str,
    /// Text after the command name, trimmed
    pub args: &'a str,
    /// Full command text as received
    pub line: &'a str,
}

impl CommandCall<'_> {
    /// Whitespace-separated arguments
    #[must_use]
    pub fn words(&self) -> Vec<&str> {
        self.args.split_whitespace().collect()
    }
}

pub type Handler = Arc<dyn Fn(&CommandCall<'_>) -> Result<String> + Send + Sync>;

/// A registered command
#[derive(Clone)]
pub struct CommandEntry {
    name: String,
    help: String,
    usage: Option<String>,
    admin: bool,
    voice: Vec<GrammarEntry>,
    handler: Handler,
}

impl CommandEntry {
    pub fn new(
        name: &str,
        help: impl Into<String>,
        handler: impl Fn(&CommandCall<'_>) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: normalize_name(name),
            help: help.into(),
            usage: None,
            admin: false,
            voice: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// Restrict to admin users
    #[must_use]
    pub const fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    #[must_use]
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    /// Make the command reachable by voice through a phrase sequence
    ///
    /// The spoken sequence dispatches this command's name with no arguments.
    #[must_use]
    pub fn voice(mut self, category: &str, subcategory: Option<&str>, target: Option<&str>) -> Self {
        let mut entry = GrammarEntry::new(category).with_command(self.name.clone());
        if let Some(subcategory) = subcategory {
            entry = entry.with_subcategory(subcategory);
        }
        if let Some(target) = target {
            entry = entry.with_target(target);
        }
        self.voice.push(entry);
        self
    }

    /// Make the command reachable by voice at every stage
    #[must_use]
    pub fn voice_global(mut self, phrase: &str) -> Self {
        self.voice.push(GrammarEntry::global(phrase, self.name.clone()));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.admin
    }

    #[must_use]
    pub fn voice_entries(&self) -> &[GrammarEntry] {
        &self.voice
    }

    fn word_count(&self) -> usize {
        self.name.split(' ').count()
    }
}

impl std::fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("admin", &self.admin)
            .field("voice", &self.voice.len())
            .finish_non_exhaustive()
    }
}

/// Named commands and their voice annotations
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<CommandEntry>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command, replacing any existing one with the same name
    pub fn register(&mut self, entry: CommandEntry) {
        if let Some(existing) = self.commands.iter_mut().find(|c| c.name == entry.name) {
            tracing::debug!(command = %entry.name, "replacing command");
            *existing = entry;
        } else {
            self.commands.push(entry);
        }
    }

    /// Longest command whose name prefixes `text`, with the remaining text
    #[must_use]
    pub fn resolve<'a>(&self, text: &'a str) -> Option<(&CommandEntry, &'a str)> {
        let words: Vec<&str> = text.split_whitespace().collect();
        self.commands
            .iter()
            .filter(|c| {
                let n = c.word_count();
                words.len() >= n
                    && c.name
                        .split(' ')
                        .zip(&words)
                        .all(|(a, b)| a.eq_ignore_ascii_case(b))
            })
            .max_by_key(|c| c.word_count())
            .map(|c| (c, skip_words(text, c.word_count())))
    }

    /// Grammar derived from all voice annotations
    ///
    /// # Errors
    ///
    /// Returns `Error::Grammar` if an annotation is malformed
    pub fn grammar(&self) -> Result<Grammar> {
        Grammar::new(
            self.commands
                .iter()
                .flat_map(|c| c.voice.iter().cloned()),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry> {
        self.commands.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Authorization-checked command execution
pub struct Dispatcher {
    registry: RwLock<CommandRegistry>,
    users: Arc<UserDirectory>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: CommandRegistry, users: Arc<UserDirectory>) -> Self {
        Self {
            registry: RwLock::new(registry),
            users,
        }
    }

    pub fn register(&self, entry: CommandEntry) {
        self.registry.write().register(entry);
    }

    /// Grammar derived from the registered commands
    ///
    /// # Errors
    ///
    /// Returns `Error::Grammar` if an annotation is malformed
    pub fn grammar(&self) -> Result<Grammar> {
        self.registry.read().grammar()
    }

    #[must_use]
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// One line per command
    #[must_use]
    pub fn help_text(&self) -> String {
        let registry = self.registry.read();
        let mut lines: Vec<String> = registry
            .iter()
            .map(|c| {
                let admin = if c.admin { " (admin)" } else { "" };
                let synopsis = c.usage.as_deref().unwrap_or(&c.name);
                format!("{synopsis:<28} {}{admin}", c.help)
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }

    fn is_privileged(&self, ctx: &AuthContext) -> bool {
        ctx.transport == Transport::Internal || self.users.is_admin(&ctx.user)
    }
}

impl CommandFacade for Dispatcher {
    fn execute(&self, ctx: &AuthContext, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidArgument("Empty command".to_string()));
        }
        if ctx.transport != Transport::Internal && !ctx.has_user() {
            tracing::warn!(transport = %ctx.transport, origin = %ctx.origin, "unauthenticated command");
            return Err(Error::Unauthorized("Authentication required".to_string()));
        }

        let (handler, name, admin, args) = {
            let registry = self.registry.read();
            let Some((entry, args)) = registry.resolve(text) else {
                let first = text.split_whitespace().next().unwrap_or(text);
                return Err(Error::UnknownCommand(first.to_string()));
            };
            (Arc::clone(&entry.handler), entry.name.clone(), entry.admin, args)
        };

        if admin && !self.is_privileged(ctx) {
            tracing::warn!(
                transport = %ctx.transport,
                user = %ctx.user,
                command = %name,
                "admin command refused"
            );
            return Err(Error::Unauthorized(format!(
                "Admin access required for command '{name}'. Contact an administrator."
            )));
        }

        tracing::debug!(transport = %ctx.transport, user = %ctx.user, command = %name, "dispatching");
        handler(&CommandCall {
            ctx,
            name: &name,
            args,
            line: text,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.registry.read().len())
            .field("users", &self.users.len())
            .finish()
    }
}

/// Register the voice, recognition and microphone commands
pub fn register_device_commands(dispatcher: &Dispatcher, device: &Weak<Device>) {
    sr::register(dispatcher, device);
    voice::register(dispatcher, device);
    mic::register(dispatcher, device);
}

/// Upgrade a handler's device reference
fn device(weak: &Weak<Device>) -> Result<Arc<Device>> {
    weak.upgrade()
        .ok_or_else(|| Error::InvalidState("device is shutting down".to_string()))
}

/// Handler that runs `f` against the live device
fn bind(
    device: &Weak<Device>,
    f: fn(&Device, &CommandCall<'_>) -> Result<String>,
) -> impl Fn(&CommandCall<'_>) -> Result<String> + Send + Sync + 'static {
    let device = device.clone();
    move |call: &CommandCall<'_>| {
        let live: Arc<Device> = self::device(&device)?;
        f(&live, call)
    }
}

/// Parse `on`/`off` style switches
fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "enable" | "enabled" => Some(true),
        "off" | "0" | "false" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn skip_words(text: &str, n: usize) -> &str {
    let mut rest = text.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest.trim_end()
}
