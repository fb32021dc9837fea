use std::{io::Write, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::{format_description::well_known::Rfc3339, macros::format_description};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, instrument, warn};

use crate::{
    config::AppConfig,
    error::{ErrorCategory, LinkError},
    identity::{IdentityError, OwnerIdentityService, Session},
    link_service::LinkLifecycleService,
    sweeper::CleanupSweeper,
};

/// One line typed at the prompt.
#[derive(Debug, Parser)]
#[command(no_binary_name = true, help_template = "Commands:\n{subcommands}")]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show your owner UUID
    Whoami,
    /// Show the current owner, or switch to another one
    User {
        #[command(subcommand)]
        action: Option<UserAction>,
    },
    /// Start over as a brand-new owner (same as `user new`)
    Logout,
    /// Create a short link
    Create {
        url: String,
        #[arg(allow_negative_numbers = true)]
        max_clicks: Option<i64>,
    },
    /// Open the original URL, counting a click
    Open {
        /// Bare code or full short URL
        target: String,
    },
    /// List your links
    List,
    /// Delete one of your links
    Delete {
        /// Bare code or full short URL
        target: String,
    },
    /// Change the click limit of one of your links
    SetLimit {
        /// Bare code or full short URL
        target: String,
        #[arg(allow_negative_numbers = true)]
        new_limit: i64,
    },
    /// Remove expired links now
    Sweep,
    /// Leave
    #[command(alias = "quit")]
    Exit,
}

#[derive(Debug, Subcommand)]
enum UserAction {
    /// Create a new owner and switch to it
    New,
    /// Switch to an existing owner UUID
    Use { uuid: String },
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Hands a URL to whatever opens URLs on this machine.
#[cfg_attr(test, mockall::automock)]
pub trait UrlOpener: Send + Sync {
    /// # Errors
    /// Will return [`Err`] if no opener could be launched.
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUrlOpener;

impl UrlOpener for SystemUrlOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        open::that(url).with_context(|| format!("Failed to launch a browser for {url}"))
    }
}

pub struct CommandLoop<W> {
    base_url: String,
    ttl_seconds: u64,
    default_max_clicks: u32,
    open_browser: bool,
    links: Arc<dyn LinkLifecycleService>,
    identities: Arc<OwnerIdentityService>,
    sweeper: Arc<CleanupSweeper>,
    opener: Arc<dyn UrlOpener>,
    session: Session,
    out: W,
}

impl<W: Write> CommandLoop<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AppConfig,
        links: Arc<dyn LinkLifecycleService>,
        identities: Arc<OwnerIdentityService>,
        sweeper: Arc<CleanupSweeper>,
        opener: Arc<dyn UrlOpener>,
        session: Session,
        out: W,
    ) -> Self {
        Self {
            base_url: config.base_url.clone(),
            ttl_seconds: config.ttl_seconds,
            default_max_clicks: config.default_max_clicks,
            open_browser: config.open_browser,
            links,
            identities,
            sweeper,
            opener,
            session,
            out,
        }
    }

    #[must_use]
    pub const fn session(&self) -> Session {
        self.session
    }

    /// Reads commands until `exit` or end of input.
    ///
    /// Command failures are reported on the output and never end the loop.
    ///
    /// # Errors
    /// Will return [`Err`] if reading input or writing output fails.
    pub async fn run(&mut self, input: impl AsyncBufRead + Unpin) -> anyhow::Result<()> {
        writeln!(self.out, "URL shortener")?;
        writeln!(self.out, "Your UUID: {}", self.session.owner())?;
        writeln!(
            self.out,
            "TTL (s): {}, default max clicks: {}",
            self.ttl_seconds, self.default_max_clicks
        )?;
        writeln!(self.out, "Type a command; `help` lists them.\n")?;

        let mut lines = input.lines();
        loop {
            self.sweeper.sweep_expired();

            write!(self.out, "> ")?;
            self.out.flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match self.handle_line(line).await {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(err) => self.report(&err)?,
            }
        }

        writeln!(self.out, "Bye!")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn handle_line(&mut self, line: &str) -> anyhow::Result<Flow> {
        let mut words = line.split_whitespace().map(str::to_owned).collect::<Vec<_>>();
        if let Some(first) = words.first_mut() {
            *first = first.to_lowercase();
        }
        if words.first().is_some_and(|first| first == "user") {
            if let Some(action) = words.get_mut(1) {
                *action = action.to_lowercase();
            }
        }

        let command = match CommandLine::try_parse_from(words) {
            Ok(CommandLine { command }) => command,
            Err(err) => {
                write!(self.out, "{}", err.render())?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            Command::Exit => return Ok(Flow::Exit),
            Command::Whoami => writeln!(self.out, "UUID: {}", self.session.owner())?,
            Command::User { action: None } => {
                writeln!(self.out, "Current UUID: {}", self.session.owner())?;
                writeln!(self.out, "Subcommands: user new | user use <uuid>")?;
            }
            Command::User {
                action: Some(UserAction::New),
            }
            | Command::Logout => {
                self.session = self
                    .identities
                    .create_new_and_switch()
                    .await
                    .map_err(identity_error)?;
                writeln!(self.out, "OK: new user. UUID = {}", self.session.owner())?;
            }
            Command::User {
                action: Some(UserAction::Use { uuid }),
            } => {
                self.session = self
                    .identities
                    .switch_to(&uuid)
                    .await
                    .map_err(identity_error)?;
                writeln!(self.out, "OK: switched. UUID = {}", self.session.owner())?;
            }
            Command::Create { url, max_clicks } => {
                let link = self.links.create(self.session.owner(), &url, max_clicks)?;
                writeln!(self.out, "OK: {}", link.code().url(&self.base_url))?;
                writeln!(
                    self.out,
                    "code={} maxClicks={} expiresAt={}",
                    link.code(),
                    link.max_clicks(),
                    link.expires_at().format(&Rfc3339)?
                )?;
            }
            Command::Open { target } => {
                let url = self.links.resolve_for_redirect(normalize_code(&target))?;
                writeln!(self.out, "Opening: {url}")?;
                if self.open_browser {
                    if let Err(err) = self.opener.open(&url) {
                        warn!(?err, "Failed to open browser");
                        writeln!(self.out, "Could not launch a browser. Link: {url}")?;
                    }
                }
            }
            Command::List => self.list()?,
            Command::Delete { target } => {
                let code = normalize_code(&target);
                self.links.delete(self.session.owner(), code)?;
                writeln!(self.out, "OK: deleted {code}")?;
            }
            Command::SetLimit { target, new_limit } => {
                let updated =
                    self.links
                        .update_max_clicks(self.session.owner(), normalize_code(&target), new_limit)?;
                writeln!(
                    self.out,
                    "OK: {} maxClicks={}",
                    updated.code(),
                    updated.max_clicks()
                )?;
            }
            Command::Sweep => {
                let removed = self.sweeper.sweep_expired();
                writeln!(self.out, "OK: removed {removed} expired link(s)")?;
            }
        }
        Ok(Flow::Continue)
    }

    fn list(&mut self) -> anyhow::Result<()> {
        let mut links = self.links.list_by_owner(self.session.owner());
        if links.is_empty() {
            writeln!(self.out, "(empty)")?;
            return Ok(());
        }

        links.sort_by_key(|link| (link.created_at(), link.code().as_str().to_owned()));
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        for link in links {
            writeln!(
                self.out,
                "{} | {} | clicks {}/{} | exp {} UTC | {}",
                link.code(),
                if link.is_limit_reached() { "LIMIT" } else { "OK" },
                link.clicks_used(),
                link.max_clicks(),
                link.expires_at().format(format)?,
                link.original_url()
            )?;
        }
        Ok(())
    }

    fn report(&mut self, err: &anyhow::Error) -> std::io::Result<()> {
        let Some(link_err) = err.downcast_ref::<LinkError>() else {
            error!(?err, "Unexpected error while handling a command");
            return writeln!(self.out, "Unexpected error: {err:#}");
        };

        let prefix = match link_err.kind().category() {
            ErrorCategory::Validation => "Error",
            ErrorCategory::Access => "Access denied",
            ErrorCategory::NotFound => "Not found",
            ErrorCategory::Unavailable => "Unavailable",
            ErrorCategory::Internal => {
                error!(?err, "Internal error while handling a command");
                "Unexpected error"
            }
        };
        writeln!(self.out, "{prefix}: {}", link_err.detail())
    }
}

fn identity_error(err: IdentityError) -> anyhow::Error {
    match err {
        IdentityError::Invalid(inner) => inner.into(),
        IdentityError::Internal(inner) => inner,
    }
}

/// Strips everything up to the last `/` so full short URLs work wherever a code does.
fn normalize_code(input: &str) -> &str {
    let input = input.trim();
    match input.rsplit_once('/') {
        Some((_, code)) if !code.is_empty() => code,
        _ => input,
    }
}
