mod config;
mod error;
mod models;
mod oauth;
mod poller;
mod responder;
#[cfg(test)]
mod stub;
mod youtube;

use std::io;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::oauth::CredentialStore;
use crate::poller::{print_messages, CursorPolicy, FailureBudget, Poller};
use crate::responder::{Responder, TranscriptBuffer};
use crate::youtube::YouTubeClient;

const DEFAULT_URL: &str = "https://www.youtube.com/watch?v=cE4nBa0xjgc";

#[derive(Parser, Debug)]
#[command(name = "ytchatbot", version, about = "Watch a YouTube live chat and reply to it")]
struct Cli {
    /// Seconds to wait between chat fetches (overrides YTCHATBOT_POLL_INTERVAL_SECS)
    #[arg(long, global = true)]
    interval: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print chat messages as they arrive
    Watch {
        #[arg(default_value = DEFAULT_URL)]
        url: String,
        /// Stop once a page comes back without a continuation token
        #[arg(long)]
        stop_at_end: bool,
    },
    /// Read the chat, ask the language model for a reply and post it
    Reply {
        #[arg(default_value = DEFAULT_URL)]
        url: String,
        /// Number of chat pages to read before replying
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Print the reply instead of posting it
        #[arg(long)]
        dry_run: bool,
    },
    /// Authorize posting to live chats and cache the token
    Auth,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenv::dotenv();

    // Initialize the logger with timestamps
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();

    if let Err(e) = dotenv {
        debug!("No .env file loaded: {}", e);
    }
    let cli = Cli::parse();

    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, exiting normally...");
        std::process::exit(0);
    })
    .context("failed to set Ctrl+C handler")?;

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(secs) = cli.interval {
        config.poll_interval = Duration::from_secs(secs);
    }

    match cli.command {
        Command::Watch { url, stop_at_end } => {
            let policy = if stop_at_end {
                CursorPolicy::Terminate
            } else {
                CursorPolicy::Restart
            };
            watch(&config, &url, policy).await
        }
        Command::Reply {
            url,
            pages,
            dry_run,
        } => reply(&config, &url, pages, dry_run).await,
        Command::Auth => {
            let store = CredentialStore::from_config(&config);
            let credential = oauth::load_or_authorize(&store, &config)
                .await
                .context("authorization failed")?;
            info!("Authorized, token valid until {}", credential.expiry);
            Ok(())
        }
    }
}

async fn watch(config: &Config, url: &str, policy: CursorPolicy) -> anyhow::Result<()> {
    let youtube = YouTubeClient::new(config)?;
    let chat_id = youtube
        .resolve(url)
        .await
        .with_context(|| format!("could not resolve live chat for {}", url))?;

    let mut poller = Poller::new(&youtube, chat_id, config.poll_interval, policy);
    info!("Watching live chat {}", poller.chat_id());
    let mut budget = FailureBudget::new(config.max_consecutive_failures);
    let stdout = io::stdout();
    loop {
        match poller.next_page().await {
            Ok(Some(messages)) => {
                budget.reset();
                print_messages(&mut stdout.lock(), &messages)?;
            }
            Ok(None) => {
                info!("Live chat has no further pages");
                return Ok(());
            }
            Err(e) if budget.absorb(&e) => {
                warn!(
                    "Fetch failed at cursor {:?} ({} of {} allowed): {}",
                    poller.cursor(),
                    budget.used(),
                    budget.limit(),
                    e
                );
            }
            Err(e) => {
                error!("Giving up on live chat {}: {}", poller.chat_id(), e);
                return Err(e.into());
            }
        }
    }
}

async fn reply(config: &Config, url: &str, pages: u32, dry_run: bool) -> anyhow::Result<()> {
    let youtube = YouTubeClient::new(config)?;
    let responder = Responder::new(config)?;

    // Ask for consent before spending a completion on a reply we could not post.
    let store = CredentialStore::from_config(config);
    let mut credential = if dry_run {
        None
    } else {
        Some(
            oauth::load_or_authorize(&store, config)
                .await
                .context("authorization failed")?,
        )
    };

    let chat_id = youtube
        .resolve(url)
        .await
        .with_context(|| format!("could not resolve live chat for {}", url))?;

    let mut transcript = TranscriptBuffer::new(config.max_transcript);
    let mut poller = Poller::new(&youtube, chat_id.clone(), config.poll_interval, CursorPolicy::Terminate);
    for _ in 0..pages.max(1) {
        match poller.next_page().await? {
            Some(messages) => transcript.extend(messages),
            None => break,
        }
    }
    if transcript.is_empty() {
        info!("Chat is quiet, replying without history");
    } else {
        info!("Collected {} chat messages", transcript.len());
    }

    let text = responder.respond(&transcript.render()).await?;
    let Some(credential) = credential.as_mut() else {
        println!("{}", text);
        return Ok(());
    };

    oauth::ensure_fresh(&store, credential).await?;
    match youtube.publish(&chat_id, &text, credential.auth()).await {
        Ok(_) => {
            println!("{}", text);
            Ok(())
        }
        Err(Error::Publish(api)) if api.is_unauthorized() => Err(anyhow::anyhow!(
            "YouTube rejected the cached credential ({}); run `ytchatbot auth` again",
            api
        )),
        Err(e) => Err(e).context("could not post reply"),
    }
}
