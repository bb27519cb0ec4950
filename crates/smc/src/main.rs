use std::sync::Arc;

use clap::{Parser, Subcommand};
use smc_core::{
    config::{load_settings, EnvSettings, RuntimeConfig},
    domain::{Group, GroupId, Member, MemberId},
    throttle::{rate_limited_http, MemoryRateLimitStore, RateLimitStore},
    MiraiDriver,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "smc", version = env!("CARGO_PKG_VERSION"), about = "Inspect and manage a Mirai bridge")]
struct App {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every member known to the bridge.
    #[command(alias = "ls")]
    Members,
    /// List managed groups.
    Groups,
    /// Show one member with its groups.
    Member { id: String },
    /// List the members of a group.
    GroupMembers { id: String },
    /// Put a member into a group.
    Add { member: String, group: String },
    /// Take a member out of a group.
    #[command(alias = "rm")]
    Remove { member: String, group: String },
    /// Change a member's nickname.
    Rename { member: String, name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    smc_core::logging::init("smc")?;
    let app = App::parse();

    let runtime = RuntimeConfig::load();
    let settings = load_settings(&EnvSettings)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let fetcher = rate_limited_http(&runtime, rate_limit_store(&runtime)?, cancel)?;

    MiraiDriver::scope(settings, fetcher, |driver| async move {
        match app.cmd {
            Commands::Members => print_members(&driver.list_members().await?),
            Commands::Groups => print_groups(&driver.list_groups().await?),
            Commands::Member { id } => {
                let id = MemberId(id);
                let member = driver.get_member(&id).await?;
                let groups = driver.member_groups(&id).await?;
                print_members(std::slice::from_ref(&member));
                print_groups(&groups);
            }
            Commands::GroupMembers { id } => {
                print_members(&driver.group_members(&GroupId(id)).await?)
            }
            Commands::Add { member, group } => {
                driver
                    .add_member_to_group(&MemberId(member), &GroupId(group))
                    .await?
            }
            Commands::Remove { member, group } => {
                driver
                    .remove_member_from_group(&MemberId(member), &GroupId(group))
                    .await?
            }
            Commands::Rename { member, name } => {
                driver.rename_member(&MemberId(member), &name).await?
            }
        }
        Ok(())
    })
    .await?;

    Ok(())
}

fn rate_limit_store(runtime: &RuntimeConfig) -> anyhow::Result<Arc<dyn RateLimitStore>> {
    #[cfg(feature = "redis")]
    if let Some(url) = &runtime.redis_url {
        return Ok(Arc::new(smc_redis::RedisRateLimitStore::new(url)?));
    }

    #[cfg(not(feature = "redis"))]
    if runtime.redis_url.is_some() {
        tracing::warn!("SMC_REDIS_URL is set but smc was built without the redis feature; using in-memory store");
    }

    Ok(Arc::new(MemoryRateLimitStore::new()))
}

fn print_members(members: &[Member]) {
    for m in members {
        println!("{}\t{}\t{}", m.id, m.name, m.unique_id);
    }
}

fn print_groups(groups: &[Group]) {
    for g in groups {
        println!("{}\t{}", g.id, g.name);
    }
}
