use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use pv_sdk::{
    DataManager, KeyTriple, LocalNetwork, PeerVaultConfig, ProtectionKeys, PutVerdict, VersionKey,
};
use pv_store::{now_ms, ReplicaStore};

use crate::cli::{Cli, Command, HistoryArgs, KeyArgs, OutputFormat, PutArgs, RaceArgs};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = PeerVaultConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    debug!(replicas = config.replicas, path = %cli.config.display(), "configuration loaded");

    match cli.command {
        Command::Put(args) => cmd_put(&config, args, cli.format).await,
        Command::History(args) => cmd_history(&config, args, cli.format).await,
        Command::Race(args) => cmd_race(&config, args, cli.format).await,
        Command::Config => cmd_config(&config, cli.format),
    }
}

/// A fresh in-process network plus a manager over it.
fn connect(config: &PeerVaultConfig) -> anyhow::Result<(LocalNetwork, DataManager)> {
    let network = LocalNetwork::from_config(config)?;
    let coordinator = network.coordinator(config.coordinator.clone())?;
    Ok((network, DataManager::new(Arc::new(coordinator))))
}

fn triple_of(args: &KeyArgs) -> KeyTriple {
    KeyTriple::from_names(&args.location, &args.domain, &args.content)
}

fn verdict_json(verdict: &PutVerdict) -> serde_json::Value {
    match verdict {
        PutVerdict::Accepted(receipt) => json!({
            "status": "accepted",
            "version": receipt.key.version.to_hex(),
            "accepted_by": receipt.accepted_by,
            "contacted": receipt.contacted,
            "attempts": receipt.attempts,
            "verified": receipt.verified,
        }),
        PutVerdict::Conflict(fork) => json!({
            "status": "conflict",
            "version": fork.key.version.to_hex(),
            "rival": fork.rival.map(|r| r.to_hex()),
            "lose_votes": fork.lose_votes,
            "voters": fork.voters,
        }),
        PutVerdict::Failed { reason, attempts } => json!({
            "status": "failed",
            "reason": reason,
            "attempts": attempts,
        }),
    }
}

fn print_verdict(label: &str, verdict: &PutVerdict) {
    match verdict {
        PutVerdict::Accepted(receipt) => println!(
            "{} {} {} ({}/{} replicas, attempt {}{})",
            "✓".green().bold(),
            label,
            receipt.key.version.to_string().cyan(),
            receipt.accepted_by,
            receipt.contacted,
            receipt.attempts,
            if receipt.verified { ", verified" } else { "" },
        ),
        PutVerdict::Conflict(fork) => println!(
            "{} {} {} lost to {} ({}/{} votes)",
            "✗".yellow().bold(),
            label,
            fork.key.version.to_string().cyan(),
            fork.rival
                .map(|r| r.to_string())
                .unwrap_or_else(|| "a sibling".into())
                .cyan(),
            fork.lose_votes,
            fork.voters,
        ),
        PutVerdict::Failed { reason, attempts } => println!(
            "{} {} failed after {} attempt(s): {}",
            "✗".red().bold(),
            label,
            attempts,
            reason,
        ),
    }
}

async fn cmd_put(config: &PeerVaultConfig, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (_network, manager) = connect(config)?;
    let keys = ProtectionKeys::generate();
    let triple = triple_of(&args.key);
    let version = if args.unversioned {
        VersionKey::ZERO
    } else {
        VersionKey::now(args.payload.as_bytes())
    };
    let payload = args.payload.clone().into_bytes();

    let (verdict, hash) = if args.hash {
        let hashed = manager
            .put_hashed(triple.at(version), payload, VersionKey::ZERO, &keys, args.ttl)
            .await?;
        (hashed.verdict, Some(hashed.content_hash))
    } else {
        let verdict = manager
            .put(triple.at(version), payload, VersionKey::ZERO, &keys, args.ttl)
            .await?;
        (verdict, None)
    };

    let stored = manager.get(&triple, None).await?;
    let read_back = stored
        .as_ref()
        .map(|record| String::from_utf8_lossy(&record.payload).into_owned());

    match format {
        OutputFormat::Json => {
            let out = json!({
                "key": triple.to_string(),
                "verdict": verdict_json(&verdict),
                "content_hash": hash.map(|h| h.to_hex()),
                "read_back": read_back,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("{} {}", "Key:".bold(), triple);
            print_verdict("put", &verdict);
            if let Some(hash) = hash {
                println!("  {} {}", "hash:".dimmed(), hash);
            }
            match read_back {
                Some(text) => println!("  {} {}", "read back:".dimmed(), text),
                None => println!("  {}", "nothing stored".yellow()),
            }
        }
    }

    if !verdict.is_accepted() {
        bail!("put was not accepted");
    }
    Ok(())
}

async fn cmd_history(
    config: &PeerVaultConfig,
    args: HistoryArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if args.revisions == 0 {
        bail!("--revisions must be at least 1");
    }
    let (network, manager) = connect(config)?;
    let keys = ProtectionKeys::generate();
    let triple = triple_of(&args.key);

    let start = now_ms();
    let mut head = VersionKey::ZERO;
    let mut written = Vec::new();
    for i in 0..args.revisions {
        let payload = format!("revision {i}");
        let version = VersionKey::new(start + u64::from(i), payload.as_bytes());
        let verdict = manager
            .put(triple.at(version), payload.into_bytes(), head, &keys, 0)
            .await?;
        if format == OutputFormat::Text {
            print_verdict(&format!("revision {i}"), &verdict);
        }
        if !verdict.is_accepted() {
            bail!("revision {i} was not accepted");
        }
        written.push(version);
        head = version;
    }

    let mut replicas = Vec::with_capacity(network.len());
    for (i, store) in network.stores().iter().enumerate() {
        let digest = store.digest(&triple)?;
        let versions: Vec<String> = digest.iter().map(|(v, _)| v.to_hex()).collect();
        replicas.push((format!("replica-{i}"), versions));
    }

    let removed = if args.remove {
        Some(manager.remove(triple, None, &keys).await?)
    } else {
        None
    };
    let remaining = manager.get(&triple, None).await?;

    match format {
        OutputFormat::Json => {
            let out = json!({
                "key": triple.to_string(),
                "written": written.iter().map(|v| v.to_hex()).collect::<Vec<_>>(),
                "max_versions": config.storage.max_versions,
                "replicas": replicas
                    .iter()
                    .map(|(peer, versions)| json!({ "peer": peer, "retained": versions }))
                    .collect::<Vec<_>>(),
                "removed": removed,
                "head": remaining.map(|r| r.version.to_hex()),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "\n{} (max {} per replica)",
                "Retained revisions".bold(),
                config.storage.max_versions
            );
            for (peer, versions) in &replicas {
                println!("  {} {}", peer.cyan(), versions.len());
                for version in versions {
                    println!("    {}", &version[..16]);
                }
            }
            if let Some(removed) = removed {
                if removed {
                    println!("{} removed {}", "✓".green().bold(), triple);
                } else {
                    println!("{} nothing to remove", "!".yellow().bold());
                }
            }
            match remaining {
                Some(record) => println!("{} {}", "Head:".bold(), record.version),
                None => println!("{} {}", "Head:".bold(), "none".dimmed()),
            }
        }
    }
    Ok(())
}

async fn cmd_race(config: &PeerVaultConfig, args: RaceArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (_network, manager) = connect(config)?;
    let keys = ProtectionKeys::generate();
    let triple = triple_of(&args.key);

    let start = now_ms();
    let root = VersionKey::new(start, b"root");
    let verdict = manager
        .put(triple.at(root), &b"root"[..], VersionKey::ZERO, &keys, 0)
        .await?;
    if !verdict.is_accepted() {
        print_verdict("root", &verdict);
        bail!("root revision was not accepted");
    }

    let older = VersionKey::new(start + 1, b"writer a");
    let newer = VersionKey::new(start + 2, b"writer b");
    let (a, b) = tokio::join!(
        manager.put(triple.at(older), &b"writer a"[..], root, &keys, 0),
        manager.put(triple.at(newer), &b"writer b"[..], root, &keys, 0),
    );
    let (a, b) = (a?, b?);
    let head = manager.get(&triple, None).await?;

    match format {
        OutputFormat::Json => {
            let out = json!({
                "key": triple.to_string(),
                "root": root.to_hex(),
                "writer_a": verdict_json(&a),
                "writer_b": verdict_json(&b),
                "head": head.map(|r| r.version.to_hex()),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("{} {} on {}", "Race:".bold(), triple, root.to_string().cyan());
            print_verdict("writer a", &a);
            print_verdict("writer b", &b);
            match head {
                Some(record) => println!(
                    "{} {} ({})",
                    "Head:".bold(),
                    record.version,
                    String::from_utf8_lossy(&record.payload)
                ),
                None => println!("{} {}", "Head:".bold(), "none".dimmed()),
            }
        }
    }

    let winners = [&a, &b].iter().filter(|v| v.is_accepted()).count();
    if winners > 1 {
        bail!("both writers were accepted");
    }
    Ok(())
}

fn cmd_config(config: &PeerVaultConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
