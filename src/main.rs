use std::{collections::BTreeMap, thread, time::Duration};

use anyhow::{anyhow, Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sluice::driver::Driver;
use sluice_exec::{prune, sync::SyncContext};
use sluice_value::Value;

#[derive(Args, Debug, Clone)]
struct DataArgs {
    /// Directory holding node work directories, configs and cached data
    #[arg(short = 'd', long = "data-dir")]
    data_dir: Option<Utf8PathBuf>,

    /// Directory mirrored to/from for agent delegation
    #[arg(short = 's', long = "sync-dir")]
    sync_dir: Option<Utf8PathBuf>,

    /// Settings file to read defaults from (searched if omitted)
    #[arg(long = "settings")]
    settings: Option<Utf8PathBuf>,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "A content-addressed dataflow engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a node, executing any unresolved upstream dependencies
    Run {
        #[command(flatten)]
        data: DataArgs,
        /// A flow configuration file; repeat to merge several (left to right)
        #[arg(short = 'c', long = "conf", required = true)]
        conf: Vec<Utf8PathBuf>,
        /// The node to evaluate, as `scope.name`
        target: String,
        /// Override properties as `key=value` (dotted scope/node prefixes allowed)
        #[arg(short = 'p', long = "prop")]
        props: Vec<String>,
    },
    /// Poll the sync directory for job files assigned to this agent
    Agent {
        #[command(flatten)]
        data: DataArgs,
        #[arg(short = 'c', long = "conf", required = true)]
        conf: Vec<Utf8PathBuf>,
        /// This agent's name, matching the `.jobs/<slug>.<agent>.json` suffix
        name: String,
    },
    /// Push a node's upstream results from data_dir into sync_dir
    Push {
        #[command(flatten)]
        data: DataArgs,
        #[arg(short = 'c', long = "conf", required = true)]
        conf: Vec<Utf8PathBuf>,
        target: String,
    },
    /// Pull a node's upstream results from sync_dir into data_dir
    Pull {
        #[command(flatten)]
        data: DataArgs,
        #[arg(short = 'c', long = "conf", required = true)]
        conf: Vec<Utf8PathBuf>,
        target: String,
    },
    /// Remove data_dir artifacts with no corresponding node in the given flow(s)
    Prune {
        #[command(flatten)]
        data: DataArgs,
        /// A flow configuration file; repeat to merge several (left to right)
        #[arg(short = 'c', long = "conf", required = true)]
        conf: Vec<Utf8PathBuf>,
        /// Actually delete orphaned artifacts instead of only reporting them
        #[arg(long)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { data, conf, target, props } => run(data, conf, target, props),
        Commands::Agent { data, conf, name } => agent(data, conf, name),
        Commands::Push { data, conf, target } => push(data, conf, target),
        Commands::Pull { data, conf, target } => pull(data, conf, target),
        Commands::Prune { data, conf, confirm } => prune_cmd(data, conf, confirm),
    }
}

fn driver(data: &DataArgs) -> Result<Driver> {
    Driver::new(data.data_dir.clone(), data.sync_dir.clone(), data.settings.as_deref())
}

fn parse_props(raw: &[String]) -> Result<BTreeMap<String, Value>> {
    raw.iter()
        .map(|entry| {
            let (k, v) = entry.split_once('=').ok_or_else(|| anyhow!("invalid --prop {entry:?}, expected key=value"))?;
            Ok((k.to_string(), Value::String(v.to_string())))
        })
        .collect()
}

fn run(data: DataArgs, conf: Vec<Utf8PathBuf>, target: String, props: Vec<String>) -> Result<()> {
    let driver = driver(&data)?;
    let props = parse_props(&props)?;
    let flow = driver.load_flow(&conf, &props).context("loading flow")?;
    let executor = driver.executor(None)?;
    let value = executor.call(&flow, &target).with_context(|| format!("call failed: {target}"))?;
    println!("{value}");
    Ok(())
}

fn push(data: DataArgs, conf: Vec<Utf8PathBuf>, target: String) -> Result<()> {
    let driver = driver(&data)?;
    let flow = driver.load_flow(&conf, &BTreeMap::new())?;
    let ctx = SyncContext { data_dir: &driver.data_dir, sync_dir: &driver.sync_dir };
    ctx.push(&flow, &target)
}

fn pull(data: DataArgs, conf: Vec<Utf8PathBuf>, target: String) -> Result<()> {
    let driver = driver(&data)?;
    let flow = driver.load_flow(&conf, &BTreeMap::new())?;
    let ctx = SyncContext { data_dir: &driver.data_dir, sync_dir: &driver.sync_dir };
    ctx.pull(&flow, &target)
}

fn agent(data: DataArgs, conf: Vec<Utf8PathBuf>, name: String) -> Result<()> {
    let driver = driver(&data)?;
    let executor = driver.executor(None)?;
    let ctx = SyncContext { data_dir: &driver.data_dir, sync_dir: &driver.sync_dir };
    loop {
        // Reloaded every iteration so edits to the conf files take effect
        // without restarting the agent; unchanged sources are served from
        // the driver's conf cache rather than re-parsed from disk.
        let flow = driver.load_flow(&conf, &BTreeMap::new())?;
        let mut did_work = false;
        for id in flow.node_ids() {
            let node = flow.node(&id).expect("id came from node_ids()");
            if node.agent.as_deref() != Some(name.as_str()) {
                continue;
            }
            ctx.pull(&flow, &id)?;
            let value = executor.call(&flow, &id)?;
            tracing::info!(node = id.as_str(), %value, "agent completed node");
            ctx.push(&flow, &id)?;
            did_work = true;
        }
        if !did_work {
            thread::sleep(Duration::from_secs(5));
        }
    }
}

fn prune_cmd(data: DataArgs, conf: Vec<Utf8PathBuf>, confirm: bool) -> Result<()> {
    let driver = driver(&data)?;
    let flow = driver.load_flow(&conf, &BTreeMap::new())?;
    let orphans = prune::find_orphans(&driver.data_dir, &[&flow])?;
    if orphans.is_empty() {
        println!("nothing to prune");
        return Ok(());
    }
    for orphan in &orphans {
        println!("{}\t{}", prune::human_size(orphan.bytes), orphan.path);
    }
    if confirm {
        for orphan in &orphans {
            prune::remove(orphan)?;
        }
        println!("removed {} artifacts", orphans.len());
    } else {
        println!("pass --confirm to remove these");
    }
    Ok(())
}
