//! batchwire CLI — encode and send OData batch requests from the terminal.
//!
//! Usage:
//! ```bash
//! # Render a batch plan as its multipart wire payload
//! batchwire encode --plan plan.json
//!
//! # Execute a batch plan against a service
//! batchwire send --plan plan.json
//! ```
//!
//! A plan file looks like:
//! ```json
//! {
//!   "service": "https://svc.example.com/odata/",
//!   "changesets": [[
//!     {"action": "create", "entity_type": "Author", "entity_set": "Authors",
//!      "data": {"Name": "Iain Banks"},
//!      "navigations": [{"name": "Books", "target_type": "Book"}]},
//!     {"action": "create", "entity_type": "Book", "entity_set": "Books",
//!      "data": {"Title": "The Wasp Factory"}, "parent": 0,
//!      "navigations": [{"name": "Author", "target_type": "Author",
//!                       "foreign_key": "AuthorId"}]}
//!   ]]
//! }
//! ```

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use batchwire_core::{
    shared, BatchCoordinator, CallTarget, EntityRecord, EntityState, Navigation, ServiceRoot,
    SharedEntity,
};
use batchwire_http::HttpBatchTransport;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "encode" => cmd_encode(&args[2..]),
        "send" => cmd_send(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("batchwire {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("batchwire {}", env!("CARGO_PKG_VERSION"));
    println!("Encode and send OData batch requests\n");
    println!("USAGE:");
    println!("    batchwire <COMMAND>\n");
    println!("COMMANDS:");
    println!("    encode     Render a batch plan as its multipart payload");
    println!("    send       Execute a batch plan against the service");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --plan <FILE>   Batch plan JSON  [required]");
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// A loaded plan: the coordinator with everything queued, plus the queued
/// entities in step order for reporting.
struct Plan {
    service: String,
    coordinator: BatchCoordinator,
}

fn load_plan(args: &[String]) -> Result<Plan> {
    let path = parse_flag(args, "--plan").context("--plan is required")?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let plan: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    let service = plan["service"]
        .as_str()
        .context("plan is missing 'service'")?
        .to_string();
    let root = ServiceRoot::parse(&service)?;
    let mut coordinator = BatchCoordinator::new(Arc::new(root));

    let changesets = plan["changesets"]
        .as_array()
        .context("plan is missing 'changesets'")?;

    let mut entities: Vec<SharedEntity> = Vec::new();
    for steps in changesets {
        let steps = steps.as_array().context("changeset must be an array")?;
        coordinator.open_changeset()?;
        for step in steps {
            queue_step(&mut coordinator, step, &mut entities)?;
        }
        coordinator.close_changeset()?;
    }

    Ok(Plan {
        service,
        coordinator,
    })
}

fn queue_step(
    coordinator: &mut BatchCoordinator,
    step: &Value,
    entities: &mut Vec<SharedEntity>,
) -> Result<()> {
    let action = step["action"].as_str().context("step has no 'action'")?;

    if action == "call" {
        let name = step["name"].as_str().context("call has no 'name'")?;
        let mut target = match step["kind"].as_str().unwrap_or("action") {
            "function" => CallTarget::function(name),
            _ => CallTarget::action(name),
        };
        if let Some(params) = step["params"].as_object() {
            for (k, v) in params {
                target = target.param(k, v.clone());
            }
        }
        coordinator.queue_call(target, None)?;
        return Ok(());
    }

    let entity_type = step["entity_type"].as_str().context("step has no 'entity_type'")?;
    let entity_set = step["entity_set"].as_str().context("step has no 'entity_set'")?;
    let mut rec = EntityRecord::new(entity_type, entity_set);
    if let Some(navs) = step["navigations"].as_array() {
        for nav in navs {
            rec = rec.with_navigation(Navigation::new(
                nav["name"].as_str().unwrap_or_default(),
                nav["target_type"].as_str().unwrap_or_default(),
                nav["foreign_key"].as_str().map(String::from),
            ));
        }
    }
    if let Some(url) = step["url"].as_str() {
        rec.mark_persisted(url);
    }
    if let Some(data) = step["data"].as_object() {
        for (k, v) in data {
            rec.set(k, v.clone());
        }
    }
    let entity = shared(rec);

    match action {
        "create" | "update" => {
            let parent = step["parent"]
                .as_u64()
                .map(|i| {
                    entities
                        .get(i as usize)
                        .cloned()
                        .with_context(|| format!("parent index {i} out of range"))
                })
                .transpose()?;
            coordinator.queue_save(&entity, false, parent.as_ref())?;
        }
        "delete" => {
            coordinator.queue_delete(&entity)?;
        }
        other => bail!("unknown action '{other}'"),
    }
    entities.push(entity);
    Ok(())
}

fn cmd_encode(args: &[String]) -> Result<()> {
    let plan = load_plan(args)?;
    let payload = plan.coordinator.payload()?;
    println!("Content-Type: {}", plan.coordinator.content_type());
    println!();
    print!("{}", String::from_utf8_lossy(&payload));
    println!();
    Ok(())
}

async fn cmd_send(args: &[String]) -> Result<()> {
    let mut plan = load_plan(args)?;
    let transport = HttpBatchTransport::default_for(&plan.service);

    let result = plan.coordinator.execute(&transport).await?;

    let mut failed = 0usize;
    for (n, outcome) in result.responses.iter().enumerate() {
        let target = outcome
            .entity
            .as_ref()
            .map(|e| e.lock().unwrap().entity_type().to_string())
            .unwrap_or_else(|| "-".to_string());
        match &outcome.error {
            None => println!("  [{n}] {:<12} HTTP {}", target, outcome.status),
            Some(msg) => {
                failed += 1;
                println!("  [{n}] {:<12} HTTP {}  {msg}", target, outcome.status);
            }
        }
    }
    println!(
        "{} operation(s), {} failed",
        result.responses.len(),
        failed
    );
    if failed > 0 {
        process::exit(1);
    }
    Ok(())
}
