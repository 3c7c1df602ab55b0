use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use dms_sync::cache::CacheResult;
use dms_sync::config::Config;
use dms_sync::dms::{partition_active, total_sales_by_outlet, Outlet, Sale};
use dms_sync::engine::SyncEngine;
use dms_sync::sync::{summary, QueuedOperation};
use dms_sync::{logging, net::Connectivity};

#[derive(Parser, Debug)]
#[command(name = "dms-sync")]
#[command(about = "Offline-first browser for DMS outlets, sales and statistics")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dms-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List outlets
  Outlets {
    /// Skip the cache and fetch from the server
    #[arg(long)]
    refresh: bool,
    /// Only active outlets
    #[arg(long, conflicts_with = "inactive")]
    active: bool,
    /// Only inactive outlets
    #[arg(long)]
    inactive: bool,
  },
  /// Show one outlet
  Outlet {
    id: String,
    #[arg(long)]
    refresh: bool,
  },
  /// List sales, optionally of one outlet
  Sales {
    #[arg(long)]
    outlet: Option<String>,
    #[arg(long)]
    refresh: bool,
  },
  /// Show dashboard statistics
  Stats {
    #[arg(long)]
    refresh: bool,
  },
  /// Create, update or delete a sale
  Sale {
    #[command(subcommand)]
    action: SaleAction,
  },
  /// List operations waiting to be synced
  Queue,
  /// Replay queued operations now
  Sync,
  /// Show cache record counts and ages
  CacheStats,
  /// Drop all cached data (queued operations are kept)
  ClearCache,
}

#[derive(Subcommand, Debug)]
enum SaleAction {
  /// Create a sale from a JSON object
  Create { json: String },
  /// Update a sale from a JSON object
  Update { json: String },
  /// Delete a sale by id
  Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log, args.verbose)?;

  let engine = SyncEngine::start(&config)?;
  let result = run(&engine, args.command).await;
  engine.shutdown().await?;
  result
}

async fn run(engine: &SyncEngine, command: Command) -> Result<()> {
  let client = engine.client();

  match command {
    Command::Outlets {
      refresh,
      active,
      inactive,
    } => {
      let result = client.get_outlets(refresh).await?;
      let (active_outlets, inactive_outlets) = partition_active(&result.data);
      let shown = if active {
        active_outlets
      } else if inactive {
        inactive_outlets
      } else {
        result.data.clone()
      };
      print_origin(&result);
      for outlet in &shown {
        print_outlet(outlet);
      }
    }
    Command::Outlet { id, refresh } => {
      let result = client.get_outlet(&id, refresh).await?;
      print_origin(&result);
      print_outlet(&result.data);
    }
    Command::Sales { outlet, refresh } => {
      let result = match &outlet {
        Some(id) => client.get_sales_by_outlet(id, refresh).await?,
        None => client.get_all_sales(refresh).await?,
      };
      print_origin(&result);
      for sale in &result.data {
        print_sale(sale);
      }
      println!();
      for (outlet_id, total) in total_sales_by_outlet(&result.data) {
        println!("outlet {:<6} total {:>14.2}", outlet_id, total);
      }
    }
    Command::Stats { refresh } => {
      let result = client.get_dashboard_stats(refresh).await?;
      print_origin(&result);
      for stat in &result.data.stats {
        println!(
          "{:<20} outlets {:>3}  total {:>14.2}  average {:>14.2}",
          stat.region, stat.outlet_count, stat.total_sales, stat.average_sales
        );
      }
      println!(
        "{} outlets, total sales {:.2}",
        result.data.total_outlets, result.data.total_sales
      );
    }
    Command::Sale { action } => {
      let op = match action {
        SaleAction::Create { json } => client.create_sale(parse_sale(&json)?).await?,
        SaleAction::Update { json } => client.update_sale(parse_sale(&json)?).await?,
        SaleAction::Delete { id } => client.delete_sale(&id).await?,
      };
      println!("queued {}", describe(&op));
    }
    Command::Queue => {
      let pending = engine.queue().pending_operations().await?;
      if pending.is_empty() {
        println!("no pending operations");
      }
      for op in &pending {
        println!("{}", describe(op));
      }
    }
    Command::Sync => {
      if !engine.probe().check_now().await {
        return Err(eyre!("Offline, queued operations kept for later"));
      }
      let result = engine.queue().process_queue().await;
      match summary(result.succeeded, result.failed) {
        Some(message) => println!("{}", message),
        None => println!("nothing to sync"),
      }
      if result.retrying > 0 {
        println!("{} operation(s) will be retried", result.retrying);
      }
    }
    Command::CacheStats => {
      let stats = client.cache_stats().await?;
      println!("outlets          {}", stats.outlets);
      println!("sales            {}", stats.sales);
      println!("dashboard stats  {}", stats.dashboard_stats);
      for (key, written) in &stats.last_written {
        match written {
          Some(at) => println!("{:<16} fetched {}", key, at.to_rfc3339()),
          None => println!("{:<16} never fetched", key),
        }
      }
      println!(
        "pending          {}",
        engine.queue().pending_count().await
      );
    }
    Command::ClearCache => {
      client.clear_cache().await?;
      println!("cache cleared");
    }
  }

  Ok(())
}

fn parse_sale(json: &str) -> Result<Sale> {
  serde_json::from_str(json).map_err(|e| eyre!("Invalid sale JSON: {}", e))
}

fn print_origin<T>(result: &CacheResult<T>) {
  match &result.message {
    Some(message) => println!("[{}] {}", result.origin, message),
    None => println!("[{}]", result.origin),
  }
}

fn print_outlet(outlet: &Outlet) {
  println!(
    "{:<4} {:<28} {:<16} orders {:>5}  {}",
    outlet.id,
    outlet.name,
    outlet.region,
    outlet.total_order,
    if outlet.is_active { "active" } else { "inactive" }
  );
}

fn print_sale(sale: &Sale) {
  println!(
    "{:<5} {} outlet {:<4} {:<12} x{:<4} {:>12.2}  {}",
    sale.id, sale.date, sale.outlet_id, sale.product_name, sale.quantity, sale.total_amount, sale.customer_name
  );
}

fn describe(op: &QueuedOperation) -> String {
  format!(
    "{} {} {} {} (retries {})",
    op.id,
    op.kind.as_str(),
    op.entity_type.as_str(),
    op.entity_id().unwrap_or("-"),
    op.retry_count
  )
}
