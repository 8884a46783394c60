use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use beta_lp_sim::allocation::{allocate, describe_ranges, Budget};
use beta_lp_sim::config::{PriceModel, PriceSource, SimConfig};
use beta_lp_sim::recorder::write_allocation_json;
use beta_lp_sim::sim::{run_episode, run_parallel, AggregatedResult};
use beta_lp_sim::tick_math::PriceCodec;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "beta-lp-sim", about = "Beta-policy concentrated liquidity vs HODL simulator")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Run one episode and write its outputs.
	Run {
		#[command(flatten)]
		sim: SimArgs,
		#[arg(long, default_value = "out")]
		out_dir: PathBuf,
		/// Investor starting token0 (human units) for the investor view.
		#[arg(long)]
		investor0: Option<f64>,
		#[arg(long)]
		investor1: Option<f64>,
	},
	/// Run many seeds in parallel and aggregate.
	Sweep {
		#[command(flatten)]
		sim: SimArgs,
		#[arg(long, default_value_t = 100)]
		episodes: usize,
		#[arg(long, default_value_t = 0)]
		seed_start: u64,
		/// Write a JSON receipt of the aggregate here.
		#[arg(long)]
		receipt: Option<PathBuf>,
	},
	/// Print the allocation for a centre price without simulating.
	Allocate {
		#[command(flatten)]
		sim: SimArgs,
		/// Centre price; defaults to the configured initial price.
		#[arg(long)]
		price: Option<f64>,
		#[arg(long)]
		json: Option<PathBuf>,
	},
}

/// Overrides applied on top of the defaults or `--config`.
#[derive(Args)]
struct SimArgs {
	#[arg(long)]
	config: Option<PathBuf>,
	#[arg(long)]
	alpha: Option<f64>,
	#[arg(long)]
	beta: Option<f64>,
	#[arg(long)]
	num_ranges: Option<i32>,
	#[arg(long)]
	range_width: Option<i32>,
	#[arg(long, allow_hyphen_values = true)]
	range_sep: Option<i32>,
	#[arg(long)]
	price_band_pct: Option<f64>,
	#[arg(long, value_parser = parse_model)]
	model: Option<PriceModel>,
	#[arg(long)]
	initial_price: Option<f64>,
	#[arg(long)]
	mean: Option<f64>,
	#[arg(long)]
	kappa: Option<f64>,
	#[arg(long)]
	sigma: Option<f64>,
	#[arg(long)]
	steps: Option<usize>,
	#[arg(long)]
	num_arbs: Option<u32>,
	/// Order-flow noise scale.
	#[arg(long, alias = "volatility")]
	epsilon: Option<f64>,
	#[arg(long)]
	seed: Option<u64>,
	#[arg(long, value_parser = parse_source)]
	price_source: Option<PriceSource>,
}

fn parse_model(s: &str) -> Result<PriceModel, String> {
	match s {
		"ou" => Ok(PriceModel::Ou),
		"gbm" => Ok(PriceModel::Gbm),
		"latent-vol" | "latent_vol" => Ok(PriceModel::LatentVol),
		other => Err(format!("unknown price model {other:?} (ou, gbm, latent-vol)")),
	}
}

fn parse_source(s: &str) -> Result<PriceSource, String> {
	match s {
		"external" => Ok(PriceSource::External),
		"pool" => Ok(PriceSource::Pool),
		other => Err(format!("unknown price source {other:?} (external, pool)")),
	}
}

impl SimArgs {
	fn build(&self) -> Result<SimConfig> {
		let mut config = match &self.config {
			Some(path) => SimConfig::from_json_file(path)?,
			None => SimConfig::default(),
		};
		let p = &mut config.policy;
		if let Some(v) = self.alpha { p.alpha = v; }
		if let Some(v) = self.beta { p.beta = v; }
		if let Some(v) = self.num_ranges { p.num_ranges = v; }
		if let Some(v) = self.range_width { p.range_width_ticks = v; }
		if let Some(v) = self.range_sep { p.inter_range_separation_ticks = v; }
		if let Some(v) = self.price_band_pct { p.price_band_pct = v; }

		let m = &mut config.market;
		if let Some(v) = self.model { m.model = v; }
		if let Some(v) = self.initial_price { m.initial_price = v; }
		if let Some(v) = self.mean { m.mean = Some(v); }
		if let Some(v) = self.kappa { m.kappa = v; }
		if let Some(v) = self.sigma { m.sigma = v; }

		if let Some(v) = self.num_arbs { config.flow.num_arbs = v; }
		if let Some(v) = self.epsilon { config.flow.epsilon = v; }
		if let Some(v) = self.steps { config.num_steps = v; }
		if let Some(v) = self.seed { config.seed = v; }
		if let Some(v) = self.price_source { config.price_source = v; }

		config.validate()?;
		Ok(config)
	}
}

fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Run { sim, out_dir, investor0, investor1 } => {
			run_cmd(&sim.build()?, &out_dir, investor0.zip(investor1))
		}
		Commands::Sweep { sim, episodes, seed_start, receipt } => {
			sweep_cmd(&sim.build()?, episodes, seed_start, receipt.as_deref())
		}
		Commands::Allocate { sim, price, json } => allocate_cmd(&sim.build()?, price, json.as_deref()),
	}
}

fn create(path: &Path) -> Result<BufWriter<File>> {
	let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
	Ok(BufWriter::new(file))
}

fn run_cmd(config: &SimConfig, out_dir: &Path, investor: Option<(f64, f64)>) -> Result<()> {
	let report = run_episode(config, config.seed)?;

	fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
	report
		.recorder
		.write_episode_csv(create(&out_dir.join("episode.csv"))?, &config.policy)?;
	report.recorder.write_trades_csv(create(&out_dir.join("trades.csv"))?)?;
	write_allocation_json(create(&out_dir.join("beta_ranges.json"))?, &report.allocation)?;
	info!(dir = %out_dir.display(), "episode outputs written");

	let codec = PriceCodec::new(config.pool.decimals0, config.pool.decimals1);
	println!("{}", describe_ranges(&report.allocation, &codec));
	println!("=== Episode summary (seed {}) ===\n", report.seed);
	print!("{}", report.summary.render());

	if let Some((a0, a1)) = investor {
		let Some(view) = report.summary.investor_view(a0, a1) else {
			bail!("LP started with zero value; no investor view");
		};
		println!("\n=== Investor view ({a0} token0 + {a1} token1) ===\n");
		println!("  initial value         {:.6}", view.initial_value);
		println!("  HODL final value      {:.6}", view.hodl_final);
		println!("  LP final (pre-fees)   {:.6}", view.lp_final_pre_fee);
		println!("  fees                  {:.6}", view.fees);
		println!("  final value           {:.6}", view.final_value);
		println!("  net P&L               {:+.6}", view.pnl);
		println!("  net return            {:+.4}%", view.net_return * 100.0);
		println!("  LP vs HODL            {:+.6}", view.pnl_vs_hodl);
		println!("  IL (pre-fees)         {:.6} ({:.4}%)", view.il_abs, view.il_pct * 100.0);
	}
	Ok(())
}

fn sweep_cmd(config: &SimConfig, episodes: usize, seed_start: u64, receipt: Option<&Path>) -> Result<()> {
	if episodes == 0 {
		bail!("--episodes must be at least 1");
	}
	let r = run_parallel(config, episodes, seed_start)?;

	println!("\nEpisodes   Mean P&L vs HODL   Std P&L    Mean Fees   Mean IL%   Win Rate   Sharpe");
	println!("-----------------------------------------------------------------------------------");
	println!(
		"{:>8} {:>18.4} {:>10.4} {:>11.4} {:>10.4} {:>9.1}% {:>8.3}",
		r.n_episodes,
		r.mean_pnl_vs_hodl,
		r.std_pnl_vs_hodl,
		r.mean_fees,
		r.mean_il_pct * 100.0,
		r.win_rate * 100.0,
		r.sharpe
	);

	if let Some(path) = receipt {
		write_receipt(path, config, &r, episodes, seed_start)?;
		println!("\nReceipt: {}", path.display());
	}
	Ok(())
}

fn write_receipt(
	path: &Path,
	config: &SimConfig,
	r: &AggregatedResult,
	episodes: usize,
	seed_start: u64,
) -> Result<()> {
	let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
	let payload = json!({
		"timestamp": ts,
		"episodes": episodes,
		"seed_start": seed_start,
		"config": config,
		"result": r,
	});
	fs::write(path, serde_json::to_vec_pretty(&payload)?)
		.with_context(|| format!("writing {}", path.display()))?;
	Ok(())
}

fn allocate_cmd(config: &SimConfig, price: Option<f64>, json_out: Option<&Path>) -> Result<()> {
	let codec = PriceCodec::new(config.pool.decimals0, config.pool.decimals1);
	let center = codec.point(price.unwrap_or(config.market.initial_price))?;
	let budget = Budget {
		amount0: codec.amount0_to_raw(config.budget.amount0),
		amount1: codec.amount1_to_raw(config.budget.amount1),
	};
	let alloc = allocate(&config.policy, &center, config.pool.tick_spacing, budget)?;

	println!("centre price {:.4} (tick {})\n", center.price, center.tick);
	print!("{}", describe_ranges(&alloc, &codec));
	if alloc.dropped_out_of_bounds + alloc.dropped_low_weight > 0 || alloc.budget_scaled {
		println!(
			"dropped {} out of bounds, {} below weight threshold; budget scaled: {}",
			alloc.dropped_out_of_bounds, alloc.dropped_low_weight, alloc.budget_scaled
		);
	}
	if let Some(path) = json_out {
		write_allocation_json(create(path)?, &alloc)?;
	}
	Ok(())
}
