//! Append-only episode log and its persisted forms.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::allocation::Allocation;
use crate::error::{SimError, SimResult};
use crate::types::{AllocationPolicy, FlowKind, TradeRecord, TradeStatus, ValuationRecord};

// ─── Recorder ─────────────────────────────────────────────────────────────────

/// Time-ordered valuation rows plus every swap attempt. Rows are never
/// modified once appended.
#[derive(Clone, Debug, Default)]
pub struct EpisodeRecorder {
    records: Vec<ValuationRecord>,
    trades: Vec<TradeRecord>,
}

impl EpisodeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one valuation row. Steps must be strictly increasing.
    pub fn append(&mut self, record: ValuationRecord) -> SimResult<()> {
        if let Some(last) = self.records.last() {
            if record.step <= last.step {
                return Err(SimError::OutOfOrderRecord { step: record.step, last: last.step });
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn push_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    pub fn records(&self) -> &[ValuationRecord] {
        &self.records
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn last(&self) -> Option<&ValuationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One CSV row per record, policy parameters repeated on every row.
    pub fn write_episode_csv<W: Write>(&self, out: W, policy: &AllocationPolicy) -> SimResult<()> {
        let mut wtr = csv::Writer::from_writer(out);
        for r in &self.records {
            wtr.serialize(EpisodeRow::new(r, policy))?;
        }
        wtr.flush().map_err(|e| SimError::Output(e.to_string()))?;
        Ok(())
    }

    pub fn write_trades_csv<W: Write>(&self, out: W) -> SimResult<()> {
        let mut wtr = csv::Writer::from_writer(out);
        for t in &self.trades {
            wtr.serialize(t)?;
        }
        wtr.flush().map_err(|e| SimError::Output(e.to_string()))?;
        Ok(())
    }

    pub fn summarize(&self) -> Option<EpisodeSummary> {
        EpisodeSummary::from_recorder(self)
    }
}

#[derive(Serialize)]
struct EpisodeRow {
    step: usize,
    lp_value_quote: f64,
    hodl_value_quote: f64,
    pool_price: f64,
    external_price: f64,
    net_order_flow_sign: i8,
    tick: i32,
    fees_value_quote: f64,
    il_value_quote: f64,
    n_arb_trades: u32,
    n_rejected: u32,
    fees_estimated: bool,
    alpha: f64,
    beta: f64,
    num_ranges: i32,
    range_width_ticks: i32,
    inter_range_separation_ticks: i32,
    price_band_pct: f64,
}

impl EpisodeRow {
    fn new(r: &ValuationRecord, p: &AllocationPolicy) -> Self {
        Self {
            step: r.step,
            lp_value_quote: r.lp_value_quote,
            hodl_value_quote: r.hodl_value_quote,
            pool_price: r.pool_price,
            external_price: r.external_price,
            net_order_flow_sign: r.net_order_flow_sign,
            tick: r.tick,
            fees_value_quote: r.fees_value_quote,
            il_value_quote: r.il_value_quote,
            n_arb_trades: r.n_arb_trades,
            n_rejected: r.n_rejected,
            fees_estimated: r.fees_estimated,
            alpha: p.alpha,
            beta: p.beta,
            num_ranges: p.num_ranges,
            range_width_ticks: p.range_width_ticks,
            inter_range_separation_ticks: p.inter_range_separation_ticks,
            price_band_pct: p.price_band_pct,
        }
    }
}

// ─── Allocation file ──────────────────────────────────────────────────────────

/// Provisioned ranges in the layout the deployment scripts read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationFile {
    pub tick_lowers: Vec<i32>,
    pub tick_uppers: Vec<i32>,
    pub liquidities: Vec<u128>,
    pub weights: Vec<f64>,
    pub center_tick: i32,
    pub total0: u128,
    pub total1: u128,
}

impl From<&Allocation> for AllocationFile {
    fn from(a: &Allocation) -> Self {
        Self {
            tick_lowers: a.ranges.iter().map(|r| r.lower_tick).collect(),
            tick_uppers: a.ranges.iter().map(|r| r.upper_tick).collect(),
            liquidities: a.ranges.iter().map(|r| r.liquidity).collect(),
            weights: a.ranges.iter().map(|r| r.liquidity_weight).collect(),
            center_tick: a.center_tick,
            total0: a.total0,
            total1: a.total1,
        }
    }
}

pub fn write_allocation_json<W: Write>(out: W, alloc: &Allocation) -> SimResult<()> {
    serde_json::to_writer_pretty(out, &AllocationFile::from(alloc))?;
    Ok(())
}

// ─── Summary ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EpisodeSummary {
    /// Records, including step 0.
    pub steps: usize,
    pub initial_lp_value: f64,
    pub final_lp_value: f64,
    pub initial_hodl_value: f64,
    pub final_hodl_value: f64,
    /// Accrued fees at the end, quote units.
    pub total_fees: f64,
    /// `final_lp - final_hodl`, fees included.
    pub pnl_vs_hodl: f64,
    /// `final_lp / initial_lp - 1`.
    pub net_return: f64,
    /// `final_hodl - (final_lp - fees)`; positive is a loss.
    pub il_abs: f64,
    pub il_pct: f64,
    pub n_filled: usize,
    pub n_arb_trades: usize,
    pub n_rejected: usize,
    pub initial_external_price: f64,
    pub final_external_price: f64,
    pub final_pool_price: f64,
    pub final_tick: i32,
}

impl EpisodeSummary {
    pub fn from_recorder(rec: &EpisodeRecorder) -> Option<Self> {
        let first = rec.records.first()?;
        let last = rec.records.last()?;
        let trades = rec.trades();
        let il_abs = last.hodl_value_quote - (last.lp_value_quote - last.fees_value_quote);
        Some(Self {
            steps: rec.len(),
            initial_lp_value: first.lp_value_quote,
            final_lp_value: last.lp_value_quote,
            initial_hodl_value: first.hodl_value_quote,
            final_hodl_value: last.hodl_value_quote,
            total_fees: last.fees_value_quote,
            pnl_vs_hodl: last.lp_value_quote - last.hodl_value_quote,
            net_return: ratio(last.lp_value_quote, first.lp_value_quote) - 1.0,
            il_abs,
            il_pct: ratio(il_abs, last.hodl_value_quote),
            n_filled: trades.iter().filter(|t| t.status == TradeStatus::Filled).count(),
            n_arb_trades: trades
                .iter()
                .filter(|t| t.kind == FlowKind::Arbitrage && t.status == TradeStatus::Filled)
                .count(),
            n_rejected: trades.iter().filter(|t| t.status == TradeStatus::Rejected).count(),
            initial_external_price: first.external_price,
            final_external_price: last.external_price,
            final_pool_price: last.pool_price,
            final_tick: last.tick,
        })
    }

    /// Scale the episode to an investor starting with the given human
    /// holdings, pro rata by initial value. `None` if the LP started at zero.
    pub fn investor_view(&self, amount0: f64, amount1: f64) -> Option<InvestorView> {
        if self.initial_lp_value <= 0.0 {
            return None;
        }
        let initial_value = amount0 * self.initial_external_price + amount1;
        let fraction = initial_value / self.initial_lp_value;
        let lp_pre_fee = fraction * (self.final_lp_value - self.total_fees);
        let fees = fraction * self.total_fees;
        let final_value = lp_pre_fee + fees;
        let hodl_final = amount0 * self.final_external_price + amount1;
        let il_abs = hodl_final - lp_pre_fee;
        Some(InvestorView {
            amount0,
            amount1,
            initial_value,
            fraction,
            lp_final_pre_fee: lp_pre_fee,
            fees,
            final_value,
            hodl_final,
            pnl: final_value - initial_value,
            net_return: ratio(final_value, initial_value) - 1.0,
            pnl_vs_hodl: final_value - hodl_final,
            il_abs,
            il_pct: ratio(il_abs, hodl_final),
        })
    }

    /// Multi-line text report.
    pub fn render(&self) -> String {
        format!(
            "steps                 {}\n\
             LP value              {:.6} -> {:.6}\n\
             HODL value            {:.6} -> {:.6}\n\
             fees                  {:.6}\n\
             LP vs HODL            {:+.6}\n\
             net return            {:+.4}%\n\
             IL (pre-fees)         {:.6} ({:.4}%)\n\
             trades                {} filled, {} arb, {} rejected\n\
             external price        {:.4} -> {:.4}\n\
             final pool price      {:.4} (tick {})\n",
            self.steps,
            self.initial_lp_value,
            self.final_lp_value,
            self.initial_hodl_value,
            self.final_hodl_value,
            self.total_fees,
            self.pnl_vs_hodl,
            self.net_return * 100.0,
            self.il_abs,
            self.il_pct * 100.0,
            self.n_filled,
            self.n_arb_trades,
            self.n_rejected,
            self.initial_external_price,
            self.final_external_price,
            self.final_pool_price,
            self.final_tick,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvestorView {
    pub amount0: f64,
    pub amount1: f64,
    pub initial_value: f64,
    pub fraction: f64,
    pub lp_final_pre_fee: f64,
    pub fees: f64,
    pub final_value: f64,
    pub hodl_final: f64,
    pub pnl: f64,
    pub net_return: f64,
    pub pnl_vs_hodl: f64,
    pub il_abs: f64,
    pub il_pct: f64,
}

#[inline]
fn ratio(num: f64, den: f64) -> f64 {
    if den != 0.0 { num / den } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Range, Side};

    fn record(step: usize, lp: f64, hodl: f64, fees: f64, price: f64) -> ValuationRecord {
        ValuationRecord {
            step,
            lp_value_quote: lp,
            hodl_value_quote: hodl,
            pool_price: price,
            external_price: price,
            net_order_flow_sign: 0,
            tick: -195_611,
            fees_value_quote: fees,
            il_value_quote: lp - hodl - fees,
            n_arb_trades: 0,
            n_rejected: 0,
            fees_estimated: false,
        }
    }

    #[test]
    fn steps_must_increase() {
        let mut rec = EpisodeRecorder::new();
        rec.append(record(0, 1.0, 1.0, 0.0, 1.0)).unwrap();
        rec.append(record(1, 1.0, 1.0, 0.0, 1.0)).unwrap();
        assert_eq!(
            rec.append(record(1, 1.0, 1.0, 0.0, 1.0)),
            Err(SimError::OutOfOrderRecord { step: 1, last: 1 })
        );
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn episode_csv_has_policy_columns() {
        let mut rec = EpisodeRecorder::new();
        rec.append(record(0, 82_000.0, 82_000.0, 0.0, 3_200.0)).unwrap();
        rec.append(record(1, 81_990.0, 82_010.0, 5.0, 3_201.0)).unwrap();
        let mut buf = Vec::new();
        rec.write_episode_csv(&mut buf, &AllocationPolicy::default()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("step,lp_value_quote,hodl_value_quote"));
        assert!(header.ends_with("inter_range_separation_ticks,price_band_pct"));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn trade_csv_round_trips_through_serde() {
        let mut rec = EpisodeRecorder::new();
        rec.push_trade(TradeRecord {
            step: 3,
            kind: FlowKind::Arbitrage,
            side: Side::SellBase,
            size_quote: 250.0,
            status: TradeStatus::Rejected,
            delta0: 0.0,
            delta1: 0.0,
            tick_before: -195_600,
            tick_after: -195_600,
        });
        let mut buf = Vec::new();
        rec.write_trades_csv(&mut buf).unwrap();
        let mut rdr = csv::Reader::from_reader(buf.as_slice());
        let back: Vec<TradeRecord> = rdr.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(back, rec.trades());
    }

    #[test]
    fn allocation_file_uses_deployment_keys() {
        let alloc = Allocation {
            ranges: vec![Range { lower_tick: -60, upper_tick: 60, liquidity_weight: 1.0, liquidity: 42 }],
            total0: 1,
            total1: 2,
            center_tick: 0,
            support: (-100, 100),
            dropped_out_of_bounds: 0,
            dropped_low_weight: 0,
            budget_scaled: false,
        };
        let mut buf = Vec::new();
        write_allocation_json(&mut buf, &alloc).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["tickLowers"][0], -60);
        assert_eq!(v["tickUppers"][0], 60);
        assert_eq!(v["liquidities"][0], 42);
    }

    #[test]
    fn summary_and_investor_view() {
        let mut rec = EpisodeRecorder::new();
        rec.append(record(0, 100.0, 100.0, 0.0, 10.0)).unwrap();
        rec.append(record(1, 104.0, 110.0, 2.0, 11.0)).unwrap();
        let s = rec.summarize().unwrap();
        assert_eq!(s.steps, 2);
        assert!((s.pnl_vs_hodl + 6.0).abs() < 1e-12);
        assert!((s.il_abs - 8.0).abs() < 1e-12);
        assert!((s.net_return - 0.04).abs() < 1e-12);

        // investor twice the size of the LP
        let inv = s.investor_view(10.0, 100.0).unwrap();
        assert!((inv.fraction - 2.0).abs() < 1e-12);
        assert!((inv.final_value - 208.0).abs() < 1e-9);
        assert!((inv.hodl_final - 210.0).abs() < 1e-9);
        assert!((inv.pnl_vs_hodl + 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_recorder_has_no_summary() {
        assert!(EpisodeRecorder::new().summarize().is_none());
    }
}
