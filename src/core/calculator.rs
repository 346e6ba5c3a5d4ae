use std::collections::BTreeMap;

use super::assumptions::{Assumptions, GrowFactors};
use super::errors::{CalcError, Result};
use super::functions::DAG_ORDER;
use super::policy::Policy;
use super::records::Records;

/// Calculator lifecycle: bound at construction, positioned at a year by
/// `advance_to_year`, and holding valid outputs only after `calc_all`.
/// Advancing (or any input mutation) collapses `Evaluated` back to
/// `AtYear`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum CalcState {
    AtYear,
    Evaluated,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Measure {
    Agi,
    ExpandedIncome,
}

#[derive(Clone, Debug)]
pub enum TableBins {
    /// Ten bins with equal total weight, ordered by the measure.
    WeightedDeciles,
    /// Absolute upper edges on the measure; one extra open-ended top bin.
    Ranges(Vec<f64>),
}

#[derive(Clone, Debug, Default)]
pub struct TableRow {
    pub label: String,
    /// Unweighted row count; zero-weight rows appear here but contribute
    /// nothing to the weighted cells.
    pub rows: u64,
    pub returns: f64,
    pub income: f64,
    pub iitax: f64,
    pub payrolltax: f64,
}

#[derive(Clone, Debug)]
pub struct Table {
    pub rows: Vec<TableRow>,
    pub all: TableRow,
}

impl Table {
    /// Fixed-width text rendering. The `A` prefix marks the all-rows
    /// aggregate line that external comparators consume.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for row in self.rows.iter().chain(std::iter::once(&self.all)) {
            out.push_str(&format!(
                "{:<4}{:>12.0}{:>16.0}{:>14.0}{:>14.0}\n",
                row.label, row.returns, row.income, row.iitax, row.payrolltax
            ));
        }
        out
    }
}

/// The driver: binds one Policy, one Assumptions bundle, and one Records
/// instance, advances them in lockstep, and evaluates the formula DAG.
#[derive(Clone, Debug)]
pub struct Calculator {
    policy: Policy,
    records: Records,
    assumptions: Assumptions,
    growfactors: GrowFactors,
    state: CalcState,
}

impl Calculator {
    pub fn new(policy: Policy, records: Records, assumptions: Assumptions) -> Result<Self> {
        if policy.current_year() != records.current_year() {
            return Err(CalcError::bad_input(format!(
                "policy year {} does not agree with records year {}",
                policy.current_year(),
                records.current_year()
            )));
        }
        let mut growfactors = GrowFactors::default();
        assumptions.growdiff.apply_to(&mut growfactors)?;
        Ok(Self {
            policy,
            records,
            assumptions,
            growfactors,
            state: CalcState::AtYear,
        })
    }

    pub fn current_year(&self) -> u16 {
        self.records.current_year()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Mutable access to the bound records; any outputs computed so far are
    /// no longer readable afterwards.
    pub fn records_mut(&mut self) -> &mut Records {
        self.state = CalcState::AtYear;
        &mut self.records
    }

    /// Advance policy, assumptions, and records together until all sit at
    /// `year`. Backward movement is a state error; years outside the window
    /// are bad input.
    pub fn advance_to_year(&mut self, year: u16) -> Result<()> {
        super::params::year_index(year)?;
        if year < self.records.current_year() {
            return Err(CalcError::state(format!(
                "cannot advance backward from {} to {year}",
                self.records.current_year()
            )));
        }
        while self.records.current_year() < year {
            self.records
                .increment_year(&self.growfactors, &self.assumptions.consumption)?;
        }
        self.policy.set_year(year)?;
        self.state = CalcState::AtYear;
        Ok(())
    }

    /// Evaluate every tax function in DAG order for the current year.
    pub fn calc_all(&mut self) -> Result<()> {
        let params = self.policy.tax_params()?;
        for (_, stage) in DAG_ORDER {
            stage(&params, &mut self.records);
        }
        self.state = CalcState::Evaluated;
        Ok(())
    }

    fn require_evaluated(&self, what: &str) -> Result<()> {
        if self.state != CalcState::Evaluated {
            return Err(CalcError::state(format!(
                "{what} requires calc_all for year {}",
                self.records.current_year()
            )));
        }
        Ok(())
    }

    /// Weighted sum of a column: sum over rows of `col * s006`.
    pub fn weighted_total(&self, column: &str) -> Result<f64> {
        self.require_evaluated("weighted_total")?;
        let col = self.records.column(column)?;
        Ok(col
            .iter()
            .zip(&self.records.s006)
            .map(|(v, w)| v * w)
            .sum())
    }

    fn measure_column(&self, measure: Measure) -> &[f64] {
        match measure {
            Measure::Agi => &self.records.c00100,
            Measure::ExpandedIncome => &self.records.expanded_income,
        }
    }

    /// Bin records by the requested measure and sum the table statistics
    /// with `s006` weighting.
    pub fn distribution_table(&self, bins: &TableBins, measure: Measure) -> Result<Table> {
        self.require_evaluated("distribution_table")?;
        let values = self.measure_column(measure);
        let assignment = assign_bins(bins, values, &self.records.s006);
        Ok(self.build_table(values, &assignment.bins, assignment.num_bins, None))
    }

    /// Pairwise comparison: (other − self) per record, aggregated with this
    /// calculator's measure and weights. Both calculators must hold the
    /// same RECID set.
    pub fn difference_table(
        &self,
        other: &Calculator,
        bins: &TableBins,
        measure: Measure,
    ) -> Result<Table> {
        self.require_evaluated("difference_table")?;
        other.require_evaluated("difference_table")?;

        let mut other_rows: BTreeMap<u64, usize> = BTreeMap::new();
        for (i, id) in other.records.recid.iter().enumerate() {
            other_rows.insert(*id, i);
        }
        if other_rows.len() != self.records.dim() || other.records.dim() != self.records.dim() {
            return Err(CalcError::bad_input(
                "difference_table requires the same RECID set in both calculators",
            ));
        }
        let mut diff_iitax = vec![0.0; self.records.dim()];
        let mut diff_payroll = vec![0.0; self.records.dim()];
        for (i, id) in self.records.recid.iter().enumerate() {
            let j = *other_rows.get(id).ok_or_else(|| {
                CalcError::bad_input(format!(
                    "difference_table: RECID {id} missing from other calculator"
                ))
            })?;
            diff_iitax[i] = other.records.iitax[j] - self.records.iitax[i];
            diff_payroll[i] = other.records.payrolltax[j] - self.records.payrolltax[i];
        }

        let values = self.measure_column(measure);
        let assignment = assign_bins(bins, values, &self.records.s006);
        Ok(self.build_table(
            values,
            &assignment.bins,
            assignment.num_bins,
            Some((&diff_iitax, &diff_payroll)),
        ))
    }

    fn build_table(
        &self,
        values: &[f64],
        bins: &[usize],
        num_bins: usize,
        diffs: Option<(&[f64], &[f64])>,
    ) -> Table {
        let mut rows: Vec<TableRow> = (0..num_bins)
            .map(|b| TableRow {
                label: (b + 1).to_string(),
                ..TableRow::default()
            })
            .collect();
        let mut all = TableRow {
            label: "A".to_string(),
            ..TableRow::default()
        };

        for i in 0..self.records.dim() {
            let w = self.records.s006[i];
            let (itx, ptx) = match diffs {
                Some((di, dp)) => (di[i], dp[i]),
                None => (self.records.iitax[i], self.records.payrolltax[i]),
            };
            for row in [&mut rows[bins[i]], &mut all] {
                row.rows += 1;
                row.returns += w;
                row.income += values[i] * w;
                row.iitax += itx * w;
                row.payrolltax += ptx * w;
            }
        }

        Table { rows, all }
    }

    /// Output dump in input row order.
    pub fn dump_csv(&self) -> Result<String> {
        self.require_evaluated("dump")?;
        Ok(self.records.dump_csv())
    }

    pub fn reform_warnings(&self) -> &[String] {
        self.policy.reform_warnings()
    }
}

struct BinAssignment {
    bins: Vec<usize>,
    num_bins: usize,
}

/// Per-row bin index. Ties on a quantile or range edge land in the
/// lower-indexed bin; zero-weight rows ride along wherever the cumulative
/// weight already sits.
fn assign_bins(spec: &TableBins, values: &[f64], weights: &[f64]) -> BinAssignment {
    match spec {
        TableBins::WeightedDeciles => {
            let mut order: Vec<usize> = (0..values.len()).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            let total: f64 = weights.iter().sum();
            let edges: Vec<f64> = (1..=10).map(|k| total * k as f64 / 10.0).collect();

            let mut bins = vec![0; values.len()];
            let mut cum = 0.0;
            let mut bin = 0;
            for &i in &order {
                cum += weights[i];
                while bin < 9 && cum > edges[bin] {
                    bin += 1;
                }
                bins[i] = bin;
            }
            BinAssignment { bins, num_bins: 10 }
        }
        TableBins::Ranges(edges) => {
            let num_bins = edges.len() + 1;
            let bins = values
                .iter()
                .map(|&v| {
                    edges
                        .iter()
                        .position(|&edge| v <= edge)
                        .unwrap_or(edges.len())
                })
                .collect();
            BinAssignment { bins, num_bins }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn calculator_at(csv: &str, year: u16) -> Calculator {
        let mut policy = Policy::current_law().unwrap();
        policy.set_year(year).unwrap();
        let records = Records::from_csv(csv, year).unwrap();
        Calculator::new(policy, records, Assumptions::new().unwrap()).unwrap()
    }

    fn three_filers_2017() -> Calculator {
        let csv = "RECID,MARS,e00200,s006\n1,1,50000,1\n2,1,150000,1\n3,1,500000,1\n";
        calculator_at(csv, 2017)
    }

    #[test]
    fn binding_requires_agreeing_years() {
        let policy = Policy::current_law().unwrap();
        let records = Records::from_csv("RECID,s006\n1,1\n", 2017).unwrap();
        let err = Calculator::new(policy, records, Assumptions::new().unwrap()).unwrap_err();
        assert!(matches!(err, CalcError::BadInput(_)));
    }

    #[test]
    fn regular_tax_increases_with_wages_scenario() {
        let mut calc = three_filers_2017();
        calc.advance_to_year(2017).unwrap();
        calc.calc_all().unwrap();

        let taxbc = &calc.records().taxbc;
        assert!(taxbc[0] < taxbc[1] && taxbc[1] < taxbc[2]);

        let total = calc.weighted_total("iitax").unwrap();
        let sum: f64 = calc.records().iitax.iter().sum();
        assert_close(total, sum, 1e-9);
    }

    #[test]
    fn bracket_rate_reform_shifts_liability_by_bracket_width() {
        let csv = "RECID,MARS,e00200,s006\n1,1,60000,1\n";
        let mut base = calculator_at(csv, 2017);
        base.advance_to_year(2017).unwrap();
        base.calc_all().unwrap();

        let mut policy = Policy::current_law().unwrap();
        policy
            .implement_reform(&json!({"2018": {"II_rt1": 0.12}}))
            .unwrap();
        policy.set_year(2017).unwrap();
        let records = Records::from_csv(csv, 2017).unwrap();
        let mut reformed =
            Calculator::new(policy, records, Assumptions::new().unwrap()).unwrap();
        reformed.advance_to_year(2017).unwrap();
        reformed.calc_all().unwrap();

        // Before the reform year the outputs are identical.
        assert_close(
            reformed.records().iitax[0],
            base.records().iitax[0],
            1e-9,
        );

        base.advance_to_year(2018).unwrap();
        base.calc_all().unwrap();
        reformed.advance_to_year(2018).unwrap();
        reformed.calc_all().unwrap();

        let brk1_2018 = base.policy().tax_params().unwrap().ii_brk[0][0];
        let diff = reformed.records().iitax[0] - base.records().iitax[0];
        assert_close(diff, (0.12 - 0.10) * brk1_2018, 1e-9);
    }

    #[test]
    fn aggregate_row_matches_contract() {
        let mut calc = three_filers_2017();
        calc.advance_to_year(2017).unwrap();
        calc.calc_all().unwrap();

        let table = calc
            .distribution_table(&TableBins::WeightedDeciles, Measure::Agi)
            .unwrap();
        assert_eq!(table.all.rows, 3);
        assert_close(table.all.returns, 3.0, 1e-12);
        assert_close(table.all.income, 700_000.0, 1e-9);
        let itx = calc.weighted_total("iitax").unwrap();
        let ptx = calc.weighted_total("payrolltax").unwrap();
        assert_close(table.all.iitax, itx, 1e-9);
        assert_close(table.all.payrolltax, ptx, 1e-9);

        let text = table.render_text();
        let a_line = text
            .lines()
            .find(|l| l.starts_with("A"))
            .expect("aggregate line present");
        let tokens: Vec<&str> = a_line.split_whitespace().collect();
        assert_eq!(tokens[0], "A");
        assert_eq!(tokens[1], "3");
        assert_eq!(tokens[2], "700000");
    }

    #[test]
    fn one_shot_and_stepwise_advancement_agree() {
        let csv = "RECID,MARS,e00200,e00300,s006\n1,1,40000,1500,1\n2,2,90000,0,2\n";
        let mut one_shot = calculator_at(csv, 2013);
        one_shot.advance_to_year(2016).unwrap();
        one_shot.calc_all().unwrap();

        let mut stepwise = calculator_at(csv, 2013);
        for year in 2014..=2016 {
            stepwise.advance_to_year(year).unwrap();
        }
        stepwise.calc_all().unwrap();

        for col in ["e00200", "s006", "c00100", "iitax", "combined"] {
            let a = one_shot.records().column(col).unwrap();
            let b = stepwise.records().column(col).unwrap();
            for (x, y) in a.iter().zip(b) {
                assert_close(*x, *y, 1e-12);
            }
        }
    }

    #[test]
    fn row_partitions_concatenate() {
        let whole_csv = "RECID,MARS,e00200,s006\n1,1,30000,1\n2,1,80000,1\n3,2,120000,1\n";
        let mut whole = calculator_at(whole_csv, 2015);
        whole.advance_to_year(2015).unwrap();
        whole.calc_all().unwrap();

        let part_a = "RECID,MARS,e00200,s006\n1,1,30000,1\n";
        let part_b = "RECID,MARS,e00200,s006\n2,1,80000,1\n3,2,120000,1\n";
        let mut totals = 0.0;
        for part in [part_a, part_b] {
            let mut calc = calculator_at(part, 2015);
            calc.advance_to_year(2015).unwrap();
            calc.calc_all().unwrap();
            totals += calc.weighted_total("combined").unwrap();
        }
        assert_close(whole.weighted_total("combined").unwrap(), totals, 1e-9);
    }

    #[test]
    fn advance_to_start_year_is_idempotent() {
        let mut calc = calculator_at("RECID,s006\n1,1\n", 2013);
        calc.advance_to_year(2013).unwrap();
        calc.advance_to_year(2013).unwrap();
        assert_eq!(calc.current_year(), 2013);
    }

    #[test]
    fn backward_advancement_is_state_misuse() {
        let mut calc = calculator_at("RECID,s006\n1,1\n", 2013);
        calc.advance_to_year(2016).unwrap();
        let err = calc.advance_to_year(2015).unwrap_err();
        assert!(matches!(err, CalcError::StateMisuse(_)));
    }

    #[test]
    fn out_of_window_year_is_bad_input() {
        let mut calc = calculator_at("RECID,s006\n1,1\n", 2013);
        for year in [2012, 2028] {
            assert!(matches!(
                calc.advance_to_year(year).unwrap_err(),
                CalcError::BadInput(_)
            ));
        }
    }

    #[test]
    fn outputs_unreadable_before_calc_all() {
        let mut calc = three_filers_2017();
        calc.advance_to_year(2017).unwrap();
        assert!(matches!(
            calc.weighted_total("iitax").unwrap_err(),
            CalcError::StateMisuse(_)
        ));
        assert!(calc.dump_csv().is_err());

        calc.calc_all().unwrap();
        assert!(calc.dump_csv().is_ok());

        // Advancing collapses the evaluated state again.
        calc.advance_to_year(2018).unwrap();
        assert!(matches!(
            calc.weighted_total("iitax").unwrap_err(),
            CalcError::StateMisuse(_)
        ));
    }

    #[test]
    fn mutating_records_collapses_evaluated_state() {
        let mut calc = three_filers_2017();
        calc.advance_to_year(2017).unwrap();
        calc.calc_all().unwrap();
        calc.records_mut().e00200[0] = 75_000.0;
        assert!(calc.weighted_total("iitax").is_err());
    }

    #[test]
    fn weighted_deciles_split_equal_weights_evenly() {
        let mut csv = String::from("RECID,MARS,e00200,s006\n");
        for i in 1..=10 {
            csv.push_str(&format!("{i},1,{},1\n", i * 10_000));
        }
        let mut calc = calculator_at(&csv, 2014);
        calc.advance_to_year(2014).unwrap();
        calc.calc_all().unwrap();

        let table = calc
            .distribution_table(&TableBins::WeightedDeciles, Measure::Agi)
            .unwrap();
        for row in &table.rows {
            assert_eq!(row.rows, 1, "bin {}", row.label);
        }
    }

    #[test]
    fn range_bins_assign_edge_values_to_lower_bin() {
        let csv = "RECID,MARS,e00200,s006\n1,1,10000,1\n2,1,50000,1\n3,1,90000,1\n";
        let mut calc = calculator_at(csv, 2014);
        calc.advance_to_year(2014).unwrap();
        calc.calc_all().unwrap();

        let agi = calc.records().c00100[1];
        let table = calc
            .distribution_table(&TableBins::Ranges(vec![agi, 200_000.0]), Measure::Agi)
            .unwrap();
        // The middle record sits exactly on the first edge: lower bin.
        assert_eq!(table.rows[0].rows, 2);
        assert_eq!(table.rows[1].rows, 1);
        assert_eq!(table.rows[2].rows, 0);
    }

    #[test]
    fn zero_weight_rows_count_but_do_not_sum() {
        let csv = "RECID,MARS,e00200,s006\n1,1,50000,0\n2,1,50000,1\n";
        let mut calc = calculator_at(csv, 2014);
        calc.advance_to_year(2014).unwrap();
        calc.calc_all().unwrap();

        let table = calc
            .distribution_table(&TableBins::WeightedDeciles, Measure::Agi)
            .unwrap();
        assert_eq!(table.all.rows, 2);
        assert_close(table.all.returns, 1.0, 1e-12);
    }

    #[test]
    fn difference_table_aggregates_reform_minus_baseline() {
        let csv = "RECID,MARS,e00200,s006\n1,1,60000,1\n2,1,200000,1\n";
        let mut base = calculator_at(csv, 2018);
        base.advance_to_year(2018).unwrap();
        base.calc_all().unwrap();

        let mut policy = Policy::current_law().unwrap();
        policy
            .implement_reform(&json!({"2018": {"II_rt1": 0.12}}))
            .unwrap();
        policy.set_year(2018).unwrap();
        let records = Records::from_csv(csv, 2018).unwrap();
        let mut reformed =
            Calculator::new(policy, records, Assumptions::new().unwrap()).unwrap();
        reformed.advance_to_year(2018).unwrap();
        reformed.calc_all().unwrap();

        let table = base
            .difference_table(&reformed, &TableBins::WeightedDeciles, Measure::Agi)
            .unwrap();
        let expected = reformed.weighted_total("iitax").unwrap()
            - base.weighted_total("iitax").unwrap();
        assert_close(table.all.iitax, expected, 1e-9);
        assert_close(table.all.payrolltax, 0.0, 1e-9);
    }

    #[test]
    fn difference_table_rejects_mismatched_recids() {
        let mut a = calculator_at("RECID,MARS,e00200,s006\n1,1,60000,1\n", 2015);
        a.advance_to_year(2015).unwrap();
        a.calc_all().unwrap();
        let mut b = calculator_at("RECID,MARS,e00200,s006\n2,1,60000,1\n", 2015);
        b.advance_to_year(2015).unwrap();
        b.calc_all().unwrap();

        assert!(matches!(
            a.difference_table(&b, &TableBins::WeightedDeciles, Measure::Agi)
                .unwrap_err(),
            CalcError::BadInput(_)
        ));
    }
}
