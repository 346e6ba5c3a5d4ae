use serde_json::Value as Json;

use super::errors::{CalcError, Result};
use super::params::{IndexingRates, NUM_YEARS, ParameterStore, START_YEAR, year_index};

const GROWDIFF_JSON: &str = include_str!("../../data/growdiff.json");
const CONSUMPTION_JSON: &str = include_str!("../../data/consumption.json");

/// CBO-style year-over-year growth rates used to build the grow-factor
/// levels. Each array has one entry per step between consecutive years of
/// the supported window.
const ACPIU_RATES: [f64; NUM_YEARS - 1] = [
    0.015, 0.016, 0.013, 0.021, 0.024, 0.019, 0.023, 0.018, 0.020, 0.021, 0.020, 0.021, 0.020,
    0.021,
];
const AWAGE_RATES: [f64; NUM_YEARS - 1] = [
    0.034, 0.046, 0.024, 0.029, 0.034, 0.036, 0.035, 0.033, 0.036, 0.038, 0.036, 0.035, 0.034,
    0.035,
];
const AINTS_RATES: [f64; NUM_YEARS - 1] = [
    0.021, 0.045, 0.031, 0.026, 0.034, 0.051, 0.043, 0.031, 0.028, 0.033, 0.035, 0.034, 0.032,
    0.031,
];
const ADIVS_RATES: [f64; NUM_YEARS - 1] = [
    0.050, 0.043, 0.021, 0.037, 0.046, 0.043, 0.040, 0.038, 0.041, 0.042, 0.040, 0.041, 0.040,
    0.039,
];
const ASCHCI_RATES: [f64; NUM_YEARS - 1] = [
    0.042, 0.048, 0.031, 0.036, 0.044, 0.041, 0.039, 0.037, 0.040, 0.041, 0.039, 0.038, 0.037,
    0.038,
];
const ASCHEI_RATES: [f64; NUM_YEARS - 1] = [
    0.036, 0.042, 0.028, 0.031, 0.038, 0.036, 0.034, 0.032, 0.035, 0.036, 0.034, 0.033, 0.032,
    0.033,
];
const ACGNS_RATES: [f64; NUM_YEARS - 1] = [
    0.081, 0.062, 0.014, 0.042, 0.057, 0.049, 0.046, 0.043, 0.048, 0.050, 0.047, 0.046, 0.044,
    0.045,
];
const ASOCSEC_RATES: [f64; NUM_YEARS - 1] = [
    0.044, 0.045, 0.042, 0.043, 0.046, 0.048, 0.049, 0.048, 0.049, 0.050, 0.049, 0.048, 0.047,
    0.048,
];
const AUCOMP_RATES: [f64; NUM_YEARS - 1] = [
    -0.082, -0.074, -0.031, 0.004, 0.009, 0.012, 0.014, 0.013, 0.012, 0.011, 0.010, 0.011, 0.010,
    0.011,
];
const APOPN_RATES: [f64; NUM_YEARS - 1] = [
    0.008, 0.008, 0.008, 0.008, 0.007, 0.007, 0.007, 0.007, 0.007, 0.006, 0.006, 0.006, 0.006,
    0.006,
];

fn levels(rates: &[f64; NUM_YEARS - 1]) -> [f64; NUM_YEARS] {
    let mut out = [1.0; NUM_YEARS];
    for i in 1..NUM_YEARS {
        out[i] = out[i - 1] * (1.0 + rates[i - 1]);
    }
    out
}

fn step_rates(levels: &[f64; NUM_YEARS]) -> Vec<f64> {
    (1..NUM_YEARS)
        .map(|i| levels[i] / levels[i - 1] - 1.0)
        .collect()
}

/// Grow-factor level table for the supported window. Record aging multiplies
/// each input column by `level[y+1] / level[y]` of its assigned series;
/// Policy derives its price and wage indexing rates from the same levels.
#[derive(Clone, Debug)]
pub struct GrowFactors {
    pub acpiu: [f64; NUM_YEARS],
    pub awage: [f64; NUM_YEARS],
    pub aints: [f64; NUM_YEARS],
    pub adivs: [f64; NUM_YEARS],
    pub aschci: [f64; NUM_YEARS],
    pub aschei: [f64; NUM_YEARS],
    pub acgns: [f64; NUM_YEARS],
    pub asocsec: [f64; NUM_YEARS],
    pub aucomp: [f64; NUM_YEARS],
    pub apopn: [f64; NUM_YEARS],
}

impl Default for GrowFactors {
    fn default() -> Self {
        Self {
            acpiu: levels(&ACPIU_RATES),
            awage: levels(&AWAGE_RATES),
            aints: levels(&AINTS_RATES),
            adivs: levels(&ADIVS_RATES),
            aschci: levels(&ASCHCI_RATES),
            aschei: levels(&ASCHEI_RATES),
            acgns: levels(&ACGNS_RATES),
            asocsec: levels(&ASOCSEC_RATES),
            aucomp: levels(&AUCOMP_RATES),
            apopn: levels(&APOPN_RATES),
        }
    }
}

impl GrowFactors {
    pub fn series(&self, name: &str) -> Result<&[f64; NUM_YEARS]> {
        match name {
            "ACPIU" => Ok(&self.acpiu),
            "AWAGE" => Ok(&self.awage),
            "AINTS" => Ok(&self.aints),
            "ADIVS" => Ok(&self.adivs),
            "ASCHCI" => Ok(&self.aschci),
            "ASCHEI" => Ok(&self.aschei),
            "ACGNS" => Ok(&self.acgns),
            "ASOCSEC" => Ok(&self.asocsec),
            "AUCOMP" => Ok(&self.aucomp),
            "APOPN" => Ok(&self.apopn),
            other => Err(CalcError::bad_input(format!(
                "unknown grow-factor series {other}"
            ))),
        }
    }

    fn series_mut(&mut self, name: &str) -> Result<&mut [f64; NUM_YEARS]> {
        match name {
            "ACPIU" => Ok(&mut self.acpiu),
            "AWAGE" => Ok(&mut self.awage),
            "AINTS" => Ok(&mut self.aints),
            "ADIVS" => Ok(&mut self.adivs),
            "ASCHCI" => Ok(&mut self.aschci),
            "ASCHEI" => Ok(&mut self.aschei),
            "ACGNS" => Ok(&mut self.acgns),
            "ASOCSEC" => Ok(&mut self.asocsec),
            "AUCOMP" => Ok(&mut self.aucomp),
            "APOPN" => Ok(&mut self.apopn),
            other => Err(CalcError::bad_input(format!(
                "unknown grow-factor series {other}"
            ))),
        }
    }

    /// Ratio applied to a column of `series` when records advance into
    /// `year`.
    pub fn aging_ratio(&self, series: &str, year: u16) -> Result<f64> {
        let idx = year_index(year)?;
        if idx == 0 {
            return Err(CalcError::bad_input(format!(
                "no aging step into the window start year {START_YEAR}"
            )));
        }
        let s = self.series(series)?;
        Ok(s[idx] / s[idx - 1])
    }

    pub fn price_inflation_rates(&self) -> Vec<f64> {
        step_rates(&self.acpiu)
    }

    pub fn wage_growth_rates(&self) -> Vec<f64> {
        step_rates(&self.awage)
    }

    pub fn indexing_rates(&self) -> IndexingRates {
        IndexingRates {
            price: self.price_inflation_rates(),
            wage: self.wage_growth_rates(),
        }
    }
}

/// Year-by-year additive differences applied to the grow-factor levels.
#[derive(Clone, Debug)]
pub struct GrowDiff {
    store: ParameterStore,
}

impl GrowDiff {
    pub fn new() -> Result<Self> {
        Ok(Self {
            store: ParameterStore::load(GROWDIFF_JSON, IndexingRates::zero(), &[])?,
        })
    }

    pub fn update(&mut self, assumptions: &Json) -> Result<()> {
        self.store.apply_overrides(assumptions)
    }

    /// Compose the baseline growth series with the stored differences.
    pub fn apply_to(&self, growfactors: &mut GrowFactors) -> Result<()> {
        let names: Vec<String> = self.store.names().map(|s| s.to_string()).collect();
        for name in names {
            let series = growfactors.series_mut(&name)?;
            for (idx, level) in series.iter_mut().enumerate() {
                *level += self.store.value_at(&name, START_YEAR + idx as u16, 0)?;
            }
        }
        Ok(())
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }
}

/// Marginal propensities to consume, by expense category. The Calculator
/// scales the matching Records columns at the start of each year.
#[derive(Clone, Debug)]
pub struct Consumption {
    store: ParameterStore,
}

impl Consumption {
    pub fn new() -> Result<Self> {
        Ok(Self {
            store: ParameterStore::load(CONSUMPTION_JSON, IndexingRates::zero(), &[])?,
        })
    }

    pub fn update(&mut self, assumptions: &Json) -> Result<()> {
        self.store.apply_overrides(assumptions)
    }

    /// Multiplicative factor applied to the named expense column in `year`.
    pub fn scale(&self, column: &str, year: u16) -> Result<f64> {
        let mpc = self.store.value_at(&format!("MPC_{column}"), year, 0)?;
        Ok(1.0 + mpc)
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }
}

/// The economic-assumption bundle a Calculator is bound to.
#[derive(Clone, Debug)]
pub struct Assumptions {
    pub consumption: Consumption,
    pub growdiff: GrowDiff,
}

impl Assumptions {
    pub fn new() -> Result<Self> {
        Ok(Self {
            consumption: Consumption::new()?,
            growdiff: GrowDiff::new()?,
        })
    }

    pub fn start_year(&self) -> u16 {
        START_YEAR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_levels_start_at_one() {
        let gf = GrowFactors::default();
        for name in [
            "ACPIU", "AWAGE", "AINTS", "ADIVS", "ASCHCI", "ASCHEI", "ACGNS", "ASOCSEC", "AUCOMP",
            "APOPN",
        ] {
            assert_eq!(gf.series(name).unwrap()[0], 1.0);
        }
    }

    #[test]
    fn aging_ratio_matches_rate_table() {
        let gf = GrowFactors::default();
        let ratio = gf.aging_ratio("AWAGE", 2014).unwrap();
        assert!((ratio - (1.0 + AWAGE_RATES[0])).abs() < 1e-12);
    }

    #[test]
    fn aging_into_start_year_is_rejected() {
        let gf = GrowFactors::default();
        assert!(gf.aging_ratio("AWAGE", START_YEAR).is_err());
    }

    #[test]
    fn growdiff_shifts_levels_from_its_year() {
        let mut gd = GrowDiff::new().unwrap();
        gd.update(&json!({"2018": {"AWAGE": 0.01}})).unwrap();

        let baseline = GrowFactors::default();
        let mut shifted = GrowFactors::default();
        gd.apply_to(&mut shifted).unwrap();

        let idx_2017 = year_index(2017).unwrap();
        let idx_2018 = year_index(2018).unwrap();
        assert_eq!(shifted.awage[idx_2017], baseline.awage[idx_2017]);
        assert!((shifted.awage[idx_2018] - (baseline.awage[idx_2018] + 0.01)).abs() < 1e-12);
        // The difference carries forward to the end of the window.
        let last = NUM_YEARS - 1;
        assert!((shifted.awage[last] - (baseline.awage[last] + 0.01)).abs() < 1e-12);
    }

    #[test]
    fn consumption_defaults_to_noop_scaling() {
        let c = Consumption::new().unwrap();
        assert_eq!(c.scale("e17500", 2016).unwrap(), 1.0);
    }

    #[test]
    fn consumption_update_changes_scale() {
        let mut c = Consumption::new().unwrap();
        c.update(&json!({"2017": {"MPC_e19800": 0.25}})).unwrap();
        assert_eq!(c.scale("e19800", 2016).unwrap(), 1.0);
        assert!((c.scale("e19800", 2017).unwrap() - 1.25).abs() < 1e-12);
        assert!((c.scale("e19800", 2020).unwrap() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn unknown_consumption_column_is_bad_input() {
        let c = Consumption::new().unwrap();
        assert!(c.scale("e00200", 2016).is_err());
    }
}
